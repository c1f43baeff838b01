//! Run upload trials against a remote blob endpoint and print their throughput.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use bytesize::ByteSize;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use url::Url;
use yansi::Paint;

use crate::blob::{BlobClient, DeleteOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::payload::LargeStream;
use crate::pipeline::Pipeline;
use crate::transport::{
    self, Http1Transport, ReqwestTransport, ResponseMode, Transport, UploadBody, UploadRequest,
};

/// Header selecting the kind of blob created by a `PUT`.
pub const BLOB_TYPE: HeaderName = HeaderName::from_static("x-ms-blob-type");

/// Converts `size` bytes transferred in `duration` into megabits per second (base 1024).
pub fn throughput_mbps(size: u64, duration: Duration) -> f64 {
    ((size as f64 / duration.as_secs_f64()) * 8.0) / (1024.0 * 1024.0)
}

/// Formats an integer with `,` as thousands separator.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// The measured outcome of a single upload.
#[derive(Clone, Debug)]
pub struct Trial {
    /// Which stack and body kind was used, e.g. `http1, stream`.
    pub label: &'static str,
    /// Payload size in bytes.
    pub size: u64,
    /// Wall-clock time of the upload.
    pub duration: Duration,
    /// The response status, if the stack reports one.
    pub status: Option<StatusCode>,
}

impl Trial {
    /// Throughput of this trial in megabits per second.
    pub fn mbps(&self) -> f64 {
        throughput_mbps(self.size, self.duration)
    }

    fn summary(&self) -> String {
        let mut summary = format!(
            "Put {} bytes in {:.2} seconds ({:.2} Mbps)",
            group_thousands(self.size),
            self.duration.as_secs_f64(),
            self.mbps()
        );
        if let Some(status) = self.status {
            summary.push_str(&format!(", Response={}", status.as_u16()));
        }
        summary
    }
}

impl fmt::Display for Trial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.label, self.summary())
    }
}

fn print_trial(trial: &Trial) {
    println!(
        "{} {}",
        format!("[{}]", trial.label).bold().blue(),
        trial.summary()
    );
}

fn print_parameters(config: &Config) {
    println!("{}", "=== Parameters ===".bold());
    println!("Url: {}", transport::redacted(&config.url));
    println!(
        "Size: {} ({})",
        group_thousands(config.size),
        ByteSize::b(config.size)
    );
    if let Some(iterations) = config.iterations {
        println!("Iterations: {iterations}");
    }
    println!();
}

/// All clients taking part in the benchmark, along with the shared payload.
///
/// Every transport is owned here and released by [`close`](Self::close), or when the bench is
/// dropped on an error path.
#[derive(Debug)]
pub struct Bench {
    url: Url,
    size: u64,
    headers: HeaderMap,
    array: Bytes,
    block_id: String,

    http1: Http1Transport,
    pipeline_http1: Pipeline<Http1Transport>,
    pipeline_reqwest: Pipeline<ReqwestTransport>,
    blob: BlobClient,
}

impl Bench {
    /// Creates all clients for the given configuration without connecting yet.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(config.size));
        headers.insert(BLOB_TYPE, HeaderValue::from_static("BlockBlob"));

        let mut payload = LargeStream::with_buffer_len(config.size, 1);
        let array = payload
            .read(Some(usize::try_from(config.size).unwrap_or(usize::MAX)))
            .into_data()
            .unwrap_or_default();

        let http1 = Http1Transport::new(&config.url)?.connect_timeout(config.connect_timeout);
        let pipeline_http1 = Pipeline::new(
            Http1Transport::new(&config.url)?.connect_timeout(config.connect_timeout),
        );
        let pipeline_reqwest =
            Pipeline::new(ReqwestTransport::new().connect_timeout(config.connect_timeout));
        let blob = BlobClient::new(
            config.url.clone(),
            transport::client_builder(config.connect_timeout).build()?,
        );

        Ok(Self {
            url: config.url.clone(),
            size: config.size,
            headers,
            array,
            block_id: uuid::Uuid::new_v4().to_string(),

            http1,
            pipeline_http1,
            pipeline_reqwest,
            blob,
        })
    }

    /// Connects all transports.
    pub async fn open(&mut self) -> Result<()> {
        self.http1.open().await?;
        self.pipeline_http1.open().await?;
        self.pipeline_reqwest.open().await?;
        Ok(())
    }

    /// Releases all transports.
    pub async fn close(&mut self) -> Result<()> {
        self.http1.close().await?;
        self.pipeline_http1.close().await?;
        self.pipeline_reqwest.close().await?;
        Ok(())
    }

    /// Removes the target blob left over from earlier runs.
    ///
    /// Failures are logged and otherwise ignored, since this only prepares the next trials.
    pub async fn cleanup(&self) {
        match self.blob.delete_blob().await {
            Ok(DeleteOutcome::Deleted) => tracing::debug!("deleted existing blob"),
            Ok(DeleteOutcome::NotFound) => tracing::trace!("no blob to delete"),
            Err(err) => tracing::warn!(
                error = &err as &dyn std::error::Error,
                "failed to delete blob before trials"
            ),
        }
    }

    /// Runs one round of trials, passing every finished trial to `report`.
    ///
    /// The first failing trial aborts the round.
    pub async fn run_iteration(&mut self, mut report: impl FnMut(&Trial)) -> Result<Vec<Trial>> {
        self.cleanup().await;

        let mut trials = Vec::with_capacity(7);
        let mut record = |trial: Trial| {
            report(&trial);
            trials.push(trial);
        };

        record(self.direct("http1, stream", self.stream()).await?);
        record(self.direct("http1, array", self.buffer()).await?);
        record(self.via_http1_pipeline("pipeline/http1, stream", self.stream()).await?);
        record(self.via_http1_pipeline("pipeline/http1, array", self.buffer()).await?);
        record(self.via_reqwest_pipeline("pipeline/reqwest, stream", self.stream()).await?);
        record(self.via_reqwest_pipeline("pipeline/reqwest, array", self.buffer()).await?);
        record(self.stage_block("stage_block, stream", self.stream()).await?);

        Ok(trials)
    }

    fn stream(&self) -> UploadBody {
        UploadBody::Stream(LargeStream::new(self.size))
    }

    fn buffer(&self) -> UploadBody {
        UploadBody::Buffer(self.array.clone())
    }

    fn request(&self, body: UploadBody) -> UploadRequest {
        UploadRequest::put(self.url.clone(), body).headers(&self.headers)
    }

    async fn direct(&mut self, label: &'static str, body: UploadBody) -> Result<Trial> {
        let request = self.request(body);
        let start = Instant::now();
        let response = self.http1.send(request, ResponseMode::Buffered).await?;
        self.finish(label, start, Some(response.status))
    }

    async fn via_http1_pipeline(&mut self, label: &'static str, body: UploadBody) -> Result<Trial> {
        let request = self.request(body);
        let start = Instant::now();
        let response = self.pipeline_http1.run(request).await?;
        self.finish(label, start, Some(response.http_response.status))
    }

    async fn via_reqwest_pipeline(
        &mut self,
        label: &'static str,
        body: UploadBody,
    ) -> Result<Trial> {
        let request = self.request(body);
        let start = Instant::now();
        let response = self.pipeline_reqwest.run(request).await?;
        self.finish(label, start, Some(response.http_response.status))
    }

    async fn stage_block(&mut self, label: &'static str, body: UploadBody) -> Result<Trial> {
        let start = Instant::now();
        self.blob.stage_block(&self.block_id, body, self.size).await?;
        self.finish(label, start, None)
    }

    fn finish(
        &self,
        label: &'static str,
        start: Instant,
        status: Option<StatusCode>,
    ) -> Result<Trial> {
        let duration = start.elapsed();
        if let Some(status) = status
            && !status.is_success()
        {
            return Err(Error::Status {
                status,
                url: transport::redacted(&self.url).to_owned(),
            });
        }

        Ok(Trial {
            label,
            size: self.size,
            duration,
            status,
        })
    }
}

/// Runs the benchmark until the configured number of iterations is reached or Ctrl-C is pressed.
///
/// All transports are closed before returning, also when interrupted.
pub async fn run(config: Config) -> Result<()> {
    run_until(config, interrupted()).await
}

/// Runs the benchmark until the configured number of iterations is reached or `shutdown`
/// resolves.
///
/// An in-flight trial is abandoned on shutdown and the run counts as successful. All transports
/// are closed before returning.
pub async fn run_until(config: Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    print_parameters(&config);

    let mut bench = Bench::new(&config)?;
    let result = tokio::select! {
        result = run_iterations(&mut bench, config.iterations) => result,
        () = shutdown => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    };
    let closed = bench.close().await;

    result.and(closed)
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(
            error = &err as &dyn std::error::Error,
            "failed to listen for ctrl-c"
        );
        std::future::pending::<()>().await;
    }
}

async fn run_iterations(bench: &mut Bench, iterations: Option<u64>) -> Result<()> {
    bench.open().await?;

    let mut iteration = 0;
    while iterations.is_none_or(|limit| iteration < limit) {
        iteration += 1;
        tracing::debug!(iteration, "starting iteration");
        bench.run_iteration(print_trial).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_golden_values() {
        assert_eq!(throughput_mbps(1_048_576, Duration::from_secs(1)), 8.0);
        assert_eq!(throughput_mbps(1_048_576, Duration::from_millis(500)), 16.0);
        assert_eq!(throughput_mbps(131_072, Duration::from_secs(2)), 0.5);
        assert_eq!(throughput_mbps(0, Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1_048_576), "1,048,576");
        assert_eq!(group_thousands(123_456_789_012), "123,456,789,012");
    }

    #[test]
    fn trial_lines() {
        let trial = Trial {
            label: "http1, stream",
            size: 1_048_576,
            duration: Duration::from_secs(1),
            status: Some(StatusCode::CREATED),
        };
        assert_eq!(
            trial.to_string(),
            "[http1, stream] Put 1,048,576 bytes in 1.00 seconds (8.00 Mbps), Response=201"
        );

        let trial = Trial {
            label: "stage_block, stream",
            status: None,
            ..trial
        };
        assert_eq!(
            trial.to_string(),
            "[stage_block, stream] Put 1,048,576 bytes in 1.00 seconds (8.00 Mbps)"
        );
    }
}
