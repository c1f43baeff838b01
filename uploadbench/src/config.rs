//! Command line arguments and the validated benchmark configuration.

use std::time::Duration;

use argh::FromArgs;
use url::Url;

use crate::error::{Error, Result};

/// Payload size used when none is given on the command line.
pub const DEFAULT_SIZE: u64 = 1024;

/// Upload throughput benchmark for blob storage endpoints
#[derive(Debug, FromArgs)]
pub struct Args {
    /// full URL of the target blob, including any SAS token
    #[argh(positional)]
    pub url: String,

    /// payload size in bytes (default: 1024)
    #[argh(positional)]
    pub size: Option<u64>,

    /// number of benchmark iterations; runs until interrupted if omitted
    #[argh(option, short = 'n')]
    pub iterations: Option<u64>,

    /// connect timeout in seconds for all clients
    #[argh(option)]
    pub timeout: Option<u64>,
}

/// A validated benchmark configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The blob that all trials upload to.
    pub url: Url,
    /// The payload size of every trial, in bytes.
    pub size: u64,
    /// How many rounds of trials to run, or `None` to run forever.
    pub iterations: Option<u64>,
    /// Connect timeout applied to every client.
    pub connect_timeout: Option<Duration>,
}

impl Config {
    /// Creates a configuration for uploading `size` bytes to `url`.
    pub fn new(url: Url, size: u64) -> Result<Self> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::InvalidUrl {
                    message: format!("unsupported URL scheme `{other}`, expected http or https"),
                });
            }
        }

        if url.host_str().is_none() {
            return Err(Error::InvalidUrl {
                message: format!("URL `{url}` has no host"),
            });
        }

        Ok(Self {
            url,
            size,
            iterations: None,
            connect_timeout: None,
        })
    }

    /// Validates the command line arguments.
    pub fn from_args(args: Args) -> Result<Self> {
        let url = Url::parse(&args.url).map_err(|err| Error::InvalidUrl {
            message: format!("invalid URL `{}`: {err}", args.url),
        })?;

        let mut config = Self::new(url, args.size.unwrap_or(DEFAULT_SIZE))?;
        config.iterations = args.iterations;
        config.connect_timeout = args.timeout.map(Duration::from_secs);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Args, argh::EarlyExit> {
        Args::from_args(&["uploadbench"], args)
    }

    #[test]
    fn size_defaults() {
        let args = parse(&["https://account.blob.example/c/b"]).unwrap();
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.size, DEFAULT_SIZE);
        assert_eq!(config.iterations, None);
        assert_eq!(config.connect_timeout, None);
    }

    #[test]
    fn parses_all_arguments() {
        let args = parse(&[
            "https://account.blob.example/c/b?sig=abc",
            "1048576",
            "-n",
            "3",
            "--timeout",
            "5",
        ])
        .unwrap();
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.size, 1024 * 1024);
        assert_eq!(config.iterations, Some(3));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.url.query(), Some("sig=abc"));
    }

    #[test]
    fn url_is_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn rejects_invalid_urls() {
        for url in ["not a url", "ftp://example.com/blob"] {
            let args = parse(&[url]).unwrap();
            assert!(matches!(
                Config::from_args(args),
                Err(Error::InvalidUrl { .. })
            ));
        }
    }
}
