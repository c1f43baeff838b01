use anyhow::Context;
use uploadbench::config::{Args, Config};
use uploadbench::observability;

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    let config = Config::from_args(args).context("invalid arguments")?;

    observability::init_tracing();
    tracing::debug!(?config);

    // Trials run one after another, so a single-threaded runtime is all we need.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime
        .block_on(uploadbench::run(config))
        .context("benchmark failed")
}
