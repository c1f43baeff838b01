//! Log capture for integration tests.
//!
//! Output goes through the test runner's capture, so logs only show up for failing tests or with
//! `--nocapture`.

use tracing_subscriber::EnvFilter;

/// Targets logged at full verbosity.
///
/// `uploadbench_test` is listed so that failures inside the test server show up next to the
/// client logs of the same test.
const TARGETS: &[&str] = &["uploadbench", "uploadbench_test"];

/// Installs a test subscriber. Safe to call from every test; only the first call takes effect.
///
/// `RUST_LOG` takes precedence when set, which helps when a test needs `hyper` or `rustls` logs.
/// Otherwise everything outside [`TARGETS`] is limited to errors.
///
/// ```
/// uploadbench_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        TARGETS.iter().fold(EnvFilter::new("ERROR"), |filter, target| {
            filter.add_directive(format!("{target}=TRACE").parse().unwrap())
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
