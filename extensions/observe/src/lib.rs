use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVES: &str = "info,topicflow_core=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Initialize a simple stdout tracing subscriber for development
///
/// Panics if a global subscriber is already installed.
pub fn init_stdout_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

/// Like [`init_stdout_tracing`], but reports an already installed subscriber
/// instead of panicking. Output goes through the test writer so it is
/// captured per test.
pub fn try_init_stdout_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init()
}
