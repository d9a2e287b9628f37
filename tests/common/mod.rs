use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Installs a log subscriber that writes into the test output; configure with `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

/// A shared event log for continuations
pub type Log<T> = Arc<Mutex<Vec<T>>>;

/// Creates an empty log
pub fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}
