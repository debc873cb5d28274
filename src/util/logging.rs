use tracing_subscriber::{fmt, EnvFilter};

/// Initializes tracing from `RUST_LOG`, defaulting to `info`.
///
/// With `json` set, events are written as one JSON object per line.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    if json {
        subscriber.json().flatten_event(true).init();
    } else {
        subscriber.init();
    }
}
