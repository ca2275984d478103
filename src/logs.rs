use super::*;

const DEFAULT_FILTER: &str = "warn,fetcher=info,scavenge=info";

pub(crate) fn logs_enabled() -> bool {
    env::var_os("RUST_LOG").is_some()
}

pub(crate) fn init() -> tracing_appender::non_blocking::WorkerGuard {
    let (writer, guard) = non_blocking(io::stderr());

    let filter = if logs_enabled() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(DEFAULT_FILTER)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(writer)
                .with_filter(filter),
        )
        .init();

    guard
}
