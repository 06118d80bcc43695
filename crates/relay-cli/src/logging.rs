use relay_core::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber; logs go to stderr so stdout stays
/// machine-readable
pub(crate) fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|e| {
        eprintln!("warning: invalid log filter {:?} ({e}), using \"info\"", config.filter);
        EnvFilter::new("info")
    });

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_ok() {
        tracing::debug!(json = config.json, filter = %config.filter, "logging initialised");
    }
}
