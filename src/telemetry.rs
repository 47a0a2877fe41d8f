use tracing::error;
use tracing_subscriber::layer::SubscriberExt;

pub fn get_env_filter() -> tracing_subscriber::EnvFilter {
    // RUST_LOG used to control logging level.
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::default()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    })
}

/// Installs a compact console logger filtered by `RUST_LOG`. Safe to call
/// more than once; later calls keep the first subscriber.
pub fn setup_logging() {
    let subscriber = tracing_subscriber::Registry::default()
        .with(tracing_subscriber::fmt::layer().compact())
        .with(get_env_filter());

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        error!("logger was already initiated, continuing: {:?}", e);
    }
}
