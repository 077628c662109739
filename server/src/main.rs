use bridge::{config, runner};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::get_config()?;

    let subscriber = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to debug for our crates if RUST_LOG is not set
            "bridge=debug,bridge_executors=debug,bridge_core=debug".into()
        }),
    );

    match config.log_format {
        config::LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        config::LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    let controller = runner::build_controller(&config)?;

    tokio::select! {
        result = runner::run_transfer(&controller, &config) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, abandoning the attempt");
            // late results from the node are dropped from here on
            controller.unmount();
        }
    }

    tracing::info!("Bridge runner finished");
    Ok(())
}
