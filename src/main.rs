use adam::{build_info, Config, Engine, MqttTransport};
use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("adam=info")),
        )
        .init();

    info!(
        "ADAM v{} starting (git {})",
        adam::VERSION,
        build_info::GIT_HASH.unwrap_or("unknown")
    );

    let Some(config_path) = std::env::args().nth(1) else {
        error!("Usage: adam <config.yaml>");
        std::process::exit(1);
    };

    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    info!(
        "Loaded {} annunciators, policy {}",
        config.engine.annunciators.len(),
        config.engine.policy()
    );

    let transport = MqttTransport::new(config.mqtt.clone());
    let engine = Arc::new(Engine::with_system_clock(
        &config.engine,
        Arc::new(transport.publisher()),
    )?);

    tokio::spawn(transport.run(engine.clone()));

    let ticker = engine.clone();
    let mut tick_task = tokio::spawn(async move { ticker.run().await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            engine.stop();
        }
        res = &mut tick_task => {
            if let Err(e) = res {
                error!("Ticker task failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    info!("Engine stopped normally");

    let stats = engine.stats();
    info!(
        "Final stats: {} passes, {} alarms, {} sends, {} overrides, {} dropped, {} publish failures",
        stats.passes,
        stats.alarms_accepted,
        stats.sends,
        stats.overrides,
        stats.messages_dropped,
        stats.publish_failures
    );

    Ok(())
}
