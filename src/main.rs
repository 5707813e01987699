use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use rip_router::{DatalinkTransport, Router, RouterConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Builder;

#[derive(Parser)]
#[command(name = "rip-router", about = "Software IPv4 router with RIPv2")]
struct Cli {
    /// Path to the JSON router configuration.
    #[arg(long, short)]
    config: PathBuf,

    /// Default log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    let config = RouterConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let rt = Builder::new_multi_thread().enable_all().build()?;

    rt.block_on(async {
        let names: Vec<String> = config.interfaces.iter().map(|iface| iface.name.clone()).collect();
        let (transport, mut frames) = DatalinkTransport::open(&names)?;
        let router = Router::from_config(&config, Arc::new(transport))?;

        for iface in router.interfaces().iter() {
            info!("Interface {}", iface);
        }
        router.init().await;
        router.start().await;

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(frame) => router.handle_frame(&frame.data, &frame.interface).await,
                    None => {
                        error!("All interface readers stopped");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C, shutting down");
                    break;
                }
            }
        }

        router.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })
}
