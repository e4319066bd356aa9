//! Cold-room gateway (`coldsrv`)

use clap::Parser;
use common::shutdown::wait_for_shutdown;
use errors::Result;
use tracing::info;

use coldsrv::bootstrap::{self, AppContext, ServiceArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServiceArgs::parse();
    let config = bootstrap::load_configuration(&args)?;
    bootstrap::initialize_logging(&args, &config)?;

    if args.validate {
        bootstrap::validate_configuration(&config)?;
        info!("Validation completed");
        return Ok(());
    }
    if let Some(path) = &args.export_map {
        return bootstrap::export_memory_map(path);
    }

    info!("Starting {} v{}", config.service.name, env!("CARGO_PKG_VERSION"));
    let stores = bootstrap::open_stores(&config, &args).await?;
    let bind_address = args
        .bind_address
        .clone()
        .unwrap_or_else(|| config.bind_address());
    let context = AppContext::with_tcp(config, stores)?;

    let token = context.shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        token.cancel();
    });

    context.serve(&bind_address).await?;
    info!("Shutdown complete");
    Ok(())
}
