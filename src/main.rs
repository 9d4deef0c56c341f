//! vidpace - frame grabbing demo with adaptive resolution and resources.
//!
//! The processing loop runs on a blocking thread. Signals and the IPC
//! socket live on the tokio runtime and reach the loop through the event
//! channel.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use vidpace::capture::open_source;
use vidpace::config::{CliArgs, Config, ConfigManager};
use vidpace::error::DemoError;
use vidpace::ipc_server::{IpcContext, StatusResponse, UiEvent};
use vidpace::logging;
use vidpace::metrics::ControlMetrics;
use vidpace::pipeline::{DemoLoop, ExitReason, LoopChannels};
use vidpace::render::LogRenderer;
use vidpace::scheduler::build_gateway;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Initialize logging with JSON format to a rotating file and stderr
    let _log_guard = match logging::init_logging(args.log_level.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(DemoError::from(e).exit_code());
        }
    };

    info!("vidpace starting...");

    match run(args).await {
        Ok(reason) => {
            info!("vidpace shut down cleanly ({:?})", reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("vidpace error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: CliArgs) -> Result<ExitReason, DemoError> {
    let config = load_config(&args)?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(StatusResponse::default());
    let metrics = Arc::new(ControlMetrics::new());

    let signal_tx = events_tx.clone();
    let signal_handle = tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(signal_tx).await {
            error!("Signal handler error: {}", e);
        }
    });

    let ctx = Arc::new(IpcContext {
        events: events_tx,
        status: status_rx,
        metrics: Arc::clone(&metrics),
    });
    let ipc_handle = if config.ipc_enabled {
        let ipc_ctx = Arc::clone(&ctx);
        let socket_path = config.socket_path.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_ipc_server(&socket_path, ipc_ctx).await {
                warn!("IPC server stopped: {}", e);
            }
        }))
    } else {
        info!("IPC server disabled");
        None
    };
    // The loop closes on its own once every sender is gone.
    drop(ctx);

    let channels = LoopChannels {
        events: events_rx,
        status: status_tx,
        metrics,
    };
    let result = tokio::task::spawn_blocking(move || {
        let capture = open_source(config.camera_id, config.input.as_deref());
        let gateway = build_gateway(config.scheduler, config.awm_start, config.awm_upper);
        let renderer = LogRenderer::new(config.snapshot_dir.clone());
        DemoLoop::new(&config, capture, renderer, gateway, channels)?.run()
    })
    .await
    .map_err(|e| DemoError::Runtime(format!("Processing loop panicked: {}", e)))?;

    // Dropping the server task removes the socket file.
    if let Some(handle) = ipc_handle {
        handle.abort();
        let _ = handle.await;
    }
    signal_handle.abort();

    result
}

/// Merge the config file with the command line and validate the result.
fn load_config(args: &CliArgs) -> Result<Config, DemoError> {
    let config_path = args.config_path();
    let manager = ConfigManager::load_or_default(&config_path)?;
    info!("Configuration loaded from {:?}", config_path);

    let mut config = manager.get();
    args.merge_into(&mut config);
    config.validate()?;

    if args.save_config {
        manager.update(config.clone())?;
        info!("Configuration saved to {:?}", manager.path());
    }
    Ok(config)
}

#[cfg(unix)]
async fn run_ipc_server(
    path: &std::path::Path,
    ctx: Arc<IpcContext>,
) -> Result<(), vidpace::error::IpcError> {
    let server = vidpace::ipc_server::IpcServer::new(path).await?;
    server.run(ctx).await
}

#[cfg(not(unix))]
async fn run_ipc_server(
    _path: &std::path::Path,
    _ctx: Arc<IpcContext>,
) -> Result<(), vidpace::error::IpcError> {
    warn!("IPC server not available on this platform");
    Ok(())
}

/// Turn SIGTERM and SIGINT into an exit event.
#[cfg(unix)]
async fn setup_signal_handlers(
    events: mpsc::UnboundedSender<UiEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = events.send(UiEvent::Exit);
    Ok(())
}

#[cfg(not(unix))]
async fn setup_signal_handlers(
    events: mpsc::UnboundedSender<UiEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = events.send(UiEvent::Exit);
    Ok(())
}
