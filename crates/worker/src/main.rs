// Flowgate worker binary
//
// Startup order: .env, telemetry, config, engine bootstrap, HTTP server.
// Exit codes: 0 clean shutdown, 1 other errors, 75 engine never became ready.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flowgate_core::routing::SharedRoutingTable;
use flowgate_worker::{
    connect, health_check, init_telemetry, router, AppState, ConnectionError, EngineMode,
    GrpcConnector, GrpcEngineClient, InMemoryEngine, TelemetryConfig, WorkerConfig,
    WorkflowStarter,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "flowgate-worker")]
#[command(about = "Routes events and chat sessions to durable workflows")]
#[command(version)]
struct Args {
    /// Probe the engine once and exit 0 (reachable) or 1 (unreachable)
    #[arg(long)]
    health_check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    let telemetry = TelemetryConfig::from_env();
    if let Err(e) = init_telemetry(&telemetry) {
        eprintln!("failed to initialize logging: {e}");
    }

    let result = if args.health_check {
        probe().await
    } else {
        run().await
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "flowgate-worker failed");
            let code = e
                .downcast_ref::<ConnectionError>()
                .map(ConnectionError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn probe() -> Result<ExitCode> {
    let config = WorkerConfig::from_env()?;
    let address = config.engine_address();
    let healthy = health_check(&GrpcConnector::default(), &address, config.health_timeout()).await;
    tracing::info!(address = %address, healthy, "Health check finished");
    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run() -> Result<ExitCode> {
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        engine_address = %config.engine_address(),
        namespace = %config.engine_namespace(),
        mode = ?config.engine_mode,
        "flowgate-worker starting"
    );

    let routing = SharedRoutingTable::from_config(config.load_routing_config()?)
        .context("Invalid routing configuration")?;
    let settings = config.session_settings()?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received shutdown signal");
                shutdown.cancel();
            }
        }
    });

    let engine: Arc<dyn WorkflowStarter> = match config.engine_mode {
        EngineMode::Memory => {
            tracing::warn!("ENGINE_MODE=memory: workflows are recorded in-process only");
            Arc::new(InMemoryEngine::new())
        }
        EngineMode::Grpc => {
            let channel = match connect(
                &GrpcConnector::default(),
                &config.engine_address(),
                &config.retry_policy(),
                &shutdown,
            )
            .await
            {
                Ok(channel) => channel,
                Err(ConnectionError::Cancelled(_)) => return Ok(ExitCode::SUCCESS),
                Err(e) => return Err(e.into()),
            };
            Arc::new(
                GrpcEngineClient::new(channel, config.engine_namespace(), config.worker_identity())
                    .with_ping_timeout(config.health_timeout()),
            )
        }
    };

    let state = AppState::new(
        routing,
        engine,
        settings,
        config.session_runtime_options(),
        config.event_workflow_id_prefix(),
    );
    let registry = Arc::clone(&state.registry);
    let app = router(state);

    let addr = config.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {addr}"))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("Server error")?;

    registry.terminate_all("worker shutdown").await;
    tracing::info!(sessions = registry.len(), "Worker shutdown complete");
    Ok(ExitCode::SUCCESS)
}
