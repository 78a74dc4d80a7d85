//! fnproxy - function sidecar proxy

use std::sync::Arc;

use clap::Parser;

use fnproxy::{
    init_telemetry, start_server, AppState, Cli, CredentialMinter, Dispatcher, HealthChecker,
    Pipeline, PlatformClient, ReqwestPlatformClient, ReqwestWorkerClient, TokioProcessLauncher,
    WorkerCommand, WorkerSupervisor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(cli.log_format)?;

    let config = Arc::new(cli.into_config()?);
    tracing::debug!(config = ?config, "loaded configuration");

    // The worker must be up before the first invocation arrives
    let supervisor = Arc::new(WorkerSupervisor::new(
        WorkerCommand::from_config(&config.worker),
        Arc::new(TokioProcessLauncher),
    ));
    supervisor.start().await?;

    let platform: Arc<dyn PlatformClient> = Arc::new(
        ReqwestPlatformClient::new()
            .map_err(|e| anyhow::anyhow!("Failed to build platform client: {}", e))?,
    );
    let minter = Arc::new(CredentialMinter::from_config(&config, platform.clone())?);
    let sync_pipeline =
        Pipeline::standard(config.org_id_18.clone(), platform.clone(), minter.clone())?;
    let async_pipeline =
        Pipeline::standard_async(config.org_id_18.clone(), platform.clone(), minter)?;
    tracing::info!(steps = ?async_pipeline.step_names(), "invocation pipelines ready");

    let dispatcher = Dispatcher::new(
        config.worker.url.clone(),
        Arc::new(ReqwestWorkerClient::new()),
        platform,
    );
    let health = HealthChecker::new(
        config.org_id_18.clone(),
        dispatcher.clone(),
        supervisor,
        config.restart_grace,
    );

    let state = AppState {
        sync_pipeline: Arc::new(sync_pipeline),
        async_pipeline: Arc::new(async_pipeline),
        dispatcher,
        health: Arc::new(health),
    };

    start_server(config.listen_addr, state).await?;
    Ok(())
}
