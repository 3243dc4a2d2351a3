//! Projection worker entry point: queue → read model.

use pipeline::ops::{self, OpsState};
use pipeline::{
    Config, PipelineError, WorkerContext, run_worker, stop_channel, stop_on_signal, telemetry,
};

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    // 1. Configuration and observability
    let config = Config::from_env()?;
    telemetry::init_tracing(&config)?;
    let metrics = telemetry::install_metrics()?;

    // 2. Shutdown wiring
    let (handle, stop) = stop_channel();
    tokio::spawn(stop_on_signal(handle.clone()));

    // 3. Backends
    let ctx = WorkerContext::connect(&config).await?;

    // 4. Ops endpoint
    let router = ops::router(OpsState {
        component: "projection-worker",
        metrics,
    });
    let addr = config.ops_addr();
    let ops_stop = stop.clone();
    let ops_server = tokio::spawn(async move { ops::serve(&addr, router, ops_stop).await });

    // 5. Apply events until stopped
    run_worker(ctx, stop).await;
    handle.stop();

    match ops_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "ops endpoint failed"),
        Err(e) => tracing::error!(error = %e, "ops endpoint task panicked"),
    }

    tracing::info!("projection worker exited");
    Ok(())
}
