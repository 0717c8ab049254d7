use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tvherald::server::{self, AppState};
use tvherald::shutdown::{OsSignals, ShutdownController, StopHandle};
use tvherald::{HeraldConfig, Pipeline, PipelineOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Initialize Logging
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 2. Load Configuration (fatal before any worker starts)
    let config = HeraldConfig::load().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    // 3. Install signal handlers once
    let signals = OsSignals::new()?;

    // 4. Bind the HTTP listener before any worker is spawned
    let listener = server::bind(&config.server.host, config.server.port).await?;

    // 5. Start the pipeline stages
    let pipeline = Pipeline::start(
        config.build_provider(),
        config.build_sender(),
        config.recipients(),
        PipelineOptions {
            poll_interval: config.poll_interval(),
            backoff: config.backoff(),
        },
    );

    // 6. Serve
    let listener_stop = StopHandle::new("http listener");
    let app = server::router(AppState {
        ingestor: pipeline.ingestor(),
        stats: pipeline.stats(),
    });
    let http = tokio::spawn(server::serve(listener, app, listener_stop.token()));

    // 7. Wire shutdown
    let mut controller = ShutdownController::new();
    for stoppable in pipeline.stoppables() {
        controller.register(stoppable);
    }
    controller.register(Arc::new(listener_stop.clone()));

    let controller_done = CancellationToken::new();
    let controller_task = tokio::spawn(controller.run(signals, controller_done.clone()));

    // 8. Wait for every worker to return
    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "HTTP listener failed");
            pipeline.stop();
        }
        Err(e) => {
            error!(error = %e, "HTTP listener task failed");
            pipeline.stop();
        }
    }
    pipeline.join().await;

    controller_done.cancel();
    let _ = controller_task.await;

    info!("tvherald stopped");
    Ok(())
}
