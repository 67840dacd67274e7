//! lull orchestrator entry point

use lull_shared::{LullConfig, ObservabilitySystem};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LullConfig::load()?;
    ObservabilitySystem::init(&config.observability)?;

    if let Err(e) = lull::app::run(config).await {
        error!(error = %e, "Orchestrator exited with an error");
        return Err(e);
    }

    Ok(())
}
