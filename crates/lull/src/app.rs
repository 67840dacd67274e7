//! Turns a [`LullConfig`] into running components

use anyhow::Context;
use lull_core::{
    ActivityLedger, ContainerExecutor, DebouncePolicy, Dispatcher, JobCatalog, JobDescriptor, JobExecutor,
    Orchestrator, Sweeper, TopicTableMapping,
};
use lull_kafka::{KafkaChangeSource, DEFAULT_CONNECT_TIMEOUT};
use lull_shared::LullConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Everything the orchestrator process runs, built from configuration
pub struct Components {
    /// Topic/table association for subscription and resolution
    pub mapping: Arc<TopicTableMapping>,
    /// Activity and job state shared by the consumer loop and the sweeper
    pub ledger: Arc<ActivityLedger>,
    /// Job launcher behind the orchestrator
    pub dispatcher: Arc<Dispatcher>,
    /// Consumer-side event handling
    pub orchestrator: Orchestrator,
    /// Background expiry task, not yet started
    pub sweeper: Sweeper,
}

/// Build the components with the container-based job runtime
pub fn build(config: &LullConfig) -> lull_core::Result<Components> {
    let runtime = &config.runtime;
    let executor = ContainerExecutor::new(&runtime.container)
        .with_program(&runtime.program)
        .with_sql_client(&runtime.sql_client);

    build_with_executor(config, Arc::new(executor))
}

/// Build the components around any [`JobExecutor`]
pub fn build_with_executor(
    config: &LullConfig,
    executor: Arc<dyn JobExecutor>,
) -> lull_core::Result<Components> {
    let mapping = TopicTableMapping::new(
        config
            .tables
            .iter()
            .map(|table| (table.name.clone(), table.topic.clone())),
    )?;

    let catalog = JobCatalog::new(
        &mapping,
        config.tables.iter().filter_map(|table| {
            table
                .job
                .as_ref()
                .map(|job| (table.name.clone(), JobDescriptor::new(job.clone())))
        }),
    )?;

    let policy = DebouncePolicy::new(config.debounce.window(), config.debounce.expiry())?;
    let ledger = Arc::new(ActivityLedger::new(policy));

    let runtime = &config.runtime;
    let mut dispatcher = Dispatcher::new(executor, catalog, ledger.clone())
        .with_setup_timeout(runtime.setup_timeout())
        .with_job_timeout(runtime.job_timeout());
    dispatcher = if runtime.setup_script.trim().is_empty() {
        dispatcher.without_setup()
    } else {
        dispatcher.with_setup(JobDescriptor::new(runtime.setup_script.clone()))
    };
    let dispatcher = Arc::new(dispatcher);

    let mapping = Arc::new(mapping);
    let orchestrator = Orchestrator::new(mapping.clone(), ledger.clone(), dispatcher.clone());
    let sweeper = Sweeper::new(ledger.clone(), config.debounce.sweep_interval());

    info!(
        tables = mapping.len(),
        dispatchable = dispatcher.catalog().len(),
        window_secs = config.debounce.window_secs,
        "Orchestrator configured"
    );

    Ok(Components {
        mapping,
        ledger,
        dispatcher,
        orchestrator,
        sweeper,
    })
}

/// Subscribe, run the consumer loop and the sweeper until Ctrl-C or SIGTERM.
///
/// Failing to subscribe is fatal. In-flight dispatches are not awaited on
/// the way out.
pub async fn run(config: LullConfig) -> anyhow::Result<()> {
    info!("Starting Dynamic CDC Orchestrator...");

    let components = build(&config).context("invalid orchestrator configuration")?;

    let topics: Vec<String> = components
        .mapping
        .topics()
        .into_iter()
        .map(String::from)
        .collect();
    let source = KafkaChangeSource::connect_async(config.kafka.clone(), topics, DEFAULT_CONNECT_TIMEOUT)
        .await
        .context("failed to subscribe to the change stream")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(components.sweeper.run(shutdown_rx.clone()));

    let consumer = components
        .orchestrator
        .run(source, config.kafka.poll_timeout(), shutdown_rx);
    tokio::pin!(consumer);

    let result = tokio::select! {
        result = &mut consumer => result,
        _ = shutdown_signal() => {
            info!("Shutting down orchestrator...");
            shutdown_tx.send_replace(true);
            consumer.await
        }
    };

    shutdown_tx.send_replace(true);
    if let Err(e) = sweeper.await {
        error!(error = %e, "Sweeper task failed");
    }

    result?;
    info!("Orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
