//! Nightly pipeline scheduler daemon.
//!
//! Reads configuration from the JSON file named by `NIGHTFLOW_CONFIG` (if
//! set) with environment overrides on top, validates the nightly pipelines
//! and runs the scheduler until Ctrl-C.

use anyhow::Context;
use nightflow::collaborators::{
    ApiSource, HttpApiSource, JsonLinesWarehouse, LocalObjectStore, StaticApiSource,
};
use nightflow::config::NightflowConfig;
use nightflow::events::LoggingEventSink;
use nightflow::executor::{CommandPhaseRunner, PhaseRunner};
use nightflow::observability::init_tracing;
use nightflow::pipeline::PipelineRunController;
use nightflow::pipelines::{nightly_pipelines, IngestionCollaborators};
use nightflow::scheduler::{Scheduler, SchedulerCheckpoint};
use nightflow::utils::now_utc;
use std::sync::Arc;
use tracing::{error, info, warn};

fn load_config() -> anyhow::Result<NightflowConfig> {
    let base = match std::env::var("NIGHTFLOW_CONFIG") {
        Ok(path) if !path.trim().is_empty() => NightflowConfig::from_file(path.trim())?,
        _ => NightflowConfig::default(),
    };
    Ok(base.with_overrides(|key| std::env::var(key).ok())?)
}

fn api_source(config: &NightflowConfig) -> anyhow::Result<Arc<dyn ApiSource>> {
    match &config.api.url {
        Some(url) => {
            let source = HttpApiSource::new(url.clone(), config.api_timeout())
                .context("failed to build HTTP client")?;
            Ok(Arc::new(source))
        }
        None => {
            warn!("NIGHTFLOW_API_URL is not set; api_ingestion will load no records");
            Ok(Arc::new(StaticApiSource::new(Vec::new())))
        }
    }
}

fn phase_runner(config: &NightflowConfig) -> Arc<dyn PhaseRunner> {
    let mut runner = CommandPhaseRunner::new(config.transform.binary.clone());
    if let Some(dir) = &config.transform.project_dir {
        runner = runner.with_project_dir(dir.clone());
    }
    if let Some(dir) = &config.transform.profiles_dir {
        runner = runner.with_profiles_dir(dir.clone());
    }
    Arc::new(runner)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    init_tracing(config.logging.format)?;
    info!(config = ?config, "Configuration loaded");

    let collaborators = IngestionCollaborators {
        api: api_source(&config)?,
        api_table: config.api.table.clone(),
        store: Arc::new(LocalObjectStore::new(config.local.object_root.clone())),
        bucket: config.object_store.bucket.clone(),
        warehouse: Arc::new(JsonLinesWarehouse::new(
            config.local.warehouse_root.clone(),
            config.warehouse.database.clone(),
            config.warehouse.raw_schema.clone(),
        )),
    };

    let definitions = match nightly_pipelines(&collaborators, &phase_runner(&config)) {
        Ok(definitions) => definitions,
        Err(e) => {
            error!(code = e.code(), hint = ?e.fix_hint(), error = %e, "Invalid pipeline definition");
            return Err(e.into());
        }
    };

    let sink = Arc::new(LoggingEventSink::debug());
    let controller = PipelineRunController::new(config.task_executor())
        .with_config(config.controller_config())
        .with_event_sink(sink.clone());
    let mut scheduler = Scheduler::new(controller)
        .with_config(config.scheduler_config())
        .with_event_sink(sink);

    let now = now_utc();
    for definition in definitions {
        scheduler.register(definition, now)?;
    }

    if let Some(path) = &config.scheduler.checkpoint_path {
        match SchedulerCheckpoint::load(path).await {
            Ok(Some(checkpoint)) => scheduler.restore(&checkpoint),
            Ok(None) => info!(path = %path.display(), "No checkpoint to restore"),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable checkpoint"),
        }
    }

    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Scheduler stopped");
    Ok(())
}
