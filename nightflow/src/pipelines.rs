//! The nightly pipelines.
//!
//! Ingestion runs at midnight, staging transformations at 01:00 and cleaning
//! transformations at 02:00. The stagger is the only coupling between them:
//! each pipeline is scheduled and run independently.

use crate::collaborators::{
    ApiIngestionTask, ApiSource, ObjectStore, ObjectStoreIngestionTask, WarehouseLoader,
};
use crate::errors::DefinitionError;
use crate::executor::{Phase, PhaseRunner, TransformationTask};
use crate::pipeline::{PipelineBuilder, PipelineDefinition, RetryPolicy, TaskNode};
use std::sync::Arc;
use std::time::Duration;

/// Raw data ingestion pipeline name.
pub const INGESTION_PIPELINE: &str = "data-ingestion-pipeline";
/// Staging transformation pipeline name.
pub const STAGING_PIPELINE: &str = "dbt-staging-pipeline";
/// Cleaning transformation pipeline name.
pub const CLEANING_PIPELINE: &str = "dbt-cleaning-pipeline";

/// Retry policy of the ingestion tasks: 3 retries, 60 seconds apart.
#[must_use]
pub fn ingestion_policy() -> RetryPolicy {
    RetryPolicy::with_retries(3, Duration::from_secs(60))
}

/// Retry policy of the transformation tasks: 1 retry after 120 seconds.
#[must_use]
pub fn transformation_policy() -> RetryPolicy {
    RetryPolicy::with_retries(1, Duration::from_secs(120))
}

/// External systems the ingestion pipeline talks to.
#[derive(Clone)]
pub struct IngestionCollaborators {
    /// Upstream API.
    pub api: Arc<dyn ApiSource>,
    /// Table receiving the API records.
    pub api_table: String,
    /// Object store holding CSV exports.
    pub store: Arc<dyn ObjectStore>,
    /// Bucket to ingest.
    pub bucket: String,
    /// Destination warehouse.
    pub warehouse: Arc<dyn WarehouseLoader>,
}

/// Builds `data-ingestion-pipeline`: `api_ingestion` then `minio_to_snowflake`.
///
/// # Errors
///
/// Never fails for the fixed layout; the result mirrors
/// [`PipelineBuilder::build`].
pub fn ingestion_pipeline(collaborators: &IngestionCollaborators) -> Result<PipelineDefinition, DefinitionError> {
    let api = ApiIngestionTask::new(
        collaborators.api.clone(),
        collaborators.warehouse.clone(),
        collaborators.api_table.clone(),
    );
    let objects = ObjectStoreIngestionTask::new(
        collaborators.store.clone(),
        collaborators.warehouse.clone(),
        collaborators.bucket.clone(),
    );

    PipelineBuilder::new(INGESTION_PIPELINE)
        .description("Raw data ingestion pipeline - runs every day")
        .schedule("0 0 * * *")
        .tags(["data-ingestion", "daily"])
        .task(TaskNode::new("api_ingestion", Arc::new(api)).with_retry_policy(ingestion_policy()))
        .task(
            TaskNode::new("minio_to_snowflake", Arc::new(objects))
                .after("api_ingestion")
                .with_retry_policy(ingestion_policy()),
        )
        .build()
}

/// Builds `dbt-staging-pipeline` over `models/staged`.
///
/// # Errors
///
/// Mirrors [`PipelineBuilder::build`].
pub fn staging_pipeline(runner: Arc<dyn PhaseRunner>) -> Result<PipelineDefinition, DefinitionError> {
    transformation_pipeline(
        runner,
        TransformationLayout {
            pipeline: STAGING_PIPELINE,
            description: "dbt staging pipeline - runs daily",
            schedule: "0 1 * * *",
            layer: "staging",
            selector: "models/staged",
        },
    )
}

/// Builds `dbt-cleaning-pipeline` over `models/cleaned`.
///
/// # Errors
///
/// Mirrors [`PipelineBuilder::build`].
pub fn cleaning_pipeline(runner: Arc<dyn PhaseRunner>) -> Result<PipelineDefinition, DefinitionError> {
    transformation_pipeline(
        runner,
        TransformationLayout {
            pipeline: CLEANING_PIPELINE,
            description: "dbt cleaning pipeline - runs daily",
            schedule: "0 2 * * *",
            layer: "cleaning",
            selector: "models/cleaned",
        },
    )
}

/// Builds all three nightly pipelines.
///
/// # Errors
///
/// Returns the first definition error.
pub fn nightly_pipelines(
    collaborators: &IngestionCollaborators,
    runner: &Arc<dyn PhaseRunner>,
) -> Result<Vec<PipelineDefinition>, DefinitionError> {
    Ok(vec![
        ingestion_pipeline(collaborators)?,
        staging_pipeline(runner.clone())?,
        cleaning_pipeline(runner.clone())?,
    ])
}

struct TransformationLayout {
    pipeline: &'static str,
    description: &'static str,
    schedule: &'static str,
    layer: &'static str,
    selector: &'static str,
}

/// `dbt_debug` then `dbt_test_<layer>` then `dbt_run_<layer>`.
fn transformation_pipeline(
    runner: Arc<dyn PhaseRunner>,
    layout: TransformationLayout,
) -> Result<PipelineDefinition, DefinitionError> {
    let test_task = format!("dbt_test_{}", layout.layer);
    let run_task = format!("dbt_run_{}", layout.layer);

    let debug = TransformationTask::new(runner.clone(), Phase::Debug);
    let test = TransformationTask::selecting(runner.clone(), Phase::Test, layout.selector);
    let run = TransformationTask::selecting(runner, Phase::Run, layout.selector);

    PipelineBuilder::new(layout.pipeline)
        .description(layout.description)
        .schedule(layout.schedule)
        .tags(["dbt", layout.layer, "daily"])
        .task(TaskNode::new("dbt_debug", Arc::new(debug)).with_retry_policy(transformation_policy()))
        .task(
            TaskNode::new(test_task.clone(), Arc::new(test))
                .after("dbt_debug")
                .with_retry_policy(transformation_policy()),
        )
        .task(
            TaskNode::new(run_task, Arc::new(run))
                .after(test_task)
                .with_retry_policy(transformation_policy()),
        )
        .build()
}
