//! flow-cli: a small command-line binary demonstrating the DAG engine.
//!
//! With no arguments it submits a trivial single-step workflow against the
//! in-memory stores. Given a path, it reads a JSON file shaped like
//! `{"version": WorkflowVersion, "definitions": BlockDefinitionSet, "input": ...}`
//! and submits that instead. For branching/retry/foreach in one run, see the
//! root package's binary.

use std::env;
use std::fs;

use flow_domain::{Run, Step, StepType, TenantId, TriggerType, WorkflowVersion};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct WorkflowFile {
    version: WorkflowVersion,
    #[serde(default)]
    definitions: flow_domain::BlockDefinitionSet,
    #[serde(default)]
    input: Value,
}

fn trivial_workflow() -> (WorkflowVersion, flow_domain::BlockDefinitionSet, Value) {
    let step = Step::new("hello", StepType::Log)
        .expect("hello is a non-empty name")
        .with_config(json!({ "message": "hello from flow-cli" }));
    let version = WorkflowVersion::new(TenantId::new(), 1).with_steps(vec![step]);
    (version, flow_domain::BlockDefinitionSet::default(), json!({}))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (version, definitions, input) = match env::args().nth(1) {
        Some(path) => {
            let raw = fs::read_to_string(&path)?;
            let file: WorkflowFile = serde_json::from_str(&raw)?;
            (file.version, file.definitions, file.input)
        }
        None => trivial_workflow(),
    };

    println!("flow-cli: submitting workflow version {} for tenant {}", version.version, version.tenant_id);

    let engine = flow_infra::dev_engine()?;
    let mut run = Run::new(version.tenant_id, version.id, TriggerType::Manual, input);
    let run_id = run.id;

    let outcome = engine.submit(version, &definitions, &mut run).await?;
    println!("run {run_id} finished as {:?}", run.status);

    let step_runs = engine.store().list_step_runs(run_id).await?;
    for step_run in step_runs {
        println!(
            "  step_run seq={} attempt={} status={:?} output={:?}",
            step_run.sequence_number, step_run.attempt, step_run.status, step_run.output
        );
    }

    match outcome {
        flow_core::scheduler::DriveOutcome::Completed(output) => {
            println!("output: {}", serde_json::to_string_pretty(&output)?);
        }
        flow_core::scheduler::DriveOutcome::Failed(message) => {
            println!("failed: {message}");
        }
        flow_core::scheduler::DriveOutcome::Cancelled => {
            println!("cancelled");
        }
    }

    Ok(())
}
