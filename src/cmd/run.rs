//! Local pipeline execution: `mender run <file>`.

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use mender::config::MenderConfig;
use mender::errors::WorkflowError;
use mender::pipeline::{DebugRequest, Orchestrator, PipelineEvent, RunProjection};
use mender_common::RunId;

pub struct RunArgs {
    pub file: PathBuf,
    pub language: Option<String>,
    pub context: Option<String>,
    pub max_iterations: Option<u32>,
    pub json: bool,
}

pub async fn cmd_run(project_dir: PathBuf, args: RunArgs) -> Result<()> {
    let code = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let config = MenderConfig::new(project_dir)?;
    let orchestrator = Arc::new(config.build_orchestrator()?);

    let request = DebugRequest {
        code,
        language: args.language,
        context: args.context,
        max_iterations: args.max_iterations,
    };
    let run = orchestrator.prepare(&request).await?;
    let run_id = run.run_id;

    let printer = match orchestrator.events().subscribe(run_id).await {
        Some(mut subscription) if !args.json => Some(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                print_event(&event);
            }
        })),
        _ => None,
    };

    let handle = orchestrator.spawn(run)?;
    let wait = handle.wait();
    tokio::pin!(wait);
    let projection = tokio::select! {
        result = &mut wait => result?,
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("\nCancelling run {}...", run_id);
            request_cancel(&orchestrator, run_id).await?;
            wait.await?
        }
    };

    if let Some(printer) = printer {
        let _ = printer.await;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&projection)?);
    } else {
        print_summary(&projection);
    }

    match projection.workflow_status.as_str() {
        "failed" | "cancelled" => anyhow::bail!(
            "Run {} {}: {}",
            run_id,
            projection.workflow_status,
            projection.message
        ),
        _ => Ok(()),
    }
}

/// Ask a run to stop. A run that concluded in the meantime keeps its result.
async fn request_cancel(orchestrator: &Orchestrator, run_id: RunId) -> Result<(), WorkflowError> {
    match orchestrator.cancel(run_id).await {
        Err(WorkflowError::RunAlreadyFinished { .. } | WorkflowError::RunNotFound { .. }) => Ok(()),
        other => other,
    }
}

fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::AgentStart {
            agent,
            message,
            iteration,
        } => println!(
            "{} {} {} {}",
            style("▶").cyan(),
            style(format!("{:<9}", agent.as_str())).yellow(),
            message,
            style(format!("(cycle {})", iteration + 1)).dim()
        ),
        PipelineEvent::AgentComplete { agent, message, .. } => {
            println!("{} {} {}", style("✓").green(), style(format!("{:<9}", agent.as_str())).yellow(), message)
        }
        PipelineEvent::WorkflowComplete { message, .. } => {
            println!("{} {}", style("●").green().bold(), message)
        }
        PipelineEvent::Error { agent, message, .. } => {
            let source = agent.as_ref().map_or("workflow", |a| a.as_str());
            println!("{} {} {}", style("✗").red().bold(), style(format!("{:<9}", source)).red(), message)
        }
    }
}

fn print_summary(projection: &RunProjection) {
    let status = match projection.workflow_status.as_str() {
        "completed" => style(projection.workflow_status.as_str()).green().bold(),
        "completed_with_warnings" => style(projection.workflow_status.as_str()).yellow().bold(),
        _ => style(projection.workflow_status.as_str()).red().bold(),
    };

    println!();
    println!("Run {}", projection.run_id);
    println!("  Status:     {}", status);
    println!("  Message:    {}", projection.message);
    println!("  Language:   {}", projection.language.display_name());
    println!("  Iterations: {}/{}", projection.iteration, projection.max_iterations);
    println!(
        "  Errors:     {} found, {} fixed ({} warnings)",
        projection.summary.errors_found, projection.summary.errors_fixed, projection.summary.warnings_found
    );
    if let Some(validation) = &projection.validation {
        println!(
            "  Validation: {} (confidence {:.2})",
            validation.status, validation.confidence
        );
    }
    if let Some(ms) = projection.elapsed_ms {
        println!("  Elapsed:    {} ms", ms);
    }

    for error in &projection.errors {
        let line = error.line.map(|l| format!("line {}", l)).unwrap_or_else(|| "-".to_string());
        println!(
            "    {} [{}] {}: {}",
            style(&error.id).red(),
            line,
            error.category,
            error.description
        );
    }

    if projection.final_code != projection.original_code {
        println!();
        println!("{}", style("Fixed code:").bold());
        println!("{}", projection.final_code);
    }
    if let Some(explanation) = &projection.explanation {
        println!();
        println!("{} {}", style("Explanation:").dim(), explanation);
    }
    println!();
}
