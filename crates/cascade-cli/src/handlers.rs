//! Command handlers.

use crate::commands::{CompletionStatus, PlanArgs};
use crate::config::CascadeConfig;
use anyhow::Context;
use cascade_core::ids::{BatchId, JobId};
use cascade_core::job::{Job, JobStatus, RepoRef};
use cascade_core::memory::InMemoryJobRepository;
use cascade_core::ports::{JobRepository, WorkflowDispatcher};
use cascade_core::project::{ImpactedSet, JobPayload, PayloadMap, Project, ProjectsFile};
use cascade_db::Database;
use cascade_dispatch::{DryRunDispatcher, GithubDispatcher};
use cascade_scheduler::{
    CompletionCoordinator, DagBuilder, DispatchReport, JobMaterializer, MaterializedBatch,
    ParentFirstTraversal,
};
use console::style;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

fn load_projects(path: &Path) -> anyhow::Result<ProjectsFile> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(ProjectsFile::from_yaml(&content)?)
}

/// Parse a JSON object of project payloads.
///
/// String values are used verbatim; any other value is stored as its JSON
/// encoding.
pub fn parse_payloads(content: &str) -> anyhow::Result<PayloadMap> {
    let values: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(content).context("payloads must be a JSON object")?;
    values
        .into_iter()
        .map(|(name, value)| {
            let payload = match value {
                serde_json::Value::String(s) => JobPayload::from_bytes(s),
                other => JobPayload::from_json(&other)?,
            };
            Ok((name, payload))
        })
        .collect()
}

/// Resolve the impacted set from explicit names, or every payload key.
///
/// Names absent from the projects file are kept so the reducer can report them.
pub fn impacted_set(
    projects: &ProjectsFile,
    names: &[String],
    payloads: &PayloadMap,
) -> ImpactedSet {
    let selected: Vec<&String> = if names.is_empty() {
        payloads.keys().collect()
    } else {
        names.iter().collect()
    };
    selected
        .into_iter()
        .map(|name| {
            projects
                .projects
                .iter()
                .find(|p| &p.name == name)
                .cloned()
                .unwrap_or_else(|| Project::new(name.as_str()))
        })
        .collect()
}

async fn connect(config: &CascadeConfig) -> anyhow::Result<Database> {
    Database::connect(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to database")
}

/// Validate a projects file.
pub async fn validate(path: &Path) -> anyhow::Result<()> {
    let file = load_projects(path)?;
    let graph = DagBuilder::new().build(&file.projects)?;
    let order = ParentFirstTraversal::order(&graph)?;

    println!(
        "{} {} projects, {} dependencies",
        style("✓").green(),
        graph.len(),
        graph.edge_count()
    );
    println!("  Roots: {}", graph.roots().join(", "));
    for name in &order {
        let deps = graph.predecessors(name);
        if deps.is_empty() {
            println!("    - {}", name);
        } else {
            println!("    - {} {}", name, style(format!("<- {}", deps.join(", "))).dim());
        }
    }
    Ok(())
}

/// Apply pending migrations.
pub async fn migrate(config: &CascadeConfig) -> anyhow::Result<()> {
    let db = connect(config).await?;
    db.migrate().await?;
    println!("{} Database is up to date", style("✓").green());
    Ok(())
}

/// Materialize a batch and optionally dispatch its roots.
pub async fn plan(config: &CascadeConfig, args: PlanArgs) -> anyhow::Result<()> {
    let projects = load_projects(&args.projects)?;
    let content = std::fs::read_to_string(&args.payloads)
        .with_context(|| format!("reading {}", args.payloads.display()))?;
    let payloads = parse_payloads(&content)?;
    let impacted = impacted_set(&projects, &args.impacted, &payloads);
    let repo: RepoRef = args.repo.parse()?;
    let workflow = args.workflow.as_deref().unwrap_or(&config.workflow);

    let (jobs, dispatcher): (Arc<dyn JobRepository>, Arc<dyn WorkflowDispatcher>) =
        if args.dry_run {
            (Arc::new(InMemoryJobRepository::new()), Arc::new(DryRunDispatcher))
        } else {
            let db = connect(config).await?;
            (
                Arc::new(db.jobs()),
                Arc::new(GithubDispatcher::new(config.github.clone())?),
            )
        };

    let graph = DagBuilder::new().build(&projects.projects)?;
    let materializer = JobMaterializer::new(jobs.clone(), config.scheduler.clone());

    println!(
        "{} Planning {} impacted projects on {}",
        style("▶").cyan(),
        impacted.len(),
        style(&args.branch).dim()
    );
    let batch = materializer
        .materialize(&graph, &impacted, &payloads, &args.branch, &repo)
        .await?;
    print_batch(&batch);

    if args.trigger {
        let coordinator = CompletionCoordinator::new(jobs, dispatcher);
        let report = coordinator
            .dispatch_roots(batch.batch_id, &repo, workflow)
            .await?;
        print_report("Roots", &report);
    }
    Ok(())
}

/// Record a completion reported by the executor.
pub async fn complete(
    config: &CascadeConfig,
    job_id: &str,
    status: CompletionStatus,
    repo: &str,
    workflow: Option<&str>,
) -> anyhow::Result<()> {
    let job_id: JobId = job_id.parse().context("invalid job ID")?;
    let repo: RepoRef = repo.parse()?;
    let status = match status {
        CompletionStatus::Succeeded => JobStatus::Succeeded,
        CompletionStatus::Failed => JobStatus::Failed,
    };

    let db = connect(config).await?;
    let coordinator = CompletionCoordinator::new(
        Arc::new(db.jobs()),
        Arc::new(GithubDispatcher::new(config.github.clone())?),
    );

    let report = coordinator
        .report_completion(
            job_id,
            status,
            &repo,
            workflow.unwrap_or(&config.workflow),
        )
        .await?;

    println!("{} {} marked {}", style("✓").green(), job_id, status);
    match report {
        Some(report) => print_report("Children", &report),
        None if status == JobStatus::Succeeded => {
            println!("{} Status changed concurrently, nothing dispatched", style("!").yellow())
        }
        None => {}
    }
    Ok(())
}

#[derive(Serialize)]
struct JobView<'a> {
    id: String,
    parent_id: Option<String>,
    project: &'a str,
    status: JobStatus,
    branch: &'a str,
    payload: std::borrow::Cow<'a, str>,
}

impl<'a> From<&'a Job> for JobView<'a> {
    fn from(job: &'a Job) -> Self {
        Self {
            id: job.id.to_string(),
            parent_id: job.parent_id.map(|p| p.to_string()),
            project: &job.project,
            status: job.status,
            branch: &job.branch,
            payload: String::from_utf8_lossy(job.payload.as_bytes()),
        }
    }
}

/// List the jobs of a batch.
pub async fn list_jobs(config: &CascadeConfig, batch_id: &str, json: bool) -> anyhow::Result<()> {
    let batch_id: BatchId = batch_id.parse().context("invalid batch ID")?;
    let db = connect(config).await?;
    let jobs = db.jobs().get_by_batch(batch_id).await?;

    if json {
        let views: Vec<JobView<'_>> = jobs.iter().map(JobView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("{} No jobs in batch {}", style("i").blue(), batch_id);
        return Ok(());
    }

    println!("Jobs in {}:", style(batch_id).bold());
    for job in &jobs {
        let parent = job
            .parent_id
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {:<24} {:<10} parent {}",
            job.id,
            job.project,
            status_label(job.status),
            style(parent).dim()
        );
    }
    Ok(())
}

fn status_label(status: JobStatus) -> console::StyledObject<&'static str> {
    match status {
        JobStatus::Created => style(status.as_str()).dim(),
        JobStatus::Triggered => style(status.as_str()).cyan(),
        JobStatus::Succeeded => style(status.as_str()).green(),
        JobStatus::Failed => style(status.as_str()).red(),
    }
}

fn print_batch(batch: &MaterializedBatch) {
    println!(
        "{} Batch {} with {} jobs",
        style("✓").green(),
        style(batch.batch_id).bold(),
        batch.job_count()
    );
    for (project, ids) in &batch.jobs {
        for id in ids {
            println!("    - {} {}", project, style(id).dim());
        }
    }
    for failure in &batch.failures {
        let edge = failure
            .parent_project
            .as_deref()
            .map(|p| format!(" (from {p})"))
            .unwrap_or_default();
        println!(
            "  {} {}{}: {}",
            style("✗").red(),
            failure.project,
            edge,
            failure.reason
        );
    }
}

fn print_report(label: &str, report: &DispatchReport) {
    println!(
        "{} {}: {} triggered, {} skipped, {} waiting, {} failed",
        style("▶").cyan(),
        label,
        report.triggered.len(),
        report.skipped.len(),
        report.waiting.len(),
        report.failed.len()
    );
    for (id, reason) in &report.failed {
        println!("  {} {}: {}", style("✗").red(), id, reason);
    }
}
