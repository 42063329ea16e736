//! CLI command definitions.

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Check a project dependency file
    Validate {
        /// Path to the projects file
        #[arg(default_value = "projects.yaml")]
        path: PathBuf,
    },

    /// Apply database migrations
    Migrate,

    /// Materialize a batch of jobs for the impacted projects
    Plan(PlanArgs),

    /// Record a job's result and trigger its children on success
    Complete {
        /// Job ID
        job_id: String,

        /// Reported status
        #[arg(short, long, value_enum)]
        status: CompletionStatus,

        /// Repository in owner/name form
        #[arg(short, long)]
        repo: String,

        /// Workflow to start for the children (defaults to the configured one)
        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// List the jobs of a batch
    Jobs {
        /// Batch ID
        batch_id: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Path to the projects file
    #[arg(short, long, default_value = "projects.yaml")]
    pub projects: PathBuf,

    /// JSON object mapping each impacted project to its job payload
    #[arg(long)]
    pub payloads: PathBuf,

    /// Impacted projects (defaults to every project in the payloads file)
    #[arg(short, long, value_delimiter = ',')]
    pub impacted: Vec<String>,

    /// Branch the jobs run on
    #[arg(short, long, default_value = "main")]
    pub branch: String,

    /// Repository in owner/name form
    #[arg(short, long)]
    pub repo: String,

    /// Dispatch the batch roots right away
    #[arg(long)]
    pub trigger: bool,

    /// Workflow to start (defaults to the configured one)
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Materialize in memory and log dispatches instead of sending them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CompletionStatus {
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
