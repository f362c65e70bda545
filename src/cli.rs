use clap::{Parser, Subcommand};

/// deploygate — approval gating service for CI/CD deployments
#[derive(Parser)]
#[command(name = "deploygate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the approval gating server
    Serve {
        /// Port to bind; falls back to DEPLOYGATE_PORT when omitted
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage approval requests
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// Create a new approval request
    Create {
        #[arg(long)]
        project: String,
        #[arg(long)]
        env: String,
        #[arg(long)]
        build: String,
        #[arg(long)]
        job: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        timeout_seconds: Option<i64>,
        /// Explicit request id; derived from job/build/env when omitted
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Approve a pending request
    Approve {
        request_id: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Reject a pending request
    Reject {
        request_id: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Show a single request
    Show { request_id: String },
    /// List requests, newest first
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        env: Option<String>,
        /// pending | approved | rejected | timeout
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a request's audit history
    History { request_id: String },
    /// Status counts across all requests
    Stats,
}
