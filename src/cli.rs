use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "overseer", about = "Agent orchestration with human-in-the-loop approvals")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestration service
    Serve {
        #[arg(long, default_value_t = 8088)]
        port: u16,
    },

    /// Manage approval requests
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Inspect tracked agent sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List pending approval requests
    List,
    /// Approve a pending request
    Approve {
        request_id: String,
        /// Operator identity recorded on the approval
        #[arg(long = "by")]
        approved_by: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a pending request
    Reject {
        request_id: String,
        #[arg(long = "by")]
        approved_by: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Cancel a pending request without waiting for its deadline
    Cancel {
        request_id: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List tracked sessions
    List,
}
