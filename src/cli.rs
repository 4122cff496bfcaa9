use clap::{Parser, Subcommand};

/// qadesk: approval service for changes to past days
#[derive(Parser)]
#[command(name = "qadesk", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to QADESK_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep everything in process memory instead of Postgres
        #[arg(long)]
        memory: bool,
    },

    /// Run database migrations and exit
    Migrate,

    /// Review and decide change requests
    Requests {
        #[command(subcommand)]
        command: RequestCommands,
    },
}

#[derive(Subcommand)]
pub enum RequestCommands {
    /// List pending change requests
    List {
        #[arg(short, long)]
        user_id: Option<i64>,
        #[arg(long, env = "QADESK_ADMIN_ID")]
        admin_id: Option<i64>,
    },
    /// Show a request with current and proposed values
    Show {
        request_id: String,
        #[arg(long, env = "QADESK_ADMIN_ID")]
        admin_id: Option<i64>,
    },
    /// Approve one or more pending requests
    Approve {
        #[arg(required = true)]
        request_ids: Vec<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long, env = "QADESK_ADMIN_ID")]
        admin_id: Option<i64>,
    },
    /// Reject one or more pending requests
    Reject {
        #[arg(required = true)]
        request_ids: Vec<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long, env = "QADESK_ADMIN_ID")]
        admin_id: Option<i64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bulk_approve() {
        let cli = Cli::try_parse_from([
            "qadesk", "requests", "approve", "a", "b", "--note", "ok", "--admin-id", "1",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Requests {
                command:
                    RequestCommands::Approve {
                        request_ids,
                        note,
                        admin_id,
                    },
            }) => {
                assert_eq!(request_ids, vec!["a", "b"]);
                assert_eq!(note.as_deref(), Some("ok"));
                assert_eq!(admin_id, Some(1));
            }
            _ => panic!("expected requests approve"),
        }
    }
}
