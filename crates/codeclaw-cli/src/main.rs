mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use codeclaw_core::{config::Paths, ipc::IpcRequest, ConfirmRequest};

use commands::{
    config::{ConfigList, ConfigureArgs},
    diff::DiffOptions,
    helpers::Workspace,
    projects::ProjectsArgs,
};

#[derive(Parser)]
#[command(name = "codeclaw")]
#[command(about = "Privacy-safe export of AI coding-session transcripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize codeclaw (first-time setup)
    Init,
    /// Set upload credentials and the sources to export
    Configure {
        /// Dataset host URL, or file:///path for a local dataset checkout
        #[arg(long)]
        endpoint: Option<String>,
        /// Dataset repository, e.g. "jane/coding-sessions"
        #[arg(long)]
        repo: Option<String>,
        /// API key for the dataset host
        #[arg(long)]
        api_key: Option<String>,
        /// Source to export (claude, canonical); repeatable, replaces the saved scope
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Redact, classify and snapshot every session in scope
    Export {
        /// Override the configured sources for this run
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// Preview what redaction would change, without writing an export
    Diff {
        /// Override the configured sources for this run
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Stop after this many sessions
        #[arg(long)]
        limit: Option<usize>,
        /// Include projects outside the connected selection
        #[arg(long)]
        all_projects: bool,
    },
    /// List projects, or choose which ones are exported
    Projects {
        /// Override the configured sources for this run
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Comma-separated projects to connect
        #[arg(long)]
        connect: Option<String>,
        /// Comma-separated projects to disconnect
        #[arg(long)]
        disconnect: Option<String>,
        /// Clear the selection and export every project
        #[arg(long, visible_alias = "clear")]
        all: bool,
    },
    /// Search the current export for your full name
    ScanName {
        /// Full name to search for
        name: String,
    },
    /// Confirm the reviewed export
    Confirm {
        /// Fingerprint of the reviewed export (defaults to the current one)
        #[arg(long, default_value = "")]
        fingerprint: String,
        /// How the full-name question was asked and the scan outcome
        #[arg(long)]
        full_name: String,
        /// Which company, client or internal names were asked about and the outcome
        #[arg(long)]
        sensitive: String,
        /// The manual scan that was done, with the number of sessions read
        #[arg(long)]
        manual_scan: String,
        /// The reviewer declined the full-name scan
        #[arg(long)]
        skip_full_name_scan: bool,
    },
    /// Publish the confirmed export
    Publish {
        /// Statement that publishing was explicitly approved
        #[arg(long)]
        attestation: String,
        /// Fingerprint to publish (defaults to the confirmed one)
        #[arg(long)]
        fingerprint: Option<String>,
    },
    /// Show the publish gate, latest export and recent pushes
    Status,
    /// Review quarantined sessions
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },
    /// Show files and sessions that were rejected
    Rejects {
        /// Number of most recent entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Background sync daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// List settings, credentials and export scope
    List,
    /// Set a setting (push_threshold, backoff_tiers, auto_push, ...)
    Set { key: String, value: String },
    /// Exclude projects from every export
    Exclude {
        #[arg(required = true)]
        projects: Vec<String>,
    },
    /// Always redact these strings
    Redact {
        #[arg(required = true)]
        strings: Vec<String>,
    },
    /// Always hash these usernames
    Username {
        #[arg(required = true)]
        usernames: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum QuarantineAction {
    /// List quarantined sessions
    List,
    /// Print one quarantined record
    Show { session_id: String },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    /// Start the background daemon
    Start,
    /// Stop the background daemon
    Stop,
    /// Show queue and retry state
    Status,
    /// Stop scanning and pushing; the queue is kept
    Pause,
    /// Resume after a pause
    Resume,
    /// Rescan now and push whatever is pending
    Sync,
}

fn handle_config(ws: &Workspace, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::List => commands::config::handle_config_list(ws),
        ConfigAction::Set { key, value } => commands::config::handle_config_set(ws, &key, &value),
        ConfigAction::Exclude { projects } => {
            commands::config::handle_config_append(ws, ConfigList::ExcludedProjects, &projects)
        }
        ConfigAction::Redact { strings } => {
            commands::config::handle_config_append(ws, ConfigList::RedactStrings, &strings)
        }
        ConfigAction::Username { usernames } => {
            commands::config::handle_config_append(ws, ConfigList::RedactUsernames, &usernames)
        }
    }
}

async fn handle_daemon(paths: &Paths, action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start => commands::daemon::start_daemon(paths),
        DaemonAction::Stop => commands::daemon::stop_daemon(paths).await,
        DaemonAction::Status => commands::daemon::show_status(paths).await,
        DaemonAction::Pause => commands::daemon::send_control(paths, IpcRequest::Pause).await,
        DaemonAction::Resume => commands::daemon::send_control(paths, IpcRequest::Resume).await,
        DaemonAction::Sync => commands::daemon::send_control(paths, IpcRequest::ForceSync).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::DaemonInternalStart) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let ws = Workspace::at(Paths::from_data_dir()?)?;
    run_command(&ws, cli.command).await
}

async fn run_command(ws: &Workspace, command: Commands) -> Result<()> {
    match command {
        Commands::Init => commands::init::init_command(ws),
        Commands::Configure {
            endpoint,
            repo,
            api_key,
            sources,
        } => commands::config::handle_configure(
            ws,
            &ConfigureArgs {
                endpoint,
                repo,
                api_key,
                sources,
            },
        ),
        Commands::Config { action } => handle_config(ws, action),
        Commands::Export { sources } => commands::export::handle_export(ws, &sources).await,
        Commands::Diff {
            sources,
            limit,
            all_projects,
        } => {
            let options = DiffOptions {
                sources,
                limit,
                all_projects,
            };
            commands::diff::handle_diff(ws, &options).await
        }
        Commands::Projects {
            sources,
            connect,
            disconnect,
            all,
        } => {
            let args = ProjectsArgs {
                sources,
                connect,
                disconnect,
                all,
            };
            commands::projects::handle_projects(ws, &args).await
        }
        Commands::ScanName { name } => commands::review::handle_scan_name(ws, &name),
        Commands::Confirm {
            fingerprint,
            full_name,
            sensitive,
            manual_scan,
            skip_full_name_scan,
        } => commands::review::handle_confirm(
            ws,
            ConfirmRequest {
                fingerprint,
                full_name_attestation: full_name,
                sensitive_attestation: sensitive,
                manual_scan_attestation: manual_scan,
                skip_full_name_scan,
                pii_findings: 0,
            },
        ),
        Commands::Publish {
            attestation,
            fingerprint,
        } => commands::review::handle_publish(ws, fingerprint, attestation).await,
        Commands::Status => commands::review::handle_status(ws),
        Commands::Quarantine { action } => match action {
            QuarantineAction::List => commands::quarantine::handle_quarantine_list(ws),
            QuarantineAction::Show { session_id } => {
                commands::quarantine::handle_quarantine_show(ws, &session_id)
            }
        },
        Commands::Rejects { limit } => commands::quarantine::handle_rejects(ws, limit),
        Commands::Daemon { action } => handle_daemon(&ws.paths, action).await,
        Commands::DaemonInternalStart => commands::daemon::run_daemon_process(&ws.paths).await,
    }
}
