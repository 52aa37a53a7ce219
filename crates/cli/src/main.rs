use anyhow::Result;
use clap::{Parser, Subcommand};
use crashvault::commands::*;
use tracing_subscriber::EnvFilter;

/// Crash collection, deduplication and reporting CLI.
///
/// This CLI is a thin wrapper around `crashvault-core` (exposed in code as
/// `crashvault_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "crashvault",
    version,
    about = "Collect, deduplicate and report crashes",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show where the store keeps its state.
    Status {
        /// Store root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,
    },

    /// Initialize a crash store at the given root.
    ///
    /// This will:
    /// - Create the plugin conf dir, dump location and debuginfo cache.
    /// - Write a default `crashvault.conf` policy and plugin settings.
    /// - Create the deduplication ledger.
    Init {
        #[arg(long, default_value = ".")]
        root: String,
    },

    /// Analyze a dump directory and record it in the ledger.
    Ingest {
        #[arg(long, default_value = ".")]
        root: String,

        /// Dump directory to ingest.
        #[arg(long)]
        dir: String,

        /// Attribute the executable to this `name-version-release` instead of asking rpm.
        #[arg(long)]
        package: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List stored crashes visible to a user.
    List {
        #[arg(long, default_value = ".")]
        root: String,

        /// Caller uid; 0 lists every crash.
        #[arg(long)]
        uid: u32,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Build a report for a crash and send it to every configured reporter.
    Report {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        uuid: String,

        #[arg(long)]
        uid: u32,

        /// Regenerate the backtrace even if one exists.
        #[arg(long, default_value_t = false)]
        force: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Delete a crash's ledger row and its dump directory.
    Delete {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        uuid: String,

        #[arg(long)]
        uid: u32,
    },

    /// Show elements of a problem directory.
    Info {
        #[arg(long, default_value = ".")]
        root: String,

        /// Problem id (dump directory path or name).
        #[arg(long)]
        dir: String,

        #[arg(long)]
        uid: u32,

        /// Element to show; repeat for several. Shows everything when omitted.
        #[arg(long = "element")]
        elements: Vec<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Create a problem directory from `name=value` fields.
    NewProblem {
        #[arg(long, default_value = ".")]
        root: String,

        /// `name=value`; repeat for several. `analyzer` is required.
        #[arg(long = "field")]
        fields: Vec<String>,

        #[arg(long)]
        uid: u32,
    },

    /// Set one element (`name=value`) of a problem directory.
    SetElement {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        dir: String,

        #[arg(long)]
        uid: u32,

        #[arg(long)]
        field: String,
    },

    /// Delete one element of a problem directory.
    DeleteElement {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        dir: String,

        #[arg(long)]
        uid: u32,

        #[arg(long)]
        name: String,
    },

    /// Rate a backtrace file on the 0-4 scale.
    Rate {
        #[arg(long)]
        file: String,
    },

    /// Trim a debuginfo cache directory below a size cap.
    TrimCache {
        #[arg(long)]
        dir: String,

        #[arg(long)]
        max_mb: u64,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List the plugin catalog.
    Plugins {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the effective policy.
    Policy {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Default to the Status command if none is provided.
    match cli.command.unwrap_or(Command::Status { root: ".".to_string() }) {
        Command::Status { root } => status_command(&root)?,
        Command::Init { root } => init_command(&root)?,
        Command::Ingest { root, dir, package, json } => {
            ingest_command(&root, &dir, package.as_deref(), json)?
        }
        Command::List { root, uid, json } => list_command(&root, uid, json)?,
        Command::Report { root, uuid, uid, force, json } => {
            report_command(&root, &uuid, uid, force, json)?
        }
        Command::Delete { root, uuid, uid } => delete_command(&root, &uuid, uid)?,
        Command::Info { root, dir, uid, elements, json } => {
            info_command(&root, &dir, uid, &elements, json)?
        }
        Command::NewProblem { root, fields, uid } => new_problem_command(&root, &fields, uid)?,
        Command::SetElement { root, dir, uid, field } => {
            set_element_command(&root, &dir, uid, &field)?
        }
        Command::DeleteElement { root, dir, uid, name } => {
            delete_element_command(&root, &dir, uid, &name)?
        }
        Command::Rate { file } => rate_command(&file)?,
        Command::TrimCache { dir, max_mb, json } => trim_cache_command(&dir, max_mb, json)?,
        Command::Plugins { root, json } => plugins_command(&root, json)?,
        Command::Policy { root, json } => policy_command(&root, json)?,
    }

    Ok(())
}
