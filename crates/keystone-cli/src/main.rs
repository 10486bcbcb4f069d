//! Keystone CLI.
//!
//! Evaluates access decisions, entitlements and obligations against a JSON
//! policy document.
//!
//! # Quick Start
//!
//! ```bash
//! # Check that a policy document builds
//! keystone validate --policy policy.json
//!
//! # May the entity in alice.json read a secret document?
//! keystone decide --policy policy.json --entity alice.json --action read \
//!     --resource https://example.com/attr/classification/value/secret
//!
//! # What is alice entitled to?
//! keystone entitlements --policy policy.json --entity alice.json --comprehensive
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use keystone_config::{ConfigLoader, KeystoneConfig};
use tracing_subscriber::EnvFilter;

use crate::commands::Session;

/// Keystone - attribute-based access decisions.
#[derive(Parser)]
#[command(name = "keystone")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON policy document (defaults to [policy].fixture from configuration).
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Build the decision points from a policy document and report errors.
    Validate,

    /// Decide whether an entity may perform an action on resources.
    Decide {
        #[command(flatten)]
        requester: RequesterArgs,

        /// Action name (read, create, update, delete, or custom).
        #[arg(short, long)]
        action: String,

        /// Attribute value FQN; each one is a separate resource.
        #[arg(short, long = "resource", required = true)]
        resources: Vec<String>,

        /// Client id of the enforcing PEP.
        #[arg(long)]
        client_id: Option<String>,

        /// Obligation value FQN the PEP can fulfil (repeatable).
        #[arg(long = "fulfill")]
        fulfill: Vec<String>,
    },

    /// List the actions an entity is entitled to per attribute value.
    Entitlements {
        #[command(flatten)]
        requester: RequesterArgs,

        /// Include values below entitled hierarchy values.
        #[arg(long)]
        comprehensive: bool,
    },

    /// List the obligations an action on resources triggers.
    Obligations {
        /// Action name.
        #[arg(short, long)]
        action: String,

        /// Attribute value FQN; each one is a separate resource.
        #[arg(short, long = "resource", required = true)]
        resources: Vec<String>,

        /// Client id of the enforcing PEP.
        #[arg(long)]
        client_id: Option<String>,

        /// Obligation value FQN the PEP can fulfil (repeatable).
        #[arg(long = "fulfill")]
        fulfill: Vec<String>,
    },
}

/// Who is asking: a claims file or a JWT file.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct RequesterArgs {
    /// JSON claims object, or an array of them for an entity chain.
    #[arg(short, long)]
    entity: Option<PathBuf>,

    /// File holding a JWT whose payload names the requester.
    #[arg(long)]
    token: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    style::set_no_color(cli.no_color);

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    init_logging(&config);

    let session = Session::new(config, cli.policy, cli.json);

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Validate => commands::validate::run(&session),
        Commands::Decide {
            requester,
            action,
            resources,
            client_id,
            fulfill,
        } => commands::decide::run(
            &session,
            &requester.into_requester()?,
            &action,
            &resources,
            client_id,
            fulfill,
        ),
        Commands::Entitlements {
            requester,
            comprehensive,
        } => commands::entitlements::run(&session, &requester.into_requester()?, comprehensive),
        Commands::Obligations {
            action,
            resources,
            client_id,
            fulfill,
        } => commands::obligations::run(&session, &action, &resources, client_id, fulfill),
    }
}

impl RequesterArgs {
    fn into_requester(self) -> Result<commands::Requester> {
        match (self.entity, self.token) {
            (Some(path), _) => Ok(commands::Requester::Claims(path)),
            (None, Some(path)) => Ok(commands::Requester::Token(path)),
            (None, None) => anyhow::bail!("either --entity or --token is required"),
        }
    }
}

/// Logs go to stderr so `--json` output stays parseable. `RUST_LOG` wins over
/// `[logging].level`.
fn init_logging(config: &KeystoneConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
