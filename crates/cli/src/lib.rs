pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use signoff_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use signoff_core::domain::approval::Decision;
use signoff_core::domain::subject::PolicyKey;

use crate::commands::IdentityInput;

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff approval workflow CLI",
    long_about = "Resolve approval chains, route subjects through them, and record approver decisions.",
    after_help = "Examples:\n  signoff doctor --json\n  signoff resolve cash-request --person \"Ada Obi\"\n  signoff decide CR-DEMO-001 --approver chioma.nwosu@signoff.example --decision approve"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Config file to load; must exist when given")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, help = "Org chart TOML to use instead of the bundled sample")]
    directory: Option<PathBuf>,
    #[arg(long, global = true, help = "Do not send approver or initiator notifications")]
    no_notify: bool,
}

impl GlobalArgs {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                directory_path: self.directory.clone(),
                notifications_enabled: self.no_notify.then_some(false),
            },
        }
    }
}

#[derive(Debug, Args)]
struct IdentityArgs {
    #[arg(long, help = "Start from this person's supervisor (name or email)")]
    person: Option<String>,
    #[arg(long, help = "Department of the starting person, or the invoice department")]
    department: Option<String>,
    #[arg(long, help = "Invoice category used to pick a category-specific route")]
    category: Option<String>,
    #[arg(long, help = "Supplier type for onboarding routes")]
    supplier_type: Option<String>,
}

impl From<IdentityArgs> for IdentityInput {
    fn from(args: IdentityArgs) -> Self {
        Self {
            person: args.person,
            department: args.department,
            category: args.category,
            supplier_type: args.supplier_type,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, org directory, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load the demo subjects for the bundled org chart")]
    Seed {
        #[arg(long, help = "Remove the demo subjects instead of loading them")]
        clean: bool,
    },
    #[command(about = "Print the approval chain a policy would build")]
    Resolve {
        #[arg(value_parser = parse_policy_key)]
        policy: PolicyKey,
        #[command(flatten)]
        identity: IdentityArgs,
    },
    #[command(about = "Create a subject awaiting assignment")]
    Create {
        #[arg(value_parser = parse_policy_key)]
        policy: PolicyKey,
        #[arg(long)]
        title: String,
        #[arg(long)]
        initiator: String,
        #[arg(long, help = "Subject id; generated from the policy prefix when omitted")]
        id: Option<String>,
    },
    #[command(about = "Resolve and attach an approval chain to a subject")]
    Assign {
        subject_id: String,
        #[command(flatten)]
        identity: IdentityArgs,
    },
    #[command(about = "Record an approver's decision on the active level")]
    Decide {
        subject_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        decision: Decision,
        #[arg(long)]
        comments: Option<String>,
    },
    #[command(about = "Apply one approver's decision to several subjects")]
    DecideMany {
        #[arg(required = true)]
        subject_ids: Vec<String>,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        decision: Decision,
        #[arg(long)]
        comments: Option<String>,
    },
    #[command(about = "List subjects waiting on an approver")]
    Pending {
        #[arg(long)]
        approver: String,
    },
    #[command(about = "Show a subject's chain, progress, and decision history")]
    Status {
        subject_id: String,
        #[arg(long, help = "Include the persisted audit trail")]
        audit: bool,
    },
    #[command(about = "List every subject")]
    List,
    #[command(about = "Start a new approval cycle for a finished subject")]
    Resubmit {
        subject_id: String,
        #[command(flatten)]
        identity: IdentityArgs,
    },
    #[command(about = "Send any notification a subject still owes")]
    Notify { subject_id: String },
}

fn parse_policy_key(value: &str) -> Result<PolicyKey, String> {
    PolicyKey::parse(value).ok_or_else(|| {
        let known: Vec<&str> = PolicyKey::ALL.iter().map(PolicyKey::as_str).collect();
        format!("unknown policy `{value}` (expected one of {})", known.join(", "))
    })
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.global.load_options();

    // Config errors surface through the command result itself.
    if let Ok(config) = AppConfig::load(options.clone()) {
        if let Err(error) = init_logging(&config) {
            eprintln!("logging disabled: {error}");
        }
    }

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(&options, json) }
        }
        Command::Migrate => commands::migrate::run(&options),
        Command::Seed { clean } => commands::seed::run(&options, clean),
        Command::Resolve { policy, identity } => {
            commands::resolve::run(&options, policy, &IdentityInput::from(identity))
        }
        Command::Create { policy, title, initiator, id } => {
            commands::subjects::create(&options, policy, &title, &initiator, id)
        }
        Command::Assign { subject_id, identity } => {
            commands::workflow::assign(&options, &subject_id, &IdentityInput::from(identity))
        }
        Command::Decide { subject_id, approver, decision, comments } => {
            commands::workflow::decide(&options, &subject_id, &approver, decision, comments)
        }
        Command::DecideMany { subject_ids, approver, decision, comments } => {
            commands::workflow::decide_many(&options, &subject_ids, &approver, decision, comments)
        }
        Command::Pending { approver } => commands::subjects::pending(&options, &approver),
        Command::Status { subject_id, audit } => {
            commands::subjects::status(&options, &subject_id, audit)
        }
        Command::List => commands::subjects::list(&options),
        Command::Resubmit { subject_id, identity } => {
            commands::workflow::resubmit(&options, &subject_id, &IdentityInput::from(identity))
        }
        Command::Notify { subject_id } => commands::workflow::notify(&options, &subject_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout carries only the command payload.
fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    use signoff_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!(error))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use signoff_core::domain::approval::Decision;
    use signoff_core::domain::subject::PolicyKey;

    use super::{Cli, Command};

    #[test]
    fn global_flags_build_load_options() {
        let cli = Cli::try_parse_from([
            "signoff",
            "--database-url",
            "sqlite::memory:",
            "--no-notify",
            "list",
        ])
        .expect("parse");

        let options = cli.global.load_options();
        assert!(!options.require_file);
        assert_eq!(options.overrides.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(options.overrides.notifications_enabled, Some(false));
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn decide_parses_decision_and_policy_aliases() {
        let cli = Cli::try_parse_from([
            "signoff",
            "decide",
            "CR-1",
            "--approver",
            "sam.eze@signoff.example",
            "--decision",
            "approve",
        ])
        .expect("parse");
        match cli.command {
            Command::Decide { decision, .. } => assert_eq!(decision, Decision::Approved),
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["signoff", "resolve", "supplier-invoice", "--department", "Technical"])
            .expect("parse");
        match cli.command {
            Command::Resolve { policy, .. } => assert_eq!(policy, PolicyKey::SupplierInvoice),
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Cli::try_parse_from(["signoff", "resolve", "petty-cash"]).is_err());
    }
}
