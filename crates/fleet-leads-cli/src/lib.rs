//! Operator command surface over the lead document file.
//!
//! Every command prints one pretty JSON value on stdout. The document is
//! migrated before any command runs, the same way the service does on boot.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fleet_leads_core::{
    audit_limit, dashboard_summary, funnel_analytics, now_utc, recent_audit_events, score_lead,
    sync_crm_queue, Actor, EstimatorSnapshot, Grade, Lead, LeadError, LeadFilter, LeadScore,
    LeadStatus, MockCrm, ScoringRuleset, DEFAULT_SESSION_ID, LEAD_SOURCE_WEBSITE,
};
use fleet_leads_store_json::JsonDocumentStore;
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "fl")]
#[command(about = "Fleet leads operator CLI")]
pub struct Cli {
    #[arg(long, default_value = "./data/db.json")]
    data_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upgrade the document in place and report what changed.
    Migrate,
    Lead {
        #[command(subcommand)]
        command: LeadCommand,
    },
    Dashboard(FilterArgs),
    Funnel(FilterArgs),
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
    Crm {
        #[command(subcommand)]
        command: CrmCommand,
    },
    Score {
        #[command(subcommand)]
        command: ScoreCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum LeadCommand {
    Show {
        lead_id: String,
    },
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    grade: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum AuditCommand {
    List {
        #[arg(long)]
        limit: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum CrmCommand {
    /// Push pending queue items through the mock outbound.
    Sync {
        #[arg(long, default_value = "cli")]
        operator: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ScoreCommand {
    /// Score a hypothetical lead without storing anything.
    Preview(ScorePreviewArgs),
}

#[derive(Debug, Args)]
pub struct ScorePreviewArgs {
    #[arg(long, default_value = "")]
    priority: String,
    #[arg(long, default_value = "")]
    fleet_size: String,
    #[arg(long, default_value = "")]
    message: String,
    #[arg(long)]
    annual_burden: Option<f64>,
}

/// # Errors
/// Returns an error when the document cannot be opened or migrated, or the
/// command itself fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let store = JsonDocumentStore::open(&cli.data_file)?;
    let output = execute(cli.command, &store)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Runs one command against an open store and returns its JSON output.
///
/// # Errors
/// Returns an error when a store operation fails or a lead is unknown.
pub fn execute(command: Command, store: &JsonDocumentStore) -> Result<Value> {
    let report = store
        .migrate()
        .with_context(|| format!("failed to migrate {}", store.path().display()))?;
    match command {
        Command::Migrate => Ok(serde_json::to_value(report)?),
        Command::Lead {
            command: LeadCommand::Show { lead_id },
        } => {
            let document = store.load()?;
            let lead = document
                .find_lead(&lead_id)
                .ok_or_else(LeadError::lead_not_found)?;
            Ok(json!({ "lead": lead }))
        }
        Command::Dashboard(filter) => {
            let document = store.load()?;
            Ok(serde_json::to_value(dashboard_summary(
                &document,
                &filter.lead_filter(),
            ))?)
        }
        Command::Funnel(filter) => {
            let document = store.load()?;
            Ok(serde_json::to_value(funnel_analytics(
                &document,
                &filter.lead_filter(),
            ))?)
        }
        Command::Audit {
            command: AuditCommand::List { limit },
        } => {
            let document = store.load()?;
            let events = recent_audit_events(&document, audit_limit(limit.as_deref()));
            Ok(json!({ "events": events }))
        }
        Command::Crm {
            command: CrmCommand::Sync { operator },
        } => {
            let actor = Actor::system(operator);
            let synced = store.update(|document| {
                Ok(sync_crm_queue(document, &MockCrm, &actor, now_utc())?)
            })?;
            Ok(json!({ "synced": synced }))
        }
        Command::Score {
            command: ScoreCommand::Preview(args),
        } => Ok(serde_json::to_value(args.preview())?),
    }
}

impl FilterArgs {
    fn lead_filter(&self) -> LeadFilter {
        LeadFilter::from_query(self.status.as_deref(), self.grade.as_deref())
    }
}

impl ScorePreviewArgs {
    fn preview(&self) -> LeadScore {
        let now = now_utc();
        let lead = Lead {
            id: "preview".to_string(),
            name: String::new(),
            email: String::new(),
            fleet_size: self.fleet_size.clone(),
            priority: self.priority.clone(),
            message: self.message.clone(),
            session_id: DEFAULT_SESSION_ID.to_string(),
            source: LEAD_SOURCE_WEBSITE.to_string(),
            status: LeadStatus::New,
            score: 0,
            grade: Grade::C,
            score_reasons: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let snapshot = self.annual_burden.map(|annual_burden| EstimatorSnapshot {
            id: "preview".to_string(),
            session_id: DEFAULT_SESSION_ID.to_string(),
            total_units: 0.0,
            idle_share_percent: 0.0,
            monthly_carrying_cost: 0.0,
            annual_burden,
            created_at: now,
        });
        score_lead(&lead, snapshot.as_ref(), &ScoringRuleset::v1())
    }
}
