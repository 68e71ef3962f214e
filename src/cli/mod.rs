//! Command-line interface for scenarist.
//!
//! Provides commands for validating playbooks, rehearsing suites end to
//! end, inspecting the audit log and showing configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use uuid::Uuid;

use crate::config;
use crate::core::{validate_playbook, AuditSink, ChainStatus, JsonlAuditLog, Orchestrator, PlaybookDefinition};
use crate::domain::NarrativeVerbosity;

pub mod simulate;

/// scenarist - Playbook, scenario and suite orchestration
#[derive(Parser, Debug)]
#[command(name = "scenarist")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a playbook file
    Validate {
        /// Playbook YAML file
        playbook: PathBuf,
    },

    /// Rehearse a bundle (playbooks, scenarios, suite) end to end
    Simulate {
        /// Bundle YAML file
        bundle: PathBuf,

        /// Approve every approval gate as it is reached
        #[arg(long)]
        auto_approve: bool,

        /// Regenerate the narrative at this verbosity
        #[arg(short, long, value_enum)]
        verbosity: Option<Verbosity>,
    },

    /// Show audit events for a playbook, scenario, run, suite or suite run
    Audit {
        /// Subject ID (UUID)
        subject_id: String,

        /// Verify the digest chain of the whole log
        #[arg(long)]
        verify: bool,
    },

    /// Validate every playbook file matching a glob
    Import {
        /// Glob pattern, e.g. "playbooks/**/*.yaml"
        pattern: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Narrative verbosity for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Verbosity {
    Summary,
    Detailed,
    Executive,
}

impl From<Verbosity> for NarrativeVerbosity {
    fn from(v: Verbosity) -> Self {
        match v {
            Verbosity::Summary => NarrativeVerbosity::Summary,
            Verbosity::Detailed => NarrativeVerbosity::Detailed,
            Verbosity::Executive => NarrativeVerbosity::Executive,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Validate { playbook } => validate_file(&playbook),
            Commands::Simulate {
                bundle,
                auto_approve,
                verbosity,
            } => simulate_bundle(&bundle, auto_approve, verbosity).await,
            Commands::Audit { subject_id, verify } => show_audit(&subject_id, verify).await,
            Commands::Import { pattern } => import_playbooks(&pattern),
            Commands::Config => show_config(),
        }
    }
}

/// Load and validate one playbook file
fn check_playbook(path: &Path) -> Result<PlaybookDefinition> {
    let playbook = PlaybookDefinition::from_file(path)?;
    validate_playbook(&playbook)
        .with_context(|| format!("Invalid playbook: {}", path.display()))?;
    info!(playbook = %playbook.name, steps = playbook.steps.len(), "Playbook validated");
    Ok(playbook)
}

fn validate_file(path: &Path) -> Result<()> {
    let playbook = check_playbook(path)?;

    println!("Playbook '{}' (version {}) is valid", playbook.name, playbook.version);
    for step in &playbook.steps {
        let gate = if step.requires_approval { " [approval]" } else { "" };
        let next = step.next_step_key.as_deref().unwrap_or("-");
        println!(
            "  {:>2}. {:<20} {:<16} -> {}{}",
            step.position,
            step.key,
            step.config.type_tag(),
            next,
            gate
        );
    }
    Ok(())
}

async fn simulate_bundle(path: &Path, auto_approve: bool, verbosity: Option<Verbosity>) -> Result<()> {
    let cfg = config::config()?;
    let bundle = simulate::Bundle::from_file(path)?;
    let orchestrator = Orchestrator::from_config(cfg).await?;

    let suite_run = simulate::run_bundle(
        &orchestrator,
        bundle,
        &cfg.org_id,
        auto_approve,
        verbosity.map(Into::into),
    )
    .await?;

    simulate::print_suite_run(&suite_run);
    eprintln!("\n[Audit trail: scenarist audit {}]", suite_run.id);
    Ok(())
}

async fn show_audit(subject_id: &str, verify: bool) -> Result<()> {
    let subject_id = Uuid::parse_str(subject_id)
        .with_context(|| format!("Invalid subject ID: {}", subject_id))?;

    let log = JsonlAuditLog::open_default().await?;
    let events = log.list_for(subject_id).await?;

    if events.is_empty() {
        println!("No audit events for {}", subject_id);
    }
    for event in &events {
        println!(
            "{}  {:<20} {:<12} {:<16} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            serde_json::to_value(event.action)?.as_str().unwrap_or("?"),
            event.subject.kind,
            event.actor,
            event.summary
        );
    }

    if verify {
        match log.verify().await? {
            ChainStatus::Intact { events } => {
                println!("\nAudit chain intact ({} events)", events);
            }
            ChainStatus::Broken { index, event_id } => {
                eprintln!("\nAudit chain BROKEN at line {} (event {})", index + 1, event_id);
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn import_playbooks(pattern: &str) -> Result<()> {
    let paths = glob::glob(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))?;

    let mut valid = 0;
    let mut invalid = 0;
    for entry in paths {
        let path = entry.context("Failed to read glob entry")?;
        match check_playbook(&path) {
            Ok(playbook) => {
                valid += 1;
                println!("OK    {}  ({}, {} steps)", path.display(), playbook.name, playbook.steps.len());
            }
            Err(e) => {
                invalid += 1;
                println!("ERROR {}  {:#}", path.display(), e);
            }
        }
    }

    println!("\n{} valid, {} invalid", valid, invalid);
    if invalid > 0 {
        anyhow::bail!("{} playbook(s) failed validation", invalid);
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("scenarist configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Home:        {}", cfg.home.display());
    println!("Audit log:   {}", cfg.audit_log_path().display());
    println!("Org:         {}", cfg.org_id);
    println!();
    println!("Runs:");
    println!("  Concurrent runs per scenario: {}", cfg.allow_concurrent_runs);
    println!("  Step timeout:   {}s", cfg.limits.step_timeout_seconds);
    println!("  Max steps:      {}", cfg.limits.max_steps_per_run);
    println!("  Max payload:    {} bytes", cfg.limits.max_payload_bytes);
    println!();
    println!("Collaborators:");
    println!("  Executor:    {}", serde_yaml::to_string(&cfg.executor)?.trim().replace('\n', ", "));
    println!("  Synthesizer: {}", serde_yaml::to_string(&cfg.synthesis)?.trim().replace('\n', ", "));
    println!(
        "  Executor token: {}",
        if cfg.executor_token.is_some() { "(set)" } else { "(unset)" }
    );

    Ok(())
}
