//! SafeHarbor - Clinical document de-identification and compliance pipeline
//!
//! Removes HIPAA Safe Harbor identifiers from clinical text behind a
//! fail-closed leakage gate, then matches and routes the redacted output.

use anyhow::Result;
use clap::{Parser, Subcommand};
use safeharbor::{
    compliance::default_catalog,
    config::SafeHarborConfig,
    eval,
    phi::{redact, resolve, DetectorSet, NoPopulationData},
    pipeline::{local_collaborators, DocumentType, PipelineRunner, RawDocument, RunStage},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "safeharbor")]
#[command(author = "SafeHarbor Team")]
#[command(version)]
#[command(about = "Clinical document de-identification and compliance pipeline")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SAFEHARBOR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a document through the full pipeline
    Run {
        /// Read the document from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Take the document from the command line
        #[arg(short, long)]
        text: Option<String>,

        /// Declared document type (skips classification)
        #[arg(long)]
        doc_type: Option<DocumentType>,
    },

    /// Redact a document without compliance matching
    Redact {
        /// Read the document from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Take the document from the command line
        #[arg(short, long)]
        text: Option<String>,
    },

    /// List the compliance rule catalog
    Rules,

    /// Score the detector stack against a gold-labeled corpus
    Eval {
        /// Directory holding labels/*.labels.json and documents/*.txt
        #[arg(long)]
        gold_dir: PathBuf,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("safeharbor={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = if let Some(config_path) = cli.config {
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content)?
    } else {
        SafeHarborConfig::default()
    };

    match cli.command {
        Commands::Run {
            file,
            text,
            doc_type,
        } => {
            run_pipeline(config, file, text, doc_type).await?;
        }
        Commands::Redact { file, text } => {
            redact_only(config, file, text).await?;
        }
        Commands::Rules => {
            list_rules();
        }
        Commands::Eval { gold_dir } => {
            run_eval(config, gold_dir).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_pipeline(
    config: SafeHarborConfig,
    file: Option<PathBuf>,
    text: Option<String>,
    doc_type: Option<DocumentType>,
) -> Result<()> {
    let (id, content) = read_document(file, text)?;
    let collaborators = local_collaborators(&config)?;
    let runner = PipelineRunner::new(config, collaborators)?;

    let run = runner.run(RawDocument::new(id, content, doc_type)).await;

    println!("run {}  document {}", run.run_id, run.document_id);
    println!("stage: {}  type: {}", run.stage, run.document_type);
    if let Some(validation) = &run.validation {
        if validation.passed {
            println!("leakage gate: passed");
        } else {
            let types: Vec<&str> = validation.residual_types.iter().map(|t| t.as_str()).collect();
            println!("leakage gate: BLOCKED ({})", types.join(", "));
        }
    }
    if let Some(redacted) = &run.redacted {
        println!("redactions: {}", redacted.ledger.summary());
    }
    if !run.findings.is_empty() {
        println!("findings:");
        for finding in &run.findings {
            println!(
                "  {:<32} {:<12} {}",
                finding.rule_id, finding.status, finding.rationale
            );
        }
    }
    if let Some(route) = &run.route {
        println!(
            "route: {}  risk {:.2}  ({})",
            route.action, route.risk_score, route.rationale
        );
    }
    if let Some(redacted) = &run.redacted {
        println!("--- redacted ---");
        println!("{}", redacted.text);
    }

    if run.stage != RunStage::Routed {
        let reason = run.error.unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!("run ended at {}: {}", run.stage, reason);
    }
    Ok(())
}

async fn redact_only(
    config: SafeHarborConfig,
    file: Option<PathBuf>,
    text: Option<String>,
) -> Result<()> {
    let (id, content) = read_document(file, text)?;
    let detectors = DetectorSet::new(&config.detection, Arc::new(NoPopulationData))?;

    let candidates = detectors.detect_all(&content).await;
    let resolved = resolve(candidates, &config.detection);
    let (document, _mappings) = redact(&id, &content, &resolved, &config.redaction);

    println!("redactions: {}", document.ledger.summary());
    println!("{}", document.text);
    Ok(())
}

fn list_rules() {
    for rule in default_catalog() {
        let scope = if rule.document_types.is_empty() {
            "all documents".to_string()
        } else {
            rule.document_types
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let jurisdiction = rule
            .jurisdiction
            .map(|j| format!("  [{}]", j))
            .unwrap_or_default();
        println!("{:<32} {}{}", rule.id, rule.description, jurisdiction);
        println!("{:<32} applies to: {}", "", scope);
    }
}

async fn run_eval(config: SafeHarborConfig, gold_dir: PathBuf) -> Result<()> {
    let cases = eval::load_gold_dir(&gold_dir)?;
    let detectors = DetectorSet::new(&config.detection, Arc::new(NoPopulationData))?;
    let report = eval::evaluate(&detectors, &config.detection, &cases).await?;
    print!("{}", report.summary());
    Ok(())
}

fn show_config(config: Option<&SafeHarborConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}

fn read_document(file: Option<PathBuf>, text: Option<String>) -> Result<(String, String)> {
    match (file, text) {
        (Some(path), None) => {
            let content = std::fs::read_to_string(&path)?;
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document")
                .to_string();
            Ok((id, content))
        }
        (None, Some(text)) => Ok(("inline".to_string(), text)),
        (Some(_), Some(_)) => anyhow::bail!("provide either --file or --text, not both"),
        (None, None) => anyhow::bail!("provide a document with --file or --text"),
    }
}
