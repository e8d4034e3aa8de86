//! Athena command-line entry point.
//!
//! One-shot commands around the orchestrator: ask a question, import an
//! inventory file, inspect hosts and relations, run a single command.

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use athena_config::AppConfig;
use athena_exec::{ActionExecutor, CredentialPrompter, ExecOptions};
use athena_inventory::{
    ExistingRelation, HostFacts, InventoryParser, LlmFallbackOptions, RelationClassifier,
};
use athena_llm::{LlmRouter, OllamaClient};
use athena_memory::{HostInput, InventoryStore, RelationInput, SecondaryStore};
use athena_runtime::{Orchestrator, RequestOptions};
use athena_triage::ErrorAnalyzer;

#[derive(Debug, Parser)]
#[command(name = "athena", version, about = "AI-assisted infrastructure orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask Athena to handle a request ("restart nginx on web-prod-01").
    Ask {
        /// The natural-language request.
        query: Vec<String>,
        /// Pre-grant confirmation for gated commands.
        #[arg(long)]
        confirm: bool,
        /// Classify and plan without executing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Import an inventory file (CSV/JSON/YAML/INI/hosts/ssh_config/TXT).
    Import {
        /// Path of the inventory file.
        path: String,
        /// Source name (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
        /// Explicit format instead of auto-detection.
        #[arg(long)]
        format: Option<String>,
    },
    /// List hosts, optionally filtered by a pattern.
    Hosts {
        pattern: Option<String>,
        #[arg(long)]
        environment: Option<String>,
    },
    /// Suggest (and optionally save) host relations.
    Relations {
        /// Persist the suggestions into the store.
        #[arg(long)]
        save: bool,
    },
    /// Inventory statistics.
    Stats,
    /// Execute a single command on a target.
    Exec {
        target: String,
        command: Vec<String>,
        #[arg(long)]
        confirm: bool,
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
    /// Correct a misclassified request so future triage learns from it.
    Feedback {
        /// The original query text.
        query: Vec<String>,
        /// Correct intent: query, action, or analysis.
        #[arg(long)]
        intent: String,
        /// Correct priority: P0, P1, P2, or P3.
        #[arg(long)]
        priority: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone())),
        )
        .init();

    let cli = Cli::parse();
    let store = athena_memory::init(config.db_path()).await?;

    match cli.command {
        Commands::Ask { query, confirm, dry_run } => {
            let query = query.join(" ");
            if query.trim().is_empty() {
                bail!("empty query");
            }
            ask(&config, store, &query, confirm, dry_run).await
        }
        Commands::Import { path, name, format } => {
            import(&config, store, &path, name.as_deref(), format.as_deref()).await
        }
        Commands::Hosts { pattern, environment } => {
            hosts(store, pattern.as_deref(), environment.as_deref()).await
        }
        Commands::Relations { save } => relations(&config, store, save).await,
        Commands::Stats => stats(store).await,
        Commands::Exec { target, command, confirm, timeout } => {
            exec(store, &target, &command.join(" "), confirm, timeout).await
        }
        Commands::Feedback { query, intent, priority } => {
            feedback(&config, &query.join(" "), &intent, &priority)
        }
    }
}

fn feedback(config: &AppConfig, query: &str, intent: &str, priority: &str) -> Result<()> {
    if query.trim().is_empty() {
        bail!("empty query");
    }
    let intent: athena_triage::Intent = intent.parse().map_err(anyhow::Error::msg)?;
    let priority: athena_triage::Priority = priority.parse().map_err(anyhow::Error::msg)?;

    let secondary = open_secondary(config)
        .ok_or_else(|| anyhow::anyhow!("secondary store unavailable, cannot store feedback"))?;
    let classifier = athena_triage::get_smart_classifier(Some(secondary), "default", false);
    if classifier.provide_feedback(query, intent, priority) {
        println!("Recorded: '{query}' is {intent} / {priority}.");
    } else {
        bail!("failed to record feedback");
    }
    Ok(())
}

fn build_llm(config: &AppConfig) -> LlmRouter {
    let client = OllamaClient::new(&config.llm.base_url, &config.llm.model)
        .with_correction_model(&config.llm.correction_model);
    LlmRouter::new(Arc::new(client), config.llm.timeout_secs)
}

fn open_secondary(config: &AppConfig) -> Option<Arc<SecondaryStore>> {
    match SecondaryStore::open(config.secondary_path()) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!(error = %e, "secondary store unavailable, continuing without it");
            None
        }
    }
}

async fn ask(
    config: &AppConfig,
    store: Arc<InventoryStore>,
    query: &str,
    confirm: bool,
    dry_run: bool,
) -> Result<()> {
    let llm = build_llm(config);
    let secondary = open_secondary(config);
    let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));

    let mut orchestrator =
        Orchestrator::build(config.clone(), llm, store, secondary, executor).await?;

    // ctrl-c cancels between tool calls; a call in flight finishes first.
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let opts = RequestOptions {
        auto_confirm: confirm,
        dry_run,
        system_state: None,
    };
    let response = orchestrator.process_request(query, &opts).await?;
    println!("{response}");
    orchestrator.end_session().await?;
    Ok(())
}

async fn import(
    config: &AppConfig,
    store: Arc<InventoryStore>,
    path: &str,
    name: Option<&str>,
    format: Option<&str>,
) -> Result<()> {
    let options = LlmFallbackOptions {
        enabled: config.inventory.enable_llm_fallback,
        compliance_acknowledged: config.inventory.llm_compliance_acknowledged,
        content_limit: config.inventory.content_limit,
    };
    let llm = (config.inventory.enable_llm_fallback).then(|| build_llm(config));
    let parser = InventoryParser::new(llm, options);

    let result = parser.parse(path, format).await;
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    for error in &result.errors {
        eprintln!("error: {error}");
    }
    if !result.success() {
        bail!("import failed: {} hosts, {} errors", result.hosts.len(), result.errors.len());
    }

    let source_name = name
        .map(ToOwned::to_owned)
        .or_else(|| {
            std::path::Path::new(path)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "import".to_string());
    let source_id = store
        .add_source(&source_name, &result.source_type, result.file_path.as_deref(), "import", None)
        .await?;

    let inputs: Vec<HostInput> = result
        .hosts
        .iter()
        .map(|h| HostInput {
            hostname: h.hostname.clone(),
            ip_address: h.ip_address.clone(),
            aliases: (!h.aliases.is_empty()).then(|| h.aliases.clone()),
            environment: h.environment.clone(),
            groups: (!h.groups.is_empty()).then(|| h.groups.clone()),
            role: h.role.clone(),
            service: h.service.clone(),
            ssh_port: Some(h.ssh_port),
            metadata: (!h.metadata.is_empty()).then(|| h.metadata.clone()),
        })
        .collect();
    let added = store.bulk_add_hosts(&inputs, Some(source_id), "import").await?;
    store.update_source_host_count(source_id, added as i64).await?;

    println!("Imported {added} host(s) from {path} into source '{source_name}'.");
    Ok(())
}

async fn hosts(
    store: Arc<InventoryStore>,
    pattern: Option<&str>,
    environment: Option<&str>,
) -> Result<()> {
    let hosts = store
        .search_hosts(pattern, environment, None, None, None, None)
        .await?;
    if hosts.is_empty() {
        println!("No hosts match.");
        return Ok(());
    }
    for host in hosts {
        println!(
            "{:<30} {:<16} {:<10} {}",
            host.hostname,
            host.ip_address.as_deref().unwrap_or("-"),
            host.environment.as_deref().unwrap_or("-"),
            host.status
        );
    }
    Ok(())
}

async fn relations(config: &AppConfig, store: Arc<InventoryStore>, save: bool) -> Result<()> {
    let hosts = store.get_all_hosts().await?;
    if hosts.len() < 2 {
        println!("Need at least two hosts to suggest relations.");
        return Ok(());
    }

    let facts: Vec<HostFacts> = hosts
        .iter()
        .map(|h| HostFacts {
            hostname: h.hostname.clone(),
            environment: h.environment.clone(),
            groups: h.groups.clone(),
            service: h.service.clone(),
        })
        .collect();
    let existing: Vec<ExistingRelation> = store
        .get_relations(None, None, false)
        .await?
        .into_iter()
        .map(|r| ExistingRelation {
            source_hostname: r.source_hostname,
            target_hostname: r.target_hostname,
            relation_type: r.relation_type,
        })
        .collect();

    let llm = config.relations.use_llm.then(|| build_llm(config));
    let classifier = RelationClassifier::new(llm);
    let suggestions = classifier
        .suggest_relations(
            &facts,
            &existing,
            config.relations.use_llm,
            config.relations.min_confidence,
        )
        .await;

    if suggestions.is_empty() {
        println!("No new relations suggested.");
        return Ok(());
    }
    for suggestion in &suggestions {
        println!(
            "{} -> {} [{}] {:.0}%  ({})",
            suggestion.source_hostname,
            suggestion.target_hostname,
            suggestion.relation_type,
            suggestion.confidence * 100.0,
            suggestion.reason
        );
    }

    if save {
        let inputs: Vec<RelationInput> = suggestions
            .iter()
            .map(|s| RelationInput {
                source_hostname: s.source_hostname.clone(),
                target_hostname: s.target_hostname.clone(),
                relation_type: s.relation_type.clone(),
                confidence: s.confidence,
                validated: false,
                metadata: Some(s.metadata.clone()),
            })
            .collect();
        let report = store.add_relations_batch(&inputs).await?;
        println!("Saved {} relation(s), skipped {}.", report.saved, report.skipped.len());
    }
    Ok(())
}

async fn stats(store: Arc<InventoryStore>) -> Result<()> {
    let stats = store.get_stats().await?;
    println!("Hosts:               {}", stats.total_hosts);
    for (env, count) in &stats.by_environment {
        println!("  {env:<18} {count}");
    }
    println!("Relations:           {}", stats.total_relations);
    println!("  validated          {}", stats.validated_relations);
    println!("Cached scans:        {}", stats.cached_scans);
    for (source, count) in &stats.by_source {
        println!("Source {source:<14} {count}");
    }
    Ok(())
}

/// SSH parameters for a target, resolved from the inventory when known.
async fn resolve_ssh_target(
    store: &InventoryStore,
    target: &str,
) -> Result<athena_exec::SshTarget> {
    let mut ssh = athena_exec::SshTarget::new(target);
    if let Some(host) = store.get_host_by_name(target).await? {
        ssh.host = host.hostname.clone();
        ssh.address = host.ip_address.clone().unwrap_or(host.hostname);
        ssh.port = host.ssh_port;
        if let Some(user) = host.metadata.get("ssh_user").and_then(|v| v.as_str()) {
            ssh.username = user.to_string();
        }
        if let Some(key) = host.metadata.get("ssh_key").and_then(|v| v.as_str()) {
            ssh.key_path = Some(key.into());
        }
    }
    Ok(ssh)
}

async fn exec(
    store: Arc<InventoryStore>,
    target: &str,
    command: &str,
    confirm: bool,
    timeout: u64,
) -> Result<()> {
    if command.trim().is_empty() {
        bail!("empty command");
    }

    let executor = ActionExecutor::new(Arc::new(ErrorAnalyzer::new()));
    let ssh = resolve_ssh_target(&store, target).await?;
    executor.register_target(ssh.clone()).await;

    let opts = ExecOptions {
        confirm,
        timeout_secs: timeout,
        show_spinner: true,
    };
    let mut result = executor.execute(target, command, &opts).await;

    // A credential failure gets one interactive retry with a password.
    if !result.success && executor.needs_credentials(&result) {
        let service = "ssh".to_string();
        let host = target.to_string();
        let credentials = tokio::task::spawn_blocking(move || {
            CredentialPrompter::new().prompt(&service, &host)
        })
        .await??;
        if let Some((username, password)) = credentials {
            let mut retry_target = ssh;
            retry_target.username = username;
            retry_target.password = Some(password);
            retry_target.key_path = None;
            executor.register_target(retry_target).await;
            result = executor.execute(target, command, &opts).await;
        }
    }

    if !result.stdout.is_empty() {
        println!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }
    if let Some(error) = &result.error {
        eprintln!("{error}");
    }
    if let Some(analysis) = &result.error_analysis {
        eprintln!(
            "analysis: {} ({:.0}%) — {}",
            analysis.kind,
            analysis.confidence * 100.0,
            analysis.suggested_action
        );
    }
    std::process::exit(if result.success { 0 } else { 1 });
}
