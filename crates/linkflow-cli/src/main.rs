use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use linkflow_core::backend::{BackendClient, BalanceReport};
use linkflow_core::config::{
    ConfigLocator, FlowConfig, TokenEndpoint, DEFAULT_BASE_URL, DEFAULT_PROFILE,
};
use linkflow_core::flow::{FlowOutcome, LinkFlowController, LoggingPage, ReplaySdk};
use linkflow_core::model::{InstitutionId, InstitutionStatus, ItemId};
use linkflow_core::storage::{FileTokenStore, StoreError};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive account-linking flows from the terminal")]
struct Cli {
    #[command(flatten)]
    backend: BackendArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// Base URL of the linking backend
    #[arg(long, env = "LINKFLOW_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,
    /// Cookie header identifying the signed-in user
    #[arg(long, env = "LINKFLOW_SESSION_COOKIE", global = true, hide_env_values = true)]
    session_cookie: Option<String>,
    /// Profile name for stored tokens
    #[arg(long, env = "LINKFLOW_PROFILE", default_value = DEFAULT_PROFILE, global = true)]
    profile: String,
    /// Session token route: "testing" or "create"
    #[arg(long, default_value_t = TokenEndpoint::Testing, global = true)]
    token_endpoint: TokenEndpoint,
    /// Override the directory holding stored tokens
    #[arg(long, env = "LINKFLOW_STORAGE_DIR", global = true)]
    storage_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Request a session token and store it
    Token(OutputArgs),
    /// Run a full linking attempt, replaying SDK outcomes from a file
    Link(LinkArgs),
    /// Show balances for the most recently exchanged item
    Balance(OutputArgs),
    /// Refresh balances for one item
    Refresh(ItemArgs),
    /// Sync transactions for one item
    Sync(ItemArgs),
    /// Remove a linked item
    Remove(ItemArgs),
    /// Show an institution and whether it is already linked
    Institution(InstitutionArgs),
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// JSON array of SDK outcomes to replay
    #[arg(long)]
    outcomes: PathBuf,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ItemArgs {
    /// Item identifier
    #[arg(long = "item-id")]
    item_id: String,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct InstitutionArgs {
    /// Institution identifier (e.g. ins_109508)
    institution_id: String,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = flow_config(&cli.backend)?;
    match cli.command {
        Commands::Token(args) => token(&cli.backend, &config, args).await?,
        Commands::Link(args) => link(&cli.backend, &config, args).await?,
        Commands::Balance(args) => balance(&config, args).await?,
        Commands::Refresh(args) => refresh(&config, args).await?,
        Commands::Sync(args) => sync(&config, args).await?,
        Commands::Remove(args) => remove(&config, args).await?,
        Commands::Institution(args) => institution(&config, args).await?,
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("tracing init failed: {err}");
    }
}

fn flow_config(args: &BackendArgs) -> Result<FlowConfig> {
    let mut config = FlowConfig::new(&args.base_url)
        .context("invalid --base-url")?
        .with_token_endpoint(args.token_endpoint)
        .with_profile(args.profile.clone());
    if let Some(cookie) = &args.session_cookie {
        config = config.with_session_cookie(cookie.clone());
    }
    Ok(config)
}

fn token_store(args: &BackendArgs, config: &FlowConfig) -> Result<FileTokenStore> {
    let store = match &args.storage_dir {
        Some(dir) => ConfigLocator::with_root(dir.clone())
            .map(|locator| FileTokenStore::new(locator, config.profile.clone()))
            .map_err(StoreError::from),
        None => FileTokenStore::with_default_locator(config.profile.clone()),
    };
    store.context("unable to initialise token storage")
}

fn backend(config: &FlowConfig) -> Result<BackendClient> {
    BackendClient::new(config).context("unable to build backend client")
}

async fn token(args: &BackendArgs, config: &FlowConfig, output: OutputArgs) -> Result<()> {
    let controller = LinkFlowController::new(
        backend(config)?,
        token_store(args, config)?,
        LoggingPage,
        ReplaySdk::default(),
    )
    .with_token_endpoint(config.token_endpoint);
    let token = controller
        .fetch_session_token()
        .await
        .context("failed to obtain session token")?;
    if output.json {
        println!("{}", json!({ "link_token": token }));
    } else {
        println!("{token}");
    }
    Ok(())
}

async fn link(args: &BackendArgs, config: &FlowConfig, link: LinkArgs) -> Result<()> {
    let sdk = ReplaySdk::from_file(&link.outcomes)
        .with_context(|| format!("unable to load outcomes from {}", link.outcomes.display()))?;
    let controller =
        LinkFlowController::new(backend(config)?, token_store(args, config)?, LoggingPage, sdk)
            .with_token_endpoint(config.token_endpoint);
    let outcome = controller.run().await.context("linking attempt failed")?;

    if link.json {
        println!("{}", outcome_json(&outcome));
        return Ok(());
    }
    match outcome {
        FlowOutcome::Linked { item_id } => println!("Linked item {item_id}"),
        FlowOutcome::AlreadyLinked { institution_id } => {
            println!("Institution {institution_id} has already been linked, refresh it instead")
        }
        FlowOutcome::Exited { status } => {
            println!("Link exited ({})", status.as_deref().unwrap_or("no status"))
        }
        FlowOutcome::Abandoned => println!("Link closed without a result"),
    }
    Ok(())
}

fn outcome_json(outcome: &FlowOutcome) -> serde_json::Value {
    match outcome {
        FlowOutcome::Linked { item_id } => json!({ "outcome": "linked", "item_id": item_id }),
        FlowOutcome::AlreadyLinked { institution_id } => {
            json!({ "outcome": "already_linked", "institution_id": institution_id })
        }
        FlowOutcome::Exited { status } => json!({ "outcome": "exited", "status": status }),
        FlowOutcome::Abandoned => json!({ "outcome": "abandoned" }),
    }
}

async fn balance(config: &FlowConfig, args: OutputArgs) -> Result<()> {
    let report = backend(config)?
        .balance()
        .await
        .context("failed to fetch balances")?;
    print_balances(&report, args.json)
}

async fn refresh(config: &FlowConfig, args: ItemArgs) -> Result<()> {
    let report = backend(config)?
        .refresh_balance(&ItemId::new(args.item_id))
        .await
        .context("failed to refresh balances")?;
    print_balances(&report, args.json)
}

fn print_balances(report: &BalanceReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("Item {}", report.item.item_id);
    if report.accounts.is_empty() {
        println!("  (no accounts)");
    }
    for account in &report.accounts {
        let current = account
            .balances
            .current
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<24} {:>12} {}",
            account.name.as_deref().unwrap_or(&account.account_id),
            current,
            account.balances.iso_currency_code.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn sync(config: &FlowConfig, args: ItemArgs) -> Result<()> {
    let item_id = ItemId::new(args.item_id);
    let sync = backend(config)?
        .sync_transactions(&item_id)
        .await
        .context("failed to sync transactions")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&sync)?);
    } else {
        println!("{} new transaction(s) for item {item_id}", sync.added.len());
    }
    Ok(())
}

async fn remove(config: &FlowConfig, args: ItemArgs) -> Result<()> {
    let item_id = ItemId::new(args.item_id);
    let removed = backend(config)?
        .remove_item(&item_id)
        .await
        .context("failed to remove item")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&removed)?);
    } else {
        println!("Removed item {item_id}");
    }
    Ok(())
}

async fn institution(config: &FlowConfig, args: InstitutionArgs) -> Result<()> {
    let client = backend(config)?;
    let institution_id = InstitutionId::new(args.institution_id);
    let details = client
        .institution(&institution_id)
        .await
        .context("failed to look up institution")?;
    let linked = client
        .institution_status(&institution_id)
        .await
        .context("failed to check linked institutions")?
        == InstitutionStatus::Exists;
    if args.json {
        println!(
            "{}",
            json!({
                "institution_id": details.institution_id,
                "name": details.name,
                "linked": linked,
            })
        );
    } else {
        let marker = if linked { "linked" } else { "not linked" };
        println!("{} ({}) - {marker}", details.name, details.institution_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_link_with_global_flags() {
        let cli = Cli::try_parse_from([
            "linkflow",
            "link",
            "--outcomes",
            "demos/link-success.json",
            "--base-url",
            "http://localhost:8000",
            "--token-endpoint",
            "create",
        ])
        .unwrap();
        assert_eq!(cli.backend.base_url, "http://localhost:8000");
        assert_eq!(cli.backend.token_endpoint, TokenEndpoint::Create);
        match cli.command {
            Commands::Link(args) => assert!(args.outcomes.ends_with("link-success.json")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn outcome_json_shapes() {
        let linked = outcome_json(&FlowOutcome::Linked {
            item_id: ItemId::new("item_1"),
        });
        assert_eq!(linked, json!({ "outcome": "linked", "item_id": "item_1" }));
        let exited = outcome_json(&FlowOutcome::Exited { status: None });
        assert_eq!(exited, json!({ "outcome": "exited", "status": null }));
    }
}
