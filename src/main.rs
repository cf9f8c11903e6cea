//! Treasury Engine - Secure treasury trading for Solana via Jupiter
//!
//! CLI entry point: runs the engine with the position monitor, inspects
//! status and reports, and manages vault wallets.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use treasury_engine::adapters::{
    JupiterClient, JupiterConfig, JupiterExecutionAdapter, SolanaRpcClient,
};
use treasury_engine::application::{
    MonitorConfig, OrchestratorSettings, PositionAlert, PositionMonitor, TradingOrchestrator,
};
use treasury_engine::config::{load_config, master_secret, Config};
use treasury_engine::domain::risk;
use treasury_engine::ledger::PositionLedger;
use treasury_engine::vault::WalletVault;

#[derive(Parser)]
#[command(name = "treasury-engine", about = "Secure treasury trading engine")]
struct CliApp {
    /// Path to the config file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Enable info-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading engine with the position monitor
    Run,
    /// Show treasury status and open positions
    Status,
    /// Print the trading performance report
    Report,
    /// Manage vault wallets
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
}

#[derive(Subcommand)]
enum WalletAction {
    /// Create a new wallet in the vault
    Create {
        /// Label for the wallet
        label: String,
        /// Flag this wallet as the treasury
        #[arg(long)]
        treasury: bool,
    },
    /// List registered wallets
    List,
    /// Delete a non-treasury wallet
    Delete { address: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets live in .env / environment, never in config.toml
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    init_logging(app.verbose, app.debug);

    let config = load_config(&app.config)
        .with_context(|| format!("Failed to load configuration from {}", app.config))?;

    match app.command {
        Command::Run => run_command(config).await,
        Command::Status => status_command(config).await,
        Command::Report => report_command(config).await,
        Command::Wallet { action } => wallet_command(config, action),
    }
}

fn init_logging(verbose: bool, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    fmt().with_env_filter(filter).init();
}

fn open_vault(config: &Config) -> Result<Arc<WalletVault>> {
    let secret = master_secret().context(
        "A master secret is required for key custody.\n\
         Set TREASURY_MASTER_SECRET in the environment or a .env file.",
    )?;
    let vault = WalletVault::new(config.vault.expanded_wallet_dir(), &secret)
        .context("Failed to open the wallet vault")?;
    Ok(Arc::new(vault))
}

async fn build_engine(
    config: &Config,
) -> Result<(Arc<TradingOrchestrator>, Arc<JupiterClient>, Arc<WalletVault>)> {
    let vault = open_vault(config)?;

    let treasury = match vault.get_treasury() {
        Some(t) => t,
        None if config.engine.dry_run => {
            tracing::warn!("No treasury wallet found - creating one for dry-run use");
            vault
                .create_wallet("Treasury", true)
                .context("Failed to create treasury wallet")?
        }
        None => bail!(
            "No treasury wallet found.\n\
             Create one first: treasury-engine wallet create Treasury --treasury"
        ),
    };

    let jupiter = Arc::new(
        JupiterClient::with_config(JupiterConfig {
            api_base_url: config.jupiter.api_url.clone(),
            price_api_url: config.jupiter.price_api_url.clone(),
            api_key: config.jupiter.api_key.clone(),
            timeout: Duration::from_secs(config.jupiter.timeout_secs),
            max_retries: 3,
        })
        .context("Failed to create Jupiter client")?,
    );

    let rpc = SolanaRpcClient::new(config.solana.get_rpc_url());

    // Refresh the cached treasury balance; tolerate RPC failures so the
    // engine still starts offline in dry-run mode
    match rpc.get_balance(&treasury.address).await {
        Ok(lamports) => {
            vault.set_balance(&treasury.address, lamports).ok();
            tracing::info!(
                "Treasury {}...: {:.4} SOL",
                &treasury.address[..8],
                lamports as f64 / 1e9
            );
        }
        Err(e) => tracing::warn!("Could not refresh treasury balance: {}", e),
    }

    let execution = Arc::new(JupiterExecutionAdapter::new(
        (*jupiter).clone(),
        rpc,
        treasury.address.clone(),
        config.jupiter.slippage_bps,
    ));

    let ledger = Arc::new(PositionLedger::new(
        config.engine.data_dir.clone(),
        config.limits.max_positions,
    ));
    ledger.load().await.context("Failed to load ledger state")?;

    let settings = OrchestratorSettings {
        admin_ids: config.engine.admin_ids.clone(),
        risk_tier: config.engine.risk_tier,
        limits: config.limits.to_portfolio_limits(),
        dry_run: config.engine.dry_run,
        slippage_bps: config.jupiter.slippage_bps,
        trailing_stop_pct: config.trailing_stop(),
        leverage: config.monitor.leverage,
        default_grade: config.engine.default_grade.clone(),
    };

    let orchestrator = Arc::new(TradingOrchestrator::new(
        ledger,
        vault.clone(),
        jupiter.clone(),
        execution,
        settings,
    ));

    Ok((orchestrator, jupiter, vault))
}

/// Alert handler that writes monitor alerts to the log stream.
struct LogAlertHandler;

#[async_trait::async_trait]
impl treasury_engine::application::AlertHandler for LogAlertHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(
        &self,
        alert: &PositionAlert,
    ) -> Result<(), treasury_engine::application::monitor::AlertDeliveryError> {
        tracing::warn!(
            "[ALERT {}] {} ({}): {}",
            alert.kind.as_str(),
            alert.token_symbol,
            alert.position_id,
            alert.message
        );
        Ok(())
    }
}

async fn run_command(config: Config) -> Result<()> {
    if config.engine.dry_run {
        tracing::warn!("DRY RUN MODE - no real transactions");
    }

    let (orchestrator, jupiter, _vault) = build_engine(&config).await?;

    let monitor = Arc::new(PositionMonitor::new(
        orchestrator.clone(),
        jupiter,
        MonitorConfig {
            poll_interval: Duration::from_secs(config.monitor.poll_interval_secs),
            alert_cooldown: Duration::from_secs(config.monitor.alert_cooldown_secs),
            maintenance_margin: config.monitor.maintenance_margin,
            leverage: config.monitor.leverage,
        },
    ));
    monitor.register_handler(Arc::new(LogAlertHandler)).await;

    let mon = monitor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        mon.stop().await;
    });

    monitor.run().await;

    orchestrator
        .ledger()
        .save()
        .await
        .context("Failed to persist ledger state at shutdown")?;
    tracing::info!("Treasury engine stopped");
    Ok(())
}

async fn status_command(config: Config) -> Result<()> {
    let (orchestrator, _, vault) = build_engine(&config).await?;

    if let Some(treasury) = vault.get_treasury() {
        println!("Treasury: {}", treasury.address);
        println!(
            "Balance:  {:.4} SOL (cached)",
            treasury.balance_lamports as f64 / 1e9
        );
    }
    println!(
        "Mode:     {}",
        if orchestrator.is_dry_run() { "dry-run" } else { "LIVE" }
    );

    let positions = orchestrator.get_open_positions().await;
    println!("Open positions: {}", positions.len());
    for p in positions {
        let assessment = risk::assess(
            p.entry_price,
            p.current_price,
            p.direction,
            config.monitor.leverage,
            p.notional_usd / config.monitor.leverage.max(1.0),
            p.notional_usd,
            config.monitor.maintenance_margin,
        );
        println!(
            "  {} {} {:?} ${:.2} @ ${:.6} | TP ${:.6} SL ${:.6} | P&L {:+.1}% | risk {:?} ({})",
            p.id,
            p.token_symbol,
            p.direction,
            p.notional_usd,
            p.entry_price,
            p.take_profit_price,
            p.stop_loss_price,
            p.pnl_pct,
            assessment.risk_level,
            assessment.risk_score,
        );
    }
    Ok(())
}

async fn report_command(config: Config) -> Result<()> {
    let (orchestrator, _, _) = build_engine(&config).await?;
    let report = orchestrator.generate_report().await;
    println!("{}", report.to_display_string());
    Ok(())
}

fn wallet_command(config: Config, action: WalletAction) -> Result<()> {
    let vault = open_vault(&config)?;

    match action {
        WalletAction::Create { label, treasury } => {
            let record = vault.create_wallet(&label, treasury)?;
            println!(
                "Created wallet {} ({}){}",
                record.address,
                record.label,
                if record.is_treasury { " [TREASURY]" } else { "" }
            );
        }
        WalletAction::List => {
            let wallets = vault.list_wallets();
            if wallets.is_empty() {
                println!("No wallets in the vault");
            }
            for w in wallets {
                println!(
                    "{} | {} | created {}{}",
                    w.address,
                    w.label,
                    w.created_at.format("%Y-%m-%d %H:%M"),
                    if w.is_treasury { " [TREASURY]" } else { "" }
                );
            }
        }
        WalletAction::Delete { address } => {
            vault.delete(&address)?;
            println!("Deleted wallet {}", address);
        }
    }
    Ok(())
}
