//! Position Planner CLI
//!
//! Plans manual trades: weighted entry setups, risk-driven step sizing,
//! fills, closes and per-account bookkeeping.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use position_planner::db::Database;
use position_planner::models::{
    AccountChangeType, OrderType, Position, ResizingStep, Setup, Side, StepRef,
};
use position_planner::store::PlannerStore;
use position_planner::trading::{PlannerConfig, PositionEdit};

/// Manual trading-position planner CLI.
#[derive(Parser)]
#[command(name = "planner")]
#[command(about = "Plan multi-step entries sized from a risk budget", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "PLANNER_DATABASE", default_value = "sqlite:./planner.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PLANNER_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(flatten)]
    defaults: DefaultArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the planner defaults.
#[derive(Args)]
struct DefaultArgs {
    /// Maker fee for new accounts (0.0002 = 0.02%)
    #[arg(long, env = "PLANNER_MAKER_FEE", global = true)]
    maker_fee: Option<Decimal>,

    /// Taker fee for new accounts (0.0005 = 0.05%)
    #[arg(long, env = "PLANNER_TAKER_FEE", global = true)]
    taker_fee: Option<Decimal>,

    /// Balance of the default account created on first run
    #[arg(long, env = "PLANNER_INITIAL_BALANCE", global = true)]
    initial_balance: Option<Decimal>,

    /// Risk amount of new positions
    #[arg(long, env = "PLANNER_DEFAULT_RISK", global = true)]
    default_risk: Option<Decimal>,

    /// Leverage of new positions
    #[arg(long, env = "PLANNER_DEFAULT_LEVERAGE", global = true)]
    default_leverage: Option<Decimal>,

    /// Symbol used when none is given
    #[arg(long, env = "PLANNER_DEFAULT_SYMBOL", global = true)]
    default_symbol: Option<String>,
}

impl DefaultArgs {
    fn into_config(self) -> PlannerConfig {
        let mut config = PlannerConfig::default();
        if let Some(fee) = self.maker_fee {
            config.maker_fee = fee;
        }
        if let Some(fee) = self.taker_fee {
            config.taker_fee = fee;
        }
        if let Some(balance) = self.initial_balance {
            config.initial_balance = balance;
        }
        if let Some(risk) = self.default_risk {
            config.default_risk = risk;
        }
        if let Some(leverage) = self.default_leverage {
            config.default_leverage = leverage;
        }
        if let Some(symbol) = self.default_symbol {
            config.default_symbol = symbol;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage entry setups
    #[command(subcommand)]
    Setup(SetupCommand),

    /// Manage accounts and balance changes
    #[command(subcommand)]
    Account(AccountCommand),

    /// Manage positions
    #[command(subcommand)]
    Position(PositionCommand),

    /// Size a plan without storing anything
    Plan {
        /// long or short
        side: Side,

        /// Entry prices, one per step
        #[arg(short, long, value_delimiter = ',', required = true)]
        prices: Vec<Decimal>,

        /// Step weights (defaults to equal weights)
        #[arg(short, long, value_delimiter = ',')]
        weights: Vec<Decimal>,

        /// Stop-loss price
        #[arg(short, long)]
        stop: Decimal,

        /// Amount to lose if the stop is hit
        #[arg(short, long, default_value = "100")]
        risk: Decimal,

        #[arg(long, default_value = "1")]
        leverage: Decimal,

        /// Account balance for the margin cap (no cap when omitted)
        #[arg(short, long)]
        balance: Option<Decimal>,
    },

    /// Write all planner data as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace all planner data from a JSON export
    Import {
        path: PathBuf,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommand>,
    },
}

#[derive(Subcommand)]
enum SetupCommand {
    /// Add a setup
    Add {
        name: String,

        /// Number of entry steps
        #[arg(short, long)]
        steps: usize,

        /// Relative weight per step (missing ones default to 1)
        #[arg(short, long, value_delimiter = ',')]
        weights: Vec<Decimal>,
    },

    /// Rename or reshape a setup
    Edit {
        id: String,
        name: String,

        #[arg(short, long)]
        steps: usize,

        #[arg(short, long, value_delimiter = ',')]
        weights: Vec<Decimal>,
    },

    /// List active setups
    List,

    /// Delete a setup (kept hidden while positions use it)
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Add an account
    Add {
        name: String,

        #[arg(short, long, default_value = "10000")]
        balance: Decimal,
    },

    /// List accounts with realized stats
    List,

    /// Record a deposit
    Deposit {
        id: String,
        amount: Decimal,

        #[arg(short, long, default_value = "")]
        note: String,
    },

    /// Record a withdrawal
    Withdraw {
        id: String,
        amount: Decimal,

        #[arg(short, long, default_value = "")]
        note: String,
    },

    /// Change the fee schedule
    Fees {
        id: String,

        #[arg(long)]
        maker: Decimal,

        #[arg(long)]
        taker: Decimal,
    },

    /// Delete an account and all of its positions
    Delete {
        id: String,
    },
}

/// Step selector shared by the step-level commands.
#[derive(Args)]
struct StepArgs {
    /// Position id (a unique prefix is enough)
    id: String,

    /// Step number, starting at 1
    step: usize,

    /// Address a chase step instead of a planned step
    #[arg(short, long)]
    chase: bool,
}

impl StepArgs {
    fn step_ref(&self) -> Result<StepRef> {
        if self.step == 0 {
            bail!("Step numbers start at 1");
        }
        let idx = self.step - 1;
        Ok(if self.chase { StepRef::Chase(idx) } else { StepRef::Planned(idx) })
    }
}

#[derive(Subcommand)]
enum PositionCommand {
    /// Create a planning position
    New {
        /// long or short
        side: Side,

        /// Symbol (defaults to the configured symbol)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Account id (defaults to the first account)
        #[arg(short, long)]
        account: Option<String>,

        /// Setup id (defaults to the first setup)
        #[arg(long)]
        setup: Option<String>,
    },

    /// Show a position with its steps
    Show {
        id: String,
    },

    /// List positions
    List {
        /// Only this account
        #[arg(short, long)]
        account: Option<String>,

        /// Show the closed-position history instead
        #[arg(long)]
        closed: bool,

        /// History page, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,
    },

    SetRisk {
        id: String,
        amount: Decimal,
    },

    SetStop {
        id: String,
        price: Decimal,
    },

    SetLeverage {
        id: String,
        leverage: Decimal,
    },

    SetSide {
        id: String,
        side: Side,
    },

    SetSymbol {
        id: String,
        symbol: String,
    },

    /// Set the entry price of a step
    SetPrice {
        #[command(flatten)]
        step: StepArgs,
        price: Decimal,
    },

    /// Set the size of a chase step
    SetSize {
        #[command(flatten)]
        step: StepArgs,
        size: Decimal,
    },

    /// Set maker or taker for a step
    OrderType {
        #[command(flatten)]
        step: StepArgs,
        order_type: OrderType,
    },

    /// Mark a step as filled
    Fill {
        #[command(flatten)]
        step: StepArgs,
    },

    /// Mark a step as not filled (also reopens it)
    Unfill {
        #[command(flatten)]
        step: StepArgs,
    },

    /// Close a filled step
    CloseStep {
        #[command(flatten)]
        step: StepArgs,
    },

    /// Append an empty chase step
    AddChase {
        id: String,
    },

    RemoveChase {
        id: String,

        /// Chase step number, starting at 1
        step: usize,
    },

    /// Set the realized PnL (omit the value to clear it)
    SetPnl {
        id: String,
        #[arg(allow_hyphen_values = true)]
        pnl: Option<Decimal>,
    },

    /// Close the position (requires a PnL)
    Close {
        id: String,
    },

    /// Reshape the position to another setup
    ApplySetup {
        id: String,
        setup: String,
    },

    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Store a config value (parsed as JSON, else kept as text)
    Set {
        key: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.defaults.into_config();

    // Stateless sizing needs no database
    if let Commands::Plan { side, prices, weights, stop, risk, leverage, balance } = cli.command {
        return run_plan(&config, side, prices, weights, stop, risk, leverage, balance);
    }

    let db = Database::new(&cli.database).await?;
    let mut store = PlannerStore::open(db, config).await?;

    match cli.command {
        Commands::Setup(command) => run_setup(&mut store, command).await?,
        Commands::Account(command) => run_account(&mut store, command).await?,
        Commands::Position(command) => run_position(&mut store, command).await?,
        // Sized above without a store
        Commands::Plan { .. } => {}

        Commands::Export { output } => {
            let json = store.export_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::Import { path } => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            store.import_json(&json).await?;
            println!(
                "Imported {} accounts, {} setups, {} positions",
                store.accounts().len(),
                store.setups().count(),
                store.positions().len()
            );
        }

        Commands::Config { command: Some(ConfigCommand::Set { key, value }) } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            println!("{} = {}", key, value);
            store.set_config(&key, value).await;
        }

        Commands::Config { command: None } => {
            let config = store.config();

            println!("\n=== Planner Defaults ===\n");
            println!("  Maker Fee:          {}%", config.maker_fee * dec!(100));
            println!("  Taker Fee:          {}%", config.taker_fee * dec!(100));
            println!("  Initial Balance:    ${}", config.initial_balance);
            println!("  Default Risk:       ${}", config.default_risk);
            println!("  Default Leverage:   {}x", config.default_leverage);
            println!("  Default Symbol:     {}", config.default_symbol);
            println!("  Persist Retry:      {}s", config.persist_retry_secs);
            println!("  History Page Size:  {}", config.history_per_page);

            if !store.configs().is_empty() {
                println!("\n=== Stored Values ===\n");
                for entry in store.configs() {
                    println!("  {:<30} {}", entry.key, entry.value);
                }
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_plan(
    config: &PlannerConfig,
    side: Side,
    prices: Vec<Decimal>,
    weights: Vec<Decimal>,
    stop: Decimal,
    risk: Decimal,
    leverage: Decimal,
    balance: Option<Decimal>,
) -> Result<()> {
    let setup = Setup::new("Plan", prices.len(), weights);
    setup.validate()?;

    let mut position = Position::new("", config.default_symbol.clone(), side);
    position.apply_setup(&setup);
    let edits = prices
        .into_iter()
        .enumerate()
        .map(|(idx, price)| PositionEdit::SetStepPrice { step: StepRef::Planned(idx), price })
        .chain([
            PositionEdit::SetRiskAmount(risk),
            PositionEdit::SetLeverage(leverage),
            PositionEdit::SetStopLoss(stop),
        ]);
    for edit in edits {
        edit.apply(&mut position, chrono::Utc::now())?;
    }

    info!(side = side.as_str(), steps = setup.step_count, "Sizing plan");
    let balance = balance.unwrap_or(Decimal::ZERO);
    position.recalculate(&setup, balance, Some(config.fee_schedule()));

    print_position(&position, balance);
    Ok(())
}

async fn run_setup(store: &mut PlannerStore, command: SetupCommand) -> Result<()> {
    match command {
        SetupCommand::Add { name, steps, weights } => {
            let setup = store.add_setup(&name, steps, weights).await?;
            println!("Added setup {} ({})", setup.name, setup.id);
        }

        SetupCommand::Edit { id, name, steps, weights } => {
            let id = resolve(store.setups().map(|s| s.id.as_str()), &id, "setup")?;
            let setup = store.update_setup(&id, &name, steps, weights).await?;
            println!("Updated setup {} ({})", setup.name, setup.id);
        }

        SetupCommand::List => {
            println!("\n{:<38} {:<20} {:>5}  {}", "ID", "NAME", "STEPS", "WEIGHTS");
            println!("{}", "-".repeat(80));

            for setup in store.setups() {
                let weights: Vec<String> = setup.weights.iter().map(|w| w.normalize().to_string()).collect();
                println!(
                    "{:<38} {:<20} {:>5}  {}",
                    setup.id,
                    truncate(&setup.name, 18),
                    setup.step_count,
                    weights.join(":")
                );
            }
        }

        SetupCommand::Delete { id } => {
            let id = resolve(store.setups().map(|s| s.id.as_str()), &id, "setup")?;
            store.delete_setup(&id).await?;
            println!("Deleted setup {}", id);
        }
    }

    Ok(())
}

async fn run_account(store: &mut PlannerStore, command: AccountCommand) -> Result<()> {
    match command {
        AccountCommand::Add { name, balance } => {
            let account = store.add_account(&name, balance).await?;
            println!("Added account {} ({})", account.name, account.id);
        }

        AccountCommand::List => {
            println!(
                "\n{:<38} {:<16} {:>12} {:>10} {:>8} {:>6}",
                "ID", "NAME", "BALANCE", "REALIZED", "FEES", "WIN%"
            );
            println!("{}", "-".repeat(96));

            for account in store.accounts() {
                let stats = store.account_stats(&account.id)?;
                println!(
                    "{:<38} {:<16} {:>12.2} {:>10.2} {:>8.2} {:>5.1}%",
                    account.id,
                    truncate(&account.name, 14),
                    stats.current_balance,
                    stats.realized_pnl,
                    stats.total_fees,
                    stats.win_rate * 100.0
                );
            }
        }

        AccountCommand::Deposit { id, amount, note } => {
            let id = resolve(store.accounts().iter().map(|a| a.id.as_str()), &id, "account")?;
            store.record_account_change(&id, amount, AccountChangeType::Deposit, &note).await?;
            print_balance(store, &id);
        }

        AccountCommand::Withdraw { id, amount, note } => {
            let id = resolve(store.accounts().iter().map(|a| a.id.as_str()), &id, "account")?;
            store.record_account_change(&id, amount, AccountChangeType::Withdrawal, &note).await?;
            print_balance(store, &id);
        }

        AccountCommand::Fees { id, maker, taker } => {
            let id = resolve(store.accounts().iter().map(|a| a.id.as_str()), &id, "account")?;
            let account = store.set_account_fees(&id, maker, taker).await?;
            println!(
                "{}: maker {}%, taker {}%",
                account.name,
                account.maker_fee * dec!(100),
                account.taker_fee * dec!(100)
            );
        }

        AccountCommand::Delete { id } => {
            let id = resolve(store.accounts().iter().map(|a| a.id.as_str()), &id, "account")?;
            store.delete_account(&id).await?;
            println!("Deleted account {} and its positions", id);
        }
    }

    Ok(())
}

async fn run_position(store: &mut PlannerStore, command: PositionCommand) -> Result<()> {
    let (id, edit) = match command {
        PositionCommand::New { side, symbol, account, setup } => {
            let account = match account {
                Some(prefix) => resolve(store.accounts().iter().map(|a| a.id.as_str()), &prefix, "account")?,
                None => store
                    .accounts()
                    .first()
                    .map(|a| a.id.clone())
                    .context("No account available")?,
            };
            let setup = setup
                .map(|prefix| resolve(store.setups().map(|s| s.id.as_str()), &prefix, "setup"))
                .transpose()?;

            let symbol = symbol.unwrap_or_default();
            let position = store.create_position(&account, &symbol, side, setup.as_deref()).await?;
            println!("Created position {}", position.id);
            show(store, &position.id);
            return Ok(());
        }

        PositionCommand::Show { id } => {
            let id = resolve_position(store, &id)?;
            show(store, &id);
            return Ok(());
        }

        PositionCommand::List { account, closed, page } => {
            let account = account
                .map(|prefix| resolve(store.accounts().iter().map(|a| a.id.as_str()), &prefix, "account"))
                .transpose()?;
            let positions: Vec<&Position> = if closed {
                store.closed_positions(account.as_deref(), page.saturating_sub(1))
            } else {
                store
                    .positions()
                    .iter()
                    .filter(|p| !p.is_closed())
                    .filter(|p| account.as_deref().map_or(true, |id| p.account_id == id))
                    .collect()
            };
            print_positions(&positions);
            return Ok(());
        }

        PositionCommand::ApplySetup { id, setup } => {
            let id = resolve_position(store, &id)?;
            let setup = resolve(store.setups().map(|s| s.id.as_str()), &setup, "setup")?;
            store.apply_setup(&id, &setup).await?;
            show(store, &id);
            return Ok(());
        }

        PositionCommand::Delete { id } => {
            let id = resolve_position(store, &id)?;
            store.delete_position(&id).await?;
            println!("Deleted position {}", id);
            return Ok(());
        }

        PositionCommand::SetRisk { id, amount } => (id, PositionEdit::SetRiskAmount(amount)),
        PositionCommand::SetStop { id, price } => (id, PositionEdit::SetStopLoss(price)),
        PositionCommand::SetLeverage { id, leverage } => (id, PositionEdit::SetLeverage(leverage)),
        PositionCommand::SetSide { id, side } => (id, PositionEdit::SetSide(side)),
        PositionCommand::SetSymbol { id, symbol } => (id, PositionEdit::SetSymbol(symbol)),
        PositionCommand::SetPrice { step, price } => {
            let edit = PositionEdit::SetStepPrice { step: step.step_ref()?, price };
            (step.id, edit)
        }
        PositionCommand::SetSize { step, size } => {
            let edit = PositionEdit::SetStepSize { step: step.step_ref()?, size };
            (step.id, edit)
        }
        PositionCommand::OrderType { step, order_type } => {
            let edit = PositionEdit::SetOrderType { step: step.step_ref()?, order_type };
            (step.id, edit)
        }
        PositionCommand::Fill { step } => {
            let edit = PositionEdit::SetFilled { step: step.step_ref()?, filled: true };
            (step.id, edit)
        }
        PositionCommand::Unfill { step } => {
            let edit = PositionEdit::SetFilled { step: step.step_ref()?, filled: false };
            (step.id, edit)
        }
        PositionCommand::CloseStep { step } => {
            let edit = PositionEdit::CloseStep(step.step_ref()?);
            (step.id, edit)
        }
        PositionCommand::AddChase { id } => (id, PositionEdit::AddChaseStep),
        PositionCommand::RemoveChase { id, step } => {
            if step == 0 {
                bail!("Step numbers start at 1");
            }
            (id, PositionEdit::RemoveChaseStep(step - 1))
        }
        PositionCommand::SetPnl { id, pnl } => (id, PositionEdit::SetPnl(pnl)),
        PositionCommand::Close { id } => (id, PositionEdit::ClosePosition),
    };

    let id = resolve_position(store, &id)?;
    store.edit_position(&id, edit).await?;
    show(store, &id);

    Ok(())
}

/// Resolve a full id or a unique id prefix.
fn resolve<'a>(ids: impl Iterator<Item = &'a str>, prefix: &str, kind: &str) -> Result<String> {
    let matches: Vec<&str> = ids.filter(|id| id.starts_with(prefix)).collect();
    match matches.as_slice() {
        [id] => Ok(id.to_string()),
        [] => bail!("No {} matches '{}'", kind, prefix),
        _ if matches.contains(&prefix) => Ok(prefix.to_string()),
        _ => bail!("'{}' matches {} {}s, use a longer prefix", prefix, matches.len(), kind),
    }
}

fn resolve_position(store: &PlannerStore, prefix: &str) -> Result<String> {
    resolve(store.positions().iter().map(|p| p.id.as_str()), prefix, "position")
}

fn show(store: &PlannerStore, id: &str) {
    if let Some(position) = store.position(id) {
        let balance = store
            .account(&position.account_id)
            .map_or(Decimal::ZERO, |a| a.current_balance);
        print_position(position, balance);
    }
}

fn print_balance(store: &PlannerStore, id: &str) {
    if let Some(account) = store.account(id) {
        println!("{} balance: ${:.2}", account.name, account.current_balance);
    }
}

fn print_positions(positions: &[&Position]) {
    if positions.is_empty() {
        println!("No positions. Use 'planner position new <long|short>' to plan one.");
        return;
    }

    println!(
        "\n{:<10} {:<12} {:<6} {:<9} {:>10} {:>12} {:>12} {:>10}",
        "ID", "SYMBOL", "SIDE", "STATUS", "RISK", "SIZE", "BREAK-EVEN", "PNL"
    );
    println!("{}", "-".repeat(88));

    for pos in positions {
        let pnl = pos.pnl.map_or_else(|| "-".to_string(), |p| format!("{:.2}", p));
        println!(
            "{:<10} {:<12} {:<6} {:<9} {:>10.2} {:>12.4} {:>12.4} {:>10}",
            truncate(&pos.id, 10),
            truncate(&pos.symbol, 12),
            pos.side.as_str(),
            pos.status.as_str(),
            pos.risk_amount,
            pos.active_size(),
            pos.predicted_be,
            pnl
        );
    }
}

fn print_position(pos: &Position, balance: Decimal) {
    println!("\n=== {} {} ({}) ===", pos.symbol, pos.side.as_str().to_uppercase(), pos.status.as_str());
    if !pos.id.is_empty() && !pos.account_id.is_empty() {
        println!("Id:             {}", pos.id);
    }
    println!("Risk:           ${:.2}", pos.risk_amount);
    println!("Stop Loss:      {}", pos.stop_loss_price);
    println!("Leverage:       {}x", pos.leverage);
    println!("Risk at Stop:   ${:.2}", pos.risk_at_stop());
    println!("Fees:           ${:.4}", pos.fee_total);
    println!("Predicted BE:   {:.4}", pos.predicted_be);
    println!("Current BE:     {:.4}", pos.current_be);
    if balance > Decimal::ZERO {
        println!("Margin:         ${:.2} ({:.1}% of balance)", pos.margin_estimate(), pos.margin_usage_pct(balance));
    } else {
        println!("Margin:         ${:.2}", pos.margin_estimate());
    }
    if let Some(pnl) = pos.pnl {
        println!("PnL:            ${:.2}", pnl);
    }

    print_steps("Steps", &pos.steps);
    if !pos.chase_steps.is_empty() {
        print_steps("Chase Steps", &pos.chase_steps);
    }
}

fn print_steps(title: &str, steps: &[ResizingStep]) {
    println!("\n--- {} ---", title);
    println!(
        "{:>3} {:>12} {:>14} {:>12} {:>6} {:>10} {:>12} {:<8}",
        "#", "PRICE", "SIZE", "COST", "TYPE", "FEE", "BREAK-EVEN", "STATE"
    );

    for (idx, step) in steps.iter().enumerate() {
        let state = match (step.is_filled, step.is_closed) {
            (_, true) => "closed",
            (true, false) => "filled",
            (false, false) => "open",
        };
        println!(
            "{:>3} {:>12} {:>14.6} {:>12.2} {:>6} {:>10.4} {:>12.4} {:<8}",
            idx + 1,
            step.price.normalize(),
            step.size,
            step.cost,
            step.order_type.as_str(),
            step.fee,
            step.predicted_be,
            state
        );
    }
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
