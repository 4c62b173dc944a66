//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::adapters::csv_adapter::CsvBarAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::log_sink::LogSink;
use crate::adapters::replay_broker::ReplayBroker;
use crate::domain::account::AccountState;
use crate::domain::config_validation::validate_runnable;
use crate::domain::error::TradeguardError;
use crate::domain::orchestrator::{CycleOutcome, DecisionOrchestrator};
use crate::domain::risk::AccountBook;
use crate::domain::settings::Settings;
use crate::domain::symbol::{normalize_symbol, ClassRulesTable};
use crate::logging;
use crate::ports::decision_port::DecisionSink;
use crate::runtime::Engine;

#[derive(Parser, Debug)]
#[command(name = "tradeguard", about = "Multi-timeframe trading decision and risk engine")]
pub struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate one cycle per symbol from CSV bar files
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,
        /// Evaluate only this symbol
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        balance: Option<f64>,
        #[arg(long)]
        equity: Option<f64>,
    },
    /// Poll every configured symbol until Ctrl-C
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a configuration file and print the resolved settings
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the instrument class and rules for a symbol
    Classify {
        symbol: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    logging::init(cli.verbose);
    match cli.command {
        Command::Evaluate {
            config,
            symbol,
            balance,
            equity,
        } => run_evaluate(&config, symbol.as_deref(), balance, equity),
        Command::Run { config } => run_loop(&config),
        Command::Validate { config } => run_validate(&config),
        Command::Classify { symbol, config } => run_classify(&symbol, config.as_deref()),
    }
}

fn fail(err: &TradeguardError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

/// Loads and validates settings. A relative `data_dir` is taken relative to
/// the config file's directory.
pub fn load_settings(path: &Path) -> Result<Settings, TradeguardError> {
    let adapter = FileConfigAdapter::from_file(path)?;
    let mut settings = Settings::load(&adapter)?;
    if settings.engine.data_dir.is_relative() {
        if let Some(parent) = path.parent() {
            settings.engine.data_dir = parent.join(&settings.engine.data_dir);
        }
    }
    Ok(settings)
}

/// Symbols to evaluate: the override when given, else the configured list.
pub fn resolve_symbols(symbol_override: Option<&str>, settings: &Settings) -> Vec<String> {
    match symbol_override {
        Some(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => settings.engine.symbols.clone(),
    }
}

/// Engine over CSV replay data with a fresh account book.
pub fn build_engine(settings: &Settings, account: AccountState, sink: Arc<dyn DecisionSink>) -> Engine {
    let book = Arc::new(AccountBook::new(settings.risk.clone(), account.clone()));
    let orchestrator = Arc::new(DecisionOrchestrator::new(settings, book));
    let broker = ReplayBroker::new(
        CsvBarAdapter::new(settings.engine.data_dir.clone()),
        orchestrator.strategy().timeframe_list().collect(),
        settings.classes.clone(),
        account,
    );
    Engine::new(orchestrator, Arc::new(broker), sink, settings.engine.poll_interval)
}

/// One cycle per symbol, in order. Per-symbol failures are returned, not raised.
pub async fn evaluate_symbols(
    engine: &Engine,
    symbols: &[String],
) -> Vec<(String, Result<CycleOutcome, TradeguardError>)> {
    let cancel = CancellationToken::new();
    let mut results = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let result = engine.cycle(symbol, &cancel).await;
        results.push((symbol.clone(), result));
    }
    results
}

fn run_evaluate(
    config_path: &Path,
    symbol_override: Option<&str>,
    balance: Option<f64>,
    equity: Option<f64>,
) -> ExitCode {
    let settings = match load_settings(config_path) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let symbols = resolve_symbols(symbol_override, &settings);
    if symbols.is_empty() {
        return fail(&TradeguardError::ConfigMissing {
            section: "engine".into(),
            key: "symbols".into(),
        });
    }

    // --balance alone implies a flat account
    let equity = equity
        .or(balance)
        .unwrap_or(settings.engine.starting_equity);
    let balance = balance.unwrap_or(settings.engine.starting_balance);
    let engine = build_engine(
        &settings,
        AccountState::new(balance, equity),
        Arc::new(LogSink::stdout()),
    );

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return fail(&TradeguardError::Io(e)),
    };
    let results = runtime.block_on(evaluate_symbols(&engine, &symbols));

    let mut first_failure: Option<ExitCode> = None;
    for (symbol, result) in &results {
        if let Err(e) = result {
            eprintln!("error: {symbol}: {e}");
            first_failure.get_or_insert_with(|| e.into());
        }
    }
    first_failure.unwrap_or(ExitCode::SUCCESS)
}

fn run_loop(config_path: &Path) -> ExitCode {
    let settings = match load_settings(config_path).and_then(|s| validate_runnable(&s).map(|_| s)) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let account = AccountState::new(
        settings.engine.starting_balance,
        settings.engine.starting_equity,
    );
    let engine = build_engine(&settings, account, Arc::new(LogSink::stdout()));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return fail(&TradeguardError::Io(e)),
    };
    let summary = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping");
            }
            on_signal.cancel();
        });
        engine.run(settings.engine.symbols.clone(), cancel).await
    });

    eprintln!(
        "{} cycles, {} decisions, {} no-action, {} errors",
        summary.cycles, summary.decisions, summary.no_actions, summary.errors
    );
    ExitCode::SUCCESS
}

/// Human-readable summary of resolved settings.
pub fn describe_settings(settings: &Settings) -> String {
    let s = &settings.strategy;
    let mut out = String::new();
    let _ = writeln!(out, "Strategy: {}", s.kind);
    let timeframes: Vec<String> = s.timeframes.iter().map(|(tf, w)| format!("{tf}:{w}")).collect();
    let _ = writeln!(out, "  timeframes:       {}", timeframes.join(", "));
    let _ = writeln!(out, "  signal threshold: {}", s.signal_threshold);
    let _ = writeln!(out, "  tie break:        {}", s.tie_break);
    let _ = writeln!(out, "  take profit:      {} {}", s.tp.value, s.tp.unit);
    let _ = writeln!(out, "  stop loss:        {} {}", s.sl.value, s.sl.unit);

    let r = &settings.risk;
    let _ = writeln!(out, "Risk:");
    let _ = writeln!(
        out,
        "  risk per trade:   {}%",
        settings.sizing.risk_percentage_per_trade
    );
    let _ = writeln!(
        out,
        "  drawdown:         soft {}% / hard {}% / recovery {}%",
        r.soft_drawdown_pct, r.hard_drawdown_pct, r.recovery_drawdown_pct
    );
    let _ = writeln!(
        out,
        "  loss streak:      soft {} / hard {}",
        r.soft_loss_streak, r.hard_loss_streak
    );
    let _ = writeln!(out, "Gate:");
    let _ = writeln!(out, "  min confidence:   {}", settings.gate.min_confidence);
    match &settings.gate.rescue {
        Some(rescue) => {
            let _ = writeln!(out, "  rescue floor:     {}", rescue.floor);
        }
        None => {
            let _ = writeln!(out, "  rescue:           disabled");
        }
    }
    if !settings.engine.symbols.is_empty() {
        let _ = writeln!(out, "Symbols: {}", settings.engine.symbols.join(", "));
    }
    out
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    match load_settings(config_path) {
        Ok(settings) => {
            eprint!("{}", describe_settings(&settings));
            eprintln!("\nConfiguration is valid.");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

/// One-line description of a symbol's class and effective rules.
pub fn describe_symbol(symbol: &str, classes: &ClassRulesTable) -> String {
    let (class, rules) = classes.lookup(symbol);
    format!(
        "{} ({}): class={} tier={} pip_size={} min_stop_pips={} digits={} contract_size={} lots={}..{} step={}",
        symbol,
        normalize_symbol(symbol),
        class,
        class.tier(),
        rules.pip_size,
        rules.min_stop_distance_pips,
        rules.price_digits,
        rules.contract_size,
        rules.min_lot,
        rules.max_lot,
        rules.lot_step
    )
}

fn run_classify(symbol: &str, config_path: Option<&Path>) -> ExitCode {
    let classes = match config_path {
        Some(path) => match load_settings(path) {
            Ok(s) => s.classes,
            Err(e) => return fail(&e),
        },
        None => ClassRulesTable::default(),
    };
    println!("{}", describe_symbol(symbol, &classes));
    ExitCode::SUCCESS
}
