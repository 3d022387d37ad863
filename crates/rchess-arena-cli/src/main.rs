//! TOML で記述したトーナメントを実行するコマンドラインフロントエンド

mod report;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Env, Target, WriteStyle};

use rchess_arena::board::StandardBoardProvider;
use rchess_arena::observer::LogObserver;
use rchess_arena::opening::{OpeningSource, OpeningSuite, StartPosition};
use rchess_arena::options::OptionKind;
use rchess_arena::pairing::create_generator;
use rchess_arena::process::DEFAULT_GRACE;
use rchess_arena::scheduler::TournamentState;
use rchess_arena::sink::{JsonlSink, MultiSink, PgnSink};
use rchess_arena::{
    ArenaConfig, EngineSession, GameExecutor, GameRecord, GameServices, MatchExecutor,
    RecoveryPolicy, Scheduler, SchedulerSettings,
};

const DEFAULT_FILTER_ENV: &str = "RUST_LOG";

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "rchess-arena",
    version,
    about = "Run UCI / Xboard chess engine tournaments described in a TOML file",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start one configured engine, print what it declares and quit
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Tournament file (TOML)
    #[arg(required = true)]
    config: Option<PathBuf>,

    /// Number of concurrent games (overrides tournament.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,

    /// JSONL output path (`.gz` suffix compresses)
    #[arg(long)]
    jsonl: Option<PathBuf>,

    /// PGN output path
    #[arg(long)]
    pgn: Option<PathBuf>,

    /// Append to existing output files instead of truncating them
    #[arg(long)]
    append: bool,

    /// Report progress every N games (0 disables)
    #[arg(long, default_value_t = 10)]
    report_interval: usize,

    /// Random seed for opening order and knockout seeding
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Tournament file (TOML)
    config: PathBuf,

    /// Engine name as written in the tournament file
    engine: String,
}

fn init_logger(level: &str) {
    Builder::from_env(Env::default().filter_or(DEFAULT_FILTER_ENV, level))
        .format(|buf, record| {
            writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())
        })
        .write_style(WriteStyle::Never)
        .target(Target::Stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level);

    match cli.command {
        Some(Commands::Probe(args)) => probe(args),
        None => run(cli.run),
    }
}

// ---------------------------------------------------------------------------
// トーナメント実行
// ---------------------------------------------------------------------------

fn load_config(args: &RunArgs) -> Result<ArenaConfig> {
    let Some(path) = args.config.as_deref() else {
        bail!("a tournament file is required");
    };
    let mut config = ArenaConfig::load(path)
        .with_context(|| format!("failed to load tournament file {}", path.display()))?;

    // コマンドライン指定で上書き
    if let Some(n) = args.concurrency {
        config.tournament.concurrency = n;
    }
    if let Some(p) = &args.jsonl {
        config.output.jsonl = Some(p.clone());
    }
    if let Some(p) = &args.pgn {
        config.output.pgn = Some(p.clone());
    }
    if let Some(seed) = args.seed {
        config.tournament.seed = Some(seed);
        if let Some(openings) = config.openings.as_mut() {
            openings.seed = Some(seed);
        }
    }
    config.validate().context("invalid tournament settings")?;
    Ok(config)
}

fn build_sink(config: &ArenaConfig, append: bool) -> Result<MultiSink> {
    let mut sink = MultiSink::new();
    if let Some(path) = &config.output.jsonl {
        let jsonl = JsonlSink::create(path, append)
            .with_context(|| format!("failed to open {}", path.display()))?;
        sink.push(Box::new(jsonl));
    }
    if let Some(path) = &config.output.pgn {
        let event = config
            .tournament
            .event
            .clone()
            .unwrap_or_else(|| config.tournament.name.clone());
        let site = config.tournament.site.clone().unwrap_or_else(|| "?".to_string());
        let pgn = PgnSink::create(path, append, event, site)
            .with_context(|| format!("failed to open {}", path.display()))?;
        sink.push(Box::new(pgn));
    }
    if sink.is_empty() {
        log::warn!("no output configured; results are only printed");
    }
    Ok(sink)
}

fn build_openings(config: &ArenaConfig) -> Result<Box<dyn OpeningSource>> {
    let Some(openings) = &config.openings else {
        return Ok(Box::new(StartPosition));
    };
    let suite = OpeningSuite::load(openings)
        .with_context(|| format!("failed to load openings from {}", openings.file.display()))?;
    suite
        .validate(&StandardBoardProvider, &config.tournament.variant)
        .context("opening suite contains an unplayable line")?;
    log::info!("loaded {} openings from {}", suite.len(), openings.file.display());
    Ok(Box::new(suite))
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let store = Arc::new(config.engine_store()?);
    let generator = create_generator(&config.tournament, store.len())?;
    let openings = build_openings(&config)?;
    let mut sink = build_sink(&config, args.append)?;

    if config.adjudication.tablebase {
        log::warn!("no tablebase oracle is available; tablebase adjudication is disabled");
    }
    let services = Arc::new(GameServices {
        boards: Box::new(StandardBoardProvider),
        adjudication: config.adjudication.clone(),
        oracle: None,
        observer: Box::new(LogObserver),
        tap: None,
    });
    let recovery = RecoveryPolicy::from_section(&config.tournament);

    let scheduler = Scheduler::new(
        SchedulerSettings::from_config(&config),
        Arc::clone(&store),
        generator,
        openings,
    );

    // Ctrl-C で新規対局を止め、進行中の対局を打ち切る
    let abort = scheduler.abort_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nShutting down gracefully...");
        abort.abort();
    }) {
        log::warn!("failed to install Ctrl-C handler: {e}");
    }

    let interval = args.report_interval;
    let mut on_result = |state: &TournamentState, record: &GameRecord| {
        report::on_game_finished(state, record, interval)
    };
    let report = scheduler.run(
        |_worker| -> Box<dyn MatchExecutor> {
            Box::new(GameExecutor::new(Arc::clone(&store), Arc::clone(&services), recovery))
        },
        &mut sink,
        &mut on_result,
    )?;

    report::print_final(&report);
    if report.aborted {
        bail!("tournament aborted after {} games", report.games);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// probe
// ---------------------------------------------------------------------------

fn describe_option(kind: &OptionKind) -> String {
    match kind {
        OptionKind::Check { default } => format!("check (default {default})"),
        OptionKind::Spin { default, min, max } => {
            format!("spin (default {default}, {min}..={max})")
        }
        OptionKind::Combo { default, choices } => {
            format!("combo (default {default}, choices {})", choices.join("/"))
        }
        OptionKind::Button => "button".to_string(),
        OptionKind::String { default } => format!("string (default \"{default}\")"),
        OptionKind::File { default } => format!("file (default \"{default}\")"),
    }
}

fn probe(args: ProbeArgs) -> Result<()> {
    let config = ArenaConfig::load(&args.config)
        .with_context(|| format!("failed to load tournament file {}", args.config.display()))?;
    let Some(engine) = config.engines.iter().find(|e| e.name == args.engine) else {
        bail!(
            "engine '{}' is not defined in {} (known: {})",
            args.engine,
            args.config.display(),
            config.engines.iter().map(|e| e.name.as_str()).collect::<Vec<_>>().join(", ")
        );
    };

    let session = EngineSession::start(Arc::new(engine.clone()), None)
        .with_context(|| format!("failed to start {}", engine.name))?;
    let caps = session.capabilities();
    println!("engine:   {}", engine.name);
    println!("protocol: {:?}", engine.protocol);
    println!("id name:  {}", caps.name.as_deref().unwrap_or("-"));
    println!("author:   {}", caps.author.as_deref().unwrap_or("-"));
    if caps.variants.is_empty() {
        println!("variants: standard");
    } else {
        println!("variants: {}", caps.variants.join(", "));
    }
    println!(
        "features: setboard={} ping={} reuse={} usermove={} draw={} nps={}",
        caps.setboard, caps.ping, caps.reuse, caps.usermove, caps.draw_offers, caps.nps
    );
    if !caps.unknown.is_empty() {
        println!("ignored:  {}", caps.unknown.join(", "));
    }
    println!("options ({}):", caps.options.len());
    for option in &caps.options {
        println!("  {}: {}", option.name, describe_option(&option.kind));
    }
    session.quit(DEFAULT_GRACE);
    Ok(())
}
