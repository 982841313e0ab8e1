use std::rc::Rc;

use clap::{Args, Parser, Subcommand};
use tracing::Level;

use shared::logging::{JsonLogger, Logger, NullLogger, PrintLogger};

mod demo;

#[derive(Parser)]
#[command(name = "crosslink-sim")]
#[command(about = "Discrete-event simulator for adapted-Streamlet consensus and a best-chain ledger")]
#[command(version)]
struct Cli {
    /// Diagnostic log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Message-passing framework demo: pings and pongs over a virtual network
    Ping(PingArgs),
    /// Best-chain ledger walkthrough: issuance, spends, shielding, deshielding
    Ledger,
    /// Run adapted-Streamlet consensus over a small network
    Streamlet(StreamletArgs),
}

#[derive(Args)]
struct PingArgs {
    /// Number of responding nodes
    #[arg(long, default_value = "10")]
    nodes: usize,

    /// Network delay in ticks
    #[arg(long, default_value = "4")]
    delay: u64,

    /// Stop the virtual clock at this time
    #[arg(long)]
    until: Option<u64>,

    /// Randomize ping delays, deterministically per seed
    #[arg(long)]
    jitter_seed: Option<u64>,

    /// Simulation log format
    #[arg(long, value_enum, default_value = "table")]
    format: LogFormat,
}

#[derive(Args)]
struct StreamletArgs {
    /// Number of consensus nodes
    #[arg(long, default_value = "3")]
    nodes: usize,

    /// Number of epochs to drive
    #[arg(long, default_value = "6")]
    epochs: u64,

    /// Network delay in ticks
    #[arg(long, default_value = "1")]
    delay: u64,

    /// Simulation log format
    #[arg(long, value_enum, default_value = "table")]
    format: LogFormat,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    /// Aligned table on stdout
    Table,
    /// One JSON object per event
    Json,
    /// No simulation log
    None,
}

fn logger_for(format: LogFormat) -> Rc<dyn Logger> {
    match format {
        LogFormat::Table => Rc::new(PrintLogger::stdout()),
        LogFormat::Json => Rc::new(JsonLogger::stdout()),
        LogFormat::None => Rc::new(NullLogger),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Some(Commands::Ping(args)) => {
            demo::run_ping(
                args.nodes,
                args.delay,
                args.until,
                logger_for(args.format),
                args.jitter_seed,
            );
        }
        Some(Commands::Streamlet(args)) => {
            demo::run_streamlet(args.nodes, args.epochs, args.delay, logger_for(args.format));
        }
        Some(Commands::Ledger) | None => demo::run_ledger()?,
    }
    Ok(())
}
