use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "studycat", version, about = "StudyCat study timer and points CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Timer control
    Timer {
        #[command(subcommand)]
        action: commands::timer::TimerAction,
    },
    /// Points balance
    Points {
        #[command(subcommand)]
        action: commands::points::PointsAction,
    },
    /// Today and this-week totals
    Stats {
        /// Include the running session's live time
        #[arg(long)]
        live: bool,
    },
    /// Session log export and retention
    Logs {
        #[command(subcommand)]
        action: commands::logs::LogsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Route one JSON protocol message and print the response
    Msg {
        /// Message, e.g. '{"type":"POINTS_GET"}'
        json: String,
    },
    /// Run the background runtime in the foreground until Ctrl-C
    Daemon,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STUDYCAT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match tokio::runtime::Runtime::new() {
        Ok(runtime) => {
            let result = runtime.block_on(dispatch(cli.command));
            // The daemon's stdin reader may still be parked on a blocking read.
            runtime.shutdown_background();
            result
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands) -> commands::CmdResult {
    match command {
        Commands::Timer { action } => commands::timer::run(action).await,
        Commands::Points { action } => commands::points::run(action).await,
        Commands::Stats { live } => commands::stats::run(live).await,
        Commands::Logs { action } => commands::logs::run(action).await,
        Commands::Config { action } => commands::config::run(action),
        Commands::Msg { json } => commands::msg::run(&json).await,
        Commands::Daemon => commands::daemon::run().await,
    }
}
