use std::path::PathBuf;

use clap::Subcommand;
use studycat_core::export::export_csv;
use studycat_core::timer::DEFAULT_PURGE_DAYS;
use studycat_core::{Granularity, Runtime};

use super::CmdResult;

#[derive(Subcommand)]
pub enum LogsAction {
    /// Export finalized sessions as CSV
    Export {
        /// First local date, YYYY-MM-DD
        #[arg(long)]
        from: String,
        /// Last local date (inclusive), YYYY-MM-DD
        #[arg(long)]
        to: String,
        /// raw or daily
        #[arg(long, default_value_t = Granularity::Raw)]
        granularity: Granularity,
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Delete old session logs
    Purge {
        /// Remove logs that ended more than this many days ago
        #[arg(long, default_value_t = DEFAULT_PURGE_DAYS)]
        days: u32,
        /// Remove every log
        #[arg(long, conflicts_with = "days")]
        all: bool,
    },
}

pub async fn run(action: LogsAction) -> CmdResult {
    let rt = Runtime::open_settled().await?;
    let timer = rt.timer();

    match action {
        LogsAction::Export {
            from,
            to,
            granularity,
            output,
        } => {
            let state = timer.get_state().await?;
            let csv = export_csv(&state.logs, &timer.zone(), &from, &to, granularity)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, format!("{csv}\n"))?;
                    eprintln!("wrote {}", path.display());
                }
                None => println!("{csv}"),
            }
        }
        LogsAction::Purge { days, all } => {
            let removed = if all {
                timer.purge_all_logs().await?
            } else {
                timer.purge_logs_older_than(days).await?
            };
            println!("removed {removed} log(s)");
        }
    }
    Ok(())
}
