use clap::Subcommand;
use serde_json::json;
use studycat_core::export::fmt_hms;
use studycat_core::{Runtime, ScoringMode};

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start or resume the session
    Start {
        /// Task label for this session
        label: Option<String>,
    },
    /// Pause the running session
    Pause,
    /// Stop and finalize the session
    Stop,
    /// Print the settled timer state as JSON
    Status,
    /// Set the work and detail labels
    Label {
        work: String,
        #[arg(default_value = "")]
        detail: String,
    },
    /// Change the scoring mode
    Scoring {
        /// linear_min, study_bunny or forest_like
        mode: String,
        /// Points per minute for linear_min
        #[arg(long)]
        per_min: Option<f64>,
    },
}

pub async fn run(action: TimerAction) -> CmdResult {
    let rt = Runtime::open_default()?;
    let settled = rt.settle_on_startup().await?;
    let timer = rt.timer();

    match action {
        TimerAction::Start { label } => print_json(&timer.start(label.as_deref()).await?)?,
        TimerAction::Pause => print_json(&timer.pause().await?)?,
        TimerAction::Stop => print_json(&timer.stop().await?)?,
        TimerAction::Status => {
            let elapsed_ms = timer.now_elapsed_ms().await?;
            print_json(&json!({
                "phase": settled.state.phase(),
                "elapsed": fmt_hms(elapsed_ms / 1000),
                "state": settled.state,
                "awards": settled.awards,
            }))?;
        }
        TimerAction::Label { work, detail } => {
            print_json(&timer.set_work_detail(&work, &detail).await?)?
        }
        TimerAction::Scoring { mode, per_min } => {
            let mode: ScoringMode = mode.parse()?;
            print_json(&timer.set_scoring(mode, per_min).await?)?;
        }
    }
    Ok(())
}
