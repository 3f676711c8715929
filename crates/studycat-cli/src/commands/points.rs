use clap::Subcommand;
use studycat_core::Runtime;

use super::CmdResult;

#[derive(Subcommand)]
pub enum PointsAction {
    /// Print the current balance
    Get,
    /// Add points
    Earn {
        delta: f64,
        #[arg(long, default_value = "cli")]
        reason: String,
    },
    /// Spend points
    Spend {
        cost: f64,
        #[arg(long, default_value = "cli")]
        reason: String,
    },
}

pub async fn run(action: PointsAction) -> CmdResult {
    let rt = Runtime::open_settled().await?;
    let ledger = rt.ledger();

    let balance = match action {
        PointsAction::Get => ledger.get().await?,
        PointsAction::Earn { delta, reason } => ledger.earn(delta, &reason).await?,
        PointsAction::Spend { cost, reason } => ledger.spend(cost, &reason).await?,
    };
    println!("{balance}");
    Ok(())
}
