use serde_json::json;
use studycat_core::export::fmt_hms;
use studycat_core::timer::Bucket;
use studycat_core::Runtime;

use super::{print_json, CmdResult};

fn bucket(b: &Bucket) -> serde_json::Value {
    json!({
        "seconds": b.seconds,
        "hms": fmt_hms(b.seconds),
        "minutes": b.minutes,
        "points": b.points,
    })
}

pub async fn run(live: bool) -> CmdResult {
    let rt = Runtime::open_settled().await?;
    let totals = rt.timer().aggregates(live).await?;
    print_json(&json!({
        "today": bucket(&totals.day),
        "week": bucket(&totals.week),
    }))
}
