use studycat_core::Runtime;

use super::{print_json, CmdResult};

pub async fn run(raw: &str) -> CmdResult {
    let message: serde_json::Value = serde_json::from_str(raw)?;
    let rt = Runtime::open_settled().await?;
    let response = rt.router().handle_value(message).await;
    print_json(&response)
}
