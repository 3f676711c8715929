pub mod config;
pub mod daemon;
pub mod logs;
pub mod msg;
pub mod points;
pub mod stats;
pub mod timer;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub fn print_json<T: serde::Serialize>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
