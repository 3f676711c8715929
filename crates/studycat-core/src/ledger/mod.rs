//! Points ledger: the serialized authority, its signed balance token and
//! the timeout-raced client used by UI surfaces.

mod authority;
mod client;
mod token;

pub use authority::{
    LedgerAuthority, LedgerHandle, PointsUpdated, BALANCE_KEY, SIGNING_KEY_KEY, TOKEN_KEY,
};
pub use client::PointsClient;
pub use token::{BalanceToken, SigningKey};
