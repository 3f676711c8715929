//! Signed balance tokens for tamper and staleness detection.
//!
//! A token is a short-lived HMAC-SHA256 stamp over the balance. It is
//! advisory only: the persisted balance stays the value of record, and a
//! token that is missing, forged or expired is simply reissued.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{CoreError, Result};

type HmacSha256 = Hmac<Sha256>;

const KEY_LEN: usize = 32;

/// Installation-wide signing secret.
#[derive(Clone)]
pub struct SigningKey {
    raw: Vec<u8>,
    mac: HmacSha256,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl SigningKey {
    pub fn generate() -> Result<Self> {
        let mut raw = vec![0u8; KEY_LEN];
        fill_random(&mut raw)?;
        Self::from_bytes(raw)
    }

    pub fn from_b64(encoded: &str) -> Result<Self> {
        let raw = B64
            .decode(encoded.trim())
            .map_err(|e| CoreError::Custom(format!("signing key is not base64: {e}")))?;
        if raw.is_empty() {
            return Err(CoreError::Custom("signing key is empty".into()));
        }
        Self::from_bytes(raw)
    }

    pub fn to_b64(&self) -> String {
        B64.encode(&self.raw)
    }

    fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(&raw)
            .map_err(|e| CoreError::Custom(format!("invalid signing key: {e}")))?;
        Ok(Self { raw, mac })
    }

    fn sign(&self, payload: &PayloadToSign<'_>) -> Result<String> {
        let mut mac = self.mac.clone();
        mac.update(serde_json::to_string(payload)?.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, payload: &PayloadToSign<'_>, sig: &str) -> bool {
        let Ok(expected) = hex::decode(sig) else {
            return false;
        };
        let Ok(json) = serde_json::to_string(payload) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(json.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

/// Signed snapshot of the balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceToken {
    pub user: String,
    pub balance: u64,
    /// Issue time, epoch seconds.
    pub ts: i64,
    /// Expiry, epoch seconds.
    pub exp: i64,
    pub nonce: String,
    pub sig: String,
}

#[derive(Serialize)]
struct PayloadToSign<'a> {
    user: &'a str,
    balance: u64,
    ts: i64,
    exp: i64,
    nonce: &'a str,
}

impl BalanceToken {
    pub fn issue(key: &SigningKey, balance: u64, now_secs: i64, ttl_secs: u64) -> Result<Self> {
        let mut bytes = [0u8; 8];
        fill_random(&mut bytes)?;
        let nonce = format!(
            "{}-{}",
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])
        );
        let exp = now_secs.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
        let user = "local".to_string();
        let sig = key.sign(&PayloadToSign {
            user: &user,
            balance,
            ts: now_secs,
            exp,
            nonce: &nonce,
        })?;
        Ok(Self {
            user,
            balance,
            ts: now_secs,
            exp,
            nonce,
            sig,
        })
    }

    /// Whether the signature matches the payload under `key`.
    pub fn verify(&self, key: &SigningKey) -> bool {
        key.verify(&self.payload(), &self.sig)
    }

    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.exp < now_secs
    }

    /// Valid signature, not expired, and bound to `balance`.
    pub fn is_current(&self, key: &SigningKey, balance: u64, now_secs: i64) -> bool {
        self.balance == balance && !self.is_expired(now_secs) && self.verify(key)
    }

    fn payload(&self) -> PayloadToSign<'_> {
        PayloadToSign {
            user: &self.user,
            balance: self.balance,
            ts: self.ts,
            exp: self.exp,
            nonce: &self.nonce,
        }
    }
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| CoreError::Custom(format!("entropy unavailable: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let key = SigningKey::generate().unwrap();
        let tok = BalanceToken::issue(&key, 42, 1_000, 180).unwrap();
        assert_eq!(tok.exp, 1_180);
        assert_eq!(tok.user, "local");
        assert!(tok.verify(&key));
        assert!(tok.is_current(&key, 42, 1_100));
        assert!(!tok.is_current(&key, 41, 1_100));
    }

    #[test]
    fn tampered_balance_fails_verification() {
        let key = SigningKey::generate().unwrap();
        let mut tok = BalanceToken::issue(&key, 10, 1_000, 180).unwrap();
        tok.balance = 10_000;
        assert!(!tok.verify(&key));
        tok.balance = 10;
        tok.sig = "zz".into();
        assert!(!tok.verify(&key));
    }

    #[test]
    fn other_key_fails_verification() {
        let a = SigningKey::generate().unwrap();
        let b = SigningKey::generate().unwrap();
        let tok = BalanceToken::issue(&a, 5, 0, 180).unwrap();
        assert!(!tok.verify(&b));
    }

    #[test]
    fn expiry_is_exclusive() {
        let key = SigningKey::generate().unwrap();
        let tok = BalanceToken::issue(&key, 1, 0, 180).unwrap();
        assert!(!tok.is_expired(180));
        assert!(tok.is_expired(181));
    }

    #[test]
    fn key_survives_b64_round_trip() {
        let key = SigningKey::generate().unwrap();
        let restored = SigningKey::from_b64(&key.to_b64()).unwrap();
        let tok = BalanceToken::issue(&key, 3, 0, 60).unwrap();
        assert!(tok.verify(&restored));
        assert!(SigningKey::from_b64("not base64!").is_err());
        assert_eq!(format!("{key:?}"), "SigningKey(..)");
    }

    #[test]
    fn nonces_differ() {
        let key = SigningKey::generate().unwrap();
        let a = BalanceToken::issue(&key, 1, 0, 60).unwrap();
        let b = BalanceToken::issue(&key, 1, 0, 60).unwrap();
        assert_ne!(a.nonce, b.nonce);
    }
}
