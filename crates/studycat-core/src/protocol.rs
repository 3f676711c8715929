//! JSON message contract between UI surfaces and the background runtime.
//!
//! Requests are tagged by `type`:
//!
//! ```json
//! {"type": "POINTS_EARN", "delta": 5, "reason": "quiz"}
//! {"type": "TIMER_START", "label": "Calculus"}
//! {"type": "TIMER_SET_STATE", "patch": {"detail": "chapter 4"}}
//! ```
//!
//! Points responses are `{ok, balance}` or `{ok: false, reason, balance?}`.
//! Timer responses carry the merged record under `state`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::LedgerError;
use crate::ledger::{LedgerHandle, PointsUpdated};
use crate::timer::{TimerHandle, TimerPatch, TimerSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    PointsGet,
    PointsEarn {
        #[serde(default = "nan", deserialize_with = "lenient_number")]
        delta: f64,
        #[serde(default)]
        reason: String,
    },
    PointsSpend {
        #[serde(default = "nan", deserialize_with = "lenient_number")]
        cost: f64,
        #[serde(default)]
        reason: String,
    },
    TimerStart {
        #[serde(default)]
        label: Option<String>,
    },
    TimerPause,
    TimerStop,
    TimerGetState,
    TimerSetState {
        #[serde(default)]
        patch: TimerPatch,
    },
    OffscreenStart,
    OffscreenStop,
}

/// Fire-and-forget messages pushed to every surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    PointsUpdated { balance: u64 },
}

impl From<PointsUpdated> for Notification {
    fn from(update: PointsUpdated) -> Self {
        Notification::PointsUpdated {
            balance: update.balance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PointsResponse {
    fn from_result(result: Result<u64, LedgerError>) -> Self {
        match result {
            Ok(balance) => Self {
                ok: true,
                balance: Some(balance),
                reason: None,
            },
            Err(e) => Self {
                ok: false,
                balance: e.balance(),
                reason: Some(e.reason().to_string()),
            },
        }
    }
}

fn nan() -> f64 {
    f64::NAN
}

/// Numbers or numeric strings; anything else becomes NaN and is rejected
/// later as a malformed amount.
fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    })
}

/// Dispatches requests to the ledger and timer services.
#[derive(Debug, Clone)]
pub struct Router {
    ledger: LedgerHandle,
    timer: TimerHandle,
}

impl Router {
    pub fn new(ledger: LedgerHandle, timer: TimerHandle) -> Self {
        Self { ledger, timer }
    }

    /// Decode and handle a raw JSON message.
    pub async fn handle_value(&self, message: Value) -> Value {
        match serde_json::from_value::<Request>(message) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                debug!(error = %e, "undecodable message");
                json!({ "ok": false, "reason": "bad_request", "error": e.to_string() })
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Value {
        match request {
            Request::PointsGet => points(self.ledger.get().await),
            Request::PointsEarn { delta, reason } => {
                points(self.ledger.earn(delta, &reason).await)
            }
            Request::PointsSpend { cost, reason } => {
                points(self.ledger.spend(cost, &reason).await)
            }
            Request::TimerStart { label } => snapshot(self.timer.start(label.as_deref()).await),
            Request::TimerPause => snapshot(self.timer.pause().await),
            Request::TimerStop => snapshot(self.timer.stop().await),
            Request::TimerGetState => match self.timer.get_state().await {
                Ok(state) => json!({ "ok": true, "state": state }),
                Err(e) => timer_error(e),
            },
            Request::TimerSetState { patch } => match self.timer.set_state(patch).await {
                Ok(state) => json!({ "ok": true, "state": state }),
                Err(e) => timer_error(e),
            },
            Request::OffscreenStart => {
                self.timer.heartbeat().start();
                json!({ "ok": true })
            }
            Request::OffscreenStop => {
                self.timer.heartbeat().stop();
                json!({ "ok": true })
            }
        }
    }
}

fn points(result: Result<u64, LedgerError>) -> Value {
    serde_json::to_value(PointsResponse::from_result(result))
        .unwrap_or_else(|e| json!({ "ok": false, "reason": "internal", "error": e.to_string() }))
}

fn snapshot(result: crate::error::Result<TimerSnapshot>) -> Value {
    match result {
        Ok(snap) => json!({ "ok": true, "state": snap.state, "awards": snap.awards }),
        Err(e) => timer_error(e),
    }
}

fn timer_error(e: crate::error::CoreError) -> Value {
    json!({ "ok": false, "reason": "timer", "error": e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tags_are_screaming_snake_case() {
        let req: Request = serde_json::from_value(json!({ "type": "TIMER_GET_STATE" })).unwrap();
        assert_eq!(req, Request::TimerGetState);
        let req: Request =
            serde_json::from_value(json!({ "type": "POINTS_EARN", "delta": 5, "reason": "quiz" }))
                .unwrap();
        assert!(matches!(req, Request::PointsEarn { delta, .. } if delta == 5.0));
        let req: Request = serde_json::from_value(json!({ "type": "OFFSCREEN_START" })).unwrap();
        assert_eq!(req, Request::OffscreenStart);
    }

    #[test]
    fn malformed_amounts_decode_to_nan() {
        for delta in [json!("lots"), json!(null), json!([1])] {
            let req: Request =
                serde_json::from_value(json!({ "type": "POINTS_EARN", "delta": delta })).unwrap();
            assert!(matches!(req, Request::PointsEarn { delta, .. } if delta.is_nan()));
        }
        let req: Request = serde_json::from_value(json!({ "type": "POINTS_SPEND" })).unwrap();
        assert!(matches!(req, Request::PointsSpend { cost, .. } if cost.is_nan()));
        let req: Request =
            serde_json::from_value(json!({ "type": "POINTS_SPEND", "cost": "30" })).unwrap();
        assert!(matches!(req, Request::PointsSpend { cost, .. } if cost == 30.0));
    }

    #[test]
    fn notification_shape() {
        let n = Notification::from(PointsUpdated { balance: 70 });
        assert_eq!(
            serde_json::to_value(n).unwrap(),
            json!({ "type": "POINTS_UPDATED", "balance": 70 })
        );
    }

    #[test]
    fn rejection_echoes_balance() {
        let v = points(Err(LedgerError::Insufficient {
            balance: 70,
            cost: 100,
        }));
        assert_eq!(v, json!({ "ok": false, "reason": "insufficient", "balance": 70 }));
        assert_eq!(
            points(Err(LedgerError::BadDelta)),
            json!({ "ok": false, "reason": "bad_delta" })
        );
        assert_eq!(points(Ok(3)), json!({ "ok": true, "balance": 3 }));
    }
}
