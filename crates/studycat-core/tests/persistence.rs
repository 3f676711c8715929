//! Timer state across process restarts on the SQLite store.

use std::sync::Arc;

use studycat_core::timer::TIMER_STATE_KEY;
use studycat_core::{Config, Database, KvStore, ManualClock, Phase, Runtime, SharedClock};
use tempfile::TempDir;

// 2024-03-14T10:00:00Z
const T0: i64 = 1_710_410_400_000;

fn open(dir: &TempDir, clock: &ManualClock) -> Runtime {
    let mut config = Config::default();
    config.timer.utc_offset_minutes = Some(0);
    let db = Arc::new(Database::open_at(&dir.path().join("studycat.db")).unwrap());
    let shared: SharedClock = Arc::new(clock.clone());
    Runtime::start(config, db, shared).unwrap()
}

#[tokio::test]
async fn test_running_session_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(T0);
    {
        let rt = open(&dir, &clock);
        rt.timer().start(Some("Geometry")).await.unwrap();
        rt.shutdown();
    }

    clock.advance(20 * 60_000);
    let rt = open(&dir, &clock);
    let snap = rt.settle_on_startup().await.unwrap();
    assert_eq!(snap.state.phase(), Phase::Running);
    assert_eq!(snap.state.start_timestamp, T0);
    assert!(rt.heartbeat().is_active());

    let snap = rt.timer().stop().await.unwrap();
    assert_eq!(snap.state.logs.len(), 1);
    assert_eq!(snap.state.logs[0].seconds, 1200);
    assert_eq!(snap.state.logs[0].task, "Geometry");
    // 20 min * 0.10
    assert_eq!(rt.ledger().get().await.unwrap(), 2);
}

#[tokio::test]
async fn test_missing_record_synthesizes_defaults_lazily() {
    let dir = TempDir::new().unwrap();
    let rt = open(&dir, &ManualClock::new(T0));
    let state = rt.timer().get_state().await.unwrap();
    assert_eq!(state.phase(), Phase::Idle);

    let db = Database::open_at(&dir.path().join("studycat.db")).unwrap();
    assert!(db.get(TIMER_STATE_KEY).unwrap().is_none());
}

#[tokio::test]
async fn test_paused_session_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(T0);
    {
        let rt = open(&dir, &clock);
        rt.timer().start(None).await.unwrap();
        clock.advance(45_000);
        rt.timer().pause().await.unwrap();
    }

    clock.advance(60 * 60_000);
    let rt = open(&dir, &clock);
    rt.timer().start(None).await.unwrap();
    clock.advance(15_000);
    let snap = rt.timer().stop().await.unwrap();
    assert_eq!(snap.state.logs[0].seconds, 60);
}
