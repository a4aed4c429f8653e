// UPGRADE MODE INTEGRATION TESTS
// End-to-end upgrade windows driven by a manual clock
//
// Test Coverage:
// 1. Activate → finalize → finish lifecycle
// 2. Forced cancellation at the max period deadline
// 3. Cancel and finish without finalize status
// 4. Finalize policy variants
// 5. Snapshot persistence and restore
// 6. Concurrent activation race

use bleep_upgrade_mode::{
    Identity, ManualClock, RecordingEventSink, UpgradeEvent, UpgradeMode, UpgradeModeConfig,
    UpgradeModeError, UpgradeProcess,
};
use std::sync::{Arc, Barrier};
use std::thread;

struct Harness {
    mode: Arc<UpgradeMode>,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingEventSink>,
}

fn master() -> Identity {
    Identity::from_hex("0x5409ed021d9299bf6814279a6a1411a7e866a631").unwrap()
}

fn wallet2() -> Identity {
    Identity::from_hex("0x6ecbe1db9ef729cbe972c83fb886247691fb6beb").unwrap()
}

fn harness(config: UpgradeModeConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(0));
    let sink = Arc::new(RecordingEventSink::new());
    let mode = UpgradeMode::new(config, master(), clock.clone(), sink.clone()).unwrap();
    Harness {
        mode: Arc::new(mode),
        clock,
        sink,
    }
}

fn periods() -> UpgradeModeConfig {
    UpgradeModeConfig::new(100, 500).unwrap()
}

#[test_log::test]
fn test_01_requires_master_for_privileged_calls() {
    let h = harness(periods());
    let other = wallet2();

    assert_eq!(h.mode.activate(&other), Err(UpgradeModeError::Unauthorized));
    assert_eq!(h.mode.cancel(&other), Err(UpgradeModeError::Unauthorized));
    assert!(!h.mode.check_finalize(&other));
    assert_eq!(h.mode.force_cancel(&other), Err(UpgradeModeError::Unauthorized));
    assert_eq!(h.mode.finish(&other), Err(UpgradeModeError::Unauthorized));

    assert!(!h.mode.is_active());
    assert!(h.sink.is_empty());
}

#[test_log::test]
fn test_02_cancel_and_finish_without_finalize() {
    let h = harness(periods());

    assert_eq!(h.mode.activate(&master()), Ok(1));
    assert_eq!(h.sink.last(), Some(UpgradeEvent::UpgradeModeActivated(1)));
    assert!(h.mode.is_active());
    assert!(!h.mode.check_finalize(&master()));
    assert!(!h.mode.is_finalize_active());

    assert_eq!(h.mode.activate(&master()), Err(UpgradeModeError::AlreadyActive));

    assert_eq!(h.mode.cancel(&master()), Ok(1));
    assert_eq!(h.sink.last(), Some(UpgradeEvent::UpgradeCanceled(1)));
    assert!(!h.mode.is_active());

    assert_eq!(h.mode.cancel(&master()), Err(UpgradeModeError::NotActive));
    assert_eq!(h.mode.finish(&master()), Err(UpgradeModeError::FinalizeNotReached));
}

#[test_log::test]
fn test_03_full_upgrade_lifecycle() {
    let h = harness(periods());

    assert_eq!(h.mode.activate(&master()), Ok(1));
    assert!(h.mode.is_active());

    h.clock.set(50);
    assert!(!h.mode.check_finalize(&wallet2()));
    assert!(!h.mode.is_finalize_active());
    assert_eq!(h.sink.len(), 1);

    h.clock.set(100);
    assert!(h.mode.check_finalize(&wallet2()));
    assert!(h.mode.is_finalize_active());
    assert_eq!(
        h.sink.last(),
        Some(UpgradeEvent::UpgradeModeFinalizeStatusActivated(1))
    );

    assert_eq!(h.mode.finish(&master()), Ok(1));
    assert!(!h.mode.is_active());
    assert!(!h.mode.is_finalize_active());
    assert_eq!(h.mode.activated_at(), None);

    assert_eq!(
        h.sink.take(),
        vec![
            UpgradeEvent::UpgradeModeActivated(1),
            UpgradeEvent::UpgradeModeFinalizeStatusActivated(1),
            UpgradeEvent::UpgradeCompleted(1),
        ]
    );

    assert_eq!(h.mode.activate(&master()), Ok(2));
    assert_eq!(h.mode.cancel(&master()), Ok(2));
    assert_eq!(
        h.sink.take(),
        vec![
            UpgradeEvent::UpgradeModeActivated(2),
            UpgradeEvent::UpgradeCanceled(2),
        ]
    );
    println!("✓ Upgrade lifecycle completed for versions 1 and 2");
}

#[test_log::test]
fn test_04_force_cancel_at_deadline() {
    let snapshot = UpgradeProcess::from_json(r#"{"version": 1, "status": "idle"}"#).unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let sink = Arc::new(RecordingEventSink::new());
    let mode =
        UpgradeMode::restore(periods(), master(), clock.clone(), sink.clone(), snapshot).unwrap();

    assert_eq!(mode.activate(&master()), Ok(2));

    for t in [50, 100, 250, 400, 499] {
        clock.set(t);
        assert_eq!(
            mode.force_cancel(&master()),
            Err(UpgradeModeError::DeadlineNotReached),
            "force cancel must be rejected at t={}",
            t
        );
        assert!(mode.is_active());
    }

    clock.set(500);
    assert_eq!(mode.force_cancel(&master()), Ok(2));
    assert!(!mode.is_active());
    assert_eq!(sink.last(), Some(UpgradeEvent::UpgradeForciblyCanceled(2)));

    assert_eq!(mode.force_cancel(&master()), Err(UpgradeModeError::NotActive));
    assert_eq!(mode.current_version(), 2);
}

#[test_log::test]
fn test_05_force_cancel_after_finalize_follows_policy() {
    let allowed = harness(periods());
    allowed.mode.activate(&master()).unwrap();
    allowed.clock.set(100);
    assert!(allowed.mode.check_finalize(&master()));
    allowed.clock.set(500);
    assert_eq!(allowed.mode.force_cancel(&master()), Ok(1));
    assert!(!allowed.mode.is_finalize_active());

    let denied = harness(periods().with_force_cancel_after_finalize(false));
    denied.mode.activate(&master()).unwrap();
    denied.clock.set(100);
    assert!(denied.mode.check_finalize(&master()));
    denied.clock.set(10_000);
    assert_eq!(
        denied.mode.force_cancel(&master()),
        Err(UpgradeModeError::AlreadyFinalized)
    );
    assert!(denied.mode.is_finalize_active());
    assert_eq!(denied.mode.finish(&master()), Ok(1));
}

#[test_log::test]
fn test_06_cancel_after_finalize_follows_policy() {
    let allowed = harness(periods());
    allowed.mode.activate(&master()).unwrap();
    allowed.clock.set(100);
    assert!(allowed.mode.check_finalize(&master()));
    assert_eq!(allowed.mode.cancel(&master()), Ok(1));
    assert_eq!(allowed.sink.last(), Some(UpgradeEvent::UpgradeCanceled(1)));

    let denied = harness(periods().with_cancel_after_finalize(false));
    denied.mode.activate(&master()).unwrap();
    assert_eq!(denied.mode.cancel(&master()), Ok(1));
    denied.mode.activate(&master()).unwrap();
    denied.clock.set(100);
    assert!(denied.mode.check_finalize(&master()));
    assert_eq!(
        denied.mode.cancel(&master()),
        Err(UpgradeModeError::AlreadyFinalized)
    );
}

#[test_log::test]
fn test_07_snapshot_restore_resumes_window() {
    let h = harness(periods());
    h.clock.set(1_000);
    h.mode.activate(&master()).unwrap();

    let json = h.mode.snapshot().to_json().unwrap();
    let restored_process = UpgradeProcess::from_json(&json).unwrap();

    let clock = Arc::new(ManualClock::new(1_050));
    let sink = Arc::new(RecordingEventSink::new());
    let restored = UpgradeMode::restore(
        periods(),
        master(),
        clock.clone(),
        sink.clone(),
        restored_process,
    )
    .unwrap();

    assert!(restored.is_active());
    assert_eq!(restored.activated_at(), Some(1_000));
    assert!(!restored.check_finalize(&wallet2()));

    clock.set(1_100);
    assert!(restored.check_finalize(&wallet2()));
    assert_eq!(restored.finish(&master()), Ok(1));
    assert_eq!(
        sink.events(),
        vec![
            UpgradeEvent::UpgradeModeFinalizeStatusActivated(1),
            UpgradeEvent::UpgradeCompleted(1),
        ]
    );
}

#[test_log::test]
fn test_08_concurrent_activation_has_single_winner() {
    const THREADS: usize = 8;
    let h = harness(periods());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let mode = Arc::clone(&h.mode);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                mode.activate(&master())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| **r == Err(UpgradeModeError::AlreadyActive))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(losers, THREADS - 1);
    assert_eq!(h.mode.current_version(), 1);
    assert_eq!(h.sink.events(), vec![UpgradeEvent::UpgradeModeActivated(1)]);
}

#[test_log::test]
fn test_09_close_race_leaves_consistent_state() {
    let h = harness(periods());
    h.mode.activate(&master()).unwrap();
    h.clock.set(500);
    assert!(h.mode.check_finalize(&master()));

    let barrier = Arc::new(Barrier::new(3));
    let ops: Vec<fn(&UpgradeMode, &Identity) -> Result<u64, UpgradeModeError>> = vec![
        UpgradeMode::finish,
        UpgradeMode::cancel,
        UpgradeMode::force_cancel,
    ];

    let handles: Vec<_> = ops
        .into_iter()
        .map(|op| {
            let mode = Arc::clone(&h.mode);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                op(&mode, &master())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(!h.mode.is_active());
    assert!(!h.mode.is_finalize_active());
    assert_eq!(h.sink.len(), 3);
}
