use chrono::Utc;

use super::Database;
use crate::models::{
    DaemonState, GateState, PublisherConfig, PushKind, PushRecord, RetryState, Settings, Stage,
};
use crate::store::StateStore;

#[test]
fn test_settings_defaults_created_on_first_access() {
    let db = Database::open_in_memory().unwrap();
    let settings = db.get_settings().unwrap();
    assert_eq!(settings, Settings::default_settings());
    assert_eq!(settings.push_threshold, 5);
    assert_eq!(settings.backoff_tiers_secs, vec![30, 120, 300]);
}

#[test]
fn test_update_setting_from_text() {
    let db = Database::open_in_memory().unwrap();

    let updated = db.update_setting("push_threshold", "10").unwrap();
    assert_eq!(updated.push_threshold, 10);

    db.update_setting("backoff_tiers", "5, 10,20").unwrap();
    db.update_setting("auto_push", "on").unwrap();

    let settings = db.get_settings().unwrap();
    assert_eq!(settings.push_threshold, 10);
    assert_eq!(settings.backoff_tiers_secs, vec![5, 10, 20]);
    assert!(settings.auto_push);
}

#[test]
fn test_update_setting_rejects_bad_input() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.update_setting("push_threshold", "0").is_err());
    assert!(db.update_setting("push_threshold", "many").is_err());
    assert!(db.update_setting("no_such_key", "1").is_err());
    assert!(db.update_setting("auto_push", "maybe").is_err());

    // A failed update leaves the stored value alone
    assert_eq!(db.get_settings().unwrap().push_threshold, 5);
}

#[test]
fn test_publisher_config_upsert() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.get_publisher_config().unwrap().is_none());

    let mut config = PublisherConfig::new(
        "https://datasets.example.test".to_string(),
        "me/sessions".to_string(),
        "key-1".to_string(),
    );
    db.upsert_publisher_config(&config).unwrap();

    config.api_key = "key-2".to_string();
    db.upsert_publisher_config(&config).unwrap();

    let stored = db.get_publisher_config().unwrap().unwrap();
    assert_eq!(stored.api_key, "key-2");
    assert_eq!(stored.repo, "me/sessions");
}

#[test]
fn test_gate_state_round_trip_through_store() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.load_gate_state().unwrap().stage, Stage::Unconfigured);

    let mut state = GateState {
        stage: Stage::Exported,
        current_fingerprint: Some("abc".to_string()),
        ..GateState::default()
    };
    state.redact_strings.insert("acme".to_string());
    db.replace_gate_state(&state).unwrap();

    let loaded = db.load_gate_state().unwrap();
    assert_eq!(loaded.stage, Stage::Exported);
    assert_eq!(loaded.current_fingerprint.as_deref(), Some("abc"));
    assert!(loaded.redact_strings.contains("acme"));
    assert!(loaded.updated_at.is_some());
}

#[test]
fn test_daemon_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codeclaw.db");

    {
        let db = Database::open(&path).unwrap();
        let mut state = DaemonState {
            running: true,
            ..DaemonState::default()
        };
        state.retries.insert(
            "hub".to_string(),
            RetryState {
                attempts: 2,
                next_attempt_at: Some(Utc::now()),
                halted: false,
                last_error: Some("503".to_string()),
            },
        );
        db.replace_daemon_state(&state).unwrap();
    }

    let db = Database::open(&path).unwrap();
    let state = db.load_daemon_state().unwrap();
    assert!(state.running);
    assert_eq!(state.retry_for("hub").attempts, 2);
    assert_eq!(state.retry_for("other").attempts, 0);
}

#[test]
fn test_push_history_newest_first() {
    let db = Database::open_in_memory().unwrap();
    let earlier = Utc::now() - chrono::Duration::minutes(5);

    db.record_push(&PushRecord {
        fingerprint: "old".to_string(),
        kind: PushKind::Manual,
        destination: "hub".to_string(),
        sessions: 3,
        pushed_at: earlier,
    })
    .unwrap();
    db.record_push(&PushRecord {
        fingerprint: "new".to_string(),
        kind: PushKind::Automatic,
        destination: "hub".to_string(),
        sessions: 5,
        pushed_at: Utc::now(),
    })
    .unwrap();

    let pushes = db.get_recent_pushes(10).unwrap();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].fingerprint, "new");
    assert_eq!(pushes[0].kind, PushKind::Automatic);
    assert_eq!(pushes[1].sessions, 3);
}

#[test]
fn test_update_state_aborts_without_writing() {
    let db = Database::open_in_memory().unwrap();
    let written = db
        .update_gate_state(&mut |state| {
            let mut next = state.clone();
            next.current_fingerprint = Some("abc".to_string());
            Some(next)
        })
        .unwrap();
    assert!(written.unwrap().updated_at.is_some());

    let aborted = db.update_gate_state(&mut |_| None).unwrap();
    assert!(aborted.is_none());
    assert_eq!(
        db.load_gate_state().unwrap().current_fingerprint.as_deref(),
        Some("abc")
    );
}

#[test]
fn test_push_lease_excludes_second_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codeclaw.db");
    let daemon = Database::open(&path).unwrap();
    let cli = Database::open(&path).unwrap();
    let ttl = chrono::Duration::minutes(5);

    assert!(daemon.try_acquire_push_lease("daemon", ttl).unwrap());
    assert!(daemon.try_acquire_push_lease("daemon", ttl).unwrap());
    assert!(!cli.try_acquire_push_lease("cli", ttl).unwrap());

    // Releasing someone else's lease is a no-op
    cli.release_push_lease("cli").unwrap();
    assert!(!cli.try_acquire_push_lease("cli", ttl).unwrap());

    daemon.release_push_lease("daemon").unwrap();
    assert!(cli.try_acquire_push_lease("cli", ttl).unwrap());
}

#[test]
fn test_expired_lease_can_be_taken_over() {
    let db = Database::open_in_memory().unwrap();
    assert!(db
        .try_acquire_lease("push", "crashed", chrono::Duration::seconds(-1))
        .unwrap());
    assert!(db
        .try_acquire_lease("push", "daemon", chrono::Duration::minutes(5))
        .unwrap());
    assert!(!db.release_lease("push", "crashed").unwrap());
    assert!(db.release_lease("push", "daemon").unwrap());
}

#[test]
fn test_encrypt_artifacts_setting() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.get_settings().unwrap().encrypt_artifacts);
    let updated = db.update_setting("encrypt_artifacts", "off").unwrap();
    assert!(!updated.encrypt_artifacts);
    assert!(!db.get_settings().unwrap().encrypt_artifacts);
}
