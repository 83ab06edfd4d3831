use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ulid::Ulid;

use houndz::compactor;
use houndz::config::Config;
use houndz::engine::{Engine, EngineError, Reference, StatusPolicy};
use houndz::model::{BookingInput, BookingPatch, BookingStatus, Stay};

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("houndz_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config_for(dir: &PathBuf, pairs: &[(&str, &str)]) -> Config {
    let dir = dir.display().to_string();
    Config::from_lookup(|key| {
        if key == "HOUNDZ_DATA_DIR" {
            return Some(dir.clone());
        }
        pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    })
}

fn open(config: &Config) -> Engine {
    Engine::new(config.wal_path(), config.engine_options()).unwrap()
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn front_desk_day() {
    let dir = data_dir();
    let config = config_for(&dir, &[]);
    let engine = open(&config);

    let s1 = engine.create_suite("Suite 1", "near the yard").await.unwrap();
    let s2 = engine.create_suite("Suite 2", "").await.unwrap();
    let buddy = engine.register_pet("Buddy").await.unwrap();
    let rex = engine.register_pet("Rex").await.unwrap();

    // Buddy arrives for the weekend.
    let stay = engine
        .propose_booking(
            BookingInput::new(s1.id, buddy.id, date("2024-03-01"), date("2024-03-03")),
            None,
        )
        .await
        .unwrap();

    // Rex wants the same suite over the same weekend; the desk looks for options.
    let wanted = Stay::new(date("2024-03-02"), date("2024-03-04")).unwrap();
    let blocking = engine.find_conflicts(s1.id, wanted, None).await.unwrap();
    assert_eq!(blocking.len(), 1);
    assert_eq!(blocking[0].id, stay.id);
    assert!(engine.is_available(s2.id, wanted, None).await.unwrap());

    let rex_stay = engine
        .propose_booking(
            BookingInput::new(s2.id, rex.id, wanted.start, wanted.end),
            None,
        )
        .await
        .unwrap();

    // Check-in, bath, occupancy board.
    engine.set_status(stay.id, BookingStatus::CheckedIn).await.unwrap();
    engine.set_status(rex_stay.id, BookingStatus::CheckedIn).await.unwrap();
    engine
        .amend_booking(
            stay.id,
            BookingPatch {
                bathed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let board = engine.list_active_bookings(date("2024-03-02")).await;
    assert_eq!(
        board.iter().map(|b| b.pet_id).collect::<Vec<_>>(),
        vec![buddy.id, rex.id]
    );
    assert!(board[0].bathed);

    // Buddy goes home early; Suite 1 opens up for a walk-in on the 3rd.
    engine.set_status(stay.id, BookingStatus::CheckedOut).await.unwrap();
    let walk_in = engine
        .propose_booking(
            BookingInput::new(s1.id, rex.id, date("2024-03-03"), date("2024-03-03"))
                .with_status(BookingStatus::CheckedIn),
            None,
        )
        .await;
    assert!(walk_in.is_ok());
}

#[tokio::test]
async fn state_survives_restart_and_compaction() {
    let dir = data_dir();
    let config = config_for(&dir, &[("HOUNDZ_COMPACT_THRESHOLD", "5")]);

    let (suite_id, booking_id) = {
        let engine = open(&config);
        let suite = engine.create_suite("Suite 1", "").await.unwrap();
        let pet = engine.register_pet("Buddy").await.unwrap();
        let booking = engine
            .propose_booking(
                BookingInput::new(suite.id, pet.id, date("2024-05-10"), date("2024-05-14")),
                None,
            )
            .await
            .unwrap();
        for status in [BookingStatus::CheckedIn, BookingStatus::CheckedOut, BookingStatus::CheckedIn] {
            engine.set_status(booking.id, status).await.unwrap();
        }
        assert!(compactor::compact_if_due(&engine, config.compact_threshold).await);
        (suite.id, booking.id)
    };

    let engine = open(&config);
    let restored = engine.get_booking(booking_id).await.unwrap();
    assert_eq!(restored.status, BookingStatus::CheckedIn);
    assert_eq!(restored.suite_id, suite_id);

    let other = engine.register_pet("Rex").await.unwrap();
    let clash = engine
        .propose_booking(
            BookingInput::new(suite_id, other.id, date("2024-05-12"), date("2024-05-20")),
            None,
        )
        .await;
    assert_eq!(
        clash,
        Err(EngineError::SuiteConflict {
            suite_id,
            conflicting: vec![booking_id],
        })
    );
}

#[tokio::test]
async fn forward_policy_from_config() {
    let dir = data_dir();
    let config = config_for(&dir, &[("HOUNDZ_STATUS_POLICY", "Forward")]);
    assert_eq!(config.status_policy, StatusPolicy::Forward);
    let engine = open(&config);

    let suite = engine.create_suite("Suite 1", "").await.unwrap();
    let pet = engine.register_pet("Buddy").await.unwrap();
    let booking = engine
        .propose_booking(
            BookingInput::new(suite.id, pet.id, date("2024-06-01"), date("2024-06-02"))
                .with_status(BookingStatus::CheckedOut),
            None,
        )
        .await
        .unwrap();

    let err = engine
        .set_status(booking.id, BookingStatus::Booked)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StatusChangeRejected { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_desks_never_double_book() {
    let dir = data_dir();
    let config = config_for(&dir, &[("HOUNDZ_LOCK_TIMEOUT_MS", "5000")]);
    assert_eq!(config.lock_timeout, Duration::from_millis(5000));
    let engine = Arc::new(open(&config));

    let suite = engine.create_suite("Suite 1", "").await.unwrap();
    let mut pets = Vec::new();
    for i in 0..8 {
        pets.push(engine.register_pet(&format!("Pet {i}")).await.unwrap().id);
    }

    // Every desk tries a week that overlaps every other desk's week.
    let mut handles = Vec::new();
    for (i, pet) in pets.into_iter().enumerate() {
        let engine = engine.clone();
        let start = date("2024-07-01") + chrono::Days::new(i as u64 % 4);
        handles.push(tokio::spawn(async move {
            engine
                .propose_booking(
                    BookingInput::new(suite.id, pet, start, start + chrono::Days::new(7)),
                    None,
                )
                .await
        }));
    }

    let mut admitted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(EngineError::SuiteConflict { suite_id, conflicting }) => {
                assert_eq!(suite_id, suite.id);
                assert_eq!(conflicting.len(), 1);
            }
            Err(other) => panic!("unexpected: {other}"),
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn unknown_booking_update_is_rejected() {
    let dir = data_dir();
    let engine = open(&config_for(&dir, &[]));
    let suite = engine.create_suite("Suite 1", "").await.unwrap();
    let pet = engine.register_pet("Buddy").await.unwrap();
    let ghost = Ulid::new();

    let result = engine
        .propose_booking(
            BookingInput::new(suite.id, pet.id, date("2024-01-01"), date("2024-01-02")),
            Some(ghost),
        )
        .await;
    assert_eq!(result, Err(EngineError::UnknownReference(Reference::Booking(ghost))));
    assert!(engine.list_bookings().await.is_empty());
}

#[tokio::test]
async fn bookings_serialize_for_clients() {
    let dir = data_dir();
    let engine = open(&config_for(&dir, &[]));
    let suite = engine.create_suite("Suite 1", "").await.unwrap();
    let pet = engine.register_pet("Buddy").await.unwrap();
    let booking = engine
        .propose_booking(
            BookingInput::new(suite.id, pet.id, date("2024-02-10"), date("2024-02-12"))
                .with_status(BookingStatus::CheckedIn),
            None,
        )
        .await
        .unwrap();

    let json: serde_json::Value = serde_json::to_value(&booking).unwrap();
    assert_eq!(json["start_date"], "2024-02-10");
    assert_eq!(json["end_date"], "2024-02-12");
    assert_eq!(json["status"], "checked-in");

    let input: BookingInput = serde_json::from_value(serde_json::json!({
        "suite_id": suite.id.to_string(),
        "pet_id": pet.id.to_string(),
        "start_date": "2024-02-12",
        "end_date": "2024-02-13",
    }))
    .unwrap();
    assert_eq!(input.status, BookingStatus::Booked);
    let err = engine.propose_booking(input, None).await.unwrap_err();
    assert!(matches!(err, EngineError::SuiteConflict { .. }));
}
