//! Lockout lifecycle: warning, lock, expiry and persistence across restarts.

mod helpers;

use std::time::Duration;

use access_guard::lockout::{account_key, LockoutConfig, LockoutTracker};
use access_guard::{AccessDecision, AccessError, AccessGuard, Config, LockoutState};
use chrono::{TimeZone, Utc};

use helpers::{engine_with_rules, offline_config};

fn fifteen_minute_config() -> LockoutConfig {
    LockoutConfig {
        threshold: 3,
        window: Duration::from_secs(15 * 60),
        duration: Duration::from_secs(30 * 60),
    }
}

#[tokio::test]
async fn test_three_failures_in_window_lock_the_account() {
    let tracker = LockoutTracker::new(fifteen_minute_config());
    let key = account_key("Admin");
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

    let state = tracker.record_failure_at(&key, t0).await;
    assert_eq!(
        state,
        LockoutState::Warning {
            failures: 1,
            remaining: 2
        }
    );
    tracker
        .record_failure_at(&key, t0 + chrono::Duration::minutes(5))
        .await;
    let state = tracker
        .record_failure_at(&key, t0 + chrono::Duration::minutes(10))
        .await;

    let expected_until = t0 + chrono::Duration::minutes(40);
    assert_eq!(
        state,
        LockoutState::Locked {
            failures: 3,
            locked_until: expected_until
        }
    );

    // Further failures while locked neither count nor extend the lock
    let state = tracker
        .record_failure_at(&key, t0 + chrono::Duration::minutes(20))
        .await;
    assert_eq!(
        state,
        LockoutState::Locked {
            failures: 3,
            locked_until: expected_until
        }
    );

    // Lock lifts at locked_until
    let state = tracker.check_state_at(&key, expected_until).await;
    assert_eq!(state, LockoutState::Clear);
}

#[tokio::test]
async fn test_default_duration_clears_fifteen_minutes_after_lock() {
    let tracker = LockoutTracker::new(LockoutConfig {
        threshold: 3,
        window: Duration::from_secs(15 * 60),
        ..LockoutConfig::default()
    });
    let key = account_key("admin");
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let at = |minutes| t0 + chrono::Duration::minutes(minutes);

    let mut previous = 0;
    for minute in [0, 5, 10] {
        let state = tracker.record_failure_at(&key, at(minute)).await;
        let failures = match state {
            LockoutState::Warning { failures, .. } | LockoutState::Locked { failures, .. } => {
                failures
            }
            LockoutState::Clear => panic!("failure left the key clear"),
        };
        assert!(failures > previous, "count went from {} to {}", previous, failures);
        previous = failures;
    }
    assert!(tracker.check_state_at(&key, at(10)).await.is_locked());

    // 4th attempt rejected without counting
    let state = tracker.record_failure_at(&key, at(12)).await;
    assert!(matches!(state, LockoutState::Locked { failures: 3, .. }));

    assert!(tracker.check_state_at(&key, at(24)).await.is_locked());
    assert_eq!(tracker.check_state_at(&key, at(25)).await, LockoutState::Clear);
}

#[tokio::test]
async fn test_failures_spread_beyond_window_do_not_lock() {
    let tracker = LockoutTracker::new(fifteen_minute_config());
    let key = account_key("admin");
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

    tracker.record_failure_at(&key, t0).await;
    tracker
        .record_failure_at(&key, t0 + chrono::Duration::minutes(10))
        .await;
    // Window expired: counting restarts at 1
    let state = tracker
        .record_failure_at(&key, t0 + chrono::Duration::minutes(16))
        .await;
    assert_eq!(
        state,
        LockoutState::Warning {
            failures: 1,
            remaining: 2
        }
    );
}

#[tokio::test]
async fn test_engine_denies_locked_account_and_challenges_warned_one() {
    let config = Config {
        lockout: fifteen_minute_config(),
        ..offline_config()
    };
    let engine = engine_with_rules(config, Vec::new());
    let ip = "203.0.113.10".parse().unwrap();

    engine
        .record_authentication(ip, Some("admin"), false)
        .await
        .unwrap();
    let verdict = engine.evaluate_request(ip, Some("admin")).await;
    assert_eq!(verdict.decision, AccessDecision::Challenge);

    engine
        .record_authentication(ip, Some("admin"), false)
        .await
        .unwrap();
    let state = engine
        .record_authentication(ip, Some("admin"), false)
        .await
        .unwrap();
    assert!(state.is_locked());

    let verdict = engine.evaluate_request(ip, Some("admin")).await;
    assert_eq!(verdict.decision, AccessDecision::Deny);
    assert!(verdict.lockout.is_locked());

    // A fourth attempt is rejected outright
    let err = engine
        .record_authentication(ip, Some("admin"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::LockoutExceeded { .. }));

    // The same account from another address is still locked
    let other_ip = "203.0.113.77".parse().unwrap();
    let verdict = engine.evaluate_request(other_ip, Some("ADMIN")).await;
    assert_eq!(verdict.decision, AccessDecision::Deny);
}

#[tokio::test]
async fn test_success_resets_counter() {
    let config = Config {
        lockout: fifteen_minute_config(),
        ..offline_config()
    };
    let engine = engine_with_rules(config, Vec::new());
    let ip = "203.0.113.10".parse().unwrap();

    for _ in 0..2 {
        engine
            .record_authentication(ip, Some("admin"), false)
            .await
            .unwrap();
    }
    engine
        .record_authentication(ip, Some("admin"), true)
        .await
        .unwrap();

    let verdict = engine.evaluate_request(ip, Some("admin")).await;
    assert_eq!(verdict.decision, AccessDecision::Allow);
    assert_eq!(verdict.lockout, LockoutState::Clear);
}

#[tokio::test]
async fn test_lock_survives_restart_with_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = || Config {
        lockout: fifteen_minute_config(),
        lockout_db_path: Some(dir.path().join("lockouts.db")),
        cache_dir: dir.path().join("cache"),
        ..offline_config()
    };
    let ip = "198.51.100.20".parse().unwrap();

    {
        let guard = AccessGuard::build(config()).await.unwrap();
        for _ in 0..3 {
            guard
                .engine
                .record_authentication(ip, Some("root"), false)
                .await
                .unwrap();
        }
    }

    let guard = AccessGuard::build(config()).await.unwrap();
    let state = guard.engine.tracker().check_state(&account_key("root")).await;
    assert!(state.is_locked(), "lock lost across restart: {:?}", state);
}
