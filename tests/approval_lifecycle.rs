//! Integration tests for the approval lifecycle coordinator.
//!
//! These tests verify:
//! 1. The state machine: Pending is the only non-terminal state, and every
//!    terminal state is final.
//! 2. The deadline check in the resolve path is independent of the sweep.
//! 3. Concurrent resolve/expire callers produce exactly one winner and a
//!    consistent final record.
//!
//! Everything runs against the in-memory store; the CAS contract is the
//! same one the Postgres store implements.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use overseer::approval::{ApprovalCoordinator, CancelOutcome, ExpireOutcome, ResolveOutcome};
use overseer::models::approval::{ApprovalRequest, ApprovalStatus, TIMEOUT_REASON};
use overseer::models::session::SessionStatus;
use overseer::notification::telegram::TelegramNotifier;
use overseer::notification::webhook::ResolutionEvents;
use overseer::sessions::SessionDirectory;
use overseer::store::memory::MemoryStore;
use overseer::store::ApprovalStore;

fn setup() -> (Arc<ApprovalCoordinator>, Arc<MemoryStore>, Arc<SessionDirectory>) {
    let store = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionDirectory::new());
    let coordinator = Arc::new(ApprovalCoordinator::new(
        store.clone(),
        sessions.clone(),
        TelegramNotifier::new(None, None),
        ResolutionEvents::disabled(),
        30,
    ));
    (coordinator, store, sessions)
}

/// Insert a pending record whose deadline is `expires_in` from now
/// (negative = already overdue). Bypasses `create` so tests can simulate
/// the clock instead of waiting it out.
async fn seed_pending(store: &MemoryStore, expires_in: Duration) -> ApprovalRequest {
    let now = Utc::now();
    let record = ApprovalRequest {
        id: Uuid::new_v4(),
        session_id: "sess-seeded".into(),
        agent_id: "agent-seeded".into(),
        status: ApprovalStatus::Pending,
        request_details: serde_json::json!({"command": "cargo publish"}),
        approved_by: None,
        approved_at: None,
        decision_notes: None,
        cancellation_reason: None,
        created_at: now - Duration::minutes(60),
        updated_at: now - Duration::minutes(60),
        expires_at: now + expires_in,
    };
    store.insert(&record).await.unwrap();
    record
}

// ── State machine scenarios ───────────────────────────────────

#[tokio::test]
async fn test_approve_fresh_request() {
    let (coordinator, store, _) = setup();

    let record = coordinator
        .create("sess-1", "agent-1", serde_json::json!({"tool": "shell"}), Some(30))
        .await
        .unwrap();
    assert_eq!(record.status, ApprovalStatus::Pending);

    let outcome = coordinator
        .resolve(record.id, true, "ops@example.com", None)
        .await
        .unwrap();

    let resolved = match outcome {
        ResolveOutcome::Resolved(rec) => rec,
        other => panic!("expected Resolved, got {:?}", other),
    };
    assert_eq!(resolved.status, ApprovalStatus::Approved);
    assert!(resolved.approved_at.is_some());
    assert_eq!(resolved.approved_by.as_deref(), Some("ops@example.com"));
    assert!(resolved.cancellation_reason.is_none());

    let stored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn test_reject_records_notes_but_no_approver() {
    let (coordinator, _, _) = setup();

    let record = coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), None)
        .await
        .unwrap();

    let outcome = coordinator
        .resolve(record.id, false, "ops@example.com", Some("too risky".into()))
        .await
        .unwrap();

    let resolved = match outcome {
        ResolveOutcome::Resolved(rec) => rec,
        other => panic!("expected Resolved, got {:?}", other),
    };
    assert_eq!(resolved.status, ApprovalStatus::Rejected);
    assert!(resolved.approved_by.is_none());
    assert!(resolved.approved_at.is_none());
    assert_eq!(resolved.decision_notes.as_deref(), Some("too risky"));
}

#[tokio::test]
async fn test_resolve_past_deadline_fails_expired_without_sweep() {
    let (coordinator, store, _) = setup();
    let record = seed_pending(&store, Duration::minutes(-2)).await;

    let outcome = coordinator
        .resolve(record.id, true, "ops@example.com", None)
        .await
        .unwrap();
    assert!(matches!(outcome, ResolveOutcome::Expired));

    // The resolve path rejects without mutating; the record stays Pending
    // until the sweep commits the cancellation.
    let stored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Pending);
}

#[tokio::test]
async fn test_resolve_after_manual_cancel_reports_reason() {
    let (coordinator, _, _) = setup();

    let record = coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), None)
        .await
        .unwrap();

    match coordinator.cancel(record.id, "manual").await.unwrap() {
        CancelOutcome::Cancelled(rec) => {
            assert_eq!(rec.status, ApprovalStatus::Cancelled);
            assert_eq!(rec.cancellation_reason.as_deref(), Some("manual"));
        }
        other => panic!("expected Cancelled, got {:?}", other),
    }

    let outcome = coordinator
        .resolve(record.id, true, "ops@example.com", None)
        .await
        .unwrap();
    match outcome {
        ResolveOutcome::AlreadyCancelled { reason } => assert_eq!(reason, "manual"),
        other => panic!("expected AlreadyCancelled, got {:?}", other),
    }
}

#[tokio::test]
async fn test_terminal_state_is_final() {
    let (coordinator, store, _) = setup();

    let record = coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), None)
        .await
        .unwrap();
    coordinator
        .resolve(record.id, true, "ops@example.com", None)
        .await
        .unwrap();

    // Every further mutation attempt bounces off the terminal-state guard.
    assert!(matches!(
        coordinator.resolve(record.id, false, "other", None).await.unwrap(),
        ResolveOutcome::AlreadyResolved {
            status: ApprovalStatus::Approved
        }
    ));
    assert!(matches!(
        coordinator.cancel(record.id, "late cancel").await.unwrap(),
        CancelOutcome::AlreadyTerminal {
            status: ApprovalStatus::Approved
        }
    ));
    assert!(matches!(
        coordinator.expire(record.id).await.unwrap(),
        ExpireOutcome::AlreadyTerminal {
            status: ApprovalStatus::Approved
        }
    ));

    let stored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Approved);
    assert_eq!(stored.approved_by.as_deref(), Some("ops@example.com"));
    assert!(stored.cancellation_reason.is_none());
}

#[tokio::test]
async fn test_expire_is_idempotent() {
    let (coordinator, store, _) = setup();
    let record = seed_pending(&store, Duration::minutes(-1)).await;

    match coordinator.expire(record.id).await.unwrap() {
        ExpireOutcome::Expired(rec) => {
            assert_eq!(rec.status, ApprovalStatus::Cancelled);
            assert_eq!(rec.cancellation_reason.as_deref(), Some(TIMEOUT_REASON));
        }
        other => panic!("expected Expired, got {:?}", other),
    }

    // Second call is a no-op, not an error, and the reason is untouched.
    assert!(matches!(
        coordinator.expire(record.id).await.unwrap(),
        ExpireOutcome::AlreadyTerminal {
            status: ApprovalStatus::Cancelled
        }
    ));
    let stored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.cancellation_reason.as_deref(), Some(TIMEOUT_REASON));
}

#[tokio::test]
async fn test_expire_before_deadline_is_not_applied() {
    let (coordinator, store, _) = setup();
    let record = seed_pending(&store, Duration::minutes(10)).await;

    assert!(matches!(
        coordinator.expire(record.id).await.unwrap(),
        ExpireOutcome::NotYetDue
    ));
    let stored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Pending);
}

// ── Input validation ──────────────────────────────────────────

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let (coordinator, _, _) = setup();

    assert!(coordinator
        .create("", "agent-1", serde_json::json!({}), None)
        .await
        .is_err());
    assert!(coordinator
        .create("sess-1", "  ", serde_json::json!({}), None)
        .await
        .is_err());
    assert!(coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), Some(0))
        .await
        .is_err());
    assert!(coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), Some(1441))
        .await
        .is_err());
}

#[tokio::test]
async fn test_create_applies_default_timeout() {
    let (coordinator, _, _) = setup();

    let record = coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), None)
        .await
        .unwrap();
    let timeout = record.expires_at - record.created_at;
    assert_eq!(timeout, Duration::minutes(30));
}

#[tokio::test]
async fn test_unknown_id_reports_not_found() {
    let (coordinator, _, _) = setup();
    let id = Uuid::new_v4();

    assert!(matches!(
        coordinator.resolve(id, true, "ops", None).await.unwrap(),
        ResolveOutcome::NotFound
    ));
    assert!(matches!(
        coordinator.expire(id).await.unwrap(),
        ExpireOutcome::NotFound
    ));
    assert!(matches!(
        coordinator.cancel(id, "gone").await.unwrap(),
        CancelOutcome::NotFound
    ));
}

// ── Session signalling ────────────────────────────────────────

#[tokio::test]
async fn test_approval_flags_waiting_session_resumable() {
    let (coordinator, _, sessions) = setup();
    sessions.register("sess-1", "agent-1", SessionStatus::AwaitingApproval);

    let record = coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), None)
        .await
        .unwrap();
    coordinator
        .resolve(record.id, true, "ops@example.com", None)
        .await
        .unwrap();

    assert_eq!(sessions.status("sess-1"), Some(SessionStatus::Resumable));
}

#[tokio::test]
async fn test_rejection_leaves_session_untouched() {
    let (coordinator, _, sessions) = setup();
    sessions.register("sess-1", "agent-1", SessionStatus::AwaitingApproval);

    let record = coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), None)
        .await
        .unwrap();
    coordinator
        .resolve(record.id, false, "ops@example.com", None)
        .await
        .unwrap();

    assert_eq!(
        sessions.status("sess-1"),
        Some(SessionStatus::AwaitingApproval)
    );
}

// ── Race properties ───────────────────────────────────────────

/// N concurrent resolves (mixed approve/reject) + M concurrent expires
/// against one fresh, not-yet-expired record: exactly one terminal
/// transition, everything else a guard outcome, final record consistent.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_resolvers_produce_single_winner() {
    let (coordinator, store, _) = setup();

    let record = coordinator
        .create("sess-1", "agent-1", serde_json::json!({}), Some(30))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let coordinator = coordinator.clone();
        let id = record.id;
        handles.push(tokio::spawn(async move {
            let outcome = coordinator
                .resolve(id, i % 2 == 0, &format!("operator-{}", i), None)
                .await
                .unwrap();
            match outcome {
                ResolveOutcome::Resolved(_) => "won",
                ResolveOutcome::AlreadyResolved { .. } => "lost",
                other => panic!("unexpected resolve outcome: {:?}", other),
            }
        }));
    }
    for _ in 0..4 {
        let coordinator = coordinator.clone();
        let id = record.id;
        handles.push(tokio::spawn(async move {
            match coordinator.expire(id).await.unwrap() {
                // The record isn't due yet, so expire never transitions it.
                ExpireOutcome::NotYetDue | ExpireOutcome::AlreadyTerminal { .. } => "noop",
                other => panic!("unexpected expire outcome: {:?}", other),
            }
        }));
    }

    let mut wins = 0;
    let mut losses = 0;
    for handle in handles {
        match handle.await.unwrap() {
            "won" => wins += 1,
            "lost" => losses += 1,
            _ => {}
        }
    }
    assert_eq!(wins, 1, "exactly one resolve must win");
    assert_eq!(losses, 7, "every other resolve must observe the winner");

    // The winner's record must be internally consistent.
    let stored = store.get(record.id).await.unwrap().unwrap();
    match stored.status {
        ApprovalStatus::Approved => {
            assert!(stored.approved_by.is_some());
            assert!(stored.approved_at.is_some());
            assert!(stored.cancellation_reason.is_none());
        }
        ApprovalStatus::Rejected => {
            assert!(stored.approved_by.is_none());
            assert!(stored.cancellation_reason.is_none());
        }
        other => panic!("final status must be terminal, got {}", other),
    }
}

/// Concurrent expires against an overdue record: one wins, the rest
/// observe the terminal state; resolves past the deadline all fail
/// `Expired` and never transition anything.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_expiry_race_on_overdue_record() {
    let (coordinator, store, _) = setup();
    let record = seed_pending(&store, Duration::minutes(-5)).await;

    let mut expire_handles = Vec::new();
    for _ in 0..6 {
        let coordinator = coordinator.clone();
        let id = record.id;
        expire_handles.push(tokio::spawn(async move {
            match coordinator.expire(id).await.unwrap() {
                ExpireOutcome::Expired(_) => "won",
                ExpireOutcome::AlreadyTerminal { .. } => "noop",
                other => panic!("unexpected expire outcome: {:?}", other),
            }
        }));
    }
    let mut resolve_handles = Vec::new();
    for _ in 0..4 {
        let coordinator = coordinator.clone();
        let id = record.id;
        resolve_handles.push(tokio::spawn(async move {
            let outcome = coordinator.resolve(id, true, "late-operator", None).await.unwrap();
            assert!(
                matches!(
                    outcome,
                    ResolveOutcome::Expired | ResolveOutcome::AlreadyCancelled { .. }
                ),
                "resolution past the deadline must never succeed: {:?}",
                outcome
            );
        }));
    }

    let mut wins = 0;
    for handle in expire_handles {
        if handle.await.unwrap() == "won" {
            wins += 1;
        }
    }
    for handle in resolve_handles {
        handle.await.unwrap();
    }

    assert_eq!(wins, 1, "exactly one expire must win");
    let stored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Cancelled);
    assert_eq!(stored.cancellation_reason.as_deref(), Some(TIMEOUT_REASON));
    assert!(stored.approved_by.is_none());
}

/// Different approval ids never contend: a batch of records resolved in
/// parallel all succeed.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_distinct_records_resolve_in_parallel() {
    let (coordinator, _, _) = setup();

    let mut ids = Vec::new();
    for i in 0..16 {
        let record = coordinator
            .create(&format!("sess-{}", i), "agent-1", serde_json::json!({}), None)
            .await
            .unwrap();
        ids.push(record.id);
    }

    let mut handles = Vec::new();
    for id in ids {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.resolve(id, true, "ops", None).await.unwrap()
        }));
    }

    for handle in handles {
        assert!(matches!(handle.await.unwrap(), ResolveOutcome::Resolved(_)));
    }
}
