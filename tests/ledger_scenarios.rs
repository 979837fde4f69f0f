use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use credit_ledger::{
    CreditLedger, CreditTokenContract, Identity, LedgerConfig, LedgerError, MemoryWorldState,
    NewCreditToken, SteppingClock, StorageConfig, TokenStatus, TransitionPolicy,
};
use tempfile::tempdir;

fn clock() -> Arc<SteppingClock> {
    Arc::new(SteppingClock::new(
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        Duration::milliseconds(250),
    ))
}

fn memory_ledger(contract: CreditTokenContract) -> CreditLedger {
    CreditLedger::new(Arc::new(MemoryWorldState::new()), contract).with_clock(clock())
}

fn alice() -> Identity {
    Identity::new("Org1MSP", "alice")
}

fn bob() -> Identity {
    Identity::new("Org2MSP", "bob")
}

fn token(id: &str, owner: &str, value: &str) -> NewCreditToken {
    NewCreditToken {
        id: id.into(),
        owner_id: owner.into(),
        original_value: value.into(),
        category: "TRIBUTARIO".into(),
        subtype: "ICMS".into(),
        issuer_name: "Receita".into(),
        metadata_hash: String::new(),
    }
}

/// Drive a ledger through a fixed mix of operations, including rejected ones
fn run_workload(ledger: &CreditLedger) {
    let me = alice();
    for (id, owner, value) in [
        ("T1", "alice", "1000"),
        ("T2", "alice", "250.5"),
        ("T3", "carol", "42"),
        ("T4", "dave", "7"),
    ] {
        ledger.create(&me, token(id, owner, value)).unwrap();
    }

    ledger.update_status(&me, "T1", "LOCKED_SALE").unwrap();
    ledger.transfer(&me, "T1", "bob").unwrap();
    ledger.transfer(&me, "T3", "alice").unwrap();
    ledger.update_status(&me, "T4", "BURNED").unwrap();

    assert!(ledger.create(&me, token("T2", "bob", "1")).is_err());
    assert!(ledger.transfer(&me, "T2", "alice").is_err());
    assert!(ledger.update_status(&me, "T4", "ACTIVE").is_err());
    assert!(ledger.update_status(&me, "T9", "ACTIVE").is_err());
    assert!(ledger.create(&me, token("T5", "ali\u{0}ce", "1")).is_err());
}

#[test]
fn end_to_end_scenario() {
    let ledger = memory_ledger(CreditTokenContract::new());
    let me = alice();

    ledger
        .invoke(
            &me,
            "Create",
            &["T1", "alice", "1000", "TRIBUTARIO", "ICMS", "Receita", ""],
        )
        .unwrap();

    let created = ledger.query(&me, "T1").unwrap();
    assert_eq!(created.status, TokenStatus::Active);
    assert_eq!(created.original_value, 1000.0);

    ledger.invoke(&me, "UpdateStatus", &["T1", "LOCKED_SALE"]).unwrap();
    ledger.invoke(&me, "Transfer", &["T1", "bob"]).unwrap();

    let moved = ledger.query(&me, "T1").unwrap();
    assert_eq!(moved.status, TokenStatus::Active);
    assert_eq!(moved.owner_id, "bob");

    assert!(ledger.query_by_owner(&me, "alice").unwrap().is_empty());
    let bobs = ledger.query_by_owner(&me, "bob").unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].id, "T1");

    let transfers = ledger.event_log().transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].old_owner, "alice");
    assert_eq!(transfers[0].new_owner, "bob");
}

#[test]
fn round_trip_preserves_inputs() {
    let ledger = memory_ledger(CreditTokenContract::new());
    let mut request = token("CT-2024-0001", "acme", "15320.75");
    request.metadata_hash = "9f86d081884c7d65".into();
    ledger.create(&alice(), request.clone()).unwrap();

    let stored = ledger.query(&alice(), "CT-2024-0001").unwrap();
    assert_eq!(stored.id, request.id);
    assert_eq!(stored.owner_id, request.owner_id);
    assert_eq!(stored.original_value, 15320.75);
    assert_eq!(stored.category, request.category);
    assert_eq!(stored.subtype, request.subtype);
    assert_eq!(stored.issuer_name, request.issuer_name);
    assert_eq!(stored.metadata_hash, request.metadata_hash);
    assert_eq!(stored.status, TokenStatus::Active);
    assert_eq!(stored.created_at, stored.updated_at);
}

#[test]
fn uniqueness_and_positive_value() {
    let ledger = memory_ledger(CreditTokenContract::new());
    ledger.create(&alice(), token("T1", "alice", "10")).unwrap();
    let first = ledger.query(&alice(), "T1").unwrap();

    assert!(matches!(
        ledger.create(&bob(), token("T1", "bob", "99")),
        Err(LedgerError::AlreadyExists(_))
    ));
    assert_eq!(ledger.query(&alice(), "T1").unwrap(), first);

    for bad in ["-5", "abc"] {
        assert!(matches!(
            ledger.create(&alice(), token("T2", "alice", bad)),
            Err(LedgerError::InvalidArgument(_))
        ));
    }
    assert!(!ledger.exists(&alice(), "T2").unwrap());
}

#[test]
fn transfer_invariant() {
    let ledger = memory_ledger(CreditTokenContract::new());
    ledger.create(&alice(), token("T1", "alice", "10")).unwrap();

    for (status, new_owner) in [("LOCKED_SALE", "bob"), ("ACTIVE", "carol"), ("CREATED", "alice")] {
        let mut current = ledger.query(&alice(), "T1").unwrap();
        if current.status.as_str() != status {
            ledger.update_status(&alice(), "T1", status).unwrap();
            current = ledger.query(&alice(), "T1").unwrap();
        }

        ledger.transfer(&alice(), "T1", new_owner).unwrap();
        let after = ledger.query(&alice(), "T1").unwrap();
        assert_eq!(after.owner_id, new_owner);
        assert_eq!(after.status, TokenStatus::Active);
        assert!(after.updated_at > current.updated_at);

        assert!(matches!(
            ledger.transfer(&alice(), "T1", new_owner),
            Err(LedgerError::InvalidArgument(_))
        ));
    }
}

#[test]
fn transfer_succeeds_from_every_status() {
    for status in ["CREATED", "ACTIVE", "LOCKED_SALE", "TRANSFERRED", "BURNED"] {
        let ledger = memory_ledger(CreditTokenContract::new());
        ledger.create(&alice(), token("T1", "alice", "10")).unwrap();
        if status != "ACTIVE" {
            ledger.update_status(&alice(), "T1", status).unwrap();
        }
        let before = ledger.query(&alice(), "T1").unwrap();

        ledger.transfer(&alice(), "T1", "bob").unwrap();
        let after = ledger.query(&alice(), "T1").unwrap();
        assert_eq!(after.owner_id, "bob", "from {status}");
        assert_eq!(after.status, TokenStatus::Active, "from {status}");
        assert!(after.updated_at > before.updated_at);
    }
}

#[test]
fn history_is_monotonic_and_ends_at_current_state() {
    let ledger = memory_ledger(CreditTokenContract::new());
    run_workload(&ledger);

    for id in ["T1", "T2", "T3", "T4"] {
        let history = ledger.get_history(&alice(), id).unwrap();
        assert!(!history.is_empty());
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(
            history.last().unwrap().record().unwrap(),
            ledger.query(&alice(), id).unwrap(),
            "history of {id}"
        );
    }

    // Rejected transactions leave no history
    assert_eq!(ledger.get_history(&alice(), "T2").unwrap().len(), 1);
    assert!(ledger.get_history(&alice(), "T9").unwrap().is_empty());
}

#[test]
fn owner_filter_matches_query_all() {
    for owner_index in [false, true] {
        let ledger = memory_ledger(CreditTokenContract::new().with_owner_index(owner_index));
        run_workload(&ledger);

        let all = ledger.query_all(&alice()).unwrap();
        assert_eq!(all.len(), 4);
        for owner in ["alice", "bob", "carol", "dave", "nobody"] {
            let expected: Vec<_> = all.iter().filter(|t| t.owner_id == owner).cloned().collect();
            assert_eq!(
                ledger.query_by_owner(&alice(), owner).unwrap(),
                expected,
                "owner {owner} with index {owner_index}"
            );
        }
    }
}

#[test]
fn enforced_and_permissive_policies_differ() {
    let enforced = memory_ledger(CreditTokenContract::new());
    let permissive = memory_ledger(
        CreditTokenContract::new().with_transition_policy(TransitionPolicy::Permissive),
    );

    for ledger in [&enforced, &permissive] {
        ledger.create(&alice(), token("T1", "alice", "10")).unwrap();
        ledger.update_status(&alice(), "T1", "TRANSFERRED").unwrap();
    }

    assert!(matches!(
        enforced.update_status(&alice(), "T1", "ACTIVE"),
        Err(LedgerError::InvalidTransition {
            from: TokenStatus::Transferred,
            to: TokenStatus::Active
        })
    ));
    permissive.update_status(&alice(), "T1", "ACTIVE").unwrap();
    assert_eq!(permissive.query(&alice(), "T1").unwrap().status, TokenStatus::Active);
}

#[test]
fn authorization_denial_leaves_state_untouched() {
    let config = LedgerConfig {
        issuer_msp: Some("Org1MSP".into()),
        ..LedgerConfig::default()
    };
    let ledger = CreditLedger::from_config(&config).unwrap().with_clock(clock());

    ledger.create(&alice(), token("T1", "alice", "10")).unwrap();
    let digest = ledger.state_digest().unwrap();

    assert!(matches!(
        ledger.create(&bob(), token("T2", "bob", "10")),
        Err(LedgerError::Unauthorized(_))
    ));
    assert!(matches!(
        ledger.transfer(&bob(), "T1", "bob"),
        Err(LedgerError::Unauthorized(_))
    ));
    assert!(matches!(
        ledger.update_status(&bob(), "T1", "BURNED"),
        Err(LedgerError::Unauthorized(_))
    ));

    assert_eq!(ledger.state_digest().unwrap(), digest);
    assert!(ledger.events().is_empty());

    ledger.transfer(&alice(), "T1", "bob").unwrap();
    ledger.update_status(&bob(), "T1", "LOCKED_SALE").unwrap();
}

#[test]
fn replicas_agree_on_state_digest() {
    let first = memory_ledger(CreditTokenContract::new().with_owner_index(true));
    let second = memory_ledger(CreditTokenContract::new().with_owner_index(true));
    run_workload(&first);
    run_workload(&second);

    assert_eq!(first.state_digest().unwrap(), second.state_digest().unwrap());
    assert_eq!(first.events(), second.events());

    // One more write on one replica is visible in the digest
    first.transfer(&alice(), "T2", "bob").unwrap();
    assert_ne!(first.state_digest().unwrap(), second.state_digest().unwrap());
}

#[test]
fn replicas_agree_after_serving_different_queries() {
    let busy = memory_ledger(CreditTokenContract::new());
    let quiet = memory_ledger(CreditTokenContract::new());

    busy.create(&alice(), token("T1", "alice", "10")).unwrap();
    quiet.create(&alice(), token("T1", "alice", "10")).unwrap();

    for _ in 0..5 {
        busy.query(&alice(), "T1").unwrap();
        busy.query_all(&alice()).unwrap();
    }

    busy.transfer(&alice(), "T1", "bob").unwrap();
    quiet.transfer(&alice(), "T1", "bob").unwrap();

    assert_eq!(busy.state_digest().unwrap(), quiet.state_digest().unwrap());
    assert_eq!(busy.events(), quiet.events());
}

#[test]
fn journal_replay_restores_ledger() {
    let dir = tempdir().unwrap();
    let config = LedgerConfig {
        owner_index: true,
        storage: StorageConfig::Journal {
            path: dir.path().join("ledger.journal"),
        },
        ..LedgerConfig::default()
    };

    let (digest, history_len) = {
        let ledger = CreditLedger::from_config(&config).unwrap().with_clock(clock());
        run_workload(&ledger);
        (
            ledger.state_digest().unwrap(),
            ledger.get_history(&alice(), "T1").unwrap().len(),
        )
    };

    let reopened = CreditLedger::from_config(&config).unwrap();
    assert_eq!(reopened.state_digest().unwrap(), digest);
    assert_eq!(reopened.get_history(&alice(), "T1").unwrap().len(), history_len);
    assert_eq!(reopened.query(&alice(), "T1").unwrap().owner_id, "bob");
    assert_eq!(reopened.query_by_owner(&alice(), "alice").unwrap().len(), 2);
}

#[cfg(feature = "sqlite")]
#[test]
fn sqlite_backend_matches_memory_backend() {
    let dir = tempdir().unwrap();
    let sqlite = credit_ledger::SqliteWorldState::new(dir.path().join("ledger.db")).unwrap();
    let on_disk = CreditLedger::new(
        Arc::new(sqlite),
        CreditTokenContract::new().with_owner_index(true),
    )
    .with_clock(clock());
    let in_memory = memory_ledger(CreditTokenContract::new().with_owner_index(true));

    run_workload(&on_disk);
    run_workload(&in_memory);

    assert_eq!(on_disk.state_digest().unwrap(), in_memory.state_digest().unwrap());
    assert_eq!(
        on_disk.store().height().unwrap(),
        in_memory.store().height().unwrap()
    );
    assert_eq!(
        on_disk.get_history(&alice(), "T1").unwrap(),
        in_memory.get_history(&alice(), "T1").unwrap()
    );
    assert_eq!(
        on_disk.query_by_owner(&alice(), "alice").unwrap(),
        in_memory.query_by_owner(&alice(), "alice").unwrap()
    );
}
