//! End-to-end tests of the indexing pipeline over the in-memory store.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use academy_indexer::events::{EventProcessor, IndexedEvent};
use academy_indexer::projection::{EntityRef, GrantStatus, ProposalStatus};
use academy_indexer::replay::{matches_log, rebuild_snapshot};
use academy_indexer::{
    ContractId, Indexer, IndexerConfig, IndexerError, MemorySource, MemoryStore, ProjectionError,
    RawEvent, StorageError, Store, StoreTx, TxHash, WorkerExit,
};

const CONTRACT: &str = "CACADEMY";

fn raw(contract: &str, ledger: u32, event_index: u32, topic: &str, payload: Value) -> RawEvent {
    RawEvent {
        contract_id: ContractId::new(contract),
        topic: topic.to_string(),
        payload,
        ledger,
        ledger_closed_at: Utc
            .timestamp_opt(1_700_000_000 + i64::from(ledger) * 5, 0)
            .single()
            .expect("timestamp"),
        tx_hash: TxHash::new([ledger as u8; 32]),
        event_index,
    }
}

fn proposal_created(ledger: u32, id: u64, threshold: u32) -> RawEvent {
    raw(
        CONTRACT,
        ledger,
        0,
        "PROPOSAL_CREATED",
        json!({
            "proposal_id": id,
            "proposer": "GPROPOSER",
            "title": "Fund the library",
            "approval_threshold": threshold,
            "created_at": 1_700_000_100u64,
        }),
    )
}

fn proposal_approved(ledger: u32, id: u64, approver: &str) -> RawEvent {
    raw(
        CONTRACT,
        ledger,
        0,
        "PROPOSAL_APPROVED",
        json!({"proposal_id": id, "approver": approver, "approved_at": 1_700_000_200u64}),
    )
}

fn proposal_executed(ledger: u32, id: u64) -> RawEvent {
    raw(
        CONTRACT,
        ledger,
        0,
        "PROPOSAL_EXECUTED",
        json!({"proposal_id": id, "executor": "GEXEC", "executed_at": 1_700_000_300u64}),
    )
}

fn reward_added(ledger: u32, id: u64, amount: i64) -> RawEvent {
    raw(
        CONTRACT,
        ledger,
        0,
        "REWARD_ADDED",
        json!({
            "reward_id": id,
            "recipient": "GALICE",
            "amount": amount,
            "reason": "mentoring",
            "added_at": 1_700_000_400u64,
        }),
    )
}

fn reward_claimed(ledger: u32, id: u64, amount: i64) -> RawEvent {
    raw(
        CONTRACT,
        ledger,
        0,
        "REWARD_CLAIMED",
        json!({
            "reward_id": id,
            "recipient": "GALICE",
            "amount": amount,
            "claimed_at": 1_700_000_500u64,
        }),
    )
}

fn trade(contract: &str, ledger: u32, id: u64) -> RawEvent {
    raw(
        contract,
        ledger,
        0,
        "TRADE_EXECUTED",
        json!({
            "trade_id": id,
            "maker": "GMAKER",
            "taker": "GTAKER",
            "base_asset": "CBASE",
            "quote_asset": "CQUOTE",
            "base_amount": 5,
            "quote_amount": "170141183460469231731687303715884105727",
            "executed_at": 1_700_000_600u64,
        }),
    )
}

fn grant_events() -> Vec<RawEvent> {
    vec![
        raw(
            CONTRACT,
            30,
            0,
            "GRANT",
            json!({
                "grant_id": 9,
                "beneficiary": "GBOB",
                "amount": 1_000,
                "start_time": 1_700_000_000u64,
                "cliff_seconds": 100,
                "duration_seconds": 1_000,
                "granted_at": 1_700_000_000u64,
            }),
        ),
        raw(
            CONTRACT,
            31,
            0,
            "CLAIM",
            json!({"grant_id": 9, "beneficiary": "GBOB", "amount": 250, "claimed_at": 1_700_000_500u64}),
        ),
        raw(
            CONTRACT,
            31,
            1,
            "REVOKE",
            json!({"grant_id": 9, "revoked_at": 1_700_000_600u64, "unvested_amount": 400}),
        ),
    ]
}

fn config(contracts: &[&str]) -> IndexerConfig {
    IndexerConfig::with_contracts(contracts.iter().map(|c| (*c).to_string()).collect())
        .with_backoff(1, 2)
        .with_max_retries(3)
        .with_stop_when_caught_up(true)
}

fn indexer(store: &Arc<MemoryStore>) -> Indexer<MemoryStore, MemorySource> {
    Indexer::new(
        Arc::clone(store),
        Arc::new(MemorySource::new()),
        config(&[CONTRACT]),
    )
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);
    let events = vec![
        reward_added(1, 42, 100),
        proposal_created(2, 7, 3),
        trade(CONTRACT, 3, 1),
    ];

    assert_ok!(indexer.process(&contract, &events).await);
    let once = assert_ok!(store.snapshot(&contract).await);
    let checkpoint = assert_ok!(store.checkpoint(&contract).await);

    let report = assert_ok!(indexer.process(&contract, &events).await);
    assert_eq!(report.replayed, 3);
    assert_eq!(report.written, 0);
    assert!(report.ordering_violations.is_empty());

    assert_eq!(assert_ok!(store.snapshot(&contract).await), once);
    assert_eq!(assert_ok!(store.checkpoint(&contract).await), checkpoint);
    assert_eq!(assert_ok!(store.indexed_events(&contract).await).len(), 3);
}

#[tokio::test]
async fn test_late_event_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);

    assert_ok!(indexer.process(&contract, &[proposal_created(5, 7, 3)]).await);
    let report = assert_ok!(
        indexer
            .process(&contract, &[proposal_approved(4, 7, "GLATE")])
            .await
    );

    assert_eq!(report.ordering_violations.len(), 1);
    assert!(!report.ordering_violations[0].conflicts_with_log);
    let proposal = assert_ok!(store.proposal(&contract, 7).await).expect("proposal");
    assert_eq!(proposal.current_approvals, 0);
    assert_eq!(indexer.metrics().ordering_violations(), 1);
}

#[tokio::test]
async fn test_proposal_scenario() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);

    assert_ok!(
        indexer
            .process(
                &contract,
                &[
                    proposal_created(10, 7, 3),
                    proposal_approved(11, 7, "GA"),
                    proposal_approved(12, 7, "GB"),
                ],
            )
            .await
    );
    let before = assert_ok!(store.proposal(&contract, 7).await).expect("proposal");
    assert_eq!(before.status, ProposalStatus::Pending);
    assert_eq!(before.current_approvals, 2);

    assert_ok!(indexer.process(&contract, &[proposal_executed(13, 7)]).await);
    let after = assert_ok!(store.proposal(&contract, 7).await).expect("proposal");
    assert_eq!(after.status, ProposalStatus::Executed);
    assert_eq!(after.current_approvals, 2);

    let report = assert_ok!(
        indexer
            .process(&contract, &[proposal_approved(14, 7, "GC")])
            .await
    );
    assert_eq!(report.rejected.len(), 1);
    assert!(report.rejected[0].error.is_invalid_transition());
}

#[tokio::test]
async fn test_reward_scenario() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);
    let claim = reward_claimed(21, 42, 100);

    assert_ok!(
        indexer
            .process(&contract, &[reward_added(20, 42, 100), claim.clone()])
            .await
    );
    let replay = assert_ok!(indexer.process(&contract, &[claim]).await);
    assert!(replay.is_clean());
    assert_eq!(replay.replayed, 1);

    let reward = assert_ok!(store.reward(&contract, 42).await).expect("reward");
    assert!(reward.claimed);
    assert_eq!(reward.claimed_amount, Some(100));

    let report = assert_ok!(
        indexer
            .process(&contract, &[reward_claimed(22, 42, 999)])
            .await
    );
    assert_eq!(report.rejected.len(), 1);
    assert!(matches!(
        report.rejected[0].error,
        ProjectionError::Integrity { .. }
    ));
    let reward = assert_ok!(store.reward(&contract, 42).await).expect("reward");
    assert_eq!(reward.claimed_amount, Some(100));
}

#[tokio::test]
async fn test_rejected_entity_is_quarantined() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);
    let mismatch = reward_claimed(21, 42, 999);

    let report = assert_ok!(
        indexer
            .process(&contract, &[reward_added(20, 42, 100), mismatch.clone()])
            .await
    );
    assert_eq!(report.rejected.len(), 1);
    assert!(report.rejected[0].error.is_integrity());

    let report = assert_ok!(
        indexer
            .process(
                &contract,
                &[reward_claimed(22, 42, 100), reward_added(23, 43, 50)],
            )
            .await
    );
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(
        report.rejected[0].error,
        ProjectionError::Quarantined {
            entity: EntityRef::reward(42),
            since: mismatch.position(),
        }
    );
    assert_eq!(report.written, 1);

    let reward = assert_ok!(store.reward(&contract, 42).await).expect("reward");
    assert!(!reward.claimed);
    assert_eq!(reward.claimed_amount, None);
    assert!(assert_ok!(store.reward(&contract, 43).await).is_some());

    let snapshot = assert_ok!(store.snapshot(&contract).await);
    assert_eq!(snapshot.quarantined.len(), 1);
    assert_eq!(snapshot.quarantined[0].entity, EntityRef::reward(42));
    assert_eq!(snapshot.quarantined[0].position, mismatch.position());

    assert_eq!(indexer.metrics().integrity_errors(), 1);
    assert_eq!(indexer.metrics().quarantined_events(), 1);
    assert!(assert_ok!(matches_log(store.as_ref(), &contract).await));
}

#[tokio::test]
async fn test_wide_json_amount_is_exact() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);

    let mut event = trade(CONTRACT, 40, 3);
    event.payload = assert_ok!(serde_json::from_str::<Value>(
        r#"{"trade_id": 3, "maker": "GMAKER", "taker": "GTAKER", "base_asset": "CBASE",
            "quote_asset": "CQUOTE", "base_amount": 100000000000000000000, "quote_amount": 1,
            "executed_at": 1700000600}"#
    ));
    let line = assert_ok!(serde_json::to_string(&event));
    let delivered: RawEvent = assert_ok!(serde_json::from_str(&line));

    let report = assert_ok!(indexer.process(&contract, &[delivered]).await);
    assert!(report.is_clean());
    assert_eq!(report.written, 1);

    let trade = assert_ok!(store.trade(&contract, 3).await).expect("trade");
    assert_eq!(trade.base_amount, 100_000_000_000_000_000_000);

    let entries = assert_ok!(store.indexed_events(&contract).await);
    assert_eq!(
        entries[0].raw_payload["base_amount"].to_string(),
        "100000000000000000000"
    );
    let encoded = assert_ok!(serde_json::to_string(&entries[0]));
    let decoded: IndexedEvent = assert_ok!(serde_json::from_str(&encoded));
    assert_eq!(decoded, entries[0]);

    let rebuilt = assert_ok!(rebuild_snapshot(&contract, &entries).await);
    assert_eq!(rebuilt.trades[0].base_amount, 100_000_000_000_000_000_000);
}

#[tokio::test]
async fn test_grant_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);

    assert_ok!(indexer.process(&contract, &grant_events()).await);

    let grant = assert_ok!(store.grant(&contract, 9).await).expect("grant");
    assert_eq!(grant.total_claimed, 250);
    assert_eq!(grant.claim_count, 1);
    assert_eq!(grant.status, GrantStatus::Revoked);
    assert_eq!(grant.unvested_amount, Some(400));
}

#[tokio::test]
async fn test_replay_reproduces_derived_state() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);

    let mut events = vec![
        proposal_created(10, 7, 3),
        proposal_approved(11, 7, "GA"),
        proposal_approved(12, 7, "GB"),
        proposal_executed(13, 7),
        reward_added(20, 42, 100),
        reward_claimed(21, 42, 100),
        reward_claimed(22, 42, 999),
        trade(CONTRACT, 25, 1),
        raw(CONTRACT, 26, 0, "TRADE_EXECUTED", json!({"trade_id": 2, "base_amount": 1.5})),
        raw(CONTRACT, 27, 0, "UPGRADED", json!({"version": 2})),
    ];
    events.extend(grant_events());
    for batch in events.chunks(3) {
        assert_ok!(indexer.process(&contract, batch).await);
    }
    let incremental = assert_ok!(store.snapshot(&contract).await);
    assert_eq!(incremental.quarantined.len(), 1);

    let entries = assert_ok!(store.indexed_events(&contract).await);
    assert_eq!(entries.len(), events.len());
    let rebuilt = assert_ok!(rebuild_snapshot(&contract, &entries).await);
    assert_eq!(
        assert_ok!(rebuilt.to_canonical_json()),
        assert_ok!(incremental.to_canonical_json())
    );
    assert!(assert_ok!(matches_log(store.as_ref(), &contract).await));

    let report = assert_ok!(indexer.rebuild(&contract).await);
    assert_eq!(report.already_logged, events.len());
    assert_eq!(
        assert_ok!(assert_ok!(store.snapshot(&contract).await).to_canonical_json()),
        assert_ok!(incremental.to_canonical_json())
    );
    let checkpoint = assert_ok!(store.checkpoint(&contract).await).expect("checkpoint");
    assert_eq!(checkpoint.events_applied, events.len() as u64);
}

#[tokio::test]
async fn test_decode_failure_is_logged_and_checkpointed() {
    let store = Arc::new(MemoryStore::new());
    let indexer = indexer(&store);
    let contract = ContractId::new(CONTRACT);
    let bad = raw(CONTRACT, 3, 0, "GRANT", json!({"grant_id": 1, "amount": 2.5}));

    let report = assert_ok!(indexer.process(&contract, &[bad.clone()]).await);
    assert_eq!(report.decode_failures.len(), 1);

    let mut tx = assert_ok!(store.begin(&contract).await);
    let entry = assert_ok!(tx.indexed_event(&bad.position()).await).expect("logged");
    assert!(entry.decode_error.is_some());
    assert_eq!(entry.decoded_payload, None);
    assert_eq!(entry.raw_payload, bad.payload);

    let checkpoint = assert_ok!(store.checkpoint(&contract).await).expect("checkpoint");
    assert_eq!(checkpoint.position, bad.position());
    assert!(assert_ok!(store.snapshot(&contract).await).is_empty());
}

#[tokio::test]
async fn test_transient_failure_leaves_checkpoint_untouched() {
    let store = Arc::new(MemoryStore::new());
    let contract = ContractId::new(CONTRACT);

    let mut tx = assert_ok!(store.begin(&contract).await);
    assert_ok!(
        EventProcessor::new()
            .process_batch(&mut tx, &[reward_added(1, 42, 100)])
            .await
    );
    store.inject_commit_failures(1);
    let err = assert_err!(tx.commit().await);
    assert!(matches!(err, StorageError::Transient(_)));
    assert_eq!(assert_ok!(store.checkpoint(&contract).await), None);
    assert!(assert_ok!(store.indexed_events(&contract).await).is_empty());

    let indexer = indexer(&store);
    store.inject_commit_failures(2);
    let report = assert_ok!(indexer.process(&contract, &[reward_added(1, 42, 100)]).await);
    assert_eq!(report.written, 1);
    assert_eq!(indexer.metrics().transient_retries(), 2);
    let checkpoint = assert_ok!(store.checkpoint(&contract).await).expect("checkpoint");
    assert_eq!(checkpoint.events_applied, 1);
}

#[tokio::test]
async fn test_exhausted_retries_pause_worker() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MemorySource::with_events([trade(CONTRACT, 1, 1)]));
    let indexer = Indexer::new(Arc::clone(&store), source, config(&[CONTRACT]));
    store.inject_commit_failures(100);

    let reports = assert_ok!(indexer.run().await);

    assert!(reports[0].is_paused());
    match &reports[0].exit {
        WorkerExit::Paused(IndexerError::RetriesExhausted { attempts, .. }) => {
            assert_eq!(*attempts, 4);
        }
        other => panic!("unexpected exit: {other:?}"),
    }
    assert_eq!(
        assert_ok!(store.checkpoint(&ContractId::new(CONTRACT)).await),
        None
    );
}

#[tokio::test]
async fn test_contracts_index_independently() {
    let store = Arc::new(MemoryStore::new());
    let mut events: Vec<RawEvent> = (1..=25).map(|n| trade("CA", n, u64::from(n))).collect();
    events.extend((1..=10).map(|n| trade("CB", n, u64::from(n))));
    // Redelivered events are absorbed.
    events.push(trade("CA", 3, 3));
    let source = Arc::new(MemorySource::with_events(events));
    let indexer = Indexer::new(
        Arc::clone(&store),
        source,
        config(&["CA", "CB"]).with_batch_size(4),
    );

    let reports = assert_ok!(indexer.run().await);

    assert_eq!(reports.len(), 2);
    assert!(reports
        .iter()
        .all(|report| matches!(report.exit, WorkerExit::CaughtUp)));
    let a = assert_ok!(store.snapshot(&ContractId::new("CA")).await);
    let b = assert_ok!(store.snapshot(&ContractId::new("CB")).await);
    assert_eq!(a.trades.len(), 25);
    assert_eq!(b.trades.len(), 10);
    assert!(a.trades.iter().all(|t| t.contract_id.as_str() == "CA"));

    let checkpoint = assert_ok!(store.checkpoint(&ContractId::new("CA")).await).expect("checkpoint");
    assert_eq!(checkpoint.events_applied, 25);
    assert_eq!(indexer.metrics().events_indexed(), 35);
}
