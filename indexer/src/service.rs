//! Ingestion service.
//!
//! Runs one worker per configured contract. A worker pulls a batch from the
//! [`EventSource`], processes it in a single store transaction and commits
//! before fetching again, so a slow store throttles ingestion instead of
//! buffering events.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::checkpoint::resume_position;
use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::events::{BatchReport, ContractId, EventProcessor, IndexerMetrics, Position, RawEvent};
use crate::retry::RetryFailure;
use crate::source::EventSource;
use crate::storage::{Store, StoreTx};

/// Why a worker stopped.
#[derive(Debug, Clone)]
pub enum WorkerExit {
    /// Shutdown was requested.
    Stopped,
    /// The source had nothing left and the config asked to stop there.
    CaughtUp,
    /// A permanent error, or a transient one that outlasted every retry.
    Paused(IndexerError),
}

/// Summary of one worker's run.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Contract the worker indexed.
    pub contract_id: ContractId,
    /// Exit reason.
    pub exit: WorkerExit,
    /// Committed batches.
    pub batches: u64,
    /// Events seen across committed batches.
    pub events: u64,
    /// Checkpoint when the worker stopped.
    pub last_position: Option<Position>,
}

impl WorkerReport {
    fn new(contract_id: ContractId, last_position: Option<Position>) -> Self {
        Self {
            contract_id,
            exit: WorkerExit::Stopped,
            batches: 0,
            events: 0,
            last_position,
        }
    }

    /// Returns true if the worker paused on an error.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        matches!(self.exit, WorkerExit::Paused(_))
    }
}

/// The indexer service.
pub struct Indexer<S: Store, E: EventSource> {
    store: Arc<S>,
    source: Arc<E>,
    config: IndexerConfig,
    metrics: Arc<IndexerMetrics>,
    shutdown: watch::Sender<bool>,
}

impl<S: Store, E: EventSource> Indexer<S, E> {
    /// Creates a new indexer.
    pub fn new(store: Arc<S>, source: Arc<E>, config: IndexerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            source,
            config,
            metrics: Arc::new(IndexerMetrics::new()),
            shutdown,
        }
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the shared metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<IndexerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Returns a handle that stops every worker between commits when set to
    /// `true`.
    #[must_use]
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Requests shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn worker(&self, contract_id: ContractId) -> Worker<S, E> {
        Worker {
            contract_id,
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Runs one worker per configured contract until each stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid. Worker failures are
    /// reported per contract.
    pub async fn run(&self) -> Result<Vec<WorkerReport>, IndexerError> {
        self.config.validate()?;

        let mut workers = JoinSet::new();
        for contract_id in self.config.contract_ids() {
            let worker = self.worker(contract_id);
            let shutdown = self.shutdown.subscribe();
            workers.spawn(worker.run(shutdown));
        }

        let mut reports = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }
        reports.sort_by(|a, b| a.contract_id.cmp(&b.contract_id));

        info!(workers = reports.len(), "indexer stopped");
        Ok(reports)
    }

    /// Processes one batch of a contract and commits it, retrying transient
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns a permanent error as is, and [`IndexerError::RetriesExhausted`]
    /// once a transient error outlasts the retry policy.
    pub async fn process(
        &self,
        contract_id: &ContractId,
        events: &[RawEvent],
    ) -> Result<BatchReport, IndexerError> {
        self.worker(contract_id.clone()).commit_batch(events).await
    }

    /// Rebuilds a contract's derived rows from its indexed-event log.
    ///
    /// Derived rows and the checkpoint are cleared and the log is replayed
    /// through the normal processing path, all in one transaction. The log
    /// itself is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn rebuild(&self, contract_id: &ContractId) -> Result<BatchReport, IndexerError> {
        let started = Instant::now();
        let store = &self.store;
        let metrics = &self.metrics;

        let result = self
            .config
            .retry_policy()
            .run(
                move || async move {
                    let mut tx = store.begin(contract_id).await?;
                    tx.clear_projection().await?;
                    let raw: Vec<RawEvent> = tx
                        .indexed_events()
                        .await?
                        .iter()
                        .map(|entry| entry.to_raw())
                        .collect();
                    let report = EventProcessor::new().process_batch(&mut tx, &raw).await?;
                    tx.commit().await?;
                    Ok::<_, IndexerError>(report)
                },
                |_, _| metrics.record_retry(),
            )
            .await;

        let report = finish(contract_id, result)?;
        info!(
            contract = %contract_id,
            replayed = report.events_seen,
            written = report.written,
            rejected = report.rejected.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuilt projection from log"
        );
        Ok(report)
    }
}

struct Worker<S: Store, E: EventSource> {
    contract_id: ContractId,
    store: Arc<S>,
    source: Arc<E>,
    config: IndexerConfig,
    metrics: Arc<IndexerMetrics>,
}

impl<S: Store, E: EventSource> Worker<S, E> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) -> WorkerReport {
        let contract_id = self.contract_id.clone();
        let policy = self.config.retry_policy();

        let store = &self.store;
        let contract = &contract_id;
        let resumed = policy
            .run(
                move || resume_position(&**store, contract),
                |_, _| self.metrics.record_retry(),
            )
            .await;
        let mut after = match resumed {
            Ok(position) => position,
            Err(failure) => {
                let error = exhausted(
                    &contract_id,
                    RetryFailure {
                        attempts: failure.attempts,
                        error: IndexerError::Storage(failure.error),
                    },
                );
                error!(contract = %contract_id, error = %error, "worker paused");
                let mut report = WorkerReport::new(contract_id, None);
                report.exit = WorkerExit::Paused(error);
                return report;
            }
        };
        let mut report = WorkerReport::new(contract_id.clone(), after);
        info!(contract = %contract_id, resume_after = ?after, "worker started");

        loop {
            if *shutdown.borrow() {
                report.exit = WorkerExit::Stopped;
                break;
            }

            let source = &self.source;
            let batch_size = self.config.batch_size;
            let fetched = policy
                .run(
                    move || async move {
                        source
                            .fetch(contract, after.as_ref(), batch_size)
                            .await
                            .map_err(IndexerError::from)
                    },
                    |_, _| self.metrics.record_retry(),
                )
                .await;
            let events = match fetched {
                Ok(events) => events,
                Err(failure) => {
                    report.exit = WorkerExit::Paused(exhausted(&contract_id, failure));
                    break;
                }
            };

            if events.is_empty() {
                if self.config.stop_when_caught_up {
                    report.exit = WorkerExit::CaughtUp;
                    break;
                }
                debug!(contract = %contract_id, "caught up, waiting");
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            report.exit = WorkerExit::Stopped;
                            break;
                        }
                    }
                }
                continue;
            }

            match self.commit_batch(&events).await {
                Ok(batch) => {
                    after = batch.last_position.or(after);
                    report.batches += 1;
                    report.events += batch.events_seen as u64;
                    report.last_position = after;
                }
                Err(e) => {
                    report.exit = WorkerExit::Paused(e);
                    break;
                }
            }
        }

        match &report.exit {
            WorkerExit::Paused(e) => {
                error!(contract = %contract_id, error = %e, "worker paused");
            }
            exit => info!(
                contract = %contract_id,
                exit = ?exit,
                batches = report.batches,
                events = report.events,
                "worker stopped"
            ),
        }
        report
    }

    async fn commit_batch(&self, events: &[RawEvent]) -> Result<BatchReport, IndexerError> {
        let started = Instant::now();
        let store = &self.store;
        let contract_id = &self.contract_id;
        let metrics = &self.metrics;

        let result = self
            .config
            .retry_policy()
            .run(
                move || async move {
                    let mut tx = store.begin(contract_id).await?;
                    let report = EventProcessor::new().process_batch(&mut tx, events).await?;
                    tx.commit().await?;
                    Ok::<_, IndexerError>(report)
                },
                |_, _| metrics.record_retry(),
            )
            .await;

        let report = finish(contract_id, result)?;
        self.metrics.record_batch(&report, started.elapsed());

        if report.is_clean() {
            debug!(
                contract = %contract_id,
                events = report.events_seen,
                written = report.written,
                last_position = ?report.last_position,
                "batch committed"
            );
        } else {
            warn!(
                contract = %contract_id,
                events = report.events_seen,
                written = report.written,
                decode_failures = report.decode_failures.len(),
                rejected = report.rejected.len(),
                ordering_violations = report.ordering_violations.len(),
                log_conflicts = report.log_conflicts.len(),
                "batch committed with surfaced errors"
            );
        }
        Ok(report)
    }
}

fn finish(
    contract_id: &ContractId,
    result: Result<BatchReport, RetryFailure<IndexerError>>,
) -> Result<BatchReport, IndexerError> {
    result.map_err(|failure| exhausted(contract_id, failure))
}

fn exhausted(contract_id: &ContractId, failure: RetryFailure<IndexerError>) -> IndexerError {
    if failure.error.is_retriable() {
        IndexerError::RetriesExhausted {
            contract_id: contract_id.clone(),
            attempts: failure.attempts,
            last_error: Box::new(failure.error),
        }
    } else {
        failure.error
    }
}
