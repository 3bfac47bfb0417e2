//! Concurrent execution of a validated dependency graph.
//!
//! The scheduler loop owns the journal. Worker tasks only talk to the chain
//! and ask the loop, over a channel, to journal their progress; a task does
//! not submit until its start record is durable. Transactions from the same
//! account go through a per-account lane so nonces are assigned strictly in
//! order, while different accounts proceed in parallel.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, mpsc, oneshot};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use crate::chain::{Accounts, ChainClient, Receipt, ReceiptStatus, TxHash};
use crate::error::{DeployError, ExecutionError, JournalError, TransportError};
use crate::fingerprint::fingerprint;
use crate::future::FutureRegistry;
use crate::graph::DependencyGraph;
use crate::journal::Journal;
use crate::types::{Address, FutureId, Value};

use super::action::{ResolvedAction, receipt_result, resolve_action};
use super::reconcile::Reconciliation;
use super::report::{FutureOutcome, RunReport};

/// Default number of transactions in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Cooperative cancellation for a running deployment.
///
/// After `abort`, no new future is dispatched and in-flight tasks are
/// cancelled; their journal entries stay as they were.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    flag: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `abort` has been called.
    pub async fn aborted(&self) {
        while !self.is_aborted() {
            self.inner.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_concurrency: usize,
    pub abort: AbortSignal,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            abort: AbortSignal::new(),
        }
    }
}

impl RunOptions {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }
}

/// Journal writes requested by worker tasks. The ack reports whether the
/// record is durable.
enum JournalRequest {
    Start {
        id: FutureId,
        fingerprint: String,
        sender: Address,
        nonce: u64,
        ack: oneshot::Sender<bool>,
    },
    Submitted {
        id: FutureId,
        tx_hash: TxHash,
        ack: oneshot::Sender<bool>,
    },
}

enum TaskOutcome {
    Confirmed(Receipt),
    /// Nothing reached the chain.
    SubmissionFailed(TransportError),
    /// Sent, but the confirmation wait failed.
    Unconfirmed { tx_hash: TxHash, error: String },
    /// The journal refused the start record; nothing was sent.
    Halted,
}

/// Next nonce of one account; `None` until first queried from the chain.
#[derive(Default)]
struct Lane {
    next_nonce: Option<u64>,
}

struct Dispatch {
    id: FutureId,
    action: ResolvedAction,
    fingerprint: String,
    from: Address,
}

pub struct Scheduler<'a> {
    registry: &'a FutureRegistry,
    graph: &'a DependencyGraph,
    journal: &'a mut Journal,
    chain: Arc<dyn ChainClient>,
    accounts: &'a Accounts,
    options: RunOptions,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        registry: &'a FutureRegistry,
        graph: &'a DependencyGraph,
        journal: &'a mut Journal,
        chain: Arc<dyn ChainClient>,
        accounts: &'a Accounts,
    ) -> Self {
        Self {
            registry,
            graph,
            journal,
            chain,
            accounts,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Execute every future not settled by `reconciliation`.
    pub async fn run(self, reconciliation: Reconciliation) -> Result<RunReport, DeployError> {
        let Scheduler {
            registry,
            graph,
            journal,
            chain,
            accounts,
            options,
        } = self;
        let max_concurrency = options.max_concurrency.max(1);
        let abort = options.abort;

        let mut run = RunState::new(registry, graph, journal, accounts, reconciliation);
        let (journal_tx, mut journal_rx) = mpsc::channel::<JournalRequest>(64);
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, FutureId> = HashMap::new();
        let mut lanes: HashMap<Address, Arc<Mutex<Lane>>> = HashMap::new();
        let mut fatal: Option<JournalError> = None;
        let mut aborted = false;

        info!(futures = graph.len(), ready = run.ready.len(), "execution started");

        loop {
            if fatal.is_none() && !abort.is_aborted() {
                while in_flight.len() < max_concurrency {
                    let Some(id) = run.ready.pop_front() else {
                        break;
                    };
                    match run.prepare(&id) {
                        Ok(Some(dispatch)) => {
                            let lane = lanes.entry(dispatch.from).or_default().clone();
                            debug!(future = dispatch.id.as_str(), "dispatching");
                            let handle = tasks.spawn(execute_onchain(
                                dispatch,
                                chain.clone(),
                                lane,
                                journal_tx.clone(),
                            ));
                            in_flight.insert(handle.id(), id);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            fatal.get_or_insert(err);
                            break;
                        }
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(request) = journal_rx.recv() => {
                    if let Err(err) = run.handle_request(request) {
                        error!(error = %err, "journal write failed, stopping dispatch");
                        fatal.get_or_insert(err);
                    }
                }
                Some(joined) = tasks.join_next_with_id() => {
                    let result = match joined {
                        Ok((task_id, outcome)) => match in_flight.remove(&task_id) {
                            Some(id) => run.handle_outcome(&id, outcome),
                            None => Ok(()),
                        },
                        Err(join_error) => match in_flight.remove(&join_error.id()) {
                            Some(id) => {
                                let reason = if join_error.is_cancelled() {
                                    "aborted while in flight"
                                } else {
                                    "worker task panicked"
                                };
                                run.interrupted(&id, reason);
                                Ok(())
                            }
                            None => Ok(()),
                        },
                    };
                    if let Err(err) = result {
                        error!(error = %err, "journal write failed, stopping dispatch");
                        fatal.get_or_insert(err);
                    }
                }
                _ = abort.aborted(), if !aborted => {
                    warn!(in_flight = in_flight.len(), "abort requested, cancelling in-flight work");
                    aborted = true;
                    tasks.abort_all();
                }
            }
        }

        // Requests from cancelled tasks may still be queued; a transaction
        // reference that reached the channel must reach the journal.
        while let Ok(request) = journal_rx.try_recv() {
            if let Err(err) = run.handle_request(request) {
                fatal.get_or_insert(err);
            }
        }

        let report = run.finish(abort.is_aborted());
        if let Some(err) = fatal {
            return Err(err.into());
        }
        let summary = report.summary();
        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            blocked = summary.blocked,
            pending = summary.pending,
            transactions = report.transactions_submitted,
            "execution finished"
        );
        Ok(report)
    }
}

/// Bookkeeping owned by the scheduler loop.
struct RunState<'a> {
    registry: &'a FutureRegistry,
    graph: &'a DependencyGraph,
    journal: &'a mut Journal,
    accounts: &'a Accounts,
    results: BTreeMap<FutureId, Value>,
    outcomes: BTreeMap<FutureId, FutureOutcome>,
    /// Unsatisfied dependency count of futures not yet ready.
    waiting: BTreeMap<FutureId, usize>,
    ready: VecDeque<FutureId>,
    actions: HashMap<FutureId, ResolvedAction>,
    /// On-chain futures whose start record this run made durable.
    started: HashSet<FutureId>,
    orphaned: Vec<FutureId>,
    transactions: usize,
}

impl<'a> RunState<'a> {
    fn new(
        registry: &'a FutureRegistry,
        graph: &'a DependencyGraph,
        journal: &'a mut Journal,
        accounts: &'a Accounts,
        reconciliation: Reconciliation,
    ) -> Self {
        let Reconciliation {
            results,
            outcomes,
            orphaned,
        } = reconciliation;
        let mut run = Self {
            registry,
            graph,
            journal,
            accounts,
            results,
            outcomes,
            waiting: BTreeMap::new(),
            ready: VecDeque::new(),
            actions: HashMap::new(),
            started: HashSet::new(),
            orphaned,
            transactions: 0,
        };

        let unknown: Vec<FutureId> = run
            .outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FutureOutcome::PendingUnknown { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &unknown {
            run.block_descendants(id);
        }

        for id in graph.order() {
            if run.outcomes.contains_key(id) {
                continue;
            }
            let unsatisfied = graph
                .dependencies(id)
                .filter(|dep| !run.results.contains_key(*dep))
                .count();
            if unsatisfied == 0 {
                run.ready.push_back(id.clone());
            } else {
                run.waiting.insert(id.clone(), unsatisfied);
            }
        }
        run
    }

    /// Resolve `id`'s inputs. Local futures complete right here; on-chain
    /// ones come back as work to spawn.
    fn prepare(&mut self, id: &FutureId) -> Result<Option<Dispatch>, JournalError> {
        let Some(future) = self.registry.get(id) else {
            return Ok(None);
        };
        let action = match resolve_action(future, &self.results, self.accounts) {
            Ok(action) => action,
            Err(err) => {
                self.fail(id, &err)?;
                return Ok(None);
            }
        };
        let fingerprint = fingerprint(id, &action)?;

        if let Some(result) = action.local_result() {
            self.journal.record_start(id, &fingerprint, None, None)?;
            self.journal.record_completion(id, result.clone())?;
            debug!(future = id.as_str(), "local future completed");
            self.complete(id, result, None);
            return Ok(None);
        }

        let Some(from) = action.sender() else {
            return Ok(None);
        };
        self.actions.insert(id.clone(), action.clone());
        Ok(Some(Dispatch {
            id: id.clone(),
            action,
            fingerprint,
            from,
        }))
    }

    fn handle_request(&mut self, request: JournalRequest) -> Result<(), JournalError> {
        match request {
            JournalRequest::Start {
                id,
                fingerprint,
                sender,
                nonce,
                ack,
            } => {
                if ack.is_closed() {
                    return Ok(());
                }
                let written = self
                    .journal
                    .record_start(&id, &fingerprint, Some(sender), Some(nonce));
                if written.is_ok() {
                    self.started.insert(id);
                }
                let _ = ack.send(written.is_ok());
                written
            }
            JournalRequest::Submitted { id, tx_hash, ack } => {
                self.transactions += 1;
                let written = self.journal.record_submitted(&id, tx_hash.as_str());
                let _ = ack.send(written.is_ok());
                written
            }
        }
    }

    fn handle_outcome(&mut self, id: &FutureId, outcome: TaskOutcome) -> Result<(), JournalError> {
        match outcome {
            TaskOutcome::Confirmed(receipt) => match &receipt.status {
                ReceiptStatus::Success => {
                    let result = match self.actions.get(id) {
                        Some(action) => receipt_result(action, &receipt),
                        None => Err(ExecutionError::MissingResult(id.clone())),
                    };
                    match result {
                        Ok(result) => {
                            self.journal.record_completion(id, result.clone())?;
                            info!(future = id.as_str(), tx = receipt.tx_hash.as_str(), "confirmed");
                            self.complete(id, result, Some(receipt.tx_hash.to_string()));
                            Ok(())
                        }
                        Err(err) => self.fail(id, &err),
                    }
                }
                ReceiptStatus::Reverted { reason } => {
                    let err = ExecutionError::TransactionReverted {
                        tx_hash: receipt.tx_hash.to_string(),
                        reason: reason.clone(),
                    };
                    self.fail(id, &err)
                }
            },
            TaskOutcome::SubmissionFailed(transport) => {
                self.fail(id, &ExecutionError::SubmissionFailed(transport.to_string()))
            }
            TaskOutcome::Unconfirmed { tx_hash, error } => {
                warn!(future = id.as_str(), tx = tx_hash.as_str(), %error, "confirmation unknown");
                self.outcomes.insert(
                    id.clone(),
                    FutureOutcome::PendingUnknown {
                        reason: format!("transaction {tx_hash} sent but not confirmed: {error}"),
                    },
                );
                self.block_descendants(id);
                Ok(())
            }
            TaskOutcome::Halted => {
                self.outcomes.insert(id.clone(), FutureOutcome::NotStarted);
                self.block_descendants(id);
                Ok(())
            }
        }
    }

    /// A task ended without reporting back.
    fn interrupted(&mut self, id: &FutureId, reason: &str) {
        let outcome = if self.started.contains(id) {
            FutureOutcome::PendingUnknown {
                reason: reason.to_string(),
            }
        } else {
            FutureOutcome::NotStarted
        };
        self.outcomes.insert(id.clone(), outcome);
        self.block_descendants(id);
    }

    fn complete(&mut self, id: &FutureId, result: Value, tx_hash: Option<String>) {
        self.results.insert(id.clone(), result.clone());
        self.outcomes
            .insert(id.clone(), FutureOutcome::Completed { result, tx_hash });
        let graph = self.graph;
        for dependent in graph.dependents(id) {
            if self.outcomes.contains_key(dependent) {
                continue;
            }
            if let Some(count) = self.waiting.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.waiting.remove(dependent);
                    self.ready.push_back(dependent.clone());
                }
            }
        }
    }

    fn fail(&mut self, id: &FutureId, err: &ExecutionError) -> Result<(), JournalError> {
        warn!(future = id.as_str(), error = %err, "future failed");
        self.journal.record_failure(id, &err.to_string())?;
        self.outcomes.insert(
            id.clone(),
            FutureOutcome::Failed {
                error: err.to_string(),
            },
        );
        self.block_descendants(id);
        Ok(())
    }

    fn block_descendants(&mut self, id: &FutureId) {
        for descendant in self.graph.descendants(id) {
            self.waiting.remove(&descendant);
            self.outcomes
                .entry(descendant)
                .or_insert_with(|| FutureOutcome::Blocked { on: id.clone() });
        }
    }

    fn finish(self, aborted: bool) -> RunReport {
        let mut outcomes = self.outcomes;
        for id in self.graph.order() {
            outcomes
                .entry(id.clone())
                .or_insert(FutureOutcome::NotStarted);
        }
        RunReport {
            outcomes,
            transactions_submitted: self.transactions,
            orphaned: self.orphaned,
            aborted,
        }
    }
}

/// Send a journal request and wait for the record to be durable.
async fn journal_write(
    journal: &mpsc::Sender<JournalRequest>,
    request: impl FnOnce(oneshot::Sender<bool>) -> JournalRequest,
) -> bool {
    let (ack, done) = oneshot::channel();
    if journal.send(request(ack)).await.is_err() {
        return false;
    }
    done.await.unwrap_or(false)
}

async fn execute_onchain(
    dispatch: Dispatch,
    chain: Arc<dyn ChainClient>,
    lane: Arc<Mutex<Lane>>,
    journal: mpsc::Sender<JournalRequest>,
) -> TaskOutcome {
    let Dispatch {
        id,
        action,
        fingerprint,
        from,
    } = dispatch;

    let mut lane = lane.lock().await;
    let nonce = match lane.next_nonce {
        Some(nonce) => nonce,
        None => match chain.transaction_count(from).await {
            Ok(count) => count,
            Err(err) => return TaskOutcome::SubmissionFailed(err),
        },
    };
    let Some(tx) = action.to_transaction(nonce) else {
        return TaskOutcome::SubmissionFailed(TransportError::Rejected(format!(
            "'{id}' is not an on-chain action"
        )));
    };

    let started = journal_write(&journal, |ack| JournalRequest::Start {
        id: id.clone(),
        fingerprint,
        sender: from,
        nonce,
        ack,
    })
    .await;
    if !started {
        return TaskOutcome::Halted;
    }

    let tx_hash = match chain.submit(tx).await {
        Ok(hash) => hash,
        Err(err) => {
            // The chain's view of the nonce is authoritative after a refusal.
            lane.next_nonce = None;
            return TaskOutcome::SubmissionFailed(err);
        }
    };
    lane.next_nonce = Some(nonce + 1);
    drop(lane);
    debug!(future = id.as_str(), tx = tx_hash.as_str(), nonce, "submitted");

    let recorded = journal_write(&journal, |ack| JournalRequest::Submitted {
        id: id.clone(),
        tx_hash: tx_hash.clone(),
        ack,
    })
    .await;
    if !recorded {
        return TaskOutcome::Unconfirmed {
            tx_hash,
            error: "journal refused the transaction reference".to_string(),
        };
    }

    match chain.wait_for_receipt(&tx_hash).await {
        Ok(receipt) => TaskOutcome::Confirmed(receipt),
        Err(err) => TaskOutcome::Unconfirmed {
            tx_hash,
            error: err.to_string(),
        },
    }
}
