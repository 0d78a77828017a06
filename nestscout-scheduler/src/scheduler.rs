//! Drains the dirty set onto a bounded worker pool.
//!
//! One mutex guards the tracker together with the retry and failure
//! ledgers; it is never held across an `.await`. Versions are assigned when a
//! pair is dispatched, so a commit from an older dispatch can never replace
//! a newer score.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use nestscout_core::{
    Aggregator, ProfileId, PropertyId, RuleContribution, RuleEvaluator, ScoreCard, ScorePair,
    StandardEvaluator,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore, broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep_until, timeout};

use crate::config::{ConfigError, EngineConfig};
use crate::dirty::{DirtyReason, DirtySet, MarkOutcome, MarkSummary};
use crate::error::{ComputeError, PermanentError, TransientError};
use crate::source::ScoringSource;
use crate::store::{CommitOutcome, Score, ScoreStore};

const EVENT_CAPACITY: usize = 1_024;

/// Broadcast after every successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCommitted {
    /// Scored listing.
    pub property: PropertyId,
    /// Profile whose rules produced the score.
    pub profile: ProfileId,
    /// New total.
    pub score: f64,
    /// New breakdown.
    pub breakdown: Vec<RuleContribution>,
    /// Committed version.
    pub version: u64,
}

impl From<&Score> for ScoreCommitted {
    fn from(score: &Score) -> Self {
        Self {
            property: score.pair.property,
            profile: score.pair.profile,
            score: score.total,
            breakdown: score.breakdown.clone(),
            version: score.version,
        }
    }
}

/// A pair that stopped being retried.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    /// Failed pair.
    pub pair: ScorePair,
    /// Final error.
    pub error: PermanentError,
    /// Attempts made.
    pub attempts: u32,
    /// When the pair was given up on.
    pub failed_at: SystemTime,
}

/// Where a pair currently sits in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Nothing outstanding.
    Idle,
    /// Waiting in the dirty set.
    Pending(DirtyReason),
    /// Being computed.
    InFlight,
    /// Backing off after a transient failure.
    AwaitingRetry {
        /// Failures so far.
        attempt: u32,
        /// When the retry becomes eligible.
        due: Instant,
    },
    /// Recorded in the failure ledger.
    Failed,
}

/// Counters for one or more scheduling cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// Computations started.
    pub dispatched: usize,
    /// Scores committed.
    pub committed: usize,
    /// Results discarded because a newer version was stored.
    pub stale: usize,
    /// Transient failures scheduled for retry.
    pub retried: usize,
    /// Pairs moved to the failure ledger.
    pub failed: usize,
    /// Pairs whose property or profile vanished.
    pub dropped: usize,
}

impl CycleReport {
    fn absorb(&mut self, other: Self) {
        self.dispatched = self.dispatched.saturating_add(other.dispatched);
        self.committed = self.committed.saturating_add(other.committed);
        self.stale = self.stale.saturating_add(other.stale);
        self.retried = self.retried.saturating_add(other.retried);
        self.failed = self.failed.saturating_add(other.failed);
        self.dropped = self.dropped.saturating_add(other.dropped);
    }
}

/// Outcome of [`Scheduler::admit_sweep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepAdmission {
    /// Pairs newly queued.
    pub admitted: usize,
    /// Last candidate examined.
    pub last: Option<ScorePair>,
    /// Set when the tracker refused further bulk entries.
    pub deferred: bool,
    /// Set when every candidate was examined.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy)]
struct Deadlines {
    query: Duration,
    signal: Duration,
}

#[derive(Debug)]
struct State {
    dirty: DirtySet,
    attempts: HashMap<ScorePair, u32>,
    retries: HashMap<ScorePair, Instant>,
    failures: BTreeMap<ScorePair, FailureRecord>,
}

impl State {
    fn note_marked(&mut self, pair: ScorePair, reason: DirtyReason, outcome: MarkOutcome) {
        if outcome == MarkOutcome::Deferred
            || matches!(reason, DirtyReason::Sweep | DirtyReason::Retry)
        {
            return;
        }
        self.attempts.remove(&pair);
        self.retries.remove(&pair);
        self.failures.remove(&pair);
    }

    fn note_summary(&mut self, summary: &MarkSummary, reason: DirtyReason) {
        for (pair, outcome) in &summary.outcomes {
            self.note_marked(*pair, reason, *outcome);
        }
    }

    fn promote_due_retries(&mut self, now: Instant) {
        let due: Vec<ScorePair> = self
            .retries
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(pair, _)| *pair)
            .collect();
        for pair in due {
            self.retries.remove(&pair);
            self.dirty.mark_dirty(pair, DirtyReason::Retry);
        }
    }

    fn forget(&mut self, keep: impl Fn(&ScorePair) -> bool) {
        self.attempts.retain(|pair, _| keep(pair));
        self.retries.retain(|pair, _| keep(pair));
        self.failures.retain(|pair, _| keep(pair));
    }
}

/// Bounded-concurrency score recomputation.
#[derive(Debug)]
pub struct Scheduler<S, E = StandardEvaluator> {
    source: Arc<S>,
    aggregator: Arc<Aggregator<E>>,
    store: Arc<ScoreStore>,
    config: EngineConfig,
    state: Mutex<State>,
    next_version: AtomicU64,
    workers: Arc<Semaphore>,
    wake: Notify,
    events: broadcast::Sender<ScoreCommitted>,
}

impl<S> Scheduler<S>
where
    S: ScoringSource + 'static,
{
    /// Build a scheduler using the standard rule evaluator.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when `config` fails validation.
    pub fn new(
        source: Arc<S>,
        store: Arc<ScoreStore>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_aggregator(source, store, config, Aggregator::new())
    }
}

impl<S, E> Scheduler<S, E>
where
    S: ScoringSource + 'static,
    E: RuleEvaluator + 'static,
{
    /// Build a scheduler around a custom aggregator.
    ///
    /// Versions continue from the highest one already in `store`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when `config` fails validation.
    pub fn with_aggregator(
        source: Arc<S>,
        store: Arc<ScoreStore>,
        config: EngineConfig,
        aggregator: Aggregator<E>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = State {
            dirty: DirtySet::new(config.queue_capacity, config.fan_out),
            attempts: HashMap::new(),
            retries: HashMap::new(),
            failures: BTreeMap::new(),
        };
        Ok(Self {
            source,
            aggregator: Arc::new(aggregator),
            next_version: AtomicU64::new(store.max_version()),
            store,
            workers: Arc::new(Semaphore::new(config.workers)),
            config,
            state: Mutex::new(state),
            wake: Notify::new(),
            events,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Store receiving commits.
    #[must_use]
    pub const fn store(&self) -> &Arc<ScoreStore> {
        &self.store
    }

    /// Subscribe to commit notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScoreCommitted> {
        self.events.subscribe()
    }

    /// Make `profile` a fan-out target.
    pub fn register_profile(&self, profile: ProfileId) {
        self.lock().dirty.register_profile(profile);
    }

    /// Record or clear an affinity. Clearing it drops any queued work and
    /// ledger entries for the pair.
    pub fn set_affinity(&self, property: PropertyId, profile: ProfileId, active: bool) {
        let mut state = self.lock();
        state.dirty.set_affinity(property, profile, active);
        if !active {
            let pair = ScorePair::new(property, profile);
            state.dirty.discard(pair);
            state.forget(|p| *p != pair);
        }
    }

    /// Report whether the fan-out policy materializes `pair`.
    #[must_use]
    pub fn is_tracked(&self, pair: ScorePair) -> bool {
        self.lock().dirty.is_tracked(pair)
    }

    /// Drop all queued work and ledger entries of `property`.
    pub fn forget_property(&self, property: PropertyId) {
        let mut state = self.lock();
        state.dirty.discard_property(property);
        state.forget(|pair| pair.property != property);
    }

    /// Stop tracking `profile` and drop its queued work and ledger entries.
    pub fn forget_profile(&self, profile: ProfileId) {
        let mut state = self.lock();
        state.dirty.discard_profile(profile);
        state.forget(|pair| pair.profile != profile);
    }

    /// Mark one pair dirty.
    ///
    /// A mark other than a sweep clears any scheduled retry and failure
    /// record for the pair.
    #[must_use]
    pub fn mark(&self, pair: ScorePair, reason: DirtyReason) -> MarkOutcome {
        let outcome = {
            let mut state = self.lock();
            let outcome = state.dirty.mark_dirty(pair, reason);
            state.note_marked(pair, reason, outcome);
            outcome
        };
        self.wake.notify_one();
        outcome
    }

    /// Mark `property` against every profile the fan-out policy reaches.
    #[must_use]
    pub fn mark_for_property(&self, property: PropertyId, reason: DirtyReason) -> MarkSummary {
        let summary = {
            let mut state = self.lock();
            let summary = state.dirty.mark_dirty_for_property(property, reason);
            state.note_summary(&summary, reason);
            summary
        };
        self.wake.notify_one();
        summary
    }

    /// Mark `profile` against each tracked property in `properties`.
    #[must_use]
    pub fn mark_for_profile<I>(
        &self,
        profile: ProfileId,
        properties: I,
        reason: DirtyReason,
    ) -> MarkSummary
    where
        I: IntoIterator<Item = PropertyId>,
    {
        let summary = {
            let mut state = self.lock();
            let summary = state.dirty.mark_dirty_for_profile(profile, properties, reason);
            state.note_summary(&summary, reason);
            summary
        };
        self.wake.notify_one();
        summary
    }

    /// Mark each tracked pair in `pairs`.
    #[must_use]
    pub fn mark_tracked<I>(&self, pairs: I, reason: DirtyReason) -> MarkSummary
    where
        I: IntoIterator<Item = ScorePair>,
    {
        let summary = {
            let mut state = self.lock();
            let mut summary = MarkSummary::default();
            for pair in pairs {
                if state.dirty.is_tracked(pair) {
                    let outcome = state.dirty.mark_dirty(pair, reason);
                    state.note_marked(pair, reason, outcome);
                    summary.outcomes.push((pair, outcome));
                }
            }
            summary
        };
        self.wake.notify_one();
        summary
    }

    /// Queue up to `limit` tracked candidates for background re-validation.
    ///
    /// Pairs that are failed or backing off are skipped. Admission stops at
    /// the first pair the tracker defers.
    #[must_use]
    pub fn admit_sweep<I>(&self, candidates: I, limit: usize) -> SweepAdmission
    where
        I: IntoIterator<Item = ScorePair>,
    {
        let mut admission = SweepAdmission::default();
        let mut state = self.lock();
        let mut candidates = candidates.into_iter();
        while admission.admitted < limit {
            let Some(pair) = candidates.next() else {
                admission.exhausted = true;
                break;
            };
            let skip = !state.dirty.is_tracked(pair)
                || state.failures.contains_key(&pair)
                || state.retries.contains_key(&pair);
            if !skip {
                match state.dirty.mark_dirty(pair, DirtyReason::Sweep) {
                    MarkOutcome::Deferred => {
                        admission.deferred = true;
                        break;
                    }
                    MarkOutcome::Inserted => {
                        admission.admitted = admission.admitted.saturating_add(1);
                    }
                    _ => {}
                }
            }
            admission.last = Some(pair);
        }
        drop(state);
        if admission.admitted > 0 {
            self.wake.notify_one();
        }
        admission
    }

    /// Pipeline position of `pair`.
    #[must_use]
    pub fn pair_state(&self, pair: ScorePair) -> PairState {
        let state = self.lock();
        if let Some(reason) = state.dirty.reason(pair) {
            return PairState::Pending(reason);
        }
        if state.dirty.is_checked_out(pair) {
            return PairState::InFlight;
        }
        if let Some(due) = state.retries.get(&pair) {
            let attempt = state.attempts.get(&pair).copied().unwrap_or_default();
            return PairState::AwaitingRetry { attempt, due: *due };
        }
        if state.failures.contains_key(&pair) {
            return PairState::Failed;
        }
        PairState::Idle
    }

    /// Snapshot of the failure ledger, ordered by pair.
    #[must_use]
    pub fn failed_pairs(&self) -> Vec<FailureRecord> {
        self.lock().failures.values().cloned().collect()
    }

    /// Number of pending pairs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().dirty.len()
    }

    /// Report whether no work is pending, in flight or backing off.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.dirty.is_empty() && state.dirty.checked_out() == 0 && state.retries.is_empty()
    }

    fn next_retry_due(&self) -> Option<Instant> {
        self.lock().retries.values().min().copied()
    }

    /// Drain one batch and wait for every computation in it.
    #[must_use]
    pub async fn run_cycle(&self) -> CycleReport {
        let batch = {
            let mut state = self.lock();
            state.promote_due_retries(Instant::now());
            state.dirty.drain(self.config.drain_batch)
        };
        let mut report = CycleReport {
            dispatched: batch.len(),
            ..CycleReport::default()
        };
        if batch.is_empty() {
            return report;
        }

        let deadlines = Deadlines {
            query: self.config.query_timeout,
            signal: self.config.signal_timeout,
        };
        let mut outstanding: HashMap<ScorePair, u64> = HashMap::with_capacity(batch.len());
        let mut tasks = JoinSet::new();
        for entry in batch {
            let pair = entry.pair;
            let version = self
                .next_version
                .fetch_add(1, Ordering::Relaxed)
                .saturating_add(1);
            outstanding.insert(pair, version);
            debug!("dispatching {pair} v{version} ({:?})", entry.reason);

            let source = Arc::clone(&self.source);
            let aggregator = Arc::clone(&self.aggregator);
            let workers = Arc::clone(&self.workers);
            tasks.spawn(async move {
                // The semaphore is never closed; a failed acquire only means
                // running without a permit.
                let permit = workers.acquire_owned().await.ok();
                let result = compute(source.as_ref(), &aggregator, pair, deadlines).await;
                drop(permit);
                (pair, version, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((pair, version, result)) => {
                    outstanding.remove(&pair);
                    self.complete(pair, version, result, &mut report);
                }
                Err(err) => warn!("score worker ended abnormally: {err}"),
            }
        }
        for (pair, version) in outstanding {
            let lost = ComputeError::from(TransientError::WorkerLost { pair });
            self.complete(pair, version, Err(lost), &mut report);
        }
        report
    }

    fn complete(
        &self,
        pair: ScorePair,
        version: u64,
        result: Result<ScoreCard, ComputeError>,
        report: &mut CycleReport,
    ) {
        let mut state = self.lock();
        let checkout = state.dirty.complete(pair);
        if checkout.cancelled {
            // The pair was deleted mid-flight; its result describes an
            // entity the engine no longer scores.
            debug!("discarding {pair} v{version}; the pair was cancelled");
            if let Some(stale) = self.store.remove(pair) {
                debug!("removed v{} of {pair}", stale.version);
            }
            report.dropped = report.dropped.saturating_add(1);
        } else {
            self.settle(&mut state, pair, version, result, report);
        }
        if let Some(reason) = checkout.redrain {
            debug!("re-draining {pair} ({reason:?})");
            state.note_marked(pair, reason, MarkOutcome::Inserted);
        }
    }

    fn settle(
        &self,
        state: &mut State,
        pair: ScorePair,
        version: u64,
        result: Result<ScoreCard, ComputeError>,
        report: &mut CycleReport,
    ) {
        match result {
            Ok(card) => {
                state.forget(|p| *p != pair);
                let score = Score::from_card(pair, card, version);
                let event = ScoreCommitted::from(&score);
                match self.store.commit(score) {
                    CommitOutcome::Committed => {
                        report.committed = report.committed.saturating_add(1);
                        let receivers = self.events.send(event).unwrap_or_default();
                        debug!("committed {pair} v{version} ({receivers} subscribers)");
                    }
                    CommitOutcome::Stale { current } => {
                        report.stale = report.stale.saturating_add(1);
                        debug!("discarded {pair} v{version}; v{current} already stored");
                    }
                }
            }
            Err(ComputeError::Transient(err)) => {
                let attempt = state
                    .attempts
                    .get(&pair)
                    .copied()
                    .unwrap_or_default()
                    .saturating_add(1);
                if attempt >= self.config.retry.max_attempts {
                    warn!("giving up on {pair} after {attempt} attempts: {err}");
                    state.attempts.remove(&pair);
                    state.failures.insert(
                        pair,
                        FailureRecord {
                            pair,
                            error: PermanentError::RetriesExhausted {
                                attempts: attempt,
                                last: err,
                            },
                            attempts: attempt,
                            failed_at: SystemTime::now(),
                        },
                    );
                    report.failed = report.failed.saturating_add(1);
                } else {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    info!("retrying {pair} in {delay:?} (attempt {attempt}): {err}");
                    let now = Instant::now();
                    state.attempts.insert(pair, attempt);
                    state
                        .retries
                        .insert(pair, now.checked_add(delay).unwrap_or(now));
                    report.retried = report.retried.saturating_add(1);
                }
            }
            Err(ComputeError::Permanent(err)) => {
                warn!("{pair} failed permanently: {err}");
                let attempts = state
                    .attempts
                    .remove(&pair)
                    .unwrap_or_default()
                    .saturating_add(1);
                state.retries.remove(&pair);
                state.failures.insert(
                    pair,
                    FailureRecord {
                        pair,
                        error: err,
                        attempts,
                        failed_at: SystemTime::now(),
                    },
                );
                report.failed = report.failed.saturating_add(1);
            }
            Err(ComputeError::NotFound { .. }) => {
                debug!("dropping {pair}; its property or profile is gone");
                state.forget(|p| *p != pair);
                if let Some(stale) = self.store.remove(pair) {
                    debug!("removed v{} of {pair}", stale.version);
                }
                report.dropped = report.dropped.saturating_add(1);
            }
        }
    }

    /// Run cycles until nothing is pending, in flight or backing off.
    ///
    /// Sleeps through retry backoffs, so every transient failure is either
    /// resolved or recorded as permanent before this returns.
    #[must_use]
    pub async fn run_until_idle(&self) -> CycleReport {
        let mut total = CycleReport::default();
        loop {
            let report = self.run_cycle().await;
            total.absorb(report);
            if report.dispatched > 0 {
                continue;
            }
            match self.next_retry_due() {
                Some(due) => sleep_until(due).await,
                None => break,
            }
        }
        total
    }

    /// Run the scheduler on a background task until `shutdown` turns true
    /// or its sender is dropped.
    #[must_use]
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<CycleReport> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut total = CycleReport::default();
            while !*shutdown.borrow() {
                let report = scheduler.run_cycle().await;
                total.absorb(report);
                if report.dispatched > 0 {
                    continue;
                }
                let retry_due = scheduler.next_retry_due();
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = scheduler.wake.notified() => {}
                    () = idle_until(retry_due) => {}
                }
            }
            info!(
                "scheduler stopped after {} computations ({} committed)",
                total.dispatched, total.committed
            );
            total
        })
    }
}

async fn idle_until(due: Option<Instant>) {
    match due {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

async fn compute<S, E>(
    source: &S,
    aggregator: &Aggregator<E>,
    pair: ScorePair,
    deadlines: Deadlines,
) -> Result<ScoreCard, ComputeError>
where
    S: ScoringSource + ?Sized,
    E: RuleEvaluator,
{
    let Some(property) = source
        .property(pair.property)
        .await
        .map_err(TransientError::from)?
    else {
        return Err(ComputeError::NotFound { pair });
    };
    let Some(profile) = source
        .profile(pair.profile)
        .await
        .map_err(TransientError::from)?
    else {
        return Err(ComputeError::NotFound { pair });
    };
    let facts = timeout(deadlines.query, source.proximity(pair.property))
        .await
        .map_err(|_elapsed| TransientError::QueryTimeout {
            pair,
            after: deadlines.query,
        })?
        .map_err(TransientError::from)?;
    let signals = timeout(deadlines.signal, source.signals(pair.property))
        .await
        .map_err(|_elapsed| TransientError::SignalTimeout {
            pair,
            after: deadlines.signal,
        })?
        .map_err(TransientError::from)?;
    aggregator
        .compute(&property, &profile, &facts, &signals)
        .map_err(|err| ComputeError::Permanent(PermanentError::from(err)))
}
