//! Mining session coordinator
//!
//! Implements the four client operations (start, pause, resume, status) on
//! top of the [`SessionRegistry`]. Each Mining session is backed by one
//! tracked worker: a tokio task that runs the engine on a blocking thread
//! against a private copy of the header and reports back through the
//! registry's run-generation guard.
//!
//! Pause and completion race for the registry lock. Whichever takes it first
//! wins; pausing retires the worker's run, so a completion that arrives later
//! is logged and dropped.

use crate::codec;
use crate::engine::{HashSearchEngine, ProgressSink, SearchControl};
use crate::ledger::SolutionBroadcaster;
use crate::persistence::{SessionSnapshot, StateStore};
use crate::registry::{BroadcastStatus, Session, SessionOrigin, SessionRegistry, SessionStatus};
use crate::target::Target;
use crate::types::{PuzzleHeader, SessionId, SessionIdGenerator, SessionState};
use crate::utils::{current_timestamp_secs, non_zero_duration};
use crate::{Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Target used when a start request does not name one
pub const DEFAULT_TARGET: &str = "000000ffffff0000000000000000000000000000000000000000000000000000";

fn default_target() -> String {
    DEFAULT_TARGET.to_string()
}

/// Parameters of StartMining
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// 64 hex chars; empty means the all-zero digest
    #[serde(default)]
    pub hash: String,
    /// 40 hex chars
    pub addr1: String,
    /// 40 hex chars
    pub addr2: String,
    #[serde(default)]
    pub value: u32,
    /// Unix seconds, defaults to now
    #[serde(default = "current_timestamp_secs")]
    pub timestamp: u32,
    /// 0 or 1
    #[serde(default)]
    pub flag: u8,
    /// 64 hex chars, big-endian
    #[serde(default = "default_target")]
    pub target: String,
    /// Seconds, fractions allowed; 0 means unbounded
    #[serde(default)]
    pub time_limit: f64,
}

/// Convert a requested time limit in seconds.
///
/// Zero means unbounded. Values too large for a `Duration` saturate.
pub fn time_limit_from_secs(secs: f64) -> Result<Option<Duration>> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::invalid_argument(format!(
            "time_limit must be a finite, non-negative number of seconds (got {})",
            secs
        )));
    }
    let limit = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
    Ok(non_zero_duration(limit))
}

/// When solved tickets are sent to the ledger node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastPolicy {
    /// Master switch
    pub enabled: bool,
    /// Also broadcast solutions found by resumed sessions
    pub on_resume: bool,
}

impl BroadcastPolicy {
    /// Never broadcast
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            on_resume: false,
        }
    }

    /// Whether a session with this origin broadcasts its solution
    pub fn applies_to(&self, origin: &SessionOrigin) -> bool {
        self.enabled && (matches!(origin, SessionOrigin::Fresh) || self.on_resume)
    }
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            on_resume: true,
        }
    }
}

/// Outcome of [`SessionCoordinator::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that stopped within the grace period
    pub stopped: usize,
    /// Workers still running when the grace period ended
    pub abandoned: usize,
}

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

struct Inner {
    registry: SessionRegistry,
    workers: DashMap<SessionId, WorkerHandle>,
    ids: SessionIdGenerator,
    engine: Arc<dyn HashSearchEngine>,
    store: StateStore,
    broadcaster: Option<Arc<dyn SolutionBroadcaster>>,
    policy: BroadcastPolicy,
    shutdown: CancellationToken,
}

/// Builder for [`SessionCoordinator`]
pub struct CoordinatorBuilder {
    engine: Arc<dyn HashSearchEngine>,
    store: StateStore,
    broadcaster: Option<Arc<dyn SolutionBroadcaster>>,
    policy: BroadcastPolicy,
}

impl CoordinatorBuilder {
    /// Ledger used for solved tickets
    pub fn broadcaster(mut self, broadcaster: Arc<dyn SolutionBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Broadcast policy
    pub fn policy(mut self, policy: BroadcastPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> SessionCoordinator {
        if self.policy.enabled && self.broadcaster.is_none() {
            warn!("Broadcasting enabled but no ledger client configured; solutions will not be submitted");
        }

        SessionCoordinator {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                workers: DashMap::new(),
                ids: SessionIdGenerator::new(),
                engine: self.engine,
                store: self.store,
                broadcaster: self.broadcaster,
                policy: self.policy,
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

/// Coordinates mining sessions; cheap to clone
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Start building a coordinator around an engine and a state store
    pub fn builder(engine: Arc<dyn HashSearchEngine>, store: StateStore) -> CoordinatorBuilder {
        CoordinatorBuilder {
            engine,
            store,
            broadcaster: None,
            policy: BroadcastPolicy::default(),
        }
    }

    /// StartMining: validate, register and spawn a worker.
    ///
    /// Nothing is registered when validation fails.
    #[instrument(skip(self, request), fields(value = request.value, flag = request.flag))]
    pub fn start(&self, request: StartRequest) -> Result<SessionId> {
        let header = PuzzleHeader::from_hex_fields(
            &request.hash,
            &request.addr1,
            &request.addr2,
            request.value,
            request.timestamp,
            request.flag,
        )?;
        let target = Target::from_str(&request.target)?;
        let time_limit = time_limit_from_secs(request.time_limit)?;

        self.launch(header, target, time_limit, SessionOrigin::Fresh)
    }

    /// PauseMining: stop a Mining session and persist it.
    ///
    /// The session is Idle once the registry update commits. A failed write
    /// after that point is reported as [`Error::StateNotPersisted`].
    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    pub async fn pause(&self, session_id: &SessionId) -> Result<PathBuf> {
        let snapshot = self.inner.registry.update(session_id, |session| {
            if !session.state.is_mining() {
                return Err(Error::precondition_failed(format!(
                    "Session {} is not mining (state: {})",
                    session.id, session.state
                )));
            }
            session.finish(SessionState::Idle);
            Ok(SessionSnapshot {
                header: session.header,
                target: session.target,
            })
        })?;

        if let Some(worker) = self.inner.workers.get(session_id) {
            worker.cancel.cancel();
        }

        match self.inner.store.save(session_id, &snapshot).await {
            Ok(path) => {
                info!(nonce = snapshot.header.nonce, path = %path.display(), "Session paused");
                Ok(path)
            }
            Err(e) => {
                error!(category = e.category(), "Session paused but state was not saved: {}", e);
                Err(Error::state_not_persisted(session_id, e.to_string()))
            }
        }
    }

    /// ResumeMining: load a state file into a new session.
    ///
    /// Resumed sessions run without a time limit.
    #[instrument(skip(self, state_file), fields(state_file = %state_file.as_ref().display()))]
    pub async fn resume(&self, state_file: impl AsRef<Path>) -> Result<SessionId> {
        let path = state_file.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_argument("State file path is empty"));
        }

        let snapshot = self.inner.store.load(path).await?;
        self.launch(
            snapshot.header,
            snapshot.target,
            None,
            SessionOrigin::Resumed {
                state_file: path.to_path_buf(),
            },
        )
    }

    /// GetStatus: never waits on a search
    pub fn status(&self, session_id: &SessionId) -> Result<SessionStatus> {
        self.inner.registry.with_session(session_id, Session::status)
    }

    /// Remove finished sessions older than `ttl`
    #[instrument(skip(self))]
    pub fn evict_finished(&self, ttl: Duration) -> Vec<SessionId> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let evicted = self.inner.registry.evict_finished_before(cutoff);
        // Workers still winding down stay tracked until they exit
        self.reap_workers();

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted finished sessions");
        }
        evicted
    }

    /// Cancel every worker and wait up to `grace` for them to stop.
    ///
    /// Workers that outlive the grace period are detached and counted as
    /// abandoned. New sessions are refused once shutdown begins.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.inner.shutdown.cancel();

        let ids: Vec<SessionId> = self.inner.workers.iter().map(|w| w.key().clone()).collect();
        // A grace period past the clock's range waits without a deadline
        let deadline = Instant::now().checked_add(grace);
        let mut report = ShutdownReport::default();

        for id in ids {
            let Some((_, mut worker)) = self.inner.workers.remove(&id) else {
                continue;
            };
            let joined = match deadline {
                Some(deadline) => timeout_at(deadline, &mut worker.join).await,
                None => Ok((&mut worker.join).await),
            };
            match joined {
                Ok(_) => report.stopped += 1,
                Err(_) => {
                    warn!(session_id = %id, "Worker did not stop within the grace period; abandoning it");
                    report.abandoned += 1;
                }
            }
        }

        info!(stopped = report.stopped, abandoned = report.abandoned, "Coordinator shut down");
        report
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of sessions currently Mining
    pub fn active_sessions(&self) -> usize {
        self.inner.registry.mining_count()
    }

    /// Number of registered sessions
    pub fn total_sessions(&self) -> usize {
        self.inner.registry.len()
    }

    /// Directory where paused sessions are written
    pub fn state_dir(&self) -> &Path {
        self.inner.store.dir()
    }

    fn launch(
        &self,
        header: PuzzleHeader,
        target: Target,
        time_limit: Option<Duration>,
        origin: SessionOrigin,
    ) -> Result<SessionId> {
        if self.is_shutting_down() {
            return Err(Error::precondition_failed("Coordinator is shutting down"));
        }

        self.reap_workers();

        let id = self.inner.ids.next_id();
        let session = Session::new(id.clone(), header, target, time_limit, origin);
        let run = session.run;
        self.inner.registry.insert(session)?;

        let cancel = self.inner.shutdown.child_token();
        let job = WorkerJob {
            inner: Arc::clone(&self.inner),
            session_id: id.clone(),
            run,
            header,
            target,
            time_limit,
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(job.run());
        self.inner.workers.insert(id.clone(), WorkerHandle { cancel, join });

        info!(
            session_id = %id,
            target = %target,
            start_nonce = header.nonce,
            time_limit = ?time_limit,
            "Mining session started"
        );
        Ok(id)
    }

    fn reap_workers(&self) {
        self.inner.workers.retain(|_, worker| !worker.join.is_finished());
    }
}

/// Everything a worker needs; it never touches the session except through
/// the registry's run guard
struct WorkerJob {
    inner: Arc<Inner>,
    session_id: SessionId,
    run: u64,
    header: PuzzleHeader,
    target: Target,
    time_limit: Option<Duration>,
    cancel: CancellationToken,
}

enum SearchOutcome {
    Solved(PuzzleHeader),
    Stopped { header: PuzzleHeader, reason: String },
}

impl WorkerJob {
    async fn run(self) {
        let outcome = self.search().await;
        let inner = &self.inner;
        let id = &self.session_id;

        match outcome {
            SearchOutcome::Solved(header) => {
                let broadcast = inner.registry.update_active_run(id, self.run, |session| {
                    session.header.nonce = header.nonce;
                    session.finish(SessionState::Completed);
                    let broadcast = inner.broadcaster.is_some() && inner.policy.applies_to(&session.origin);
                    session.broadcast = if broadcast {
                        BroadcastStatus::Pending
                    } else {
                        BroadcastStatus::Skipped
                    };
                    broadcast
                });

                match broadcast {
                    Some(true) => {
                        info!(session_id = %id, nonce = header.nonce, "Solution found; broadcasting");
                        self.broadcast(&header).await;
                    }
                    Some(false) => {
                        info!(session_id = %id, nonce = header.nonce, "Solution found; broadcast skipped");
                    }
                    None => {
                        warn!(session_id = %id, nonce = header.nonce, "Solution arrived after the session left Mining; dropped");
                    }
                }
            }
            SearchOutcome::Stopped { header, reason } => {
                let committed = inner.registry.update_active_run(id, self.run, |session| {
                    session.header.nonce = header.nonce;
                    session.failure = Some(reason.clone());
                    session.finish(SessionState::Failed);
                });

                if committed.is_some() {
                    warn!(session_id = %id, nonce = header.nonce, "Mining stopped without a solution: {}", reason);
                } else {
                    debug!(session_id = %id, "Worker stopped after the session left Mining");
                }
            }
        }
    }

    async fn search(&self) -> SearchOutcome {
        let registry_inner = Arc::clone(&self.inner);
        let progress_id = self.session_id.clone();
        let run = self.run;
        let sink: ProgressSink = Arc::new(move |nonce| {
            registry_inner
                .registry
                .update_active_run(&progress_id, run, |session| session.header.nonce = nonce);
        });
        let control = SearchControl::new(self.cancel.clone()).with_progress(sink);

        let engine = Arc::clone(&self.inner.engine);
        let engine_name = engine.name();
        let mut header = self.header;
        let target = self.target;
        let time_limit = self.time_limit;

        let joined = tokio::task::spawn_blocking(move || {
            let result = engine.search(&mut header, &target, time_limit, &control);
            (result, header)
        })
        .await;

        match joined {
            Ok((Ok(true), header)) => SearchOutcome::Solved(header),
            Ok((Ok(false), header)) => {
                let reason = if self.cancel.is_cancelled() {
                    "search cancelled"
                } else if header.nonce == u32::MAX {
                    "nonce space exhausted"
                } else if time_limit.is_some() {
                    "time limit reached"
                } else {
                    "engine gave up"
                };
                SearchOutcome::Stopped {
                    header,
                    reason: reason.to_string(),
                }
            }
            Ok((Err(e), header)) => {
                error!(session_id = %self.session_id, engine = engine_name, "Search engine failed: {}", e);
                SearchOutcome::Stopped {
                    header,
                    reason: e.to_string(),
                }
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    format!("search engine {} panicked", engine_name)
                } else {
                    "search task was cancelled".to_string()
                };
                error!(session_id = %self.session_id, "{}", reason);
                let header = self
                    .inner
                    .registry
                    .with_session(&self.session_id, |session| session.header)
                    .unwrap_or(self.header);
                SearchOutcome::Stopped { header, reason }
            }
        }
    }

    async fn broadcast(&self, header: &PuzzleHeader) {
        let Some(broadcaster) = self.inner.broadcaster.as_ref() else {
            return;
        };
        let outcome = broadcaster.broadcast(&codec::encode_hex(header)).await;
        self.inner
            .registry
            .set_broadcast(&self.session_id, BroadcastStatus::from(outcome));
    }
}
