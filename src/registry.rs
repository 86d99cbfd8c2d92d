//! Session registry
//!
//! The registry owns the canonical copy of every session. All access goes
//! through short closures executed under a single mutex; callers never hold
//! the lock across an `.await` or an engine call. Background workers only
//! keep the session id and the run generation they were started with, and
//! every write they make is checked against both via
//! [`SessionRegistry::update_active_run`].

use crate::ledger::BroadcastOutcome;
use crate::target::Target;
use crate::types::{PuzzleHeader, SessionId, SessionState};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Where a session came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Created by StartMining
    Fresh,
    /// Created by ResumeMining from a state file
    Resumed { state_file: PathBuf },
}

/// Broadcast progress for a completed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BroadcastStatus {
    /// No solution yet
    NotAttempted,
    /// Solution found but the policy disabled broadcasting
    Skipped,
    /// Submission in flight
    Pending,
    Accepted,
    Rejected(String),
}

impl From<BroadcastOutcome> for BroadcastStatus {
    fn from(outcome: BroadcastOutcome) -> Self {
        if outcome.accepted {
            BroadcastStatus::Accepted
        } else {
            BroadcastStatus::Rejected(outcome.error_message.unwrap_or_default())
        }
    }
}

/// A mining session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub header: PuzzleHeader,
    pub target: Target,
    /// `None` means unbounded
    pub time_limit: Option<Duration>,
    pub state: SessionState,
    /// Generation of the worker allowed to write to this session
    pub run: u64,
    pub origin: SessionOrigin,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub broadcast: BroadcastStatus,
    pub failure: Option<String>,
}

impl Session {
    /// Create a session in Mining with the given header
    pub fn new(
        id: SessionId,
        header: PuzzleHeader,
        target: Target,
        time_limit: Option<Duration>,
        origin: SessionOrigin,
    ) -> Self {
        Self {
            id,
            header,
            target,
            time_limit,
            state: SessionState::Mining,
            run: 1,
            origin,
            created_at: Utc::now(),
            finished_at: None,
            broadcast: BroadcastStatus::NotAttempted,
            failure: None,
        }
    }

    /// Leave Mining for `state`, retiring the current run
    pub fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.run += 1;
        self.finished_at = Some(Utc::now());
    }

    /// Client-facing view of the session
    pub fn status(&self) -> SessionStatus {
        let nonce = self.header.nonce;
        let message = match self.state {
            SessionState::Mining => "Mining in progress".to_string(),
            SessionState::Completed => format!("Mining complete. Found nonce: 0x{:x}", nonce),
            SessionState::Idle => format!("Mining paused at nonce 0x{:x}", nonce),
            SessionState::Failed => match &self.failure {
                Some(reason) => format!(
                    "Mining stopped without a solution. Last nonce: 0x{:x} ({})",
                    nonce, reason
                ),
                None => format!("Mining stopped without a solution. Last nonce: 0x{:x}", nonce),
            },
        };
        let solution_found = self.state == SessionState::Completed;

        SessionStatus {
            session_id: self.id.clone(),
            state: self.state,
            is_mining: self.state.is_mining(),
            current_nonce: nonce.to_string(),
            message,
            solution_found,
            solution_nonce: solution_found.then(|| format!("0x{:x}", nonce)),
            broadcast: self.broadcast.clone(),
        }
    }
}

/// Answer to GetStatus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub is_mining: bool,
    /// Decimal rendering of the live nonce
    pub current_nonce: String,
    pub message: String,
    pub solution_found: bool,
    pub solution_nonce: Option<String>,
    pub broadcast: BroadcastStatus,
}

/// Lock-protected map of sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session; ids are never reused
    pub fn insert(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&session.id) {
            return Err(Error::internal(
                "registry",
                format!("duplicate session id {}", session.id),
            ));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Read a session
    pub fn with_session<R>(&self, id: &SessionId, f: impl FnOnce(&Session) -> R) -> Result<R> {
        let sessions = self.sessions.lock();
        sessions.get(id).map(f).ok_or_else(|| Error::not_found(id))
    }

    /// Mutate a session; the closure decides whether the transition is legal
    pub fn update<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<R> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        f(session)
    }

    /// Mutate a session only while it is still Mining under run `run`.
    ///
    /// Returns `None` when the session is gone, no longer Mining, or owned
    /// by a newer run. Workers use this for every progress and completion
    /// write so that a late result never overwrites a pause.
    pub fn update_active_run<R>(
        &self,
        id: &SessionId,
        run: u64,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(session) if session.state.is_mining() && session.run == run => Some(f(session)),
            _ => None,
        }
    }

    /// Set the broadcast status of a session if it still exists
    pub fn set_broadcast(&self, id: &SessionId, status: BroadcastStatus) {
        if let Some(session) = self.sessions.lock().get_mut(id) {
            session.broadcast = status;
        }
    }

    /// Remove non-Mining sessions that finished before `cutoff`
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<SessionId> {
        let mut sessions = self.sessions.lock();
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| {
                !s.state.is_mining()
                    && s.broadcast != BroadcastStatus::Pending
                    && s.finished_at.is_some_and(|at| at < cutoff)
            })
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }

    /// Total number of sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Number of sessions in Mining
    pub fn mining_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.state.is_mining())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn session(id: &str) -> Session {
        Session::new(
            SessionId::new(id),
            PuzzleHeader::new([0; 32], [1; 20], [2; 20], 0, 0, 0),
            Target::max(),
            None,
            SessionOrigin::Fresh,
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = SessionRegistry::new();
        registry.insert(session("a")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.mining_count(), 1);
        let state = registry.with_session(&"a".into(), |s| s.state).unwrap();
        assert_eq!(state, SessionState::Mining);
        assert_matches!(
            registry.with_session(&"b".into(), |s| s.state),
            Err(Error::NotFound { .. })
        );
        assert!(registry.insert(session("a")).is_err());
    }

    #[test]
    fn test_active_run_guard() {
        let registry = SessionRegistry::new();
        registry.insert(session("a")).unwrap();
        let id = SessionId::new("a");

        assert_eq!(registry.update_active_run(&id, 1, |s| s.header.nonce = 10), Some(()));
        assert_eq!(registry.update_active_run(&id, 2, |s| s.header.nonce = 20), None);

        registry
            .update(&id, |s| {
                s.finish(SessionState::Idle);
                Ok(())
            })
            .unwrap();
        assert_eq!(registry.update_active_run(&id, 1, |s| s.header.nonce = 30), None);
        assert_eq!(registry.with_session(&id, |s| s.header.nonce).unwrap(), 10);
    }

    #[test]
    fn test_status_messages() {
        let mut s = session("a");
        s.header.nonce = 255;
        let status = s.status();
        assert!(status.is_mining);
        assert_eq!(status.current_nonce, "255");
        assert!(!status.solution_found);

        s.finish(SessionState::Completed);
        let status = s.status();
        assert!(!status.is_mining);
        assert_eq!(status.message, "Mining complete. Found nonce: 0xff");
        assert_eq!(status.solution_nonce.as_deref(), Some("0xff"));

        let mut idle = session("b");
        idle.header.nonce = 16;
        idle.finish(SessionState::Idle);
        assert_eq!(idle.status().message, "Mining paused at nonce 0x10");

        let mut failed = session("c");
        failed.failure = Some("engine crashed".into());
        failed.finish(SessionState::Failed);
        assert_eq!(
            failed.status().message,
            "Mining stopped without a solution. Last nonce: 0x0 (engine crashed)"
        );
    }

    #[test]
    fn test_eviction_skips_mining_sessions() {
        let registry = SessionRegistry::new();
        registry.insert(session("running")).unwrap();
        let mut done = session("done");
        done.finish(SessionState::Completed);
        registry.insert(done).unwrap();

        let evicted = registry.evict_finished_before(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(evicted, vec![SessionId::new("done")]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.mining_count(), 1);
    }

    #[test]
    fn test_broadcast_status_from_outcome() {
        assert_eq!(
            BroadcastStatus::from(BroadcastOutcome::accepted()),
            BroadcastStatus::Accepted
        );
        assert_eq!(
            BroadcastStatus::from(BroadcastOutcome::rejected("nope")),
            BroadcastStatus::Rejected("nope".into())
        );
    }
}
