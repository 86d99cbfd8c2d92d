//! Hash search engines
//!
//! The coordinator only depends on [`HashSearchEngine`]. An engine is a
//! synchronous, potentially long-running computation: it advances the nonce
//! of the header it is given until the encoded header hashes to a value at or
//! below the target, the time limit passes, or the caller cancels.
//!
//! [`CpuSearchEngine`] is the reference implementation (double SHA-256 over
//! the canonical encoding).

use crate::codec::{self, ENCODED_LEN};
use crate::target::Target;
use crate::types::PuzzleHeader;
use crate::utils::{format_hash_rate, hash_rate};
use crate::Result;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Span};

/// Callback receiving the engine's current nonce
pub type ProgressSink = Arc<dyn Fn(u32) + Send + Sync>;

/// Cancellation and progress reporting handed to an engine
#[derive(Clone, Default)]
pub struct SearchControl {
    cancellation: CancellationToken,
    progress: Option<ProgressSink>,
}

impl SearchControl {
    /// Create a control bound to a cancellation token
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            progress: None,
        }
    }

    /// Attach a progress sink
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Whether the caller asked the search to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Publish the nonce the search has reached
    pub fn report_progress(&self, nonce: u32) {
        if let Some(sink) = &self.progress {
            sink(nonce);
        }
    }
}

impl fmt::Debug for SearchControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchControl")
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Hash search engine contract
///
/// `search` returns `Ok(true)` with `header.nonce` set to the winning nonce,
/// or `Ok(false)` when it stopped without a solution (cancelled, time limit
/// reached, nonce space exhausted). On `Ok(false)` the header carries the
/// last nonce the engine reached.
///
/// The coordinator runs the engine on a private copy of the header, so
/// in-place nonce updates are only seen once `search` returns. Engines must
/// call [`SearchControl::report_progress`] while searching for the nonce to
/// show up in status queries and to be saved when the session is paused.
pub trait HashSearchEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &'static str;

    /// Run the search on the calling thread
    fn search(
        &self,
        header: &mut PuzzleHeader,
        target: &Target,
        time_limit: Option<Duration>,
        control: &SearchControl,
    ) -> Result<bool>;
}

/// Double SHA-256 of an encoded header
pub fn header_digest(encoded: &[u8; ENCODED_LEN]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(encoded)).into()
}

/// Create a tracing span for a search
pub fn search_span(engine: &str, start_nonce: u32) -> Span {
    tracing::info_span!("search", engine = engine, start_nonce = start_nonce)
}

/// Single-threaded CPU search engine
#[derive(Debug, Clone)]
pub struct CpuSearchEngine {
    batch_size: u32,
}

impl CpuSearchEngine {
    /// Default number of nonces hashed between control checks
    pub const DEFAULT_BATCH_SIZE: u32 = 50_000;

    /// Create an engine with the given batch size (0 selects the default)
    pub fn new(batch_size: u32) -> Self {
        let batch_size = if batch_size == 0 {
            Self::DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        Self { batch_size }
    }

    /// Nonces hashed between control checks
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }
}

impl Default for CpuSearchEngine {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BATCH_SIZE)
    }
}

impl HashSearchEngine for CpuSearchEngine {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn search(
        &self,
        header: &mut PuzzleHeader,
        target: &Target,
        time_limit: Option<Duration>,
        control: &SearchControl,
    ) -> Result<bool> {
        let span = search_span(self.name(), header.nonce);
        let _enter = span.enter();

        let started = Instant::now();
        // A limit past the clock's range is no limit
        let deadline = time_limit.and_then(|limit| started.checked_add(limit));
        let mut encoded = codec::encode(header);
        let mut nonce = header.nonce;
        let mut hashes = 0u64;

        loop {
            if control.is_cancelled() {
                debug!(nonce, "Search cancelled");
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!(nonce, "Search time limit reached");
                break;
            }

            for _ in 0..self.batch_size {
                codec::inject_nonce(&mut encoded, nonce);
                hashes += 1;

                if target.is_met_by(&header_digest(&encoded)) {
                    header.nonce = nonce;
                    info!(
                        nonce,
                        hashes,
                        rate = %format_hash_rate(hash_rate(hashes, started.elapsed())),
                        "Solution found"
                    );
                    return Ok(true);
                }

                if nonce == u32::MAX {
                    header.nonce = nonce;
                    info!(hashes, "Nonce space exhausted");
                    return Ok(false);
                }
                nonce += 1;
            }

            header.nonce = nonce;
            control.report_progress(nonce);
        }

        header.nonce = nonce;
        debug!(
            hashes,
            rate = %format_hash_rate(hash_rate(hashes, started.elapsed())),
            "Search stopped without a solution"
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn header() -> PuzzleHeader {
        PuzzleHeader::new([0; 32], [0x11; 20], [0x22; 20], 7, 1_700_000_000, 0)
    }

    #[test]
    fn test_max_target_solves_immediately() {
        let engine = CpuSearchEngine::new(16);
        let mut header = header();
        let control = SearchControl::default();

        let found = engine.search(&mut header, &Target::max(), None, &control).unwrap();
        assert!(found);
        assert_eq!(header.nonce, 0);
    }

    #[test]
    fn test_solution_meets_target() {
        // One in 256 digests has a zero leading byte
        let target = Target::new([u64::MAX, u64::MAX, u64::MAX, 0x00ff_ffff_ffff_ffff]);
        let engine = CpuSearchEngine::new(64);
        let mut header = header();

        let found = engine
            .search(&mut header, &target, None, &SearchControl::default())
            .unwrap();
        assert!(found);
        assert_eq!(header_digest(&codec::encode(&header))[0], 0);
    }

    #[test]
    fn test_cancelled_search_returns_false() {
        let token = CancellationToken::new();
        token.cancel();
        let control = SearchControl::new(token);
        let engine = CpuSearchEngine::new(16);
        let mut header = header();
        header.nonce = 99;

        let found = engine.search(&mut header, &Target::min(), None, &control).unwrap();
        assert!(!found);
        assert_eq!(header.nonce, 99);
    }

    #[test]
    fn test_time_limit_and_progress() {
        let last = Arc::new(AtomicU32::new(0));
        let sink_last = Arc::clone(&last);
        let control = SearchControl::new(CancellationToken::new())
            .with_progress(Arc::new(move |n| sink_last.store(n, Ordering::SeqCst)));
        let engine = CpuSearchEngine::new(128);
        let mut header = header();

        let found = engine
            .search(&mut header, &Target::min(), Some(Duration::from_millis(50)), &control)
            .unwrap();
        assert!(!found);
        assert!(header.nonce >= 128);
        assert_eq!(last.load(Ordering::SeqCst), header.nonce);
    }

    #[test]
    fn test_oversized_time_limit_is_unbounded() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let control = SearchControl::new(token).with_progress(Arc::new(move |n| {
            if n >= 1024 {
                cancel.cancel();
            }
        }));
        let engine = CpuSearchEngine::new(256);
        let mut header = header();

        let found = engine
            .search(&mut header, &Target::min(), Some(Duration::MAX), &control)
            .unwrap();
        assert!(!found);
        assert!(header.nonce >= 1024);
    }

    #[test]
    fn test_nonce_space_exhaustion() {
        let engine = CpuSearchEngine::new(8);
        let mut header = header();
        header.nonce = u32::MAX - 3;

        let found = engine
            .search(&mut header, &Target::min(), None, &SearchControl::default())
            .unwrap();
        assert!(!found);
        assert_eq!(header.nonce, u32::MAX);
    }

    #[test]
    fn test_default_batch_size() {
        assert_eq!(CpuSearchEngine::new(0).batch_size(), CpuSearchEngine::DEFAULT_BATCH_SIZE);
    }
}
