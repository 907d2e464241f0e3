//! State shared by one session's stages.
//!
//! Everything here is session-scoped; concurrent sessions never share it.

use crate::pipeline::clock::{Clock, SystemClock};
use crate::pipeline::history::ConversationHistory;
use crate::pipeline::latency::{Milestone, MetricsBoard, TurnTiming};
use crate::pipeline::types::{TurnId, TurnStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Turn bookkeeping driven by the ingestor and the silence monitor.
#[derive(Debug, Default)]
pub struct TurnTracker {
    current: TurnId,
    /// Audio has arrived for `current` and no terminator has been sent yet.
    active: bool,
    last_frame_at: Option<Instant>,
    /// Highest turn a terminator was sent for.
    terminated: TurnId,
}

impl TurnTracker {
    /// Register an incoming frame. Returns the frame's turn and whether it opened a new turn.
    pub fn on_frame(&mut self, now: Instant) -> (TurnId, bool) {
        let is_new = !self.active;
        if is_new {
            self.current += 1;
            self.active = true;
        }
        self.last_frame_at = Some(now);
        (self.current, is_new)
    }

    /// Claim the terminator for the active turn, if it has not been sent yet.
    pub fn request_terminator(&mut self) -> Option<TurnId> {
        if !self.active || self.terminated >= self.current {
            return None;
        }
        self.terminated = self.current;
        self.active = false;
        self.last_frame_at = None;
        Some(self.current)
    }

    /// Claim the terminator when the active turn has been quiet for `threshold`.
    ///
    /// `busy` (speaking or processing) defers the decision.
    pub fn poll_silence(&mut self, now: Instant, threshold: Duration, busy: bool) -> Option<TurnId> {
        let last = self.last_frame_at?;
        if busy || now.saturating_duration_since(last) < threshold {
            return None;
        }
        self.request_terminator()
    }

    /// Forget the active turn without finalizing it (barge-in).
    pub fn reset_idle(&mut self) {
        self.active = false;
        self.last_frame_at = None;
    }

    pub fn current(&self) -> TurnId {
        self.current
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Session context handed to every stage at construction.
pub struct SessionContext {
    id: u64,
    interrupt: AtomicBool,
    speaking: AtomicBool,
    processing: AtomicBool,
    finalizing: AtomicBool,
    last_processed: AtomicU64,
    turns: Mutex<TurnTracker>,
    metrics: Mutex<MetricsBoard>,
    /// The processing lock. Generation holds it from acceptance until synthesis
    /// has drained the turn.
    history: tokio::sync::Mutex<ConversationHistory>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("interrupted", &self.is_interrupted())
            .field("speaking", &self.is_speaking())
            .field("processing", &self.is_processing())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SessionContext {
    pub fn new(id: u64, history_cap: usize) -> Self {
        Self::with_clock(id, history_cap, Arc::new(SystemClock))
    }

    pub fn with_clock(id: u64, history_cap: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            id,
            interrupt: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            finalizing: AtomicBool::new(false),
            last_processed: AtomicU64::new(0),
            turns: Mutex::new(TurnTracker::default()),
            metrics: Mutex::new(MetricsBoard::default()),
            history: tokio::sync::Mutex::new(ConversationHistory::new(history_cap)),
            clock,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    // Interrupt flag

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    // Stage activity flags

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::SeqCst);
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn set_finalizing(&self, finalizing: bool) {
        self.finalizing.store(finalizing, Ordering::SeqCst);
    }

    /// Coarse status of the session's newest turn.
    pub fn status(&self) -> TurnStatus {
        if self.is_speaking() {
            TurnStatus::Speaking
        } else if self.is_processing() {
            TurnStatus::Generating
        } else if self.finalizing.load(Ordering::SeqCst) {
            TurnStatus::Finalizing
        } else if lock(&self.turns).is_active() {
            TurnStatus::Collecting
        } else {
            TurnStatus::Complete
        }
    }

    // Turn tracking

    pub fn turns(&self) -> MutexGuard<'_, TurnTracker> {
        lock(&self.turns)
    }

    /// Accept a turn for generation once; stale or repeated turns are refused.
    pub fn claim_turn(&self, turn_id: TurnId) -> bool {
        self.last_processed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (turn_id > last).then_some(turn_id)
            })
            .is_ok()
    }

    pub fn last_processed_turn(&self) -> TurnId {
        self.last_processed.load(Ordering::SeqCst)
    }

    // Metrics

    pub fn begin_metrics(&self, turn_id: TurnId, at: Instant) {
        lock(&self.metrics).begin(turn_id, at);
    }

    /// Record a milestone at the current time; true if it was the first.
    pub fn mark(&self, turn_id: TurnId, milestone: Milestone) -> bool {
        let now = self.now();
        lock(&self.metrics).mark(turn_id, milestone, now)
    }

    pub fn finish_metrics(&self, turn_id: TurnId) -> Option<TurnTiming> {
        lock(&self.metrics).finish(turn_id)
    }

    pub fn timing(&self, turn_id: TurnId) -> Option<TurnTiming> {
        lock(&self.metrics).get(turn_id).cloned()
    }

    // History (processing lock)

    pub async fn lock_history(&self) -> tokio::sync::MutexGuard<'_, ConversationHistory> {
        self.history.lock().await
    }
}
