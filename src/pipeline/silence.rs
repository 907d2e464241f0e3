//! Server-side end-of-utterance detection.
//!
//! Client end-of-speech messages get lost; after a quiet period the monitor
//! finalizes the turn itself. Terminators are claimed through the shared
//! [`TurnTracker`](crate::pipeline::session::TurnTracker), so a turn is never
//! terminated twice whichever side notices first.

use crate::pipeline::latency::Milestone;
use crate::pipeline::session::SessionContext;
use crate::pipeline::types::{RecognitionInput, TurnId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

pub struct SilenceMonitor {
    ctx: Arc<SessionContext>,
    recognition_tx: mpsc::Sender<RecognitionInput>,
    threshold: Duration,
    poll_interval: Duration,
}

impl SilenceMonitor {
    pub fn new(
        ctx: Arc<SessionContext>,
        recognition_tx: mpsc::Sender<RecognitionInput>,
        threshold: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            recognition_tx,
            threshold,
            poll_interval,
        }
    }

    /// One poll: claim the terminator if the active turn has gone quiet.
    pub fn check(&self) -> Option<TurnId> {
        let busy = self.ctx.is_speaking() || self.ctx.is_processing();
        let now = self.ctx.now();
        self.ctx
            .turns()
            .poll_silence(now, self.threshold, busy)
    }

    /// Poll until the recognition queue closes.
    pub async fn run(self) -> &'static str {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.recognition_tx.is_closed() {
                break;
            }
            let Some(turn_id) = self.check() else {
                continue;
            };

            self.ctx.mark(turn_id, Milestone::UtteranceEnd);
            tracing::debug!(
                turn = turn_id,
                threshold_ms = self.threshold.as_millis() as u64,
                "Silence ended utterance"
            );
            let end = RecognitionInput::EndOfUtterance { turn_id };
            if self.recognition_tx.send(end).await.is_err() {
                break;
            }
        }

        "silence"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;

    const THRESHOLD: Duration = Duration::from_millis(700);
    const POLL: Duration = Duration::from_millis(200);

    fn manual() -> (SilenceMonitor, Arc<SessionContext>, ManualClock) {
        let clock = ManualClock::new();
        let ctx = Arc::new(SessionContext::with_clock(1, 10, Arc::new(clock.clone())));
        let (tx, _rx) = mpsc::channel(4);
        let monitor = SilenceMonitor::new(ctx.clone(), tx, THRESHOLD, POLL);
        (monitor, ctx, clock)
    }

    #[test]
    fn test_no_terminator_without_audio() {
        let (monitor, _ctx, clock) = manual();
        clock.advance(Duration::from_secs(5));

        assert_eq!(monitor.check(), None);
    }

    #[test]
    fn test_fires_once_after_threshold() {
        let (monitor, ctx, clock) = manual();

        // Frames at t=0..300ms
        for _ in 0..4 {
            ctx.turns().on_frame(ctx.now());
            clock.advance(Duration::from_millis(100));
        }
        clock.advance(Duration::from_millis(500));
        assert_eq!(monitor.check(), None, "only 600ms of quiet");

        clock.advance(Duration::from_millis(200));
        assert_eq!(monitor.check(), Some(1));

        clock.advance(Duration::from_millis(200));
        assert_eq!(monitor.check(), None, "second poll must not fire again");
    }

    #[test]
    fn test_deferred_while_speaking() {
        let (monitor, ctx, clock) = manual();
        ctx.turns().on_frame(ctx.now());
        ctx.set_speaking(true);
        clock.advance(Duration::from_secs(2));

        assert_eq!(monitor.check(), None);

        ctx.set_speaking(false);
        assert_eq!(monitor.check(), Some(1));
    }

    #[test]
    fn test_client_terminator_wins() {
        let (monitor, ctx, clock) = manual();
        ctx.turns().on_frame(ctx.now());
        assert_eq!(ctx.turns().request_terminator(), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(monitor.check(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_enqueues_terminator() {
        let ctx = Arc::new(SessionContext::new(1, 10));
        let (tx, mut rx) = mpsc::channel(4);
        let monitor = SilenceMonitor::new(ctx.clone(), tx, THRESHOLD, POLL);
        let task = tokio::spawn(monitor.run());

        ctx.turns().on_frame(ctx.now());
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(matches!(
            rx.try_recv(),
            Ok(RecognitionInput::EndOfUtterance { turn_id: 1 })
        ));
        assert!(ctx.timing(1).is_none(), "metrics only exist for ingested turns");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert_eq!(task.await.unwrap(), "silence");
    }
}
