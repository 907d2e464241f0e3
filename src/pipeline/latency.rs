//! Per-turn latency milestones and session statistics.

use crate::pipeline::types::TurnId;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Points in a turn's life worth timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    FirstPartial,
    /// The utterance was declared over (client signal or silence).
    UtteranceEnd,
    FinalTranscript,
    GenerationStart,
    FirstToken,
    FirstAudio,
    Completed,
}

/// Timestamps for one turn. Each milestone is recorded once; later writes are ignored.
#[derive(Debug, Clone)]
pub struct TurnTiming {
    pub turn_id: TurnId,
    pub audio_received: Instant,
    pub first_partial: Option<Instant>,
    pub utterance_end: Option<Instant>,
    pub final_transcript: Option<Instant>,
    pub generation_start: Option<Instant>,
    pub first_token: Option<Instant>,
    pub first_audio: Option<Instant>,
    pub completed: Option<Instant>,
}

impl TurnTiming {
    pub fn new(turn_id: TurnId, audio_received: Instant) -> Self {
        Self {
            turn_id,
            audio_received,
            first_partial: None,
            utterance_end: None,
            final_transcript: None,
            generation_start: None,
            first_token: None,
            first_audio: None,
            completed: None,
        }
    }

    /// Record a milestone; returns false if it was already set.
    pub fn mark(&mut self, milestone: Milestone, at: Instant) -> bool {
        let slot = match milestone {
            Milestone::FirstPartial => &mut self.first_partial,
            Milestone::UtteranceEnd => &mut self.utterance_end,
            Milestone::FinalTranscript => &mut self.final_transcript,
            Milestone::GenerationStart => &mut self.generation_start,
            Milestone::FirstToken => &mut self.first_token,
            Milestone::FirstAudio => &mut self.first_audio,
            Milestone::Completed => &mut self.completed,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }

    /// First audio frame to first partial transcript.
    pub fn first_partial_latency(&self) -> Option<Duration> {
        Some(self.first_partial?.saturating_duration_since(self.audio_received))
    }

    /// End of utterance to final transcript.
    pub fn recognition_latency(&self) -> Option<Duration> {
        Some(self.final_transcript?.saturating_duration_since(self.utterance_end?))
    }

    /// Generation request to first token.
    pub fn first_token_latency(&self) -> Option<Duration> {
        Some(self.first_token?.saturating_duration_since(self.generation_start?))
    }

    /// First token to first synthesized audio.
    pub fn synthesis_latency(&self) -> Option<Duration> {
        Some(self.first_audio?.saturating_duration_since(self.first_token?))
    }

    /// The user stopped speaking to the assistant started speaking.
    pub fn handoff_latency(&self) -> Option<Duration> {
        Some(self.first_audio?.saturating_duration_since(self.utterance_end?))
    }
}

/// How the handoff latency feels to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Excellent,
    Great,
    Good,
    Slow,
}

impl Grade {
    pub fn of(handoff: Duration) -> Self {
        match handoff.as_millis() {
            0..1000 => Grade::Excellent,
            1000..1500 => Grade::Great,
            1500..2500 => Grade::Good,
            _ => Grade::Slow,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Grade::Excellent => "excellent",
            Grade::Great => "great",
            Grade::Good => "good",
            Grade::Slow => "slow",
        };
        f.write_str(label)
    }
}

/// Timings of turns still in flight.
///
/// A new turn may start collecting while the previous one is still speaking,
/// so a few turns are kept side by side.
#[derive(Debug, Default)]
pub struct MetricsBoard {
    turns: VecDeque<TurnTiming>,
}

const MAX_OPEN_TURNS: usize = 4;

impl MetricsBoard {
    pub fn begin(&mut self, turn_id: TurnId, at: Instant) {
        self.turns.retain(|t| t.turn_id != turn_id);
        while self.turns.len() >= MAX_OPEN_TURNS {
            self.turns.pop_front();
        }
        self.turns.push_back(TurnTiming::new(turn_id, at));
    }

    pub fn mark(&mut self, turn_id: TurnId, milestone: Milestone, at: Instant) -> bool {
        self.turns
            .iter_mut()
            .find(|t| t.turn_id == turn_id)
            .is_some_and(|t| t.mark(milestone, at))
    }

    pub fn get(&self, turn_id: TurnId) -> Option<&TurnTiming> {
        self.turns.iter().find(|t| t.turn_id == turn_id)
    }

    /// Remove and return a turn's timing.
    pub fn finish(&mut self, turn_id: TurnId) -> Option<TurnTiming> {
        let idx = self.turns.iter().position(|t| t.turn_id == turn_id)?;
        self.turns.remove(idx)
    }
}

/// Aggregated latency statistics.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub count: usize,
    pub handoff_avg: Duration,
    pub handoff_min: Duration,
    pub handoff_max: Duration,
    pub recognition_avg: Duration,
    pub first_token_avg: Duration,
    pub synthesis_avg: Duration,
}

/// Collects completed turn timings for a session.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    measurements: Vec<TurnTiming>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, timing: TurnTiming) {
        self.measurements.push(timing);
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Statistics over turns that reached first audio.
    pub fn stats(&self) -> Option<LatencyStats> {
        let handoffs: Vec<Duration> = self
            .measurements
            .iter()
            .filter_map(|t| t.handoff_latency())
            .collect();
        let &handoff_min = handoffs.iter().min()?;
        let &handoff_max = handoffs.iter().max()?;

        let collect = |f: fn(&TurnTiming) -> Option<Duration>| -> Vec<Duration> {
            self.measurements.iter().filter_map(f).collect()
        };

        Some(LatencyStats {
            count: handoffs.len(),
            handoff_avg: avg_duration(&handoffs),
            handoff_min,
            handoff_max,
            recognition_avg: avg_duration(&collect(TurnTiming::recognition_latency)),
            first_token_avg: avg_duration(&collect(TurnTiming::first_token_latency)),
            synthesis_avg: avg_duration(&collect(TurnTiming::synthesis_latency)),
        })
    }

    /// Log one finished turn.
    pub fn log_turn(&self, timing: &TurnTiming) {
        let fmt_opt = |d: Option<Duration>| d.map(format_duration).unwrap_or_else(|| "-".into());
        match timing.handoff_latency() {
            Some(handoff) => tracing::info!(
                turn = timing.turn_id,
                partial = %fmt_opt(timing.first_partial_latency()),
                recognition = %fmt_opt(timing.recognition_latency()),
                first_token = %fmt_opt(timing.first_token_latency()),
                synthesis = %fmt_opt(timing.synthesis_latency()),
                handoff = %format_duration(handoff),
                grade = %Grade::of(handoff),
                "Turn latency"
            ),
            None => tracing::info!(turn = timing.turn_id, "Turn finished without audio"),
        }
    }

    /// Log a summary of the whole session.
    pub fn log_summary(&self) {
        if let Some(stats) = self.stats() {
            tracing::info!(
                turns = stats.count,
                handoff_avg = %format_duration(stats.handoff_avg),
                fastest = %format_duration(stats.handoff_min),
                slowest = %format_duration(stats.handoff_max),
                recognition_avg = %format_duration(stats.recognition_avg),
                first_token_avg = %format_duration(stats.first_token_avg),
                synthesis_avg = %format_duration(stats.synthesis_avg),
                grade = %Grade::of(stats.handoff_avg),
                "Session summary"
            );
        }
    }
}

/// Formats a duration as a human-friendly string.
/// Under 1s: "450ms", at or above 1s: "1.5s".
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

fn avg_duration(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    let sum: Duration = durations.iter().sum();
    sum / durations.len() as u32
}
