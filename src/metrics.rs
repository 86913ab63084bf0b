//! Per-stream metrics and cross-session usage totals.
//!
//! A [`StreamMetrics`] value is filled in while a completion streams and is
//! returned with the session report.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::ProviderKind;

/// How a stream ended, for reporting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Counters collected for a single streamed completion.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamMetrics {
    pub fragments: u64,
    pub characters: u64,
    pub skipped_frames: u64,
    pub time_to_first_fragment_ms: Option<u64>,
    pub total_time_ms: u64,
    pub outcome: Option<StreamOutcome>,
}

impl StreamMetrics {
    /// Account for one appended fragment. `elapsed` is measured from request start.
    pub fn record_fragment(&mut self, fragment: &str, elapsed: Duration) {
        if self.time_to_first_fragment_ms.is_none() {
            self.time_to_first_fragment_ms = Some(duration_ms(elapsed));
        }
        self.fragments += 1;
        self.characters += fragment.chars().count() as u64;
    }

    pub fn record_skipped_frame(&mut self) {
        self.skipped_frames += 1;
    }

    pub fn finish(&mut self, outcome: StreamOutcome, elapsed: Duration) {
        self.outcome = Some(outcome);
        self.total_time_ms = duration_ms(elapsed);
    }
}

/// Running totals across many sessions, keyed by provider.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageTotals {
    pub deepseek_sessions: u64,
    pub deepseek_characters: u64,
    pub openai_sessions: u64,
    pub openai_characters: u64,
    pub failed_sessions: u64,
    pub total_time_ms: u64,
}

impl UsageTotals {
    pub fn record(&mut self, provider: ProviderKind, metrics: &StreamMetrics) {
        match provider {
            ProviderKind::DeepSeek => {
                self.deepseek_sessions += 1;
                self.deepseek_characters += metrics.characters;
            }
            ProviderKind::OpenAiCompatible => {
                self.openai_sessions += 1;
                self.openai_characters += metrics.characters;
            }
        }
        if metrics.outcome == Some(StreamOutcome::Failed) {
            self.failed_sessions += 1;
        }
        self.total_time_ms += metrics.total_time_ms;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
