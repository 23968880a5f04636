use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Snapshot of the one session this process tracks. All numeric fields are
/// zero while idle; while active, `end_time = start_time + length_ms`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_active: bool,
    pub length_ms: u64,
    pub start_time: u64,
    pub end_time: u64,
}

impl SessionState {
    pub fn begin(length_ms: u64, start_time: u64) -> Self {
        Self {
            is_active: true,
            length_ms,
            start_time,
            end_time: start_time + length_ms,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Milliseconds since the session started, zero when idle.
    pub fn elapsed_ms(&self, now: u64) -> u64 {
        if self.is_active {
            now.saturating_sub(self.start_time)
        } else {
            0
        }
    }
}
