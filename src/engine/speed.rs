//! `UploadSpeedTracker` (§3.1, §9): an exponential-moving-average tracker
//! sampled on every completed part, feeding `UPLOAD_PROGRESS.uploadSpeed`/
//! `timeRemaining` and `UPLOAD_COMPLETE.averageSpeed` — fields the spec
//! declares but leaves unpopulated in the reference source (§9), promoted
//! to implemented in the expanded spec.

use crate::config::SPEED_EMA_WEIGHT;

#[derive(Debug, Clone, Copy)]
pub struct UploadSpeedTracker {
    average_bps: Option<f64>,
    last_sample_at_ms: Option<u64>,
    last_bytes: u64,
}

impl UploadSpeedTracker {
    pub fn new() -> Self {
        Self {
            average_bps: None,
            last_sample_at_ms: None,
            last_bytes: 0,
        }
    }

    /// Records a new cumulative-bytes-uploaded sample at `now_ms`. The
    /// first sample only seeds the tracker; the EMA needs a prior sample to
    /// compute an instantaneous rate against.
    pub fn sample(&mut self, now_ms: u64, cumulative_bytes: u64) {
        if let Some(last_at) = self.last_sample_at_ms {
            let elapsed_secs = now_ms.saturating_sub(last_at) as f64 / 1000.0;
            if elapsed_secs > 0.0 {
                let delta_bytes = cumulative_bytes.saturating_sub(self.last_bytes) as f64;
                let instantaneous_bps = delta_bytes / elapsed_secs;
                self.average_bps = Some(match self.average_bps {
                    Some(prev) => prev * (1.0 - SPEED_EMA_WEIGHT) + instantaneous_bps * SPEED_EMA_WEIGHT,
                    None => instantaneous_bps,
                });
            }
        }
        self.last_sample_at_ms = Some(now_ms);
        self.last_bytes = cumulative_bytes;
    }

    pub fn average_bps(&self) -> Option<f64> {
        self.average_bps
    }

    pub fn time_remaining_secs(&self, uploaded: u64, total: u64) -> Option<f64> {
        let bps = self.average_bps?;
        if bps <= 0.0 || total <= uploaded {
            return Some(0.0);
        }
        Some((total - uploaded) as f64 / bps)
    }
}

impl Default for UploadSpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}
