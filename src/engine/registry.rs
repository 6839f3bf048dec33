//! The in-memory active-upload registry (§3, §5, §9): "a single mapping
//! mutated only by Upload Engine command handlers." Holds exactly the
//! pieces that cannot be reconstructed from the Persistence Store after a
//! cold restart — the cancel token and the `ByteSource` — plus the speed
//! tracker, which is intentionally never persisted (§3.1).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::speed::UploadSpeedTracker;
use crate::cancel::CancelToken;
use crate::config::RetryConfig;
use crate::model::ByteSource;

/// One entry in the registry. §3's invariant — "at most one entry per
/// `contentId`" — is enforced by `Registry::insert` overwriting any prior
/// entry for the same key rather than by this type itself. Also carries the
/// per-upload retry config (layered from `START_UPLOAD`'s optional
/// `retryConfig` override at registration time), since that, too, has
/// nowhere else to live once the upload is driving.
pub struct ActiveUpload {
    cancel: CancelToken,
    source: Arc<dyn ByteSource>,
    speed: Mutex<UploadSpeedTracker>,
    retry: RetryConfig,
}

impl ActiveUpload {
    pub fn new(source: Arc<dyn ByteSource>, retry: RetryConfig) -> Self {
        Self {
            cancel: CancelToken::new(),
            source,
            speed: Mutex::new(UploadSpeedTracker::new()),
            retry,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn source(&self) -> Arc<dyn ByteSource> {
        Arc::clone(&self.source)
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone()
    }

    pub fn record_sample(&self, now_ms: u64, cumulative_bytes: u64) {
        self.speed.lock().unwrap().sample(now_ms, cumulative_bytes);
    }

    pub fn average_bps(&self) -> Option<f64> {
        self.speed.lock().unwrap().average_bps()
    }

    pub fn time_remaining_secs(&self, uploaded: u64, total: u64) -> Option<f64> {
        self.speed.lock().unwrap().time_remaining_secs(uploaded, total)
    }
}

/// The registry itself: "treat it as a single owned collection behind the
/// Upload Engine, not ambient global state" (§9).
#[derive(Default)]
pub struct Registry {
    uploads: Mutex<HashMap<String, Arc<ActiveUpload>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `active` under `content_id`, replacing any prior entry.
    /// Callers must have already checked `contains` when "at most one" is
    /// being enforced as a no-op rather than a silent replace (RESUME_UPLOAD
    /// does this; START_UPLOAD never collides because content ids are
    /// server-assigned and fresh).
    pub fn insert(&self, content_id: String, active: Arc<ActiveUpload>) {
        self.uploads.lock().unwrap().insert(content_id, active);
    }

    pub fn get(&self, content_id: &str) -> Option<Arc<ActiveUpload>> {
        self.uploads.lock().unwrap().get(content_id).cloned()
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.uploads.lock().unwrap().contains_key(content_id)
    }

    pub fn remove(&self, content_id: &str) -> Option<Arc<ActiveUpload>> {
        self.uploads.lock().unwrap().remove(content_id)
    }

    pub fn active_content_ids(&self) -> Vec<String> {
        self.uploads.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}
