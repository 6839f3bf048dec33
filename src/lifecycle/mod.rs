//! The Lifecycle Controller (§4.5): responds to worker lifecycle events
//! (`install`, `activate`, `online`) by hydrating the registry from the
//! Persistence Store and resuming whichever uploads were not in a terminal
//! state when the worker last stopped.
//!
//! `on_install`/`on_activate`/`on_online` take a shared `Arc<UploadEngine>`,
//! following the crate's existing worker-lifecycle idiom in
//! `messaging::sw_manager` (there: register a service worker and poll until
//! it activates; here: replay every persisted upload against the engine).
//! Each resume is dispatched through `UploadEngine::handle_resume_upload`
//! with no `ByteSource` attached, so the §9(b) cold-restart decision
//! applies uniformly: an upload the engine cannot actually keep driving
//! (because the process restarted and no foreground page has re-attached
//! its file yet) is normalized to `paused` rather than silently abandoned.

use std::sync::Arc;

use crate::engine::UploadEngine;
use crate::logger::Logger;
use crate::model::UploadStatus;
use crate::persistence::PersistenceStore;

pub struct LifecycleController {
    persistence: Arc<dyn PersistenceStore>,
    logger: Logger,
}

impl LifecycleController {
    pub fn new(persistence: Arc<dyn PersistenceStore>) -> Self {
        Self {
            persistence,
            logger: Logger::new("upload-engine:lifecycle"),
        }
    }

    /// The worker claims activation eagerly on `install` (§4.5); there is no
    /// persisted state to touch yet, just the log record a reader would
    /// expect alongside the other lifecycle transitions.
    pub fn on_install(&self) {
        self.logger.info("install: claiming activation eagerly");
    }

    /// `loadOngoingUploads` (§4.5): every persisted record with
    /// `status = in_progress` is resumed. Each handler invocation is
    /// idempotent through the in-memory registry guard in
    /// `UploadEngine::handle_resume_upload`, so calling this more than once
    /// (e.g. a spurious double `activate`) never double-resumes an upload.
    pub async fn on_activate(&self, engine: &Arc<UploadEngine>) {
        self.logger.info("activate: resuming in-progress uploads");
        self.resume_matching(engine, |status| status == UploadStatus::InProgress).await;
    }

    /// On `online`, every persisted record with `status ∈ {in_progress,
    /// paused}` is resumed — wider than `on_activate` because a network
    /// recovery should also nudge uploads the foreground had explicitly
    /// paused, not only ones that were mid-flight when the worker died.
    pub async fn on_online(&self, engine: &Arc<UploadEngine>) {
        self.logger.info("online: resuming in-progress and paused uploads");
        self.resume_matching(engine, |status| {
            matches!(status, UploadStatus::InProgress | UploadStatus::Paused)
        })
        .await;
    }

    async fn resume_matching(&self, engine: &Arc<UploadEngine>, predicate: impl Fn(UploadStatus) -> bool) {
        let all = match self.persistence.load_all_upload_states().await {
            Ok(states) => states,
            Err(err) => {
                self.logger.error(format!("failed to hydrate the registry from the persistence store: {err}"));
                return;
            }
        };

        for state in all {
            if predicate(state.status) {
                engine.handle_resume_upload(&state.content_id, None).await;
            }
        }
    }
}
