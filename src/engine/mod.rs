//! The Upload Engine (§4.4): owns the in-memory active-upload registry,
//! schedules part uploads with bounded concurrency, drives the multipart
//! state machine per upload, persists state transitions, and reconciles
//! with the server's view of uploaded parts on resume.
//!
//! `UploadTaskState`/`UploadProgress` in the crate's existing
//! `storage::upload::UploadTask` generalize here from a single resumable
//! session to a multi-part, multi-upload engine; the bounded-concurrency
//! work queue is `futures::stream::FuturesUnordered` driven to at most
//! `maxConcurrentUploads` in-flight part futures at a time, matching §5's
//! single-threaded cooperative scheduling model without OS threads on
//! either target.

mod registry;
mod speed;

pub use registry::ActiveUpload;
pub use speed::UploadSpeedTracker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};

use registry::Registry;

use crate::bus::{decode_command, Command, Event, MessageBus, RetryConfigOverride, StartUploadRequest, UploadSummary};
use crate::cancel::CancelToken;
use crate::config::{EngineConfig, RetryConfig};
use crate::control_plane::acceleration::accelerate_url;
use crate::control_plane::backoff::BackoffState;
use crate::control_plane::{ControlPlaneClient, FileMeta};
use crate::error::EngineResult;
use crate::logger::Logger;
use crate::model::{ByteSource, UploadPart, UploadState, UploadStatus};
use crate::persistence::PersistenceStore;
use crate::platform::runtime;

/// The immutable-per-upload facts a part-upload task needs, bundled so the
/// part-driving loop isn't threading a dozen separate arguments through
/// `FuturesUnordered`.
struct PartJobContext {
    content_id: String,
    key: String,
    upload_id: String,
    accelerated: bool,
    acceleration_endpoint: Option<String>,
    part_size: u64,
    file_size: u64,
}

pub struct UploadEngine {
    config: EngineConfig,
    persistence: Arc<dyn PersistenceStore>,
    control_plane: Arc<dyn ControlPlaneClient>,
    bus: Arc<dyn MessageBus>,
    registry: Registry,
    logger: Logger,
}

impl UploadEngine {
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn PersistenceStore>,
        control_plane: Arc<dyn ControlPlaneClient>,
        bus: Arc<dyn MessageBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            persistence,
            control_plane,
            bus,
            registry: Registry::new(),
            logger: Logger::new("upload-engine:engine"),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The count of uploads currently in the in-memory registry (§3's "at
    /// most one entry per contentId" invariant, exposed for callers that
    /// want to assert it).
    pub fn active_upload_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_active(&self, content_id: &str) -> bool {
        self.registry.contains(content_id)
    }

    /// Decodes a raw inbound message and dispatches it. A decode failure is
    /// the "invalid message" case from §4.3: emit `LOG{level: "error"}` and
    /// drop it, rather than propagating a parse error to the caller.
    pub async fn handle_raw_message(self: &Arc<Self>, raw: &str, source: Option<Arc<dyn ByteSource>>) {
        match decode_command(raw) {
            Ok(command) => self.dispatch(command, source).await,
            Err(err) => self.bus.broadcast(Event::Log {
                level: "error".into(),
                message: format!("dropped a malformed inbound message: {err}"),
            }),
        }
    }

    /// Exhaustively dispatches one decoded `Command` (§9: "command handling
    /// must be exhaustive over the inbound sum"). `source` carries the
    /// out-of-band `ByteSource` a foreground client attaches alongside
    /// `START_UPLOAD`/`RESUME_UPLOAD` (see `bus::StartUploadRequest`'s doc
    /// comment); it is ignored by every other command.
    pub async fn dispatch(self: &Arc<Self>, command: Command, source: Option<Arc<dyn ByteSource>>) {
        match command {
            Command::StartUpload(req) => match source {
                Some(source) => self.handle_start_upload(req, source).await,
                None => self.bus.broadcast(Event::Log {
                    level: "error".into(),
                    message: "START_UPLOAD requires an attached file handle".into(),
                }),
            },
            Command::ResumeUpload { content_id } => self.handle_resume_upload(&content_id, source).await,
            Command::PauseUpload { content_id } => self.handle_pause_upload(&content_id).await,
            Command::CancelUpload { content_id } => self.handle_cancel_upload(&content_id).await,
            Command::GetUploadStatus { content_id } => self.handle_get_upload_status(&content_id).await,
            Command::GetActiveUploads => self.handle_get_active_uploads().await,
            Command::Heartbeat => self.handle_heartbeat(),
            Command::Unknown => self.bus.broadcast(Event::Log {
                level: "warn".into(),
                message: "dropped an unrecognized command type".into(),
            }),
        }
    }

    /// **START_UPLOAD** (§4.4): calls `initiateMultipartUpload`, emits
    /// `INITIATE_UPLOAD_RESPONSE`, constructs the `UploadState`, registers
    /// it, persists, then begins driving parts in the background.
    pub async fn handle_start_upload(self: &Arc<Self>, req: StartUploadRequest, source: Arc<dyn ByteSource>) {
        let use_acceleration = self.config.acceleration.enabled && req.file_size >= self.config.acceleration.min_size;
        let meta = FileMeta {
            file_name: req.file_name.clone(),
            file_type: req.file_type.clone(),
            size: req.file_size,
            duration: req.duration,
            use_acceleration,
        };

        let initiated = match self.control_plane.initiate_multipart_upload(&meta).await {
            Ok(result) => result,
            Err(err) => {
                self.logger.error(format!("initiateMultipartUpload failed for {}: {err}", req.file_name));
                self.bus.broadcast(Event::Log {
                    level: "error".into(),
                    message: format!("failed to start upload for {}: {err}", req.file_name),
                });
                return;
            }
        };

        self.bus.broadcast(Event::InitiateUploadResponse {
            content_id: initiated.content_id.clone(),
            upload_id: initiated.upload_id.clone(),
            key: initiated.key.clone(),
        });

        let part_size = req
            .chunk_config
            .as_ref()
            .and_then(|c| c.part_size)
            .unwrap_or(self.config.part_size);
        let max_concurrent_uploads = req
            .chunk_config
            .as_ref()
            .and_then(|c| c.max_concurrent_uploads)
            .unwrap_or(self.config.max_concurrent_uploads);
        let retry_config = build_retry_config(&self.config.retry, req.retry_config.as_ref());

        let accelerated = use_acceleration && initiated.acceleration_endpoint.is_some();

        let mut state = UploadState {
            content_id: initiated.content_id.clone(),
            upload_id: initiated.upload_id,
            key: initiated.key,
            file_name: req.file_name,
            file_size: req.file_size,
            file_type: req.file_type,
            part_size,
            max_concurrent_uploads,
            parts: Vec::new(),
            progress: 0,
            status: UploadStatus::InProgress,
            start_time_ms: runtime::now_ms(),
            accelerated,
            acceleration_endpoint: initiated.acceleration_endpoint,
            error: None,
            file_url: None,
        };
        state.recompute_progress();

        let content_id = state.content_id.clone();
        let active = Arc::new(ActiveUpload::new(source, retry_config));
        self.registry.insert(content_id.clone(), Arc::clone(&active));
        self.persist_best_effort(&state).await;

        let engine = Arc::clone(self);
        runtime::spawn_detached(async move {
            engine.drive_parts(content_id).await;
        });
    }

    /// **RESUME_UPLOAD** (§4.4): a no-op if already active. Otherwise loads
    /// the persisted state and, only if a fresh `ByteSource` was attached,
    /// actually resumes driving. Without one — the lifecycle controller's
    /// cold-restart path, or `GET_ACTIVE_UPLOADS`'s scheduled resumes — the
    /// upload is normalized to `paused` per the §9(b) file-handle decision
    /// recorded in `DESIGN.md`.
    pub async fn handle_resume_upload(self: &Arc<Self>, content_id: &str, source: Option<Arc<dyn ByteSource>>) {
        if self.registry.contains(content_id) {
            return;
        }

        let mut state = match self.persistence.load_upload_state(content_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                self.bus.broadcast(Event::Log {
                    level: "error".into(),
                    message: format!("RESUME_UPLOAD: no persisted state for {content_id}"),
                });
                return;
            }
            Err(err) => {
                self.logger.error(format!("RESUME_UPLOAD: failed to load state for {content_id}: {err}"));
                self.bus.broadcast(Event::Log {
                    level: "error".into(),
                    message: format!("RESUME_UPLOAD: failed to load state for {content_id}: {err}"),
                });
                return;
            }
        };

        if state.status.is_terminal() {
            self.bus.broadcast(Event::UploadStatus {
                content_id: content_id.to_string(),
                status: state.status.as_str().to_string(),
            });
            return;
        }

        match source {
            Some(source) => {
                state.status = UploadStatus::InProgress;
                self.persist_best_effort(&state).await;

                let retry_config = self.config.retry.clone();
                let active = Arc::new(ActiveUpload::new(source, retry_config));
                self.registry.insert(content_id.to_string(), Arc::clone(&active));

                let engine = Arc::clone(self);
                let content_id = content_id.to_string();
                runtime::spawn_detached(async move {
                    engine.drive_parts(content_id).await;
                });
            }
            None => {
                if state.status != UploadStatus::Paused {
                    state.status = UploadStatus::Paused;
                    self.persist_best_effort(&state).await;
                }
                self.bus.broadcast(Event::UploadStatus {
                    content_id: content_id.to_string(),
                    status: state.status.as_str().to_string(),
                });
            }
        }
    }

    /// **PAUSE_UPLOAD** (§4.4): fires the cancel token, persists
    /// `status=paused`, emits `UPLOAD_PAUSED`, removes from the registry.
    pub async fn handle_pause_upload(self: &Arc<Self>, content_id: &str) {
        let Some(active) = self.registry.remove(content_id) else {
            self.bus.broadcast(Event::Log {
                level: "warn".into(),
                message: format!("PAUSE_UPLOAD: {content_id} is not active"),
            });
            return;
        };
        active.cancel_token().fire();

        if let Ok(Some(mut state)) = self.persistence.load_upload_state(content_id).await {
            state.status = UploadStatus::Paused;
            self.persist_best_effort(&state).await;
        }

        self.bus.broadcast(Event::UploadPaused {
            content_id: content_id.to_string(),
        });
    }

    /// **CANCEL_UPLOAD** (§4.4): fires the cancel token, purges both the
    /// upload record and its chunks, best-effort notifies the server, emits
    /// `UPLOAD_CANCELLED`.
    pub async fn handle_cancel_upload(self: &Arc<Self>, content_id: &str) {
        if let Some(active) = self.registry.remove(content_id) {
            active.cancel_token().fire();
        }

        let state = self.persistence.load_upload_state(content_id).await.ok().flatten();

        if let Err(err) = self.persistence.delete_upload_state(content_id).await {
            self.logger.error(format!("CANCEL_UPLOAD: failed to delete state for {content_id}: {err}"));
        }

        if let Some(state) = &state {
            if let Err(err) = self.persistence.delete_chunks(&state.upload_id).await {
                self.logger.error(format!("CANCEL_UPLOAD: failed to delete chunks for {content_id}: {err}"));
            }

            if let Err(err) = self
                .control_plane
                .cancel_upload(&state.key, &state.upload_id, content_id)
                .await
            {
                self.logger.warn(format!("server-side cancelUpload failed for {content_id} (best-effort): {err}"));
            }
        }

        self.bus.broadcast(Event::UploadCancelled {
            content_id: content_id.to_string(),
        });
    }

    /// **GET_UPLOAD_STATUS** (§4.4).
    pub async fn handle_get_upload_status(&self, content_id: &str) {
        let status = match self.persistence.load_upload_state(content_id).await {
            Ok(Some(state)) => state.status.as_str().to_string(),
            Ok(None) => UploadStatus::NotFound.as_str().to_string(),
            Err(err) => {
                self.logger.error(format!("GET_UPLOAD_STATUS: failed to load state for {content_id}: {err}"));
                UploadStatus::NotFound.as_str().to_string()
            }
        };
        self.bus.broadcast(Event::UploadStatus {
            content_id: content_id.to_string(),
            status,
        });
    }

    /// **GET_ACTIVE_UPLOADS** (§4.4): schedules a resume for every
    /// persisted `in_progress`/`paused` record and emits a per-upload
    /// `UPLOAD_STATUS`, followed by one `UPLOADS_UPDATE` snapshot.
    pub async fn handle_get_active_uploads(self: &Arc<Self>) {
        let all = match self.persistence.load_all_upload_states().await {
            Ok(states) => states,
            Err(err) => {
                self.logger.error(format!("GET_ACTIVE_UPLOADS: failed to scan persisted state: {err}"));
                return;
            }
        };

        let mut summaries = Vec::new();
        for state in all {
            if matches!(state.status, UploadStatus::InProgress | UploadStatus::Paused) {
                self.handle_resume_upload(&state.content_id, None).await;
            }

            if let Ok(Some(latest)) = self.persistence.load_upload_state(&state.content_id).await {
                self.bus.broadcast(Event::UploadStatus {
                    content_id: latest.content_id.clone(),
                    status: latest.status.as_str().to_string(),
                });
                summaries.push(UploadSummary {
                    content_id: latest.content_id,
                    status: latest.status.as_str().to_string(),
                    progress: latest.progress,
                });
            }
        }

        self.bus.broadcast(Event::UploadsUpdate { uploads: summaries });
    }

    pub fn handle_heartbeat(&self) {
        self.logger.debug("heartbeat received");
    }

    /// Drives parts for `content_id` from whatever is currently persisted,
    /// following the part-driving algorithm in §4.4: reconcile first (every
    /// time, including cold-load resumes, per the §9 design decision),
    /// then fill the outstanding part numbers through a bounded-concurrency
    /// work queue, then complete.
    async fn drive_parts(self: Arc<Self>, content_id: String) {
        let Some(active) = self.registry.get(&content_id) else {
            return;
        };
        let cancel = active.cancel_token();
        let source = active.source();
        let retry_config = active.retry_config();

        let mut state = match self.persistence.load_upload_state(&content_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                self.logger.error(format!("drive_parts: no persisted state for {content_id}"));
                self.registry.remove(&content_id);
                return;
            }
            Err(err) => {
                self.logger.error(format!("drive_parts: failed to load state for {content_id}: {err}"));
                self.registry.remove(&content_id);
                return;
            }
        };

        if cancel.check().is_err() {
            return;
        }

        match self.control_plane.list_uploaded_parts(&state.key, &state.upload_id).await {
            Ok(server_parts) => {
                merge_server_parts(&mut state, server_parts);
                self.persist_best_effort(&state).await;
            }
            Err(err) => {
                self.logger
                    .warn(format!("reconcile failed for {content_id}, falling back to local parts list: {err}"));
            }
        }

        if cancel.check().is_err() {
            return;
        }

        if state.is_complete() {
            self.finalize_upload(state, &active, &cancel).await;
            return;
        }

        let total_parts = state.total_parts();
        let completed = state.completed_part_numbers();
        let mut pending: std::collections::VecDeque<u32> =
            (1..=total_parts).filter(|p| !completed.contains(p)).collect();

        let ctx = Arc::new(PartJobContext {
            content_id: content_id.clone(),
            key: state.key.clone(),
            upload_id: state.upload_id.clone(),
            accelerated: state.accelerated,
            acceleration_endpoint: state.acceleration_endpoint.clone(),
            part_size: state.part_size,
            file_size: state.file_size,
        });

        let max_in_flight = state.max_concurrent_uploads.max(1);
        let mut in_flight = FuturesUnordered::new();
        for _ in 0..max_in_flight {
            if let Some(part_number) = pending.pop_front() {
                in_flight.push(Arc::clone(&self).upload_one_part_with_retry(
                    Arc::clone(&ctx),
                    part_number,
                    Arc::clone(&source),
                    cancel.clone(),
                    retry_config.clone(),
                ));
            }
        }

        while let Some(result) = in_flight.next().await {
            match result {
                Ok(part) => {
                    if cancel.check().is_err() {
                        return;
                    }

                    state.parts.push(part.clone());
                    state.recompute_progress();
                    self.persist_best_effort(&state).await;

                    let uploaded = state.uploaded_bytes();
                    active.record_sample(runtime::now_ms(), uploaded);

                    self.bus.broadcast(Event::ChunkUploaded {
                        content_id: content_id.clone(),
                        part_number: part.part_number,
                    });

                    if let Some(next) = pending.pop_front() {
                        in_flight.push(Arc::clone(&self).upload_one_part_with_retry(
                            Arc::clone(&ctx),
                            next,
                            Arc::clone(&source),
                            cancel.clone(),
                            retry_config.clone(),
                        ));
                    }

                    self.emit_progress(&content_id, &state, &active, in_flight.len());
                }
                Err(err) if err.is_cancelled() => {
                    return;
                }
                Err(err) => {
                    state.status = UploadStatus::Error;
                    state.error = Some(err.message().to_string());
                    self.persist_best_effort(&state).await;
                    self.bus.broadcast(Event::UploadError {
                        content_id: content_id.clone(),
                        error: err.message().to_string(),
                        retryable: false,
                        part_number: err.part_number,
                    });
                    self.registry.remove(&content_id);
                    return;
                }
            }
        }

        self.finalize_upload(state, &active, &cancel).await;
    }

    /// Step 4 of §4.4: calls `completeMultipartUpload` once every part has
    /// been acknowledged. On failure, leaves `status=in_progress` (the
    /// server's view is still mid-upload); the next `RESUME_UPLOAD`
    /// reconciles via `list-parts` and re-attempts completion.
    async fn finalize_upload(self: &Arc<Self>, mut state: UploadState, active: &Arc<ActiveUpload>, cancel: &CancelToken) {
        if cancel.check().is_err() {
            return;
        }

        state.parts.sort_by_key(|p| p.part_number);

        match self
            .control_plane
            .complete_multipart_upload(&state.key, &state.upload_id, &state.content_id, &state.parts)
            .await
        {
            Ok(result) => {
                state.status = UploadStatus::Completed;
                state.file_url = Some(result.location.clone());
                state.progress = 100;
                self.persist_best_effort(&state).await;

                let duration_ms = runtime::now_ms().saturating_sub(state.start_time_ms);
                let total_bytes = state.file_size;
                let average_speed = active.average_bps().unwrap_or_else(|| {
                    if duration_ms == 0 {
                        0.0
                    } else {
                        total_bytes as f64 / (duration_ms as f64 / 1000.0)
                    }
                });

                self.bus.broadcast(Event::UploadComplete {
                    content_id: state.content_id.clone(),
                    file_url: result.location,
                    duration_ms,
                    total_bytes,
                    average_speed,
                });
                self.registry.remove(&state.content_id);
            }
            Err(err) => {
                self.logger
                    .error(format!("completeMultipartUpload failed for {}: {err}", state.content_id));
                self.bus.broadcast(Event::UploadError {
                    content_id: state.content_id.clone(),
                    error: err.message().to_string(),
                    retryable: true,
                    part_number: None,
                });
                self.registry.remove(&state.content_id);
            }
        }
    }

    /// One part, end to end: slice the byte range, fetch a signed URL,
    /// rewrite it for acceleration if granted, PUT, and retry on a
    /// retryable failure with the engine-owned backoff (so `RETRYING_CHUNK`
    /// can report `attempt`/`nextAttemptDelay` — the per-attempt visibility
    /// §4.2 reserves for the Upload Engine rather than the control-plane
    /// transport).
    async fn upload_one_part_with_retry(
        self: Arc<Self>,
        ctx: Arc<PartJobContext>,
        part_number: u32,
        source: Arc<dyn ByteSource>,
        cancel: CancelToken,
        retry_config: RetryConfig,
    ) -> EngineResult<UploadPart> {
        let start = (part_number as u64 - 1) * ctx.part_size;
        let end = (start + ctx.part_size).min(ctx.file_size);

        let mut backoff = BackoffState::new(retry_config);
        loop {
            cancel.check()?;

            let outcome = self.try_upload_part_once(&ctx, part_number, &source, &cancel, start, end).await;

            match outcome {
                Ok(part) => return Ok(part),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) if err.is_retryable() && backoff.can_retry() => {
                    let delay = backoff.next_delay();
                    let attempt = backoff.attempt();
                    self.bus.broadcast(Event::RetryingChunk {
                        content_id: ctx.content_id.clone(),
                        part_number,
                        attempt,
                        next_attempt_delay_ms: delay.as_millis() as u64,
                    });
                    runtime::sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_upload_part_once(
        &self,
        ctx: &PartJobContext,
        part_number: u32,
        source: &Arc<dyn ByteSource>,
        cancel: &CancelToken,
        start: u64,
        end: u64,
    ) -> EngineResult<UploadPart> {
        cancel.check()?;
        let bytes = source.read_range(start, end)?;

        let signed_url = self
            .control_plane
            .get_signed_url(part_number, &ctx.upload_id, &ctx.key, ctx.accelerated)
            .await?;
        let url = accelerate_url(
            &signed_url,
            ctx.acceleration_endpoint.as_deref(),
            ctx.file_size,
            &self.config.acceleration,
        );

        cancel.check()?;
        self.control_plane.upload_part(&url, part_number, bytes, cancel).await
    }

    fn emit_progress(&self, content_id: &str, state: &UploadState, active: &Arc<ActiveUpload>, active_connections: usize) {
        let uploaded = state.uploaded_bytes();
        let total = state.file_size;
        self.bus.broadcast(Event::UploadProgress {
            content_id: content_id.to_string(),
            progress: state.progress,
            uploaded_bytes: uploaded,
            total_bytes: total,
            upload_speed: active.average_bps(),
            time_remaining: active.time_remaining_secs(uploaded, total),
            active_connections: Some(active_connections),
        });
    }

    async fn persist_best_effort(&self, state: &UploadState) {
        if let Err(err) = self.persistence.save_upload_state(state).await {
            // §7: storage errors on a progress persist do not kill the
            // upload; it continues in memory and may re-do progress on the
            // next resume.
            self.logger
                .error(format!("failed to persist upload state for {}: {err}", state.content_id));
        }
    }
}

/// Applies a `START_UPLOAD`-supplied retry override on top of the engine's
/// default `RetryConfig`.
fn build_retry_config(base: &RetryConfig, override_: Option<&RetryConfigOverride>) -> RetryConfig {
    let mut config = base.clone();
    if let Some(o) = override_ {
        if let Some(attempts) = o.attempts {
            config.attempts = attempts;
        }
        if let Some(delay_ms) = o.delay_ms {
            config.delay = Duration::from_millis(delay_ms);
        }
        if let Some(max_delay_ms) = o.max_delay_ms {
            config.max_delay = Duration::from_millis(max_delay_ms);
        }
    }
    config
}

/// Step 2 of §4.4: "The authoritative set of already-complete part numbers
/// is the union of the server's list and the locally persisted `parts`
/// list," with the server's record preferred when both name the same part
/// (it is the system of record for what was actually accepted).
fn merge_server_parts(state: &mut UploadState, server_parts: Vec<UploadPart>) {
    let mut by_number: HashMap<u32, UploadPart> = state.parts.iter().cloned().map(|p| (p.part_number, p)).collect();
    for part in server_parts {
        by_number.insert(part.part_number, part);
    }
    let mut merged: Vec<UploadPart> = by_number.into_values().collect();
    merged.sort_by_key(|p| p.part_number);
    state.parts = merged;
    state.recompute_progress();
}

#[cfg(test)]
mod tests;
