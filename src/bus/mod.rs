//! The Message Bus (§4.3): a fan-out channel between the worker and every
//! connected foreground client. Inbound messages are commands, decoded from
//! JSON against a shape guard; outbound messages are events, broadcast to
//! every attached client.
//!
//! `Command`/`Event` are `serde`-tagged enums matching the wire shape in
//! §6. `MessageBus` mirrors the crate's existing
//! `PersistenceListener`/`PersistenceSubscription` idiom (see
//! `auth::persistence`): `subscribe` returns a drop-guard that removes the
//! handler, and `broadcast` fans a single event out to every live
//! subscriber. The production browser implementation wraps
//! `web_sys::BroadcastChannel`, the same primitive the crate's auth
//! persistence layer already uses for cross-tab notification; the native
//! `ChannelMessageBus` stands in for integration tests and non-browser
//! embedding.

pub mod channel;

#[cfg(all(feature = "wasm-web", target_arch = "wasm32"))]
pub mod browser;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use channel::ChannelMessageBus;

/// A chunk-size/concurrency override a foreground client may attach to
/// `START_UPLOAD` (§4.3's `chunkConfig`/`retryConfig`), layered over
/// `EngineConfig`'s defaults for that one upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkConfigOverride {
    pub part_size: Option<u64>,
    pub max_concurrent_uploads: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfigOverride {
    pub attempts: Option<u32>,
    pub delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// The JSON-representable portion of `START_UPLOAD` (§4.3). The source
/// bytes themselves (the command's `file` field) are not JSON: in the
/// browser they arrive as a transferred `Blob`/`File` handle alongside the
/// structured message, not inside it. Callers pass the matching
/// `Arc<dyn ByteSource>` to `UploadEngine::handle_start_upload` out of
/// band; this struct only carries what actually survives a JSON round
/// trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub duration: Option<f64>,
    #[serde(default)]
    pub retry_config: Option<RetryConfigOverride>,
    #[serde(default)]
    pub chunk_config: Option<ChunkConfigOverride>,
}

/// Inbound commands (§4.3). Deserialized from `{"type": "...", ...}`.
/// `Unknown` is the exhaustive default arm: any `type` that doesn't match a
/// known command lands here instead of failing to parse, matching "unknown
/// command types reach an exhaustive default arm and are logged as
/// warnings" rather than being treated as a malformed message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    #[serde(rename = "START_UPLOAD")]
    StartUpload(StartUploadRequest),
    #[serde(rename = "RESUME_UPLOAD")]
    ResumeUpload { content_id: String },
    #[serde(rename = "PAUSE_UPLOAD")]
    PauseUpload { content_id: String },
    #[serde(rename = "CANCEL_UPLOAD")]
    CancelUpload { content_id: String },
    #[serde(rename = "GET_UPLOAD_STATUS")]
    GetUploadStatus { content_id: String },
    #[serde(rename = "GET_ACTIVE_UPLOADS")]
    GetActiveUploads,
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
    #[serde(other)]
    Unknown,
}

/// Parses a raw inbound message. A JSON parse failure is the "invalid
/// message" case from §4.3: the shape guard rejected it outright, and the
/// caller should emit `LOG{level: "error"}` and drop it. A successful parse
/// that lands on `Command::Unknown` is a recognized-shape, unrecognized-type
/// message and should only warn.
pub fn decode_command(raw: &str) -> Result<Command, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Outbound events (§4.3, §6). Every variant that is upload-scoped carries
/// `content_id`; `UPLOAD_PROGRESS` and `UPLOAD_COMPLETE` carry the extra
/// fields §6 documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[allow(clippy::large_enum_variant)]
pub enum Event {
    #[serde(rename = "INITIATE_UPLOAD_RESPONSE")]
    InitiateUploadResponse {
        content_id: String,
        upload_id: String,
        key: String,
    },
    #[serde(rename = "UPLOAD_PROGRESS")]
    UploadProgress {
        content_id: String,
        progress: u8,
        uploaded_bytes: u64,
        total_bytes: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        upload_speed: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_remaining: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_connections: Option<usize>,
    },
    #[serde(rename = "CHUNK_UPLOADED")]
    ChunkUploaded {
        content_id: String,
        part_number: u32,
    },
    #[serde(rename = "RETRYING_CHUNK")]
    RetryingChunk {
        content_id: String,
        part_number: u32,
        attempt: u32,
        next_attempt_delay_ms: u64,
    },
    #[serde(rename = "UPLOAD_COMPLETE")]
    UploadComplete {
        content_id: String,
        file_url: String,
        duration_ms: u64,
        total_bytes: u64,
        average_speed: f64,
    },
    #[serde(rename = "UPLOAD_ERROR")]
    UploadError {
        content_id: String,
        error: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        part_number: Option<u32>,
    },
    #[serde(rename = "UPLOAD_PAUSED")]
    UploadPaused { content_id: String },
    #[serde(rename = "UPLOAD_CANCELLED")]
    UploadCancelled { content_id: String },
    #[serde(rename = "UPLOAD_STATUS")]
    UploadStatus {
        content_id: String,
        status: String,
    },
    #[serde(rename = "UPLOADS_UPDATE")]
    UploadsUpdate { uploads: Vec<UploadSummary> },
    #[serde(rename = "LOG")]
    Log { level: String, message: String },
}

/// One entry in an `UPLOADS_UPDATE` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub content_id: String,
    pub status: String,
    pub progress: u8,
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Drop-guard returned by `MessageBus::subscribe`. Mirrors
/// `auth::persistence::PersistenceSubscription`: dropping it (or calling
/// nothing at all) removes the handler exactly once.
pub struct Subscription {
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn noop() -> Self {
        Self { cleanup: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// The bus's only two operations, per §4.3: fan an event out to every
/// attached client, and attach a new client. There is no request/response
/// path; a command handler that needs to reply does so exclusively through
/// `broadcast`.
pub trait MessageBus: Send + Sync {
    fn broadcast(&self, event: Event);
    fn subscribe(&self, handler: EventHandler) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_command_types() {
        let raw = r#"{"type":"PAUSE_UPLOAD","contentId":"abc"}"#;
        match decode_command(raw).unwrap() {
            Command::PauseUpload { content_id } => assert_eq!(content_id, "abc"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn decodes_start_upload_with_optional_overrides() {
        let raw = r#"{
            "type":"START_UPLOAD",
            "fileName":"clip.mp4",
            "fileSize":1000,
            "fileType":"video/mp4",
            "duration":12.5
        }"#;
        match decode_command(raw).unwrap() {
            Command::StartUpload(req) => {
                assert_eq!(req.file_name, "clip.mp4");
                assert_eq!(req.file_size, 1000);
                assert!(req.retry_config.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unit_commands_need_no_payload() {
        assert!(matches!(
            decode_command(r#"{"type":"GET_ACTIVE_UPLOADS"}"#).unwrap(),
            Command::GetActiveUploads
        ));
        assert!(matches!(
            decode_command(r#"{"type":"HEARTBEAT"}"#).unwrap(),
            Command::Heartbeat
        ));
    }

    #[test]
    fn unrecognized_type_lands_on_the_exhaustive_default_arm() {
        let raw = r#"{"type":"SOMETHING_ELSE"}"#;
        assert!(matches!(decode_command(raw).unwrap(), Command::Unknown));
    }

    #[test]
    fn malformed_json_is_a_decode_error_not_a_panic() {
        assert!(decode_command("{not json").is_err());
    }

    #[test]
    fn events_serialize_with_a_type_discriminator() {
        let event = Event::UploadPaused {
            content_id: "c1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "UPLOAD_PAUSED");
        assert_eq!(json["contentId"], "c1");
    }

    #[test]
    fn progress_event_omits_unset_optional_fields() {
        let event = Event::UploadProgress {
            content_id: "c1".into(),
            progress: 50,
            uploaded_bytes: 500,
            total_bytes: 1000,
            upload_speed: None,
            time_remaining: None,
            active_connections: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("uploadSpeed").is_none());
        assert!(json.get("timeRemaining").is_none());
    }
}
