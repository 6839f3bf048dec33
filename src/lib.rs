//! A resumable, chunked, large-file multipart upload engine meant to run
//! inside a background browser worker (Service Worker / Shared Worker) and
//! drive concurrent PUTs against an S3-compatible object store.
//!
//! The crate is organized leaves-first, mirroring the system's own data
//! flow: [`persistence`] and [`control_plane`] are the durable/networked
//! leaves; [`bus`] is the message-driven control surface; [`engine`] is the
//! stateful core that ties them together; [`lifecycle`] replays persisted
//! uploads across worker restarts.

pub mod bus;
pub mod cancel;
pub mod config;
pub mod control_plane;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod logger;
pub mod model;
pub mod persistence;
pub mod platform;

pub use bus::{Command, Event, MessageBus};
pub use config::EngineConfig;
pub use control_plane::ControlPlaneClient;
pub use engine::UploadEngine;
pub use error::{EngineError, EngineErrorKind, EngineResult};
pub use lifecycle::LifecycleController;
pub use model::{ByteSource, UploadState, UploadStatus};
pub use persistence::PersistenceStore;
