//! The Persistence Store (§4.1): durable storage of `UploadState` and, when
//! the source bytes must survive a restart, `UploadChunk` records.
//!
//! One production implementation per target, following the crate's existing
//! multi-backend persistence idiom (see `auth::persistence`): an
//! `IndexedDbPersistenceStore` behind `wasm-web` + `experimental-indexed-db`,
//! and a `MemoryPersistenceStore` everywhere else (native embedding, tests,
//! and the fallback when IndexedDB is compiled out).

mod memory;

#[cfg(all(feature = "wasm-web", target_arch = "wasm32", feature = "experimental-indexed-db"))]
mod indexed_db;

pub use memory::MemoryPersistenceStore;

#[cfg(all(feature = "wasm-web", target_arch = "wasm32", feature = "experimental-indexed-db"))]
pub use indexed_db::IndexedDbPersistenceStore;

use crate::error::EngineResult;
use crate::model::{UploadChunk, UploadState};

#[cfg(not(target_arch = "wasm32"))]
use async_trait::async_trait;
#[cfg(target_arch = "wasm32")]
use async_trait::async_trait as local_async_trait;

/// Durable storage for upload state and queued chunk bytes.
///
/// Every operation is a single transaction; callers must not assume
/// read-modify-write spans two calls. `wasm32` builds use the `?Send`
/// flavor of `async_trait` because `web_sys` handles are not `Send`.
#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_upload_state(&self, state: &UploadState) -> EngineResult<()>;
    async fn load_upload_state(&self, content_id: &str) -> EngineResult<Option<UploadState>>;
    async fn load_all_upload_states(&self) -> EngineResult<Vec<UploadState>>;
    async fn delete_upload_state(&self, content_id: &str) -> EngineResult<()>;

    async fn save_chunk(&self, chunk: &UploadChunk) -> EngineResult<()>;
    async fn load_chunks(&self, upload_id: &str) -> EngineResult<Vec<UploadChunk>>;
    async fn delete_chunks(&self, upload_id: &str) -> EngineResult<()>;
}

#[cfg(target_arch = "wasm32")]
#[local_async_trait(?Send)]
pub trait PersistenceStore {
    async fn save_upload_state(&self, state: &UploadState) -> EngineResult<()>;
    async fn load_upload_state(&self, content_id: &str) -> EngineResult<Option<UploadState>>;
    async fn load_all_upload_states(&self) -> EngineResult<Vec<UploadState>>;
    async fn delete_upload_state(&self, content_id: &str) -> EngineResult<()>;

    async fn save_chunk(&self, chunk: &UploadChunk) -> EngineResult<()>;
    async fn load_chunks(&self, upload_id: &str) -> EngineResult<Vec<UploadChunk>>;
    async fn delete_chunks(&self, upload_id: &str) -> EngineResult<()>;
}

pub(crate) const UPLOADS_STORE: &str = "uploads";
pub(crate) const CHUNKS_STORE: &str = "chunks";
pub(crate) const CHUNKS_BY_UPLOAD_INDEX: &str = "uploadId";
pub(crate) const METADATA_STORE: &str = "metadata";
