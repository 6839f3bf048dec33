use std::collections::HashMap;
use std::sync::Mutex;

#[cfg(not(target_arch = "wasm32"))]
use async_trait::async_trait;
#[cfg(target_arch = "wasm32")]
use async_trait::async_trait as local_async_trait;

use super::PersistenceStore;
use crate::error::EngineResult;
use crate::model::{UploadChunk, UploadState};

/// In-process `PersistenceStore` guarded by a mutex. Used for native
/// embedding, integration tests, and as the fallback when IndexedDB is
/// compiled out, mirroring the crate's existing `InMemoryPersistence`.
#[derive(Default)]
pub struct MemoryPersistenceStore {
    uploads: Mutex<HashMap<String, UploadState>>,
    chunks: Mutex<HashMap<String, UploadChunk>>,
}

impl MemoryPersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl PersistenceStore for MemoryPersistenceStore {
    async fn save_upload_state(&self, state: &UploadState) -> EngineResult<()> {
        self.uploads
            .lock()
            .unwrap()
            .insert(state.content_id.clone(), state.clone());
        Ok(())
    }

    async fn load_upload_state(&self, content_id: &str) -> EngineResult<Option<UploadState>> {
        Ok(self.uploads.lock().unwrap().get(content_id).cloned())
    }

    async fn load_all_upload_states(&self) -> EngineResult<Vec<UploadState>> {
        Ok(self.uploads.lock().unwrap().values().cloned().collect())
    }

    async fn delete_upload_state(&self, content_id: &str) -> EngineResult<()> {
        self.uploads.lock().unwrap().remove(content_id);
        Ok(())
    }

    async fn save_chunk(&self, chunk: &UploadChunk) -> EngineResult<()> {
        self.chunks
            .lock()
            .unwrap()
            .insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn load_chunks(&self, upload_id: &str) -> EngineResult<Vec<UploadChunk>> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|chunk| chunk.upload_id == upload_id)
            .cloned()
            .collect())
    }

    async fn delete_chunks(&self, upload_id: &str) -> EngineResult<()> {
        self.chunks
            .lock()
            .unwrap()
            .retain(|_, chunk| chunk.upload_id != upload_id);
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
#[local_async_trait(?Send)]
impl PersistenceStore for MemoryPersistenceStore {
    async fn save_upload_state(&self, state: &UploadState) -> EngineResult<()> {
        self.uploads
            .lock()
            .unwrap()
            .insert(state.content_id.clone(), state.clone());
        Ok(())
    }

    async fn load_upload_state(&self, content_id: &str) -> EngineResult<Option<UploadState>> {
        Ok(self.uploads.lock().unwrap().get(content_id).cloned())
    }

    async fn load_all_upload_states(&self) -> EngineResult<Vec<UploadState>> {
        Ok(self.uploads.lock().unwrap().values().cloned().collect())
    }

    async fn delete_upload_state(&self, content_id: &str) -> EngineResult<()> {
        self.uploads.lock().unwrap().remove(content_id);
        Ok(())
    }

    async fn save_chunk(&self, chunk: &UploadChunk) -> EngineResult<()> {
        self.chunks
            .lock()
            .unwrap()
            .insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn load_chunks(&self, upload_id: &str) -> EngineResult<Vec<UploadChunk>> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|chunk| chunk.upload_id == upload_id)
            .cloned()
            .collect())
    }

    async fn delete_chunks(&self, upload_id: &str) -> EngineResult<()> {
        self.chunks
            .lock()
            .unwrap()
            .retain(|_, chunk| chunk.upload_id != upload_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkStatus, UploadStatus};

    fn sample_state(content_id: &str) -> UploadState {
        UploadState {
            content_id: content_id.to_string(),
            upload_id: "upload-1".into(),
            key: "videos/a.mp4".into(),
            file_name: "a.mp4".into(),
            file_size: 100,
            file_type: "video/mp4".into(),
            part_size: 10,
            max_concurrent_uploads: 5,
            parts: vec![],
            progress: 0,
            status: UploadStatus::InProgress,
            start_time_ms: 0,
            accelerated: false,
            acceleration_endpoint: None,
            error: None,
            file_url: None,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemoryPersistenceStore::new();
        let state = sample_state("content-1");
        store.save_upload_state(&state).await.unwrap();

        let loaded = store.load_upload_state("content-1").await.unwrap();
        assert_eq!(loaded.unwrap().upload_id, "upload-1");
        assert!(store.load_upload_state("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryPersistenceStore::new();
        store.delete_upload_state("never-existed").await.unwrap();
        let state = sample_state("content-2");
        store.save_upload_state(&state).await.unwrap();
        store.delete_upload_state("content-2").await.unwrap();
        store.delete_upload_state("content-2").await.unwrap();
        assert!(store.load_upload_state("content-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_all_returns_every_record() {
        let store = MemoryPersistenceStore::new();
        store.save_upload_state(&sample_state("a")).await.unwrap();
        store.save_upload_state(&sample_state("b")).await.unwrap();
        let all = store.load_all_upload_states().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn chunks_are_scoped_and_bulk_deletable_by_upload_id() {
        let store = MemoryPersistenceStore::new();
        let chunk = |id: &str, upload_id: &str| UploadChunk {
            id: id.to_string(),
            upload_id: upload_id.to_string(),
            part_number: 1,
            size: 10,
            data: vec![1, 2, 3],
            status: ChunkStatus::Queued,
            attempts: 0,
            last_attempt_ms: None,
            error: None,
        };
        store.save_chunk(&chunk("c1", "upload-a")).await.unwrap();
        store.save_chunk(&chunk("c2", "upload-a")).await.unwrap();
        store.save_chunk(&chunk("c3", "upload-b")).await.unwrap();

        assert_eq!(store.load_chunks("upload-a").await.unwrap().len(), 2);
        store.delete_chunks("upload-a").await.unwrap();
        assert_eq!(store.load_chunks("upload-a").await.unwrap().len(), 0);
        assert_eq!(store.load_chunks("upload-b").await.unwrap().len(), 1);
    }
}
