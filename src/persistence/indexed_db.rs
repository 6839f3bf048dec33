use async_trait::async_trait as local_async_trait;
use web_sys::IdbDatabase;

use super::{PersistenceStore, CHUNKS_BY_UPLOAD_INDEX, CHUNKS_STORE, METADATA_STORE, UPLOADS_STORE};
use crate::config::{PERSISTENCE_DB_NAME, PERSISTENCE_DB_VERSION};
use crate::error::{storage_error, EngineResult};
use crate::model::{UploadChunk, UploadState};
use crate::platform::browser::indexed_db::{self, IndexSpec, StoreSpec};

static STORES: [StoreSpec; 3] = [
    StoreSpec {
        name: UPLOADS_STORE,
        index: None,
    },
    StoreSpec {
        name: CHUNKS_STORE,
        index: Some(IndexSpec {
            name: CHUNKS_BY_UPLOAD_INDEX,
            key_path: "uploadId",
        }),
    },
    StoreSpec {
        name: METADATA_STORE,
        index: None,
    },
];

/// IndexedDB-backed `PersistenceStore`, opened lazily and cached for the
/// lifetime of the worker, following the crate's existing
/// `IndexedDbPersistence` idiom.
pub struct IndexedDbPersistenceStore {
    db: IdbDatabase,
}

impl IndexedDbPersistenceStore {
    pub async fn open() -> EngineResult<Self> {
        let db = indexed_db::open_database(PERSISTENCE_DB_NAME, PERSISTENCE_DB_VERSION, &STORES)
            .await
            .map_err(|err| storage_error(format!("failed to open persistence database: {err}")))?;
        Ok(Self { db })
    }
}

#[local_async_trait(?Send)]
impl PersistenceStore for IndexedDbPersistenceStore {
    async fn save_upload_state(&self, state: &UploadState) -> EngineResult<()> {
        let serialized = serde_json::to_string(state)
            .map_err(|err| storage_error(format!("failed to serialize upload state: {err}")))?;
        indexed_db::put_string(&self.db, UPLOADS_STORE, &state.content_id, &serialized)
            .await
            .map_err(|err| storage_error(format!("failed to save upload state: {err}")))
    }

    async fn load_upload_state(&self, content_id: &str) -> EngineResult<Option<UploadState>> {
        let raw = indexed_db::get_string(&self.db, UPLOADS_STORE, content_id)
            .await
            .map_err(|err| storage_error(format!("failed to load upload state: {err}")))?;
        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|err| storage_error(format!("corrupt upload state record: {err}"))),
            None => Ok(None),
        }
    }

    async fn load_all_upload_states(&self) -> EngineResult<Vec<UploadState>> {
        let raw = indexed_db::get_all_strings(&self.db, UPLOADS_STORE)
            .await
            .map_err(|err| storage_error(format!("failed to scan upload states: {err}")))?;
        raw.into_iter()
            .map(|text| {
                serde_json::from_str(&text)
                    .map_err(|err| storage_error(format!("corrupt upload state record: {err}")))
            })
            .collect()
    }

    async fn delete_upload_state(&self, content_id: &str) -> EngineResult<()> {
        indexed_db::delete_key(&self.db, UPLOADS_STORE, content_id)
            .await
            .map_err(|err| storage_error(format!("failed to delete upload state: {err}")))
    }

    async fn save_chunk(&self, chunk: &UploadChunk) -> EngineResult<()> {
        let serialized = serde_json::to_string(chunk)
            .map_err(|err| storage_error(format!("failed to serialize chunk: {err}")))?;
        indexed_db::put_string(&self.db, CHUNKS_STORE, &chunk.id, &serialized)
            .await
            .map_err(|err| storage_error(format!("failed to save chunk: {err}")))
    }

    async fn load_chunks(&self, upload_id: &str) -> EngineResult<Vec<UploadChunk>> {
        let raw = indexed_db::get_all_by_index(&self.db, CHUNKS_STORE, CHUNKS_BY_UPLOAD_INDEX, upload_id)
            .await
            .map_err(|err| storage_error(format!("failed to load chunks: {err}")))?;
        raw.into_iter()
            .map(|text| {
                serde_json::from_str(&text)
                    .map_err(|err| storage_error(format!("corrupt chunk record: {err}")))
            })
            .collect()
    }

    async fn delete_chunks(&self, upload_id: &str) -> EngineResult<()> {
        indexed_db::delete_all_by_index(&self.db, CHUNKS_STORE, CHUNKS_BY_UPLOAD_INDEX, upload_id)
            .await
            .map_err(|err| storage_error(format!("failed to delete chunks: {err}")))
    }
}
