//! The Control-Plane Client (§4.2): the five-endpoint HTTP protocol a
//! worker speaks to the upload server, plus its bounded-retry contract.

pub mod acceleration;
pub mod backoff;

#[cfg(not(target_arch = "wasm32"))]
pub mod transport;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::EngineResult;
use crate::model::UploadPart;

#[cfg(not(target_arch = "wasm32"))]
use async_trait::async_trait;
#[cfg(target_arch = "wasm32")]
use async_trait::async_trait as local_async_trait;

#[cfg(not(target_arch = "wasm32"))]
pub use transport::HttpControlPlaneClient;

/// Request payload for `initiateMultipartUpload`.
#[derive(Debug, Clone, Serialize)]
pub struct FileMeta {
    pub file_name: String,
    pub file_type: String,
    pub size: u64,
    pub duration: Option<f64>,
    pub use_acceleration: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateResult {
    pub upload_id: String,
    pub key: String,
    pub content_id: String,
    pub acceleration_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteResult {
    pub location: String,
}

/// The control-plane surface (§4.2). `(?Send)` on wasm because `reqwest`'s
/// wasm transport (and any `web_sys` handle it touches) is not `Send`.
#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    async fn initiate_multipart_upload(&self, meta: &FileMeta) -> EngineResult<InitiateResult>;
    async fn get_signed_url(&self, part_number: u32, upload_id: &str, key: &str, use_acceleration: bool) -> EngineResult<String>;
    async fn upload_part(
        &self,
        signed_url: &str,
        part_number: u32,
        chunk: Vec<u8>,
        cancel: &CancelToken,
    ) -> EngineResult<UploadPart>;
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        content_id: &str,
        parts: &[UploadPart],
    ) -> EngineResult<CompleteResult>;
    async fn cancel_upload(&self, key: &str, upload_id: &str, content_id: &str) -> EngineResult<()>;
    async fn list_uploaded_parts(&self, key: &str, upload_id: &str) -> EngineResult<Vec<UploadPart>>;
}

#[cfg(target_arch = "wasm32")]
#[local_async_trait(?Send)]
pub trait ControlPlaneClient {
    async fn initiate_multipart_upload(&self, meta: &FileMeta) -> EngineResult<InitiateResult>;
    async fn get_signed_url(&self, part_number: u32, upload_id: &str, key: &str, use_acceleration: bool) -> EngineResult<String>;
    async fn upload_part(
        &self,
        signed_url: &str,
        part_number: u32,
        chunk: Vec<u8>,
        cancel: &CancelToken,
    ) -> EngineResult<UploadPart>;
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        content_id: &str,
        parts: &[UploadPart],
    ) -> EngineResult<CompleteResult>;
    async fn cancel_upload(&self, key: &str, upload_id: &str, content_id: &str) -> EngineResult<()>;
    async fn list_uploaded_parts(&self, key: &str, upload_id: &str) -> EngineResult<Vec<UploadPart>>;
}

/// Scripted test double mirroring the crate's existing `NoopFetchClient`:
/// every call succeeds trivially with deterministic data, letting engine
/// tests exercise the part-driving loop without a network.
pub struct NoopControlPlaneClient;

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl ControlPlaneClient for NoopControlPlaneClient {
    async fn initiate_multipart_upload(&self, meta: &FileMeta) -> EngineResult<InitiateResult> {
        Ok(InitiateResult {
            upload_id: "noop-upload".into(),
            key: format!("uploads/{}", meta.file_name),
            content_id: "noop-content".into(),
            acceleration_endpoint: None,
        })
    }

    async fn get_signed_url(&self, part_number: u32, upload_id: &str, key: &str, _use_acceleration: bool) -> EngineResult<String> {
        Ok(format!("https://example.invalid/{key}/{upload_id}/{part_number}"))
    }

    async fn upload_part(
        &self,
        _signed_url: &str,
        part_number: u32,
        chunk: Vec<u8>,
        cancel: &CancelToken,
    ) -> EngineResult<UploadPart> {
        cancel.check()?;
        Ok(UploadPart {
            part_number,
            e_tag: format!("noop-etag-{part_number}"),
            size: chunk.len() as u64,
        })
    }

    async fn complete_multipart_upload(
        &self,
        _key: &str,
        _upload_id: &str,
        _content_id: &str,
        _parts: &[UploadPart],
    ) -> EngineResult<CompleteResult> {
        Ok(CompleteResult {
            location: "https://example.invalid/final-object".into(),
        })
    }

    async fn cancel_upload(&self, _key: &str, _upload_id: &str, _content_id: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn list_uploaded_parts(&self, _key: &str, _upload_id: &str) -> EngineResult<Vec<UploadPart>> {
        Ok(vec![])
    }
}
