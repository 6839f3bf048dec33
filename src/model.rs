//! The data model (§3): `UploadState`, `UploadChunk`, and the `ByteSource`
//! abstraction over the file/blob handle an upload reads from.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{fatal, EngineResult};

/// One completed part, as recorded in `UploadState::parts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    pub part_number: u32,
    pub e_tag: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Error,
    Cancelled,
    NotFound,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Paused => "paused",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
            UploadStatus::Cancelled => "cancelled",
            UploadStatus::NotFound => "not_found",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Cancelled)
    }
}

/// Random-access byte-range slicing over the source file/blob.
///
/// §9 ("File handle across cold restart") decides against persisting a
/// `ByteSource` across a worker restart: it lives only as long as the
/// in-memory `ActiveUpload` that owns it. A cold-started worker cannot
/// reconstruct one, so a cold-restarted `in_progress` upload surfaces to the
/// foreground as `paused` rather than silently failing to resume.
pub trait ByteSource: Send + Sync {
    /// Total length of the underlying byte sequence.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads `[start, end)`. `end` is clamped to `len()` by the caller.
    fn read_range(&self, start: u64, end: u64) -> EngineResult<Vec<u8>>;
}

/// An in-memory byte buffer, usable as a `ByteSource` on any target; the
/// production browser implementation instead wraps a `web_sys::Blob`/`File`
/// behind the same trait.
pub struct InMemoryByteSource {
    data: Arc<Vec<u8>>,
}

impl InMemoryByteSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }
}

impl ByteSource for InMemoryByteSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, start: u64, end: u64) -> EngineResult<Vec<u8>> {
        let start = start as usize;
        let end = (end as usize).min(self.data.len());
        if start > end || start > self.data.len() {
            return Err(fatal(format!(
                "byte range [{start}, {end}) is out of bounds for a {}-byte source",
                self.data.len()
            )));
        }
        Ok(self.data[start..end].to_vec())
    }
}

/// One record per upload, keyed by `content_id` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadState {
    pub content_id: String,
    pub upload_id: String,
    pub key: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub part_size: u64,
    pub max_concurrent_uploads: usize,
    pub parts: Vec<UploadPart>,
    pub progress: u8,
    pub status: UploadStatus,
    pub start_time_ms: u64,
    pub accelerated: bool,
    pub acceleration_endpoint: Option<String>,
    pub error: Option<String>,
    pub file_url: Option<String>,
}

impl UploadState {
    pub fn total_parts(&self) -> u32 {
        if self.part_size == 0 {
            return 0;
        }
        ((self.file_size + self.part_size - 1) / self.part_size) as u32
    }

    /// Bytes uploaded so far, per the §9 progress-computation fix: the sum of
    /// each completed part's real size, clamped to `file_size` rather than
    /// `completed_parts * part_size` (which overcounts the final short part).
    pub fn uploaded_bytes(&self) -> u64 {
        let sum: u64 = self.parts.iter().map(|p| p.size).sum();
        sum.min(self.file_size)
    }

    /// `progress` is the part-count fraction §3 defines it as
    /// (`completed_parts / ceil(fileSize / partSize)`), not a byte fraction —
    /// `uploaded_bytes()` is a separate quantity that only feeds
    /// `uploadedBytes`/speed reporting.
    pub fn recompute_progress(&mut self) {
        let total = self.total_parts();
        self.progress = if total == 0 {
            100
        } else {
            let pct = (self.completed_part_numbers().len() as u64 * 100) / total as u64;
            pct.min(100) as u8
        };
    }

    pub fn completed_part_numbers(&self) -> std::collections::HashSet<u32> {
        self.parts.iter().map(|p| p.part_number).collect()
    }

    pub fn is_complete(&self) -> bool {
        let total = self.total_parts();
        total > 0 && self.completed_part_numbers().len() as u32 == total
    }
}

/// Persistence-only record for a queued-but-not-yet-uploaded part (§3). Only
/// populated when bytes must survive a restart; unused under design decision
/// (b) for the file-handle problem, but kept as part of the durable schema so
/// an embedder that chooses option (a) has somewhere to put the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunk {
    pub id: String,
    pub upload_id: String,
    pub part_number: u32,
    pub size: u64,
    pub data: Vec<u8>,
    pub status: ChunkStatus,
    pub attempts: u32,
    pub last_attempt_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Queued,
    Uploading,
    Uploaded,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(parts: Vec<UploadPart>, file_size: u64) -> UploadState {
        UploadState {
            content_id: "content-1".into(),
            upload_id: "upload-1".into(),
            key: "videos/content-1.mp4".into(),
            file_name: "clip.mp4".into(),
            file_size,
            file_type: "video/mp4".into(),
            part_size: 10 * 1024 * 1024,
            max_concurrent_uploads: 5,
            parts,
            progress: 0,
            status: UploadStatus::InProgress,
            start_time_ms: 0,
            accelerated: false,
            acceleration_endpoint: None,
            error: None,
            file_url: None,
        }
    }

    #[test]
    fn uploaded_bytes_sums_real_part_sizes_not_part_size_times_count() {
        let part_size = 10 * 1024 * 1024u64;
        let file_size = 25 * 1024 * 1024u64;
        let parts = vec![
            UploadPart { part_number: 1, e_tag: "a".into(), size: part_size },
            UploadPart { part_number: 2, e_tag: "b".into(), size: part_size },
            UploadPart { part_number: 3, e_tag: "c".into(), size: 5 * 1024 * 1024 },
        ];
        let state = sample_state(parts, file_size);
        assert_eq!(state.uploaded_bytes(), file_size);
    }

    #[test]
    fn progress_is_monotonic_and_caps_at_100() {
        let mut state = sample_state(vec![], 20 * 1024 * 1024);
        state.recompute_progress();
        assert_eq!(state.progress, 0);

        state.parts.push(UploadPart {
            part_number: 1,
            e_tag: "a".into(),
            size: 10 * 1024 * 1024,
        });
        state.recompute_progress();
        assert_eq!(state.progress, 50);

        state.parts.push(UploadPart {
            part_number: 2,
            e_tag: "b".into(),
            size: 10 * 1024 * 1024,
        });
        state.recompute_progress();
        assert_eq!(state.progress, 100);
    }

    /// §8 scenario 1: a 25 MiB file split into 10/10/5 MiB parts must report
    /// 33, 67, 100 — the part-count fraction — not 40, 80, 100, which is
    /// what a byte fraction would give on the short final part.
    #[test]
    fn progress_is_a_part_count_fraction_not_a_byte_fraction() {
        let mut state = sample_state(vec![], 25 * 1024 * 1024);
        state.parts.push(UploadPart { part_number: 1, e_tag: "a".into(), size: 10 * 1024 * 1024 });
        state.recompute_progress();
        assert_eq!(state.progress, 33);

        state.parts.push(UploadPart { part_number: 2, e_tag: "b".into(), size: 10 * 1024 * 1024 });
        state.recompute_progress();
        assert_eq!(state.progress, 67);

        state.parts.push(UploadPart { part_number: 3, e_tag: "c".into(), size: 5 * 1024 * 1024 });
        state.recompute_progress();
        assert_eq!(state.progress, 100);
    }

    #[test]
    fn total_parts_rounds_up_to_cover_the_final_short_part() {
        let state = sample_state(vec![], 25 * 1024 * 1024);
        assert_eq!(state.total_parts(), 3);
    }

    #[test]
    fn is_complete_requires_every_part_number_present() {
        let mut state = sample_state(vec![], 25 * 1024 * 1024);
        assert!(!state.is_complete());
        state.parts.push(UploadPart { part_number: 1, e_tag: "a".into(), size: 10 * 1024 * 1024 });
        state.parts.push(UploadPart { part_number: 2, e_tag: "b".into(), size: 10 * 1024 * 1024 });
        assert!(!state.is_complete());
        state.parts.push(UploadPart { part_number: 3, e_tag: "c".into(), size: 5 * 1024 * 1024 });
        assert!(state.is_complete());
    }

    #[test]
    fn in_memory_byte_source_slices_ranges() {
        let source = InMemoryByteSource::new((0u8..20).collect());
        let slice = source.read_range(5, 10).unwrap();
        assert_eq!(slice, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn in_memory_byte_source_clamps_and_rejects_inverted_ranges() {
        let source = InMemoryByteSource::new(vec![1, 2, 3]);
        assert_eq!(source.read_range(0, 100).unwrap(), vec![1, 2, 3]);
        assert!(source.read_range(5, 1).is_err());
    }
}
