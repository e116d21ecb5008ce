//! Per-conversation drafts: message text plus at most one pending
//! attachment. An entry exists only while it holds something.

use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::{ConversationId, MediaKind, UploadHandle},
    protocol::EncryptedFile,
};
use tracing::debug;
use uuid::Uuid;

use crate::upload::{UploadProgress, UploadState};

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Identifies one pipeline run. Replacing an attachment issues a new id, so
/// a run holding the old id sees itself invalidated at its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// A user-picked file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    name: Option<String>,
    mime_type: Option<String>,
    data: Arc<[u8]>,
}

impl AttachmentFile {
    /// Guesses the MIME type from the file name.
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let mime_type = mime_guess::from_path(&name)
            .first()
            .map(|mime| mime.essence_str().to_string());
        Self {
            name: Some(name),
            mime_type,
            data: Arc::from(data.into()),
        }
    }

    pub fn unnamed(mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: None,
            mime_type: Some(mime_type.into()),
            data: Arc::from(data.into()),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn mime_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(FALLBACK_MIME_TYPE)
    }

    pub fn media_kind(&self) -> MediaKind {
        MediaKind::from_mime(self.mime_type())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct PendingAttachment {
    pub file: AttachmentFile,
    pub job: JobId,
    pub state: UploadState,
    pub upload_handle: Option<UploadHandle>,
    pub progress: Option<UploadProgress>,
    pub encryption: Option<EncryptedFile>,
}

#[derive(Debug, Clone, Default)]
pub struct Composition {
    pub message: String,
    pub attachment: Option<PendingAttachment>,
    pub is_sending: bool,
}

impl Composition {
    fn is_empty(&self) -> bool {
        self.message.is_empty() && self.attachment.is_none()
    }
}

/// What `begin_send` captured for the pipeline.
#[derive(Debug, Clone)]
pub struct SendSnapshot {
    pub attachment: Option<(JobId, AttachmentFile)>,
}

/// Result of removing an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanceledAttachment {
    pub had_attachment: bool,
    pub in_flight: Option<UploadHandle>,
}

#[derive(Debug, Default)]
pub struct CompositionStore {
    entries: HashMap<ConversationId, Composition>,
}

impl CompositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Composition> {
        self.entries.get(id)
    }

    pub fn set_message(&mut self, id: &ConversationId, text: impl Into<String>) {
        let text = text.into();
        let clear = text.is_empty();
        self.entries.entry(id.clone()).or_default().message = text;
        if clear {
            self.collect_if_empty(id);
        }
    }

    pub fn message(&self, id: &ConversationId) -> &str {
        self.entries
            .get(id)
            .map(|entry| entry.message.as_str())
            .unwrap_or("")
    }

    /// Replaces any pending attachment with a fresh, idle one.
    pub fn set_attachment(&mut self, id: &ConversationId, file: AttachmentFile) -> JobId {
        let job = JobId::new();
        let entry = self.entries.entry(id.clone()).or_default();
        if let Some(previous) = entry.attachment.as_ref() {
            debug!(conversation = %id, state = ?previous.state, "composer: replacing pending attachment");
        }
        entry.attachment = Some(PendingAttachment {
            file,
            job,
            state: UploadState::Idle,
            upload_handle: None,
            progress: None,
            encryption: None,
        });
        job
    }

    pub fn attachment(&self, id: &ConversationId) -> Option<&PendingAttachment> {
        self.entries.get(id)?.attachment.as_ref()
    }

    pub fn has_attachment(&self, id: &ConversationId) -> bool {
        self.attachment(id).is_some()
    }

    /// Drops the attachment, keeping the entry only when a draft message
    /// remains. The caller cancels `in_flight` with the protocol client.
    pub fn cancel_attachment(&mut self, id: &ConversationId) -> CanceledAttachment {
        let Some(entry) = self.entries.get_mut(id) else {
            return CanceledAttachment {
                had_attachment: false,
                in_flight: None,
            };
        };
        let Some(attachment) = entry.attachment.take() else {
            return CanceledAttachment {
                had_attachment: false,
                in_flight: None,
            };
        };
        if entry.message.is_empty() {
            self.entries.remove(id);
        } else {
            entry.is_sending = false;
        }
        CanceledAttachment {
            had_attachment: true,
            in_flight: attachment.upload_handle,
        }
    }

    pub fn is_sending(&self, id: &ConversationId) -> bool {
        self.entries.get(id).is_some_and(|entry| entry.is_sending)
    }

    /// Marks the entry as sending. Returns `None` when there is nothing to
    /// send.
    pub fn begin_send(&mut self, id: &ConversationId) -> Option<SendSnapshot> {
        let entry = self.entries.get_mut(id)?;
        entry.is_sending = true;
        Some(SendSnapshot {
            attachment: entry
                .attachment
                .as_ref()
                .map(|attachment| (attachment.job, attachment.file.clone())),
        })
    }

    /// Whether `job` is still the live attachment of `id`.
    pub fn is_current_job(&self, id: &ConversationId, job: JobId) -> bool {
        self.attachment(id)
            .is_some_and(|attachment| attachment.job == job)
    }

    pub fn set_job_state(&mut self, id: &ConversationId, job: JobId, state: UploadState) -> bool {
        self.with_job(id, job, |attachment| attachment.state = state)
    }

    pub fn record_upload_handle(
        &mut self,
        id: &ConversationId,
        job: JobId,
        handle: UploadHandle,
    ) -> bool {
        self.with_job(id, job, |attachment| {
            attachment.upload_handle = Some(handle)
        })
    }

    pub fn clear_upload_handle(&mut self, id: &ConversationId, job: JobId) {
        self.with_job(id, job, |attachment| attachment.upload_handle = None);
    }

    pub fn record_progress(
        &mut self,
        id: &ConversationId,
        job: JobId,
        progress: UploadProgress,
    ) -> bool {
        self.with_job(id, job, |attachment| attachment.progress = Some(progress))
    }

    pub fn record_encryption(&mut self, id: &ConversationId, job: JobId, file: EncryptedFile) {
        self.with_job(id, job, |attachment| attachment.encryption = Some(file));
    }

    /// Ends a send. Removes the entry and returns true if it was still
    /// marked as sending.
    pub fn finish_send(&mut self, id: &ConversationId) -> bool {
        if self.is_sending(id) {
            self.entries.remove(id);
            true
        } else {
            false
        }
    }

    /// Ends a send whose text could not be delivered: the draft text stays,
    /// the attachment does not.
    pub fn abort_send(&mut self, id: &ConversationId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.is_sending = false;
            entry.attachment = None;
        }
        self.collect_if_empty(id);
    }

    fn with_job(
        &mut self,
        id: &ConversationId,
        job: JobId,
        update: impl FnOnce(&mut PendingAttachment),
    ) -> bool {
        match self
            .entries
            .get_mut(id)
            .and_then(|entry| entry.attachment.as_mut())
        {
            Some(attachment) if attachment.job == job => {
                update(attachment);
                true
            }
            _ => false,
        }
    }

    fn collect_if_empty(&mut self, id: &ConversationId) {
        if self.entries.get(id).is_some_and(Composition::is_empty) {
            self.entries.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> ConversationId {
        "!room:example.org".into()
    }

    #[test]
    fn empty_message_without_attachment_leaves_no_entry() {
        let mut store = CompositionStore::new();
        store.set_message(&room(), "hi");
        assert_eq!(store.message(&room()), "hi");
        store.set_message(&room(), "");
        assert!(!store.contains(&room()));
        assert_eq!(store.message(&room()), "");
    }

    #[test]
    fn empty_message_keeps_entry_with_attachment() {
        let mut store = CompositionStore::new();
        store.set_attachment(&room(), AttachmentFile::new("a.txt", b"x".to_vec()));
        store.set_message(&room(), "draft");
        store.set_message(&room(), "");
        assert!(store.has_attachment(&room()));
    }

    #[test]
    fn replacing_attachment_invalidates_previous_job() {
        let mut store = CompositionStore::new();
        let first = store.set_attachment(&room(), AttachmentFile::new("a.png", b"1".to_vec()));
        let second = store.set_attachment(&room(), AttachmentFile::new("b.png", b"2".to_vec()));
        assert!(!store.is_current_job(&room(), first));
        assert!(store.is_current_job(&room(), second));
        assert!(!store.set_job_state(&room(), first, UploadState::Uploading));
        assert_eq!(
            store.attachment(&room()).expect("attachment").file.name(),
            Some("b.png")
        );
    }

    #[test]
    fn cancel_keeps_draft_text_and_reports_in_flight_upload() {
        let mut store = CompositionStore::new();
        store.set_message(&room(), "caption");
        let job = store.set_attachment(&room(), AttachmentFile::new("a.png", b"1".to_vec()));
        let handle = UploadHandle::new();
        assert!(store.record_upload_handle(&room(), job, handle));
        store.begin_send(&room());

        let canceled = store.cancel_attachment(&room());
        assert_eq!(
            canceled,
            CanceledAttachment {
                had_attachment: true,
                in_flight: Some(handle),
            }
        );
        assert!(!store.has_attachment(&room()));
        assert!(!store.is_sending(&room()));
        assert_eq!(store.message(&room()), "caption");
    }

    #[test]
    fn cancel_without_draft_removes_entry() {
        let mut store = CompositionStore::new();
        store.set_attachment(&room(), AttachmentFile::new("a.png", b"1".to_vec()));
        let canceled = store.cancel_attachment(&room());
        assert!(canceled.had_attachment);
        assert!(canceled.in_flight.is_none());
        assert!(!store.contains(&room()));
    }

    #[test]
    fn cancel_without_attachment_leaves_text_send_alone() {
        let mut store = CompositionStore::new();
        store.set_message(&room(), "hello");
        store.begin_send(&room());

        let canceled = store.cancel_attachment(&room());
        assert!(!canceled.had_attachment);
        assert!(canceled.in_flight.is_none());
        assert!(store.is_sending(&room()));
        assert!(store.finish_send(&room()));
        assert!(!store.contains(&room()));
    }

    #[test]
    fn guesses_mime_type_from_name() {
        let file = AttachmentFile::new("clip.mp4", vec![0u8; 4]);
        assert_eq!(file.mime_type(), "video/mp4");
        assert_eq!(file.media_kind(), MediaKind::Video);
        assert_eq!(file.size(), 4);

        let unknown = AttachmentFile::new("blob", Vec::<u8>::new());
        assert_eq!(unknown.mime_type(), FALLBACK_MIME_TYPE);
    }

    #[test]
    fn abort_send_keeps_text_but_drops_attachment() {
        let mut store = CompositionStore::new();
        store.set_message(&room(), "retry me");
        store.set_attachment(&room(), AttachmentFile::new("a.png", b"1".to_vec()));
        store.begin_send(&room());
        store.abort_send(&room());
        assert_eq!(store.message(&room()), "retry me");
        assert!(!store.has_attachment(&room()));
        assert!(!store.is_sending(&room()));
        assert!(!store.finish_send(&room()));
    }
}
