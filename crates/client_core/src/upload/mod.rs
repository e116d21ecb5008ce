//! Attachment upload: metadata, optional encryption, transfer, send.

use image::GenericImageView;
use shared::{
    domain::{ContentUri, ConversationId, MediaKind, UploadHandle},
    error::ApiException,
    protocol::{
        EncryptedFile, FileContent, FileInfo, ImageContent, ImageInfo, MediaSource,
        MessageContent, VideoContent, VideoInfo,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    composer::{AttachmentFile, JobId},
    error::UploadError,
    ChatEngine, EngineEvent,
};

pub mod crypto;
pub mod media;

pub use crypto::{AttachmentEncryptor, ChaChaAttachmentEncryptor, EncryptionEnvelope};
pub use media::{bounded_thumbnail_size, ImageCrateDecoder, MediaDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    Idle,
    DerivingMetadata,
    Encrypting,
    Uploading,
    Sent,
    Canceled,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Canceled | Self::Failed)
    }

    fn can_advance_to(self, next: Self) -> bool {
        use UploadState::*;
        match (self, next) {
            (Idle, DerivingMetadata)
            | (DerivingMetadata, Encrypting)
            | (DerivingMetadata, Uploading)
            | (Encrypting, Uploading)
            | (Uploading, Sent) => true,
            (from, Canceled | Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks one pipeline run through its states.
#[derive(Debug, Clone)]
pub struct UploadJob {
    state: UploadState,
    visited: Vec<UploadState>,
}

impl Default for UploadJob {
    fn default() -> Self {
        Self {
            state: UploadState::Idle,
            visited: Vec::new(),
        }
    }
}

impl UploadJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// States entered after `Idle`, in order.
    pub fn visited(&self) -> &[UploadState] {
        &self.visited
    }

    pub fn advance(&mut self, next: UploadState) -> Result<(), UploadError> {
        if !self.state.can_advance_to(next) {
            return Err(UploadError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.visited.push(next);
        Ok(())
    }
}

/// Bytes handed to the content store.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub payload: Vec<u8>,
    /// Only set for unencrypted uploads.
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: u64,
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub final_state: UploadState,
    pub visited: Vec<UploadState>,
    pub error: Option<UploadError>,
}

impl UploadOutcome {
    pub fn is_sent(&self) -> bool {
        self.final_state == UploadState::Sent
    }
}

enum UploadedMedia {
    Plain(ContentUri),
    Encrypted(EncryptedFile),
}

impl UploadedMedia {
    fn into_source(self) -> MediaSource {
        match self {
            Self::Plain(url) => MediaSource::Plain { url },
            Self::Encrypted(file) => MediaSource::Encrypted { file },
        }
    }
}

enum DerivedMetadata {
    Image {
        dimensions: Option<(u32, u32)>,
    },
    Video {
        width: u32,
        height: u32,
        thumbnail: UploadedMedia,
        thumbnail_info: ImageInfo,
    },
    Plain,
}

fn fallback_body(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "Image",
        MediaKind::Video => "Video",
        MediaKind::Audio => "Audio",
        MediaKind::Other => "File",
    }
}

fn classify_protocol_error(err: anyhow::Error) -> UploadError {
    if err
        .downcast_ref::<ApiException>()
        .is_some_and(ApiException::is_canceled)
    {
        UploadError::Canceled
    } else {
        UploadError::Transport(format!("{err:#}"))
    }
}

impl ChatEngine {
    /// Runs one attachment to a terminal state. Failures emit
    /// `FileUploadCanceled`; they never touch the text draft.
    pub(crate) async fn run_upload(
        &self,
        conversation: &ConversationId,
        job: JobId,
        file: AttachmentFile,
        encrypted: bool,
    ) -> UploadOutcome {
        let mut tracker = UploadJob::new();
        match self
            .drive_upload(conversation, job, &file, encrypted, &mut tracker)
            .await
        {
            Ok(()) => UploadOutcome {
                final_state: tracker.state(),
                visited: tracker.visited().to_vec(),
                error: None,
            },
            Err(err) => {
                let terminal = if err.is_canceled() {
                    UploadState::Canceled
                } else {
                    UploadState::Failed
                };
                if tracker.advance(terminal).is_err() {
                    warn!(conversation = %conversation, state = ?tracker.state(), "upload: halted from terminal state");
                }
                self.composer
                    .lock()
                    .await
                    .set_job_state(conversation, job, terminal);
                if err.is_canceled() {
                    info!(conversation = %conversation, "upload: attachment canceled");
                } else {
                    warn!(conversation = %conversation, error = %err, "upload: attachment failed");
                }
                self.emit(EngineEvent::FileUploadCanceled {
                    conversation: conversation.clone(),
                });
                UploadOutcome {
                    final_state: tracker.state(),
                    visited: tracker.visited().to_vec(),
                    error: Some(err),
                }
            }
        }
    }

    async fn drive_upload(
        &self,
        conversation: &ConversationId,
        job: JobId,
        file: &AttachmentFile,
        encrypted: bool,
        tracker: &mut UploadJob,
    ) -> Result<(), UploadError> {
        self.enter_state(conversation, job, tracker, UploadState::DerivingMetadata)
            .await?;
        let kind = file.media_kind();
        let metadata = self
            .derive_metadata(conversation, job, file, kind, encrypted)
            .await?;

        let (payload, envelope) = if encrypted {
            self.enter_state(conversation, job, tracker, UploadState::Encrypting)
                .await?;
            let sealed = self.encryptor.encrypt(file.data()).await?;
            self.ensure_current(conversation, job).await?;
            (sealed.ciphertext, Some(sealed.envelope))
        } else {
            (file.data().to_vec(), None)
        };

        self.enter_state(conversation, job, tracker, UploadState::Uploading)
            .await?;
        let request = UploadRequest {
            payload,
            filename: if encrypted {
                None
            } else {
                file.name().map(str::to_string)
            },
            mime_type: if encrypted {
                None
            } else {
                Some(file.mime_type().to_string())
            },
        };
        let uri = self.transfer(conversation, job, request, true).await?;
        self.emit(EngineEvent::FileUploaded {
            conversation: conversation.clone(),
        });

        let uploaded = match envelope {
            Some(envelope) => {
                let encrypted_file =
                    envelope.into_file(uri, Some(file.mime_type().to_string()));
                self.composer.lock().await.record_encryption(
                    conversation,
                    job,
                    encrypted_file.clone(),
                );
                UploadedMedia::Encrypted(encrypted_file)
            }
            None => UploadedMedia::Plain(uri),
        };
        let content = build_content(file, kind, uploaded, metadata);

        self.protocol
            .send_message(conversation, content)
            .await
            .map_err(classify_protocol_error)?;
        tracker.advance(UploadState::Sent)?;
        self.composer
            .lock()
            .await
            .set_job_state(conversation, job, UploadState::Sent);
        info!(conversation = %conversation, "upload: attachment sent");
        Ok(())
    }

    async fn derive_metadata(
        &self,
        conversation: &ConversationId,
        job: JobId,
        file: &AttachmentFile,
        kind: MediaKind,
        encrypted: bool,
    ) -> Result<DerivedMetadata, UploadError> {
        match kind {
            MediaKind::Image => {
                let dimensions = match self.decoder.image_dimensions(file.data()).await {
                    Ok(dimensions) => Some(dimensions),
                    Err(err) => {
                        debug!(conversation = %conversation, error = %err, "upload: image dimensions unavailable");
                        None
                    }
                };
                Ok(DerivedMetadata::Image { dimensions })
            }
            MediaKind::Video => {
                let frame = self.decoder.video_first_frame(file.data()).await?;
                let (width, height) = frame.dimensions();
                let thumbnail = media::encode_thumbnail_jpeg(
                    &frame,
                    self.settings.thumbnail_max_width,
                    self.settings.thumbnail_max_height,
                )?;
                let thumbnail_info = ImageInfo {
                    mimetype: Some(media::THUMBNAIL_MIME_TYPE.to_string()),
                    size: Some(thumbnail.data.len() as u64),
                    w: Some(thumbnail.width),
                    h: Some(thumbnail.height),
                };
                let thumbnail = self
                    .upload_thumbnail(conversation, job, thumbnail.data, encrypted)
                    .await?;
                Ok(DerivedMetadata::Video {
                    width,
                    height,
                    thumbnail,
                    thumbnail_info,
                })
            }
            MediaKind::Audio | MediaKind::Other => Ok(DerivedMetadata::Plain),
        }
    }

    /// Encrypts (if needed) and uploads a video thumbnail ahead of the
    /// video itself.
    async fn upload_thumbnail(
        &self,
        conversation: &ConversationId,
        job: JobId,
        data: Vec<u8>,
        encrypted: bool,
    ) -> Result<UploadedMedia, UploadError> {
        self.ensure_current(conversation, job).await?;
        if encrypted {
            let sealed = self.encryptor.encrypt(&data).await?;
            self.ensure_current(conversation, job).await?;
            let request = UploadRequest {
                payload: sealed.ciphertext,
                filename: None,
                mime_type: None,
            };
            let uri = self.transfer(conversation, job, request, false).await?;
            Ok(UploadedMedia::Encrypted(sealed.envelope.into_file(
                uri,
                Some(media::THUMBNAIL_MIME_TYPE.to_string()),
            )))
        } else {
            let request = UploadRequest {
                payload: data,
                filename: None,
                mime_type: Some(media::THUMBNAIL_MIME_TYPE.to_string()),
            };
            let uri = self.transfer(conversation, job, request, false).await?;
            Ok(UploadedMedia::Plain(uri))
        }
    }

    /// Uploads one payload while relaying progress. The handle is recorded
    /// first so `cancel_attachment` can abort the transfer.
    async fn transfer(
        &self,
        conversation: &ConversationId,
        job: JobId,
        request: UploadRequest,
        report_progress: bool,
    ) -> Result<ContentUri, UploadError> {
        let handle = UploadHandle::new();
        if !self
            .composer
            .lock()
            .await
            .record_upload_handle(conversation, job, handle)
        {
            return Err(UploadError::Canceled);
        }
        debug!(conversation = %conversation, %handle, bytes = request.payload.len(), "upload: transfer started");

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let upload = self.protocol.upload_content(handle, request, progress_tx);
        tokio::pin!(upload);
        let result = loop {
            tokio::select! {
                result = &mut upload => break result,
                Some(progress) = progress_rx.recv() => {
                    if report_progress {
                        self.relay_progress(conversation, job, progress).await;
                    }
                }
            }
        };
        while let Ok(progress) = progress_rx.try_recv() {
            if report_progress {
                self.relay_progress(conversation, job, progress).await;
            }
        }
        self.composer
            .lock()
            .await
            .clear_upload_handle(conversation, job);

        let uri = result.map_err(classify_protocol_error)?;
        self.ensure_current(conversation, job).await?;
        Ok(uri)
    }

    async fn relay_progress(
        &self,
        conversation: &ConversationId,
        job: JobId,
        progress: UploadProgress,
    ) {
        if self
            .composer
            .lock()
            .await
            .record_progress(conversation, job, progress)
        {
            self.emit(EngineEvent::UploadProgress {
                conversation: conversation.clone(),
                loaded: progress.loaded,
                total: progress.total,
            });
        }
    }

    async fn enter_state(
        &self,
        conversation: &ConversationId,
        job: JobId,
        tracker: &mut UploadJob,
        state: UploadState,
    ) -> Result<(), UploadError> {
        self.ensure_current(conversation, job).await?;
        tracker.advance(state)?;
        self.composer
            .lock()
            .await
            .set_job_state(conversation, job, state);
        debug!(conversation = %conversation, ?state, "upload: state changed");
        Ok(())
    }

    /// A job stops being current once its attachment is canceled or
    /// replaced.
    async fn ensure_current(
        &self,
        conversation: &ConversationId,
        job: JobId,
    ) -> Result<(), UploadError> {
        if self.composer.lock().await.is_current_job(conversation, job) {
            Ok(())
        } else {
            Err(UploadError::Canceled)
        }
    }
}

fn build_content(
    file: &AttachmentFile,
    kind: MediaKind,
    uploaded: UploadedMedia,
    metadata: DerivedMetadata,
) -> MessageContent {
    let body = file
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| fallback_body(kind).to_string());
    let mimetype = Some(file.mime_type().to_string());
    let size = Some(file.size());
    let source = uploaded.into_source();

    match (kind, metadata) {
        (_, DerivedMetadata::Image { dimensions }) => MessageContent::Image(ImageContent {
            body,
            source,
            info: ImageInfo {
                mimetype,
                size,
                w: dimensions.map(|(w, _)| w),
                h: dimensions.map(|(_, h)| h),
            },
        }),
        (
            _,
            DerivedMetadata::Video {
                width,
                height,
                thumbnail,
                thumbnail_info,
            },
        ) => {
            let (thumbnail_url, thumbnail_file) = match thumbnail {
                UploadedMedia::Plain(url) => (Some(url), None),
                UploadedMedia::Encrypted(file) => (None, Some(file)),
            };
            MessageContent::Video(VideoContent {
                body,
                source,
                info: VideoInfo {
                    mimetype,
                    size,
                    w: Some(width),
                    h: Some(height),
                    thumbnail_url,
                    thumbnail_file,
                    thumbnail_info: Some(thumbnail_info),
                },
            })
        }
        (MediaKind::Audio, DerivedMetadata::Plain) => MessageContent::Audio(FileContent {
            body,
            source,
            info: FileInfo { mimetype, size },
        }),
        (_, DerivedMetadata::Plain) => MessageContent::File(FileContent {
            body,
            source,
            info: FileInfo { mimetype, size },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_rejects_skipped_or_backward_transitions() {
        let mut job = UploadJob::new();
        assert!(job.advance(UploadState::Uploading).is_err());
        job.advance(UploadState::DerivingMetadata).expect("metadata");
        job.advance(UploadState::Uploading).expect("uploading");
        assert!(matches!(
            job.advance(UploadState::Encrypting),
            Err(UploadError::InvalidTransition { .. })
        ));
        job.advance(UploadState::Sent).expect("sent");
        assert!(job.advance(UploadState::Failed).is_err());
        assert_eq!(
            job.visited(),
            &[
                UploadState::DerivingMetadata,
                UploadState::Uploading,
                UploadState::Sent
            ]
        );
    }

    #[test]
    fn any_live_state_can_halt() {
        let mut job = UploadJob::new();
        job.advance(UploadState::DerivingMetadata).expect("metadata");
        job.advance(UploadState::Encrypting).expect("encrypting");
        job.advance(UploadState::Canceled).expect("canceled");
        assert!(job.state().is_terminal());
    }

    #[test]
    fn unnamed_files_get_kind_bodies() {
        let file = AttachmentFile::unnamed("audio/ogg", vec![1u8, 2, 3]);
        let content = build_content(
            &file,
            file.media_kind(),
            UploadedMedia::Plain(ContentUri::new("mxc://example.org/a")),
            DerivedMetadata::Plain,
        );
        let MessageContent::Audio(audio) = content else {
            panic!("expected audio content");
        };
        assert_eq!(audio.body, "Audio");
        assert_eq!(audio.info.size, Some(3));
    }

    #[test]
    fn cancellation_is_recognised_through_anyhow() {
        let err = anyhow::Error::new(ApiException::canceled("aborted"));
        assert!(classify_protocol_error(err).is_canceled());
        let err = anyhow::anyhow!("connection reset");
        assert!(matches!(
            classify_protocol_error(err),
            UploadError::Transport(_)
        ));
    }
}
