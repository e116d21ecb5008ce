use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ContentUri, ConversationId, EventId, UploadHandle, UserId},
    protocol::{ConversationEvent, ConversationSummary, HistoryPage, MessageContent},
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

pub mod composer;
pub mod config;
pub mod error;
pub mod pagination;
pub mod read_receipt;
pub mod timeline;
pub mod upload;

use composer::{AttachmentFile, CompositionStore, JobId};
use config::EngineSettings;
use error::EngineError;
use pagination::{PaginationController, PaginationOutcome};
use read_receipt::{receipt_target, ViewportState};
use timeline::{
    build_display_items, AggregationInput, DisplayItem, IdentityResolver, LocalpartResolver,
    Timeline,
};
use upload::{
    AttachmentEncryptor, ChaChaAttachmentEncryptor, ImageCrateDecoder, MediaDecoder,
    UploadOutcome, UploadProgress, UploadRequest, UploadState,
};

/// The protocol client the engine drives: history, membership/read state,
/// content store and message sending.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    fn local_user(&self) -> UserId;
    async fn conversation_summary(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationSummary>;
    /// Fetches the page of history preceding `from` (or the newest page
    /// when `from` is `None`).
    async fn load_older(
        &self,
        conversation: &ConversationId,
        from: Option<&str>,
    ) -> Result<HistoryPage>;
    async fn has_unread(&self, conversation: &ConversationId) -> bool;
    async fn send_read_receipt(&self, conversation: &ConversationId, event: &EventId)
        -> Result<()>;
    async fn is_encrypted(&self, conversation: &ConversationId) -> bool;
    async fn send_message(
        &self,
        conversation: &ConversationId,
        content: MessageContent,
    ) -> Result<EventId>;
    /// Uploads to the content store. A canceled transfer fails with an
    /// `ApiException` carrying `ErrorCode::Canceled`.
    async fn upload_content(
        &self,
        handle: UploadHandle,
        request: UploadRequest,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<ContentUri>;
    /// Returns whether a transfer with that handle was still running.
    async fn cancel_upload(&self, handle: UploadHandle) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    TimelineChanged {
        conversation: ConversationId,
    },
    PaginationResult {
        conversation: ConversationId,
        has_more: bool,
        /// First event before the prepend; the viewport keeps it in place.
        anchor: Option<EventId>,
    },
    AttachmentCanceled {
        conversation: ConversationId,
    },
    UploadProgress {
        conversation: ConversationId,
        loaded: u64,
        total: u64,
    },
    FileUploaded {
        conversation: ConversationId,
    },
    FileUploadCanceled {
        conversation: ConversationId,
    },
    MessageSent {
        conversation: ConversationId,
    },
}

/// What a call to [`ChatEngine::send`] did.
#[derive(Debug, Default)]
pub struct SendReport {
    pub upload: Option<UploadOutcome>,
    pub text_sent: bool,
    pub message_sent: bool,
}

struct ConversationState {
    summary: ConversationSummary,
    timeline: Timeline,
    pagination: PaginationController,
    viewport: ViewportState,
}

pub struct ChatEngine {
    protocol: Arc<dyn ProtocolClient>,
    identity: Arc<dyn IdentityResolver>,
    decoder: Arc<dyn MediaDecoder>,
    encryptor: Arc<dyn AttachmentEncryptor>,
    settings: EngineSettings,
    local_user: UserId,
    conversations: Mutex<HashMap<ConversationId, ConversationState>>,
    composer: Mutex<CompositionStore>,
    events: broadcast::Sender<EngineEvent>,
}

impl ChatEngine {
    pub fn new(protocol: Arc<dyn ProtocolClient>, settings: EngineSettings) -> Arc<Self> {
        Self::new_with_dependencies(
            protocol,
            Arc::new(LocalpartResolver),
            Arc::new(ImageCrateDecoder),
            Arc::new(ChaChaAttachmentEncryptor),
            settings,
        )
    }

    pub fn new_with_dependencies(
        protocol: Arc<dyn ProtocolClient>,
        identity: Arc<dyn IdentityResolver>,
        decoder: Arc<dyn MediaDecoder>,
        encryptor: Arc<dyn AttachmentEncryptor>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_channel_capacity.max(1));
        let local_user = protocol.local_user();
        Arc::new(Self {
            protocol,
            identity,
            decoder,
            encryptor,
            settings,
            local_user,
            conversations: Mutex::new(HashMap::new()),
            composer: Mutex::new(CompositionStore::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Starts tracking a conversation, or refreshes its profile if already
    /// open. The viewport state is reset either way.
    pub async fn open_conversation(&self, conversation: &ConversationId) -> Result<()> {
        let summary = self.protocol.conversation_summary(conversation).await?;
        {
            let mut conversations = self.conversations.lock().await;
            match conversations.get_mut(conversation) {
                Some(state) => {
                    state.summary = summary;
                    state.viewport = ViewportState::default();
                }
                None => {
                    conversations.insert(
                        conversation.clone(),
                        ConversationState {
                            summary,
                            timeline: Timeline::new(),
                            pagination: PaginationController::new(),
                            viewport: ViewportState::default(),
                        },
                    );
                }
            }
        }
        info!(conversation = %conversation, "engine: conversation opened");
        self.emit(EngineEvent::TimelineChanged {
            conversation: conversation.clone(),
        });
        Ok(())
    }

    pub async fn ingest_live_event(
        &self,
        conversation: &ConversationId,
        event: ConversationEvent,
    ) -> Result<(), EngineError> {
        {
            let mut conversations = self.conversations.lock().await;
            let state = conversations
                .get_mut(conversation)
                .ok_or_else(|| EngineError::UnknownConversation(conversation.clone()))?;
            if let Err(err) = state.timeline.append_live(event) {
                debug!(conversation = %conversation, error = %err, "engine: ignoring live event");
                return Ok(());
            }
        }
        self.emit(EngineEvent::TimelineChanged {
            conversation: conversation.clone(),
        });
        self.acknowledge_latest(conversation).await;
        Ok(())
    }

    pub async fn display_items(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<DisplayItem>, EngineError> {
        let conversations = self.conversations.lock().await;
        let state = conversations
            .get(conversation)
            .ok_or_else(|| EngineError::UnknownConversation(conversation.clone()))?;
        Ok(build_display_items(&AggregationInput {
            timeline: &state.timeline,
            reached_start: state.pagination.reached_start(),
            profile: &state.summary,
            identity: self.identity.as_ref(),
            local_user: &self.local_user,
            settings: &self.settings,
        }))
    }

    pub fn media_url(&self, uri: &ContentUri) -> Option<Url> {
        uri.http_url(&self.settings.media_base_url()?)
    }

    pub async fn set_message(&self, conversation: &ConversationId, text: impl Into<String>) {
        self.composer.lock().await.set_message(conversation, text);
    }

    pub async fn message(&self, conversation: &ConversationId) -> String {
        self.composer.lock().await.message(conversation).to_string()
    }

    pub async fn set_attachment(&self, conversation: &ConversationId, file: AttachmentFile) -> JobId {
        let job = self.composer.lock().await.set_attachment(conversation, file);
        debug!(conversation = %conversation, "composer: attachment set");
        job
    }

    pub async fn has_attachment(&self, conversation: &ConversationId) -> bool {
        self.composer.lock().await.has_attachment(conversation)
    }

    pub async fn attachment_state(&self, conversation: &ConversationId) -> Option<UploadState> {
        self.composer
            .lock()
            .await
            .attachment(conversation)
            .map(|attachment| attachment.state)
    }

    pub async fn is_sending(&self, conversation: &ConversationId) -> bool {
        self.composer.lock().await.is_sending(conversation)
    }

    /// Removes the pending attachment, aborting its transfer if one is in
    /// flight. A pipeline that has not reached the transfer yet notices at
    /// its next step.
    pub async fn cancel_attachment(&self, conversation: &ConversationId) {
        let canceled = self.composer.lock().await.cancel_attachment(conversation);
        if let Some(handle) = canceled.in_flight {
            let aborted = self.protocol.cancel_upload(handle).await;
            info!(conversation = %conversation, %handle, aborted, "composer: canceled in-flight upload");
        }
        self.emit(EngineEvent::AttachmentCanceled {
            conversation: conversation.clone(),
        });
    }

    /// Sends the attachment (if any) and then the draft text. A second call
    /// while a send is running does nothing.
    pub async fn send(&self, conversation: &ConversationId) -> SendReport {
        let snapshot = {
            let mut composer = self.composer.lock().await;
            if composer.is_sending(conversation) {
                debug!(conversation = %conversation, "composer: send already in progress");
                return SendReport::default();
            }
            composer.begin_send(conversation)
        };
        let Some(snapshot) = snapshot else {
            return SendReport::default();
        };

        let mut report = SendReport::default();
        if let Some((job, file)) = snapshot.attachment {
            let encrypted = self.protocol.is_encrypted(conversation).await;
            report.upload = Some(self.run_upload(conversation, job, file, encrypted).await);
        }

        let message = self.message(conversation).await;
        if !message.trim().is_empty() {
            match self
                .protocol
                .send_message(conversation, MessageContent::text(message))
                .await
            {
                Ok(event_id) => {
                    info!(conversation = %conversation, event = %event_id, "composer: text sent");
                    report.text_sent = true;
                }
                Err(err) => {
                    warn!(conversation = %conversation, error = %err, "composer: text send failed, keeping draft");
                    self.composer.lock().await.abort_send(conversation);
                    return report;
                }
            }
        }

        report.message_sent = self.composer.lock().await.finish_send(conversation);
        if report.message_sent {
            self.emit(EngineEvent::MessageSent {
                conversation: conversation.clone(),
            });
        }
        report
    }

    /// Loads older history, repeating while the viewport cannot scroll yet
    /// and the start has not been reached.
    pub async fn request_older(
        &self,
        conversation: &ConversationId,
    ) -> Result<PaginationOutcome, EngineError> {
        let mut pages = 0;
        let mut has_more = true;
        let mut first_anchor = None;
        loop {
            let request = {
                let mut conversations = self.conversations.lock().await;
                let state = conversations
                    .get_mut(conversation)
                    .ok_or_else(|| EngineError::UnknownConversation(conversation.clone()))?;
                state.pagination.begin()
            };
            let Some(request) = request else {
                if pages == 0 {
                    debug!(conversation = %conversation, "pagination: request dropped");
                    return Ok(PaginationOutcome::Skipped);
                }
                break;
            };

            debug!(conversation = %conversation, from = ?request.from, "pagination: requesting older page");
            let page = match self
                .protocol
                .load_older(conversation, request.from.as_deref())
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(conversation = %conversation, error = %err, "pagination: fetch failed");
                    if let Some(state) = self.conversations.lock().await.get_mut(conversation) {
                        state.pagination.fail();
                    }
                    if pages == 0 {
                        return Ok(PaginationOutcome::Failed);
                    }
                    break;
                }
            };

            let (anchor, scrollable) = {
                let mut conversations = self.conversations.lock().await;
                let state = conversations
                    .get_mut(conversation)
                    .ok_or_else(|| EngineError::UnknownConversation(conversation.clone()))?;
                let anchor = state.timeline.first_event().map(|event| event.id.clone());
                let added = state.timeline.prepend_history(page.events);
                has_more = state.pagination.complete(page.next_token);
                info!(conversation = %conversation, added, has_more, "pagination: page loaded");
                (anchor, state.viewport.scrollable)
            };
            if pages == 0 {
                first_anchor = anchor.clone();
            }
            pages += 1;

            self.emit(EngineEvent::TimelineChanged {
                conversation: conversation.clone(),
            });
            self.emit(EngineEvent::PaginationResult {
                conversation: conversation.clone(),
                has_more,
                anchor,
            });
            if !has_more || scrollable {
                break;
            }
        }
        self.acknowledge_latest(conversation).await;
        Ok(PaginationOutcome::Loaded {
            pages,
            has_more,
            anchor: first_anchor,
        })
    }

    pub async fn report_viewport_top_reached(
        &self,
        conversation: &ConversationId,
    ) -> Result<PaginationOutcome, EngineError> {
        self.request_older(conversation).await
    }

    pub async fn report_viewport_scrollable(
        &self,
        conversation: &ConversationId,
        scrollable: bool,
    ) -> Result<(), EngineError> {
        let mut conversations = self.conversations.lock().await;
        let state = conversations
            .get_mut(conversation)
            .ok_or_else(|| EngineError::UnknownConversation(conversation.clone()))?;
        state.viewport.scrollable = scrollable;
        Ok(())
    }

    pub async fn report_viewport_bottom(
        &self,
        conversation: &ConversationId,
        at_bottom: bool,
    ) -> Result<(), EngineError> {
        let reached_bottom = {
            let mut conversations = self.conversations.lock().await;
            let state = conversations
                .get_mut(conversation)
                .ok_or_else(|| EngineError::UnknownConversation(conversation.clone()))?;
            let was_at_bottom = state.viewport.at_bottom;
            state.viewport.at_bottom = at_bottom;
            at_bottom && !was_at_bottom
        };
        if reached_bottom {
            self.acknowledge_latest(conversation).await;
        }
        Ok(())
    }

    async fn acknowledge_latest(&self, conversation: &ConversationId) {
        let at_bottom = match self.conversations.lock().await.get(conversation) {
            Some(state) => state.viewport.at_bottom,
            None => return,
        };
        if !at_bottom {
            return;
        }
        let has_unread = self.protocol.has_unread(conversation).await;
        let target = {
            let conversations = self.conversations.lock().await;
            let Some(state) = conversations.get(conversation) else {
                return;
            };
            receipt_target(state.viewport, has_unread, &state.timeline)
        };
        let Some(event) = target else {
            return;
        };
        match self.protocol.send_read_receipt(conversation, &event).await {
            Ok(()) => info!(conversation = %conversation, event = %event, "receipt: acknowledged"),
            Err(err) => warn!(conversation = %conversation, error = %err, "receipt: failed to send"),
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
