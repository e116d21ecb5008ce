use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use client_core::{
    upload::{UploadProgress, UploadRequest},
    ProtocolClient,
};
use serde::Deserialize;
use shared::{
    domain::{ContentUri, ConversationId, EventId, UploadHandle, UserId},
    error::{ApiException, ErrorCode},
    protocol::{ConversationEvent, ConversationSummary, HistoryPage, MessageContent},
};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

const CHUNK_SIZE: usize = 64 * 1024;

/// A conversation exported to JSON: profile, the viewing user and its
/// loaded history in chronological order.
#[derive(Debug, Deserialize)]
pub struct ConversationDump {
    pub summary: ConversationSummary,
    pub local_user: UserId,
    #[serde(default)]
    pub events: Vec<ConversationEvent>,
    /// Whether `events` reaches back to the start of the conversation.
    #[serde(default)]
    pub complete: bool,
}

/// Serves one conversation from memory and keeps uploads in a local
/// content store.
pub struct LocalProtocol {
    local_user: UserId,
    summary: ConversationSummary,
    history: Mutex<Option<HistoryPage>>,
    content: Mutex<HashMap<String, usize>>,
    canceled: Mutex<Vec<UploadHandle>>,
    sent: Mutex<Vec<MessageContent>>,
}

impl LocalProtocol {
    pub fn from_dump(dump: ConversationDump) -> Self {
        let next_token = (!dump.complete).then(|| "end-of-dump".to_string());
        Self {
            local_user: dump.local_user,
            summary: dump.summary,
            history: Mutex::new(Some(HistoryPage {
                events: dump.events,
                next_token,
            })),
            content: Mutex::new(HashMap::new()),
            canceled: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn empty(conversation: ConversationId, local_user: UserId, encrypted: bool) -> Self {
        Self::from_dump(ConversationDump {
            summary: ConversationSummary {
                name: conversation.to_string(),
                conversation_id: conversation,
                topic: None,
                avatar: None,
                encrypted,
            },
            local_user,
            events: Vec::new(),
            complete: true,
        })
    }

    pub async fn sent(&self) -> Vec<MessageContent> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ProtocolClient for LocalProtocol {
    fn local_user(&self) -> UserId {
        self.local_user.clone()
    }

    async fn conversation_summary(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationSummary> {
        if conversation != &self.summary.conversation_id {
            return Err(ApiException::new(
                ErrorCode::NotFound,
                format!("unknown conversation {conversation}"),
            )
            .into());
        }
        Ok(self.summary.clone())
    }

    async fn load_older(
        &self,
        _conversation: &ConversationId,
        _from: Option<&str>,
    ) -> Result<HistoryPage> {
        self.history
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("no older history in the dump"))
    }

    async fn has_unread(&self, _conversation: &ConversationId) -> bool {
        false
    }

    async fn send_read_receipt(
        &self,
        _conversation: &ConversationId,
        _event: &EventId,
    ) -> Result<()> {
        Ok(())
    }

    async fn is_encrypted(&self, _conversation: &ConversationId) -> bool {
        self.summary.encrypted
    }

    async fn send_message(
        &self,
        _conversation: &ConversationId,
        content: MessageContent,
    ) -> Result<EventId> {
        let mut sent = self.sent.lock().await;
        sent.push(content);
        Ok(EventId::new(format!("$local{}", sent.len())))
    }

    async fn upload_content(
        &self,
        handle: UploadHandle,
        request: UploadRequest,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<ContentUri> {
        let total = request.payload.len() as u64;
        let mut loaded = 0u64;
        for chunk in request.payload.chunks(CHUNK_SIZE) {
            if self.canceled.lock().await.contains(&handle) {
                return Err(ApiException::canceled("upload aborted").into());
            }
            loaded += chunk.len() as u64;
            if progress.send(UploadProgress { loaded, total }).is_err() {
                return Err(ApiException::canceled("upload abandoned by the engine").into());
            }
            tokio::task::yield_now().await;
        }
        let media_id = handle.to_string();
        self.content
            .lock()
            .await
            .insert(media_id.clone(), request.payload.len());
        info!(%handle, bytes = total, filename = ?request.filename, "local: stored upload");
        Ok(ContentUri::new(format!("mxc://localhost/{media_id}")))
    }

    async fn cancel_upload(&self, handle: UploadHandle) -> bool {
        self.canceled.lock().await.push(handle);
        !self.content.lock().await.contains_key(&handle.to_string())
    }
}
