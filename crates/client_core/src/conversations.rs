use std::sync::Arc;

use shared::{
    domain::ConversationId,
    protocol::{Conversation, CreateConversationRequest, Message, UpdateConversationRequest},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    error::ClientError,
    status::{StatusTracker, SyncStatus},
    transport::{ConversationGateway, GatewayError},
};

#[derive(Default)]
struct DirectoryState {
    conversations: Vec<Conversation>,
    current: Option<Conversation>,
}

/// Conversation list plus the conversation currently open.
pub struct ConversationDirectory {
    gateway: Arc<dyn ConversationGateway>,
    inner: Mutex<DirectoryState>,
    status: StatusTracker,
}

impl ConversationDirectory {
    pub fn new(gateway: Arc<dyn ConversationGateway>) -> Self {
        Self {
            gateway,
            inner: Mutex::new(DirectoryState::default()),
            status: StatusTracker::default(),
        }
    }

    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let _in_flight = self.status.begin();
        let conversations = self
            .gateway
            .list_conversations()
            .await
            .map_err(|err| self.fail(err, "Failed to fetch conversations"))?;
        debug!(count = conversations.len(), "conversations: list loaded");
        self.inner.lock().await.conversations = conversations.clone();
        Ok(conversations)
    }

    /// Fetches one conversation and makes it the current one.
    pub async fn fetch_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Conversation, ClientError> {
        let _in_flight = self.status.begin();
        let conversation = self
            .gateway
            .get_conversation(id)
            .await
            .map_err(|err| self.fail(err, "Failed to fetch conversation"))?;
        self.inner.lock().await.current = Some(conversation.clone());
        Ok(conversation)
    }

    pub async fn create(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, ClientError> {
        let _in_flight = self.status.begin();
        let conversation = self
            .gateway
            .create_conversation(request)
            .await
            .map_err(|err| self.fail(err, "Failed to create conversation"))?;
        self.inner
            .lock()
            .await
            .conversations
            .insert(0, conversation.clone());
        Ok(conversation)
    }

    pub async fn update(
        &self,
        id: &ConversationId,
        request: &UpdateConversationRequest,
    ) -> Result<Conversation, ClientError> {
        let _in_flight = self.status.begin();
        let updated = self
            .gateway
            .update_conversation(id, request)
            .await
            .map_err(|err| self.fail(err, "Failed to update conversation"))?;

        let mut state = self.inner.lock().await;
        if let Some(slot) = state.conversations.iter_mut().find(|c| c.id == updated.id) {
            *slot = updated.clone();
        }
        if state.current.as_ref().is_some_and(|c| c.id == updated.id) {
            state.current = Some(updated.clone());
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &ConversationId) -> Result<(), ClientError> {
        let _in_flight = self.status.begin();
        self.gateway
            .delete_conversation(id)
            .await
            .map_err(|err| self.fail(err, "Failed to delete conversation"))?;

        let mut state = self.inner.lock().await;
        state.conversations.retain(|c| &c.id != id);
        if state.current.as_ref().is_some_and(|c| &c.id == id) {
            state.current = None;
        }
        Ok(())
    }

    /// Prepends `message` to the cached conversation and records it as the
    /// last message. Unknown conversations are ignored.
    pub async fn add_message_to_conversation(&self, id: &ConversationId, message: Message) {
        let mut state = self.inner.lock().await;
        if let Some(conversation) = state.conversations.iter_mut().find(|c| &c.id == id) {
            conversation.messages.insert(0, message.clone());
            conversation.last_message = Some(message);
        }
    }

    /// Selects a conversation from the cached list without a network call.
    pub async fn select(&self, id: &ConversationId) -> Option<Conversation> {
        let mut state = self.inner.lock().await;
        let found = state.conversations.iter().find(|c| &c.id == id).cloned();
        if found.is_some() {
            state.current = found.clone();
        }
        found
    }

    pub async fn deselect(&self) {
        self.inner.lock().await.current = None;
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.lock().await.conversations.clone()
    }

    pub async fn current(&self) -> Option<Conversation> {
        self.inner.lock().await.current.clone()
    }

    pub async fn current_id(&self) -> Option<ConversationId> {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(|c| c.id.clone())
    }

    pub fn status(&self) -> SyncStatus {
        self.status.status()
    }

    fn fail(&self, err: GatewayError, fallback: &str) -> ClientError {
        warn!("conversations: {fallback}: {err}");
        self.status
            .fail(err.failure_message().unwrap_or(fallback).to_string());
        err.into()
    }
}

#[cfg(test)]
#[path = "tests/conversations_tests.rs"]
mod tests;
