use std::sync::Arc;

use shared::{
    domain::{ConversationId, MessageId, UserId},
    protocol::{Message, NewMessage, PhotoResponse},
};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub mod config;
pub mod conversations;
pub mod error;
pub mod groups;
pub mod session;
pub mod status;
pub mod sync;
pub mod transport;

pub use config::{load_settings, load_settings_from, ClientSettings};
pub use conversations::ConversationDirectory;
pub use error::ClientError;
pub use groups::GroupDirectory;
pub use session::{CredentialStore, MemoryCredentialStore, SessionContext, SessionEvent};
pub use status::SyncStatus;
pub use sync::{MessageListSnapshot, MessageSynchronizer, PageCursor, SyncEvent, PAGE_SIZE};
pub use transport::{
    AccountGateway, ChatGateway, ConversationGateway, GatewayError, GroupGateway, HttpGateway,
    MessageGateway, PhotoUpload,
};

/// Session, directories and the message synchronizer wired to one gateway.
pub struct ChatClient {
    session: Arc<SessionContext>,
    accounts: Arc<dyn AccountGateway>,
    message_gateway: Arc<dyn MessageGateway>,
    conversations: ConversationDirectory,
    groups: GroupDirectory,
    messages: MessageSynchronizer,
}

impl ChatClient {
    /// Builds a client that talks HTTP to `settings.api_url` with an
    /// in-memory credential store.
    pub fn connect(settings: &ClientSettings) -> Result<Arc<Self>, ClientError> {
        let session = SessionContext::in_memory();
        let gateway = Arc::new(HttpGateway::new(settings, session.clone())?);
        info!(api_url = %gateway.base_url(), "client: http gateway ready");
        Ok(Self::with_gateway(gateway, session, settings.event_buffer))
    }

    pub fn with_gateway<G>(
        gateway: Arc<G>,
        session: Arc<SessionContext>,
        event_buffer: usize,
    ) -> Arc<Self>
    where
        G: ChatGateway + 'static,
    {
        Arc::new(Self {
            session,
            accounts: gateway.clone(),
            message_gateway: gateway.clone(),
            conversations: ConversationDirectory::new(gateway.clone()),
            groups: GroupDirectory::new(gateway.clone()),
            messages: MessageSynchronizer::new(gateway, event_buffer),
        })
    }

    /// Opens a session for `name`. The returned identifier doubles as the
    /// bearer token.
    pub async fn login(&self, name: &str) -> Result<UserId, ClientError> {
        let response = self.accounts.login(name).await?;
        let user_id = response.identifier;
        self.session
            .establish(user_id.clone(), user_id.as_str().to_string());
        Ok(user_id)
    }

    pub async fn logout(&self) {
        self.close_conversation().await;
        self.session.logout();
    }

    /// Makes `conversation_id` the active conversation and loads its newest
    /// page. Switching away from another conversation drops its messages
    /// before anything is fetched.
    pub async fn open_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        if self.messages.conversation_id().await.as_ref() != Some(conversation_id) {
            self.messages.clear().await;
        }
        if self.conversations.select(conversation_id).await.is_none() {
            self.conversations.fetch_conversation(conversation_id).await?;
        }
        debug!(conversation_id = %conversation_id, "client: conversation opened");
        self.messages.load(conversation_id, true).await
    }

    pub async fn load_older(&self) -> Result<Vec<Message>, ClientError> {
        let conversation_id = self.active_conversation().await?;
        self.messages.load_more(&conversation_id).await
    }

    /// Sends a text message to the active conversation, showing it
    /// optimistically until the server confirms.
    pub async fn send_text(&self, content: &str) -> Result<Message, ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        let conversation_id = self.active_conversation().await?;
        let payload = NewMessage::text(conversation_id.clone(), content);
        let message = self
            .messages
            .send_optimistic(payload, self.session.user_id())
            .await?;
        self.conversations
            .add_message_to_conversation(&conversation_id, message.clone())
            .await;
        Ok(message)
    }

    pub async fn close_conversation(&self) {
        self.messages.clear().await;
        self.conversations.deselect().await;
    }

    pub async fn forward_message(
        &self,
        message_id: &MessageId,
        target: &ConversationId,
    ) -> Result<(), ClientError> {
        self.message_gateway
            .forward_message(message_id, target)
            .await?;
        info!(message_id = %message_id, target = %target, "client: message forwarded");
        Ok(())
    }

    /// Leaves the caller's comment (an emoji) on a message.
    pub async fn comment_message(
        &self,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), ClientError> {
        self.message_gateway.add_comment(message_id, emoji).await?;
        Ok(())
    }

    pub async fn uncomment_message(&self, message_id: &MessageId) -> Result<(), ClientError> {
        self.message_gateway.remove_comment(message_id).await?;
        Ok(())
    }

    pub async fn upload_photo(&self, photo: PhotoUpload) -> Result<PhotoResponse, ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        let response = self.accounts.upload_photo(photo).await?;
        info!(photo = %response.photo, "client: profile photo updated");
        Ok(response)
    }

    pub async fn set_username(&self, name: &str) -> Result<(), ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        self.accounts.update_username(name).await?;
        Ok(())
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn messages(&self) -> &MessageSynchronizer {
        &self.messages
    }

    pub fn conversations(&self) -> &ConversationDirectory {
        &self.conversations
    }

    pub fn groups(&self) -> &GroupDirectory {
        &self.groups
    }

    async fn active_conversation(&self) -> Result<ConversationId, ClientError> {
        self.conversations
            .current_id()
            .await
            .ok_or(ClientError::NoActiveConversation)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
