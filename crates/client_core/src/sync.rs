//! Message synchronization for the open conversation.
//!
//! [`MessageSynchronizer`] owns the working message list and its page cursor.
//! History is fetched backwards in pages of [`PAGE_SIZE`]; local inserts go to
//! the head, fetched older pages and confirmed sends go to the tail, and
//! edits, deletions and reaction changes replace entries in place by id.
//!
//! Two guards keep concurrent callers honest:
//! * page-advancing loads run one at a time (`page_flight`), so overlapping
//!   `load_more` calls fetch consecutive pages instead of the same one twice;
//! * every clear or reset bumps an epoch, and a page issued under an older
//!   epoch is dropped instead of being merged into a restarted list.
//!
//! Edits, deletions and sends are keyed to the attached conversation instead
//! (`generation`), which only changes on attach and clear. A cursor reset
//! keeps the list, so it does not discard them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, MessageId, ReactionId, UserId},
    protocol::{Message, NewMessage, PageQuery},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    status::{StatusTracker, SyncStatus},
    transport::{GatewayError, MessageGateway},
};

pub const PAGE_SIZE: u32 = 20;

const FETCH_FALLBACK: &str = "Failed to fetch messages";
const SEND_FALLBACK: &str = "Failed to send message";
const UPDATE_FALLBACK: &str = "Failed to update message";
const DELETE_FALLBACK: &str = "Failed to delete message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub has_more: bool,
    pub oldest_timestamp: Option<DateTime<Utc>>,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            page: 1,
            has_more: true,
            oldest_timestamp: None,
        }
    }
}

impl PageCursor {
    fn query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: PAGE_SIZE,
            before: self.oldest_timestamp,
        }
    }

    fn advance(&mut self, page: &[Message]) {
        self.page += 1;
        self.has_more = page.len() == PAGE_SIZE as usize;
        // A record without either timestamp keeps the previous boundary rather
        // than dropping back to "newest".
        if let Some(oldest) = page.last().and_then(Message::cursor_timestamp) {
            self.oldest_timestamp = Some(oldest);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    PageLoaded {
        conversation_id: ConversationId,
        count: usize,
        has_more: bool,
    },
    MessageInserted {
        message_id: MessageId,
        index: usize,
    },
    MessageReplaced {
        message_id: MessageId,
        index: usize,
    },
    MessageRemoved {
        message_id: MessageId,
    },
    Cleared,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageListSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub messages: Vec<Message>,
    pub cursor: PageCursor,
    pub status: SyncStatus,
}

#[derive(Default)]
struct SyncState {
    conversation_id: Option<ConversationId>,
    messages: Vec<Message>,
    cursor: PageCursor,
    epoch: u64,
    generation: u64,
}

impl SyncState {
    fn attach(&mut self, conversation_id: ConversationId) {
        self.messages.clear();
        self.cursor = PageCursor::default();
        self.conversation_id = Some(conversation_id);
        self.epoch += 1;
        self.generation += 1;
    }

    fn detach(&mut self) {
        self.messages.clear();
        self.cursor = PageCursor::default();
        self.conversation_id = None;
        self.epoch += 1;
        self.generation += 1;
    }

    fn position(&self, message_id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == message_id)
    }

    fn replace(&mut self, message_id: &MessageId, message: Message) -> Option<usize> {
        let index = self.position(message_id)?;
        self.messages[index] = message;
        Some(index)
    }

    fn holds(&self, conversation_id: &ConversationId) -> bool {
        self.conversation_id.as_ref() == Some(conversation_id)
    }
}

pub struct MessageSynchronizer {
    gateway: Arc<dyn MessageGateway>,
    inner: Mutex<SyncState>,
    page_flight: Mutex<()>,
    status: StatusTracker,
    events: broadcast::Sender<SyncEvent>,
}

impl MessageSynchronizer {
    pub fn new(gateway: Arc<dyn MessageGateway>, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            gateway,
            inner: Mutex::new(SyncState::default()),
            page_flight: Mutex::new(()),
            status: StatusTracker::default(),
            events,
        }
    }

    /// Loads one page of `conversation_id`'s history.
    ///
    /// With `reset`, the list and cursor are cleared before anything else, so
    /// a failed fetch still leaves no data from the previous conversation.
    /// A continuation for a conversation other than the attached one is
    /// treated as a reset. A reset always fetches the newest page, even when
    /// it queued behind other loads. A continuation past the end of history
    /// returns an empty page without touching the network.
    ///
    /// Returns the page as received, or an empty vector when the page was
    /// skipped or superseded by a clear/reset while in flight.
    pub async fn load(
        &self,
        conversation_id: &ConversationId,
        reset: bool,
    ) -> Result<Vec<Message>, ClientError> {
        let attached_epoch = {
            let mut state = self.inner.lock().await;
            let switching = !state.holds(conversation_id);
            if reset || switching {
                if !reset {
                    debug!(
                        conversation_id = %conversation_id,
                        "sync: continuation for a detached conversation; resetting"
                    );
                }
                state.attach(conversation_id.clone());
                Some(state.epoch)
            } else {
                None
            }
        };
        let reset = attached_epoch.is_some();
        if reset {
            let _ = self.events.send(SyncEvent::Cleared);
        }

        let _flight = self.page_flight.lock().await;

        let (epoch, query, reattached) = {
            let mut state = self.inner.lock().await;
            if !state.holds(conversation_id) {
                debug!(
                    conversation_id = %conversation_id,
                    "sync: conversation switched before page load started; skipping"
                );
                return Ok(Vec::new());
            }
            match attached_epoch {
                Some(attached) => {
                    // Another reset or clear ran while this one waited for the
                    // flight lock; start over from the newest page again.
                    let reattached = state.epoch != attached;
                    if reattached {
                        state.attach(conversation_id.clone());
                    }
                    (state.epoch, PageCursor::default().query(), reattached)
                }
                None if !state.cursor.has_more => {
                    debug!(conversation_id = %conversation_id, "sync: history exhausted");
                    return Ok(Vec::new());
                }
                None => (state.epoch, state.cursor.query(), false),
            }
        };
        if reattached {
            let _ = self.events.send(SyncEvent::Cleared);
        }

        let _in_flight = self.status.begin();
        debug!(
            conversation_id = %conversation_id,
            page = query.page,
            before = ?query.before,
            "sync: fetching page"
        );
        let page = match self.gateway.fetch_page(conversation_id, &query).await {
            Ok(page) => page.into_messages(),
            Err(err) => {
                let current = self.inner.lock().await.epoch == epoch;
                return Err(self.record_failure(current, err, FETCH_FALLBACK));
            }
        };

        let mut state = self.inner.lock().await;
        if state.epoch != epoch || !state.holds(conversation_id) {
            info!(
                conversation_id = %conversation_id,
                page = query.page,
                "sync: discarding page issued before a reset"
            );
            return Ok(Vec::new());
        }

        if reset {
            state.messages.clear();
            state.cursor = PageCursor::default();
        }
        for message in &page {
            if state.position(&message.id).is_none() {
                state.messages.push(message.clone());
            }
        }
        state.cursor.advance(&page);

        info!(
            conversation_id = %conversation_id,
            page = query.page,
            count = page.len(),
            has_more = state.cursor.has_more,
            "sync: page loaded"
        );
        let _ = self.events.send(SyncEvent::PageLoaded {
            conversation_id: conversation_id.clone(),
            count: page.len(),
            has_more: state.cursor.has_more,
        });
        Ok(page)
    }

    pub async fn load_more(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        self.load(conversation_id, false).await
    }

    /// Creates `payload` on the server and appends the canonical message.
    /// Nothing is inserted when the call fails.
    pub async fn send(&self, payload: NewMessage) -> Result<Message, ClientError> {
        let generation = self.generation().await;
        let _in_flight = self.status.begin();

        let message = match self.gateway.create_message(&payload).await {
            Ok(message) => message,
            Err(err) => {
                let current = self.generation().await == generation;
                return Err(self.record_failure(current, err, SEND_FALLBACK));
            }
        };

        let mut state = self.inner.lock().await;
        if state.generation != generation || !state.holds(&payload.conversation_id) {
            debug!(
                message_id = %message.id,
                "sync: sent message belongs to a conversation no longer open"
            );
            return Ok(message);
        }

        // A push delivered through add_local may already hold the canonical id.
        let (index, event) = match state.replace(&message.id, message.clone()) {
            Some(index) => (
                index,
                SyncEvent::MessageReplaced {
                    message_id: message.id.clone(),
                    index,
                },
            ),
            None => {
                state.messages.push(message.clone());
                let index = state.messages.len() - 1;
                (
                    index,
                    SyncEvent::MessageInserted {
                        message_id: message.id.clone(),
                        index,
                    },
                )
            }
        };
        debug!(message_id = %message.id, index, "sync: message sent");
        let _ = self.events.send(event);
        Ok(message)
    }

    /// Inserts an optimistic entry at the head, sends `payload`, then promotes
    /// the entry in place to the canonical message. The entry is withdrawn if
    /// the server rejects the send.
    pub async fn send_optimistic(
        &self,
        payload: NewMessage,
        author: Option<UserId>,
    ) -> Result<Message, ClientError> {
        let placeholder = Message::optimistic(&payload, author);
        let local_id = placeholder.id.clone();
        self.add_local(placeholder).await;

        let _in_flight = self.status.begin();
        let result = self.gateway.create_message(&payload).await;

        let mut state = self.inner.lock().await;
        match result {
            Ok(message) => {
                if let Some(index) = state.replace(&local_id, message.clone()) {
                    debug!(
                        local_id = %local_id,
                        message_id = %message.id,
                        index,
                        "sync: optimistic message confirmed"
                    );
                    let _ = self.events.send(SyncEvent::MessageReplaced {
                        message_id: message.id.clone(),
                        index,
                    });
                }
                Ok(message)
            }
            Err(err) => {
                if let Some(index) = state.position(&local_id) {
                    state.messages.remove(index);
                    let _ = self.events.send(SyncEvent::MessageRemoved {
                        message_id: local_id,
                    });
                }
                drop(state);
                let message = err.failure_message().unwrap_or(SEND_FALLBACK).to_string();
                warn!("sync: optimistic send rejected: {message}");
                self.status.fail(message.clone());
                let _ = self.events.send(SyncEvent::Failed { message });
                Err(err.into())
            }
        }
    }

    /// Inserts `message` at the head without contacting the server. No
    /// duplicate check is made.
    pub async fn add_local(&self, message: Message) {
        let message_id = message.id.clone();
        self.inner.lock().await.messages.insert(0, message);
        let _ = self.events.send(SyncEvent::MessageInserted {
            message_id,
            index: 0,
        });
    }

    /// Edits a message. If it is no longer in the list the call still
    /// succeeds and the list is left alone.
    pub async fn update(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> Result<Message, ClientError> {
        let generation = self.generation().await;
        let _in_flight = self.status.begin();

        match self.gateway.update_message(message_id, content).await {
            Ok(message) => {
                self.replace_current(generation, message_id, message.clone())
                    .await;
                Ok(message)
            }
            Err(err) => {
                let current = self.generation().await == generation;
                Err(self.record_failure(current, err, UPDATE_FALLBACK))
            }
        }
    }

    pub async fn delete(&self, message_id: &MessageId) -> Result<(), ClientError> {
        let generation = self.generation().await;
        let _in_flight = self.status.begin();

        if let Err(err) = self.gateway.delete_message(message_id).await {
            let current = self.generation().await == generation;
            return Err(self.record_failure(current, err, DELETE_FALLBACK));
        }

        let mut state = self.inner.lock().await;
        if state.generation != generation {
            return Ok(());
        }
        if let Some(index) = state.position(message_id) {
            state.messages.remove(index);
            debug!(message_id = %message_id, index, "sync: message removed");
            let _ = self.events.send(SyncEvent::MessageRemoved {
                message_id: message_id.clone(),
            });
        }
        Ok(())
    }

    /// Reaction calls do not drive the loading state; failures are logged and
    /// returned without touching the list.
    pub async fn add_reaction(
        &self,
        message_id: &MessageId,
        reaction: &str,
    ) -> Result<Message, ClientError> {
        let generation = self.generation().await;
        match self.gateway.add_reaction(message_id, reaction).await {
            Ok(message) => {
                self.replace_current(generation, message_id, message.clone())
                    .await;
                Ok(message)
            }
            Err(err) => {
                warn!(message_id = %message_id, "sync: failed to add reaction: {err}");
                Err(err.into())
            }
        }
    }

    pub async fn remove_reaction(
        &self,
        message_id: &MessageId,
        reaction_id: &ReactionId,
    ) -> Result<Message, ClientError> {
        let generation = self.generation().await;
        match self.gateway.remove_reaction(message_id, reaction_id).await {
            Ok(message) => {
                self.replace_current(generation, message_id, message.clone())
                    .await;
                Ok(message)
            }
            Err(err) => {
                warn!(
                    message_id = %message_id,
                    reaction_id = %reaction_id,
                    "sync: failed to remove reaction: {err}"
                );
                Err(err.into())
            }
        }
    }

    /// Restores the page cursor. The list is kept; pages in flight are
    /// invalidated but edits and deletions in flight still apply.
    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.cursor = PageCursor::default();
        state.epoch += 1;
    }

    /// Empties the list, resets the cursor and detaches the conversation.
    pub async fn clear(&self) {
        self.inner.lock().await.detach();
        let _ = self.events.send(SyncEvent::Cleared);
    }

    pub async fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.lock().await.conversation_id.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages.clone()
    }

    pub async fn cursor(&self) -> PageCursor {
        self.inner.lock().await.cursor.clone()
    }

    pub async fn snapshot(&self) -> MessageListSnapshot {
        let state = self.inner.lock().await;
        MessageListSnapshot {
            conversation_id: state.conversation_id.clone(),
            messages: state.messages.clone(),
            cursor: state.cursor.clone(),
            status: self.status.status(),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.status()
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.status.error()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    async fn replace_current(&self, generation: u64, message_id: &MessageId, message: Message) {
        let mut state = self.inner.lock().await;
        if state.generation != generation {
            return;
        }
        if let Some(index) = state.replace(message_id, message) {
            let _ = self.events.send(SyncEvent::MessageReplaced {
                message_id: message_id.clone(),
                index,
            });
        }
    }

    /// Records `err` in the status unless the request was superseded.
    fn record_failure(&self, current: bool, err: GatewayError, fallback: &str) -> ClientError {
        let message = err.failure_message().unwrap_or(fallback).to_string();
        if current {
            warn!("sync: {fallback}: {err}");
            self.status.fail(message.clone());
            let _ = self.events.send(SyncEvent::Failed { message });
        } else {
            debug!("sync: ignoring failure from a superseded request: {err}");
        }
        err.into()
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
