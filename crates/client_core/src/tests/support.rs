//! In-process gateway fakes shared by the store tests.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{
        ConversationId, GroupId, GroupRole, MemberId, MessageId, ReactionId, UserId,
    },
    protocol::{
        AddMemberRequest, Conversation, CreateConversationRequest, Group, GroupMember,
        GroupRequest, LoginResponse, Message, MessagePage, NewMessage, PageQuery, PhotoResponse,
        Reaction, UpdateConversationRequest,
    },
};
use tokio::sync::{Mutex, Semaphore};

use crate::transport::{
    AccountGateway, ConversationGateway, GatewayError, GroupGateway, MessageGateway, PhotoUpload,
};

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .expect("valid base time")
}

pub(crate) fn message(id: &str) -> Message {
    Message {
        id: MessageId::from(id),
        conversation_id: None,
        author: None,
        content: String::new(),
        created_at: None,
        timestamp: None,
        edited_at: None,
        deleted_at: None,
        reactions: Vec::new(),
        reply_to: None,
        kind: Default::default(),
        status: Default::default(),
    }
}

/// Message `id` created `minutes` minutes before [`base_time`].
pub(crate) fn message_at(id: &str, minutes: i64) -> Message {
    let mut message = message(id);
    message.content = format!("content of {id}");
    message.created_at = Some(base_time() - chrono::Duration::minutes(minutes));
    message
}

/// `len` messages, newest first, with ids `{prefix}{start}..`.
pub(crate) fn page_of(prefix: &str, start: usize, len: usize) -> MessagePage {
    MessagePage::Bare(
        (start..start + len)
            .map(|n| message_at(&format!("{prefix}{n}"), n as i64))
            .collect(),
    )
}

pub(crate) fn conversation(id: &str, name: &str) -> Conversation {
    Conversation {
        id: ConversationId::from(id),
        name: name.to_string(),
        kind: Default::default(),
        photo: None,
        participants: Vec::new(),
        last_message: None,
        messages: Vec::new(),
    }
}

pub(crate) fn group(id: &str, name: &str) -> Group {
    Group {
        id: GroupId::from(id),
        name: name.to_string(),
        photo: None,
    }
}

pub(crate) fn server_error(status: u16, message: Option<&str>) -> GatewayError {
    GatewayError::Status {
        status,
        message: message.map(str::to_string),
    }
}

pub(crate) fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.to_string()).collect()
}

/// Scripted gateway. Queued results are consumed in order; an empty queue
/// falls back to a plausible success.
#[derive(Default)]
pub(crate) struct FakeGateway {
    pub gate: Option<Arc<Semaphore>>,
    pub mutation_gate: Option<Arc<Semaphore>>,
    pub pages: Mutex<VecDeque<Result<MessagePage, GatewayError>>>,
    pub fetches: Mutex<Vec<(ConversationId, PageQuery)>>,
    pub created: Mutex<Vec<NewMessage>>,
    pub create_results: Mutex<VecDeque<Result<Message, GatewayError>>>,
    pub mutation_results: Mutex<VecDeque<Result<Message, GatewayError>>>,
    pub delete_results: Mutex<VecDeque<Result<(), GatewayError>>>,
    pub calls: Mutex<Vec<String>>,
    pub forwarded: Mutex<Vec<(MessageId, ConversationId)>>,
    pub conversations: Mutex<Vec<Conversation>>,
    pub groups: Mutex<Vec<Group>>,
    pub members: Mutex<Vec<GroupMember>>,
    pub usernames: Mutex<Vec<String>>,
    pub photos: Mutex<Vec<PhotoUpload>>,
    pub fail_with: Mutex<Option<GatewayError>>,
}

impl FakeGateway {
    /// Page fetches block until a permit is added to `gate`.
    pub(crate) fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Edits and deletions block until a permit is added to `gate`.
    pub(crate) fn with_mutation_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            mutation_gate: Some(gate),
            ..Self::default()
        }
    }

    pub(crate) async fn push_page(&self, page: Result<MessagePage, GatewayError>) {
        self.pages.lock().await.push_back(page);
    }

    pub(crate) async fn fetched_pages(&self) -> Vec<u32> {
        self.fetches.lock().await.iter().map(|(_, q)| q.page).collect()
    }

    pub(crate) async fn wait_for_fetches(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.fetches.lock().await.len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("fetch was not issued in time");
    }

    pub(crate) async fn wait_for_calls(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls.lock().await.len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("call was not issued in time");
    }

    async fn pass_mutation_gate(&self) {
        if let Some(gate) = &self.mutation_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
    }

    pub(crate) async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: &str) -> Result<(), GatewayError> {
        self.calls.lock().await.push(call.to_string());
        match self.fail_with.lock().await.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MessageGateway for FakeGateway {
    async fn fetch_page(
        &self,
        conversation_id: &ConversationId,
        query: &PageQuery,
    ) -> Result<MessagePage, GatewayError> {
        self.fetches
            .lock()
            .await
            .push((conversation_id.clone(), query.clone()));
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.pages
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(MessagePage::Bare(Vec::new())))
    }

    async fn create_message(&self, payload: &NewMessage) -> Result<Message, GatewayError> {
        let mut created = self.created.lock().await;
        created.push(payload.clone());
        if let Some(result) = self.create_results.lock().await.pop_front() {
            return result;
        }
        let mut message = message(&format!("srv-{}", created.len()));
        message.conversation_id = Some(payload.conversation_id.clone());
        message.content = payload.content.clone();
        message.created_at = Some(base_time());
        Ok(message)
    }

    async fn update_message(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> Result<Message, GatewayError> {
        self.calls.lock().await.push(format!("update {message_id}"));
        self.pass_mutation_gate().await;
        if let Some(result) = self.mutation_results.lock().await.pop_front() {
            return result;
        }
        let mut message = message(message_id.as_str());
        message.content = content.to_string();
        message.edited_at = Some(base_time());
        Ok(message)
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), GatewayError> {
        self.calls.lock().await.push(format!("delete {message_id}"));
        self.pass_mutation_gate().await;
        self.delete_results
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn add_reaction(
        &self,
        message_id: &MessageId,
        reaction: &str,
    ) -> Result<Message, GatewayError> {
        self.calls.lock().await.push(format!("react {message_id}"));
        if let Some(result) = self.mutation_results.lock().await.pop_front() {
            return result;
        }
        let mut message = message(message_id.as_str());
        message.reactions.push(Reaction {
            id: ReactionId::from("r1"),
            author: UserId::from("me"),
            kind: reaction.to_string(),
        });
        Ok(message)
    }

    async fn remove_reaction(
        &self,
        message_id: &MessageId,
        reaction_id: &ReactionId,
    ) -> Result<Message, GatewayError> {
        self.calls
            .lock()
            .await
            .push(format!("unreact {message_id} {reaction_id}"));
        if let Some(result) = self.mutation_results.lock().await.pop_front() {
            return result;
        }
        Ok(message(message_id.as_str()))
    }

    async fn forward_message(
        &self,
        message_id: &MessageId,
        target: &ConversationId,
    ) -> Result<(), GatewayError> {
        self.record("forward").await?;
        self.forwarded
            .lock()
            .await
            .push((message_id.clone(), target.clone()));
        Ok(())
    }

    async fn add_comment(&self, message_id: &MessageId, emoji: &str) -> Result<(), GatewayError> {
        self.record(&format!("comment {message_id} {emoji}")).await
    }

    async fn remove_comment(&self, message_id: &MessageId) -> Result<(), GatewayError> {
        self.record(&format!("uncomment {message_id}")).await
    }
}

#[async_trait]
impl ConversationGateway for FakeGateway {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, GatewayError> {
        self.record("list_conversations").await?;
        Ok(self.conversations.lock().await.clone())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, GatewayError> {
        self.record("get_conversation").await?;
        self.conversations
            .lock()
            .await
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .ok_or_else(|| server_error(404, Some("conversation not found")))
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, GatewayError> {
        self.record("create_conversation").await?;
        let mut conversations = self.conversations.lock().await;
        let mut created = conversation(
            &format!("conv-{}", conversations.len() + 1),
            &request.name,
        );
        created.kind = request.kind;
        conversations.push(created.clone());
        Ok(created)
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        request: &UpdateConversationRequest,
    ) -> Result<Conversation, GatewayError> {
        self.record("update_conversation").await?;
        let mut conversations = self.conversations.lock().await;
        let existing = conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| server_error(404, Some("conversation not found")))?;
        if let Some(name) = &request.name {
            existing.name = name.clone();
        }
        if let Some(photo) = &request.photo {
            existing.photo = Some(photo.clone());
        }
        Ok(existing.clone())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), GatewayError> {
        self.record("delete_conversation").await?;
        self.conversations.lock().await.retain(|c| &c.id != id);
        Ok(())
    }
}

#[async_trait]
impl GroupGateway for FakeGateway {
    async fn list_groups(&self) -> Result<Vec<Group>, GatewayError> {
        self.record("list_groups").await?;
        Ok(self.groups.lock().await.clone())
    }

    async fn get_group(&self, id: &GroupId) -> Result<Group, GatewayError> {
        self.record("get_group").await?;
        self.groups
            .lock()
            .await
            .iter()
            .find(|g| &g.id == id)
            .cloned()
            .ok_or_else(|| server_error(404, None))
    }

    async fn create_group(&self, request: &GroupRequest) -> Result<Group, GatewayError> {
        self.record("create_group").await?;
        let mut groups = self.groups.lock().await;
        let created = group(
            &format!("group-{}", groups.len() + 1),
            request.name.as_deref().unwrap_or_default(),
        );
        groups.push(created.clone());
        Ok(created)
    }

    async fn update_group(
        &self,
        id: &GroupId,
        request: &GroupRequest,
    ) -> Result<Group, GatewayError> {
        self.record("update_group").await?;
        let mut groups = self.groups.lock().await;
        let existing = groups
            .iter_mut()
            .find(|g| &g.id == id)
            .ok_or_else(|| server_error(404, None))?;
        if let Some(name) = &request.name {
            existing.name = name.clone();
        }
        Ok(existing.clone())
    }

    async fn delete_group(&self, id: &GroupId) -> Result<(), GatewayError> {
        self.record("delete_group").await?;
        self.groups.lock().await.retain(|g| &g.id != id);
        Ok(())
    }

    async fn list_members(&self, _id: &GroupId) -> Result<Vec<GroupMember>, GatewayError> {
        self.record("list_members").await?;
        Ok(self.members.lock().await.clone())
    }

    async fn add_member(
        &self,
        _id: &GroupId,
        request: &AddMemberRequest,
    ) -> Result<GroupMember, GatewayError> {
        self.record("add_member").await?;
        let member = GroupMember {
            id: MemberId::from(format!("member-{}", request.user_id)),
            user_id: request.user_id.clone(),
            name: String::new(),
            role: request.role,
        };
        self.members.lock().await.push(member.clone());
        Ok(member)
    }

    async fn remove_member(
        &self,
        _id: &GroupId,
        member_id: &MemberId,
    ) -> Result<(), GatewayError> {
        self.record("remove_member").await?;
        self.members.lock().await.retain(|m| &m.id != member_id);
        Ok(())
    }

    async fn update_member_role(
        &self,
        _id: &GroupId,
        member_id: &MemberId,
        role: GroupRole,
    ) -> Result<(), GatewayError> {
        self.record("update_member_role").await?;
        if let Some(member) = self
            .members
            .lock()
            .await
            .iter_mut()
            .find(|m| &m.id == member_id)
        {
            member.role = role;
        }
        Ok(())
    }

    async fn leave_group(&self, id: &GroupId) -> Result<(), GatewayError> {
        self.record("leave_group").await?;
        self.groups.lock().await.retain(|g| &g.id != id);
        Ok(())
    }

    async fn set_group_name(&self, _id: &GroupId, _name: &str) -> Result<(), GatewayError> {
        self.record("set_group_name").await
    }

    async fn set_group_photo(
        &self,
        id: &GroupId,
        photo: PhotoUpload,
    ) -> Result<PhotoResponse, GatewayError> {
        self.record("set_group_photo").await?;
        let photo_url = format!("/photos/{id}/{}", photo.file_name);
        self.photos.lock().await.push(photo);
        Ok(PhotoResponse { photo: photo_url })
    }
}

#[async_trait]
impl AccountGateway for FakeGateway {
    async fn login(&self, name: &str) -> Result<LoginResponse, GatewayError> {
        self.record("login").await?;
        Ok(LoginResponse {
            identifier: UserId::from(format!("user-{name}")),
        })
    }

    async fn update_username(&self, name: &str) -> Result<(), GatewayError> {
        self.record("update_username").await?;
        self.usernames.lock().await.push(name.to_string());
        Ok(())
    }

    async fn upload_photo(&self, photo: PhotoUpload) -> Result<PhotoResponse, GatewayError> {
        self.record("upload_photo").await?;
        let photo_url = format!("/photos/me/{}", photo.file_name);
        self.photos.lock().await.push(photo);
        Ok(PhotoResponse { photo: photo_url })
    }
}
