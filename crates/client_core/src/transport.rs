//! Transport gateway: the async calls the stores make against the chat API.
//!
//! Stores depend on the gateway traits only. [`HttpGateway`] is the reqwest
//! implementation; tests substitute in-process fakes.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    multipart::{Form, Part},
    Client, Method, RequestBuilder, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConversationId, GroupId, GroupRole, MemberId, MessageId, ReactionId},
    error::{ApiErrorBody, ErrorCode},
    protocol::{
        AddMemberRequest, CommentRequest, Conversation, CreateConversationRequest,
        ForwardMessageRequest, Group, GroupMember, GroupNameRequest, GroupRequest, LoginRequest,
        LoginResponse, Message, MessagePage, NewMessage, PageQuery, PhotoResponse,
        ReactionRequest, UpdateConversationRequest, UpdateMemberRoleRequest, UpdateMessageRequest,
        UpdateUsernameRequest,
    },
};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{config::ClientSettings, session::SessionContext};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized { message: Option<String> },
    #[error("request failed with status {status}")]
    Status { status: u16, message: Option<String> },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED.as_u16()),
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.status().map(ErrorCode::from_status)
    }

    /// Human-readable text carried by the failure, if the server or the
    /// connection supplied any. Callers substitute their own fallback.
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            GatewayError::Unauthorized { message } | GatewayError::Status { message, .. } => {
                message.as_deref()
            }
            GatewayError::Transport(message) | GatewayError::Decode(message) => {
                Some(message.as_str())
            }
        }
    }
}

/// Image sent as the `photo` field of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    /// Guesses the content type from the file extension.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let content_type = match extension.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            _ => "application/octet-stream",
        };
        Self {
            file_name,
            content_type: content_type.to_string(),
            bytes,
        }
    }

    fn into_form(self) -> Result<Form, GatewayError> {
        let part = Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(&self.content_type)
            .map_err(|e| GatewayError::Transport(format!("invalid photo content type: {e}")))?;
        Ok(Form::new().part("photo", part))
    }
}

#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn fetch_page(
        &self,
        conversation_id: &ConversationId,
        query: &PageQuery,
    ) -> Result<MessagePage, GatewayError>;
    async fn create_message(&self, payload: &NewMessage) -> Result<Message, GatewayError>;
    async fn update_message(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> Result<Message, GatewayError>;
    async fn delete_message(&self, message_id: &MessageId) -> Result<(), GatewayError>;
    async fn add_reaction(
        &self,
        message_id: &MessageId,
        reaction: &str,
    ) -> Result<Message, GatewayError>;
    async fn remove_reaction(
        &self,
        message_id: &MessageId,
        reaction_id: &ReactionId,
    ) -> Result<Message, GatewayError>;
    async fn forward_message(
        &self,
        message_id: &MessageId,
        target: &ConversationId,
    ) -> Result<(), GatewayError>;
    async fn add_comment(&self, message_id: &MessageId, emoji: &str) -> Result<(), GatewayError>;
    async fn remove_comment(&self, message_id: &MessageId) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait ConversationGateway: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, GatewayError>;
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, GatewayError>;
    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, GatewayError>;
    async fn update_conversation(
        &self,
        id: &ConversationId,
        request: &UpdateConversationRequest,
    ) -> Result<Conversation, GatewayError>;
    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait GroupGateway: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<Group>, GatewayError>;
    async fn get_group(&self, id: &GroupId) -> Result<Group, GatewayError>;
    async fn create_group(&self, request: &GroupRequest) -> Result<Group, GatewayError>;
    async fn update_group(&self, id: &GroupId, request: &GroupRequest)
        -> Result<Group, GatewayError>;
    async fn delete_group(&self, id: &GroupId) -> Result<(), GatewayError>;
    async fn list_members(&self, id: &GroupId) -> Result<Vec<GroupMember>, GatewayError>;
    async fn add_member(
        &self,
        id: &GroupId,
        request: &AddMemberRequest,
    ) -> Result<GroupMember, GatewayError>;
    async fn remove_member(&self, id: &GroupId, member_id: &MemberId)
        -> Result<(), GatewayError>;
    async fn update_member_role(
        &self,
        id: &GroupId,
        member_id: &MemberId,
        role: GroupRole,
    ) -> Result<(), GatewayError>;
    async fn leave_group(&self, id: &GroupId) -> Result<(), GatewayError>;
    async fn set_group_name(&self, id: &GroupId, name: &str) -> Result<(), GatewayError>;
    async fn set_group_photo(
        &self,
        id: &GroupId,
        photo: PhotoUpload,
    ) -> Result<PhotoResponse, GatewayError>;
}

#[async_trait]
pub trait AccountGateway: Send + Sync {
    async fn login(&self, name: &str) -> Result<LoginResponse, GatewayError>;
    async fn update_username(&self, name: &str) -> Result<(), GatewayError>;
    async fn upload_photo(&self, photo: PhotoUpload) -> Result<PhotoResponse, GatewayError>;
}

pub struct HttpGateway {
    http: Client,
    base_url: Url,
    session: Arc<SessionContext>,
}

impl HttpGateway {
    pub fn new(
        settings: &ClientSettings,
        session: Arc<SessionContext>,
    ) -> Result<Self, GatewayError> {
        let mut base_url = Url::parse(&settings.api_url)
            .map_err(|e| GatewayError::Transport(format!("invalid api url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Transport(format!(
                "api url must be hierarchical: {}",
                settings.api_url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let request = self.http.request(method, self.endpoint(segments));
        match self.session.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(|err| {
            debug!("gateway: request failed before a response: {err}");
            GatewayError::Transport(err.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        let message = failure_text(&body);
        if status == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "gateway: 401 from api; expiring session");
            self.session.expire();
            return Err(GatewayError::Unauthorized { message });
        }

        debug!(url = %url, status = status.as_u16(), "gateway: api returned failure");
        Err(GatewayError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn empty(&self, request: RequestBuilder) -> Result<(), GatewayError> {
        self.execute(request).await.map(|_| ())
    }
}

/// Extracts the message of a failed response: the `error` field of the JSON
/// envelope, else the trimmed plain-text body.
fn failure_text(body: &str) -> Option<String> {
    if let Some(envelope) = ApiErrorBody::parse(body) {
        return Some(envelope.error);
    }
    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl MessageGateway for HttpGateway {
    async fn fetch_page(
        &self,
        conversation_id: &ConversationId,
        query: &PageQuery,
    ) -> Result<MessagePage, GatewayError> {
        self.json(
            self.request(
                Method::GET,
                &["conversations", conversation_id.as_str(), "messages"],
            )
            .query(query),
        )
        .await
    }

    async fn create_message(&self, payload: &NewMessage) -> Result<Message, GatewayError> {
        self.json(self.request(Method::POST, &["messages"]).json(payload))
            .await
    }

    async fn update_message(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> Result<Message, GatewayError> {
        self.json(
            self.request(Method::PUT, &["messages", message_id.as_str()])
                .json(&UpdateMessageRequest {
                    content: content.to_string(),
                }),
        )
        .await
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), GatewayError> {
        self.empty(self.request(Method::DELETE, &["messages", message_id.as_str()]))
            .await
    }

    async fn add_reaction(
        &self,
        message_id: &MessageId,
        reaction: &str,
    ) -> Result<Message, GatewayError> {
        self.json(
            self.request(Method::POST, &["messages", message_id.as_str(), "reactions"])
                .json(&ReactionRequest {
                    reaction: reaction.to_string(),
                }),
        )
        .await
    }

    async fn remove_reaction(
        &self,
        message_id: &MessageId,
        reaction_id: &ReactionId,
    ) -> Result<Message, GatewayError> {
        self.json(self.request(
            Method::DELETE,
            &[
                "messages",
                message_id.as_str(),
                "reactions",
                reaction_id.as_str(),
            ],
        ))
        .await
    }

    async fn forward_message(
        &self,
        message_id: &MessageId,
        target: &ConversationId,
    ) -> Result<(), GatewayError> {
        self.empty(
            self.request(Method::POST, &["messages", "forward"])
                .json(&ForwardMessageRequest {
                    message_id: message_id.clone(),
                    target_conversation_id: target.clone(),
                }),
        )
        .await
    }

    async fn add_comment(&self, message_id: &MessageId, emoji: &str) -> Result<(), GatewayError> {
        self.empty(
            self.request(Method::POST, &["messages", message_id.as_str(), "comment"])
                .json(&CommentRequest {
                    emoji: emoji.to_string(),
                }),
        )
        .await
    }

    async fn remove_comment(&self, message_id: &MessageId) -> Result<(), GatewayError> {
        self.empty(self.request(
            Method::DELETE,
            &["messages", message_id.as_str(), "comment"],
        ))
        .await
    }
}

#[async_trait]
impl ConversationGateway for HttpGateway {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, GatewayError> {
        self.json(self.request(Method::GET, &["conversations"]))
            .await
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, GatewayError> {
        self.json(self.request(Method::GET, &["conversations", id.as_str()]))
            .await
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, GatewayError> {
        self.json(self.request(Method::POST, &["conversations"]).json(request))
            .await
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        request: &UpdateConversationRequest,
    ) -> Result<Conversation, GatewayError> {
        self.json(
            self.request(Method::PUT, &["conversations", id.as_str()])
                .json(request),
        )
        .await
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), GatewayError> {
        self.empty(self.request(Method::DELETE, &["conversations", id.as_str()]))
            .await
    }
}

#[async_trait]
impl GroupGateway for HttpGateway {
    async fn list_groups(&self) -> Result<Vec<Group>, GatewayError> {
        self.json(self.request(Method::GET, &["groups"])).await
    }

    async fn get_group(&self, id: &GroupId) -> Result<Group, GatewayError> {
        self.json(self.request(Method::GET, &["groups", id.as_str()]))
            .await
    }

    async fn create_group(&self, request: &GroupRequest) -> Result<Group, GatewayError> {
        self.json(self.request(Method::POST, &["groups"]).json(request))
            .await
    }

    async fn update_group(
        &self,
        id: &GroupId,
        request: &GroupRequest,
    ) -> Result<Group, GatewayError> {
        self.json(self.request(Method::PUT, &["groups", id.as_str()]).json(request))
            .await
    }

    async fn delete_group(&self, id: &GroupId) -> Result<(), GatewayError> {
        self.empty(self.request(Method::DELETE, &["groups", id.as_str()]))
            .await
    }

    async fn list_members(&self, id: &GroupId) -> Result<Vec<GroupMember>, GatewayError> {
        self.json(self.request(Method::GET, &["groups", id.as_str(), "members"]))
            .await
    }

    async fn add_member(
        &self,
        id: &GroupId,
        request: &AddMemberRequest,
    ) -> Result<GroupMember, GatewayError> {
        self.json(
            self.request(Method::POST, &["groups", id.as_str(), "members"])
                .json(request),
        )
        .await
    }

    async fn remove_member(
        &self,
        id: &GroupId,
        member_id: &MemberId,
    ) -> Result<(), GatewayError> {
        self.empty(self.request(
            Method::DELETE,
            &["groups", id.as_str(), "members", member_id.as_str()],
        ))
        .await
    }

    async fn update_member_role(
        &self,
        id: &GroupId,
        member_id: &MemberId,
        role: GroupRole,
    ) -> Result<(), GatewayError> {
        self.empty(
            self.request(
                Method::PUT,
                &["groups", id.as_str(), "members", member_id.as_str()],
            )
            .json(&UpdateMemberRoleRequest { role }),
        )
        .await
    }

    async fn leave_group(&self, id: &GroupId) -> Result<(), GatewayError> {
        self.empty(self.request(Method::POST, &["groups", id.as_str(), "leave"]))
            .await
    }

    async fn set_group_name(&self, id: &GroupId, name: &str) -> Result<(), GatewayError> {
        self.empty(
            self.request(Method::PUT, &["groups", id.as_str(), "name"])
                .json(&GroupNameRequest {
                    name: name.to_string(),
                }),
        )
        .await
    }

    async fn set_group_photo(
        &self,
        id: &GroupId,
        photo: PhotoUpload,
    ) -> Result<PhotoResponse, GatewayError> {
        let form = photo.into_form()?;
        self.json(
            self.request(Method::PUT, &["groups", id.as_str(), "photo"])
                .multipart(form),
        )
        .await
    }
}

#[async_trait]
impl AccountGateway for HttpGateway {
    async fn login(&self, name: &str) -> Result<LoginResponse, GatewayError> {
        self.json(self.request(Method::POST, &["session"]).json(&LoginRequest {
            name: name.to_string(),
        }))
        .await
    }

    async fn update_username(&self, name: &str) -> Result<(), GatewayError> {
        self.empty(
            self.request(Method::PUT, &["users", "me", "username"])
                .json(&UpdateUsernameRequest {
                    name: name.to_string(),
                }),
        )
        .await
    }

    async fn upload_photo(&self, photo: PhotoUpload) -> Result<PhotoResponse, GatewayError> {
        let form = photo.into_form()?;
        self.json(
            self.request(Method::PUT, &["users", "me", "photo"])
                .multipart(form),
        )
        .await
    }
}

/// Convenience for wiring one gateway value into every store.
pub trait ChatGateway: MessageGateway + ConversationGateway + GroupGateway + AccountGateway {}

impl<T> ChatGateway for T where
    T: MessageGateway + ConversationGateway + GroupGateway + AccountGateway
{
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
