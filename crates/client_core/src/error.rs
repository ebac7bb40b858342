use thiserror::Error;

use crate::transport::GatewayError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("no conversation is open")]
    NoActiveConversation,
    #[error("not logged in")]
    NotAuthenticated,
}

impl ClientError {
    pub fn gateway(&self) -> Option<&GatewayError> {
        match self {
            ClientError::Gateway(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Gateway(GatewayError::Unauthorized { .. }))
    }
}
