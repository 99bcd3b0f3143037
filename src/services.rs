use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ServiceError;
use crate::models::{Credentials, Message, Profile, RecentConversation};

/// Credential issuance and profile lookup, consumed once per session to
/// bind the session identity.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn register(&self, credentials: &Credentials) -> Result<(), ServiceError>;
    /// Returns the bearer access token.
    async fn login(&self, credentials: &Credentials) -> Result<String, ServiceError>;
    async fn get_profile(&self, token: &str) -> Result<Profile, ServiceError>;
}

/// Historical message retrieval and read-state bookkeeping. History is
/// ordered ascending by creation time.
#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn get_history(&self, partner_id: &str) -> Result<Vec<Message>, ServiceError>;
    async fn recent_conversations(&self) -> Result<Vec<RecentConversation>, ServiceError>;
    async fn mark_read(&self, partner_id: &str) -> Result<(), ServiceError>;
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

pub struct HttpIdentityService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityService {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpIdentityService {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn register(&self, credentials: &Credentials) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(format!("{}/auth/register", self.base_url))
            .json(credentials)
            .send()
            .await?;
        expect_success(response)?;
        Ok(())
    }

    async fn login(&self, credentials: &Credentials) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(credentials)
            .send()
            .await?;
        let body: LoginResponse = expect_success(response)?.json().await?;
        Ok(body.access_token)
    }

    async fn get_profile(&self, token: &str) -> Result<Profile, ServiceError> {
        let response = self
            .client
            .get(format!("{}/auth/profile", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(expect_success(response)?.json().await?)
    }
}

pub struct HttpHistoryService {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpHistoryService {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        HttpHistoryService {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl HistoryService for HttpHistoryService {
    async fn get_history(&self, partner_id: &str) -> Result<Vec<Message>, ServiceError> {
        let response = self
            .client
            .get(format!(
                "{}/messages/history?partnerId={partner_id}",
                self.base_url
            ))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(expect_success(response)?.json().await?)
    }

    async fn recent_conversations(&self) -> Result<Vec<RecentConversation>, ServiceError> {
        let response = self
            .client
            .get(format!("{}/messages/conversations", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(expect_success(response)?.json().await?)
    }

    async fn mark_read(&self, partner_id: &str) -> Result<(), ServiceError> {
        let response = self
            .client
            .put(format!("{}/messages/mark-read/{partner_id}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        expect_success(response)?;
        Ok(())
    }
}

fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ServiceError::Status(response.status().as_u16()))
    }
}
