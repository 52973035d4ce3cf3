//! HTTP collaborators: user directory, message store, presence and logout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::UserId,
    protocol::{ChatMessage, UserSummary},
};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserSummary>>;
    async fn fetch_user(&self, user_id: UserId) -> Result<UserSummary>;
    async fn fetch_history(&self, user_id: UserId, peer_id: UserId) -> Result<Vec<ChatMessage>>;
    async fn unread_count(&self, user_id: UserId, peer_id: UserId) -> Result<u32>;
    async fn mark_as_read(&self, user_id: UserId, peer_id: UserId) -> Result<()>;
    async fn heartbeat(&self, user_id: UserId) -> Result<()>;
    async fn logout(&self, user_id: UserId) -> Result<()>;
}

pub struct HttpChatBackend {
    http: Client,
    server_url: String,
}

impl HttpChatBackend {
    pub fn new(server_url: impl Into<String>) -> Self {
        let server_url: String = server_url.into();
        Self {
            http: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.server_url)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        self.http
            .get(self.url("users"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid user directory payload")
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<UserSummary> {
        self.http
            .get(self.url(&format!("users/{user_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid payload for user {user_id}"))
    }

    async fn fetch_history(&self, user_id: UserId, peer_id: UserId) -> Result<Vec<ChatMessage>> {
        self.http
            .get(self.url(&format!("messages/{user_id}/{peer_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid history payload for {user_id}<->{peer_id}"))
    }

    async fn unread_count(&self, user_id: UserId, peer_id: UserId) -> Result<u32> {
        let count: i64 = self
            .http
            .get(self.url(&format!("messages/unread/{user_id}/{peer_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid unread count for {user_id}<-{peer_id}"))?;
        Ok(u32::try_from(count.max(0)).unwrap_or(u32::MAX))
    }

    async fn mark_as_read(&self, user_id: UserId, peer_id: UserId) -> Result<()> {
        self.http
            .put(self.url(&format!("messages/read/{user_id}/{peer_id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn heartbeat(&self, user_id: UserId) -> Result<()> {
        self.http
            .post(self.url(&format!("heartbeat/{user_id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn logout(&self, user_id: UserId) -> Result<()> {
        self.http
            .post(self.url(&format!("logout/{user_id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
