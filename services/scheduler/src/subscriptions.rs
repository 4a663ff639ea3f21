//! Client for the external subscription store.
//!
//! The store owns user, API and subscription records. The scheduler only
//! reads API metadata and keeps each subscription's status, job name,
//! command and container in step with the registry.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use pollmesh_id::{ApiId, JobName, SubscriptionId, WorkerId};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Header carrying the shared secret on internal calls.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum SubscriptionStoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

impl SubscriptionStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Error,
}

/// A user id as the store sends it: a number or a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRef::Number(n) => write!(f, "{n}"),
            UserRef::Text(s) => f.write_str(s),
        }
    }
}

impl PartialEq for UserRef {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for UserRef {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableApi {
    #[serde(rename = "availableApiID")]
    pub id: ApiId,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_token_required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subscription_type: Option<String>,
    #[serde(default)]
    pub relevant_fields: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    #[serde(rename = "subscriptionID")]
    pub id: SubscriptionId,
    #[serde(rename = "userID")]
    pub user_id: UserRef,
    #[serde(rename = "availableApiID")]
    pub api_id: ApiId,
    pub interval: u64,
    pub status: SubscriptionStatus,
    #[serde(rename = "jobName", default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
}

impl Subscription {
    /// The job this subscription points at, if the stored name is valid.
    pub fn job(&self) -> Option<JobName> {
        self.job_name.as_deref().and_then(|n| n.parse().ok())
    }

    /// The stored command, if any.
    pub fn stored_command(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSubscription {
    #[serde(rename = "userID")]
    pub user_id: UserRef,
    #[serde(rename = "availableApiID")]
    pub api_id: ApiId,
    pub interval: u64,
    pub status: SubscriptionStatus,
    #[serde(rename = "jobName")]
    pub job_name: JobName,
}

/// Body of `POST /setSubscriptionsStatus`. `None` fields are sent as null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    #[serde(rename = "subscriptionID")]
    pub subscription_id: SubscriptionId,
    #[serde(rename = "subscriptionStatus")]
    pub status: SubscriptionStatus,
    #[serde(rename = "jobName")]
    pub job_name: Option<JobName>,
    pub command: Option<String>,
    pub container: Option<WorkerId>,
}

impl StatusUpdate {
    pub fn active(id: SubscriptionId, job: JobName, command: &str, worker: WorkerId) -> Self {
        Self {
            subscription_id: id,
            status: SubscriptionStatus::Active,
            job_name: Some(job),
            command: Some(command.to_string()),
            container: Some(worker),
        }
    }

    /// Detaches the job; the command is kept so a resubscribe can reuse it.
    pub fn inactive(id: SubscriptionId, command: Option<&str>) -> Self {
        Self {
            subscription_id: id,
            status: SubscriptionStatus::Inactive,
            job_name: None,
            command: command.map(str::to_string),
            container: None,
        }
    }

    /// Flags a subscription whose job could not be torn down cleanly.
    pub fn errored(subscription: &Subscription) -> Self {
        Self {
            subscription_id: subscription.id,
            status: SubscriptionStatus::Error,
            job_name: subscription.job(),
            command: subscription.command.clone(),
            container: subscription
                .container
                .as_deref()
                .and_then(|c| c.parse().ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedSubscription {
    #[serde(rename = "subscriptionID")]
    subscription_id: SubscriptionId,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn available_api(&self, id: ApiId) -> Result<AvailableApi, SubscriptionStoreError>;

    async fn subscription(&self, id: SubscriptionId) -> Result<Subscription, SubscriptionStoreError>;

    async fn create_subscription(
        &self,
        new: &NewSubscription,
    ) -> Result<SubscriptionId, SubscriptionStoreError>;

    async fn set_status(&self, update: &StatusUpdate) -> Result<(), SubscriptionStoreError>;

    /// Removes a record created moments ago by a failed subscribe.
    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), SubscriptionStoreError>;
}

/// Subscription store reached over its internal HTTP API.
pub struct HttpSubscriptionStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSubscriptionStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SubscriptionStoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn check(
        response: reqwest::Response,
        resource: impl FnOnce() -> String,
    ) -> Result<reqwest::Response, SubscriptionStoreError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SubscriptionStoreError::NotFound {
                resource: resource(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Subscription store call failed");
            return Err(SubscriptionStoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SubscriptionStore for HttpSubscriptionStore {
    async fn available_api(&self, id: ApiId) -> Result<AvailableApi, SubscriptionStoreError> {
        let url = format!("{}/availableApi/{}", self.base_url, id);
        debug!(url = %url, "Fetching API metadata");
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let response = Self::check(response, || format!("API {id}")).await?;
        Ok(response.json().await?)
    }

    async fn subscription(&self, id: SubscriptionId) -> Result<Subscription, SubscriptionStoreError> {
        let url = format!("{}/subscription/{}", self.base_url, id);
        debug!(url = %url, "Fetching subscription");
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let response = Self::check(response, || format!("subscription {id}")).await?;
        Ok(response.json().await?)
    }

    async fn create_subscription(
        &self,
        new: &NewSubscription,
    ) -> Result<SubscriptionId, SubscriptionStoreError> {
        let url = format!("{}/createSubscription", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(new)
            .send()
            .await?;
        let response = Self::check(response, || format!("API {}", new.api_id)).await?;
        let created: CreatedSubscription = response.json().await?;
        debug!(subscription_id = %created.subscription_id, job = %new.job_name, "Subscription created");
        Ok(created.subscription_id)
    }

    async fn set_status(&self, update: &StatusUpdate) -> Result<(), SubscriptionStoreError> {
        let url = format!("{}/setSubscriptionsStatus", self.base_url);
        debug!(
            subscription_id = %update.subscription_id,
            status = ?update.status,
            "Pushing subscription status"
        );
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(update)
            .send()
            .await?;
        Self::check(response, || format!("subscription {}", update.subscription_id)).await?;
        Ok(())
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), SubscriptionStoreError> {
        let url = format!("{}/subscription/{}", self.base_url, id);
        let response = self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::check(response, || format!("subscription {id}")).await?;
        Ok(())
    }
}
