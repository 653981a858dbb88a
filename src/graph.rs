//! Remote mail source boundary.
//!
//! [`MailSource`] is the seam the orchestrator pulls messages through;
//! [`GraphMailSource`] implements it against the Microsoft Graph API.
//! Pagination uses Graph's `@odata.nextLink` verbatim as the opaque
//! continuation token, and folder `totalItemCount` is treated as an
//! approximation only. Token acquisition (device flow, refresh) is out of
//! scope — a bearer token is read from the environment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::models::{MailFolder, MessagePage, MessageRecord, SELECTION_FOLDER_ID};

const SELECT_FIELDS: &str = "id,subject,bodyPreview,webLink,receivedDateTime,from";

#[async_trait]
pub trait MailSource: Send + Sync {
    /// List mail folders with their display names and approximate item
    /// counts.
    async fn list_folders(&self) -> Result<Vec<MailFolder>>;

    /// List one page of messages in a folder, newest first. Pass the
    /// previous page's `next_page` token to continue; `None` starts over.
    async fn list_messages(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage>;

    /// Fetch full records for explicitly selected message ids.
    async fn fetch_messages(&self, ids: &[String]) -> Result<Vec<MessageRecord>>;

    /// Resolve a fresh deep-link for a message. Stored links can go stale;
    /// UIs re-resolve before opening one.
    async fn resolve_weblink(&self, message_id: &str) -> Result<Option<String>>;
}

pub struct GraphMailSource {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl GraphMailSource {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            Error::MailSource(format!(
                "no access token: set the {} environment variable",
                config.token_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::MailSource(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::MailSource(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::MailSource(format!(
                "Graph API error {}: {}",
                status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::MailSource(format!("invalid Graph response: {}", e)))
    }
}

#[async_trait]
impl MailSource for GraphMailSource {
    async fn list_folders(&self) -> Result<Vec<MailFolder>> {
        let url = format!("{}/me/mailFolders", self.base_url);
        let response: FolderListResponse = self
            .get_json(self.client.get(&url).query(&[
                ("$top", "200"),
                ("$select", "id,displayName,totalItemCount"),
            ]))
            .await?;

        Ok(response
            .value
            .into_iter()
            .map(|f| MailFolder {
                id: f.id,
                display_name: f.display_name,
                total_item_count: f.total_item_count,
            })
            .collect())
    }

    async fn list_messages(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage> {
        let response: MessageListResponse = match page_token {
            // nextLink already carries the full query string.
            Some(link) => self.get_json(self.client.get(link)).await?,
            None => {
                let url = format!("{}/me/mailFolders/{}/messages", self.base_url, folder_id);
                self.get_json(self.client.get(&url).query(&[
                    ("$top", page_size.to_string().as_str()),
                    ("$select", SELECT_FIELDS),
                    ("$orderby", "receivedDateTime desc"),
                ]))
                .await?
            }
        };

        Ok(MessagePage {
            items: response
                .value
                .into_iter()
                .map(|m| m.into_record(folder_id))
                .collect(),
            next_page: response.next_link,
        })
    }

    async fn fetch_messages(&self, ids: &[String]) -> Result<Vec<MessageRecord>> {
        let mut records = Vec::with_capacity(ids.len());

        for id in ids {
            let url = format!("{}/me/messages/{}", self.base_url, id);
            let message: GraphMessage = self
                .get_json(self.client.get(&url).query(&[("$select", SELECT_FIELDS)]))
                .await?;
            records.push(message.into_record(SELECTION_FOLDER_ID));
        }

        Ok(records)
    }

    async fn resolve_weblink(&self, message_id: &str) -> Result<Option<String>> {
        let url = format!("{}/me/messages/{}", self.base_url, message_id);
        let message: GraphMessage = self
            .get_json(self.client.get(&url).query(&[("$select", "id,webLink")]))
            .await?;
        Ok(message.web_link)
    }
}

// ============ Graph wire format ============

#[derive(Debug, Deserialize)]
struct FolderListResponse {
    #[serde(default)]
    value: Vec<GraphFolder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFolder {
    id: String,
    display_name: String,
    #[serde(default)]
    total_item_count: u64,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    #[serde(default)]
    id: String,
    subject: Option<String>,
    body_preview: Option<String>,
    web_link: Option<String>,
    received_date_time: Option<DateTime<Utc>>,
    from: Option<GraphRecipient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

impl GraphMessage {
    fn into_record(self, folder_id: &str) -> MessageRecord {
        let sender = self
            .from
            .and_then(|f| f.email_address)
            .and_then(|a| a.address);

        MessageRecord {
            message_id: self.id,
            folder_id: folder_id.to_string(),
            subject: self.subject,
            sender,
            received_at: self.received_date_time,
            weblink: self.web_link,
            body: self.body_preview.unwrap_or_default(),
        }
    }
}
