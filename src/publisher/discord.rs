//! Discord REST publisher.
//!
//! Creates messages with `POST /channels/{channel}/messages` and edits them
//! with `PATCH /channels/{channel}/messages/{id}`. Mentions are limited to
//! users and roles so relayed text can never ping `@everyone`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PublishError, Publisher};
use crate::content::{Embed, RenderedContent};
use crate::store::RemoteId;

/// Default Discord REST API base URL.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Connection settings for [`DiscordPublisher`].
#[derive(Clone)]
pub struct DiscordClientConfig {
    /// REST API base URL, without a trailing slash.
    pub api_base: String,
    /// Target channel id.
    pub channel_id: String,
    /// Bot token (sent as `Authorization: Bot <token>`).
    pub bot_token: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for DiscordClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClientConfig")
            .field("api_base", &self.api_base)
            .field("channel_id", &self.channel_id)
            .field("bot_token", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// [`Publisher`] backed by the Discord REST API.
#[derive(Debug)]
pub struct DiscordPublisher {
    config: DiscordClientConfig,
    client: reqwest::Client,
}

// ---------------------------------------------------------------------------
// Wire types (minimal subset)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    content: &'a str,
    tts: bool,
    embeds: Vec<EmbedPayload<'a>>,
    allowed_mentions: AllowedMentions,
}

#[derive(Debug, Serialize)]
struct EmbedPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct FieldPayload<'a> {
    name: &'a str,
    value: &'a str,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: [&'static str; 2],
}

/// Discord `Message` object (only the id is used).
#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: Option<String>,
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn embed_payload(embed: &Embed) -> EmbedPayload<'_> {
    EmbedPayload {
        title: non_empty(&embed.title),
        description: non_empty(&embed.description),
        url: non_empty(&embed.url),
        color: (embed.color != 0).then_some(embed.color),
        fields: embed
            .fields
            .iter()
            .map(|f| FieldPayload {
                name: &f.name,
                value: &f.value,
                inline: f.inline,
            })
            .collect(),
    }
}

fn message_payload(content: &RenderedContent) -> MessagePayload<'_> {
    MessagePayload {
        content: &content.text,
        tts: false,
        embeds: content.embeds.iter().map(embed_payload).collect(),
        allowed_mentions: AllowedMentions {
            parse: ["users", "roles"],
        },
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

impl DiscordPublisher {
    /// Build a publisher for one channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: DiscordClientConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/channels/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.channel_id
        )
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.config.bot_token)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, PublishError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(PublishError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Publisher for DiscordPublisher {
    async fn publish(&self, content: &RenderedContent) -> Result<RemoteId, PublishError> {
        let resp = self
            .client
            .post(self.messages_url())
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&message_payload(content))
            .send()
            .await?;

        let message: DiscordMessage = Self::check(resp).await?.json().await?;
        let id = message
            .id
            .filter(|id| !id.is_empty())
            .ok_or(PublishError::MissingId)?;

        debug!(channel_id = %self.config.channel_id, remote_id = %id, "published Discord message");
        Ok(RemoteId::new(id))
    }

    async fn update(
        &self,
        remote_id: &RemoteId,
        content: &RenderedContent,
    ) -> Result<(), PublishError> {
        let url = format!("{}/{}", self.messages_url(), remote_id);
        let resp = self
            .client
            .patch(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&message_payload(content))
            .send()
            .await?;

        Self::check(resp).await?;

        debug!(channel_id = %self.config.channel_id, remote_id = %remote_id, "edited Discord message");
        Ok(())
    }
}
