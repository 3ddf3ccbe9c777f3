//! Chat feedback for faucet requests

use crate::chain::{Address, TxRef};
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};
use trickle_common::CoinSet;

const HELP_TEXT: &str = "\
**Commands**
`!request <address>`: send testnet tokens to `<address>`. The chain is picked from the address prefix.
`!status [prefix]`: show the faucet balance.
`!help`: show this message.

Each account can be funded once per chain per funding interval.";

/// Where a chat message came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    pub message_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author_id: String,
    #[serde(default)]
    pub author_bot: bool,
}

impl ChatContext {
    /// Direct message, i.e. not posted in a guild channel
    pub fn is_direct(&self) -> bool {
        self.guild_id.is_none()
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.author_id)
    }
}

/// Feedback channel back to the requester
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Request accepted and queued
    async fn acknowledge(&self, ctx: &ChatContext);

    async fn success(&self, ctx: &ChatContext, tx: &TxRef, recipient: &Address, amount: &CoinSet);

    async fn failure(&self, ctx: &ChatContext, error: &FaucetError);

    async fn status(&self, ctx: &ChatContext, balance: &str);

    async fn help(&self, ctx: &ChatContext, prefixes: &[String]);
}

/// How a notification reaches the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Reaction on the original message
    Reaction,
    /// Reply in the originating channel
    Reply,
    /// Direct message to the author
    Direct,
}

#[derive(Debug, Serialize)]
struct MessageReference<'a> {
    message_id: &'a str,
    channel_id: &'a str,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    content: String,
    delivery: Delivery,
    channel_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_reference: Option<MessageReference<'a>>,
}

/// Settings that shape notifications
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    pub silent: bool,
    pub send_dm: bool,
    pub finder_url: String,
}

/// Posts notifications to a chat webhook, or logs them when none is configured
pub struct WebhookNotifier {
    config: NotifierConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: NotifierConfig) -> FaucetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { config, client })
    }

    /// Whether a notification of this kind may be sent for `ctx`
    pub fn permits(&self, ctx: &ChatContext, delivery: Delivery) -> bool {
        if ctx.author_bot {
            return false;
        }
        match delivery {
            Delivery::Reaction => !self.config.silent,
            Delivery::Reply => true,
            // Silent mode only answers in direct conversations
            Delivery::Direct => !self.config.silent || ctx.is_direct(),
        }
    }

    fn tx_link(&self, tx: &TxRef) -> String {
        format!("{}/{}", self.config.finder_url.trim_end_matches('/'), tx)
    }

    async fn deliver(&self, ctx: &ChatContext, delivery: Delivery, content: String) {
        if !self.permits(ctx, delivery) {
            debug!("Suppressed {:?} notification for message {}", delivery, ctx.message_id);
            return;
        }

        if let Err(e) = self.post(ctx, delivery, content).await {
            error!("Failed to notify {}: {}", ctx.author_id, e);
        }
    }

    async fn post(&self, ctx: &ChatContext, delivery: Delivery, content: String) -> FaucetResult<()> {
        let url = match &self.config.webhook_url {
            Some(url) => url,
            None => {
                info!(
                    channel = %ctx.channel_id,
                    author = %ctx.author_id,
                    ?delivery,
                    "{}",
                    content
                );
                return Ok(());
            }
        };

        let message = OutboundMessage {
            content,
            delivery,
            channel_id: &ctx.channel_id,
            recipient_id: matches!(delivery, Delivery::Direct).then_some(ctx.author_id.as_str()),
            message_reference: (!matches!(delivery, Delivery::Direct)).then_some(MessageReference {
                message_id: &ctx.message_id,
                channel_id: &ctx.channel_id,
            }),
        };

        let response = self
            .client
            .post(url)
            .json(&message)
            .send()
            .await
            .map_err(|e| FaucetError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FaucetError::Notification(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

pub fn success_message(ctx: &ChatContext, link: &str) -> String {
    format!(
        "Hey {}, faucet tapped, just for you!\nTransaction hash\n{}",
        ctx.mention(),
        link
    )
}

pub fn failure_message(ctx: &ChatContext, error: &FaucetError) -> String {
    format!(
        "{}, there is an error in your request:\n `{}`",
        ctx.mention(),
        error
    )
}

pub fn help_message(prefixes: &[String]) -> String {
    format!(
        "**Supported address prefixes**: {}.\n\n{}",
        prefixes.join(", "),
        HELP_TEXT
    )
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn acknowledge(&self, ctx: &ChatContext) {
        self.deliver(ctx, Delivery::Reaction, "👍".to_string()).await;
        self.deliver(ctx, Delivery::Reaction, "⚙️".to_string()).await;
    }

    async fn success(&self, ctx: &ChatContext, tx: &TxRef, recipient: &Address, amount: &CoinSet) {
        let link = self.tx_link(tx);
        self.deliver(ctx, Delivery::Reaction, "✅".to_string()).await;
        self.deliver(ctx, Delivery::Reply, success_message(ctx, &link)).await;

        if self.config.send_dm {
            let dm = format!(
                "Dispensed 💸 `{}` to `{}`\nTransaction hash\n{}",
                amount, recipient, link
            );
            self.deliver(ctx, Delivery::Direct, dm).await;
        }
    }

    async fn failure(&self, ctx: &ChatContext, error: &FaucetError) {
        self.deliver(ctx, Delivery::Reaction, "❌".to_string()).await;
        // Errors are reported even in silent mode
        self.deliver(ctx, Delivery::Reply, failure_message(ctx, error)).await;
    }

    async fn status(&self, ctx: &ChatContext, balance: &str) {
        self.deliver(ctx, Delivery::Reaction, "✅".to_string()).await;
        let content = format!(
            "Faucet status:\nCurrent balance: `{}`\nSend DMs: `{}`",
            balance, self.config.send_dm
        );
        self.deliver(ctx, Delivery::Reply, content).await;
    }

    async fn help(&self, ctx: &ChatContext, prefixes: &[String]) {
        self.deliver(ctx, Delivery::Direct, help_message(prefixes)).await;
    }
}
