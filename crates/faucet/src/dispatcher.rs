//! Chat command handling: validation, rate limiting and routing to workers

use crate::chain::{address_prefix, ChainSender};
use crate::command::{parse_commands, Command};
use crate::config::FaucetConfig;
use crate::database::{FundingReceipt, RateLimitStore};
use crate::error::{FaucetError, FaucetResult};
use crate::notify::{ChatContext, NotificationSink};
use crate::worker::{ChainWorkerHandle, FaucetRequest, StatusRequest};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use trickle_common::CoinSet;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Worker and chain client serving one prefix
#[derive(Clone)]
pub struct ChainRoute {
    pub handle: ChainWorkerHandle,
    pub chain: Arc<dyn ChainSender>,
}

pub struct Dispatcher {
    config: Arc<FaucetConfig>,
    routes: HashMap<String, ChainRoute>,
    store: Arc<dyn RateLimitStore>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    cooldown: chrono::Duration,
    fatal: UnboundedSender<FaucetError>,
    bot_user_id: Option<String>,
    /// Held from the cooldown check until the receipt is written
    admission: Mutex<()>,
}

impl Dispatcher {
    /// `fatal` receives errors that must bring the process down
    pub fn new(
        config: Arc<FaucetConfig>,
        routes: Vec<ChainRoute>,
        store: Arc<dyn RateLimitStore>,
        notifier: Arc<dyn NotificationSink>,
        fatal: UnboundedSender<FaucetError>,
    ) -> FaucetResult<Self> {
        let cooldown = chrono::Duration::from_std(config.funding_interval)
            .map_err(|e| FaucetError::Configuration(format!("FUNDING_INTERVAL: {}", e)))?;

        let routes = routes
            .into_iter()
            .map(|route| (route.handle.prefix().to_string(), route))
            .collect();

        Ok(Self {
            config,
            routes,
            store,
            notifier,
            clock: Arc::new(SystemClock),
            cooldown,
            fatal,
            bot_user_id: None,
            admission: Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Messages from this user id are ignored
    pub fn with_bot_user(mut self, user_id: impl Into<String>) -> Self {
        self.bot_user_id = Some(user_id.into());
        self
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.config.prefixes()
    }

    /// Handle every command contained in one chat message
    pub async fn handle_message(&self, ctx: &ChatContext, content: &str) {
        if self.bot_user_id.as_deref() == Some(ctx.author_id.as_str()) {
            return;
        }

        let commands = parse_commands(content);
        if commands.is_empty() {
            if ctx.is_direct() {
                self.help(ctx).await;
            }
            return;
        }

        for command in commands {
            let result = match command {
                Command::Request(address) => self.request(ctx, &address).await,
                Command::Status(prefix) => self.status(ctx, prefix.as_deref()),
                Command::Help => {
                    self.help(ctx).await;
                    Ok(())
                }
            };

            if let Err(e) = result {
                self.report(ctx, e).await;
                return;
            }
        }
    }

    /// Validate a funding request and queue it on its chain's worker
    pub async fn request(&self, ctx: &ChatContext, raw_address: &str) -> FaucetResult<()> {
        let prefix = address_prefix(raw_address)?;

        let route = self
            .routes
            .get(&prefix)
            .ok_or_else(|| FaucetError::UnsupportedChain(prefix.clone()))?;

        let funding = self.config.funding_for(&prefix).ok_or_else(|| {
            FaucetError::Configuration(format!("FUNDING has no entry for {}", prefix))
        })?;
        let coins = funding.parse_coins()?;
        let fees = funding.parse_fees()?;

        let admitted = self.admit(ctx, route, raw_address, &prefix, coins, fees).await?;
        self.notifier.acknowledge(ctx).await;
        info!("Queued {} for {} on {}", admitted.amount, admitted.recipient, prefix);

        Ok(())
    }

    /// Check the cooldown, queue the transfer and write the receipt as one
    /// step, so concurrent requests from the same user cannot both pass.
    async fn admit(
        &self,
        ctx: &ChatContext,
        route: &ChainRoute,
        raw_address: &str,
        prefix: &str,
        coins: CoinSet,
        fees: CoinSet,
    ) -> FaucetResult<FaucetRequest> {
        let _guard = self.admission.lock().await;

        let now = self.clock.now();
        self.check_cooldown(&ctx.author_id, prefix, now).await?;

        let request = FaucetRequest {
            recipient: route.chain.decode_address(raw_address)?,
            amount: coins.clone(),
            fee: fees,
            notify: ctx.clone(),
        };
        route.handle.submit(request.clone())?;

        // Recorded before the batch is confirmed
        let receipt = FundingReceipt::new(prefix, &ctx.author_id, now, coins);
        if let Err(e) = self.store.save_receipt(receipt).await {
            error!("Failed to save receipt for {} on {}: {}", ctx.author_id, prefix, e);
        }

        Ok(request)
    }

    async fn check_cooldown(
        &self,
        username: &str,
        prefix: &str,
        now: DateTime<Utc>,
    ) -> FaucetResult<()> {
        let receipt = self
            .store
            .get_receipt(username, prefix)
            .await
            .map_err(|e| {
                warn!("Receipt lookup failed for {} on {}: {}", username, prefix, e);
                FaucetError::RateLimitUnverifiable(e.to_string())
            })?;

        if let Some(receipt) = receipt {
            let ready_at = receipt.funded_at + self.cooldown;
            if now < ready_at {
                debug!("{} is rate limited on {} until {}", username, prefix, ready_at);
                return Err(FaucetError::RateLimited {
                    prefix: prefix.to_string(),
                    remaining: (ready_at - now).to_std().unwrap_or(Duration::ZERO),
                });
            }
        }
        Ok(())
    }

    /// Queue a balance query; defaults to the first configured chain
    pub fn status(&self, ctx: &ChatContext, prefix: Option<&str>) -> FaucetResult<()> {
        let prefix = match prefix {
            Some(prefix) => prefix.to_string(),
            None => self
                .config
                .chains
                .first()
                .map(|c| c.prefix.clone())
                .ok_or_else(|| FaucetError::Configuration("no chains configured".into()))?,
        };

        let route = self
            .routes
            .get(&prefix)
            .ok_or_else(|| FaucetError::UnsupportedChain(prefix.clone()))?;

        route.handle.request_status(StatusRequest { notify: ctx.clone() })
    }

    pub async fn help(&self, ctx: &ChatContext) {
        self.notifier.help(ctx, &self.prefixes()).await;
    }

    async fn report(&self, ctx: &ChatContext, error: FaucetError) {
        if error.is_user_error() {
            debug!("Rejected request from {}: {}", ctx.author_id, error);
        } else {
            error!("Request from {} failed: {}", ctx.author_id, error);
        }

        self.notifier.failure(ctx, &error).await;

        if error.is_fatal() {
            let _ = self.fatal.send(error);
        }
    }
}
