//! Funding receipt storage used for rate limiting

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trickle_common::CoinSet;

/// Record that a user was funded on a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingReceipt {
    pub chain_prefix: String,
    pub username: String,
    pub funded_at: DateTime<Utc>,
    pub amount: CoinSet,
}

impl FundingReceipt {
    pub fn new(
        chain_prefix: impl Into<String>,
        username: impl Into<String>,
        funded_at: DateTime<Utc>,
        amount: CoinSet,
    ) -> Self {
        Self {
            chain_prefix: chain_prefix.into(),
            username: username.into(),
            funded_at,
            amount,
        }
    }

    fn key(&self) -> String {
        receipt_key(&self.username, &self.chain_prefix)
    }
}

/// `<username length>:<username>:<prefix>`; the length keeps usernames
/// containing `:` from colliding
fn receipt_key(username: &str, chain_prefix: &str) -> String {
    format!("{}:{}:{}", username.len(), username, chain_prefix)
}

/// Persistence for the last funding of each (user, chain) pair
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get_receipt(
        &self,
        username: &str,
        chain_prefix: &str,
    ) -> FaucetResult<Option<FundingReceipt>>;

    /// Store a receipt, replacing any previous one for the same pair
    async fn save_receipt(&self, receipt: FundingReceipt) -> FaucetResult<()>;

    /// Remove every receipt funded at or before `before`
    async fn prune_expired(&self, before: DateTime<Utc>) -> FaucetResult<usize>;
}

/// In-process receipt store
#[derive(Default)]
pub struct MemoryReceiptStore {
    receipts: RwLock<HashMap<String, FundingReceipt>>,
}

impl MemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.receipts.read().await.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryReceiptStore {
    async fn get_receipt(
        &self,
        username: &str,
        chain_prefix: &str,
    ) -> FaucetResult<Option<FundingReceipt>> {
        let receipts = self.receipts.read().await;
        Ok(receipts.get(&receipt_key(username, chain_prefix)).cloned())
    }

    async fn save_receipt(&self, receipt: FundingReceipt) -> FaucetResult<()> {
        let mut receipts = self.receipts.write().await;
        receipts.insert(receipt.key(), receipt);
        Ok(())
    }

    async fn prune_expired(&self, before: DateTime<Utc>) -> FaucetResult<usize> {
        let mut receipts = self.receipts.write().await;
        let initial = receipts.len();
        receipts.retain(|_, r| r.funded_at > before);
        Ok(initial - receipts.len())
    }
}

/// Receipt store backed by sled
#[derive(Clone)]
pub struct SledReceiptStore {
    db: Arc<Db>,
    /// Tree for receipts, see `receipt_key`
    receipts: Tree,
}

impl SledReceiptStore {
    /// Create or open the receipt database
    pub fn open(path: &str) -> FaucetResult<Self> {
        info!("Opening receipt database at: {}", path);

        let db = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024)
            .open()?;
        let receipts = db.open_tree("receipts")?;

        Ok(Self {
            db: Arc::new(db),
            receipts,
        })
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> FaucetResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    async fn blocking<T, F>(&self, op: F) -> FaucetResult<T>
    where
        F: FnOnce(Tree) -> FaucetResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let tree = self.receipts.clone();
        tokio::task::spawn_blocking(move || op(tree))
            .await
            .map_err(|e| FaucetError::InternalError(format!("receipt store task failed: {}", e)))?
    }
}

#[async_trait]
impl RateLimitStore for SledReceiptStore {
    async fn get_receipt(
        &self,
        username: &str,
        chain_prefix: &str,
    ) -> FaucetResult<Option<FundingReceipt>> {
        let key = receipt_key(username, chain_prefix);
        self.blocking(move |tree| match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        })
        .await
    }

    async fn save_receipt(&self, receipt: FundingReceipt) -> FaucetResult<()> {
        self.blocking(move |tree| {
            let value = bincode::serialize(&receipt)?;
            tree.insert(receipt.key().as_bytes(), value)?;
            debug!(
                "Recorded receipt for {} on {}",
                receipt.username, receipt.chain_prefix
            );
            Ok(())
        })
        .await
    }

    async fn prune_expired(&self, before: DateTime<Utc>) -> FaucetResult<usize> {
        self.blocking(move |tree| {
            let mut keys_to_remove = Vec::new();

            for item in tree.iter() {
                let (key, value) = item?;
                let receipt: FundingReceipt = bincode::deserialize(&value)?;
                if receipt.funded_at <= before {
                    keys_to_remove.push(key);
                }
            }

            let mut removed = 0;
            for key in keys_to_remove {
                if tree.remove(key)?.is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }
}

/// Drop receipts whose cooldown ended before `now`
pub async fn prune_receipts(
    store: &dyn RateLimitStore,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> FaucetResult<usize> {
    let cooldown = chrono::Duration::from_std(cooldown)
        .map_err(|e| FaucetError::Configuration(format!("FUNDING_INTERVAL: {}", e)))?;
    store.prune_expired(now - cooldown).await
}

/// Periodically prune expired receipts until `shutdown` fires
pub fn spawn_pruner(
    store: Arc<dyn RateLimitStore>,
    every: Duration,
    cooldown: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match prune_receipts(store.as_ref(), Utc::now(), cooldown).await {
                        Ok(0) => {}
                        Ok(count) => info!("Pruned {} expired receipts", count),
                        Err(e) => warn!("Receipt pruning failed: {}", e),
                    }
                }
            }
        }
    })
}
