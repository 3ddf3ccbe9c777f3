#![allow(dead_code)]

use async_trait::async_trait;
use bech32::{ToBase32, Variant};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use trickle_common::CoinSet;
use trickle_faucet::{
    Address, ChainSender, ChatContext, Clock, FaucetConfig, FaucetError, FaucetResult,
    FundingReceipt, MemoryReceiptStore, NotificationSink, RateLimitStore, TxRef,
};

pub fn address(prefix: &str, seed: u8) -> String {
    let bytes = vec![seed; 20];
    bech32::encode(prefix, bytes.to_base32(), Variant::Bech32).unwrap()
}

pub fn ctx(message_id: &str, author_id: &str) -> ChatContext {
    ChatContext {
        message_id: message_id.to_string(),
        channel_id: "faucet".to_string(),
        guild_id: Some("guild".to_string()),
        author_id: author_id.to_string(),
        author_bot: false,
    }
}

pub fn dm(message_id: &str, author_id: &str) -> ChatContext {
    ChatContext {
        guild_id: None,
        ..ctx(message_id, author_id)
    }
}

pub fn config(pairs: &[(&str, &str)]) -> FaucetConfig {
    let mut env: HashMap<String, String> = [
        ("MNEMONIC", "abandon abandon abandon"),
        ("BOT_TOKEN", "secret"),
        ("CHAINS", r#"[{"prefix":"umee","rpc":"http://localhost:26657"}]"#),
        ("FUNDING", r#"{"umee":{"coins":"1000uumee","fees":"10uumee"}}"#),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in pairs {
        env.insert(k.to_string(), v.to_string());
    }
    FaucetConfig::from_lookup(|key| env.get(key).cloned()).unwrap()
}

/// One recorded `send_batch` call
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub transfers: Vec<(Address, CoinSet)>,
    pub fees: CoinSet,
}

pub struct MockChain {
    prefix: String,
    sent: Mutex<Vec<SentBatch>>,
    fail: AtomicBool,
    gate: Option<Arc<Notify>>,
}

impl MockChain {
    pub fn new(prefix: &str) -> Arc<Self> {
        trickle_common::logging::init_test_logging();
        Arc::new(Self {
            prefix: prefix.to_string(),
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            gate: None,
        })
    }

    pub fn failing(prefix: &str) -> Arc<Self> {
        let chain = Self::new(prefix);
        chain.fail.store(true, Ordering::SeqCst);
        chain
    }

    /// Every send blocks until `gate` is notified
    pub fn gated(prefix: &str, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.to_string(),
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            gate: Some(gate),
        })
    }

    pub fn sent(&self) -> Vec<SentBatch> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainSender for MockChain {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn send_batch(
        &self,
        transfers: &[(Address, CoinSet)],
        fees: &CoinSet,
    ) -> FaucetResult<TxRef> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let index = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(SentBatch {
                transfers: transfers.to_vec(),
                fees: fees.clone(),
            });
            sent.len()
        };

        if self.fail.load(Ordering::SeqCst) {
            return Err(FaucetError::TransactionFailed("insufficient funds".into()));
        }
        Ok(TxRef(format!("TX{}", index)))
    }

    async fn faucet_balance(&self) -> FaucetResult<String> {
        Ok("12.500000 UMEE".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ack(String),
    Success { message_id: String, tx: String },
    Failure { message_id: String, error: String },
    Status { message_id: String, balance: String },
    Help(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
    ack_delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acknowledgements take `delay`, like a slow chat API
    pub fn with_ack_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            ack_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn successes(&self) -> usize {
        self.count(|e| matches!(e, Event::Success { .. }))
    }

    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Failure { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> usize {
        self.count(|e| matches!(e, Event::Ack(_)))
    }

    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| f(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn acknowledge(&self, ctx: &ChatContext) {
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        self.push(Event::Ack(ctx.message_id.clone()));
    }

    async fn success(&self, ctx: &ChatContext, tx: &TxRef, _recipient: &Address, _amount: &CoinSet) {
        self.push(Event::Success {
            message_id: ctx.message_id.clone(),
            tx: tx.to_string(),
        });
    }

    async fn failure(&self, ctx: &ChatContext, error: &FaucetError) {
        self.push(Event::Failure {
            message_id: ctx.message_id.clone(),
            error: error.to_string(),
        });
    }

    async fn status(&self, ctx: &ChatContext, balance: &str) {
        self.push(Event::Status {
            message_id: ctx.message_id.clone(),
            balance: balance.to_string(),
        });
    }

    async fn help(&self, ctx: &ChatContext, _prefixes: &[String]) {
        self.push(Event::Help(ctx.message_id.clone()));
    }
}

/// Clock that only moves when told to
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Store whose reads always fail
pub struct BrokenStore;

#[async_trait]
impl RateLimitStore for BrokenStore {
    async fn get_receipt(&self, _: &str, _: &str) -> FaucetResult<Option<FundingReceipt>> {
        Err(FaucetError::InternalError("store offline".into()))
    }

    async fn save_receipt(&self, _: FundingReceipt) -> FaucetResult<()> {
        Err(FaucetError::InternalError("store offline".into()))
    }

    async fn prune_expired(&self, _: DateTime<Utc>) -> FaucetResult<usize> {
        Err(FaucetError::InternalError("store offline".into()))
    }
}

/// Memory store whose reads take `delay`
pub struct SlowStore {
    pub inner: MemoryReceiptStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryReceiptStore::new(),
            delay,
        })
    }
}

#[async_trait]
impl RateLimitStore for SlowStore {
    async fn get_receipt(
        &self,
        username: &str,
        chain_prefix: &str,
    ) -> FaucetResult<Option<FundingReceipt>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_receipt(username, chain_prefix).await
    }

    async fn save_receipt(&self, receipt: FundingReceipt) -> FaucetResult<()> {
        self.inner.save_receipt(receipt).await
    }

    async fn prune_expired(&self, before: DateTime<Utc>) -> FaucetResult<usize> {
        self.inner.prune_expired(before).await
    }
}

/// Let spawned tasks run until they are all waiting again
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock and let the workers react
pub async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    settle().await;
}
