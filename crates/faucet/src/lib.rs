//! Chat-triggered, batched token faucet
//!
//! Chat messages arrive over HTTP and are turned into funding requests by
//! the [`Dispatcher`]. Accepted requests are queued on a per-chain
//! [`worker::BatchWorker`] which pays them with a single multi-send per
//! flush and reports the outcome back to every requester.

pub mod api;
pub mod chain;
pub mod command;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod worker;

pub use chain::{Address, ChainSender, RpcChainClient, TxRef};
pub use config::{ChainConfig, ChainFunding, FaucetConfig};
pub use database::{FundingReceipt, MemoryReceiptStore, RateLimitStore, SledReceiptStore};
pub use dispatcher::{ChainRoute, Clock, Dispatcher, SystemClock};
pub use error::{FaucetError, FaucetResult};
pub use notify::{ChatContext, NotificationSink, NotifierConfig, WebhookNotifier};
pub use worker::{
    spawn_chain_worker, ChainWorkerHandle, FaucetRequest, StatusRequest, WorkerSettings,
    WorkerState, WorkerTasks,
};
