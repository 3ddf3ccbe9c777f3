//! Per-chain batching worker
//!
//! Each configured chain gets two tasks: a batch task that accumulates
//! funding requests and pays them with one multi-send, and a status task
//! that answers balance queries without waiting for a flush in progress.

use crate::chain::{Address, ChainSender};
use crate::error::{FaucetError, FaucetResult};
use crate::notify::{ChatContext, NotificationSink};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trickle_common::CoinSet;

/// Accepted funding request waiting for the next flush
#[derive(Debug, Clone)]
pub struct FaucetRequest {
    pub recipient: Address,
    pub amount: CoinSet,
    pub fee: CoinSet,
    pub notify: ChatContext,
}

/// Balance query for a chain's faucet account
#[derive(Debug, Clone)]
pub struct StatusRequest {
    pub notify: ChatContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Accumulating,
    Flushing,
    ShuttingDown,
}

/// Batching parameters shared by every chain worker
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub batch_interval: Duration,
    pub max_batch_size: usize,
}

/// Enqueue side of a chain worker
#[derive(Debug, Clone)]
pub struct ChainWorkerHandle {
    prefix: String,
    requests: UnboundedSender<FaucetRequest>,
    status: UnboundedSender<StatusRequest>,
}

impl ChainWorkerHandle {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn submit(&self, request: FaucetRequest) -> FaucetResult<()> {
        self.requests
            .send(request)
            .map_err(|_| FaucetError::WorkerUnavailable(self.prefix.clone()))
    }

    pub fn request_status(&self, request: StatusRequest) -> FaucetResult<()> {
        self.status
            .send(request)
            .map_err(|_| FaucetError::WorkerUnavailable(self.prefix.clone()))
    }
}

/// Join handles of a chain's tasks
pub struct WorkerTasks {
    pub prefix: String,
    pub batch: JoinHandle<()>,
    pub status: JoinHandle<()>,
}

/// Start the batch and status tasks for one chain
pub fn spawn_chain_worker(
    chain: Arc<dyn ChainSender>,
    notifier: Arc<dyn NotificationSink>,
    settings: WorkerSettings,
    shutdown: CancellationToken,
) -> (ChainWorkerHandle, WorkerTasks) {
    let prefix = chain.prefix().to_string();
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = mpsc::unbounded_channel();

    let worker = BatchWorker::new(chain.clone(), notifier.clone(), settings, request_rx);
    let batch = tokio::spawn(worker.run(shutdown.clone()));
    let status = tokio::spawn(run_status(chain, notifier, status_rx, shutdown));

    let handle = ChainWorkerHandle {
        prefix: prefix.clone(),
        requests: request_tx,
        status: status_tx,
    };
    (handle, WorkerTasks { prefix, batch, status })
}

/// Accumulates requests for one chain and flushes them as batches
pub struct BatchWorker {
    prefix: String,
    chain: Arc<dyn ChainSender>,
    notifier: Arc<dyn NotificationSink>,
    settings: WorkerSettings,
    requests: UnboundedReceiver<FaucetRequest>,
    pending: Vec<FaucetRequest>,
    state: WorkerState,
    /// Timer armed when the worker is created
    first_tick: Instant,
}

impl BatchWorker {
    pub fn new(
        chain: Arc<dyn ChainSender>,
        notifier: Arc<dyn NotificationSink>,
        settings: WorkerSettings,
        requests: UnboundedReceiver<FaucetRequest>,
    ) -> Self {
        Self {
            prefix: chain.prefix().to_string(),
            chain,
            notifier,
            settings,
            requests,
            pending: Vec::with_capacity(settings.max_batch_size),
            state: WorkerState::Idle,
            first_tick: Instant::now() + settings.batch_interval,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting {} worker", self.prefix);

        let mut ticker = interval_at(self.first_tick, self.settings.batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.drain().await;
                    break;
                }

                request = self.requests.recv() => match request {
                    Some(request) => {
                        if self.enqueue(request).await {
                            ticker.reset();
                        }
                    }
                    None => {
                        warn!("{} worker request queue closed", self.prefix);
                        self.drain().await;
                        break;
                    }
                },

                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }

        info!("{} worker stopped", self.prefix);
    }

    /// Append a request, flushing when the batch is full. Returns whether a
    /// flush happened.
    async fn enqueue(&mut self, request: FaucetRequest) -> bool {
        debug!(
            "{} worker NEW request for {} ({} pending)",
            self.prefix,
            request.recipient,
            self.pending.len() + 1
        );
        self.pending.push(request);
        self.state = WorkerState::Accumulating;

        if self.pending.len() >= self.settings.max_batch_size {
            self.flush().await;
            return true;
        }
        false
    }

    /// Flush everything that is already queued, then stop accepting
    async fn drain(&mut self) {
        self.state = WorkerState::ShuttingDown;
        self.requests.close();

        while let Ok(request) = self.requests.try_recv() {
            self.pending.push(request);
            if self.pending.len() >= self.settings.max_batch_size {
                self.flush().await;
                self.state = WorkerState::ShuttingDown;
            }
        }

        if !self.pending.is_empty() {
            info!(
                "{} worker flushing {} requests before shutdown",
                self.prefix,
                self.pending.len()
            );
            self.flush().await;
        }
        self.state = WorkerState::ShuttingDown;
    }

    async fn flush(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        self.state = WorkerState::Flushing;

        let transfers: Vec<(Address, CoinSet)> = batch
            .iter()
            .map(|r| (r.recipient.clone(), r.amount.clone()))
            .collect();
        let fees = batch
            .iter()
            .try_fold(CoinSet::new(), |acc, r| acc.add(&r.fee))
            .map_err(|e| FaucetError::InternalError(format!("batch fee overflow: {}", e)));

        info!("{} worker sending batch of {}", self.prefix, batch.len());
        let result = match fees {
            Ok(fees) => self.chain.send_batch(&transfers, &fees).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(tx) => {
                info!("{} batch of {} included in {}", self.prefix, batch.len(), tx);
                join_all(
                    batch
                        .iter()
                        .map(|r| self.notifier.success(&r.notify, &tx, &r.recipient, &r.amount)),
                )
                .await;
            }
            Err(e) => {
                error!("{} batch of {} failed: {}", self.prefix, batch.len(), e);
                join_all(batch.iter().map(|r| self.notifier.failure(&r.notify, &e))).await;
            }
        }

        self.state = WorkerState::Idle;
    }
}

async fn run_status(
    chain: Arc<dyn ChainSender>,
    notifier: Arc<dyn NotificationSink>,
    mut requests: UnboundedReceiver<StatusRequest>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                requests.close();
                while let Ok(request) = requests.try_recv() {
                    answer_status(chain.as_ref(), notifier.as_ref(), request).await;
                }
                break;
            }

            request = requests.recv() => match request {
                Some(request) => answer_status(chain.as_ref(), notifier.as_ref(), request).await,
                None => break,
            },
        }
    }
    debug!("{} status task stopped", chain.prefix());
}

async fn answer_status(
    chain: &dyn ChainSender,
    notifier: &dyn NotificationSink,
    request: StatusRequest,
) {
    match chain.faucet_balance().await {
        Ok(balance) => notifier.status(&request.notify, &balance).await,
        Err(e) => {
            error!("{} status query failed: {}", chain.prefix(), e);
            notifier.failure(&request.notify, &e).await;
        }
    }
}
