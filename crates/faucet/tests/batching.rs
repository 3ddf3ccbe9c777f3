mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use trickle_common::CoinSet;
use trickle_faucet::chain::decode_bech32_address;
use trickle_faucet::{
    spawn_chain_worker, ChainSender, ChainWorkerHandle, FaucetRequest, NotificationSink,
    StatusRequest, WorkerSettings, WorkerTasks,
};

fn settings(max_batch_size: usize) -> WorkerSettings {
    WorkerSettings {
        batch_interval: Duration::from_secs(1),
        max_batch_size,
    }
}

fn start(
    chain: Arc<MockChain>,
    notifier: Arc<RecordingNotifier>,
    settings: WorkerSettings,
) -> (ChainWorkerHandle, WorkerTasks, CancellationToken) {
    let shutdown = CancellationToken::new();
    let chain: Arc<dyn ChainSender> = chain;
    let notifier: Arc<dyn NotificationSink> = notifier;
    let (handle, tasks) = spawn_chain_worker(chain, notifier, settings, shutdown.clone());
    (handle, tasks, shutdown)
}

fn request(seed: u8) -> FaucetRequest {
    FaucetRequest {
        recipient: decode_bech32_address("umee", &address("umee", seed)).unwrap(),
        amount: CoinSet::parse("1000uumee").unwrap(),
        fee: CoinSet::parse("10uumee").unwrap(),
        notify: ctx(&format!("m{}", seed), &format!("user{}", seed)),
    }
}

#[tokio::test(start_paused = true)]
async fn test_small_batch_flushes_on_tick() {
    let chain = MockChain::new("umee");
    let notifier = RecordingNotifier::new();
    let (handle, _tasks, _shutdown) = start(chain.clone(), notifier.clone(), settings(160));

    for seed in 0..5 {
        handle.submit(request(seed)).unwrap();
    }
    settle().await;
    assert!(chain.sent().is_empty());

    advance(Duration::from_secs(1)).await;

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].transfers.len(), 5);
    assert_eq!(sent[0].fees.to_string(), "50uumee");
    assert_eq!(notifier.successes(), 5);

    // Nothing pending, further ticks are no-ops
    advance(Duration::from_secs(3)).await;
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transfers_keep_arrival_order() {
    let chain = MockChain::new("umee");
    let notifier = RecordingNotifier::new();
    let (handle, _tasks, _shutdown) = start(chain.clone(), notifier, settings(160));

    for seed in [7, 3, 9] {
        handle.submit(request(seed)).unwrap();
    }
    settle().await;
    advance(Duration::from_secs(1)).await;

    let recipients: Vec<String> = chain.sent()[0]
        .transfers
        .iter()
        .map(|(address, _)| address.to_string())
        .collect();
    assert_eq!(
        recipients,
        vec![address("umee", 7), address("umee", 3), address("umee", 9)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_batches_flush_without_tick() {
    let chain = MockChain::new("umee");
    let notifier = RecordingNotifier::new();
    let (handle, _tasks, _shutdown) = start(chain.clone(), notifier.clone(), settings(3));

    for seed in 0..7 {
        handle.submit(request(seed)).unwrap();
    }
    settle().await;

    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|batch| batch.transfers.len() == 3));

    advance(Duration::from_secs(1)).await;
    let sent = chain.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].transfers.len(), 1);
    assert!(sent.iter().all(|batch| batch.transfers.len() <= 3));
    assert_eq!(notifier.successes(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_failure_fans_out_to_whole_batch() {
    let chain = MockChain::failing("umee");
    let notifier = RecordingNotifier::new();
    let (handle, _tasks, _shutdown) = start(chain.clone(), notifier.clone(), settings(160));

    for seed in 0..4 {
        handle.submit(request(seed)).unwrap();
    }
    settle().await;
    advance(Duration::from_secs(1)).await;

    assert_eq!(chain.sent().len(), 1);
    assert_eq!(notifier.successes(), 0);
    let failures = notifier.failures();
    assert_eq!(failures.len(), 4);
    assert!(failures.iter().all(|e| e.contains("insufficient funds")));

    // The worker keeps serving after a failed batch
    handle.submit(request(9)).unwrap();
    settle().await;
    advance(Duration::from_secs(1)).await;
    assert_eq!(chain.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_pending_once() {
    let chain = MockChain::new("umee");
    let notifier = RecordingNotifier::new();
    let (handle, tasks, shutdown) = start(chain.clone(), notifier.clone(), settings(160));

    for seed in 0..6 {
        handle.submit(request(seed)).unwrap();
    }
    settle().await;
    assert!(chain.sent().is_empty());

    shutdown.cancel();
    tasks.batch.await.unwrap();
    tasks.status.await.unwrap();

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].transfers.len(), 6);
    assert_eq!(notifier.successes(), 6);
    assert!(handle.submit(request(1)).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_without_pending_sends_nothing() {
    let chain = MockChain::new("umee");
    let notifier = RecordingNotifier::new();
    let (_handle, tasks, shutdown) = start(chain.clone(), notifier.clone(), settings(160));

    settle().await;
    shutdown.cancel();
    tasks.batch.await.unwrap();

    assert!(chain.sent().is_empty());
    assert!(notifier.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drain_respects_batch_cap() {
    let chain = MockChain::new("umee");
    let notifier = RecordingNotifier::new();
    let (handle, tasks, shutdown) = start(chain.clone(), notifier.clone(), settings(4));

    // Queued before the worker gets a chance to run
    for seed in 0..10 {
        handle.submit(request(seed)).unwrap();
    }
    shutdown.cancel();
    tasks.batch.await.unwrap();

    let sizes: Vec<usize> = chain.sent().iter().map(|b| b.transfers.len()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(notifier.successes(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_status_answered_while_flush_blocked() {
    let gate = Arc::new(Notify::new());
    let chain = MockChain::gated("umee", gate.clone());
    let notifier = RecordingNotifier::new();
    let (handle, _tasks, _shutdown) = start(chain.clone(), notifier.clone(), settings(160));

    handle.submit(request(1)).unwrap();
    settle().await;
    advance(Duration::from_secs(1)).await;
    assert!(chain.sent().is_empty());

    handle
        .request_status(StatusRequest {
            notify: ctx("status", "alice"),
        })
        .unwrap();
    settle().await;

    assert_eq!(
        notifier.events(),
        vec![Event::Status {
            message_id: "status".into(),
            balance: "12.500000 UMEE".into(),
        }]
    );

    gate.notify_one();
    settle().await;
    assert_eq!(chain.sent().len(), 1);
    assert_eq!(notifier.successes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_answers_queued_status() {
    let chain = MockChain::new("umee");
    let notifier = RecordingNotifier::new();
    let (handle, tasks, shutdown) = start(chain, notifier.clone(), settings(160));

    for id in ["s1", "s2"] {
        handle
            .request_status(StatusRequest {
                notify: ctx(id, "alice"),
            })
            .unwrap();
    }
    shutdown.cancel();
    tasks.status.await.unwrap();

    assert_eq!(notifier.count(|e| matches!(e, Event::Status { .. })), 2);
    assert!(handle
        .request_status(StatusRequest {
            notify: ctx("s3", "alice"),
        })
        .is_err());
}
