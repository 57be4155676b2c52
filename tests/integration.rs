//! End-to-end tests: sync engine against the scripted chain, and the HTTP surface.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use tokio::sync::watch;

use pool_indexer::adapters::memory_store::InMemoryCheckpointStore;
use pool_indexer::adapters::merkle_tree::LocalMerkleTree;
use pool_indexer::adapters::mock_chain::MockChainSource;
use pool_indexer::crypto::{MimcSpongeHasher, PoseidonHasher};
use pool_indexer::domain::commitment::Commitment;
use pool_indexer::domain::field::FieldElement;
use pool_indexer::domain::nullifier::NullifierHash;
use pool_indexer::pool::{Pool, PoolHealth, PoolParams, SyncPhase};
use pool_indexer::ports::hasher::FieldHasher;
use pool_indexer::ports::store::CheckpointStore;
use pool_indexer::registry::PoolRegistry;
use pool_indexer::server;
use pool_indexer::sync::retry::RetryPolicy;
use pool_indexer::sync::{SyncEngine, SyncError, SyncSettings};

const POOL: Address = Address::repeat_byte(0x42);
const ROOT_AFTER_1_2_3: &str = "0x18afb6f6486ea5f4e4dd6d6ad51cc10e0a2cbdc4ba961044def8bd0e768d0d3e";

type Engine = SyncEngine<MockChainSource, InMemoryCheckpointStore>;

// ── Fixtures ──

fn settings() -> SyncSettings {
    SyncSettings {
        confirmations: 0,
        batch_size: 3,
        poll_interval: Duration::from_millis(10),
        checkpoint_interval: 1,
        reorder_window: 8,
        verify_root_on_chain: false,
        verify_nullifiers_on_chain: false,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
    }
}

fn params() -> PoolParams {
    let mut params = PoolParams::new(POOL, 4, FieldElement::from_seed("tornado"));
    params.deployment_block = 1;
    params
}

fn new_pool() -> Arc<Pool> {
    Arc::new(Pool::new(params()).unwrap())
}

fn engine(
    pool: Arc<Pool>,
    chain: Arc<MockChainSource>,
    store: Arc<InMemoryCheckpointStore>,
) -> Engine {
    SyncEngine::new(pool, chain, store, settings())
}

fn commitment(n: u64) -> Commitment {
    Commitment::from_u64(n)
}

/// Root of a depth-4 tornado-seeded tree holding `leaves`.
fn reference_root(leaves: &[u64]) -> FieldElement {
    let mut tree = LocalMerkleTree::new(
        4,
        FieldElement::from_seed("tornado"),
        Arc::new(MimcSpongeHasher::ready()),
        30,
    )
    .unwrap();
    tree.initialize().unwrap();
    for leaf in leaves {
        tree.insert_commitment(&commitment(*leaf)).unwrap();
    }
    tree.current_root().unwrap()
}

/// Poll `check` until it holds, failing the test after five seconds.
async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for: {what}");
}

async fn is_live_with(pool: &Pool, deposits: u64) -> bool {
    let status = pool.status().await;
    status.phase == SyncPhase::Live
        && status.health == PoolHealth::Healthy
        && status.deposits_count == deposits
}

// ── Historical sync ──

#[tokio::test]
async fn test_historical_sync_reproduces_contract_roots() {
    let chain = Arc::new(MockChainSource::new());
    for n in 1..=3 {
        chain.deposit(commitment(n)).await;
    }
    let pool = new_pool();
    let mut engine = engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default());

    let report = engine.sync_historical(1, chain.head().await).await.unwrap();
    assert_eq!(report.deposits, 3);

    let snapshot = pool.latest_root().await.unwrap();
    assert_eq!(snapshot.root, ROOT_AFTER_1_2_3.parse().unwrap());
    assert_eq!(snapshot.deposits_count, 3);
    assert_eq!(pool.status().await.last_synced_block, 3);

    for (index, leaf) in [1u64, 2, 3].iter().enumerate() {
        let path = pool.path(index as u64).await.unwrap();
        assert_eq!(path.path_elements.len(), 4);
        assert!(path.verify(&FieldElement::from_u64(*leaf), pool.hasher().as_ref()).unwrap());
    }
    // Every intermediate root stays known, like the contract's history.
    assert!(pool.is_known_root(&reference_root(&[1])).await);
    assert!(pool.is_known_root(&reference_root(&[1, 2])).await);
}

#[tokio::test]
async fn test_replaying_a_range_changes_nothing() {
    let chain = Arc::new(MockChainSource::new());
    for n in 1..=3 {
        chain.deposit(commitment(n)).await;
    }
    let nullifier = NullifierHash(B256::repeat_byte(0x07));
    chain.withdraw(nullifier).await;

    let pool = new_pool();
    let mut engine = engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default());
    engine.sync_historical(1, 4).await.unwrap();
    let root = pool.latest_root().await.unwrap();

    let replay = engine.sync_historical(1, 4).await.unwrap();
    assert_eq!(replay.deposits, 0);
    assert_eq!(replay.withdrawals, 0);
    assert_eq!(replay.duplicates, 4);
    assert_eq!(pool.latest_root().await.unwrap(), root);
    assert!(pool.is_spent(&nullifier).await);
}

#[tokio::test]
async fn test_logs_delivered_out_of_order_are_sequenced() {
    let chain = Arc::new(MockChainSource::new());
    chain
        .mine_deposits(&[commitment(1), commitment(2), commitment(3)])
        .await;
    chain.set_reverse_delivery(true).await;

    let pool = new_pool();
    let mut engine = engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default());
    engine.sync_historical(1, 1).await.unwrap();
    assert_eq!(pool.latest_root().await.unwrap().root, ROOT_AFTER_1_2_3.parse().unwrap());
}

#[tokio::test]
async fn test_pushed_deposits_wait_for_their_predecessor() {
    let chain = Arc::new(MockChainSource::new());
    let first = chain.deposit(commitment(1)).await;
    let second = chain.deposit(commitment(2)).await;
    let third = chain.deposit(commitment(3)).await;

    let pool = new_pool();
    let mut engine = engine(Arc::clone(&pool), chain, Arc::default());

    engine.ingest(third.into()).await.unwrap();
    engine.ingest(second.into()).await.unwrap();
    assert_eq!(pool.status().await.deposits_count, 0);
    assert_eq!(engine.buffered(), 2);

    let report = engine.ingest(first.into()).await.unwrap();
    assert_eq!(report.deposits, 3);
    assert_eq!(pool.latest_root().await.unwrap().root, ROOT_AFTER_1_2_3.parse().unwrap());
}

#[tokio::test]
async fn test_transient_fetch_failures_are_retried() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;
    chain.fail_next_fetches(2).await;

    let pool = new_pool();
    let mut engine = engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default());
    engine.sync_historical(1, 1).await.unwrap();
    assert_eq!(chain.fetch_calls().await, 3);
    assert_eq!(pool.status().await.deposits_count, 1);
}

#[tokio::test]
async fn test_exhausted_retries_surface_a_transient_error() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;
    chain.fail_next_fetches(3).await;

    let pool = new_pool();
    let mut engine = engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default());
    let err = engine.sync_historical(1, 1).await.unwrap_err();
    assert!(matches!(err, SyncError::Chain(_)));
    assert_eq!(pool.status().await.last_synced_block, 0);
}

// ── Running engine ──

#[tokio::test]
async fn test_engine_degrades_on_rpc_outage_and_recovers() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;
    chain.fail_next_fetches(usize::MAX).await;

    let pool = new_pool();
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(
        engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default())
            .with_shutdown(shutdown)
            .run(),
    );

    eventually("pool degraded", || async {
        matches!(pool.status().await.health, PoolHealth::Degraded(_))
    })
    .await;

    chain.fail_next_fetches(0).await;
    eventually("pool recovered", || is_live_with(&pool, 1)).await;

    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_engine_follows_new_deposits_and_withdrawals() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;

    let pool = new_pool();
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(
        engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default())
            .with_shutdown(shutdown)
            .run(),
    );
    eventually("initial backfill", || is_live_with(&pool, 1)).await;

    chain.deposit(commitment(2)).await;
    chain.deposit(commitment(3)).await;
    let nullifier = NullifierHash(B256::repeat_byte(0x09));
    chain.withdraw(nullifier).await;

    eventually("live deposits applied", || is_live_with(&pool, 3)).await;
    eventually("withdrawal applied", || pool.is_spent(&nullifier)).await;
    assert_eq!(pool.latest_root().await.unwrap().root, ROOT_AFTER_1_2_3.parse().unwrap());

    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_confirmations_hold_back_recent_blocks() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;
    chain.deposit(commitment(2)).await;

    let pool = new_pool();
    let mut settings = settings();
    settings.confirmations = 1;
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(
        SyncEngine::new(
            Arc::clone(&pool),
            Arc::clone(&chain),
            Arc::new(InMemoryCheckpointStore::new()),
            settings,
        )
        .with_shutdown(shutdown)
            .run(),
    );

    eventually("first block confirmed", || is_live_with(&pool, 1)).await;
    chain.advance(1).await;
    eventually("second block confirmed", || is_live_with(&pool, 2)).await;

    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_repeated_gaps_halt_the_pool() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;
    // Leaf 1 never shows up.
    chain.inject_deposit(commitment(3), 2).await;

    let pool = new_pool();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default()).run(),
    )
    .await
    .expect("engine should halt");

    assert!(matches!(
        result,
        Err(SyncError::SyncGapDetected { expected: 1, found: 2 })
    ));
    assert!(matches!(pool.status().await.health, PoolHealth::Halted(_)));
    // Leaf 0 stays; nothing was skipped over the hole.
    assert_eq!(pool.status().await.deposits_count, 1);
    assert!(chain.fetch_calls().await >= 3);
}

#[tokio::test]
async fn test_reorg_rebuilds_from_deployment() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;
    chain.deposit(commitment(2)).await;

    let pool = new_pool();
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(
        engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default())
            .with_shutdown(shutdown)
            .run(),
    );
    eventually("initial backfill", || is_live_with(&pool, 2)).await;

    let orphaned = chain.reorg(2).await;
    assert_eq!(orphaned.len(), 1);
    chain.deposit(commitment(9)).await;

    eventually("replacement deposit applied", || async {
        is_live_with(&pool, 2).await && pool.deposit(&commitment(9)).await.is_some()
    })
    .await;

    assert!(pool.deposit(&commitment(2)).await.is_none());
    assert_eq!(pool.deposit(&commitment(9)).await.unwrap().leaf_index, 1);
    assert_eq!(pool.latest_root().await.unwrap().root, reference_root(&[1, 9]));
    assert!(!pool.is_known_root(&reference_root(&[1, 2])).await);

    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_null_block_hash_is_not_a_reorg() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;
    chain.deposit(commitment(2)).await;
    let store = Arc::new(InMemoryCheckpointStore::new());

    let pool = new_pool();
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(
        engine(Arc::clone(&pool), Arc::clone(&chain), Arc::clone(&store))
            .with_shutdown(shutdown)
            .run(),
    );
    eventually("initial backfill", || is_live_with(&pool, 2)).await;
    let fetches = chain.fetch_calls().await;

    // One lagging node answers `null` for the newest applied block.
    chain.miss_next_block_hashes(1).await;
    let calls = chain.block_hash_calls().await;
    eventually("canonical check ran again", || async {
        chain.block_hash_calls().await >= calls + 3
    })
    .await;

    assert!(is_live_with(&pool, 2).await);
    assert_eq!(chain.fetch_calls().await, fetches);
    assert_eq!(store.load(POOL).await.unwrap().unwrap().deposits.len(), 2);

    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
}

// ── Checkpoints ──

#[tokio::test]
async fn test_shutdown_checkpoints_and_restart_resumes() {
    let chain = Arc::new(MockChainSource::new());
    for n in 1..=3 {
        chain.deposit(commitment(n)).await;
    }
    let nullifier = NullifierHash(B256::repeat_byte(0x05));
    chain.withdraw(nullifier).await;
    let store = Arc::new(InMemoryCheckpointStore::new());

    let pool = new_pool();
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(
        engine(Arc::clone(&pool), Arc::clone(&chain), Arc::clone(&store))
            .with_shutdown(shutdown)
            .run(),
    );
    eventually("backfill", || is_live_with(&pool, 3)).await;
    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("engine should stop")
        .unwrap()
        .unwrap();

    let checkpoint = store.load(POOL).await.unwrap().expect("checkpoint saved");
    assert_eq!(checkpoint.last_synced_block, 4);
    assert_eq!(checkpoint.deposits.len(), 3);
    assert_eq!(checkpoint.nullifiers, vec![nullifier]);
    assert_eq!(checkpoint.root, ROOT_AFTER_1_2_3.parse().unwrap());

    // A fresh process: restore alone brings the pool back.
    let restarted = new_pool();
    let mut engine2 = engine(Arc::clone(&restarted), Arc::clone(&chain), Arc::clone(&store));
    engine2.restore().await.unwrap();
    let status = restarted.status().await;
    assert_eq!(status.deposits_count, 3);
    assert_eq!(status.last_synced_block, 4);
    assert_eq!(status.phase, SyncPhase::Backfilling);
    assert!(restarted.is_spent(&nullifier).await);

    // Then it only fetches what's new.
    chain.deposit(commitment(4)).await;
    let fetches_before = chain.fetch_calls().await;
    let report = engine2.sync_historical(5, 5).await.unwrap();
    assert_eq!(report.deposits, 1);
    assert_eq!(chain.fetch_calls().await, fetches_before + 1);
    assert_eq!(
        restarted.latest_root().await.unwrap().root,
        reference_root(&[1, 2, 3, 4])
    );
}

#[tokio::test]
async fn test_checkpoint_for_another_tree_is_rejected() {
    let chain = Arc::new(MockChainSource::new());
    chain.deposit(commitment(1)).await;
    let store = Arc::new(InMemoryCheckpointStore::new());

    // Valid checkpoint from a synced pool, then tamper with it.
    let source = new_pool();
    engine(Arc::clone(&source), Arc::clone(&chain), Arc::clone(&store))
        .sync_historical(1, 1)
        .await
        .unwrap();
    let mut checkpoint = source.checkpoint().await.unwrap();
    checkpoint.depth = 5;
    store.put(checkpoint.clone()).await;

    let pool = new_pool();
    let result = engine(Arc::clone(&pool), Arc::clone(&chain), Arc::clone(&store)).run().await;
    assert!(matches!(result, Err(SyncError::CheckpointMismatch(_))));
    assert!(matches!(pool.status().await.health, PoolHealth::Halted(_)));

    checkpoint.depth = 4;
    checkpoint.root = FieldElement::from_u64(42);
    store.put(checkpoint).await;
    let mut engine = engine(new_pool(), chain, store);
    assert!(matches!(
        engine.restore().await,
        Err(SyncError::CheckpointMismatch(_))
    ));
}

// ── Hasher compatibility ──

#[tokio::test]
async fn test_hasher_contract_must_agree_with_native_backend() {
    let poseidon = PoseidonHasher::new();
    poseidon.initialize().unwrap();
    let chain = Arc::new(MockChainSource::new().with_contract_hasher(Arc::new(poseidon)));

    let pool = new_pool();
    let result = engine(Arc::clone(&pool), chain, Arc::default()).run().await;
    assert!(matches!(result, Err(SyncError::HasherMismatch { .. })));
    assert!(matches!(pool.status().await.health, PoolHealth::Halted(_)));

    let contract = Arc::new(MimcSpongeHasher::ready());
    let chain = Arc::new(MockChainSource::new().with_contract_hasher(contract));
    engine(new_pool(), chain, Arc::default())
        .verify_hasher()
        .await
        .unwrap();
}

// ── HTTP ──

#[tokio::test]
async fn test_http_serves_proof_inputs() {
    let chain = Arc::new(MockChainSource::new());
    for n in 1..=3 {
        chain.deposit(commitment(n)).await;
    }
    let nullifier = NullifierHash(B256::repeat_byte(0x0d));
    chain.withdraw(nullifier).await;

    let pool = new_pool();
    engine(Arc::clone(&pool), Arc::clone(&chain), Arc::default())
        .sync_historical(1, 4)
        .await
        .unwrap();
    pool.set_phase(SyncPhase::Live).await;

    let mut registry = PoolRegistry::new();
    registry.register(Arc::clone(&pool)).unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let (handle, addr) = server::start_server(
        Arc::new(registry),
        "127.0.0.1:0".parse().unwrap(),
        async move {
            let _ = stopped.await;
        },
    )
    .await
    .expect("server should start");

    let client = reqwest::Client::new();
    let base = format!("http://{addr}/pool/{POOL}");
    let get = |url: String| {
        let client = client.clone();
        async move {
            let resp = client.get(url).send().await.expect("request should succeed");
            let status = resp.status().as_u16();
            let body: serde_json::Value = resp.json().await.unwrap();
            (status, body)
        }
    };

    // /health
    let (status, body) = get(format!("http://{addr}/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body[0]["phase"], "live");
    assert_eq!(body[0]["health"]["status"], "healthy");
    assert_eq!(body[0]["depositsCount"], 3);
    assert_eq!(body[0]["lastSyncedBlock"], 4);

    // Latest root
    let (status, body) = get(format!("{base}/root/latest")).await;
    assert_eq!(status, 200);
    assert_eq!(body["root"], ROOT_AFTER_1_2_3);
    assert_eq!(body["depositsCount"], 3);

    // Path
    let (status, body) = get(format!("{base}/path/1")).await;
    assert_eq!(status, 200);
    assert_eq!(body["pathIndices"], serde_json::json!([1, 0, 0, 0]));
    assert_eq!(body["pathElements"].as_array().unwrap().len(), 4);
    assert_eq!(body["pathElements"][0], FieldElement::from_u64(1).to_string());
    assert_eq!(body["root"], ROOT_AFTER_1_2_3);

    let (status, _) = get(format!("{base}/path/7")).await;
    assert_eq!(status, 404);
    let (status, body) = get(format!("{base}/path/one")).await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    pool.set_phase(SyncPhase::Backfilling).await;
    let (status, _) = get(format!("{base}/path/7")).await;
    assert_eq!(status, 503);
    let (status, _) = get(format!("{base}/path/16")).await;
    assert_eq!(status, 404);
    pool.set_phase(SyncPhase::Live).await;

    // Nullifiers, short hex accepted
    let (status, body) = get(format!("{base}/nullifier/{nullifier}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["isSpent"], true);
    let (_, body) = get(format!("{base}/nullifier/0x1")).await;
    assert_eq!(body["isSpent"], false);
    let (status, _) = get(format!("{base}/nullifier/0xnothex")).await;
    assert_eq!(status, 400);

    // Deposits
    let (status, body) = get(format!("{base}/deposit/0x2")).await;
    assert_eq!(status, 200);
    assert_eq!(body["leafIndex"], 1);
    assert_eq!(body["blockNumber"], 2);
    assert_eq!(body["timestamp"], 1_700_000_024u64);
    let (status, _) = get(format!("{base}/deposit/0x99")).await;
    assert_eq!(status, 404);

    // Root window
    let (_, body) = get(format!("{base}/root/{}/known", reference_root(&[1]))).await;
    assert_eq!(body["isKnown"], true);
    let (_, body) = get(format!("{base}/root/0x1234/known")).await;
    assert_eq!(body["isKnown"], false);

    // Unknown or malformed pool
    let other = Address::repeat_byte(0x43);
    let (status, _) = get(format!("http://{addr}/pool/{other}/root/latest")).await;
    assert_eq!(status, 404);
    let (status, _) = get(format!("http://{addr}/pool/0x1234/root/latest")).await;
    assert_eq!(status, 400);

    stop.send(()).unwrap();
    handle.await.unwrap();
}
