//! End-to-end session scenarios over loopback UDP.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tempfile::TempDir;

use swiftlet_core::{Error, Leecher, LeecherConfig, SessionError};
use swiftlet_integration_tests::{
    seed_one_file, spawn_half_dead_seeder, spawn_proxy, spawn_seeder, write_fixture,
};

const CHUNK: u32 = 1024;
const TIMEOUT: Duration = Duration::from_secs(5);

fn leecher_config(seeder: std::net::SocketAddr, root: [u8; 20]) -> LeecherConfig {
    let mut config = LeecherConfig::new(seeder, root);
    config.timeout = TIMEOUT;
    config
}

/// Small file, one batch: 3072 bytes at chunk size 1024 is exactly one
/// REQUEST, one INTEGRITY with 3 hashes, 3 DATA, 3 ACK, one finish.
#[tokio::test]
async fn test_small_file_single_batch() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "small.bin", 3072);
    let (_seeder, seeder_addr, seeder_task, root) = seed_one_file(&path, CHUNK, TIMEOUT).await;
    let (proxy_addr, counters, proxy_task) = spawn_proxy(seeder_addr, None).await;

    let mut leecher = Leecher::new(leecher_config(proxy_addr, root)).unwrap();
    let meta = leecher.get_metadata().await.unwrap();
    assert_eq!(meta.file_size, 3072);
    assert_eq!(meta.num_chunks(), 3);
    assert_eq!(meta.file_name, "small.bin");

    let expected = leecher.prepare_range(0, 2).unwrap();
    assert_eq!(expected, 3072);

    let fetched = leecher.fetch_to_vec().await.unwrap();
    assert_eq!(fetched, data);

    assert_eq!(counters.handshake_inits.load(Ordering::Relaxed), 1);
    assert_eq!(counters.requests.load(Ordering::Relaxed), 1);
    assert_eq!(counters.integrity.load(Ordering::Relaxed), 1);
    assert_eq!(counters.data.load(Ordering::Relaxed), 3);
    assert_eq!(counters.acks.load(Ordering::Relaxed), 3);
    assert_eq!(counters.handshake_finishes.load(Ordering::Relaxed), 1);

    seeder_task.abort();
    proxy_task.abort();
}

/// Non-power-of-two chunk count: the last chunk is short and the tree is
/// padded with a zero leaf.
#[tokio::test]
async fn test_non_power_of_two_padding() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "odd.bin", 2500);
    let (seeder, seeder_addr, seeder_task, root) = seed_one_file(&path, CHUNK, TIMEOUT).await;

    // nc = 3, nl = 4; leaf 3 is padding.
    let shared = seeder.shared_files().pop().unwrap();
    assert_eq!(shared.nc, 3);
    assert_eq!(shared.nl, 4);
    assert_eq!(shared.tree.leaf_sha(3), [0u8; 20]);

    let mut leecher = Leecher::new(leecher_config(seeder_addr, root)).unwrap();
    let meta = leecher.get_metadata().await.unwrap();
    assert_eq!(meta.file_size, 2500);

    leecher.prepare_range(0, 2).unwrap();
    let fetched = leecher.fetch_to_vec().await.unwrap();
    assert_eq!(fetched.len(), 2500);
    assert_eq!(fetched, data);

    seeder_task.abort();
}

/// Mid-transfer corruption: a flipped payload bit in chunk 1 draws no
/// ACK; the chunk is re-requested and the transfer still completes.
#[tokio::test]
async fn test_corrupted_chunk_is_rerequested() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "corrupt.bin", 3072);
    let (_seeder, seeder_addr, seeder_task, root) = seed_one_file(&path, CHUNK, TIMEOUT).await;
    let (proxy_addr, counters, proxy_task) = spawn_proxy(seeder_addr, Some(1)).await;

    let mut leecher = Leecher::new(leecher_config(proxy_addr, root)).unwrap();
    leecher.get_metadata().await.unwrap();
    leecher.prepare_range(0, 2).unwrap();
    let fetched = leecher.fetch_to_vec().await.unwrap();
    assert_eq!(fetched, data);

    // Chunk 1 went over twice; the corrupted copy was never acknowledged.
    assert_eq!(counters.requests.load(Ordering::Relaxed), 2);
    assert_eq!(counters.data.load(Ordering::Relaxed), 4);
    assert_eq!(counters.acks.load(Ordering::Relaxed), 3);

    seeder_task.abort();
    proxy_task.abort();
}

/// Seeder failover: the primary completes the handshake then goes
/// silent; the leecher times out and finishes the download from the
/// configured alternative.
#[tokio::test]
async fn test_seeder_failover() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "failover.bin", 8 * 1024);
    let (seeder, alt_addr, seeder_task, root) =
        seed_one_file(&path, CHUNK, Duration::from_secs(10)).await;

    let shared = seeder.shared_files().pop().unwrap();
    let (primary_addr, primary_task) =
        spawn_half_dead_seeder(CHUNK, shared.file_size, shared.file_name(), shared.nc).await;

    let mut config = LeecherConfig::new(primary_addr, root);
    config.timeout = Duration::from_millis(400);
    config.alt_seeders = vec![alt_addr];

    let mut leecher = Leecher::new(config).unwrap();
    leecher.get_metadata().await.unwrap();
    leecher.prepare_range(0, 7).unwrap();
    let fetched = leecher.fetch_to_vec().await.unwrap();
    assert_eq!(fetched, data);
    assert!(leecher.all_chunks_downloaded());

    primary_task.abort();
    seeder_task.abort();
}

/// Timeout without alternatives is fatal.
#[tokio::test]
async fn test_timeout_without_alternatives() {
    let dir = TempDir::new().unwrap();
    let (path, _) = write_fixture(&dir, "stall.bin", 2048);

    // Derive real metadata, then serve only the handshake.
    let shared = swiftlet_files::SharedFile::build(&path, CHUNK).unwrap();
    let (primary_addr, primary_task) =
        spawn_half_dead_seeder(CHUNK, shared.file_size, shared.file_name(), shared.nc).await;

    let mut config = LeecherConfig::new(primary_addr, shared.root_hash);
    config.timeout = Duration::from_millis(300);

    let mut leecher = Leecher::new(config).unwrap();
    leecher.get_metadata().await.unwrap();
    leecher.prepare_range(0, 1).unwrap();
    match leecher.fetch_to_vec().await {
        Err(Error::Session(SessionError::Timeout)) => {}
        other => panic!("expected timeout, got {other:?}"),
    }

    primary_task.abort();
}

/// File-not-found: a demanded hash with no catalog entry surfaces as
/// `FileNotFound` after the zero-size handshake reply.
#[tokio::test]
async fn test_file_not_found() {
    let dir = TempDir::new().unwrap();
    let (path, _) = write_fixture(&dir, "present.bin", 2048);
    let (_seeder, seeder_addr, seeder_task, _root) = seed_one_file(&path, CHUNK, TIMEOUT).await;

    let mut leecher = Leecher::new(leecher_config(seeder_addr, [0u8; 20])).unwrap();
    match leecher.get_metadata().await {
        Err(Error::Session(SessionError::FileNotFound)) => {}
        other => panic!("expected FileNotFound, got {other:?}"),
    }

    seeder_task.abort();
}

/// Range fetch: only the requested window is transferred; everything
/// outside it stays undownloaded.
#[tokio::test]
async fn test_range_fetch() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "range.bin", 10 * 1024);
    let (_seeder, seeder_addr, seeder_task, root) = seed_one_file(&path, CHUNK, TIMEOUT).await;

    let mut leecher = Leecher::new(leecher_config(seeder_addr, root)).unwrap();
    leecher.get_metadata().await.unwrap();

    let expected = leecher.prepare_range(3, 6).unwrap();
    assert_eq!(expected, 4096);

    let fetched = leecher.fetch_to_vec().await.unwrap();
    assert_eq!(fetched.len(), 4096);
    assert_eq!(fetched, &data[3072..7168]);
    assert!(!leecher.all_chunks_downloaded());

    seeder_task.abort();
}

/// Idempotent completion: once everything is downloaded, preparing the
/// same range yields an empty schedule and fetch touches the network not
/// at all (the seeder is gone and fetch still succeeds).
#[tokio::test]
async fn test_idempotent_completion() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "done.bin", 4096);
    let (_seeder, seeder_addr, seeder_task, root) = seed_one_file(&path, CHUNK, TIMEOUT).await;

    let mut leecher = Leecher::new(leecher_config(seeder_addr, root)).unwrap();
    leecher.get_metadata().await.unwrap();
    leecher.prepare_range(0, 3).unwrap();
    let fetched = leecher.fetch_to_vec().await.unwrap();
    assert_eq!(fetched, data);
    assert!(leecher.all_chunks_downloaded());

    // No seeder any more; a re-fetch must not need one.
    seeder_task.abort();

    let expected = leecher.prepare_range(0, 3).unwrap();
    assert_eq!(expected, 0);
    let refetched = leecher.fetch_to_vec().await.unwrap();
    assert!(refetched.is_empty());
}

/// Fetch into a file sink.
#[tokio::test]
async fn test_fetch_to_file() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "tofile.bin", 5000);
    let (_seeder, seeder_addr, seeder_task, root) = seed_one_file(&path, CHUNK, TIMEOUT).await;

    let mut leecher = Leecher::new(leecher_config(seeder_addr, root)).unwrap();
    let meta = leecher.get_metadata().await.unwrap();
    leecher.prepare_range(0, meta.end_chunk).unwrap();

    let out_path = dir.path().join("out.bin");
    let mut out = std::fs::File::create(&out_path).unwrap();
    let written = leecher.fetch_to_file(&mut out).await.unwrap();
    drop(out);

    assert_eq!(written, 5000);
    assert_eq!(std::fs::read(&out_path).unwrap(), data);

    seeder_task.abort();
}

/// PEX: a seeder with configured alternatives answers PEX_REQ, and the
/// leecher learns them.
#[tokio::test]
async fn test_pex_response_learned() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "pex.bin", 2048);
    let (seeder, seeder_addr, seeder_task, root) = seed_one_file(&path, CHUNK, TIMEOUT).await;

    let advertised: std::net::SocketAddrV4 = "127.0.0.1:45678".parse().unwrap();
    seeder.add_seeder(advertised);

    let mut leecher = Leecher::new(leecher_config(seeder_addr, root)).unwrap();
    leecher.get_metadata().await.unwrap();
    leecher.prepare_range(0, 1).unwrap();
    let fetched = leecher.fetch_to_vec().await.unwrap();
    assert_eq!(fetched, data);

    assert!(leecher
        .known_alt_seeders()
        .contains(&std::net::SocketAddr::V4(advertised)));

    seeder_task.abort();
}

/// Two leechers against one seeder, sequentially sharing the same
/// dispatcher socket.
#[tokio::test]
async fn test_two_leechers() {
    let dir = TempDir::new().unwrap();
    let (path, data) = write_fixture(&dir, "two.bin", 6 * 1024);
    let (_seeder, seeder_addr, seeder_task, root) = seed_one_file(&path, CHUNK, TIMEOUT).await;

    for _ in 0..2 {
        let mut leecher = Leecher::new(leecher_config(seeder_addr, root)).unwrap();
        let meta = leecher.get_metadata().await.unwrap();
        leecher.prepare_range(0, meta.end_chunk).unwrap();
        let fetched = leecher.fetch_to_vec().await.unwrap();
        assert_eq!(fetched, data);
        leecher.close().await.unwrap();
    }

    seeder_task.abort();
}
