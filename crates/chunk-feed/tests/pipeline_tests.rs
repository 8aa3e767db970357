//! Notification -> reassembly -> fetch -> decode -> publish, end to end.

mod common;

use bytes::Bytes;
use object_store::memory::InMemory;
use std::sync::Arc;

use chunk_feed::{FeedConfig, PublisherState, RadarFeed, RadialSubscription, SharedRadial};
use common::{
    azimuths, eventually, fast_config, recv_within, MockDecoder, MockFetcher, MockSubscriber,
};
use level2_decoder::Level2Decoder;
use radar_common::MomentKind;
use storage::{ChunkStore, ObjectStorage};
use test_utils::{chunk_key, sample_chunk, sample_start_chunk, sites};

struct Pipeline {
    feed: RadarFeed,
    subscriber: Arc<MockSubscriber>,
    fetcher: Arc<MockFetcher>,
    decoder: Arc<MockDecoder>,
}

async fn pipeline(config: FeedConfig) -> Pipeline {
    let subscriber = MockSubscriber::new();
    let fetcher = MockFetcher::new();
    let decoder = MockDecoder::new();
    let feed = RadarFeed::new(
        config,
        subscriber.clone(),
        fetcher.clone(),
        decoder.clone(),
    )
    .unwrap();
    feed.start().await.unwrap();

    Pipeline {
        feed,
        subscriber,
        fetcher,
        decoder,
    }
}

async fn collect(subscription: &mut RadialSubscription, n: usize) -> Vec<SharedRadial> {
    let mut records = Vec::with_capacity(n);
    for _ in 0..n {
        let record = recv_within(subscription.recv()).await.expect("feed closed");
        records.push(record);
    }
    records
}

#[tokio::test]
async fn test_radials_published_in_chunk_order() {
    let p = pipeline(fast_config(&[sites::KTLX])).await;
    let mut subscription = p.feed.subscribe(sites::KTLX).await.unwrap();
    let stream = p.subscriber.latest_stream();

    let keys = [
        chunk_key(sites::KTLX, 5, 1, 'S'),
        chunk_key(sites::KTLX, 5, 3, 'I'),
        chunk_key(sites::KTLX, 5, 2, 'I'),
        chunk_key(sites::KTLX, 5, 4, 'E'),
    ];
    stream.push_keys(&keys);

    let records = collect(&mut subscription, 4).await;
    assert_eq!(azimuths(&records), vec![1, 2, 3, 4]);
    assert!(records.iter().all(|r| r.site_id == "KTLX"));

    eventually(|| stream.acked().len() == 4).await;
    eventually(|| p.fetcher.removed() == 4).await;

    p.feed.shutdown().await;
}

#[tokio::test]
async fn test_sites_are_independent() {
    let p = pipeline(fast_config(&[sites::KTLX, sites::KFWS])).await;
    let mut ktlx = p.feed.subscribe(sites::KTLX).await.unwrap();
    let mut kfws = p.feed.subscribe(sites::KFWS).await.unwrap();
    let stream = p.subscriber.latest_stream();

    stream.push_keys(&[
        chunk_key(sites::KFWS, 80, 7, 'I'),
        chunk_key(sites::KTLX, 5, 1, 'S'),
        chunk_key(sites::KAMX, 3, 1, 'S'),
        chunk_key(sites::KFWS, 80, 8, 'I'),
        chunk_key(sites::KTLX, 5, 2, 'I'),
    ]);

    assert_eq!(azimuths(&collect(&mut ktlx, 2).await), vec![1, 2]);
    let fws = collect(&mut kfws, 2).await;
    assert_eq!(azimuths(&fws), vec![7, 8]);
    assert!(fws.iter().all(|r| r.site_id == "KFWS"));

    // The unconfigured site is acknowledged but never fetched
    eventually(|| stream.acked().len() == 5).await;
    assert!(!p.fetcher.fetched().iter().any(|k| k.starts_with("KAMX")));

    p.feed.shutdown().await;
}

#[tokio::test]
async fn test_failed_chunks_skipped() {
    let p = pipeline(fast_config(&[sites::KTLX])).await;
    p.fetcher.fail_on(chunk_key(sites::KTLX, 5, 2, 'I'));
    p.decoder.fail_on_sequence(3);

    let mut subscription = p.feed.subscribe(sites::KTLX).await.unwrap();
    let stream = p.subscriber.latest_stream();
    stream.push_keys(&[
        chunk_key(sites::KTLX, 5, 1, 'S'),
        chunk_key(sites::KTLX, 5, 2, 'I'),
        chunk_key(sites::KTLX, 5, 3, 'I'),
        chunk_key(sites::KTLX, 5, 4, 'I'),
    ]);

    let records = collect(&mut subscription, 2).await;
    assert_eq!(azimuths(&records), vec![1, 4]);
    assert_eq!(p.feed.status().sites[0].publisher, PublisherState::Running);

    p.feed.shutdown().await;
}

#[tokio::test]
async fn test_malformed_keys_do_not_stop_listener() {
    let p = pipeline(fast_config(&[sites::KTLX])).await;
    let mut subscription = p.feed.subscribe(sites::KTLX).await.unwrap();
    let stream = p.subscriber.latest_stream();

    stream.push_keys(&[
        "not-a-chunk".to_string(),
        "KTLX/abc/20240501-221204-001-S".to_string(),
        "KTLX/5/20240501-221204-001-Q".to_string(),
    ]);
    stream.push_keys(&[chunk_key(sites::KTLX, 5, 1, 'S')]);

    let records = collect(&mut subscription, 1).await;
    assert_eq!(azimuths(&records), vec![1]);
    eventually(|| stream.acked().len() == 4).await;
    assert!(stream.acked().contains(&"not-a-chunk".to_string()));

    p.feed.shutdown().await;
}

#[tokio::test]
async fn test_receive_errors_retried() {
    let p = pipeline(fast_config(&[sites::KTLX])).await;
    let mut subscription = p.feed.subscribe(sites::KTLX).await.unwrap();
    let stream = p.subscriber.latest_stream();

    stream.push_error("throttled");
    stream.push_error("connection reset");
    stream.push_keys(&[chunk_key(sites::KTLX, 9, 1, 'S')]);

    let records = collect(&mut subscription, 1).await;
    assert_eq!(records[0].elevation_number, 9);

    p.feed.shutdown().await;
}

#[tokio::test]
async fn test_publisher_survives_volume_counter_limit() {
    let mut config = fast_config(&[sites::KTLX]);
    config.force_release_threshold = 2;
    let p = pipeline(config).await;
    let mut subscription = p.feed.subscribe(sites::KTLX).await.unwrap();
    let stream = p.subscriber.latest_stream();

    stream.push_keys(&[chunk_key(sites::KTLX, u32::MAX, 30, 'E')]);
    assert_eq!(azimuths(&collect(&mut subscription, 1).await), vec![30]);

    stream.push_keys(&[
        chunk_key(sites::KTLX, 1, 1, 'S'),
        chunk_key(sites::KTLX, 1, 2, 'I'),
    ]);
    assert_eq!(azimuths(&collect(&mut subscription, 2).await), vec![1, 2]);

    let status = p.feed.status();
    assert_eq!(status.sites[0].publisher, PublisherState::Running);
    assert_eq!(status.sites[0].queue.force_released, 1);

    p.feed.shutdown().await;
}

#[tokio::test]
async fn test_late_joiner_sees_latest() {
    let p = pipeline(fast_config(&[sites::KTLX])).await;
    let mut first = p.feed.subscribe(sites::KTLX).await.unwrap();
    assert!(first.latest().is_none());
    assert!(p.feed.latest(sites::KTLX).unwrap().is_none());

    p.subscriber
        .latest_stream()
        .push_keys(&[chunk_key(sites::KTLX, 5, 1, 'S'), chunk_key(sites::KTLX, 5, 2, 'I')]);
    collect(&mut first, 2).await;

    let late = p.feed.subscribe(sites::KTLX).await.unwrap();
    assert_eq!(late.site(), "KTLX");
    assert_eq!(late.latest().unwrap().azimuth_number, 2);
    assert_eq!(p.feed.latest(sites::KTLX).unwrap().unwrap().azimuth_number, 2);

    let status = p.feed.status();
    assert_eq!(status.sites[0].listeners, 2);
    assert_eq!(status.sites[0].queue.released, 2);
    assert!(status.sites[0].latest_timestamp.is_some());

    p.feed.shutdown().await;
}

#[tokio::test]
async fn test_kept_chunk_files_not_removed() {
    let mut config = fast_config(&[sites::KTLX]);
    config.keep_chunk_files = true;
    let p = pipeline(config).await;
    let mut subscription = p.feed.subscribe(sites::KTLX).await.unwrap();

    p.subscriber
        .latest_stream()
        .push_keys(&[chunk_key(sites::KTLX, 5, 1, 'S')]);
    collect(&mut subscription, 1).await;

    assert_eq!(p.fetcher.removed(), 0);
    p.feed.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_subscriptions() {
    let p = pipeline(fast_config(&[sites::KTLX])).await;
    let mut subscription = p.feed.subscribe(sites::KTLX).await.unwrap();
    let stream = p.subscriber.latest_stream();

    p.feed.shutdown().await;
    assert!(stream.is_closed());
    assert_eq!(p.feed.status().sites[0].publisher, PublisherState::Stopped);

    // Publisher stopped but still owns the sender; nothing arrives
    let waited =
        tokio::time::timeout(std::time::Duration::from_millis(50), subscription.recv()).await;
    assert!(waited.is_err());
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_chunk() {
    let p = pipeline(fast_config(&[sites::KTLX])).await;
    p.fetcher.delay_fetch(std::time::Duration::from_millis(200));
    let _subscription = p.feed.subscribe(sites::KTLX).await.unwrap();

    p.subscriber
        .latest_stream()
        .push_keys(&[chunk_key(sites::KTLX, 5, 1, 'S')]);
    eventually(|| p.fetcher.fetched().len() == 1).await;

    // Shutdown lands while the fetch is still running
    p.feed.shutdown().await;
    assert_eq!(p.fetcher.removed(), 1);
    assert_eq!(p.feed.status().sites[0].publisher, PublisherState::Stopped);
}

// ============================================================================
// Real chunk store and decoder
// ============================================================================

#[tokio::test]
async fn test_level2_chunks_from_object_store() {
    let dir = tempfile::tempdir().unwrap();
    let storage = ObjectStorage::with_store(Arc::new(InMemory::new()), "nexrad-chunks");

    let start = chunk_key(sites::KTLX, 585, 1, 'S');
    let middle = chunk_key(sites::KTLX, 585, 2, 'I');
    let end = chunk_key(sites::KTLX, 585, 3, 'E');
    storage
        .put(&start, Bytes::from(sample_start_chunk(sites::KTLX, 585, 3)))
        .await
        .unwrap();
    storage
        .put(&middle, Bytes::from(sample_chunk(sites::KTLX, 4, 3)))
        .await
        .unwrap();
    storage
        .put(&end, Bytes::from(sample_chunk(sites::KTLX, 7, 2)))
        .await
        .unwrap();

    let subscriber = MockSubscriber::new();
    let feed = RadarFeed::new(
        fast_config(&[sites::KTLX]),
        subscriber.clone(),
        Arc::new(ChunkStore::new(storage, dir.path())),
        Arc::new(Level2Decoder::new()),
    )
    .unwrap();
    feed.start().await.unwrap();

    let mut subscription = feed.subscribe(sites::KTLX).await.unwrap();
    subscriber
        .latest_stream()
        .push_keys(&[start, end, middle]);

    let records = collect(&mut subscription, 8).await;
    assert_eq!(azimuths(&records), (1..=8).collect::<Vec<u16>>());
    for record in &records {
        assert_eq!(record.site_id, "KTLX");
        assert_eq!(record.reflectivity.gate_count, 16);
        assert_eq!(record.velocity.gate_count, 16);
        assert!(record.moment(MomentKind::SpectrumWidth).is_placeholder());
    }
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    // Decoded chunks are cleaned up
    eventually(|| {
        std::fs::read_dir(dir.path().join("KTLX"))
            .map(|entries| entries.count() == 0)
            .unwrap_or(false)
    })
    .await;

    feed.shutdown().await;
}
