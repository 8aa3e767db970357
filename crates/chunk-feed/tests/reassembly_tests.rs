//! Ordering behaviour of the reassembly queue under concurrent use.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chunk_feed::ChunkReassemblyQueue;
use common::chunk;
use radar_common::{ChunkKind, FeedError};
use tokio_test::{assert_pending, assert_ready, task};

#[tokio::test]
async fn test_out_of_order_arrivals_released_in_order() {
    let queue = ChunkReassemblyQueue::new("ABC", 10);
    queue.offer(chunk("ABC", 1, 1, ChunkKind::Start));
    queue.offer(chunk("ABC", 1, 3, ChunkKind::Intermediate));
    queue.offer(chunk("ABC", 1, 2, ChunkKind::Intermediate));
    queue.offer(chunk("ABC", 1, 4, ChunkKind::End));

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(queue.next().await.unwrap().sequence);
    }
    assert_eq!(order, vec![1, 2, 3, 4]);
    assert_eq!(queue.stats().force_released, 0);
}

#[tokio::test]
async fn test_feed_recovers_after_last_volume_number() {
    let queue = ChunkReassemblyQueue::new("ABC", 2);
    queue.offer(chunk("ABC", u32::MAX, 30, ChunkKind::End));
    assert_eq!(queue.next().await.unwrap().volume, u32::MAX);

    // Nothing can follow the anchor, so the counter restart is neither
    // stale nor the expected successor
    queue.offer(chunk("ABC", 1, 1, ChunkKind::Start));
    assert!(queue.try_next().is_none());
    queue.offer(chunk("ABC", 1, 2, ChunkKind::Intermediate));

    let restarted = tokio::time::timeout(Duration::from_secs(1), queue.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((restarted.volume, restarted.sequence), (1, 1));
    assert_eq!(queue.next().await.unwrap().sequence, 2);

    let stats = queue.stats();
    assert_eq!(stats.force_released, 1);
    assert_eq!(stats.discarded, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_last_sequence_number_does_not_stall_queue() {
    let queue = ChunkReassemblyQueue::new("ABC", 1);
    queue.offer(chunk("ABC", 4, u32::MAX, ChunkKind::Intermediate));
    assert_eq!(queue.try_next().unwrap().sequence, u32::MAX);

    queue.offer(chunk("ABC", 5, 1, ChunkKind::Start));
    let next = queue.try_next().unwrap();
    assert_eq!((next.volume, next.sequence), (5, 1));
}

#[tokio::test]
async fn test_missing_chunk_force_released_at_threshold() {
    let queue = ChunkReassemblyQueue::new("ABC", 2);
    queue.offer(chunk("ABC", 1, 1, ChunkKind::Start));
    assert_eq!(queue.next().await.unwrap().sequence, 1);

    // seq 2 is lost
    queue.offer(chunk("ABC", 1, 3, ChunkKind::Intermediate));
    assert!(queue.try_next().is_none());
    queue.offer(chunk("ABC", 1, 4, ChunkKind::End));

    let forced = tokio::time::timeout(Duration::from_secs(1), queue.next())
        .await
        .expect("force release should not block")
        .unwrap();
    assert_eq!(forced.sequence, 3);

    // 4 is now the expected successor
    assert_eq!(queue.next().await.unwrap().sequence, 4);
    assert_eq!(queue.stats().force_released, 1);
}

#[tokio::test]
async fn test_blocks_one_below_threshold() {
    let queue = ChunkReassemblyQueue::new("KTLX", 3);
    queue.offer(chunk("KTLX", 7, 1, ChunkKind::Start));
    queue.next().await.unwrap();

    queue.offer(chunk("KTLX", 7, 3, ChunkKind::Intermediate));
    queue.offer(chunk("KTLX", 7, 4, ChunkKind::Intermediate));

    let waited = tokio::time::timeout(Duration::from_millis(100), queue.next()).await;
    assert!(waited.is_err(), "released below threshold");
    assert_eq!(queue.len(), 2);

    queue.offer(chunk("KTLX", 7, 5, ChunkKind::Intermediate));
    assert_eq!(queue.next().await.unwrap().sequence, 3);
}

#[tokio::test]
async fn test_waiter_woken_by_offer() {
    let queue = Arc::new(ChunkReassemblyQueue::new("KTLX", 12));
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.next().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.offer(chunk("KTLX", 3, 1, ChunkKind::Start));

    let released = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter not woken")
        .unwrap()
        .unwrap();
    assert_eq!(released.volume, 3);
}

#[test]
fn test_offer_wakes_pending_next() {
    let queue = ChunkReassemblyQueue::new("KTLX", 12);
    queue.offer(chunk("KTLX", 3, 1, ChunkKind::Start));
    queue.try_next().unwrap();

    let mut next = task::spawn(queue.next());
    assert_pending!(next.poll());

    // Not the successor and below threshold: woken, but still pending
    queue.offer(chunk("KTLX", 3, 3, ChunkKind::Intermediate));
    assert!(next.is_woken());
    assert_pending!(next.poll());

    queue.offer(chunk("KTLX", 3, 2, ChunkKind::Intermediate));
    assert!(next.is_woken());
    let released = assert_ready!(next.poll()).unwrap();
    assert_eq!(released.sequence, 2);
}

#[test]
fn test_duplicate_offer_does_not_wake() {
    let queue = ChunkReassemblyQueue::new("KTLX", 12);
    queue.offer(chunk("KTLX", 3, 1, ChunkKind::Start));
    queue.try_next().unwrap();
    queue.offer(chunk("KTLX", 3, 5, ChunkKind::Intermediate));

    let mut next = task::spawn(queue.next());
    assert_pending!(next.poll());
    queue.offer(chunk("KTLX", 3, 5, ChunkKind::Intermediate));
    assert!(!next.is_woken());
}

#[tokio::test]
async fn test_shutdown_cancels_waiter_promptly() {
    let queue = Arc::new(ChunkReassemblyQueue::new("KTLX", 12));
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.next().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("shutdown did not wake waiter")
        .unwrap();
    assert!(matches!(result, Err(FeedError::Cancelled)));

    // Fails fast until reopened
    queue.offer(chunk("KTLX", 3, 1, ChunkKind::Start));
    assert!(matches!(queue.next().await, Err(FeedError::Cancelled)));
    queue.reopen();
    assert_eq!(queue.next().await.unwrap().sequence, 1);
}

#[tokio::test]
async fn test_every_arrival_order_yields_sorted_stream() {
    let ids = [
        chunk("KTLX", 9, 1, ChunkKind::Start),
        chunk("KTLX", 9, 2, ChunkKind::Intermediate),
        chunk("KTLX", 9, 3, ChunkKind::Intermediate),
        chunk("KTLX", 9, 4, ChunkKind::End),
        chunk("KTLX", 10, 1, ChunkKind::Start),
    ];

    // All 120 permutations; threshold above the set size so nothing is forced
    let mut indices: Vec<usize> = (0..ids.len()).collect();
    let mut permutations = Vec::new();
    permute(&mut indices, 0, &mut permutations);
    assert_eq!(permutations.len(), 120);

    for order in permutations {
        let queue = ChunkReassemblyQueue::new("KTLX", 10);
        // The first arrival anchors the stream, so start from the first
        // chunk of the volume and drain after every offer.
        let mut released = Vec::new();
        queue.offer(ids[0].clone());
        for &i in &order {
            queue.offer(ids[i].clone());
            while let Some(id) = queue.try_next() {
                released.push(id.order_key());
            }
        }
        assert_eq!(
            released,
            vec![(9, 1), (9, 2), (9, 3), (9, 4), (10, 1)],
            "arrival order {:?}",
            order
        );
    }
}

#[tokio::test]
async fn test_interleaved_producer_and_consumer() {
    let queue = Arc::new(ChunkReassemblyQueue::new("KTLX", 12));
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..20 {
                seen.push(queue.next().await.unwrap().sequence);
            }
            seen
        })
    };

    // Each pair arrives swapped: 3 before 2, 5 before 4
    queue.offer(chunk("KTLX", 1, 1, ChunkKind::Start));
    for pair in (2..=20).step_by(2) {
        if pair < 20 {
            queue.offer(chunk("KTLX", 1, pair + 1, ChunkKind::Intermediate));
        }
        queue.offer(chunk("KTLX", 1, pair, ChunkKind::Intermediate));
        tokio::task::yield_now().await;
    }

    let seen = tokio::time::timeout(Duration::from_secs(2), consumer)
        .await
        .expect("consumer stalled")
        .unwrap();
    assert_eq!(seen, (1..=20).collect::<Vec<u32>>());
}

fn permute(items: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
    if k == items.len() {
        out.push(items.clone());
        return;
    }
    for i in k..items.len() {
        items.swap(k, i);
        permute(items, k + 1, out);
        items.swap(k, i);
    }
}
