//! Storage and messaging abstractions for the radial feed.
//!
//! Provides unified interfaces for:
//! - Object storage (S3) for realtime Level II chunks
//! - Chunk-arrival notification queues (SNS/SQS and Redis Streams)

pub mod notification;
pub mod object_store;
pub mod queue;
pub mod sqs;

pub use self::object_store::{ChunkFetcher, ChunkStore, ObjectStorage, ObjectStorageConfig};
pub use notification::{ChunkNotification, NotificationStream, NotificationSubscriber};
pub use queue::{RedisNotificationQueue, RedisQueueConfig, RedisSubscriber};
pub use sqs::{SqsConfig, SqsNotificationStream, SqsSubscriber};
