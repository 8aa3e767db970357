//! Chunk-arrival notifications and the queue seams the feed listener uses.
//!
//! Notification bodies come in two shapes:
//! - an SNS envelope whose `Message` field holds an S3 event (SNS -> SQS
//!   delivery without raw message delivery), or
//! - a bare S3 event.
//!
//! Either way, each `Records[].s3.object.key` names one chunk.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use radar_common::{FeedError, FeedResult};

/// One chunk-arrival notification pulled from a remote queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkNotification {
    /// Object key of the chunk (`{SITE}/{VOLUME}/{NAME}`)
    pub key: String,
    /// Site tag supplied by the transport, if any
    pub site: Option<String>,
    /// Transport handle used to acknowledge the message
    pub receipt: Option<String>,
}

impl ChunkNotification {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            site: None,
            receipt: None,
        }
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = Some(receipt.into());
        self
    }
}

/// An open subscription delivering chunk notifications.
///
/// Delivery is at-least-once and may be out of order or duplicated.
/// All methods take `&self` so several listener workers can share one
/// stream.
#[async_trait]
pub trait NotificationStream: Send + Sync {
    /// Wait for the next batch of notifications. An empty batch means the
    /// long-poll window elapsed without traffic.
    async fn receive(&self) -> FeedResult<Vec<ChunkNotification>>;

    /// Remove a processed notification from the remote queue.
    async fn acknowledge(&self, notification: &ChunkNotification) -> FeedResult<()>;

    /// Release the remote resources backing this subscription.
    async fn close(&self) -> FeedResult<()>;
}

/// Opens remote subscriptions for a group of sites.
#[async_trait]
pub trait NotificationSubscriber: Send + Sync {
    async fn subscribe(&self, sites: &[String]) -> FeedResult<Arc<dyn NotificationStream>>;
}

#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "MessageAttributes", default)]
    attributes: std::collections::HashMap<String, SnsAttribute>,
}

#[derive(Debug, Deserialize)]
struct SnsAttribute {
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct S3Event {
    #[serde(rename = "Records", default)]
    records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Extract chunk notifications from a queue message body.
///
/// S3 URL-encodes object keys in event payloads; chunk keys only contain
/// characters that survive unescaped, so keys are used as delivered.
pub fn parse_notification_body(body: &str) -> FeedResult<Vec<ChunkNotification>> {
    let value: serde_json::Value = serde_json::from_str(body)?;

    let (event_json, site) = if value.get("Message").is_some() {
        let envelope: SnsEnvelope = serde_json::from_value(value)?;
        let site = envelope.attributes.get("SiteID").map(|a| a.value.clone());
        (envelope.message, site)
    } else {
        (body.to_string(), None)
    };

    let event: S3Event = serde_json::from_str(&event_json)?;
    if event.records.is_empty() {
        return Err(FeedError::Subscription(
            "Notification carries no S3 records".to_string(),
        ));
    }

    Ok(event
        .records
        .into_iter()
        .map(|record| {
            let notification = ChunkNotification::new(record.s3.object.key);
            match &site {
                Some(site) => notification.with_site(site.clone()),
                None => notification,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const S3_EVENT: &str = r#"{"Records":[{"eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"unidata-nexrad-level2-chunks"},"object":{"key":"KTLX/585/20240501-221204-012-I","size":24811}}}]}"#;

    #[test]
    fn test_parse_raw_s3_event() {
        let notes = parse_notification_body(S3_EVENT).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].key, "KTLX/585/20240501-221204-012-I");
        assert_eq!(notes[0].site, None);
    }

    #[test]
    fn test_parse_sns_envelope() {
        let envelope = serde_json::json!({
            "Type": "Notification",
            "TopicArn": "arn:aws:sns:us-east-1:684042711724:NewNEXRADLevel2ObjectFilterable",
            "Message": S3_EVENT,
            "MessageAttributes": {
                "SiteID": { "Type": "String", "Value": "KTLX" },
                "ChunkType": { "Type": "String", "Value": "I" }
            }
        })
        .to_string();

        let notes = parse_notification_body(&envelope).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].site.as_deref(), Some("KTLX"));
        assert_eq!(notes[0].key, "KTLX/585/20240501-221204-012-I");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_notification_body("not json").is_err());
        assert!(parse_notification_body(r#"{"Records":[]}"#).is_err());
    }
}
