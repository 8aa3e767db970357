//! SNS -> SQS chunk notification subscription.
//!
//! The public chunk bucket announces every new object on an SNS topic that
//! carries a `SiteID` message attribute. Subscribing creates a private SQS
//! queue, allows the topic to deliver into it and subscribes with a filter
//! policy restricted to the requested sites. Closing tears both down.

use async_trait::async_trait;
use aws_sdk_sqs::types::{Message, QueueAttributeName};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use radar_common::{FeedError, FeedResult};

use crate::notification::{
    parse_notification_body, ChunkNotification, NotificationStream, NotificationSubscriber,
};

/// SNS/SQS subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqsConfig {
    /// Topic announcing new chunks
    #[serde(default = "default_topic_arn")]
    pub topic_arn: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Prefix for the per-subscription queue name
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
    /// Long-poll window for ReceiveMessage (max 20)
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: i32,
    /// Messages per ReceiveMessage call (max 10)
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,
}

fn default_topic_arn() -> String {
    "arn:aws:sns:us-east-1:684042711724:NewNEXRADLevel2ObjectFilterable".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_queue_prefix() -> String {
    "radial-feed".to_string()
}

fn default_wait_time_secs() -> i32 {
    20
}

fn default_max_messages() -> i32 {
    10
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            topic_arn: default_topic_arn(),
            region: default_region(),
            queue_prefix: default_queue_prefix(),
            wait_time_secs: default_wait_time_secs(),
            max_messages: default_max_messages(),
        }
    }
}

fn aws_err(context: &str, e: impl std::fmt::Display) -> FeedError {
    FeedError::Subscription(format!("{}: {}", context, e))
}

/// Access policy letting the topic send into the queue.
pub fn queue_policy(queue_arn: &str, topic_arn: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "sns.amazonaws.com" },
            "Action": "sqs:SendMessage",
            "Resource": queue_arn,
            "Condition": { "ArnEquals": { "aws:SourceArn": topic_arn } }
        }]
    })
    .to_string()
}

/// SNS filter policy restricting delivery to the given sites.
pub fn site_filter_policy(sites: &[String]) -> String {
    serde_json::json!({ "SiteID": sites }).to_string()
}

/// Opens SNS -> SQS subscriptions.
pub struct SqsSubscriber {
    sqs: aws_sdk_sqs::Client,
    sns: aws_sdk_sns::Client,
    config: SqsConfig,
}

impl SqsSubscriber {
    /// Build clients from the default AWS credential chain.
    pub async fn new(config: SqsConfig) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            sqs: aws_sdk_sqs::Client::new(&aws_config),
            sns: aws_sdk_sns::Client::new(&aws_config),
            config,
        }
    }
}

#[async_trait]
impl NotificationSubscriber for SqsSubscriber {
    async fn subscribe(&self, sites: &[String]) -> FeedResult<Arc<dyn NotificationStream>> {
        if sites.is_empty() {
            return Err(FeedError::Configuration(
                "Cannot subscribe without sites".to_string(),
            ));
        }

        let queue_name = format!("{}-{}", self.config.queue_prefix, Uuid::new_v4().simple());
        let created = self
            .sqs
            .create_queue()
            .queue_name(&queue_name)
            .send()
            .await
            .map_err(|e| aws_err("CreateQueue failed", e))?;
        let queue_url = created
            .queue_url()
            .ok_or_else(|| FeedError::Subscription("CreateQueue returned no URL".to_string()))?
            .to_string();

        let stream = SqsNotificationStream {
            sqs: self.sqs.clone(),
            sns: self.sns.clone(),
            queue_url,
            subscription_arn: None,
            wait_time_secs: self.config.wait_time_secs,
            max_messages: self.config.max_messages,
        };

        // A failure past this point leaves a queue behind; remove it
        match self.attach(&stream.queue_url, sites).await {
            Ok(subscription_arn) => {
                info!(
                    queue = %queue_name,
                    sites = sites.len(),
                    "Opened SQS chunk subscription"
                );
                Ok(Arc::new(SqsNotificationStream {
                    subscription_arn: Some(subscription_arn),
                    ..stream
                }))
            }
            Err(e) => {
                if let Err(cleanup) = stream.close().await {
                    warn!(error = %cleanup, "Failed to remove queue after subscribe error");
                }
                Err(e)
            }
        }
    }
}

impl SqsSubscriber {
    /// Authorise the topic on the queue and subscribe it with a site filter.
    async fn attach(&self, queue_url: &str, sites: &[String]) -> FeedResult<String> {
        let attrs = self
            .sqs
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| aws_err("GetQueueAttributes failed", e))?;
        let queue_arn = attrs
            .attributes()
            .and_then(|a| a.get(&QueueAttributeName::QueueArn))
            .ok_or_else(|| FeedError::Subscription("Queue has no ARN".to_string()))?
            .clone();

        self.sqs
            .set_queue_attributes()
            .queue_url(queue_url)
            .attributes(
                QueueAttributeName::Policy,
                queue_policy(&queue_arn, &self.config.topic_arn),
            )
            .send()
            .await
            .map_err(|e| aws_err("SetQueueAttributes failed", e))?;

        let subscribed = self
            .sns
            .subscribe()
            .topic_arn(&self.config.topic_arn)
            .protocol("sqs")
            .endpoint(&queue_arn)
            .attributes("FilterPolicy", site_filter_policy(sites))
            .return_subscription_arn(true)
            .send()
            .await
            .map_err(|e| aws_err("SNS Subscribe failed", e))?;

        subscribed
            .subscription_arn()
            .map(|s| s.to_string())
            .ok_or_else(|| FeedError::Subscription("Subscribe returned no ARN".to_string()))
    }
}

/// A private SQS queue subscribed to the chunk topic.
pub struct SqsNotificationStream {
    sqs: aws_sdk_sqs::Client,
    sns: aws_sdk_sns::Client,
    queue_url: String,
    subscription_arn: Option<String>,
    wait_time_secs: i32,
    max_messages: i32,
}

impl SqsNotificationStream {
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

/// Parse a received batch into notifications tagged with their receipt
/// handles, plus the receipt handles of messages that did not parse.
fn split_batch(messages: &[Message]) -> (Vec<ChunkNotification>, Vec<String>) {
    let mut notifications = Vec::new();
    let mut malformed = Vec::new();

    for message in messages {
        let receipt = message.receipt_handle().map(|r| r.to_string());
        match parse_notification_body(message.body().unwrap_or_default()) {
            Ok(parsed) => {
                notifications.extend(parsed.into_iter().map(|n| match &receipt {
                    Some(r) => n.with_receipt(r.clone()),
                    None => n,
                }));
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed chunk notification");
                malformed.extend(receipt);
            }
        }
    }
    (notifications, malformed)
}

#[async_trait]
impl NotificationStream for SqsNotificationStream {
    async fn receive(&self) -> FeedResult<Vec<ChunkNotification>> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(self.wait_time_secs)
            .send()
            .await
            .map_err(|e| aws_err("ReceiveMessage failed", e))?;

        let (notifications, malformed) = split_batch(output.messages());
        // Unparseable messages would be redelivered forever
        for receipt in malformed {
            let discard = ChunkNotification::new("").with_receipt(receipt);
            if let Err(e) = self.acknowledge(&discard).await {
                warn!(error = %e, "Failed to delete malformed chunk notification");
            }
        }

        debug!(count = notifications.len(), "Received chunk notifications");
        Ok(notifications)
    }

    async fn acknowledge(&self, notification: &ChunkNotification) -> FeedResult<()> {
        let Some(receipt) = &notification.receipt else {
            return Ok(());
        };
        self.sqs
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| aws_err("DeleteMessage failed", e))?;
        Ok(())
    }

    async fn close(&self) -> FeedResult<()> {
        if let Some(arn) = &self.subscription_arn {
            self.sns
                .unsubscribe()
                .subscription_arn(arn)
                .send()
                .await
                .map_err(|e| aws_err("SNS Unsubscribe failed", e))?;
        }
        self.sqs
            .delete_queue()
            .queue_url(&self.queue_url)
            .send()
            .await
            .map_err(|e| aws_err("DeleteQueue failed", e))?;
        info!(queue = %self.queue_url, "Closed SQS chunk subscription");
        Ok(())
    }
}
