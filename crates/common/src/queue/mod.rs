//! SQS queue integration for article publish tasks
//!
//! Provides:
//! - SQS client wrapper with retry on send
//! - Message serialization/deserialization
//! - Dead letter queue hand-off for unreadable messages
//! - [`ArticleTaskDispatcher`] over the queue

use crate::config::QueueConfig;
use crate::errors::{AppError, Result};
use crate::publication::{ArticlePublishTask, ArticleTaskDispatcher};
use async_trait::async_trait;
pub use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest time spent retrying one send
const SEND_RETRY_WINDOW: Duration = Duration::from_secs(30);

/// Settings for one SQS queue
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Queue URL
    pub url: String,
    /// Dead letter queue URL (optional)
    pub dlq_url: Option<String>,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Wait time for long polling (seconds)
    pub wait_time_seconds: i32,
    /// Maximum number of messages per poll
    pub max_messages: i32,
}

impl QueueSettings {
    /// Settings for the article task queue; `None` when no queue URL is configured
    pub fn for_articles(config: &QueueConfig) -> Option<Self> {
        let url = config.article_queue_url.clone()?;
        Some(Self {
            url,
            dlq_url: config.dlq_url.clone(),
            visibility_timeout: i32::try_from(config.visibility_timeout_secs).unwrap_or(i32::MAX),
            wait_time_seconds: i32::try_from(config.poll_timeout_secs.min(20)).unwrap_or(20),
            max_messages: i32::try_from(config.batch_size.clamp(1, 10)).unwrap_or(10),
        })
    }
}

/// SQS queue client wrapper
pub struct Queue {
    client: SqsClient,
    settings: QueueSettings,
}

impl Queue {
    /// Create a queue client from the ambient AWS configuration
    pub async fn new(settings: QueueSettings) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Send a message, retrying transient failures with exponential backoff
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        let body = encode(message)?;
        self.send_body(&self.settings.url, &body).await
    }

    async fn send_body(&self, queue_url: &str, body: &str) -> Result<String> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(SEND_RETRY_WINDOW),
            ..Default::default()
        };

        let result = retry(policy, || async move {
            self.client
                .send_message()
                .queue_url(queue_url)
                .message_body(body)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "Queue send failed; retrying");
                    backoff::Error::transient(e)
                })
        })
        .await
        .map_err(|e| AppError::QueueError {
            message: format!("Failed to send message: {}", e),
        })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");
        Ok(message_id)
    }

    /// Receive a batch of messages (long polling)
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.settings.url)
            .max_number_of_messages(self.settings.max_messages)
            .visibility_timeout(self.settings.visibility_timeout)
            .wait_time_seconds(self.settings.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");
        Ok(messages)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.settings.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    /// Move an unprocessable message to the dead letter queue, if one is
    /// configured, and remove it from the main queue
    pub async fn dead_letter(&self, message: &Message) -> Result<()> {
        if let Some(ref dlq_url) = self.settings.dlq_url {
            let body = message.body.as_deref().unwrap_or_default();
            self.send_body(dlq_url, body).await?;
        } else {
            warn!("No dead letter queue configured; dropping message");
        }
        match message.receipt_handle.as_deref() {
            Some(handle) => self.delete(handle).await,
            None => Ok(()),
        }
    }

    /// Parse message body as JSON
    pub fn parse_message<T: DeserializeOwned>(message: &Message) -> Result<T> {
        let body = message.body.as_ref().ok_or_else(|| AppError::QueueError {
            message: "Message has no body".to_string(),
        })?;

        serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse message: {}", e),
        })
    }
}

fn encode<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message).map_err(|e| AppError::QueueError {
        message: format!("Failed to serialize message: {}", e),
    })
}

/// One SQS message per article, consumed by `article-worker`
#[async_trait]
impl ArticleTaskDispatcher for Queue {
    async fn dispatch(&self, task: ArticlePublishTask) -> Result<()> {
        self.send(&task).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{EntityKind, WebsiteKind};
    use crate::publish::PublishConfig;

    fn task() -> ArticlePublishTask {
        ArticlePublishTask {
            user_id: 1,
            username: "admin".to_string(),
            website_kind: WebsiteKind::Qa,
            article_proc_id: uuid::Uuid::new_v4(),
            publish_config: PublishConfig {
                website: WebsiteKind::Qa,
                collection: "scl".to_string(),
                kind: EntityKind::Article,
                endpoint: "http://qa.test/api/v1/article/".to_string(),
                token: Some("secret".to_string()),
                timeout_secs: 30,
            },
            force_update: false,
        }
    }

    #[test]
    fn test_task_message_roundtrip() {
        let original = task();
        let message = Message::builder().body(encode(&original).unwrap()).build();
        let parsed: ArticlePublishTask = Queue::parse_message(&message).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_message_without_body_is_error() {
        let message = Message::builder().build();
        let err = Queue::parse_message::<ArticlePublishTask>(&message).unwrap_err();
        assert!(matches!(err, AppError::QueueError { .. }));
    }

    #[test]
    fn test_settings_from_config() {
        let config = QueueConfig {
            article_queue_url: Some("https://sqs.test/articles".to_string()),
            dlq_url: None,
            batch_size: 25,
            poll_timeout_secs: 60,
            visibility_timeout_secs: 120,
        };
        let settings = QueueSettings::for_articles(&config).unwrap();
        assert_eq!(settings.max_messages, 10);
        assert_eq!(settings.wait_time_seconds, 20);
        assert_eq!(settings.visibility_timeout, 120);

        let unset = QueueConfig {
            article_queue_url: None,
            ..config
        };
        assert!(QueueSettings::for_articles(&unset).is_none());
    }
}
