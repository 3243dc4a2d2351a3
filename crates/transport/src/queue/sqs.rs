use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use tracing::warn;

use super::{MessageId, MessageQueue, QueueMessage, ReceiptHandle, ReceiveRequest};
use crate::{AwsSettings, QueueError};

/// SQS backed [`MessageQueue`], bound to one queue URL.
#[derive(Clone)]
pub struct SqsMessageQueue {
    client: Client,
    queue_url: String,
}

impl SqsMessageQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub async fn connect(settings: &AwsSettings, queue_url: impl Into<String>) -> Self {
        let config = settings.load().await;
        Self::new(Client::new(&config), queue_url)
    }
}

fn seconds(duration: std::time::Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl MessageQueue for SqsMessageQueue {
    fn name(&self) -> &str {
        &self.queue_url
    }

    async fn send(&self, body: &str) -> Result<MessageId, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Send(DisplayErrorContext(&e).to_string()))?;

        Ok(MessageId::new(output.message_id().unwrap_or_default()))
    }

    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<QueueMessage>, QueueError> {
        // SQS caps a single receive at 10 messages.
        let max_messages = request.max_messages.clamp(1, 10) as i32;

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(seconds(request.wait_time))
            .visibility_timeout(seconds(request.visibility_timeout))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        let mut messages = Vec::new();
        for message in output.messages() {
            let (Some(receipt), Some(body)) = (message.receipt_handle(), message.body()) else {
                warn!(
                    queue = %self.queue_url,
                    message_id = ?message.message_id(),
                    "received message without receipt handle or body"
                );
                continue;
            };

            let receive_count = message
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|count| count.parse().ok())
                .unwrap_or(1);

            messages.push(QueueMessage {
                message_id: MessageId::new(message.message_id().unwrap_or_default()),
                receipt_handle: ReceiptHandle::new(receipt),
                body: body.to_string(),
                receive_count,
            });
        }

        Ok(messages)
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt.as_str())
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}
