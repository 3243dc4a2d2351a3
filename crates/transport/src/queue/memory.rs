use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{MessageId, MessageQueue, QueueMessage, ReceiptHandle, ReceiveRequest};
use crate::QueueError;

/// In-memory queue with SQS-like visibility semantics.
///
/// Uses `tokio::time`, so tests running with a paused clock can step through
/// visibility timeouts deterministically.
#[derive(Clone)]
pub struct InMemoryMessageQueue {
    name: String,
    state: Arc<Mutex<QueueState>>,
    arrivals: Arc<Notify>,
}

#[derive(Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    last_id: u64,
    send_failures: VecDeque<QueueError>,
    receive_failures: VecDeque<QueueError>,
    delete_failures: VecDeque<QueueError>,
}

struct StoredMessage {
    id: MessageId,
    body: String,
    receive_count: u32,
    receipt: Option<ReceiptHandle>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

impl InMemoryMessageQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(QueueState::default())),
            arrivals: Arc::new(Notify::new()),
        }
    }

    /// Number of messages held, in flight or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Bodies of all held messages, in send order.
    pub async fn bodies(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.messages.iter().map(|m| m.body.clone()).collect()
    }

    pub async fn fail_next_send(&self, error: QueueError) {
        self.state.lock().await.send_failures.push_back(error);
    }

    pub async fn fail_next_receive(&self, error: QueueError) {
        self.state.lock().await.receive_failures.push_back(error);
    }

    pub async fn fail_next_delete(&self, error: QueueError) {
        self.state.lock().await.delete_failures.push_back(error);
    }

    async fn take_visible(
        &self,
        request: &ReceiveRequest,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.receive_failures.pop_front() {
            return Err(error);
        }

        let now = Instant::now();
        let mut batch = Vec::new();
        for message in state.messages.iter_mut() {
            if batch.len() >= request.max_messages {
                break;
            }
            if !message.is_visible(now) {
                continue;
            }

            message.receive_count += 1;
            let receipt = ReceiptHandle::new(format!("{}-{}", message.id, message.receive_count));
            message.receipt = Some(receipt.clone());
            message.invisible_until = Some(now + request.visibility_timeout);

            batch.push(QueueMessage {
                message_id: message.id.clone(),
                receipt_handle: receipt,
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
        }

        Ok(batch)
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str) -> Result<MessageId, QueueError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }

        state.last_id += 1;
        let id = MessageId::new(format!("msg-{}", state.last_id));
        state.messages.push(StoredMessage {
            id: id.clone(),
            body: body.to_string(),
            receive_count: 0,
            receipt: None,
            invisible_until: None,
        });
        drop(state);

        self.arrivals.notify_one();
        Ok(id)
    }

    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + request.wait_time;
        loop {
            let batch = self.take_visible(request).await?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            // Woken by a send, or give up at the deadline; either way look again.
            let _ = tokio::time::timeout_at(deadline, self.arrivals.notified()).await;
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.delete_failures.pop_front() {
            return Err(error);
        }

        let index = state
            .messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| QueueError::InvalidReceipt(receipt.to_string()))?;
        state.messages.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn request(visibility: Duration) -> ReceiveRequest {
        ReceiveRequest {
            max_messages: 10,
            wait_time: Duration::ZERO,
            visibility_timeout: visibility,
        }
    }

    #[tokio::test]
    async fn received_messages_are_hidden_until_timeout() {
        tokio::time::pause();
        let queue = InMemoryMessageQueue::new("q");
        queue.send("a").await.unwrap();

        let first = queue.receive(&request(Duration::from_secs(30))).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);

        let hidden = queue.receive(&request(Duration::from_secs(30))).await.unwrap();
        assert!(hidden.is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let again = queue.receive(&request(Duration::from_secs(30))).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 2);
        assert_eq!(again[0].message_id, first[0].message_id);
    }

    #[tokio::test]
    async fn delete_removes_message() {
        let queue = InMemoryMessageQueue::new("q");
        queue.send("a").await.unwrap();
        let batch = queue.receive(&request(Duration::from_secs(30))).await.unwrap();

        queue.delete(&batch[0].receipt_handle).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn stale_receipt_is_rejected() {
        let queue = InMemoryMessageQueue::new("q");
        queue.send("a").await.unwrap();
        let first = queue.receive(&request(Duration::ZERO)).await.unwrap();
        let second = queue.receive(&request(Duration::ZERO)).await.unwrap();
        assert_eq!(second[0].receive_count, 2);

        let err = queue.delete(&first[0].receipt_handle).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidReceipt(_)));
        queue.delete(&second[0].receipt_handle).await.unwrap();
    }

    #[tokio::test]
    async fn receive_honours_max_messages() {
        let queue = InMemoryMessageQueue::new("q");
        for body in ["a", "b", "c"] {
            queue.send(body).await.unwrap();
        }

        let mut req = request(Duration::from_secs(30));
        req.max_messages = 2;
        let batch = queue.receive(&req).await.unwrap();
        let bodies: Vec<_> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn long_poll_wakes_on_send() {
        let queue = InMemoryMessageQueue::new("q");
        let receiver = queue.clone();
        let handle = tokio::spawn(async move {
            receiver
                .receive(&ReceiveRequest {
                    max_messages: 10,
                    wait_time: Duration::from_secs(5),
                    visibility_timeout: Duration::from_secs(30),
                })
                .await
        });

        tokio::task::yield_now().await;
        queue.send("late").await.unwrap();

        let batch = handle.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test]
    async fn scripted_failures() {
        let queue = InMemoryMessageQueue::new("q");
        queue.fail_next_send(QueueError::Send("down".into())).await;
        assert!(queue.send("a").await.is_err());
        queue.send("a").await.unwrap();

        queue
            .fail_next_receive(QueueError::Receive("down".into()))
            .await;
        assert!(queue.receive(&request(Duration::ZERO)).await.is_err());

        let batch = queue.receive(&request(Duration::ZERO)).await.unwrap();
        queue.fail_next_delete(QueueError::Delete("down".into())).await;
        assert!(queue.delete(&batch[0].receipt_handle).await.is_err());
        assert_eq!(queue.bodies().await, vec!["a".to_string()]);
    }
}
