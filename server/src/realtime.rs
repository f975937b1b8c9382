//! In-process publish/subscribe hub for connected chat clients.
//!
//! Each websocket client owns one unbounded sender. Channels are plain
//! names (`session:<id>`, `queue:agents`) mapped to the set of client ids
//! currently joined. Delivery is fire-and-forget: a closed receiver is
//! skipped and nothing is replayed, clients re-fetch history instead.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};

use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

pub const QUEUE_CHANNEL: &str = "queue:agents";

pub const EVENT_MESSAGE_NEW: &str = "message:new";
pub const EVENT_AGENT_MESSAGE: &str = "agent-message:new";
pub const EVENT_MESSAGES_READ: &str = "messages:read";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_QUEUE_UPDATED: &str = "queue:updated";

pub fn session_channel(session_id: &str) -> String {
    format!("session:{session_id}")
}

#[derive(Default)]
struct RealtimeState {
    clients: HashMap<usize, mpsc::UnboundedSender<String>>,
    channel_watchers: HashMap<String, HashSet<usize>>,
    joined_channels: HashMap<usize, HashSet<String>>,
}

#[derive(Default)]
pub struct RealtimeHub {
    state: Mutex<RealtimeState>,
    next_client_id: AtomicUsize,
}

pub fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client and hands back the receiving half of its outbox.
    pub async fn connect(&self) -> (usize, mpsc::UnboundedReceiver<String>) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut rt = self.state.lock().await;
        rt.clients.insert(client_id, tx);
        tracing::debug!(client_id, "realtime client connected");
        (client_id, rx)
    }

    pub async fn disconnect(&self, client_id: usize) {
        let mut rt = self.state.lock().await;
        rt.clients.remove(&client_id);
        if let Some(channels) = rt.joined_channels.remove(&client_id) {
            for channel in channels {
                let now_empty = match rt.channel_watchers.get_mut(&channel) {
                    Some(set) => {
                        set.remove(&client_id);
                        set.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    rt.channel_watchers.remove(&channel);
                }
            }
        }
        tracing::debug!(client_id, "realtime client disconnected");
    }

    pub async fn join(&self, client_id: usize, channel: &str) {
        let mut rt = self.state.lock().await;
        if !rt.clients.contains_key(&client_id) {
            return;
        }
        rt.channel_watchers
            .entry(channel.to_string())
            .or_default()
            .insert(client_id);
        rt.joined_channels
            .entry(client_id)
            .or_default()
            .insert(channel.to_string());
    }

    pub async fn leave(&self, client_id: usize, channel: &str) {
        let mut rt = self.state.lock().await;
        let now_empty = match rt.channel_watchers.get_mut(channel) {
            Some(set) => {
                set.remove(&client_id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            rt.channel_watchers.remove(channel);
        }
        if let Some(channels) = rt.joined_channels.get_mut(&client_id) {
            channels.remove(channel);
        }
    }

    pub async fn is_joined(&self, client_id: usize, channel: &str) -> bool {
        let rt = self.state.lock().await;
        rt.channel_watchers
            .get(channel)
            .is_some_and(|set| set.contains(&client_id))
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let rt = self.state.lock().await;
        rt.channel_watchers.get(channel).map_or(0, HashSet::len)
    }

    /// Sends to every subscriber of `channel`. Returns how many outboxes
    /// accepted the payload.
    pub async fn publish<T: Serialize>(&self, channel: &str, event: &str, data: T) -> usize {
        self.publish_filtered(channel, event, data, None).await
    }

    pub async fn publish_except<T: Serialize>(
        &self,
        channel: &str,
        event: &str,
        data: T,
        skip_client: usize,
    ) -> usize {
        self.publish_filtered(channel, event, data, Some(skip_client))
            .await
    }

    pub async fn send_to<T: Serialize>(&self, client_id: usize, event: &str, data: T) -> bool {
        let Some(payload) = event_payload(event, data) else {
            return false;
        };
        let tx = {
            let rt = self.state.lock().await;
            rt.clients.get(&client_id).cloned()
        };
        tx.is_some_and(|sender| sender.send(payload).is_ok())
    }

    async fn publish_filtered<T: Serialize>(
        &self,
        channel: &str,
        event: &str,
        data: T,
        skip_client: Option<usize>,
    ) -> usize {
        let Some(payload) = event_payload(event, data) else {
            tracing::warn!(channel, event, "failed to serialize realtime payload");
            return 0;
        };

        let senders = {
            let rt = self.state.lock().await;
            rt.channel_watchers
                .get(channel)
                .map(|ids| {
                    ids.iter()
                        .filter(|id| Some(**id) != skip_client)
                        .filter_map(|id| rt.clients.get(id).cloned())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        let delivered = senders
            .iter()
            .filter(|sender| sender.send(payload.clone()).is_ok())
            .count();

        if delivered == 0 {
            tracing::debug!(channel, event, "no live subscribers for event");
        } else {
            tracing::debug!(channel, event, delivered, "event published");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(payload: &str) -> Value {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_the_channel() {
        let hub = RealtimeHub::new();
        let (a, mut rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        let (_c, mut rx_c) = hub.connect().await;
        hub.join(a, "session:1").await;
        hub.join(b, "session:1").await;

        let delivered = hub
            .publish("session:1", EVENT_MESSAGE_NEW, json!({ "text": "hello" }))
            .await;
        assert_eq!(delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let event = parse(&rx.recv().await.unwrap());
            assert_eq!(event["event"], "message:new");
            assert_eq!(event["data"]["text"], "hello");
        }
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let hub = RealtimeHub::new();
        assert_eq!(hub.publish("session:none", EVENT_TYPING, json!({})).await, 0);
    }

    #[tokio::test]
    async fn publish_except_skips_the_sender() {
        let hub = RealtimeHub::new();
        let (a, mut rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        hub.join(a, "session:1").await;
        hub.join(b, "session:1").await;

        let delivered = hub
            .publish_except("session:1", EVENT_TYPING, json!({ "isTyping": true }), a)
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_b.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_and_leave_drop_subscriptions() {
        let hub = RealtimeHub::new();
        let (a, _rx_a) = hub.connect().await;
        let (b, _rx_b) = hub.connect().await;
        hub.join(a, "session:1").await;
        hub.join(b, "session:1").await;
        hub.join(a, QUEUE_CHANNEL).await;
        assert_eq!(hub.subscriber_count("session:1").await, 2);

        hub.leave(b, "session:1").await;
        assert!(!hub.is_joined(b, "session:1").await);

        hub.disconnect(a).await;
        assert_eq!(hub.subscriber_count("session:1").await, 0);
        assert_eq!(hub.subscriber_count(QUEUE_CHANNEL).await, 0);
    }

    #[tokio::test]
    async fn dropped_receivers_do_not_fail_publish() {
        let hub = RealtimeHub::new();
        let (a, rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        hub.join(a, "session:1").await;
        hub.join(b, "session:1").await;
        drop(rx_a);

        let delivered = hub.publish("session:1", EVENT_MESSAGE_NEW, json!({})).await;
        assert_eq!(delivered, 1);
        assert!(rx_b.recv().await.is_some());
    }

    #[test]
    fn session_channels_are_namespaced() {
        assert_eq!(session_channel("abc"), "session:abc");
    }
}
