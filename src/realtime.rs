//! Live fan-out of conversation changes. Each conversation pair owns a
//! broadcast channel; every subscriber holds an independent receiver
//! and sees that pair's mutations in store order. The message log stays
//! authoritative: a dropped or lagged subscriber recovers by replaying
//! current state, never by trusting the channel.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::db::Message;

/// Per-pair channel depth. A subscriber that falls further behind than
/// this observes `Delivery::Lagged` and must re-snapshot.
pub const CHANNEL_CAPACITY: usize = 256;

/// Order-normalized conversation pair: the same two users always map
/// to the same key regardless of direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    a: String,
    b: String,
}

impl PairKey {
    pub fn new(x: &str, y: &str) -> Self {
        if x <= y {
            PairKey {
                a: x.to_string(),
                b: y.to_string(),
            }
        } else {
            PairKey {
                a: y.to_string(),
                b: x.to_string(),
            }
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.a == user_id || self.b == user_id
    }
}

#[derive(Debug, Clone)]
pub enum ConversationEvent {
    MessageAppended(Message),
    MessageRead { message_id: i64, reader_id: String },
    Presence {
        user_id: String,
        is_online: bool,
        last_seen: i64,
    },
}

/// What a subscriber sees on each wakeup.
#[derive(Debug)]
pub enum Delivery {
    Event(ConversationEvent),
    /// The subscriber fell behind the channel. Nothing is lost
    /// server-side; re-query the store for current state.
    Lagged,
}

/// Registry of live subscriptions, keyed by conversation pair.
#[derive(Default)]
pub struct Subscriptions {
    channels: Mutex<HashMap<PairKey, broadcast::Sender<ConversationEvent>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a live subscription for the pair. Multiple subscriptions
    /// to the same pair are independent; each receives every update.
    pub fn subscribe(&self, user_a: &str, user_b: &str) -> SubscriptionHandle {
        let pair = PairKey::new(user_a, user_b);
        let mut channels = self.channels.lock().unwrap();
        let sender = channels
            .entry(pair.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);

        SubscriptionHandle {
            pair,
            receiver: Some(sender.subscribe()),
        }
    }

    pub fn publish_message(&self, message: &Message) {
        self.publish(
            PairKey::new(&message.sender_id, &message.receiver_id),
            ConversationEvent::MessageAppended(message.clone()),
        );
    }

    pub fn publish_read(&self, message: &Message, reader_id: &str) {
        self.publish(
            PairKey::new(&message.sender_id, &message.receiver_id),
            ConversationEvent::MessageRead {
                message_id: message.id,
                reader_id: reader_id.to_string(),
            },
        );
    }

    /// Presence reaches every live pair the user participates in.
    /// Pairs whose last subscriber is gone are pruned along the way.
    pub fn publish_presence(&self, user_id: &str, is_online: bool, last_seen: i64) {
        let mut channels = self.channels.lock().unwrap();
        channels.retain(|pair, sender| {
            if pair.involves(user_id) {
                let _ = sender.send(ConversationEvent::Presence {
                    user_id: user_id.to_string(),
                    is_online,
                    last_seen,
                });
            }
            sender.receiver_count() > 0
        });
    }

    fn publish(&self, pair: PairKey, event: ConversationEvent) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(sender) = channels.get(&pair) {
            if sender.send(event).is_err() {
                // No receivers left; drop the pair entry.
                channels.remove(&pair);
            }
        }
    }

    /// Pairs with at least one live subscriber.
    pub fn active_pairs(&self) -> usize {
        let mut channels = self.channels.lock().unwrap();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels.len()
    }
}

/// A single subscriber's view of one conversation pair. Dropping the
/// handle (or calling `unsubscribe`) closes it; pushes racing the
/// close are silently discarded.
pub struct SubscriptionHandle {
    pair: PairKey,
    receiver: Option<broadcast::Receiver<ConversationEvent>>,
}

impl SubscriptionHandle {
    pub fn pair(&self) -> &PairKey {
        &self.pair
    }

    /// Wait for the next delivery. Returns `None` once the
    /// subscription is closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(_)) => Some(Delivery::Lagged),
            Err(broadcast::error::RecvError::Closed) => {
                self.receiver = None;
                None
            }
        }
    }

    /// Close the subscription. Idempotent; safe concurrently with an
    /// in-flight publish.
    pub fn unsubscribe(&mut self) {
        self.receiver = None;
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }
}
