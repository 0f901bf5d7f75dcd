//! `eth_subscription` bookkeeping for one socket.
//!
//! The table lives inside the socket task, so it needs no locking. Nothing
//! here survives a reconnect: closing the table ends every receiver and the
//! consumer resubscribes on the next connection from its own cursor.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub type Notifications = mpsc::UnboundedReceiver<Value>;

#[derive(Default)]
pub struct SubscriptionTable {
    routes: HashMap<String, mpsc::UnboundedSender<Value>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn the `result` of an `eth_subscribe` call into a notification channel.
    pub fn confirm(&mut self, result: Value) -> Result<Notifications, TransportError> {
        let Value::String(id) = result else {
            return Err(TransportError::Other(format!("eth_subscribe returned {result}")));
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(subscription = %id, "subscription confirmed");
        self.routes.insert(id.to_ascii_lowercase(), tx);
        Ok(rx)
    }

    /// Deliver the `params` of an `eth_subscription` notification.
    ///
    /// A route whose receiver was dropped is removed. Returns `false` when the
    /// notification matched no live subscription.
    pub fn route(&mut self, params: &Value) -> bool {
        let Some(id) = params.get("subscription").and_then(Value::as_str) else {
            tracing::warn!("eth_subscription notification without id");
            return false;
        };
        let id = id.to_ascii_lowercase();
        let Some(tx) = self.routes.get(&id) else {
            tracing::debug!(subscription = %id, "notification for unknown subscription");
            return false;
        };
        let payload = params.get("result").cloned().unwrap_or(Value::Null);
        if tx.send(payload).is_err() {
            self.routes.remove(&id);
            return false;
        }
        true
    }

    /// End every subscription.
    pub fn close_all(&mut self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn confirmed_subscription_receives_results() {
        let mut table = SubscriptionTable::new();
        let mut rx = table.confirm(json!("0xAB")).unwrap();
        assert!(table.route(&json!({"subscription": "0xab", "result": {"blockNumber": "0x1"}})));
        assert_eq!(rx.try_recv().unwrap()["blockNumber"], "0x1");
    }

    #[test]
    fn non_string_confirmation_is_an_error() {
        let mut table = SubscriptionTable::new();
        assert!(table.confirm(json!(12)).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let mut table = SubscriptionTable::new();
        drop(table.confirm(json!("0x1")).unwrap());
        assert!(!table.route(&json!({"subscription": "0x1", "result": null})));
        assert!(table.is_empty());
    }

    #[test]
    fn close_all_ends_receivers() {
        let mut table = SubscriptionTable::new();
        let mut rx = table.confirm(json!("0xa")).unwrap();
        table.close_all();
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }
}
