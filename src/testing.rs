//! Shared test fixtures: an in-memory transport double with failure
//! injection, and hub construction helpers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::db::Database;
use crate::hub::PulseHub;
use crate::transport::{ClientChannel, TransportError};

/// Records every payload per connection; configured ids fail with `Gone`.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<HashMap<String, Vec<String>>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every future delivery to `connection_id` fail.
    pub fn fail_connection(&self, connection_id: &str) {
        self.failing
            .lock()
            .expect("failing mutex poisoned")
            .insert(connection_id.to_string());
    }

    /// Payloads delivered to `connection_id`, in send order.
    pub fn sent_to(&self, connection_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .expect("sent mutex poisoned")
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Last payload delivered to `connection_id`, parsed as JSON.
    pub fn last_json(&self, connection_id: &str) -> Option<serde_json::Value> {
        self.sent_to(connection_id)
            .last()
            .map(|raw| serde_json::from_str(raw).expect("valid JSON payload"))
    }
}

#[async_trait]
impl ClientChannel for RecordingChannel {
    async fn send(&self, connection_id: &str, payload: &str) -> Result<(), TransportError> {
        if self
            .failing
            .lock()
            .expect("failing mutex poisoned")
            .contains(connection_id)
        {
            return Err(TransportError::Gone(connection_id.to_string()));
        }
        self.sent
            .lock()
            .expect("sent mutex poisoned")
            .entry(connection_id.to_string())
            .or_default()
            .push(payload.to_string());
        Ok(())
    }
}

/// Wraps a [`RecordingChannel`] and holds the first delivery to one
/// connection until released. Drives delivery-ordering scenarios where a
/// send must stay in flight while something else races it.
pub struct GatedChannel {
    inner: Arc<RecordingChannel>,
    hold_first_to: Mutex<Option<String>>,
    arrived: Notify,
    gate: Semaphore,
}

impl GatedChannel {
    pub fn new(hold_first_to: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: RecordingChannel::new(),
            hold_first_to: Mutex::new(Some(hold_first_to.to_string())),
            arrived: Notify::new(),
            gate: Semaphore::new(0),
        })
    }

    /// Wait until the held delivery has reached the gate.
    pub async fn held_delivery_arrived(&self) {
        self.arrived.notified().await;
    }

    /// Let the held delivery proceed.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn recorder(&self) -> Arc<RecordingChannel> {
        self.inner.clone()
    }
}

#[async_trait]
impl ClientChannel for GatedChannel {
    async fn send(&self, connection_id: &str, payload: &str) -> Result<(), TransportError> {
        let held = {
            let mut hold = self
                .hold_first_to
                .lock()
                .expect("hold mutex poisoned");
            if hold.as_deref() == Some(connection_id) {
                hold.take();
                true
            } else {
                false
            }
        };
        if held {
            self.arrived.notify_one();
            let _permit = self.gate.acquire().await.expect("gate closed");
        }
        self.inner.send(connection_id, payload).await
    }
}

/// A hub over an in-memory database and the given transport double.
pub fn mem_hub(transport: Arc<RecordingChannel>) -> PulseHub {
    let db = Arc::new(Database::open_in_memory().expect("in-memory DB"));
    PulseHub::new(db, "dep-test", transport).expect("hub construction")
}
