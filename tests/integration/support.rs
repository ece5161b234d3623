#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use zygote::bootstrap::provision;
use zygote::frame::{Channel, Envelope, Frame};
use zygote::hub::Hub;
use zygote::runtime::LifecycleState;
use zygote::store::{MemoryStorage, Storage};
use zygote::types::Data;

pub struct Fixture {
    pub storage: Arc<MemoryStorage>,
    pub hub: Arc<Hub>,
}

impl Fixture {
    pub fn new() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let hub = Arc::new(Hub::new(storage.clone() as Arc<dyn Storage>));
        Self { storage, hub }
    }

    /// Provision `name` into `spaces` and return its token
    pub fn agent(&self, name: &str, spaces: &[&str]) -> String {
        let spaces: Vec<String> = spaces.iter().map(|s| s.to_string()).collect();
        provision(self.storage.as_ref(), name, &spaces).unwrap().token
    }
}

pub fn data(value: serde_json::Value) -> Data {
    value.as_object().cloned().unwrap_or_default()
}

pub async fn wait_for_state(state: &mut watch::Receiver<LifecycleState>, target: LifecycleState) {
    tokio::time::timeout(Duration::from_secs(10), state.wait_for(|s| *s == target))
        .await
        .expect("lifecycle state not reached in time")
        .expect("runtime dropped its lifecycle");
}

/// Next routed event on a raw session, skipping command and error traffic
pub async fn next_event(receiver: &mut mpsc::UnboundedReceiver<Envelope>) -> Frame {
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("no envelope in time")
            .expect("session closed");
        if let Channel::Event(_) = envelope.parse_channel() {
            return Frame::from_payload(&envelope.channel, envelope.payload).unwrap();
        }
    }
}
