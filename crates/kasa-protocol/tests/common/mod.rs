#![allow(clippy::unwrap_used, dead_code)]
// Scripted transport shared by the protocol integration tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use kasa_protocol::{
    DeviceConfig, EncryptionType, Error, Transport,
    protocol::{IotProtocol, SmartFlavor, SmartProtocol},
};
use serde_json::Value;

type Fallback = Box<dyn Fn() -> Result<Value, Error> + Send + Sync>;

#[derive(Default)]
struct Script {
    replies: Mutex<VecDeque<Result<Value, Error>>>,
    fallback: Mutex<Option<Fallback>>,
    sent: Mutex<Vec<Value>>,
    delay: Mutex<Option<Duration>>,
    resets: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone, Default)]
pub struct MockHandle {
    script: Arc<Script>,
}

impl MockHandle {
    /// Queues a successful reply.
    pub fn reply(&self, value: Value) -> &Self {
        self.script.replies.lock().unwrap().push_back(Ok(value));
        self
    }

    /// Queues a failed send.
    pub fn fail(&self, error: Error) -> &Self {
        self.script.replies.lock().unwrap().push_back(Err(error));
        self
    }

    /// Answer used once the queue is empty.
    pub fn otherwise(&self, fallback: impl Fn() -> Result<Value, Error> + Send + Sync + 'static) {
        *self.script.fallback.lock().unwrap() = Some(Box::new(fallback));
    }

    /// Makes every send take `delay`.
    pub fn delay(&self, delay: Duration) {
        *self.script.delay.lock().unwrap() = Some(delay);
    }

    /// Requests received so far, decoded.
    pub fn sent(&self) -> Vec<Value> {
        self.script.sent.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.script.sent.lock().unwrap().len()
    }

    pub fn reset_count(&self) -> usize {
        self.script.resets.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.script.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Transport that records requests and answers from a script.
pub struct MockTransport {
    handle: MockHandle,
}

/// Creates a mock transport and the handle that drives it.
pub fn mock() -> (Box<dyn Transport>, MockHandle) {
    let handle = MockHandle::default();
    (
        Box::new(MockTransport {
            handle: handle.clone(),
        }),
        handle,
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, request: &str) -> Result<Value, Error> {
        let script = &self.handle.script;
        script
            .sent
            .lock()
            .unwrap()
            .push(serde_json::from_str(request).unwrap());

        let current = script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *script.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        script.in_flight.fetch_sub(1, Ordering::SeqCst);

        let queued = script.replies.lock().unwrap().pop_front();
        match queued {
            Some(reply) => reply,
            None => match script.fallback.lock().unwrap().as_ref() {
                Some(fallback) => fallback(),
                None => Err(Error::Protocol("mock transport has no reply queued".into())),
            },
        }
    }

    async fn reset(&mut self) {
        self.handle.script.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&mut self) {}

    fn encryption_type(&self) -> EncryptionType {
        EncryptionType::Klap
    }

    fn host(&self) -> &str {
        "127.0.0.1"
    }

    fn port(&self) -> u16 {
        80
    }
}

pub fn config() -> DeviceConfig {
    DeviceConfig::new("127.0.0.1")
}

pub fn smart_protocol(flavor: SmartFlavor, batch_size: usize) -> (SmartProtocol, MockHandle) {
    let (transport, handle) = mock();
    let config = config().with_batch_size(batch_size);
    (SmartProtocol::new(transport, config, flavor), handle)
}

pub fn iot_protocol() -> (IotProtocol, MockHandle) {
    let (transport, handle) = mock();
    (IotProtocol::new(transport, config()), handle)
}
