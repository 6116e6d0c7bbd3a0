//! Legacy IOT protocol.
//!
//! IOT requests are nested module → method → params objects, for example
//! `{"system":{"get_sysinfo":{}}}`, and the device answers with the same
//! module keys. Module results are returned verbatim; the protocol only
//! classifies transport failures.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    config::DeviceConfig,
    error::Error,
    protocol::{Execute, MethodResult, Protocol, Request, Response, query_with_retries},
    transport::Transport,
};

/// Protocol for `IOT.*` devices over the legacy XOR or KLAP v1 transport.
pub struct IotProtocol {
    transport: Mutex<Box<dyn Transport>>,
    config: DeviceConfig,
}

impl IotProtocol {
    /// Wraps `transport`.
    pub fn new(transport: Box<dyn Transport>, config: DeviceConfig) -> Self {
        Self {
            transport: Mutex::new(transport),
            config,
        }
    }
}

#[async_trait]
impl Execute for IotProtocol {
    async fn execute(
        &self,
        transport: &mut dyn Transport,
        request: &Request,
    ) -> Result<Response, Error> {
        let payload = serde_json::to_string(request)?;
        debug!(host = %transport.host(), modules = request.len(), "Sending IOT request");

        match transport.send(&payload).await? {
            Value::Object(modules) => Ok(modules
                .into_iter()
                .map(|(module, result)| (module, MethodResult::Ok(result)))
                .collect()),
            other => Err(Error::ParseError(format!(
                "IOT response is not an object: {other}"
            ))),
        }
    }
}

#[async_trait]
impl Protocol for IotProtocol {
    async fn query(&self, request: &Request, retry_count: usize) -> Result<Response, Error> {
        query_with_retries(self, &self.transport, request, retry_count).await
    }

    async fn close(&self) {
        self.transport.lock().await.close().await;
    }

    async fn reset(&self) {
        self.transport.lock().await.reset().await;
    }

    fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl std::fmt::Debug for IotProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IotProtocol")
            .field("host", &self.config.host)
            .finish()
    }
}
