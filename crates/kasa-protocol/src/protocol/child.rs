//! Child device access through a parent's protocol.
//!
//! Hubs and power strips expose their children through an envelope on the
//! parent's own session. The envelope depends on the parent's family:
//!
//! - SMART: `control_child` with `requestData`; several calls are nested as
//!   a `multipleRequest`.
//! - SMART camera: one `controlChild` call per method inside an outer
//!   `multipleRequest`.
//! - IOT: a `context` object naming the child next to the module requests.
//!
//! The wrapper has no session of its own, so `close` and `reset` do nothing.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    config::DeviceConfig,
    error::Error,
    error_code::{SmartErrorCode, response_error_code},
    protocol::{DeviceProtocol, MethodResult, Protocol, Request, Response, SmartFlavor},
};

/// Protocol for one child device, routed through its parent.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use kasa_protocol::{
///     DeviceConfig,
///     protocol::{ChildProtocol, DEFAULT_RETRY_COUNT, DeviceProtocol, Protocol, request},
/// };
/// use serde_json::json;
///
/// # async fn run(parent: Arc<DeviceProtocol>) -> kasa_protocol::Result<()> {
/// let child = ChildProtocol::new(parent, "802D2B1A");
/// let response = child
///     .query(&request(json!({"get_device_info": null}))?, DEFAULT_RETRY_COUNT)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChildProtocol {
    device_id: String,
    parent: Arc<DeviceProtocol>,
}

impl ChildProtocol {
    /// Creates a wrapper for `device_id` on `parent`.
    pub fn new(parent: Arc<DeviceProtocol>, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            parent,
        }
    }

    /// Child device id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn query_smart(&self, request: &Request, retry_count: usize) -> Result<Response, Error> {
        let (method, params) = match request.iter().next() {
            Some((method, params)) if request.len() == 1 => (method.clone(), params.clone()),
            _ => {
                let requests: Vec<Value> = request
                    .iter()
                    .map(|(method, params)| match params {
                        Value::Null => json!({"method": method}),
                        params => json!({"method": method, "params": params}),
                    })
                    .collect();
                ("multipleRequest".to_string(), json!({"requests": requests}))
            }
        };

        let wrapped = super::request(json!({
            "control_child": {
                "device_id": self.device_id,
                "requestData": {"method": method, "params": params},
            }
        }))?;
        debug!(device_id = %self.device_id, method = %method, "Sending child request");

        let mut response = self.parent.query(&wrapped, retry_count).await?;
        let envelope = response
            .remove("control_child")
            .ok_or_else(|| Error::Protocol("Response has no control_child".into()))?
            .into_result("control_child")?;

        let Some(response_data) = envelope.get("responseData") else {
            return Ok(Response::from([(method, MethodResult::Ok(envelope))]));
        };
        let mut result = response_data.get("result").cloned().unwrap_or(Value::Null);

        if let Some(Value::Array(responses)) = result.get_mut("responses").map(Value::take) {
            let mut results = Response::new();
            for entry in responses {
                let Some(name) = entry.get("method").and_then(Value::as_str) else {
                    continue;
                };
                let code = response_error_code(&entry);
                let value = if code.is_success() {
                    MethodResult::Ok(entry.get("result").cloned().unwrap_or(Value::Null))
                } else {
                    MethodResult::Err(code)
                };
                results.insert(name.to_string(), value);
            }
            return Ok(results);
        }

        let code = response_error_code(response_data);
        if !code.is_success() {
            return Err(Error::from_code(code, &method));
        }
        Ok(Response::from([(method, MethodResult::Ok(result))]))
    }

    async fn query_camera(&self, request: &Request, retry_count: usize) -> Result<Response, Error> {
        let methods: Vec<&String> = request.keys().collect();
        let requests: Vec<Value> = request
            .iter()
            .map(|(method, params)| {
                json!({
                    "method": "controlChild",
                    "params": {
                        "childControl": {
                            "device_id": self.device_id,
                            "request_data": {"method": method, "params": params},
                        }
                    }
                })
            })
            .collect();
        let wrapped = super::request(json!({"multipleRequest": {"requests": requests}}))?;
        debug!(device_id = %self.device_id, calls = methods.len(), "Sending camera child request");

        let mut response = self.parent.query(&wrapped, retry_count).await?;
        let outer = response
            .remove("multipleRequest")
            .ok_or_else(|| Error::Protocol("Response has no multipleRequest".into()))?
            .into_result("multipleRequest")?;
        let responses = outer
            .get("responses")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Protocol("multipleRequest response has no responses".into()))?;

        let raise_on_error = methods.len() == 1;
        let mut results = Response::new();
        for (index, method) in methods.into_iter().enumerate() {
            let value = match camera_child_result(responses.get(index)) {
                Ok(result) => MethodResult::Ok(result),
                Err(code) if raise_on_error => return Err(Error::from_code(code, method)),
                Err(code) => MethodResult::Err(code),
            };
            results.insert(method.clone(), value);
        }
        Ok(results)
    }

    async fn query_iot(&self, request: &Request, retry_count: usize) -> Result<Response, Error> {
        let mut wrapped = request.clone();
        wrapped.insert(
            "context".into(),
            json!({"child_ids": [self.device_id]}),
        );
        debug!(device_id = %self.device_id, modules = request.len(), "Sending IOT child request");
        self.parent.query(&wrapped, retry_count).await
    }
}

/// Unwraps one `controlChild` entry of a camera batch. A missing entry, or
/// one that succeeded without `response_data`, counts as an unknown error.
fn camera_child_result(entry: Option<&Value>) -> Result<Value, SmartErrorCode> {
    let entry = entry.ok_or(SmartErrorCode::InternalUnknownError)?;
    let Some(response_data) = entry
        .pointer("/result/response_data")
        .filter(|data| !data.is_null())
    else {
        let code = response_error_code(entry);
        return Err(if code.is_success() {
            SmartErrorCode::InternalUnknownError
        } else {
            code
        });
    };

    let code = response_error_code(response_data);
    if !code.is_success() {
        return Err(code);
    }
    Ok(response_data.get("result").cloned().unwrap_or(Value::Null))
}

#[async_trait]
impl Protocol for ChildProtocol {
    async fn query(&self, request: &Request, retry_count: usize) -> Result<Response, Error> {
        match self.parent.as_ref() {
            DeviceProtocol::Iot(_) => self.query_iot(request, retry_count).await,
            DeviceProtocol::Smart(p) | DeviceProtocol::SmartCam(p) => match p.flavor() {
                SmartFlavor::Smart => self.query_smart(request, retry_count).await,
                SmartFlavor::Camera => self.query_camera(request, retry_count).await,
            },
            DeviceProtocol::Child(_) => Err(Error::UnsupportedDevice(
                "nested child devices are not supported".into(),
            )),
        }
    }

    async fn close(&self) {}

    async fn reset(&self) {}

    fn config(&self) -> &DeviceConfig {
        self.parent.config()
    }
}
