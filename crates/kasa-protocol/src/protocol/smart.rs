//! SMART protocol: `method`/`params` requests with `multipleRequest`
//! batching and list pagination.
//!
//! Requests with several methods are split into `multipleRequest` batches of
//! [`DeviceConfig::batch_size`] entries. Some firmware fails to decode large
//! batches; when a batch comes back with `JSON_DECODE_FAIL_ERROR` or
//! `INTERNAL_UNKNOWN_ERROR` the batch size drops to 1 for the rest of the
//! protocol's life and the query is retried.
//!
//! List results carrying `start_index` and `sum` are fetched page by page
//! until the list is complete.
//!
//! The camera flavor sends every method through `multipleRequest`, except
//! for the raw `get`/`set`/`do` verbs which carry their sections at the top
//! level of the request.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::{
    config::DeviceConfig,
    error::Error,
    error_code::{SmartErrorCode, response_error_code},
    protocol::{Execute, MethodResult, Protocol, Request, Response, query_with_retries},
    transport::{Transport, b64, now_millis},
};

/// Methods that devices refuse inside a `multipleRequest`.
const FORCE_SINGLE_METHODS: &[&str] = &["getConnectStatus", "scanApList"];

/// Additional camera methods that must be sent on their own.
const CAMERA_FORCE_SINGLE_METHODS: &[&str] = &["getSdCardFormatStatus"];

/// Raw camera verbs sent as single requests.
const CAMERA_SINGLE_VERBS: &[&str] = &["get", "set", "do", "multipleRequest"];

const MULTIPLE_REQUEST: &str = "multipleRequest";

/// Request shape spoken by a [`SmartProtocol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartFlavor {
    /// Plugs, bulbs, switches and hubs.
    Smart,
    /// Cameras and doorbells.
    Camera,
}

/// Protocol for `SMART.*` devices.
pub struct SmartProtocol {
    transport: Mutex<Box<dyn Transport>>,
    config: DeviceConfig,
    flavor: SmartFlavor,
    terminal_uuid: String,
    batch_size: AtomicUsize,
}

/// Returns `base64(md5(uuid4))`, the per-client terminal identifier.
fn generate_terminal_uuid() -> String {
    b64::encode(Md5::digest(uuid::Uuid::new_v4().as_bytes()))
}

/// Treats `null` and `{}` as absent parameters.
fn effective_params(params: Option<&Value>) -> Option<&Value> {
    params.filter(|p| match p {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}

/// Builds a raw camera verb request, hoisting the verb's sections to the
/// top level.
fn camera_single_request(verb: &str, body: &Value) -> Value {
    if verb == MULTIPLE_REQUEST {
        return json!({"method": MULTIPLE_REQUEST, "params": body});
    }
    let mut request = Map::new();
    request.insert("method".into(), Value::String(verb.to_string()));
    if let Some(sections) = body.as_object() {
        request.extend(sections.clone());
    }
    Value::Object(request)
}

impl SmartProtocol {
    /// Wraps `transport`. The batch size comes from `config`.
    pub fn new(transport: Box<dyn Transport>, config: DeviceConfig, flavor: SmartFlavor) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            transport: Mutex::new(transport),
            config,
            flavor,
            terminal_uuid: generate_terminal_uuid(),
            batch_size: AtomicUsize::new(batch_size),
        }
    }

    /// Request shape this protocol speaks.
    pub fn flavor(&self) -> SmartFlavor {
        self.flavor
    }

    /// Current `multipleRequest` batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    fn is_force_single(&self, method: &str) -> bool {
        FORCE_SINGLE_METHODS.contains(&method)
            || (self.flavor == SmartFlavor::Camera && CAMERA_FORCE_SINGLE_METHODS.contains(&method))
    }

    fn smart_request(&self, method: &str, params: Option<&Value>) -> Result<String, Error> {
        let mut request = Map::new();
        request.insert("method".into(), Value::String(method.to_string()));
        if let Some(params) = effective_params(params) {
            request.insert("params".into(), params.clone());
        }
        request.insert("request_time_milis".into(), now_millis().into());
        request.insert(
            "terminal_uuid".into(),
            Value::String(self.terminal_uuid.clone()),
        );
        Ok(serde_json::to_string(&request)?)
    }

    /// Sends one method and returns the raw response envelope.
    async fn send_method(
        &self,
        transport: &mut dyn Transport,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, Error> {
        let body = self.smart_request(method, params)?;
        debug!(host = %transport.host(), method, "Sending SMART request");
        transport.send(&body).await
    }

    /// Sends one method, raising on a device error code.
    async fn send_single(
        &self,
        transport: &mut dyn Transport,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, Error> {
        let mut response = self.send_method(transport, method, params).await?;
        let code = response_error_code(&response);
        if !code.is_success() {
            return Err(Error::from_code(code, method));
        }
        Ok(response
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Sends one method, embedding a device error code as a marker.
    async fn send_single_marker(
        &self,
        transport: &mut dyn Transport,
        method: &str,
        params: Option<&Value>,
    ) -> Result<MethodResult, Error> {
        let mut response = self.send_method(transport, method, params).await?;
        let code = response_error_code(&response);
        if !code.is_success() {
            debug!(host = %transport.host(), method, ?code, "Method returned an error");
            return Ok(MethodResult::Err(code));
        }
        let mut result = response
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null);
        self.fetch_list_pages(transport, method, &mut result)
            .await?;
        Ok(MethodResult::Ok(result))
    }

    /// Completes a paginated list result in place. Follow-up pages carry
    /// only `start_index`.
    async fn fetch_list_pages(
        &self,
        transport: &mut dyn Transport,
        method: &str,
        result: &mut Value,
    ) -> Result<(), Error> {
        let Some(fields) = result.as_object() else {
            return Ok(());
        };
        if !fields.contains_key("start_index") {
            return Ok(());
        }
        let Some(sum) = fields.get("sum").and_then(Value::as_u64) else {
            return Ok(());
        };
        let Some(list_name) = fields
            .iter()
            .find(|(_, value)| value.is_array())
            .map(|(name, _)| name.clone())
        else {
            return Ok(());
        };

        loop {
            let fetched = result[&list_name].as_array().map_or(0, Vec::len);
            if fetched as u64 >= sum {
                return Ok(());
            }

            let page_params = json!({"start_index": fetched});
            let mut page = self
                .send_single(transport, method, Some(&page_params))
                .await?;

            let items = match page.get_mut(&list_name).map(Value::take) {
                Some(Value::Array(items)) if !items.is_empty() => items,
                _ => {
                    error!(
                        host = %transport.host(),
                        method,
                        fetched,
                        sum,
                        "Device returned an empty page"
                    );
                    return Ok(());
                }
            };
            debug!(host = %transport.host(), method, fetched, page = items.len(), sum, "Fetched list page");
            if let Some(list) = result.get_mut(&list_name).and_then(Value::as_array_mut) {
                list.extend(items);
            }
        }
    }

    async fn execute_single(
        &self,
        transport: &mut dyn Transport,
        method: &str,
        params: &Value,
    ) -> Result<Response, Error> {
        let mut result = self.send_single(transport, method, Some(params)).await?;
        self.fetch_list_pages(transport, method, &mut result)
            .await?;
        Ok(Response::from([(method.to_string(), MethodResult::Ok(result))]))
    }

    async fn execute_camera_verb(
        &self,
        transport: &mut dyn Transport,
        verb: &str,
        body: &Value,
    ) -> Result<Response, Error> {
        let request = serde_json::to_string(&camera_single_request(verb, body))?;
        debug!(host = %transport.host(), method = verb, "Sending camera request");
        let mut response = transport.send(&request).await?;

        let code = response_error_code(&response);
        if !code.is_success() {
            return Err(Error::from_code(code, verb));
        }

        let result = response
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null);
        let empty = match &result {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if verb == "get" && empty {
            return Err(Error::Device {
                code: SmartErrorCode::InternalUnknownError,
                message: "get returned an empty response".into(),
            });
        }
        Ok(Response::from([(verb.to_string(), MethodResult::Ok(result))]))
    }

    async fn execute_multiple(
        &self,
        transport: &mut dyn Transport,
        request: &Request,
    ) -> Result<Response, Error> {
        let mut results = Response::new();
        let batch_size = self.batch_size();

        if batch_size > 1 {
            let batched: Vec<Value> = request
                .iter()
                .filter(|(method, _)| !self.is_force_single(method))
                .map(|(method, params)| match effective_params(Some(params)) {
                    Some(params) => json!({"method": method, "params": params}),
                    None => json!({"method": method}),
                })
                .collect();
            let batch_count = batched.len().div_ceil(batch_size);

            for (index, batch) in batched.chunks(batch_size).enumerate() {
                let batch_name = format!("multi-request-batch-{}-of-{batch_count}", index + 1);
                let params = json!({"requests": batch});
                let mut response = self
                    .send_method(transport, MULTIPLE_REQUEST, Some(&params))
                    .await?;

                let code = response_error_code(&response);
                if !code.is_success() {
                    if matches!(
                        code,
                        SmartErrorCode::JsonDecodeFailError | SmartErrorCode::InternalUnknownError
                    ) {
                        self.batch_size.store(1, Ordering::Relaxed);
                        warn!(
                            host = %transport.host(),
                            batch = %batch_name,
                            ?code,
                            "Batch rejected, disabling multi requests"
                        );
                        return Err(Error::Retryable {
                            code: Some(code),
                            message: format!("{batch_name}: multi requests disabled after {code:?}"),
                        });
                    }
                    if code.is_retryable() || code.is_auth_error() {
                        return Err(Error::from_code(code, batch_name));
                    }
                    warn!(
                        host = %transport.host(),
                        batch = %batch_name,
                        ?code,
                        "Batch failed, querying its methods individually"
                    );
                    continue;
                }

                let Some(Value::Array(responses)) = response
                    .pointer_mut("/result/responses")
                    .map(Value::take)
                else {
                    warn!(host = %transport.host(), batch = %batch_name, "Batch response has no responses");
                    continue;
                };

                for mut entry in responses {
                    let Some(method) = entry.get("method").and_then(Value::as_str).map(String::from)
                    else {
                        debug!(host = %transport.host(), batch = %batch_name, "Skipping response without method");
                        continue;
                    };
                    let code = response_error_code(&entry);
                    if !code.is_success() {
                        results.insert(method, MethodResult::Err(code));
                        continue;
                    }
                    let mut result = entry
                        .get_mut("result")
                        .map(Value::take)
                        .unwrap_or(Value::Null);
                    self.fetch_list_pages(transport, &method, &mut result)
                        .await?;
                    results.insert(method, MethodResult::Ok(result));
                }
            }
        }

        // Batches stop at the first failing method; query anything missing on its own.
        for (method, params) in request {
            if results.contains_key(method) {
                continue;
            }
            let result = self
                .send_single_marker(transport, method, Some(params))
                .await?;
            results.insert(method.clone(), result);
        }

        Ok(results)
    }
}

#[async_trait]
impl Execute for SmartProtocol {
    async fn execute(
        &self,
        transport: &mut dyn Transport,
        request: &Request,
    ) -> Result<Response, Error> {
        match (self.flavor, request.iter().next()) {
            (SmartFlavor::Smart, Some((method, params))) if request.len() == 1 => {
                self.execute_single(transport, method, params).await
            }
            (SmartFlavor::Camera, Some((verb, body)))
                if request.len() == 1 && CAMERA_SINGLE_VERBS.contains(&verb.as_str()) =>
            {
                self.execute_camera_verb(transport, verb, body).await
            }
            _ => self.execute_multiple(transport, request).await,
        }
    }
}

#[async_trait]
impl Protocol for SmartProtocol {
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

impl std::fmt::Debug for SmartProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartProtocol")
            .field("host", &self.config.host)
            .field("flavor", &self.flavor)
            .field("batch_size", &self.batch_size())
            .finish()
    }
}
