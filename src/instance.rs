//! Instance lifecycle management
//!
//! Every REST invocation of an operation is modelled as an *instance*: a
//! pollable resource that is created, optionally edited field by field,
//! started, and finally completes with either a response or an error.
//!
//! ```text
//! CREATED --start--> RUNNING --ok--> DONE
//!                            \--err-> ERRORED
//! ```
//!
//! Instances and both payload buckets live in repositories owned by the
//! [`InstanceManager`]. Each start spawns one tokio task that owns the
//! backing call; that task is the only writer of the response payload and
//! of the terminal state.
//!
//! Locking: every instance has its own mutex guarding the started
//! check-and-set and request payload edits. The payload maps may be locked
//! while an instance mutex is held, never the other way round, and the
//! instance map lock is released before any instance mutex is taken. No lock
//! is held across an `.await`.

use crate::backend::{status_error_text, RpcBackend};
use crate::error::{Error, Result};
use crate::metrics::{BackendTimer, GatewayMetrics};
use crate::routes::BoundOperation;
use crate::shutdown::{RequestGuard, ShutdownCoordinator};
use crate::streaming::{self, NdjsonStream, OutputSource};
use crate::type_mapper::coerce_value;
use crate::types::StreamClass;
use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tonic::Status;
use tracing::{debug, info, warn};

/// Lifecycle state derived from the instance flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Created,
    Running,
    Done,
    Errored,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Done | InstanceState::Errored)
    }
}

/// REST-visible handle of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub started: bool,
    pub done: bool,
    pub created_at: String,
    /// Empty until started
    pub started_at: String,
    /// Empty until terminal
    pub done_at: String,
    /// Empty unless the backing call failed
    pub error: String,
    pub linked_message_id: String,
}

impl Instance {
    fn new(id: String) -> Self {
        Self {
            linked_message_id: id.clone(),
            id,
            started: false,
            done: false,
            created_at: now(),
            started_at: String::new(),
            done_at: String::new(),
            error: String::new(),
        }
    }

    pub fn state(&self) -> InstanceState {
        match (self.started, self.done, self.error.is_empty()) {
            (_, true, true) => InstanceState::Done,
            (_, true, false) => InstanceState::Errored,
            (true, false, _) => InstanceState::Running,
            (false, false, _) => InstanceState::Created,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// Instance plus its inline output, as returned by `GET .../instances/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEnvelope {
    #[serde(flatten)]
    pub instance: Instance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<Value>,
}

/// Request bucket: one message, or the collected input stream
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    Message(Value),
    Stream(Vec<Value>),
}

/// Response bucket: one message, or the received output stream
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Message(Value),
    Stream(Vec<Value>),
}

/// Payloads keyed by linked message id
struct PayloadStore<T> {
    entries: RwLock<HashMap<String, T>>,
}

impl<T: Clone> PayloadStore<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, id: &str, payload: T) {
        self.entries.write().insert(id.to_string(), payload);
    }

    fn get(&self, id: &str) -> Option<T> {
        self.entries.read().get(id).cloned()
    }

    fn read<R>(&self, id: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries.read().get(id).map(f)
    }

    fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.entries.write().get_mut(id).map(f)
    }

    fn remove(&self, id: &str) -> Option<T> {
        self.entries.write().remove(id)
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }
}

struct InstanceCell {
    operation: Arc<BoundOperation>,
    instance: Mutex<Instance>,
    /// Bumped after every output append and on completion
    progress: watch::Sender<u64>,
}

impl InstanceCell {
    fn notify(&self) {
        self.progress.send_modify(|v| *v = v.wrapping_add(1));
    }
}

struct Repositories {
    instances: RwLock<HashMap<String, Arc<InstanceCell>>>,
    requests: PayloadStore<RequestPayload>,
    responses: PayloadStore<ResponsePayload>,
}

impl Repositories {
    fn cell(&self, id: &str) -> Result<Arc<InstanceCell>> {
        self.instances
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }
}

/// Owns instances and payloads and drives backing calls
#[derive(Clone)]
pub struct InstanceManager {
    repos: Arc<Repositories>,
    backend: Arc<dyn RpcBackend>,
    shutdown: Option<ShutdownCoordinator>,
}

impl std::fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceManager")
            .field("instances", &self.len())
            .finish()
    }
}

impl InstanceManager {
    pub fn new(backend: Arc<dyn RpcBackend>) -> Self {
        Self {
            repos: Arc::new(Repositories {
                instances: RwLock::new(HashMap::new()),
                requests: PayloadStore::new(),
                responses: PayloadStore::new(),
            }),
            backend,
            shutdown: None,
        }
    }

    /// Track running backing calls so graceful shutdown waits for them
    pub fn with_shutdown(mut self, coordinator: ShutdownCoordinator) -> Self {
        self.shutdown = Some(coordinator);
        self
    }

    pub fn len(&self) -> usize {
        self.repos.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.repos.instances.read().keys().cloned().collect()
    }

    /// Operation an instance was created for
    pub fn operation_of(&self, id: &str) -> Result<Arc<BoundOperation>> {
        Ok(self.repos.cell(id)?.operation.clone())
    }

    /// Create an instance, starting it right away when asked to
    ///
    /// `payload` is the initial request message. For request-streamed
    /// operations an array seeds the input stream and any other value
    /// becomes its first item.
    pub fn create(
        &self,
        operation: Arc<BoundOperation>,
        payload: Option<Value>,
        start_immediately: bool,
    ) -> Result<Instance> {
        let request = if operation.descriptor.request_is_stream {
            RequestPayload::Stream(match payload {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items,
                Some(item) => vec![item],
            })
        } else {
            match payload {
                None | Some(Value::Null) => RequestPayload::Message(Value::Object(Map::new())),
                Some(Value::Object(map)) => RequestPayload::Message(Value::Object(map)),
                Some(other) => {
                    return Err(Error::InvalidRequest(format!(
                        "request for {} must be a JSON object, got {}",
                        operation.name(),
                        other
                    )))
                }
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let instance = Instance::new(id.clone());
        let (progress, _) = watch::channel(0);
        let cell = Arc::new(InstanceCell {
            operation: operation.clone(),
            instance: Mutex::new(instance.clone()),
            progress,
        });

        self.repos.requests.insert(&id, request);
        self.repos.instances.write().insert(id.clone(), cell);
        GatewayMetrics::global().record_instance_created(&operation.descriptor.grpc_path());
        info!(instance_id = %id, operation = %operation.name(), "Instance created");

        if start_immediately {
            return self.start(&id);
        }
        Ok(instance)
    }

    /// Start the backing call; a no-op when already started
    pub fn start(&self, id: &str) -> Result<Instance> {
        let cell = self.repos.cell(id)?;

        let (snapshot, request) = {
            let mut instance = cell.instance.lock();
            if instance.started {
                return Ok(instance.clone());
            }
            let request = self
                .repos
                .requests
                .get(&instance.linked_message_id)
                .ok_or_else(|| Error::Internal(format!("request payload of {} missing", id)))?;
            if cell.operation.descriptor.response_is_stream {
                self.repos
                    .responses
                    .insert(&instance.linked_message_id, ResponsePayload::Stream(Vec::new()));
            }
            instance.started = true;
            instance.started_at = now();
            (instance.clone(), request)
        };

        info!(instance_id = %id, operation = %cell.operation.name(), "Instance started");

        let guard = self.shutdown.as_ref().map(ShutdownCoordinator::request_guard);
        let call = BackingCall {
            repos: self.repos.clone(),
            backend: self.backend.clone(),
            cell: cell.clone(),
            _guard: guard,
        };
        tokio::spawn(call.run(request));

        Ok(snapshot)
    }

    /// Replace one field of the stored request message
    ///
    /// Message-typed fields are replaced wholesale, not merged.
    pub fn update_field(&self, id: &str, field_name: &str, value: Value) -> Result<()> {
        let cell = self.repos.cell(id)?;
        let operation = &cell.operation;
        if operation.descriptor.request_is_stream {
            return Err(Error::InvalidRequest(format!(
                "{} streams its request, fields cannot be set individually",
                operation.name()
            )));
        }
        let field = operation.request.field(field_name).ok_or_else(|| {
            Error::InvalidRequest(format!(
                "{} has no field '{}'",
                operation.request.qualified_name, field_name
            ))
        })?;
        let value = coerce_value(field, value)?;

        let instance = cell.instance.lock();
        if instance.started {
            return Err(Error::InvalidState(format!(
                "instance {} already started, request is read-only",
                id
            )));
        }
        self.repos
            .requests
            .update(&instance.linked_message_id, |payload| {
                if let RequestPayload::Message(Value::Object(map)) = payload {
                    map.insert(field_name.to_string(), value);
                }
            })
            .ok_or_else(|| Error::Internal(format!("request payload of {} missing", id)))?;
        debug!(instance_id = %id, field = %field_name, "Request field updated");
        Ok(())
    }

    /// Apply `PATCH {started}`; only false to true is a transition
    pub fn patch_started(&self, id: &str, started: bool) -> Result<Instance> {
        let cell = self.repos.cell(id)?;
        let current = cell.instance.lock().clone();
        match (current.started, started) {
            (false, true) => self.start(id),
            (true, false) => Err(Error::InvalidState(format!(
                "instance {} already started and cannot be stopped",
                id
            ))),
            _ => Ok(current),
        }
    }

    /// Current instance, with the response inline once a unary response arrived
    pub fn get(&self, id: &str, include_output: bool) -> Result<InstanceEnvelope> {
        let cell = self.repos.cell(id)?;
        let instance = cell.instance.lock().clone();

        let out = if include_output
            && !cell.operation.descriptor.response_is_stream
            && instance.state() == InstanceState::Done
        {
            self.repos
                .responses
                .read(&instance.linked_message_id, |payload| match payload {
                    ResponsePayload::Message(value) => Some(value.clone()),
                    ResponsePayload::Stream(_) => None,
                })
                .flatten()
        } else {
            None
        };

        Ok(InstanceEnvelope { instance, out })
    }

    /// Whole response message of a successfully completed instance
    pub fn get_output(&self, id: &str) -> Result<Value> {
        let cell = self.repos.cell(id)?;
        if cell.operation.descriptor.response_is_stream {
            return Err(Error::InvalidRequest(format!(
                "{} streams its response, read it from the output stream",
                cell.operation.name()
            )));
        }
        let instance = cell.instance.lock().clone();
        match instance.state() {
            InstanceState::Done => {}
            InstanceState::Errored => {
                return Err(Error::InvalidState(format!(
                    "instance {} failed: {}",
                    id, instance.error
                )))
            }
            _ => {
                return Err(Error::InvalidState(format!(
                    "instance {} has not completed",
                    id
                )))
            }
        }

        match self.repos.responses.get(&instance.linked_message_id) {
            Some(ResponsePayload::Message(value)) => Ok(value),
            _ => Err(Error::Internal(format!("response payload of {} missing", id))),
        }
    }

    /// One field of the response message
    pub fn get_field(&self, id: &str, field_name: &str) -> Result<Value> {
        let operation = self.operation_of(id)?;
        if operation.response.field(field_name).is_none() {
            return Err(Error::InvalidRequest(format!(
                "{} has no field '{}'",
                operation.response.qualified_name, field_name
            )));
        }
        let output = self.get_output(id)?;
        Ok(output.get(field_name).cloned().unwrap_or(Value::Null))
    }

    /// Remove a terminal instance and both of its payloads
    pub fn delete(&self, id: &str) -> Result<Instance> {
        let cell = self.repos.cell(id)?;
        let instance = {
            let instance = cell.instance.lock();
            if !instance.is_terminal() {
                return Err(Error::InvalidState(format!(
                    "instance {} is still {}",
                    id,
                    if instance.started { "running" } else { "waiting to be started" }
                )));
            }
            self.repos.instances.write().remove(id);
            self.repos.requests.remove(&instance.linked_message_id);
            self.repos.responses.remove(&instance.linked_message_id);
            instance.clone()
        };
        cell.notify();
        info!(instance_id = %id, "Instance deleted");
        Ok(instance)
    }

    /// Append items to the input stream of a request-streamed instance
    ///
    /// Returns the number of buffered items.
    pub fn append_input(&self, id: &str, items: Vec<Value>) -> Result<usize> {
        let cell = self.repos.cell(id)?;
        if !cell.operation.descriptor.request_is_stream {
            return Err(Error::InvalidRequest(format!(
                "{} does not stream its request",
                cell.operation.name()
            )));
        }

        let instance = cell.instance.lock();
        if instance.started {
            return Err(Error::InvalidState(format!(
                "instance {} already started, input stream is closed",
                id
            )));
        }
        let appended = items.len();
        let total = self
            .repos
            .requests
            .update(&instance.linked_message_id, |payload| match payload {
                RequestPayload::Stream(buffer) => {
                    buffer.extend(items);
                    buffer.len()
                }
                RequestPayload::Message(_) => 0,
            })
            .ok_or_else(|| Error::Internal(format!("request payload of {} missing", id)))?;
        debug!(instance_id = %id, appended, total, "Input stream extended");
        Ok(total)
    }

    /// Stored output items of a response-streamed instance
    pub fn output_items(&self, id: &str) -> Result<Vec<Value>> {
        let (items, _) = self.output_source(id)?.snapshot(0)?;
        Ok(items)
    }

    /// NDJSON stream of the output: everything stored so far, then new
    /// items as they arrive, ending once the instance is terminal
    pub fn follow_output(&self, id: &str) -> Result<NdjsonStream> {
        let source = self.output_source(id)?;
        let progress = source.cell.progress.subscribe();
        Ok(streaming::follow(source, progress))
    }

    fn output_source(&self, id: &str) -> Result<StoredOutput> {
        let cell = self.repos.cell(id)?;
        if !cell.operation.descriptor.response_is_stream {
            return Err(Error::InvalidRequest(format!(
                "{} does not stream its response",
                cell.operation.name()
            )));
        }
        Ok(StoredOutput {
            repos: self.repos.clone(),
            cell,
        })
    }
}

struct StoredOutput {
    repos: Arc<Repositories>,
    cell: Arc<InstanceCell>,
}

impl OutputSource for StoredOutput {
    fn snapshot(&self, offset: usize) -> Result<(Vec<Value>, bool)> {
        let (id, finished) = {
            let instance = self.cell.instance.lock();
            (instance.linked_message_id.clone(), instance.done)
        };
        if !self.repos.instances.read().contains_key(&id) {
            return Err(Error::InstanceNotFound(id));
        }
        let items = self
            .repos
            .responses
            .read(&id, |payload| match payload {
                ResponsePayload::Stream(items) => items.get(offset..).unwrap_or_default().to_vec(),
                ResponsePayload::Message(_) => Vec::new(),
            })
            .unwrap_or_default();
        Ok((items, finished))
    }
}

/// One running backing call, owned by its spawned task
struct BackingCall {
    repos: Arc<Repositories>,
    backend: Arc<dyn RpcBackend>,
    cell: Arc<InstanceCell>,
    _guard: Option<RequestGuard>,
}

impl BackingCall {
    async fn run(self, request: RequestPayload) {
        let operation = self.cell.operation.clone();
        let descriptor = &operation.descriptor;
        let class = descriptor.stream_class();
        let timer = BackendTimer::new(descriptor.grpc_path(), class.as_str());

        let outcome: std::result::Result<Option<Value>, Status> = match (class, request) {
            (StreamClass::None, RequestPayload::Message(message)) => {
                self.backend.invoke_unary(descriptor, message).await.map(Some)
            }
            (StreamClass::RequestStreamed, RequestPayload::Stream(items)) => self
                .backend
                .invoke_client_stream(descriptor, items)
                .await
                .map(Some),
            (StreamClass::ResponseStreamed, RequestPayload::Message(message)) => {
                match self.backend.invoke_server_stream(descriptor, message).await {
                    Ok(responses) => self.drain(responses, &timer).await,
                    Err(status) => Err(status),
                }
            }
            (StreamClass::Bidirectional, RequestPayload::Stream(items)) => {
                match self.backend.invoke_bidi_stream(descriptor, items).await {
                    Ok(responses) => self.drain(responses, &timer).await,
                    Err(status) => Err(status),
                }
            }
            (class, _) => Err(Status::internal(format!(
                "request payload does not match {} operation",
                class.as_str()
            ))),
        };

        if let Err(status) = &outcome {
            timer.record_error(&format!("{:?}", status.code()));
        }
        self.finish(outcome);
    }

    async fn drain(
        &self,
        responses: crate::backend::ResponseStream,
        timer: &BackendTimer,
    ) -> std::result::Result<Option<Value>, Status> {
        let id = self.cell.instance.lock().linked_message_id.clone();
        let count = streaming::pump(responses, |item| {
            self.repos.responses.update(&id, |payload| {
                if let ResponsePayload::Stream(items) = payload {
                    items.push(item);
                }
            });
            timer.record_stream_message();
            self.cell.notify();
        })
        .await?;
        debug!(instance_id = %id, messages = count, "Response stream ended");
        Ok(None)
    }

    fn finish(&self, outcome: std::result::Result<Option<Value>, Status>) {
        let id = self.cell.instance.lock().linked_message_id.clone();
        let operation = self.cell.operation.name();

        match outcome {
            Ok(response) => {
                if let Some(value) = response {
                    self.repos
                        .responses
                        .insert(&id, ResponsePayload::Message(value));
                }
                let mut instance = self.cell.instance.lock();
                instance.done = true;
                instance.done_at = now();
                info!(instance_id = %id, operation = %operation, "Instance completed");
            }
            Err(status) => {
                let mut instance = self.cell.instance.lock();
                instance.error = status_error_text(&status);
                instance.done = true;
                instance.done_at = now();
                warn!(
                    instance_id = %id,
                    operation = %operation,
                    code = ?status.code(),
                    error = %instance.error,
                    "Instance failed"
                );
            }
        }
        self.cell.notify();
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
