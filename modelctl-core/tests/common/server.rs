//! An in-memory model server speaking through [`CallChannel`].
//!
//! Models are kept per type. A created or updated model stays unenacted for a configurable
//! number of reads, after which the server "synchronizes" it: `enacted` catches up with
//! `updated` and backup operations get their final status.
use futures_util::StreamExt;
use modelctl_core::Error;
use modelctl_core::grpc::channel::{CallChannel, CallResult, RequestStream, ResponseStream};
use modelctl_core::grpc::client::CallOptions;
use modelctl_core::prost_reflect::{
    DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor, ReflectMessage, Value,
};
use modelctl_core::retry::Connector;
use modelctl_core::tonic::Status;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Content of the backups produced by the server.
pub const BACKUP_PAYLOAD: &[u8] = b"-- xos database dump --\nINSERT INTO slice VALUES (1);\n";

const DOWNLOAD_CHUNK: usize = 16;

pub fn sha256(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[derive(Debug, Default)]
pub struct ServerState {
    models: BTreeMap<String, BTreeMap<i32, DynamicMessage>>,
    /// Reads left before a model is synchronized.
    unsynced: HashMap<(String, i32), usize>,
    next_id: i32,
    pub files: HashMap<String, Vec<u8>>,
    /// Reads a model stays unenacted for after each change.
    pub sync_delay: usize,
    /// Number of upcoming reads failing with a transient error.
    pub transient_failures: usize,
    /// Statuses returned by the upcoming reads, in order.
    pub failures: VecDeque<Status>,
    /// Report a wrong checksum for uploads.
    pub corrupt_uploads: bool,
    pub version: String,
    /// Every method called, in order.
    pub calls: Vec<String>,
    pub last_headers: Vec<(String, String)>,
}

impl ServerState {
    fn unary(
        &mut self,
        method: &MethodDescriptor,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        match method.parent_service().full_name() {
            "xos.xos" => self.model_call(method, request),
            "xos.utility" => self.utility_call(method),
            other => Err(Status::unimplemented(format!("unknown service {other}"))),
        }
    }

    fn model_call(
        &mut self,
        method: &MethodDescriptor,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        let name = method.name();
        if name.starts_with("Get") || name.starts_with("Filter") {
            if let Some(status) = self.failures.pop_front() {
                return Err(status);
            }
            if self.transient_failures > 0 {
                self.transient_failures -= 1;
                return Err(Status::unavailable("connection reset by peer"));
            }
        }

        if let Some(model) = name.strip_prefix("Get") {
            let id = int(&request, "id");
            return self.read(model, id);
        }
        if let Some(model) = name.strip_prefix("List") {
            let items = self.all(model);
            return Ok(list(method.output(), items));
        }
        if let Some(model) = name.strip_prefix("Filter") {
            let items = self
                .all(model)
                .into_iter()
                .filter(|m| matches_query(m, &request))
                .collect();
            return Ok(list(method.output(), items));
        }
        if let Some(model) = name.strip_prefix("Create") {
            return Ok(self.create(model, request));
        }
        if let Some(model) = name.strip_prefix("Update") {
            return self.update(model, request);
        }
        if let Some(model) = name.strip_prefix("Delete") {
            let id = int(&request, "id");
            return match self.models.entry(model.to_string()).or_default().remove(&id) {
                Some(_) => Ok(DynamicMessage::new(method.output())),
                None => Err(not_found(model)),
            };
        }

        Err(Status::unimplemented(name.to_string()))
    }

    fn utility_call(&mut self, method: &MethodDescriptor) -> Result<DynamicMessage, Status> {
        let mut response = DynamicMessage::new(method.output());
        match method.name() {
            "GetVersion" => {
                response.set_field_by_name("version", Value::String(self.version.clone()));
                response.set_field_by_name("pythonVersion", Value::String("3.7.4".into()));
                response.set_field_by_name("gitCommit", Value::String("abc1234".into()));
                response.set_field_by_name("os", Value::String("linux".into()));
                response.set_field_by_name("arch", Value::String("x86_64".into()));
            }
            "GetDatabaseInfo" => {
                response.set_field_by_name("name", Value::String("xos".into()));
                response.set_field_by_name("version", Value::String("10.1".into()));
                response.set_field_by_name("connection", Value::String("xos-db:5432".into()));
                response.set_field_by_name("status", Value::EnumNumber(1));
            }
            other => return Err(Status::unimplemented(other.to_string())),
        }
        Ok(response)
    }

    /// Reads a model by id, moving its synchronization forward.
    fn read(&mut self, model: &str, id: i32) -> Result<DynamicMessage, Status> {
        let key = (model.to_string(), id);
        match self.unsynced.get(&key).copied() {
            Some(0) => {
                self.unsynced.remove(&key);
                self.synchronize(model, id);
            }
            Some(left) => {
                self.unsynced.insert(key, left - 1);
            }
            None => {}
        }

        self.models
            .get(model)
            .and_then(|models| models.get(&id))
            .cloned()
            .ok_or_else(|| not_found(model))
    }

    /// Reads every model of a type.
    fn all(&mut self, model: &str) -> Vec<DynamicMessage> {
        let ids: Vec<i32> = self
            .models
            .get(model)
            .map(|models| models.keys().copied().collect())
            .unwrap_or_default();

        ids.into_iter()
            .filter_map(|id| self.read(model, id).ok())
            .collect()
    }

    /// Stores a model as the server would, without waiting for it to be synchronized.
    pub fn insert(&mut self, mut message: DynamicMessage) -> i32 {
        self.next_id += 1;
        let id = self.next_id;
        let model = message.descriptor().name().to_string();

        message.set_field_by_name("id", Value::I32(id));
        message.set_field_by_name("uuid", Value::String(format!("uuid-{model}-{id}")));
        message.set_field_by_name("updated", Value::F64(f64::from(id)));
        message.set_field_by_name("enacted", Value::F64(0.0));

        self.models.entry(model.clone()).or_default().insert(id, message);
        self.unsynced.insert((model, id), self.sync_delay);
        id
    }

    fn create(&mut self, model: &str, message: DynamicMessage) -> DynamicMessage {
        let id = self.insert(message);

        let operation = text(&self.models[model][&id], "operation");
        if model == "BackupOperation" && operation == "create" {
            let pool = self.models[model][&id].descriptor().parent_pool().clone();
            let file_id = self.produce_backup(&pool);
            if let Some(operation) = self.model_mut(model, id) {
                operation.set_field_by_name("file_id", Value::I32(file_id));
            }
        }

        self.models[model][&id].clone()
    }

    fn update(&mut self, model: &str, request: DynamicMessage) -> Result<DynamicMessage, Status> {
        let id = int(&request, "id");
        let delay = self.sync_delay;
        let stored = self.model_mut(model, id).ok_or_else(|| not_found(model))?;

        for (field, value) in request.fields() {
            stored.set_field(&field, value.clone());
        }
        let updated = stored
            .get_field_by_name("updated")
            .and_then(|v| v.as_f64())
            .unwrap_or_default();
        stored.set_field_by_name("updated", Value::F64(updated + 1.0));
        let response = stored.clone();

        self.unsynced.insert((model.to_string(), id), delay);
        Ok(response)
    }

    fn model_mut(&mut self, model: &str, id: i32) -> Option<&mut DynamicMessage> {
        self.models.get_mut(model).and_then(|models| models.get_mut(&id))
    }

    /// Creates the backup file a `create` operation produces.
    fn produce_backup(&mut self, pool: &DescriptorPool) -> i32 {
        let descriptor = pool
            .get_message_by_name("xos.BackupFile")
            .expect("BackupFile in schema");

        let name = format!("backup-{}", self.next_id + 1);
        let uri = format!("file:///var/run/xos/backup/local/{name}");
        self.files.insert(uri.clone(), BACKUP_PAYLOAD.to_vec());

        let mut file = DynamicMessage::new(descriptor);
        file.set_field_by_name("name", Value::String(name));
        file.set_field_by_name("uri", Value::String(uri));
        file.set_field_by_name("checksum", Value::String(sha256(BACKUP_PAYLOAD)));

        let id = self.insert(file);
        self.unsynced.remove(&("BackupFile".to_string(), id));
        self.synchronize("BackupFile", id);
        id
    }

    fn synchronize(&mut self, model: &str, id: i32) {
        let status = if model == "BackupOperation" {
            let operation = &self.models[model][&id];
            match text(operation, "operation").as_str() {
                "create" => Some("created".to_string()),
                "restore" => {
                    let file_id = int(operation, "file_id");
                    let restored = self
                        .models
                        .get("BackupFile")
                        .and_then(|files| files.get(&file_id))
                        .is_some_and(|file| self.files.contains_key(&text(file, "uri")));
                    Some(if restored { "restored" } else { "failed" }.to_string())
                }
                _ => None,
            }
        } else {
            None
        };

        if let Some(message) = self.model_mut(model, id) {
            let updated = message
                .get_field_by_name("updated")
                .and_then(|v| v.as_f64())
                .unwrap_or_default();
            message.set_field_by_name("enacted", Value::F64(updated));
            if let Some(status) = status {
                message.set_field_by_name("status", Value::String(status));
            }
        }
    }

    fn download(
        &mut self,
        output: MessageDescriptor,
        request: &DynamicMessage,
    ) -> Result<Vec<DynamicMessage>, Status> {
        let uri = text(request, "uri");
        let data = self
            .files
            .get(&uri)
            .ok_or_else(|| Status::not_found(format!("{uri} does not exist")))?;

        Ok(data
            .chunks(DOWNLOAD_CHUNK)
            .map(|chunk| {
                let mut message = DynamicMessage::new(output.clone());
                let chunk = String::from_utf8(chunk.to_vec()).expect("ascii payload");
                message.set_field_by_name("chunk", Value::String(chunk));
                message
            })
            .collect())
    }

    fn upload(
        &mut self,
        output: MessageDescriptor,
        requests: Vec<DynamicMessage>,
    ) -> Result<DynamicMessage, Status> {
        let uri = requests
            .first()
            .map(|r| text(r, "uri"))
            .ok_or_else(|| Status::invalid_argument("empty upload"))?;

        let mut data = Vec::new();
        for request in &requests {
            data.extend_from_slice(text(request, "chunk").as_bytes());
        }

        let checksum = if self.corrupt_uploads {
            sha256(b"something else")
        } else {
            sha256(&data)
        };

        let mut response = DynamicMessage::new(output);
        response.set_field_by_name("status", Value::EnumNumber(0));
        response.set_field_by_name("checksum", Value::String(checksum));
        response.set_field_by_name("chunks_received", Value::I32(requests.len() as i32));
        response.set_field_by_name("bytes_received", Value::I32(data.len() as i32));

        self.files.insert(uri, data);
        Ok(response)
    }
}

fn not_found(model: &str) -> Status {
    Status::not_found(format!("{model} matching query does not exist."))
}

fn int(message: &DynamicMessage, name: &str) -> i32 {
    message
        .get_field_by_name(name)
        .and_then(|v| v.as_i32())
        .unwrap_or_default()
}

fn text(message: &DynamicMessage, name: &str) -> String {
    message
        .get_field_by_name(name)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn list(output: MessageDescriptor, items: Vec<DynamicMessage>) -> DynamicMessage {
    let mut response = DynamicMessage::new(output);
    response.set_field_by_name(
        "items",
        Value::List(items.into_iter().map(Value::Message).collect()),
    );
    response
}

/// Evaluates the elements of a `Query` against a model.
fn matches_query(model: &DynamicMessage, query: &DynamicMessage) -> bool {
    let Some(elements) = query.get_field_by_name("elements") else {
        return true;
    };
    let Some(elements) = elements.as_list() else {
        return true;
    };

    elements.iter().filter_map(Value::as_message).all(|element| {
        let name = text(element, "name");
        let operator_field = element
            .descriptor()
            .get_field_by_name("operator")
            .expect("operator field");
        let operator = element
            .get_field(&operator_field)
            .as_enum_number()
            .and_then(|n| operator_field.kind().as_enum()?.get_value(n))
            .map(|v| v.name().to_string())
            .unwrap_or_default();
        let invert = element
            .get_field_by_name("invert")
            .and_then(|v| v.as_bool())
            .unwrap_or_default();

        let ordering = match model.get_field_by_name(&name).as_deref() {
            Some(Value::I32(v)) => i64::from(*v).cmp(&i64::from(int(element, "iValue"))),
            Some(Value::String(v)) => v.as_str().cmp(text(element, "sValue").as_str()),
            _ => return false,
        };

        let matched = match operator.as_str() {
            "EQUAL" => ordering.is_eq(),
            "GREATER_THAN" => ordering.is_gt(),
            "GREATER_THAN_OR_EQUAL" => ordering.is_ge(),
            "LESS_THAN" => ordering.is_lt(),
            "LESS_THAN_OR_EQUAL" => ordering.is_le(),
            _ => false,
        };
        matched != invert
    })
}

/// A handle on the server. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeXos {
    state: Arc<Mutex<ServerState>>,
}

impl FakeXos {
    pub fn new() -> Self {
        let server = Self::default();
        server.state().version = "4.0.1-dev".to_string();
        server
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("server state poisoned")
    }

    fn record(&self, method: &MethodDescriptor, options: &CallOptions) {
        let mut state = self.state();
        state.calls.push(method.name().to_string());
        state.last_headers = options.headers.clone();
    }
}

impl CallChannel for FakeXos {
    async fn unary(
        &mut self,
        method: MethodDescriptor,
        request: DynamicMessage,
        options: CallOptions,
    ) -> CallResult<DynamicMessage> {
        self.record(&method, &options);
        Ok(self.state().unary(&method, request))
    }

    async fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        request: DynamicMessage,
        options: CallOptions,
    ) -> CallResult<ResponseStream> {
        self.record(&method, &options);
        let chunks = self.state().download(method.output(), &request);
        Ok(chunks.map(|chunks| futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed()))
    }

    async fn client_streaming(
        &mut self,
        method: MethodDescriptor,
        requests: RequestStream,
        options: CallOptions,
    ) -> CallResult<DynamicMessage> {
        self.record(&method, &options);
        let requests: Vec<DynamicMessage> = requests.collect().await;
        Ok(self.state().upload(method.output(), requests))
    }
}

/// Hands out connections to a [`FakeXos`], counting them.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    pub server: FakeXos,
    pub connects: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(server: FakeXos) -> Self {
        Self {
            server,
            connects: Arc::default(),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    type Connection = FakeXos;

    async fn connect(&self) -> Result<FakeXos, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.server.clone())
    }
}
