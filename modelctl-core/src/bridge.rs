//! # RPC Event Bridge
//!
//! The bridge sits between a call site and a [`CallChannel`]. It asks a [`ParameterSource`] for
//! the outgoing messages, keeps the final response and records the terminal status of the call.
//!
//! The bridge has two states. While [`BridgeState::AwaitingParameters`] it keeps asking its source
//! for messages; once the source reports the end of its input it is [`BridgeState::Complete`] and
//! never asks again.
//!
//! Three drivers cover the call shapes used by this crate:
//!
//! * [`unary`]: one message out, one response back.
//! * [`client_streaming`]: messages are pulled from the source until it runs dry.
//! * [`server_streaming`]: every received message is handed to a [`ResponseSink`]; the bridge
//!   only keeps the terminal status.
use crate::error::Error;
use crate::grpc::channel::CallChannel;
use crate::grpc::client::CallOptions;
use futures_util::StreamExt;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor, ReflectMessage, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Status};

/// Reserved assignment name whose value is a JSON document merged into the message before the
/// named fields are set.
pub const RAW_JSON_FIELD: &str = "_json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    AwaitingParameters,
    Complete,
}

/// What a [`ParameterSource`] hands out when asked for the next message.
#[derive(Debug, Clone)]
pub enum Supply {
    Message(DynamicMessage),
    EndOfInput,
}

/// Produces the outgoing messages of a call.
pub trait ParameterSource: Send {
    /// Returns the next message of type `input`, or [`Supply::EndOfInput`] when there is none.
    fn supply(
        &mut self,
        input: &MessageDescriptor,
    ) -> impl Future<Output = Result<Supply, Error>> + Send;
}

/// Consumes the messages of a server stream.
pub trait ResponseSink: Send {
    fn on_message(
        &mut self,
        message: DynamicMessage,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Field values for one message.
#[derive(Debug, Clone, Default)]
pub struct Assignments {
    /// JSON merged into the message first.
    pub raw_json: Option<String>,
    pub values: BTreeMap<String, Value>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_raw_json(mut self, json: impl Into<String>) -> Self {
        self.raw_json = Some(json.into());
        self
    }

    /// Builds a message of type `descriptor` out of these assignments.
    pub fn build(&self, descriptor: &MessageDescriptor) -> Result<DynamicMessage, Error> {
        let mut message = match &self.raw_json {
            Some(json) => {
                let mut deserializer = serde_json::Deserializer::from_str(json);
                DynamicMessage::deserialize(descriptor.clone(), &mut deserializer).map_err(
                    |e| Error::InvalidInput(format!("Invalid {RAW_JSON_FIELD} payload: {e}")),
                )?
            }
            None => DynamicMessage::new(descriptor.clone()),
        };

        for (name, value) in &self.values {
            message
                .try_set_field_by_name(name, value.clone())
                .map_err(|e| {
                    Error::internal(format!(
                        "Failed to set {name} on {}: {e}",
                        descriptor.full_name()
                    ))
                })?;
        }

        Ok(message)
    }
}

/// Supplies one message per message type, each consumed once.
#[derive(Debug, Clone, Default)]
pub struct FieldParameters {
    by_type: HashMap<String, Assignments>,
}

impl FieldParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters holding a single message, keyed by its fully qualified type name.
    pub fn single(type_name: impl Into<String>, assignments: Assignments) -> Self {
        Self::new().with(type_name, assignments)
    }

    pub fn with(mut self, type_name: impl Into<String>, assignments: Assignments) -> Self {
        self.by_type.insert(type_name.into(), assignments);
        self
    }
}

impl ParameterSource for FieldParameters {
    async fn supply(&mut self, input: &MessageDescriptor) -> Result<Supply, Error> {
        match self.by_type.remove(input.full_name()) {
            Some(assignments) => Ok(Supply::Message(assignments.build(input)?)),
            None => Ok(Supply::EndOfInput),
        }
    }
}

/// Adapts a [`ParameterSource`] to the events of one call.
#[derive(Debug)]
pub struct RpcEventBridge<P> {
    source: P,
    state: BridgeState,
    response: Option<DynamicMessage>,
    status: Option<Status>,
}

impl<P: ParameterSource> RpcEventBridge<P> {
    pub fn new(source: P) -> Self {
        Self {
            source,
            state: BridgeState::AwaitingParameters,
            response: None,
            status: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn into_source(self) -> P {
        self.source
    }

    /// Asks the source for the next outgoing message.
    pub async fn next_parameters(&mut self, input: &MessageDescriptor) -> Result<Supply, Error> {
        if self.state == BridgeState::Complete {
            return Ok(Supply::EndOfInput);
        }

        let supply = self.source.supply(input).await?;
        if matches!(supply, Supply::EndOfInput) {
            self.state = BridgeState::Complete;
        }
        Ok(supply)
    }

    /// Records a received message. Only the last one is kept.
    pub fn on_response(&mut self, message: DynamicMessage) {
        self.response = Some(message);
    }

    pub fn on_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    /// The terminal status, if the call has ended.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// Fails with the terminal status unless the call succeeded.
    fn check_status(&mut self) -> Result<(), Error> {
        match self.status.take() {
            Some(status) if status.code() != Code::Ok => Err(Error::Rpc(status)),
            _ => Ok(()),
        }
    }

    /// The response of a successful call.
    pub fn take_response(&mut self) -> Result<DynamicMessage, Error> {
        self.check_status()?;
        self.response
            .take()
            .ok_or_else(|| Error::internal("The call completed without a response"))
    }
}

fn ok_status() -> Status {
    Status::new(Code::Ok, "")
}

/// Performs a unary call. A source without a message for the method's input sends an empty one.
pub async fn unary<C: CallChannel, P: ParameterSource>(
    channel: &mut C,
    method: MethodDescriptor,
    bridge: &mut RpcEventBridge<P>,
    options: CallOptions,
) -> Result<DynamicMessage, Error> {
    let input = method.input();
    let request = match bridge.next_parameters(&input).await? {
        Supply::Message(message) => message,
        Supply::EndOfInput => DynamicMessage::new(input),
    };

    tracing::debug!(method = method.full_name(), timeout = ?options.timeout, "unary call");

    match channel.unary(method, request, options).await? {
        Ok(response) => {
            bridge.on_response(response);
            bridge.on_status(ok_status());
        }
        Err(status) => bridge.on_status(status),
    }

    bridge.take_response()
}

/// Performs a client streaming call, sending messages until the source reports the end of input.
///
/// A failure of the source ends the request stream and is returned once the call is over.
pub async fn client_streaming<C: CallChannel, P: ParameterSource>(
    channel: &mut C,
    method: MethodDescriptor,
    bridge: &mut RpcEventBridge<P>,
    options: CallOptions,
) -> Result<DynamicMessage, Error> {
    let input = method.input();
    let (tx, rx) = mpsc::channel(4);

    tracing::debug!(
        method = method.full_name(),
        timeout = ?options.timeout,
        "client streaming call"
    );

    let producer_bridge = &mut *bridge;
    let producer = async move {
        loop {
            match producer_bridge.next_parameters(&input).await? {
                Supply::Message(message) => {
                    // The receiver is gone once the server has answered early.
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Supply::EndOfInput => break,
            }
        }
        Ok::<_, Error>(())
    };

    let call = channel.client_streaming(method, ReceiverStream::new(rx).boxed(), options);

    let (produced, result) = tokio::join!(producer, call);
    produced?;

    match result? {
        Ok(response) => {
            bridge.on_response(response);
            bridge.on_status(ok_status());
        }
        Err(status) => bridge.on_status(status),
    }

    bridge.take_response()
}

/// Performs a server streaming call, handing every received message to `sink`.
pub async fn server_streaming<C: CallChannel, P: ParameterSource, K: ResponseSink>(
    channel: &mut C,
    method: MethodDescriptor,
    bridge: &mut RpcEventBridge<P>,
    sink: &mut K,
    options: CallOptions,
) -> Result<(), Error> {
    let input = method.input();
    let request = match bridge.next_parameters(&input).await? {
        Supply::Message(message) => message,
        Supply::EndOfInput => DynamicMessage::new(input),
    };

    tracing::debug!(
        method = method.full_name(),
        timeout = ?options.timeout,
        "server streaming call"
    );

    let mut stream = match channel.server_streaming(method, request, options).await? {
        Ok(stream) => stream,
        Err(status) => {
            bridge.on_status(status);
            return bridge.check_status();
        }
    };

    let mut status = ok_status();
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => sink.on_message(message).await?,
            Err(err) => {
                status = err;
                break;
            }
        }
    }

    bridge.on_status(status);
    bridge.check_status()
}

/// Reads a string field of a response, or the name of an enum field. Missing fields read as
/// empty.
pub fn field_text(message: &DynamicMessage, name: &str) -> String {
    let Some(field) = message.descriptor().get_field_by_name(name) else {
        return String::new();
    };

    match &*message.get_field(&field) {
        Value::String(s) => s.clone(),
        Value::EnumNumber(n) => field
            .kind()
            .as_enum()
            .and_then(|e| e.get_value(*n))
            .map(|v| v.name().to_string())
            .unwrap_or_else(|| n.to_string()),
        _ => String::new(),
    }
}
