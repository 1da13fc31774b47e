//! # DynamicMessage <-> Protobuf Codec
//!
//! This module implements `tonic::codec::Codec` so that `tonic` can transport
//! `prost_reflect::DynamicMessage` values directly, without generated Rust structs.
//!
//! 1. **Encoder**: checks that the message is of the method's input type and writes its
//!    protobuf encoding into the gRPC buffer.
//! 2. **Decoder**: merges the bytes read from the wire into an empty message of the method's
//!    output type.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A Codec that encodes and decodes `DynamicMessage`s using the descriptors of a method.
pub struct DynamicCodec {
    /// Schema for the input message.
    req_desc: MessageDescriptor,
    /// Schema for the output message.
    res_desc: MessageDescriptor,
}

impl DynamicCodec {
    /// Creates a new `DynamicCodec`.
    ///
    /// # Arguments
    /// * `req_desc` - Descriptor for the request message type.
    /// * `res_desc` - Descriptor for the response message type.
    pub fn new(req_desc: MessageDescriptor, res_desc: MessageDescriptor) -> Self {
        Self { req_desc, res_desc }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder(self.req_desc.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.res_desc.clone())
    }
}

/// Encodes a request message into Protobuf bytes.
pub struct DynamicEncoder(MessageDescriptor);

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        if item.descriptor().full_name() != self.0.full_name() {
            return Err(Status::invalid_argument(format!(
                "Expected a '{}' message but got '{}'",
                self.0.full_name(),
                item.descriptor().full_name()
            )));
        }

        item.encode_raw(dst);
        Ok(())
    }
}

/// Decodes Protobuf bytes into a response message.
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {}", e)))?;

        Ok(Some(msg))
    }
}
