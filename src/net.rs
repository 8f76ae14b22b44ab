pub mod client;
pub mod local;
pub mod server;

use crate::types::{self, DecodeError, Wire};
use serde::{Deserialize, Serialize};
use std::{io, time::Duration};
use thiserror::Error;

/// Wire form of one invocation: the command name and its encoded argument.
///
/// Encodes exactly like the tuple `(name, args)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: String,
    pub args: Vec<u8>,
}

impl Wire for Request {}

impl Request {
    pub fn new(name: impl Into<String>, args: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        types::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        types::decode(bytes)
    }
}

/// Wire form of one outcome. When `ok` is set `payload` holds the encoded return value,
/// otherwise it holds an encoded error message.
///
/// Encodes exactly like the tuple `(ok, payload)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub ok: bool,
    pub payload: Vec<u8>,
}

impl Wire for Response {}

impl Response {
    pub fn success(payload: Vec<u8>) -> Self {
        Self { ok: true, payload }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: types::encode(&message.into()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        types::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        types::decode(bytes)
    }

    /// Splits the envelope into the encoded return value or the decoded error message.
    pub fn into_result(self) -> Result<Result<Vec<u8>, String>, DecodeError> {
        if self.ok {
            Ok(Ok(self.payload))
        } else {
            Ok(Err(types::decode(&self.payload)?))
        }
    }
}

/// Carries one encoded request to a server and brings back the encoded response.
pub trait Transport {
    /// Performs exactly one blocking exchange. Implementations do not retry.
    fn round_trip(&mut self, request: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn round_trip(&mut self, request: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        (**self).round_trip(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn round_trip(&mut self, request: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        (**self).round_trip(request)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport framing error: {0}")]
    Framing(#[from] bincode::Error),

    #[error("connection closed before a response arrived")]
    Closed,

    #[error("no response within {0:?}")]
    TimedOut(Duration),
}
