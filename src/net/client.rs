use super::{Request, Response, Transport, TransportError};
use crate::{
    builtin::{Commands, Foreach},
    types::{self, DecodeError, Wire},
    Command,
};
use async_bincode::{tokio::AsyncBincodeStream, AsyncDestination};
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, time::Duration};
use thiserror::Error;
use tokio::{io::BufStream, net::TcpStream, runtime::Runtime};

/// Invokes commands on a server through a [`Transport`].
///
/// Every call is a single blocking round trip.
pub struct Client<T> {
    transport: T,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Sends one envelope and returns the server's envelope as is.
    pub fn send_raw(&mut self, request: &Request) -> Result<Response, Error> {
        let bytes = self.transport.round_trip(request.to_bytes())?;
        Ok(Response::from_bytes(&bytes)?)
    }

    /// Invokes `command` and returns its result.
    pub fn send<C: Command>(&mut self, command: &C) -> Result<C::Ret, Error> {
        self.call(C::NAME, command.arg())
    }

    /// Invokes a command by name, without a [`Command`] type.
    pub fn call<A: Wire, R: Wire>(&mut self, name: &str, arg: &A) -> Result<R, Error> {
        let response = self.send_raw(&Request::new(name, types::encode(arg)))?;
        unwrap_response(response)
    }

    /// Applies `C` to every element of `args` in one round trip.
    ///
    /// The outer result fails only when the batch itself does; each element carries its own
    /// outcome, in argument order.
    pub fn foreach<C: Command>(
        &mut self,
        args: &[C::Arg],
    ) -> Result<Vec<Result<C::Ret, Error>>, Error> {
        let results = self.send(&Foreach::new::<C>(args))?;
        Ok(results
            .iter()
            .map(|bytes| -> Result<C::Ret, Error> {
                let response = Response::from_bytes(bytes)?;
                unwrap_response(response)
            })
            .collect())
    }

    /// Names of every command the server accepts.
    pub fn commands(&mut self) -> Result<Vec<String>, Error> {
        self.send(&Commands)
    }
}

fn unwrap_response<R: Wire>(response: Response) -> Result<R, Error> {
    match response.into_result()? {
        Ok(payload) => Ok(types::decode(&payload)?),
        Err(message) => Err(Error::Remote(RemoteError { message })),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// The server answered, but refused the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server error: {message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    /// The server has no handler for the requested name.
    pub fn is_unknown_command(&self) -> bool {
        self.message.starts_with("unknown command: ")
    }
}

type Stream = AsyncBincodeStream<BufStream<TcpStream>, Vec<u8>, Vec<u8>, AsyncDestination>;

/// A blocking [`Transport`] over one TCP connection.
pub struct TcpTransport {
    runtime: Runtime,
    stream: Stream,
    timeout: Option<Duration>,
    poisoned: bool,
}

impl TcpTransport {
    pub fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let sock = runtime.block_on(TcpStream::connect(addr))?;
        let sock = BufStream::new(sock);
        let stream = AsyncBincodeStream::from(sock).for_async();
        Ok(Self {
            runtime,
            stream,
            timeout: None,
            poisoned: false,
        })
    }

    /// Fails a round trip with [`TransportError::TimedOut`] if no response arrives in time.
    /// A late response would answer the wrong request, so every later round trip on this
    /// transport fails with [`TransportError::Closed`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Transport for TcpTransport {
    fn round_trip(&mut self, request: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        if self.poisoned {
            return Err(TransportError::Closed);
        }
        let Self {
            runtime,
            stream,
            timeout,
            poisoned,
        } = self;
        runtime.block_on(async move {
            let exchange = async {
                stream.send(request).await?;
                let response = stream.next().await.ok_or(TransportError::Closed)??;
                Ok::<_, TransportError>(response)
            };
            match *timeout {
                Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                    *poisoned = true;
                    TransportError::TimedOut(limit)
                })?,
                None => exchange.await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encode;

    /// Answers every request with the same bytes.
    struct Canned(Vec<u8>);

    impl Transport for Canned {
        fn round_trip(&mut self, _request: Vec<u8>) -> Result<Vec<u8>, TransportError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn success_payload_is_decoded() {
        let mut client = Client::new(Canned(Response::success(encode(&9u16)).to_bytes()));
        assert_eq!(client.call::<_, u16>("Anything", &()).unwrap(), 9);
    }

    #[test]
    fn failure_payload_becomes_remote_error() {
        let resp = Response::failure("unknown command: Nope").to_bytes();
        let mut client = Client::new(Canned(resp));
        match client.call::<_, u16>("Nope", &()) {
            Err(Error::Remote(e)) => {
                assert!(e.is_unknown_command());
                assert_eq!(e.to_string(), "server error: unknown command: Nope");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let mut client = Client::new(Canned(vec![0xff; 3]));
        assert!(matches!(
            client.call::<_, u16>("Anything", &()),
            Err(Error::Decode(_))
        ));
    }
}
