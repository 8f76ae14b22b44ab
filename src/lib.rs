//! Named, typed commands invoked over a request/response transport.
//!
//! A [`Command`] binds a name to an argument type and a return type. Servers register
//! [`Handler`]s in a [`Dispatcher`], clients send descriptor values through a
//! [`Client`], and [`Foreach`] applies one command to many arguments in a single round trip.

pub mod builtin;
pub mod dispatcher;
pub mod net;
pub mod types;

pub use builtin::{Commands, Foreach};
pub use dispatcher::{
    CallError, Context, DispatchError, Dispatcher, DuplicateName, MAX_DISPATCH_DEPTH,
};
pub use net::{
    client::{Client, Error, RemoteError, TcpTransport},
    local::LocalTransport,
    server::Server,
    Request, Response, Transport, TransportError,
};
pub use types::{decode, encode, try_encode, DecodeError, EncodeError, Wire};

/// Error type returned by command handlers. Its `Display` text is what the client sees.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A remotely invocable operation: a unique name, an argument type and a return type.
///
/// A value of the implementing type is one invocation, carrying its argument.
pub trait Command {
    const NAME: &'static str;
    type Arg: Wire;
    type Ret: Wire;

    fn arg(&self) -> &Self::Arg;
}

/// Server side of a [`Command`], executed against application state `S`.
pub trait Handler<S>: Command {
    fn execute(cx: &Context<'_, S>, arg: Self::Arg) -> Result<Self::Ret, BoxError>;
}
