use crate::{
    builtin::{Commands, Foreach},
    net::{Request, Response},
    types::{self, DecodeError, EncodeError, Wire},
    BoxError, Command, Handler,
};
use log::{debug, warn};
use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
};
use thiserror::Error;

/// How deep [`Foreach`] batches may nest. A request nested deeper gets an error envelope in
/// the slot that crossed the limit.
pub const MAX_DISPATCH_DEPTH: usize = 32;

/// Maps command names to type-erased handlers over application state `S`.
///
/// Handlers are added at startup with [`register`](Dispatcher::register) or
/// [`add_fn`](Dispatcher::add_fn); requests are served with
/// [`dispatch`](Dispatcher::dispatch). The built-in [`Foreach`] and [`Commands`] are present
/// from construction.
pub struct Dispatcher<S> {
    handlers: BTreeMap<String, Box<dyn DynamicHandler<S>>>,
}

impl<S> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl<S: 'static> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> Dispatcher<S> {
    pub fn new() -> Self {
        let mut dispatcher = Self {
            handlers: BTreeMap::new(),
        };
        dispatcher.insert_fn(Foreach::NAME, <Foreach as Handler<S>>::execute);
        dispatcher.insert_fn(Commands::NAME, <Commands as Handler<S>>::execute);
        dispatcher
    }

    /// Registers the handler of command `C` under `C::NAME`.
    pub fn register<C>(&mut self) -> Result<&mut Self, DuplicateName>
    where
        C: Handler<S> + 'static,
    {
        self.add_fn(C::NAME, <C as Handler<S>>::execute)
    }

    /// Registers `execute` under `name`, taking an `A` and returning an `R`.
    pub fn add_fn<A, R, F>(
        &mut self,
        name: impl Into<String>,
        execute: F,
    ) -> Result<&mut Self, DuplicateName>
    where
        A: Wire + 'static,
        R: Wire + 'static,
        F: Fn(&Context<'_, S>, A) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(DuplicateName(name));
        }
        self.insert_fn(name, execute);
        Ok(self)
    }

    fn insert_fn<A, R, F>(&mut self, name: impl Into<String>, execute: F)
    where
        A: Wire + 'static,
        R: Wire + 'static,
        F: Fn(&Context<'_, S>, A) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        let handler = TypedHandler::<A, R, F>::new(execute);
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Names of every registered command, sorted.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Serves one encoded request. Every failure is reported inside the returned envelope.
    pub fn dispatch(&self, state: &S, request: &[u8]) -> Vec<u8> {
        let response = match Request::from_bytes(request) {
            Ok(request) => self.dispatch_request(state, &request),
            Err(e) => {
                let e = DispatchError::MalformedRequest(e);
                warn!("{e}");
                Response::failure(e.to_string())
            }
        };
        response.to_bytes()
    }

    pub fn dispatch_request(&self, state: &S, request: &Request) -> Response {
        self.dispatch_at(state, request, 0)
    }

    fn dispatch_at(&self, state: &S, request: &Request, depth: usize) -> Response {
        match self.call(state, request, depth) {
            Ok(payload) => Response::success(payload),
            Err(e) => {
                warn!("{}: {e}", request.name);
                Response::failure(e.to_string())
            }
        }
    }

    fn call(&self, state: &S, Request { name, args }: &Request, depth: usize) -> CallResult {
        if depth > MAX_DISPATCH_DEPTH {
            return Err(DispatchError::TooDeep(MAX_DISPATCH_DEPTH));
        }
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| DispatchError::UnknownCommand(name.clone()))?;
        debug!("dispatching {name} ({} argument bytes)", args.len());
        let cx = Context {
            dispatcher: self,
            state,
            depth,
        };
        Ok(handler.call(&cx, args)?)
    }
}

pub(crate) type CallResult = Result<Vec<u8>, DispatchError>;

/// What a handler sees of the server while it runs.
pub struct Context<'a, S> {
    dispatcher: &'a Dispatcher<S>,
    state: &'a S,
    depth: usize,
}

impl<'a, S: 'static> Context<'a, S> {
    /// Application state shared by every handler. It may be reached from several threads at
    /// once, so anything mutable inside it needs its own locking.
    pub fn state(&self) -> &'a S {
        self.state
    }

    pub fn dispatcher(&self) -> &'a Dispatcher<S> {
        self.dispatcher
    }

    /// Runs `request` through the same dispatcher that is running the current handler, one
    /// level deeper than the current request.
    pub fn dispatch(&self, request: &Request) -> Response {
        self.dispatcher.dispatch_at(self.state, request, self.depth + 1)
    }
}

/// The same name was registered twice while composing a [`Dispatcher`].
#[derive(Debug, Error)]
#[error("command {0:?} is already registered")]
pub struct DuplicateName(pub String);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed request: {0}")]
    MalformedRequest(DecodeError),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("batches nested more than {0} deep")]
    TooDeep(usize),

    #[error(transparent)]
    Call(#[from] CallError),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("argument type mismatch: {0}")]
    Argument(DecodeError),

    #[error("{0}")]
    Failed(String),

    #[error("command panicked: {0}")]
    Panicked(String),

    #[error("encoding result: {0}")]
    Result(EncodeError),
}

/// A type-erased command handler.
trait DynamicHandler<S>: Send + Sync {
    fn call(&self, cx: &Context<'_, S>, args: &[u8]) -> Result<Vec<u8>, CallError>;
}

struct TypedHandler<A, R, F> {
    execute: F,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R, F> TypedHandler<A, R, F> {
    fn new(execute: F) -> Self {
        Self {
            execute,
            _signature: PhantomData,
        }
    }
}

impl<S, A, R, F> DynamicHandler<S> for TypedHandler<A, R, F>
where
    A: Wire,
    R: Wire,
    F: Fn(&Context<'_, S>, A) -> Result<R, BoxError> + Send + Sync,
{
    fn call(&self, cx: &Context<'_, S>, args: &[u8]) -> Result<Vec<u8>, CallError> {
        let arg = types::decode::<A>(args).map_err(CallError::Argument)?;
        let ret = panic::catch_unwind(AssertUnwindSafe(|| (self.execute)(cx, arg)))
            .map_err(|panic| CallError::Panicked(panic_message(&*panic)))?
            .map_err(|e| CallError::Failed(e.to_string()))?;
        types::try_encode(&ret).map_err(CallError::Result)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
