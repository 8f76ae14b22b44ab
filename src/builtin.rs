//! Commands every [`Dispatcher`](crate::Dispatcher) serves without registration.

use crate::{
    dispatcher::Context,
    net::Request,
    types::{self, Wire},
    BoxError, Command, Handler,
};

/// Applies one named command to a list of encoded arguments in a single round trip.
///
/// The result holds one encoded [`Response`](crate::Response) envelope per argument, in
/// argument order. A failing element only fails its own slot.
#[derive(Debug, Clone)]
pub struct Foreach {
    arg: (String, Vec<Vec<u8>>),
}

impl Foreach {
    /// A batch of `C` invocations, one per element of `args`.
    pub fn new<C: Command>(args: &[C::Arg]) -> Self {
        Self::raw(C::NAME, args.iter().map(types::encode).collect())
    }

    /// A batch over an arbitrary command name and pre-encoded arguments.
    pub fn raw(command: impl Into<String>, args: Vec<Vec<u8>>) -> Self {
        Self {
            arg: (command.into(), args),
        }
    }

    pub fn with<A: Wire>(command: impl Into<String>, args: &[A]) -> Self {
        Self::raw(command, args.iter().map(types::encode).collect())
    }
}

impl Command for Foreach {
    const NAME: &'static str = "Foreach";
    type Arg = (String, Vec<Vec<u8>>);
    type Ret = Vec<Vec<u8>>;

    fn arg(&self) -> &Self::Arg {
        &self.arg
    }
}

impl<S: 'static> Handler<S> for Foreach {
    fn execute(
        cx: &Context<'_, S>,
        (command, args): (String, Vec<Vec<u8>>),
    ) -> Result<Vec<Vec<u8>>, BoxError> {
        // Elements run one after another on this thread; slot i always answers args[i].
        let results = args
            .into_iter()
            .map(|args| {
                let request = Request {
                    name: command.clone(),
                    args,
                };
                cx.dispatch(&request).to_bytes()
            })
            .collect();
        Ok(results)
    }
}

/// Lists the names of every command the server accepts, sorted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Commands;

impl Command for Commands {
    const NAME: &'static str = "Commands";
    type Arg = ();
    type Ret = Vec<String>;

    fn arg(&self) -> &() {
        &()
    }
}

impl<S: 'static> Handler<S> for Commands {
    fn execute(cx: &Context<'_, S>, (): ()) -> Result<Vec<String>, BoxError> {
        Ok(cx.dispatcher().names())
    }
}
