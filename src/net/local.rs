use super::{server::Server, Transport, TransportError};
use std::sync::Arc;

/// A [`Transport`] that hands requests straight to a server in the same process.
pub struct LocalTransport<S> {
    server: Arc<Server<S>>,
}

impl<S> LocalTransport<S> {
    pub fn new(server: Arc<Server<S>>) -> Self {
        Self { server }
    }
}

impl<S> Clone for LocalTransport<S> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> Transport for LocalTransport<S> {
    fn round_trip(&mut self, request: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        Ok(self.server.dispatch(&request))
    }
}
