use super::{Response, TransportError};
use crate::dispatcher::Dispatcher;
use async_bincode::tokio::AsyncBincodeStream;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use std::{io, net::Ipv4Addr, sync::Arc};
use tokio::{
    io::BufStream,
    net::{TcpListener, TcpStream},
    task::{self, JoinError},
};

/// Owns the command registry and the application state handlers run against.
pub struct Server<S> {
    dispatcher: Dispatcher<S>,
    state: S,
}

impl<S: Send + Sync + 'static> Server<S> {
    pub fn new(dispatcher: Dispatcher<S>, state: S) -> Self {
        Self { dispatcher, state }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Serves one encoded request and returns the encoded response.
    pub fn dispatch(&self, request: &[u8]) -> Vec<u8> {
        self.dispatcher.dispatch(&self.state, request)
    }

    pub async fn serve_tcp(self, port: u16) -> io::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        self.serve(listener).await
    }

    /// Accepts connections forever. Each connection may carry any number of requests, which
    /// are answered in order.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        info!("listening on {}", listener.local_addr()?);
        let root_arc = Arc::new(self);
        loop {
            let arc_self = root_arc.clone();
            let (sock, addr) = listener.accept().await?;
            task::spawn(async move {
                if let Err(e) = arc_self.handle_connection(sock).await {
                    warn!("connection from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, sock: TcpStream) -> Result<(), TransportError> {
        let mut sock =
            AsyncBincodeStream::<_, Vec<u8>, Vec<u8>, _>::from(BufStream::new(sock)).for_async();

        while let Some(request) = sock.next().await {
            let request = request?;
            let server = self.clone();
            // handlers may block on the application's own locks
            let joined = task::spawn_blocking(move || server.dispatch(&request)).await;
            sock.send(response_or_failure(joined)).await?;
        }
        Ok(())
    }
}

/// The dispatcher's answer, or an error envelope if the dispatching task died.
fn response_or_failure(joined: Result<Vec<u8>, JoinError>) -> Vec<u8> {
    joined.unwrap_or_else(|e| {
        warn!("dispatch task failed: {e}");
        Response::failure("command panicked").to_bytes()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::decode;

    #[tokio::test]
    async fn dead_dispatch_task_becomes_failure_envelope() {
        let joined = task::spawn_blocking(|| -> Vec<u8> { panic!("escaped") }).await;
        let resp = Response::from_bytes(&response_or_failure(joined)).unwrap();
        assert!(!resp.ok);
        assert_eq!(decode::<String>(&resp.payload).unwrap(), "command panicked");

        let joined = task::spawn_blocking(|| Response::success(vec![1]).to_bytes()).await;
        let resp = Response::from_bytes(&response_or_failure(joined)).unwrap();
        assert!(resp.ok);
    }
}
