//! Generic frame-per-request RPC server loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::codec::{read_frame, write_frame, ProtocolError};

/// Service seam implemented by each RPC surface. Handlers map every failure
/// to a typed error response; the transport loop never sees them.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;
    type Response: Serialize + Send + Sync;

    async fn handle(&self, request: Self::Request) -> Self::Response;
}

/// Accept loop: one task per connection, handler concurrency capped by a
/// semaphore sized to the service's handler count.
pub async fn serve<H: RpcHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    handler_count: usize,
) -> Result<(), ProtocolError> {
    let permits = Arc::new(Semaphore::new(handler_count.max(1)));
    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = Arc::clone(&handler);
        let permits = Arc::clone(&permits);
        tokio::spawn(async move {
            match serve_connection(stream, handler, permits).await {
                Ok(()) => debug!(remote = %peer, "connection closed"),
                Err(e) => warn!(remote = %peer, error = %e, "connection failed"),
            }
        });
    }
}

async fn serve_connection<H: RpcHandler>(
    mut stream: TcpStream,
    handler: Arc<H>,
    permits: Arc<Semaphore>,
) -> Result<(), ProtocolError> {
    loop {
        let request = match read_frame::<_, H::Request>(&mut stream).await? {
            Some(request) => request,
            None => return Ok(()),
        };
        let response = {
            let _permit = permits
                .acquire()
                .await
                .expect("handler semaphore closed");
            handler.handle(request).await
        };
        write_frame(&mut stream, &response).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcConnection;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Pong {
        seq: u32,
    }

    struct Echo;

    #[async_trait]
    impl RpcHandler for Echo {
        type Request = Ping;
        type Response = Pong;

        async fn handle(&self, request: Ping) -> Pong {
            Pong { seq: request.seq }
        }
    }

    #[tokio::test]
    async fn request_response_over_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::new(Echo), 4));

        let mut conn = RpcConnection::connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        for seq in 0..3 {
            let pong: Pong = conn.call(&Ping { seq }).await.unwrap();
            assert_eq!(pong.seq, seq);
        }
    }
}
