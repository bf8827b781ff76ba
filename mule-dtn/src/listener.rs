//! The inbound transport: a framed TCP server. One connection carries
//! exactly one bundle; the sender closes after writing the frame and our
//! clean close is the acknowledgement.

use super::*;
use crate::dispatcher::Dispatcher;
use crate::metrics::Metrics;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

pub(crate) struct Listener {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<Metrics>,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub task_tracker: tokio_util::task::TaskTracker,
    pub max_frame: usize,
    pub read_timeout: Duration,
}

impl Listener {
    pub async fn listen(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                r = listener.accept() => match r {
                    Ok((stream, remote_addr)) => {
                        // Spawn immediately to prevent head-of-line blocking
                        let listener = self.clone();
                        self.task_tracker.spawn(listener.handle_connection(stream, remote_addr));
                    }
                    Err(e) => warn!("Failed to accept connection: {e}"),
                },
                _ = self.cancel_token.cancelled() => break,
            }
        }
        trace!("Listener stopped");
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, remote_addr: SocketAddr) {
        let frame = match tokio::time::timeout(
            self.read_timeout,
            codec::read_frame(&mut stream, self.max_frame),
        )
        .await
        {
            Err(_) => {
                debug!("Connection from {remote_addr} timed out");
                self.metrics.malformed_frames();
                return;
            }
            Ok(Err(e)) => {
                debug!("Bad frame from {remote_addr}: {e}");
                self.metrics.malformed_frames();
                return;
            }
            Ok(Ok(frame)) => frame,
        };

        let bundle = match codec::decode(&frame) {
            Ok(bundle) => bundle,
            Err(e) => {
                debug!("Undecodable bundle from {remote_addr}: {e}");
                self.metrics.malformed_frames();
                return;
            }
        };

        trace!("Received bundle {} from {remote_addr}", bundle.id);
        self.dispatcher.on_received(bundle).await;

        // The bundle is stored (or deliberately dropped); close cleanly
        // to acknowledge
        _ = stream.shutdown().await;
    }
}
