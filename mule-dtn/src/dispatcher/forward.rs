use super::*;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

impl Dispatcher {
    pub(super) fn spawn_workers(self: &Arc<Self>, rx: flume::Receiver<ForwardEntry>, workers: usize) {
        for worker in 0..workers {
            let dispatcher = self.clone();
            let rx = rx.clone();
            self.task_tracker.spawn(async move {
                loop {
                    tokio::select! {
                        entry = rx.recv_async() => {
                            let Ok(entry) = entry else { break };
                            dispatcher.forward_bundle(entry).await;
                        }
                        _ = dispatcher.cancel_token.cancelled() => break,
                    }
                }
                trace!("Forward worker {worker} stopped");
            });
        }
    }

    /// Queue a bundle for transmission unless it is already in flight.
    /// Returns whether a new entry was queued.
    pub(crate) fn enqueue_forward(&self, id: &BundleId) -> bool {
        if !self
            .in_flight
            .lock()
            .expect("in-flight set poisoned")
            .insert(id.clone())
        {
            return false;
        }
        if self
            .forward_tx
            .send(ForwardEntry {
                id: id.clone(),
                attempt: 0,
            })
            .is_err()
        {
            // Workers are gone; the node is shutting down
            self.clear_in_flight(id);
            return false;
        }
        true
    }

    async fn forward_bundle(self: &Arc<Self>, entry: ForwardEntry) {
        // Fresh image: the stored bundle may have been deleted or
        // forward-imaged since the entry was queued
        let Some(mut bundle) = self.store.get(&entry.id) else {
            self.clear_in_flight(&entry.id);
            return;
        };

        if bundle.has_expired(now_secs()) {
            debug!("Bundle {} expired awaiting transmission", bundle.id);
            match self.store.delete(&bundle.id).await {
                Ok(true) => self.metrics.bundles_expired(),
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to delete expired bundle {}: {e}", bundle.id);
                    self.metrics.store_errors();
                }
            }
            self.clear_in_flight(&entry.id);
            return;
        }

        let Some((next_hop, (host, port))) = self.neighbors.next_hop() else {
            debug!(
                "No neighbor configured, bundle {} stays in the store",
                bundle.id
            );
            self.clear_in_flight(&entry.id);
            return;
        };

        // Produce the forward-image once per node; a retry of an
        // already-imaged bundle reuses the stored one
        if !bundle.hop_recorded(&self.node_id) {
            bundle.record_hop(&self.node_id);
            if let Err(e) = self.store.update(&bundle).await {
                error!("Failed to persist forward image of {}: {e}", bundle.id);
                self.metrics.store_errors();
            }
        }

        match self.transmit(&bundle, &host, port).await {
            Ok(()) => {
                debug!("Forwarded bundle {} to {next_hop}", bundle.id);
                self.metrics.bundles_forwarded();
                // The stored image stays behind as a dedup shield until
                // the sweeper collects it
                self.forwarded
                    .lock()
                    .expect("forwarded set poisoned")
                    .insert(entry.id.clone());
                self.clear_in_flight(&entry.id);
            }
            Err(e) => {
                debug!("Failed to forward bundle {} to {next_hop}: {e}", bundle.id);
                self.metrics.transport_errors();
                self.schedule_retry(entry);
            }
        }
    }

    /// One transmission: connect, write the frame, half-close, and treat
    /// the receiver's clean close as the acknowledgement.
    async fn transmit(&self, bundle: &Bundle, host: &str, port: u16) -> Result<(), Error> {
        let image = codec::encode(bundle);

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

        tokio::time::timeout(self.connect_timeout, async {
            codec::write_frame(&mut stream, &image, self.max_frame).await?;
            stream.shutdown().await?;

            // Drain until EOF; an RST here surfaces as an error
            let mut sink = [0u8; 64];
            loop {
                if stream.read(&mut sink).await? == 0 {
                    return Ok::<_, Error>(());
                }
            }
        })
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))?
    }

    /// Bounded exponential backoff with jitter. The in-flight mark stays
    /// set across the sleep so the re-sweep cannot double-queue the
    /// bundle; expiry is re-checked when the retry dequeues.
    fn schedule_retry(self: &Arc<Self>, entry: ForwardEntry) {
        let exponent = entry.attempt.min(30);
        let base = self.retry_initial.as_secs_f64() * (1u64 << exponent) as f64;
        let capped = base.min(self.retry_cap.as_secs_f64());
        let delay = Duration::from_secs_f64(capped * rand::rng().random_range(0.5..1.5));

        trace!(
            "Retrying bundle {} in {:.1}s (attempt {})",
            entry.id,
            delay.as_secs_f64(),
            entry.attempt + 1
        );

        let dispatcher = self.clone();
        self.task_tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let id = entry.id.clone();
                    let resend = ForwardEntry {
                        id: entry.id,
                        attempt: entry.attempt + 1,
                    };
                    if dispatcher.forward_tx.send(resend).is_err() {
                        dispatcher.clear_in_flight(&id);
                    }
                }
                _ = dispatcher.cancel_token.cancelled() => {
                    // The bundle stays stored; resumption is lossless
                    dispatcher.clear_in_flight(&entry.id);
                }
            }
        });
    }
}
