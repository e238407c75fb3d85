// service.rs — The cancellable poll loop that turns fetches into a stream.
//
// One Service drives one loop: every cycle it runs the five-step session
// protocol against each configured target, concatenates the batches,
// classifies them against the dedup table, and sends the fresh records to
// the consumer. The channel is bounded at one pending item, so a slow
// consumer stalls emission (and delays the next fetch) instead of losing
// records.
//
// Shutdown is cooperative: checked at the top of every cycle, able to
// interrupt a blocked send and the inter-cycle sleep, but an HTTP call
// already in flight runs to completion or its own timeout first. Closing
// happens exactly once, by dropping the sender when the loop returns.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::dedup::DedupTable;
use crate::error::Error;
use crate::record::Record;
use crate::session::{self, Pacing};
use crate::transport::Transport;

/// Floor below which a configured poll interval is replaced by the default.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Floor below which a configured request timeout is replaced by the default.
const MIN_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters for one harvester instance, immutable for its lifetime.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Appliance management endpoints, e.g.
    /// `https://gw01/mail/en-US/cgi-bin/klwi`.
    pub urls: Vec<String>,
    pub user: String,
    pub password: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
}

impl Opts {
    /// Replace sub-floor timing values with sane defaults. A near-zero
    /// interval would hammer the appliance with login sequences.
    fn validated(mut self) -> Self {
        if self.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                configured = ?self.poll_interval,
                fallback = ?DEFAULT_POLL_INTERVAL,
                "poll interval below floor, using default"
            );
            self.poll_interval = DEFAULT_POLL_INTERVAL;
        }
        if self.timeout < MIN_TIMEOUT {
            warn!(
                configured = ?self.timeout,
                fallback = ?DEFAULT_TIMEOUT,
                "request timeout below floor, using default"
            );
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}

/// Harvests audit logs from the configured appliances and streams every
/// newly observed record until shut down.
pub struct Service {
    opts: Opts,
    pacing: Pacing,
    transport: Transport,
    table: DedupTable,
    tx: mpsc::Sender<Record>,
}

impl Service {
    /// Build a service and the stream its records will arrive on.
    ///
    /// The stream closes exactly once, when the loop observes shutdown
    /// (or the consumer side is dropped).
    pub fn new(opts: Opts) -> Result<(Self, ReceiverStream<Record>), Error> {
        Self::with_pacing(opts, Pacing::default())
    }

    /// Same as [`Service::new`] with explicit inter-step pacing. Intended
    /// for tests against a fake appliance that needs no settle time.
    pub fn with_pacing(
        opts: Opts,
        pacing: Pacing,
    ) -> Result<(Self, ReceiverStream<Record>), Error> {
        let opts = opts.validated();
        let transport = Transport::new(opts.timeout)?;
        // Capacity one: backpressure-propagating, never record-dropping.
        let (tx, rx) = mpsc::channel(1);

        Ok((
            Self {
                opts,
                pacing,
                transport,
                table: DedupTable::new(),
                tx,
            },
            ReceiverStream::new(rx),
        ))
    }

    /// Run poll cycles until `shutdown` fires (value flips to `true` or
    /// its sender is dropped). Transient fetch failures are logged and
    /// retried on the next cycle; they never end the loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            targets = self.opts.urls.len(),
            interval = ?self.opts.poll_interval,
            "harvester running"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let records = self.fetch_all().await;
            let fresh = self.table.classify(records, Utc::now());
            debug!(fresh = fresh.len(), retained = self.table.len(), "cycle classified");

            for record in fresh {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("shutdown during emission, closing stream");
                        return;
                    }
                    sent = self.tx.send(record) => {
                        if sent.is_err() {
                            info!("consumer dropped the stream, stopping");
                            return;
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown, closing stream");
                    return;
                }
                _ = tokio::time::sleep(self.opts.poll_interval) => {}
            }
        }
    }

    /// One cycle's fetch across all targets, concatenated.
    ///
    /// A failing target is skipped for this cycle only; remaining targets
    /// are still processed. Targets share nothing but the dedup table,
    /// which only the classification step touches.
    async fn fetch_all(&self) -> Vec<Record> {
        let mut records = Vec::new();

        for url in &self.opts.urls {
            match session::fetch_journal(
                &self.transport,
                url,
                &self.opts.user,
                &self.opts.password,
                &self.pacing,
            )
            .await
            {
                Ok(batch) => {
                    debug!(url = %url, fetched = batch.len(), "target fetched");
                    records.extend(batch);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "skipping target for this cycle");
                }
            }
        }

        records
    }
}
