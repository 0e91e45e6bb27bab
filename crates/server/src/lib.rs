//! weathervane-server: the aggregator core.
//!
//! Wires the record store, the Lamport clock, and the wire codec into a
//! TCP service: one accept loop, one task per connection, one periodic
//! expiry sweep. Startup recovers persisted records and restores the
//! process scalars from their on-disk maxima.

pub mod connection;
pub mod expiry;

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use weathervane_clock::ClockHandle;
use weathervane_config::AggregatorConfig;
use weathervane_store::{recover, ExpiryPolicy, RecordStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared aggregator state handed to every connection task.
#[derive(Debug, Clone)]
pub struct Aggregator {
    config: AggregatorConfig,
    store: Arc<RecordStore>,
    clock: ClockHandle,
    policy: ExpiryPolicy,
}

impl Aggregator {
    /// Recover persisted records from the data directory and restore the
    /// Lamport clock and update counter to the loaded maxima.
    pub async fn bootstrap(config: AggregatorConfig) -> Result<Self, ServerError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(RecordStore::new(&config.data_dir));
        let clock = ClockHandle::new();

        let recovered = recover(&config.data_dir, &store).await?;
        clock.restore(recovered.max_lamport, recovered.max_update_count);
        tracing::info!(
            stations = recovered.stations,
            lamport = recovered.max_lamport,
            update_count = recovered.max_update_count,
            "bootstrap complete"
        );

        let policy = ExpiryPolicy {
            max_age_ms: config.expiry.max_age_ms,
            max_update_lag: config.expiry.max_update_lag,
        };

        Ok(Self {
            config,
            store,
            clock,
            policy,
        })
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.clock
    }

    pub fn policy(&self) -> &ExpiryPolicy {
        &self.policy
    }

    /// Bind the configured listen port.
    pub async fn listen(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "aggregator listening");
        Ok(listener)
    }

    /// Spawn the periodic expiry sweep.
    pub fn spawn_expiry_sweep(&self) -> JoinHandle<()> {
        expiry::spawn_sweep(
            self.store.clone(),
            self.clock.clone(),
            self.policy,
            self.config.expiry.sweep_interval(),
        )
    }

    /// Accept connections forever, one handler task per connection.
    /// A failed accept is logged and the loop continues.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    weathervane_metrics::metrics().connections_accepted.inc();
                    tracing::debug!(%peer, "connection accepted");
                    let handler = connection::Connection::new(
                        self.store.clone(),
                        self.clock.clone(),
                        self.policy,
                        peer,
                    );
                    tokio::spawn(handler.serve(stream));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}
