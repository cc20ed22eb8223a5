//! Sync service lifecycle and the polling worker.
//!
//! This module defines the `SyncService`, the entry point for keeping the booking database in step
//! with the contract. While running, a single worker task owns the mutable [`SyncState`]:
//!
//! - timer ticks and manual sync requests are both handled by the worker, one cycle at a time
//! - every cycle publishes a fresh [`SyncStatus`] snapshot through a `watch` channel
//! - `stop()` closes the command channel and waits for the worker, so a cycle in flight always
//!   completes before `stop()` returns
//!
//! The first automatic cycle runs one polling interval after `start()`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::SyncError;
use super::events::SyncEvent;
use super::poller::{CycleReport, Poller, RetryPolicy};
use super::processor::{EventProcessor, ProcessOutcome};
use crate::config::{ConfigError, SyncConfig};
use crate::rpc::{LedgerSource, SorobanRpcClient};
use crate::store::{SqliteSyncStore, SyncStateRecord, SyncStore};

/// Snapshot of the service state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_running: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub total_events_processed: u64,
    pub failed_events: u64,
    pub current_block_height: u32,
    pub last_processed_block: u32,
}

/// Mutable sync state. Owned by the worker while the service runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub last_processed_block: u32,
    pub total_events_processed: u64,
    pub failed_events: u64,
    pub current_block_height: u32,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Take over the persisted fields of `record`.
    pub fn restore(&mut self, record: SyncStateRecord) {
        self.last_processed_block = record.last_processed_block;
        self.total_events_processed = record.total_events_processed;
        self.failed_events = record.failed_events;
        self.last_sync_time = record.last_sync_time;
    }

    pub fn to_record(&self) -> SyncStateRecord {
        SyncStateRecord {
            last_processed_block: self.last_processed_block,
            total_events_processed: self.total_events_processed,
            failed_events: self.failed_events,
            last_sync_time: self.last_sync_time,
        }
    }

    pub fn snapshot(&self, is_running: bool) -> SyncStatus {
        SyncStatus {
            is_running,
            last_sync_time: self.last_sync_time,
            total_events_processed: self.total_events_processed,
            failed_events: self.failed_events,
            current_block_height: self.current_block_height,
            last_processed_block: self.last_processed_block,
        }
    }
}

impl From<SyncStatus> for SyncState {
    fn from(status: SyncStatus) -> Self {
        Self {
            last_processed_block: status.last_processed_block,
            total_events_processed: status.total_events_processed,
            failed_events: status.failed_events,
            current_block_height: status.current_block_height,
            last_sync_time: status.last_sync_time,
        }
    }
}

enum Command {
    Sync(oneshot::Sender<Result<CycleReport, SyncError>>),
}

struct Worker {
    commands: mpsc::Sender<Command>,
    handle: JoinHandle<SyncState>,
}

enum WorkerSlot {
    Idle(SyncState),
    Running(Worker),
}

/// Blockchain sync service
pub struct SyncService {
    pub(super) store: Arc<dyn SyncStore>,
    pub(super) processor: EventProcessor,
    source: Arc<dyn LedgerSource>,
    poller: Arc<Poller>,
    poll_interval: Duration,
    network_passphrase: String,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    slot: Mutex<WorkerSlot>,
}

impl SyncService {
    /// Create a stopped service on top of an existing ledger source and store.
    pub fn new(
        config: &SyncConfig,
        source: Arc<dyn LedgerSource>,
        store: Arc<dyn SyncStore>,
    ) -> Self {
        let processor = EventProcessor::new(store.clone());
        let poller = Poller::new(
            source.clone(),
            store.clone(),
            processor.clone(),
            RetryPolicy::from_config(config),
            config.start_ledger,
        );
        let (status_tx, _) = watch::channel(SyncStatus::default());

        Self {
            store,
            processor,
            source,
            poller: Arc::new(poller),
            poll_interval: config.poll_interval,
            network_passphrase: config.network_passphrase.clone(),
            status_tx: Arc::new(status_tx),
            slot: Mutex::new(WorkerSlot::Idle(SyncState::default())),
        }
    }

    /// Create a service that talks to the configured Soroban RPC endpoint and SQLite database.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let client = SorobanRpcClient::new(
            config.rpc_url.clone(),
            config.contract_id.clone(),
            config.rpc_timeout,
        )?
        .with_page_limit(config.event_page_limit);
        let store = SqliteSyncStore::open(&config.database_path)?;

        info!(
            "Sync service created for contract {} on {}",
            config.contract_id,
            config.network_name()
        );
        Ok(Self::new(config, Arc::new(client), Arc::new(store)))
    }

    /// Create a service from the process environment.
    pub fn from_env() -> Result<Self, SyncError> {
        let config = SyncConfig::from_env()?;
        Self::from_config(&config)
    }

    pub fn polling_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to status snapshots published after every cycle.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.slot.lock().await, WorkerSlot::Running(_))
    }

    /// Start polling. Starting a running service is a no-op.
    ///
    /// Persisted progress is restored from the store first. When the ledger source reports a
    /// network passphrase it must match the configured one.
    pub async fn start(&self) -> Result<(), SyncError> {
        if self.is_running().await {
            info!("Sync service is already running");
            return Ok(());
        }

        self.verify_network().await?;

        let mut slot = self.slot.lock().await;
        let WorkerSlot::Idle(state) = &mut *slot else {
            info!("Sync service is already running");
            return Ok(());
        };

        match self.store.load_sync_state().await {
            Ok(Some(record)) => {
                info!(
                    "Loaded sync state: last processed block {}",
                    record.last_processed_block
                );
                state.restore(record);
            }
            Ok(None) => debug!("No persisted sync state, starting fresh"),
            Err(e) => warn!("Could not load sync state, using current state: {}", e),
        }

        let state = std::mem::take(state);
        self.status_tx.send_replace(state.snapshot(true));

        let (commands, receiver) = mpsc::channel(8);
        let handle = tokio::spawn(run_worker(
            self.poller.clone(),
            state,
            self.poll_interval,
            receiver,
            self.status_tx.clone(),
        ));
        *slot = WorkerSlot::Running(Worker { commands, handle });

        info!(
            "Blockchain sync service started with {}ms polling interval",
            self.poll_interval.as_millis()
        );
        Ok(())
    }

    async fn verify_network(&self) -> Result<(), SyncError> {
        match self.source.network_passphrase().await {
            Ok(Some(reported)) if reported != self.network_passphrase => {
                Err(ConfigError::NetworkMismatch {
                    configured: self.network_passphrase.clone(),
                    reported,
                }
                .into())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Could not verify network passphrase: {}", e);
                Ok(())
            }
        }
    }

    /// Stop polling and wait for the worker to finish. Stopping a stopped service is a no-op.
    pub async fn stop(&self) {
        let mut slot = self.slot.lock().await;
        let worker = match std::mem::replace(&mut *slot, WorkerSlot::Idle(SyncState::default())) {
            WorkerSlot::Running(worker) => worker,
            idle => {
                *slot = idle;
                debug!("Sync service is not running");
                return;
            }
        };

        let Worker { commands, handle } = worker;
        drop(commands);

        let state = match handle.await {
            Ok(state) => state,
            Err(e) => {
                error!("Sync worker terminated abnormally: {}", e);
                SyncState::from(self.status())
            }
        };

        self.status_tx.send_replace(state.snapshot(false));
        *slot = WorkerSlot::Idle(state);
        info!("Blockchain sync service stopped");
    }

    /// Run one poll cycle now, on the worker.
    ///
    /// Fails with [`SyncError::NotRunning`] when the service is stopped. A failed cycle is
    /// counted in `failed_events` and logged like a timer cycle, and its error is also handed
    /// back to the caller instead of being swallowed. The service keeps running either way.
    pub async fn trigger_manual_sync(&self) -> Result<CycleReport, SyncError> {
        let commands = match &*self.slot.lock().await {
            WorkerSlot::Running(worker) => worker.commands.clone(),
            WorkerSlot::Idle(_) => return Err(SyncError::NotRunning),
        };

        info!("Manual sync triggered");
        let (reply, response) = oneshot::channel();
        commands
            .send(Command::Sync(reply))
            .await
            .map_err(|_| SyncError::WorkerGone)?;
        response.await.map_err(|_| SyncError::WorkerGone)?
    }

    /// Record and apply a single event outside of a poll cycle.
    pub async fn process_event(&self, event: &SyncEvent) -> Result<ProcessOutcome, SyncError> {
        self.processor.process_event(event).await
    }
}

async fn run_worker(
    poller: Arc<Poller>,
    mut state: SyncState,
    period: Duration,
    mut commands: mpsc::Receiver<Command>,
    status: Arc<watch::Sender<SyncStatus>>,
) -> SyncState {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Sync(reply)) => {
                    let result = poller.poll(&mut state).await;
                    status.send_replace(state.snapshot(true));
                    let _ = reply.send(result);
                }
                None => break,
            },
            _ = ticker.tick() => {
                // Failures are logged and counted by the poller
                let _ = poller.poll(&mut state).await;
                status.send_replace(state.snapshot(true));
            }
        }
    }

    debug!("Sync worker exiting");
    state
}
