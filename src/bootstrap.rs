//! Bootstrap (C14): a single long-lived handle wiring C1–C13 together,
//! replacing the source pattern flagged in spec §9 ("global singletons via
//! module-level getters" / "background threads started from constructors").
//! Every component here is an explicit field constructed once in
//! [`GatewayHandles::new`]; background loops are started and stopped
//! explicitly by the caller (`main.rs`) rather than spawned from inside a
//! constructor.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapters::lightning::LightningAdapter;
use crate::adapters::ChainAdapter;
use crate::balance::BalanceManager;
use crate::bridge::LightningBridge;
use crate::challenge::ChallengeManager;
use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::events::EventBus;
use crate::jobs::{spawn_stub_worker, InProcessJobQueue, JobQueue};
use crate::orchestrator::SigningOrchestrator;
use crate::session::SessionManager;
use crate::store::LedgerStore;
use crate::transaction::TransactionProcessor;
use crate::vtxo::settlement::SettlementEngine;
use crate::vtxo::VtxoManager;

/// Every component of record, built once and shared by clone (each manager
/// wraps its shared state in `Arc`/`DashMap`, so cloning the handle is
/// cheap — the same style `SessionManager` already uses internally).
#[derive(Clone)]
pub struct GatewayHandles {
    pub config: GatewayConfig,
    pub store: LedgerStore,
    pub events: Arc<EventBus>,
    pub jobs: Arc<dyn JobQueue>,
    pub chain: Arc<dyn ChainAdapter>,
    pub lightning: Arc<dyn LightningAdapter>,
    pub balances: BalanceManager,
    pub vtxos: VtxoManager,
    pub sessions: SessionManager,
    pub challenges: ChallengeManager,
    pub transactions: TransactionProcessor,
    pub orchestrator: SigningOrchestrator,
    pub bridge: LightningBridge,
    pub settlement: SettlementEngine,
}

impl GatewayHandles {
    pub fn new(
        config: GatewayConfig,
        chain: Arc<dyn ChainAdapter>,
        lightning: Arc<dyn LightningAdapter>,
    ) -> GatewayResult<Self> {
        let store = LedgerStore::open(&config.data_dir)?;
        let events = Arc::new(EventBus::new());
        let (job_queue, job_rx) = InProcessJobQueue::new();
        let jobs: Arc<dyn JobQueue> = Arc::new(job_queue);
        spawn_stub_worker(job_rx);

        let balances = BalanceManager::new(store.clone());
        let vtxos = VtxoManager::new(store.clone(), chain.clone(), jobs.clone(), config.clone());
        let sessions = SessionManager::new(store.clone(), config.clone(), events.clone());
        let challenges = ChallengeManager::new(store.clone(), config.clone(), sessions.clone());
        let transactions = TransactionProcessor::new(store.clone(), balances.clone(), chain.clone(), config.clone());
        let orchestrator = SigningOrchestrator::new(
            sessions.clone(),
            transactions.clone(),
            balances.clone(),
            chain.clone(),
            store.clone(),
            config.clone(),
        );
        let bridge = LightningBridge::new(
            store.clone(),
            balances.clone(),
            lightning.clone(),
            events.clone(),
            config.clone(),
        );
        let settlement = SettlementEngine::new(store.clone(), chain.clone());

        Ok(Self {
            config,
            store,
            events,
            jobs,
            chain,
            lightning,
            balances,
            vtxos,
            sessions,
            challenges,
            transactions,
            orchestrator,
            bridge,
            settlement,
        })
    }

    /// Opens an ephemeral, temporary-storage instance wired against whatever
    /// adapters the caller provides — used by integration tests and by
    /// `main.rs` under `--ephemeral`.
    pub fn new_with_store(
        config: GatewayConfig,
        store: LedgerStore,
        chain: Arc<dyn ChainAdapter>,
        lightning: Arc<dyn LightningAdapter>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let (job_queue, job_rx) = InProcessJobQueue::new();
        let jobs: Arc<dyn JobQueue> = Arc::new(job_queue);
        spawn_stub_worker(job_rx);

        let balances = BalanceManager::new(store.clone());
        let vtxos = VtxoManager::new(store.clone(), chain.clone(), jobs.clone(), config.clone());
        let sessions = SessionManager::new(store.clone(), config.clone(), events.clone());
        let challenges = ChallengeManager::new(store.clone(), config.clone(), sessions.clone());
        let transactions = TransactionProcessor::new(store.clone(), balances.clone(), chain.clone(), config.clone());
        let orchestrator = SigningOrchestrator::new(
            sessions.clone(),
            transactions.clone(),
            balances.clone(),
            chain.clone(),
            store.clone(),
            config.clone(),
        );
        let bridge = LightningBridge::new(
            store.clone(),
            balances.clone(),
            lightning.clone(),
            events.clone(),
            config.clone(),
        );
        let settlement = SettlementEngine::new(store.clone(), chain.clone());

        Self {
            config,
            store,
            events,
            jobs,
            chain,
            lightning,
            balances,
            vtxos,
            sessions,
            challenges,
            transactions,
            orchestrator,
            bridge,
            settlement,
        }
    }

    /// Spawns the three independent background loops (spec §4.2 inventory
    /// monitor + hourly settlement, §4.6 Lightning monitor) plus the session
    /// expiry sweep, each honoring `cancel` and draining on the next tick
    /// rather than being killed mid-operation.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_inventory_monitor(cancel.clone()),
            self.spawn_settlement_loop(cancel.clone()),
            self.spawn_lightning_monitor(cancel.clone()),
            self.spawn_session_expiry_sweep(cancel),
        ]
    }

    fn spawn_inventory_monitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let vtxos = self.vtxos.clone();
        let interval = self.config.inventory_monitor_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("inventory monitor shutting down");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = vtxos.run_inventory_tick().await {
                            tracing::warn!(error = %e, "inventory monitor tick failed");
                        }
                        if let Err(e) = vtxos.sweep_expired() {
                            tracing::warn!(error = %e, "vtxo expiry sweep failed");
                        }
                    }
                }
            }
        })
    }

    fn spawn_settlement_loop(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let settlement = self.settlement.clone();
        let interval = self.config.settlement_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("settlement loop shutting down");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match settlement.run_once().await {
                            Ok(summary) => tracing::info!(
                                groups_settled = summary.groups_settled,
                                vtxos_settled = summary.vtxos_settled,
                                "settlement cycle complete"
                            ),
                            Err(e) => tracing::warn!(error = %e, "settlement cycle failed"),
                        }
                        if let Err(e) = settlement.confirm_pending_settlements(1).await {
                            tracing::warn!(error = %e, "settlement confirmation watcher failed");
                        }
                    }
                }
            }
        })
    }

    fn spawn_lightning_monitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let bridge = self.bridge.clone();
        let interval = self.config.lightning_monitor_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("lightning monitor shutting down");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = bridge.run_monitor_tick().await {
                            tracing::warn!(error = %e, "lightning monitor tick failed");
                        }
                    }
                }
            }
        })
    }

    /// Not named in spec §4.2/§4.6's loop list, but required for the
    /// "expiry liveness" testable property (spec §8): every non-terminal
    /// session past its TTL must *eventually* transition to `expired`, even
    /// if nobody calls `get()` on it in the meantime.
    fn spawn_session_expiry_sweep(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("session expiry sweep shutting down");
                        return;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {
                        if let Err(e) = sessions.sweep_expired_sessions().await {
                            tracing::warn!(error = %e, "session expiry sweep failed");
                        }
                    }
                }
            }
        })
    }
}
