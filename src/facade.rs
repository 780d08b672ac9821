//! Component wiring and the process-wide instance.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stowage_bridge::{BridgeOptions, ColumnarBridge, NoopSink, VirtualFileSystem};
use stowage_client::{ContentClient, ContentClientHandler, NormalizedClient, SimulatedClient};
use stowage_core::{Backend, Config, Error, Operation, Result};
use stowage_daemon::{DaemonSupervisor, SupervisorOptions};
use stowage_deals::{DealManager, DealPolicy, MarketHandler, StorageMarketApi};
use stowage_health::{FnProbe, HealthMonitor, LocalPathProbe, MonitorOptions, Probe};
use stowage_wal::{
    BackendHandler, HandlerRegistry, ProcessorOptions, WalOptions, WalProcessor, WalStore,
};
use tracing::info;

/// The assembled storage substrate.
///
/// Construction order matters: the store first (everything journals into
/// it), then the supervisor (the health monitor probes it), the monitor,
/// the processor (consults the monitor), and the bridge last. `close()`
/// unwinds in reverse.
pub struct Stowage {
    config: Config,
    supervisor: Arc<DaemonSupervisor>,
    health: Arc<HealthMonitor>,
    store: Arc<WalStore>,
    handlers: Arc<HandlerRegistry>,
    processor: Arc<WalProcessor>,
    bridge: Arc<ColumnarBridge>,
    vfs: Arc<VirtualFileSystem>,
    client: Arc<NormalizedClient>,
    closed: AtomicBool,
}

impl Stowage {
    /// Open every component under `config` with a simulated content client.
    pub fn open(config: Config) -> Result<Stowage> {
        Stowage::open_with_client(config, Arc::new(SimulatedClient::new()))
    }

    /// Open with an explicit content client implementation (chosen here,
    /// at wiring time, never probed reflectively later).
    pub fn open_with_client(
        config: Config,
        content_client: Arc<dyn ContentClient>,
    ) -> Result<Stowage> {
        config.validate()?;

        let store = Arc::new(WalStore::open(WalOptions::from_config(&config))?);
        let supervisor = Arc::new(DaemonSupervisor::new(SupervisorOptions {
            start_timeout: config.daemon_start_timeout(),
            stop_grace: config.daemon_stop_grace(),
            ..SupervisorOptions::for_repo(config.repo_path.clone())
        }));

        // Built-in probes: local storage writability and daemon liveness.
        // Remote backends get probes when their handlers are wired in.
        let local_probe: Arc<dyn Probe> = Arc::new(LocalPathProbe::new(config.base_path.clone()));
        let daemon_probe: Arc<dyn Probe> = {
            let supervisor = Arc::clone(&supervisor);
            Arc::new(FnProbe::new(move || {
                Ok(supervisor.daemon_status()?.running)
            }))
        };
        let health = Arc::new(HealthMonitor::new(
            MonitorOptions {
                check_interval: config.check_interval(),
                history_size: config.history_size,
                probe_timeout: config.probe_timeout(),
                autostart: true,
            },
            vec![(Backend::Local, local_probe), (Backend::Ipfs, daemon_probe)],
            None,
        ));

        let handlers = Arc::new(HandlerRegistry::new());
        let processor = Arc::new(WalProcessor::new(
            Arc::clone(&store),
            Some(Arc::clone(&health)),
            Arc::clone(&handlers),
            ProcessorOptions::from_config(&config),
        ));
        processor.start();

        let bridge = Arc::new(ColumnarBridge::open(
            BridgeOptions::from_config(&config),
            config.enable_wal.then(|| Arc::clone(&store)),
            config.enable_replication.then(|| {
                Arc::new(NoopSink) as Arc<dyn stowage_bridge::ReplicationSink>
            }),
        )?);
        let vfs = Arc::new(VirtualFileSystem::new(Arc::clone(&bridge)));
        let client = Arc::new(NormalizedClient::new(content_client));

        // the content client executes queued operations for the daemon
        // backend; other backends get handlers as they are wired in
        handlers.register(
            Backend::Ipfs,
            Arc::new(ContentClientHandler::new(
                Arc::clone(&client) as Arc<dyn ContentClient>
            )),
        );

        info!(base = %config.base_path.display(), "stowage substrate opened");
        Ok(Stowage {
            config,
            supervisor,
            health,
            store,
            handlers,
            processor,
            bridge,
            vfs,
            client,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn wal(&self) -> &Arc<WalStore> {
        &self.store
    }

    pub fn processor(&self) -> &Arc<WalProcessor> {
        &self.processor
    }

    pub fn bridge(&self) -> &Arc<ColumnarBridge> {
        &self.bridge
    }

    pub fn vfs(&self) -> &Arc<VirtualFileSystem> {
        &self.vfs
    }

    pub fn supervisor(&self) -> &Arc<DaemonSupervisor> {
        &self.supervisor
    }

    pub fn client(&self) -> &Arc<NormalizedClient> {
        &self.client
    }

    /// Register the handler that executes operations against a backend.
    pub fn register_handler(&self, backend: Backend, handler: Arc<dyn BackendHandler>) {
        self.handlers.register(backend, handler);
    }

    /// Attach a storage market: queued Filecoin operations are placed as
    /// redundant deals under `policy`. Returns the deal manager for
    /// tracking and health queries.
    pub fn attach_market(
        &self,
        api: Arc<dyn StorageMarketApi>,
        policy: DealPolicy,
    ) -> Arc<DealManager> {
        let manager = Arc::new(DealManager::new(api));
        self.handlers.register(
            Backend::Filecoin,
            Arc::new(MarketHandler::new(Arc::clone(&manager), policy)),
        );
        manager
    }

    /// Append an operation to the WAL and nudge the processor.
    pub fn append_operation(&self, operation: Operation) -> Result<Operation> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidArgument("stowage is closed".into()));
        }
        let appended = self.store.append(operation)?;
        self.processor.wakeup();
        Ok(appended)
    }

    /// Store a table as a content-addressed artifact.
    pub fn store_table(
        &self,
        table: &stowage_columnar::Table,
        name: Option<&str>,
        metadata: Option<std::collections::BTreeMap<String, String>>,
        partition_cols: Option<&[String]>,
    ) -> Result<stowage_bridge::StoreReceipt> {
        self.bridge.store(table, name, metadata, partition_cols)
    }

    /// Read a stored artifact back in full.
    pub fn retrieve_table(&self, cid: &str) -> Result<stowage_columnar::Table> {
        Ok(self.bridge.retrieve(cid, None, Vec::new(), true)?.table)
    }

    /// Cancel a queued or in-flight operation.
    pub fn cancel_operation(&self, operation_id: &str) -> Result<bool> {
        self.processor.cancel_operation(operation_id)
    }

    /// Stop every component in reverse construction order. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.processor.close();
        self.bridge.close();
        self.store.close();
        self.health.close();
        info!("stowage substrate closed");
    }
}

impl Drop for Stowage {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Process-wide instance
// ============================================================================

static GLOBAL: Lazy<RwLock<Option<Arc<Stowage>>>> = Lazy::new(|| RwLock::new(None));

/// Initialize the process-wide instance. Fails if one is already live;
/// tear the old one down first with [`shutdown_global`].
pub fn init_global(config: Config) -> Result<Arc<Stowage>> {
    let mut slot = GLOBAL.write();
    if slot.is_some() {
        return Err(Error::InvalidArgument(
            "global stowage instance already initialized".into(),
        ));
    }
    let instance = Arc::new(Stowage::open(config)?);
    *slot = Some(Arc::clone(&instance));
    Ok(instance)
}

/// The process-wide instance, if initialized.
pub fn global() -> Option<Arc<Stowage>> {
    GLOBAL.read().clone()
}

/// Close and drop the process-wide instance. Idempotent.
pub fn shutdown_global() {
    if let Some(instance) = GLOBAL.write().take() {
        instance.close();
    }
}
