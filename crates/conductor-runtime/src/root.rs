//! The composition root.
//!
//! [`Runtime`] constructs every component once, wires dependencies by
//! handle, and owns all background tasks.  There are no hidden globals:
//! every entry point receives the root, and its `shutdown` performs the
//! ordered drain (signal, bounded grace, abandon, persist).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use conductor_critic::{CriticConfig, LlmClient, ValidationCritic};
use conductor_dispatch::{
    AdaptiveDispatcher, DispatcherConfig, ExecutorConfig, HealingConfig, LoadProbe,
    MaintenanceHooks, RecoveryConfig, RecoveryEngine, SelfHealer, SynthesisCache, TieredExecutor,
    ToolCaller, default_strategy_lists,
};
use conductor_health::{ErrorClassifier, HealthLedger, LedgerConfig};
use conductor_net::{HttpMcpClient, Prober, ToolHostEvent, UpdateListener};
use conductor_registry::{
    AliasMapper, CallIdGenerator, RegistryConfig, SchemaRegistry, SchemaSource, Validator,
};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::persist::{self, LearningState};
use crate::trajectory::TrajectoryWriter;

/// Grace period for background tasks during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Cadence of the low-priority ledger decay task.
const DECAY_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Load probe
// ---------------------------------------------------------------------------

/// Coarse load from the number of in-flight tool calls.
pub struct InFlightLoadProbe {
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
}

impl InFlightLoadProbe {
    pub fn new(in_flight: Arc<AtomicUsize>, capacity: usize) -> Self {
        Self {
            in_flight,
            capacity: capacity.max(1),
        }
    }
}

impl LoadProbe for InFlightLoadProbe {
    fn load(&self) -> f64 {
        (self.in_flight.load(Ordering::Relaxed) as f64 / self.capacity as f64).min(1.0)
    }
}

// ---------------------------------------------------------------------------
// Maintenance hooks
// ---------------------------------------------------------------------------

/// Recovery maintenance wired to the runtime's own caches and config.
struct RuntimeMaintenance {
    synthesis: Arc<SynthesisCache>,
    ledger: Arc<HealthLedger>,
    aliases: Arc<AliasMapper>,
}

#[async_trait]
impl MaintenanceHooks for RuntimeMaintenance {
    async fn cleanup(&self) -> std::result::Result<(), String> {
        self.synthesis.clear();
        self.ledger.decay();
        tracing::info!("maintenance cleanup: synthesis cache cleared, ledger pruned");
        Ok(())
    }

    async fn optimize(&self) -> std::result::Result<(), String> {
        self.ledger.decay();
        tracing::info!("maintenance optimize: ledger pruned");
        Ok(())
    }

    async fn reset_config(&self) -> std::result::Result<(), String> {
        // Built-in defaults always exist; resetting means re-reading them.
        self.repair_config().await
    }

    async fn repair_config(&self) -> std::result::Result<(), String> {
        match self.aliases.reload() {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// The Conductor runtime: one instance owns everything.
pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) aliases: Arc<AliasMapper>,
    pub(crate) validator: Arc<Validator>,
    pub(crate) ledger: Arc<HealthLedger>,
    pub(crate) classifier: ErrorClassifier,
    pub(crate) dispatcher: Arc<AdaptiveDispatcher>,
    pub(crate) executor: Arc<TieredExecutor>,
    pub(crate) synthesis: Arc<SynthesisCache>,
    pub(crate) caller: Arc<dyn ToolCaller>,
    pub(crate) recovery: Arc<RecoveryEngine>,
    pub(crate) critic: Arc<ValidationCritic>,
    pub(crate) llm: Option<Arc<dyn LlmClient>>,
    pub(crate) trajectories: TrajectoryWriter,
    pub(crate) call_ids: CallIdGenerator,
    pub(crate) in_flight: Arc<AtomicUsize>,

    shutdown_tx: watch::Sender<bool>,
    background: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Runtime {
    /// Assemble the runtime from its external collaborators.
    ///
    /// Restores persisted learning state when present; corrupt or missing
    /// state cold-starts with defaults.
    pub fn new(
        config: RuntimeConfig,
        source: Arc<dyn SchemaSource>,
        caller: Arc<dyn ToolCaller>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Result<Arc<Self>> {
        let aliases = Arc::new(AliasMapper::load(&config.alias_config_path)?);

        let registry = Arc::new(SchemaRegistry::new(
            source,
            RegistryConfig {
                refresh_interval: config.refresh_interval,
                manifest_roots: config.manifest_roots.clone(),
            },
        ));

        let validator = Arc::new(Validator::new(Arc::clone(&registry), Arc::clone(&aliases)));
        let ledger = Arc::new(HealthLedger::new(LedgerConfig::default()));

        let dispatcher = Arc::new(AdaptiveDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            DispatcherConfig::default(),
        ));

        let executor = Arc::new(TieredExecutor::new(
            Arc::clone(&ledger),
            ExecutorConfig::default(),
        ));
        let synthesis = Arc::new(SynthesisCache::default());
        for (capability, strategies) in
            default_strategy_lists(Arc::clone(&caller), Arc::clone(&synthesis))
        {
            executor.register(capability, strategies)?;
        }

        let maintenance = Arc::new(RuntimeMaintenance {
            synthesis: Arc::clone(&synthesis),
            ledger: Arc::clone(&ledger),
            aliases: Arc::clone(&aliases),
        });
        let recovery = Arc::new(RecoveryEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&executor),
            Arc::clone(&caller),
            maintenance,
            RecoveryConfig::default(),
        ));

        let critic = Arc::new(ValidationCritic::new(
            Arc::clone(&validator),
            Arc::clone(&registry),
            llm.clone(),
            CriticConfig::default(),
        ));

        // Restore learned state from the previous run, if any.
        if let Some(state) = persist::load(&config.state_path) {
            dispatcher.restore(state.dispatcher);
            executor.restore(state.executor);
            ledger.restore(state.ledger);
        }

        let (shutdown_tx, _) = watch::channel(false);
        let trajectories = TrajectoryWriter::new(&config.trajectory_path);

        Ok(Arc::new(Self {
            config,
            registry,
            aliases,
            validator,
            ledger,
            classifier: ErrorClassifier::new(),
            dispatcher,
            executor,
            synthesis,
            caller,
            recovery,
            critic,
            llm,
            trajectories,
            call_ids: CallIdGenerator::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            background: Mutex::new(Vec::new()),
        }))
    }

    /// Bring the catalog up: initial refresh, seeding the built-in catalog
    /// if the tool host is unreachable and nothing was ever fetched.
    pub async fn init(&self) -> Result<()> {
        if let Err(e) = self.registry.refresh(true).await {
            tracing::warn!(error = %e, "initial schema refresh failed");
        }
        if self.registry.snapshot().is_empty() {
            self.registry.seed_builtin();
        }
        tracing::info!(
            tools = self.registry.snapshot().tool_count(),
            hash = %self.registry.action_whitelist_hash(),
            "registry initialized"
        );
        Ok(())
    }

    /// Spawn the persistent background tasks: self-healing, ledger decay,
    /// and (when configured) the connectivity prober and the tool-host
    /// update listener.
    pub fn spawn_background(
        self: &Arc<Self>,
        prober: Option<Arc<Prober>>,
        mcp_endpoints: Option<Arc<HttpMcpClient>>,
    ) {
        let mut background = self.background.lock().expect("runtime lock poisoned");

        // Self-healing rule loop.
        let healer = Arc::new(SelfHealer::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.recovery),
            Arc::new(InFlightLoadProbe::new(Arc::clone(&self.in_flight), 16)),
            HealingConfig::default(),
        ));
        background.push((
            "self_healing",
            tokio::spawn(healer.run(self.shutdown_tx.subscribe())),
        ));

        // Low-priority ledger decay.
        {
            let ledger = Arc::clone(&self.ledger);
            let mut shutdown = self.shutdown_tx.subscribe();
            background.push((
                "ledger_decay",
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(DECAY_INTERVAL);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => ledger.decay(),
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                }),
            ));
        }

        // Connectivity prober.
        if let Some(prober) = prober {
            background.push((
                "prober",
                tokio::spawn(prober.run(self.shutdown_tx.subscribe())),
            ));
        }

        // Tool-host update stream plus its event pump.
        if let Some(url) = self.config.update_stream_url.clone() {
            let (tx, rx) = mpsc::channel(64);
            let listener = Arc::new(UpdateListener::new(
                url,
                tx,
                Arc::clone(&self.ledger),
                conductor_net::ListenerConfig::default(),
            ));
            background.push((
                "update_listener",
                tokio::spawn(listener.run(self.shutdown_tx.subscribe())),
            ));
            background.push((
                "update_pump",
                tokio::spawn(Self::pump_tool_events(
                    Arc::clone(&self.registry),
                    rx,
                    mcp_endpoints,
                    self.shutdown_tx.subscribe(),
                )),
            ));
        }
    }

    /// Apply tool-host events: forced registry refresh per event, endpoint
    /// table upkeep when the HTTP transport is in use.
    async fn pump_tool_events(
        registry: Arc<SchemaRegistry>,
        mut events: mpsc::Receiver<ToolHostEvent>,
        mcp: Option<Arc<HttpMcpClient>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };

                    if let Some(mcp) = &mcp {
                        match &event {
                            ToolHostEvent::ToolInstalled { tool_id, endpoint: Some(endpoint), .. }
                            | ToolHostEvent::ToolUpdated { tool_id, endpoint: Some(endpoint), .. } => {
                                mcp.set_endpoint(tool_id.clone(), endpoint.clone());
                            }
                            ToolHostEvent::ToolUninstalled { tool_id } => {
                                mcp.remove_endpoint(tool_id);
                            }
                            _ => {}
                        }
                    }

                    tracing::info!(tool_id = event.tool_id(), "tool-host event, forcing refresh");
                    if let Err(e) = registry.refresh(true).await {
                        tracing::warn!(error = %e, "event-driven refresh failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Ordered shutdown: signal the background loops, give them a bounded
    /// grace period, abandon stragglers, then persist learning state.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("runtime shutting down");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<(&'static str, JoinHandle<()>)> = {
            let mut background = self.background.lock().expect("runtime lock poisoned");
            background.drain(..).collect()
        };

        for (name, handle) in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!(task = name, "background task did not stop in time, abandoning");
            }
        }

        persist::save(
            &self.config.state_path,
            LearningState {
                dispatcher: self.dispatcher.export_state(),
                executor: self.executor.export_state(),
                ledger: self.ledger.export_state(),
                saved_at: None,
            },
        )?;

        Ok(())
    }

    // -- Component accessors -------------------------------------------------

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<HealthLedger> {
        &self.ledger
    }

    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    pub fn aliases(&self) -> &Arc<AliasMapper> {
        &self.aliases
    }

    pub fn dispatcher(&self) -> &Arc<AdaptiveDispatcher> {
        &self.dispatcher
    }

    pub fn executor(&self) -> &Arc<TieredExecutor> {
        &self.executor
    }

    pub fn critic(&self) -> &Arc<ValidationCritic> {
        &self.critic
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
