//! Live tool-schema registry.
//!
//! The registry is the single source of truth for which tools exist, what
//! actions they expose, and what parameters those actions accept.  Readers
//! obtain an immutable [`RegistrySnapshot`]; writers replace the whole
//! snapshot atomically, so a lookup never observes a half-merged catalog.
//!
//! Refreshes are serialized by a single lock and incremental: upstream
//! version fingerprints are diffed against the previous refresh and only
//! changed tools are re-fetched.  Any failure during a refresh rolls back to
//! the last-known-good snapshot and flags the registry as degraded; the
//! registry never serves an empty snapshot if a prior good one exists.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{RegistryError, Result};
use crate::manifest::{self, ServiceManifest};
use crate::schema::{SchemaIssue, ToolSchema, builtin_catalog};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable point-in-time view of the tool catalog.
#[derive(Debug)]
pub struct RegistrySnapshot {
    tools: HashMap<String, Arc<ToolSchema>>,
    whitelist: BTreeSet<(String, String)>,
    whitelist_hash: String,
    built_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    fn build(tools: HashMap<String, Arc<ToolSchema>>) -> Arc<Self> {
        let whitelist: BTreeSet<(String, String)> = tools
            .values()
            .flat_map(|schema| {
                schema
                    .actions
                    .iter()
                    .map(|a| (schema.tool_id.clone(), a.name.clone()))
            })
            .collect();

        let joined = whitelist
            .iter()
            .map(|(t, a)| format!("{t}.{a}"))
            .collect::<Vec<_>>()
            .join("|");

        Arc::new(Self {
            tools,
            whitelist_hash: stable_hash(&joined),
            whitelist,
            built_at: Utc::now(),
        })
    }

    fn empty() -> Arc<Self> {
        Self::build(HashMap::new())
    }

    /// Look up a tool schema by canonical id.
    pub fn lookup(&self, tool_id: &str) -> Option<Arc<ToolSchema>> {
        self.tools.get(tool_id).cloned()
    }

    /// All tool ids in the snapshot.
    pub fn tool_ids(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// The set of valid `(tool_id, action)` pairs.
    pub fn whitelist(&self) -> &BTreeSet<(String, String)> {
        &self.whitelist
    }

    /// Stable short hash of the whitelist, used to detect drift between the
    /// catalog shown to the LLM and the catalog in force at execution time.
    pub fn whitelist_hash(&self) -> &str {
        &self.whitelist_hash
    }

    /// Number of tools in the snapshot.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Whether the snapshot holds no tools at all.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// When this snapshot was built.
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Render the catalog for inclusion in the LLM prompt, grouped by
    /// category and stamped with the whitelist hash.
    pub fn generate_llm_catalog(&self) -> String {
        if self.tools.is_empty() {
            return "No tools are currently available.".to_owned();
        }

        let mut by_category: HashMap<&str, Vec<&Arc<ToolSchema>>> = HashMap::new();
        for schema in self.tools.values() {
            by_category.entry(&schema.category).or_default().push(schema);
        }

        let mut categories: Vec<_> = by_category.into_iter().collect();
        categories.sort_by_key(|(name, _)| *name);

        let mut lines = vec!["### Live tool catalog".to_owned()];
        for (category, mut schemas) in categories {
            schemas.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
            lines.push(format!("\n**{category} tools:**"));
            for schema in schemas {
                lines.push(schema.to_llm_description());
            }
        }

        lines.push(String::new());
        lines.push(
            "Only the tool/action combinations listed above may be called.".to_owned(),
        );
        lines.push(format!("Catalog checksum: {}", self.whitelist_hash));

        lines.join("\n")
    }
}

/// FNV-1a 64-bit hash rendered as 8 hex characters.
///
/// Used for the whitelist hash and schema fingerprints: stable across runs,
/// no cryptographic requirement.
pub fn stable_hash(input: &str) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x100_0000_01b3;

    let mut hash = OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:016x}")[..8].to_owned()
}

// ---------------------------------------------------------------------------
// Schema source
// ---------------------------------------------------------------------------

/// Upstream provider of tool schemas (the tool host).
///
/// Implementations: the HTTP tool-host client in `conductor-net`, and
/// [`StaticSource`] for tests and embedded catalogs.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Current version fingerprint per tool id.
    async fn fetch_versions(&self) -> Result<HashMap<String, String>>;

    /// Fetch the full schema for one tool.  `None` means the tool is gone.
    async fn fetch_schema(&self, tool_id: &str) -> Result<Option<ToolSchema>>;
}

/// In-memory schema source.
///
/// Fingerprints are content hashes, so mutating a stored schema is observed
/// as a version change on the next refresh.
#[derive(Default)]
pub struct StaticSource {
    tools: Mutex<HashMap<String, ToolSchema>>,
}

impl StaticSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source pre-loaded with the given schemas.
    pub fn with_tools(tools: impl IntoIterator<Item = ToolSchema>) -> Self {
        let source = Self::new();
        for schema in tools {
            source.install(schema);
        }
        source
    }

    /// Install or replace a schema.
    pub fn install(&self, schema: ToolSchema) {
        self.tools
            .lock()
            .expect("static source lock poisoned")
            .insert(schema.tool_id.clone(), schema);
    }

    /// Remove a schema.
    pub fn remove(&self, tool_id: &str) {
        self.tools
            .lock()
            .expect("static source lock poisoned")
            .remove(tool_id);
    }
}

#[async_trait]
impl SchemaSource for StaticSource {
    async fn fetch_versions(&self) -> Result<HashMap<String, String>> {
        let tools = self.tools.lock().expect("static source lock poisoned");
        Ok(tools
            .iter()
            .map(|(id, schema)| {
                let body = serde_json::to_string(&(
                    &schema.actions,
                    &schema.version,
                    &schema.description,
                ))
                .unwrap_or_default();
                (id.clone(), stable_hash(&body))
            })
            .collect())
    }

    async fn fetch_schema(&self, tool_id: &str) -> Result<Option<ToolSchema>> {
        let tools = self.tools.lock().expect("static source lock poisoned");
        Ok(tools.get(tool_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Configuration for [`SchemaRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Minimum interval between unforced refreshes.
    pub refresh_interval: Duration,

    /// Search roots for `service.json` descriptors.
    pub manifest_roots: Vec<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            manifest_roots: vec![
                PathBuf::from("mcp_servers"),
                PathBuf::from("configs/tools"),
            ],
        }
    }
}

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The refresh interval has not elapsed; nothing was fetched.
    Throttled,
    /// Fingerprints matched the previous refresh; snapshot untouched.
    Unchanged,
    /// The snapshot advanced.
    Updated {
        changed: Vec<String>,
        removed: Vec<String>,
    },
}

/// State guarded by the refresh lock.
struct RefreshState {
    versions: HashMap<String, String>,
    last_refresh: Option<Instant>,
}

/// The live tool-schema registry.
pub struct SchemaRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    last_good: Mutex<Arc<RegistrySnapshot>>,
    refresh_state: tokio::sync::Mutex<RefreshState>,
    source: Arc<dyn SchemaSource>,
    config: RegistryConfig,
    degraded: AtomicBool,
}

impl SchemaRegistry {
    /// Create a registry over the given source.  The initial snapshot is
    /// empty; call [`SchemaRegistry::refresh`] (or
    /// [`SchemaRegistry::seed_builtin`]) to populate it.
    pub fn new(source: Arc<dyn SchemaSource>, config: RegistryConfig) -> Self {
        let empty = RegistrySnapshot::empty();
        Self {
            current: RwLock::new(Arc::clone(&empty)),
            last_good: Mutex::new(empty),
            refresh_state: tokio::sync::Mutex::new(RefreshState {
                versions: HashMap::new(),
                last_refresh: None,
            }),
            source,
            config,
            degraded: AtomicBool::new(false),
        }
    }

    /// The current immutable snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().expect("registry lock poisoned"))
    }

    /// Look up a tool schema in the current snapshot.
    pub fn lookup(&self, tool_id: &str) -> Option<Arc<ToolSchema>> {
        self.snapshot().lookup(tool_id)
    }

    /// The `(tool_id, action)` whitelist of the current snapshot.
    pub fn whitelist(&self) -> BTreeSet<(String, String)> {
        self.snapshot().whitelist().clone()
    }

    /// Stable hash of the current whitelist.
    pub fn action_whitelist_hash(&self) -> String {
        self.snapshot().whitelist_hash().to_owned()
    }

    /// Whether the last refresh attempt failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Age of the current snapshot in seconds.
    pub fn snapshot_age_secs(&self) -> i64 {
        (Utc::now() - self.snapshot().built_at()).num_seconds()
    }

    /// Seed the registry with the built-in catalog if it is empty.
    ///
    /// Keeps the system from being tool-blind when the tool host has never
    /// been reachable.
    pub fn seed_builtin(&self) {
        let mut current = self.current.write().expect("registry lock poisoned");
        if !current.is_empty() {
            return;
        }

        let tools: HashMap<String, Arc<ToolSchema>> = builtin_catalog()
            .into_iter()
            .map(|schema| (schema.tool_id.clone(), Arc::new(schema)))
            .collect();

        tracing::warn!(count = tools.len(), "seeding registry with built-in catalog");

        let snapshot = RegistrySnapshot::build(tools);
        *current = Arc::clone(&snapshot);
        *self.last_good.lock().expect("registry lock poisoned") = snapshot;
    }

    /// Refresh the catalog from the schema source.
    ///
    /// Serialized by a single lock: two refreshes never run concurrently.
    /// Unforced calls are throttled to the configured interval.  On failure
    /// the previous snapshot stays in force, the version map is untouched,
    /// and the registry is flagged degraded.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome> {
        let mut state = self.refresh_state.lock().await;

        if !force {
            if let Some(last) = state.last_refresh {
                if last.elapsed() < self.config.refresh_interval {
                    return Ok(RefreshOutcome::Throttled);
                }
            }
        }

        let versions = match self.source.fetch_versions().await {
            Ok(v) => v,
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                self.restore_last_good();
                tracing::warn!(error = %e, "schema refresh failed, keeping previous snapshot");
                return Err(e);
            }
        };

        let changed: Vec<String> = versions
            .iter()
            .filter(|(id, fingerprint)| state.versions.get(*id) != Some(*fingerprint))
            .map(|(id, _)| id.clone())
            .collect();
        let removed: Vec<String> = state
            .versions
            .keys()
            .filter(|id| !versions.contains_key(*id))
            .cloned()
            .collect();

        if changed.is_empty() && removed.is_empty() {
            state.last_refresh = Some(Instant::now());
            self.degraded.store(false, Ordering::Relaxed);
            return Ok(RefreshOutcome::Unchanged);
        }

        tracing::info!(
            changed = changed.len(),
            removed = removed.len(),
            "schema refresh: catalog drift detected"
        );

        let manifests = manifest::discover_manifests(&self.config.manifest_roots);

        let mut tools: HashMap<String, Arc<ToolSchema>> = self
            .snapshot()
            .tools
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        for tool_id in &changed {
            match self.fetch_and_validate(tool_id, &manifests).await {
                Ok(Some(schema)) => {
                    tools.insert(tool_id.clone(), Arc::new(schema));
                }
                Ok(None) => {
                    tools.remove(tool_id);
                }
                Err(e) => {
                    self.degraded.store(true, Ordering::Relaxed);
                    self.restore_last_good();
                    tracing::warn!(tool_id = %tool_id, error = %e, "schema refresh rolled back");
                    return Err(e);
                }
            }
        }
        for tool_id in &removed {
            tools.remove(tool_id);
        }

        let snapshot = RegistrySnapshot::build(tools);
        {
            let mut current = self.current.write().expect("registry lock poisoned");
            *current = Arc::clone(&snapshot);
        }
        *self.last_good.lock().expect("registry lock poisoned") = snapshot;

        state.versions = versions;
        state.last_refresh = Some(Instant::now());
        self.degraded.store(false, Ordering::Relaxed);

        Ok(RefreshOutcome::Updated { changed, removed })
    }

    async fn fetch_and_validate(
        &self,
        tool_id: &str,
        manifests: &[ServiceManifest],
    ) -> Result<Option<ToolSchema>> {
        let Some(mut schema) = self.source.fetch_schema(tool_id).await? else {
            return Ok(None);
        };

        let fixes = schema.auto_fix();
        if !fixes.is_empty() {
            tracing::warn!(tool_id = %tool_id, fixes = ?fixes, "schema auto-fixes injected");
        }

        for issue in schema.validate_structure() {
            match issue {
                SchemaIssue::MissingField { field: "tool_id" } => {
                    return Err(RegistryError::InvalidSchema {
                        tool_id: tool_id.to_owned(),
                        reason: "empty tool_id".to_owned(),
                    });
                }
                SchemaIssue::NoActions => {
                    // Legal but useless: dispatch filters zero-action tools.
                    tracing::warn!(tool_id = %tool_id, "schema declares no actions");
                }
                other => {
                    tracing::warn!(tool_id = %tool_id, issue = ?other, "schema issue survived auto-fix");
                }
            }
        }

        if let Some(manifest) = manifests
            .iter()
            .find(|m| manifest::matches_tool_id(&m.service_id, tool_id))
        {
            for issue in manifest::check_consistency(&schema, manifest) {
                tracing::warn!(tool_id = %tool_id, issue = ?issue, "schema/manifest inconsistency");
            }
        }

        Ok(Some(schema))
    }

    fn restore_last_good(&self) {
        let last_good = self.last_good.lock().expect("registry lock poisoned");
        let mut current = self.current.write().expect("registry lock poisoned");
        *current = Arc::clone(&last_good);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ActionSpec, ParamSpec, ParamType};

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            refresh_interval: Duration::from_secs(60),
            manifest_roots: Vec::new(),
        }
    }

    fn simple_tool(id: &str, action: &str) -> ToolSchema {
        ToolSchema::new(id, id, format!("{id} tool"), "general").with_action(
            ActionSpec::new(action, format!("{action} action")).with_param(ParamSpec::required(
                "query",
                ParamType::String,
                "query param",
            )),
        )
    }

    struct FailingSource;

    #[async_trait]
    impl SchemaSource for FailingSource {
        async fn fetch_versions(&self) -> Result<HashMap<String, String>> {
            Err(RegistryError::SourceUnavailable {
                reason: "connection refused".to_owned(),
            })
        }

        async fn fetch_schema(&self, _tool_id: &str) -> Result<Option<ToolSchema>> {
            Err(RegistryError::SourceUnavailable {
                reason: "connection refused".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn refresh_populates_snapshot() {
        let source = Arc::new(StaticSource::with_tools([simple_tool("alpha", "run")]));
        let registry = SchemaRegistry::new(source, test_config());

        let outcome = registry.refresh(true).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Updated { .. }));
        assert_eq!(registry.snapshot().tool_count(), 1);
        assert!(registry.lookup("alpha").is_some());
        assert!(!registry.is_degraded());
    }

    #[tokio::test]
    async fn refresh_with_no_upstream_changes_keeps_hash() {
        let source = Arc::new(StaticSource::with_tools([simple_tool("alpha", "run")]));
        let registry = SchemaRegistry::new(source, test_config());

        registry.refresh(true).await.unwrap();
        let hash_before = registry.action_whitelist_hash();

        let outcome = registry.refresh(true).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Unchanged);
        assert_eq!(registry.action_whitelist_hash(), hash_before);
    }

    #[tokio::test]
    async fn unforced_refresh_is_throttled() {
        let source = Arc::new(StaticSource::with_tools([simple_tool("alpha", "run")]));
        let registry = SchemaRegistry::new(source, test_config());

        registry.refresh(true).await.unwrap();
        let outcome = registry.refresh(false).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Throttled);
    }

    #[tokio::test]
    async fn install_event_changes_whitelist_hash() {
        let source = Arc::new(StaticSource::with_tools([simple_tool(
            "mcp-deepsearch",
            "research",
        )]));
        let registry = SchemaRegistry::new(Arc::clone(&source) as Arc<dyn SchemaSource>, test_config());

        registry.refresh(true).await.unwrap();
        let old_hash = registry.action_whitelist_hash();
        let old_snapshot = registry.snapshot();

        // An install event adds a new tool upstream; a forced refresh picks
        // it up and the hash changes.
        source.install(simple_tool("mcp-search-tool", "search_and_install_tools"));
        registry.refresh(true).await.unwrap();

        assert_ne!(registry.action_whitelist_hash(), old_hash);
        assert!(registry
            .whitelist()
            .contains(&("mcp-search-tool".to_owned(), "search_and_install_tools".to_owned())));

        // A reader holding the pre-refresh snapshot still sees the old
        // catalog, unchanged.
        assert_eq!(old_snapshot.whitelist_hash(), old_hash);
        assert!(old_snapshot.lookup("mcp-search-tool").is_none());
    }

    #[tokio::test]
    async fn uninstall_removes_tool() {
        let source = Arc::new(StaticSource::with_tools([
            simple_tool("alpha", "run"),
            simple_tool("beta", "run"),
        ]));
        let registry = SchemaRegistry::new(Arc::clone(&source) as Arc<dyn SchemaSource>, test_config());

        registry.refresh(true).await.unwrap();
        assert_eq!(registry.snapshot().tool_count(), 2);

        source.remove("beta");
        let outcome = registry.refresh(true).await.unwrap();
        match outcome {
            RefreshOutcome::Updated { removed, .. } => assert_eq!(removed, vec!["beta".to_owned()]),
            other => panic!("expected Updated, got {other:?}"),
        }
        assert!(registry.lookup("beta").is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot_and_degrades() {
        let registry = SchemaRegistry::new(Arc::new(FailingSource), test_config());
        registry.seed_builtin();
        let count_before = registry.snapshot().tool_count();
        let hash_before = registry.action_whitelist_hash();

        let result = registry.refresh(true).await;
        assert!(result.is_err());
        assert!(registry.is_degraded());
        // Callers continue to see the previous snapshot, unchanged.
        assert_eq!(registry.snapshot().tool_count(), count_before);
        assert_eq!(registry.action_whitelist_hash(), hash_before);
    }

    #[tokio::test]
    async fn seed_builtin_only_fills_empty_registry() {
        let source = Arc::new(StaticSource::with_tools([simple_tool("alpha", "run")]));
        let registry = SchemaRegistry::new(source, test_config());

        registry.seed_builtin();
        assert!(registry.snapshot().tool_count() >= 4);

        // Seeding again (or over a refreshed catalog) is a no-op.
        let count = registry.snapshot().tool_count();
        registry.seed_builtin();
        assert_eq!(registry.snapshot().tool_count(), count);
    }

    #[tokio::test]
    async fn concurrent_lookups_never_observe_partial_state() {
        let source = Arc::new(StaticSource::with_tools([simple_tool("alpha", "run")]));
        let registry = Arc::new(SchemaRegistry::new(
            Arc::clone(&source) as Arc<dyn SchemaSource>,
            test_config(),
        ));
        registry.refresh(true).await.unwrap();

        source.install(simple_tool("beta", "run"));

        let reader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..1000 {
                    let snapshot = registry.snapshot();
                    // Either the old catalog (1 tool) or the new one (2
                    // tools); a snapshot always agrees with its own hash.
                    let count = snapshot.tool_count();
                    assert!(count == 1 || count == 2);
                    assert_eq!(snapshot.whitelist().len(), count);
                }
            })
        };

        registry.refresh(true).await.unwrap();
        reader.await.unwrap();
    }

    #[test]
    fn stable_hash_is_deterministic() {
        assert_eq!(stable_hash("a|b|c"), stable_hash("a|b|c"));
        assert_ne!(stable_hash("a|b|c"), stable_hash("a|b"));
        assert_eq!(stable_hash("x").len(), 8);
    }

    #[test]
    fn llm_catalog_carries_checksum() {
        let tools: HashMap<String, Arc<ToolSchema>> = builtin_catalog()
            .into_iter()
            .map(|s| (s.tool_id.clone(), Arc::new(s)))
            .collect();
        let snapshot = RegistrySnapshot::build(tools);

        let catalog = snapshot.generate_llm_catalog();
        assert!(catalog.contains("Live tool catalog"));
        assert!(catalog.contains(snapshot.whitelist_hash()));
        assert!(catalog.contains("mcp-deepsearch"));
    }
}
