//! Adaptive dispatcher.
//!
//! Given a required capability tag, ranks the redundant `(tool, action)`
//! candidates that can serve it.  The score blends four learned terms:
//! historical success under similar context, current performance, task/tool
//! keyword match, and ledger reliability.  Term weights adapt after every
//! observed outcome and are renormalized, so the dispatcher slowly shifts
//! toward whichever signal has been predicting well.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};

use conductor_health::HealthLedger;
use conductor_registry::{SchemaRegistry, TaskSpec, stable_hash};

use crate::error::{DispatchError, Result};

// ---------------------------------------------------------------------------
// Weights and context
// ---------------------------------------------------------------------------

/// Weights of the four scoring terms.  Always sums to 1 after
/// normalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub historical: f64,
    pub performance: f64,
    pub context: f64,
    pub reliability: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            historical: 0.4,
            performance: 0.3,
            context: 0.2,
            reliability: 0.1,
        }
    }
}

impl ScoreWeights {
    fn normalize(&mut self) {
        let total = self.historical + self.performance + self.context + self.reliability;
        if total > 0.0 {
            self.historical /= total;
            self.performance /= total;
            self.context /= total;
            self.reliability /= total;
        }
    }
}

/// Weighted contribution of each term to a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreTerms {
    pub historical: f64,
    pub performance: f64,
    pub context: f64,
    pub reliability: f64,
}

impl ScoreTerms {
    /// The term that contributed most to the final score.
    pub fn dominant(&self) -> ScoreTerm {
        let mut best = (ScoreTerm::Historical, self.historical);
        for (term, value) in [
            (ScoreTerm::Performance, self.performance),
            (ScoreTerm::Context, self.context),
            (ScoreTerm::Reliability, self.reliability),
        ] {
            if value > best.1 {
                best = (term, value);
            }
        }
        best.0
    }
}

/// One of the four scoring terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreTerm {
    Historical,
    Performance,
    Context,
    Reliability,
}

/// A ranked candidate returned by [`AdaptiveDispatcher::select`].
#[derive(Debug, Clone)]
pub struct Candidate {
    pub tool_id: String,
    pub action: String,
    pub score: f64,
    pub terms: ScoreTerms,
    /// The context hash the score was computed under; outcome reports feed
    /// back into the same bucket.
    pub context_hash: String,
}

impl Candidate {
    fn key(&self) -> String {
        format!("{}.{}", self.tool_id, self.action)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Initial term weights.
    pub weights: ScoreWeights,

    /// Multiplier applied to the dominant term on a confident success.
    pub nudge_up: f64,

    /// Multiplier applied to the dominant term on a confident failure.
    pub nudge_down: f64,

    /// Confidence above which outcomes adjust the weights.
    pub confidence_threshold: f64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            nudge_up: 1.01,
            nudge_down: 0.99,
            confidence_threshold: 0.8,
        }
    }
}

// ---------------------------------------------------------------------------
// Learned state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct OutcomeStats {
    successes: u64,
    total: u64,
}

impl OutcomeStats {
    fn rate(&self) -> f64 {
        if self.total == 0 {
            0.5
        } else {
            self.successes as f64 / self.total as f64
        }
    }
}

/// Serializable dispatcher state for shutdown persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherState {
    pub weights: Option<ScoreWeights>,
    /// context hash -> candidate key -> outcome stats.
    #[serde(default)]
    history: HashMap<String, HashMap<String, OutcomeStats>>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Task-type keywords recognized in task descriptions, in a fixed order so
/// context hashes are stable.
const TASK_KEYWORD_TABLE: &[(&str, &[&str])] = &[
    ("search", &["search", "find", "look up", "locate"]),
    ("research", &["research", "investigate", "study", "survey"]),
    ("execute", &["execute", "run", "compute", "calculate"]),
    ("install", &["install", "set up", "deploy", "provision"]),
    ("analyze", &["analyze", "analysis", "compare", "evaluate"]),
];

/// The adaptive dispatcher.
pub struct AdaptiveDispatcher {
    registry: Arc<SchemaRegistry>,
    ledger: Arc<HealthLedger>,
    config: DispatcherConfig,
    state: Mutex<DispatcherState>,
    /// Capability tag -> candidate `(tool, action)` pairs.
    capabilities: Mutex<HashMap<String, Vec<(String, String)>>>,
    /// Tool id -> task-type keywords it matches.
    context_table: HashMap<String, Vec<&'static str>>,
    keyword_automaton: AhoCorasick,
    keyword_labels: Vec<&'static str>,
}

impl AdaptiveDispatcher {
    /// Create a dispatcher with the built-in capability and context tables.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        ledger: Arc<HealthLedger>,
        config: DispatcherConfig,
    ) -> Self {
        let mut patterns = Vec::new();
        let mut labels = Vec::new();
        for (label, keywords) in TASK_KEYWORD_TABLE {
            for keyword in *keywords {
                patterns.push(*keyword);
                labels.push(*label);
            }
        }
        let automaton = AhoCorasick::new(&patterns).expect("static keyword patterns");

        let mut state = DispatcherState::default();
        state.weights = Some(config.weights);

        Self {
            registry,
            ledger,
            config,
            state: Mutex::new(state),
            capabilities: Mutex::new(builtin_capability_map()),
            context_table: builtin_context_table(),
            keyword_automaton: automaton,
            keyword_labels: labels,
        }
    }

    /// Register (or replace) the candidate pairs for a capability.
    pub fn register_capability(
        &self,
        capability: impl Into<String>,
        candidates: Vec<(String, String)>,
    ) {
        self.capabilities
            .lock()
            .expect("dispatcher lock poisoned")
            .insert(capability.into(), candidates);
    }

    /// Capability tags the dispatcher can serve.
    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities
            .lock()
            .expect("dispatcher lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Rank the candidates for a capability under the given task context.
    ///
    /// Offline tools and tools whose schema is gone (or action-less) are
    /// filtered before scoring.  The ranked list is deterministic: score
    /// descending, then reliability, then average duration, then tool id.
    pub fn select(
        &self,
        capability: &str,
        task: &TaskSpec,
        load_bucket: u8,
    ) -> Result<Vec<Candidate>> {
        let pairs = {
            let capabilities = self.capabilities.lock().expect("dispatcher lock poisoned");
            capabilities
                .get(capability)
                .cloned()
                .ok_or_else(|| DispatchError::UnknownCapability {
                    capability: capability.to_owned(),
                })?
        };

        let snapshot = self.registry.snapshot();
        let context_hash = self.context_hash(task, load_bucket);
        let keywords = self.detect_keywords(&task.description);

        let weights = self
            .state
            .lock()
            .expect("dispatcher lock poisoned")
            .weights
            .unwrap_or_default();

        let mut candidates: Vec<Candidate> = pairs
            .into_iter()
            .filter(|(tool_id, action)| {
                if !self.ledger.is_available(tool_id) {
                    return false;
                }
                // A tool with zero actions is never selected, regardless of
                // connectivity.
                match snapshot.lookup(tool_id) {
                    Some(schema) => schema.action(action).is_some(),
                    None => false,
                }
            })
            .map(|(tool_id, action)| {
                self.score_candidate(tool_id, action, &context_hash, &keywords, weights)
            })
            .collect();

        if candidates.is_empty() {
            return Err(DispatchError::NoCandidates {
                capability: capability.to_owned(),
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ra = self.ledger.reliability(&a.tool_id);
                    let rb = self.ledger.reliability(&b.tool_id);
                    rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    let da = self.avg_duration(&a.tool_id);
                    let db = self.avg_duration(&b.tool_id);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.tool_id.cmp(&b.tool_id))
        });

        tracing::debug!(
            capability = %capability,
            top = %candidates[0].key(),
            score = candidates[0].score,
            "candidates ranked"
        );

        Ok(candidates)
    }

    /// Feed an observed outcome back into the history and, when confident,
    /// nudge the dominant term's weight.
    pub fn report_outcome(&self, candidate: &Candidate, success: bool, confidence: f64) {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");

        let stats = state
            .history
            .entry(candidate.context_hash.clone())
            .or_default()
            .entry(candidate.key())
            .or_default();
        stats.total += 1;
        if success {
            stats.successes += 1;
        }

        if confidence > self.config.confidence_threshold {
            let factor = if success {
                self.config.nudge_up
            } else {
                self.config.nudge_down
            };
            let mut weights = state.weights.unwrap_or_default();
            match candidate.terms.dominant() {
                ScoreTerm::Historical => weights.historical *= factor,
                ScoreTerm::Performance => weights.performance *= factor,
                ScoreTerm::Context => weights.context *= factor,
                ScoreTerm::Reliability => weights.reliability *= factor,
            }
            weights.normalize();
            state.weights = Some(weights);
        }
    }

    /// Export learned state for shutdown persistence.
    pub fn export_state(&self) -> DispatcherState {
        self.state.lock().expect("dispatcher lock poisoned").clone()
    }

    /// Restore state saved by a previous run.
    pub fn restore(&self, saved: DispatcherState) {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        if saved.weights.is_some() {
            state.weights = saved.weights;
        }
        state.history = saved.history;
    }

    // -- Scoring ------------------------------------------------------------

    fn score_candidate(
        &self,
        tool_id: String,
        action: String,
        context_hash: &str,
        keywords: &[&'static str],
        weights: ScoreWeights,
    ) -> Candidate {
        let key = format!("{tool_id}.{action}");

        let historical = {
            let state = self.state.lock().expect("dispatcher lock poisoned");
            match state.history.get(context_hash) {
                // Seen this context but never this candidate: below neutral.
                Some(bucket) => bucket.get(&key).map_or(0.3, OutcomeStats::rate),
                None => 0.5,
            }
        };

        let performance = self.performance_score(&tool_id);
        let context = self.context_score(&tool_id, keywords);
        let reliability = self.ledger.reliability(&tool_id);

        let terms = ScoreTerms {
            historical: historical * weights.historical,
            performance: performance * weights.performance,
            context: context * weights.context,
            reliability: reliability * weights.reliability,
        };
        let score =
            (terms.historical + terms.performance + terms.context + terms.reliability).min(1.0);

        Candidate {
            tool_id,
            action,
            score,
            terms,
            context_hash: context_hash.to_owned(),
        }
    }

    /// Performance from the ledger: success rate, speed, and error history.
    fn performance_score(&self, tool_id: &str) -> f64 {
        let Some(record) = self.ledger.record(tool_id) else {
            return 0.5;
        };

        let success_rate = record.success_rate();
        let speed = 1.0 - (record.avg_duration_ms() / 120_000.0).min(1.0);
        let total = record.successes + record.failures;
        let error_share = if total == 0 {
            0.0
        } else {
            record.failures as f64 / total as f64
        };

        success_rate * 0.5 + speed * 0.3 + (1.0 - error_share) * 0.2
    }

    /// Overlap between the task's detected keywords and the tool's keyword
    /// classes.
    fn context_score(&self, tool_id: &str, keywords: &[&'static str]) -> f64 {
        let Some(tool_keywords) = self.context_table.get(tool_id) else {
            return 0.4;
        };
        if keywords.is_empty() {
            return 0.5;
        }
        let matched = keywords
            .iter()
            .filter(|k| tool_keywords.contains(k))
            .count();
        matched as f64 / keywords.len() as f64
    }

    /// Detect task-type keywords, deduplicated in table order.
    fn detect_keywords(&self, description: &str) -> Vec<&'static str> {
        let lowered = description.to_lowercase();
        let mut found: Vec<&'static str> = Vec::new();
        for mat in self.keyword_automaton.find_overlapping_iter(&lowered) {
            let label = self.keyword_labels[mat.pattern().as_usize()];
            if !found.contains(&label) {
                found.push(label);
            }
        }
        // Fixed table order keeps the context hash stable regardless of
        // keyword position in the description.
        found.sort_by_key(|label| {
            TASK_KEYWORD_TABLE
                .iter()
                .position(|(l, _)| l == label)
                .unwrap_or(usize::MAX)
        });
        found
    }

    /// Stable hash over (task type, detected keywords, complexity bucket,
    /// load bucket).
    pub fn context_hash(&self, task: &TaskSpec, load_bucket: u8) -> String {
        let keywords = self.detect_keywords(&task.description);
        let complexity = estimate_complexity(&task.description);
        stable_hash(&format!(
            "{}|{}|{:.1}|{}",
            task.task_type.label(),
            keywords.join(","),
            complexity,
            load_bucket
        ))
    }

    fn avg_duration(&self, tool_id: &str) -> f64 {
        self.ledger.record(tool_id).map_or(0.0, |r| r.avg_duration_ms())
    }
}

/// Estimate task complexity in `[0, 1]` from indicator keywords, floored by
/// a length factor.
pub fn estimate_complexity(description: &str) -> f64 {
    const TIERS: &[(f64, &[&str])] = &[
        (0.2, &["show", "list", "get", "display"]),
        (0.5, &["analyze", "compare", "search", "process"]),
        (0.8, &["research", "deep", "comprehensive", "optimize"]),
        (1.0, &["architecture", "design", "refactor", "end-to-end"]),
    ];

    let lowered = description.to_lowercase();
    let mut complexity: f64 = 0.0;
    for (value, keywords) in TIERS {
        if keywords.iter().any(|k| lowered.contains(k)) {
            complexity = complexity.max(*value);
        }
    }

    let length_factor = (description.len() as f64 / 200.0).min(1.0);
    complexity.max(length_factor * 0.3)
}

// ---------------------------------------------------------------------------
// Built-in tables
// ---------------------------------------------------------------------------

fn builtin_capability_map() -> HashMap<String, Vec<(String, String)>> {
    let pair = |t: &str, a: &str| (t.to_owned(), a.to_owned());
    HashMap::from([
        (
            "web_search".to_owned(),
            vec![
                pair("mcp-deepsearch", "quick_research"),
                pair("browser_use", "browser_search_google"),
            ],
        ),
        (
            "deep_research".to_owned(),
            vec![
                pair("mcp-deepsearch", "research"),
                pair("browser_use", "browser_use_execute_task"),
            ],
        ),
        (
            "code_execution".to_owned(),
            vec![pair("microsandbox", "microsandbox_execute")],
        ),
        (
            "tool_installation".to_owned(),
            vec![pair("mcp-search-tool", "search_and_install_tools")],
        ),
    ])
}

fn builtin_context_table() -> HashMap<String, Vec<&'static str>> {
    HashMap::from([
        ("mcp-deepsearch".to_owned(), vec!["research", "search"]),
        ("microsandbox".to_owned(), vec!["execute"]),
        ("browser_use".to_owned(), vec!["search", "execute"]),
        ("mcp-search-tool".to_owned(), vec!["install"]),
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_health::{ErrorCategory, ErrorEvent, ErrorSeverity, LedgerConfig};
    use conductor_registry::{RegistryConfig, StaticSource, TaskType, builtin_catalog};
    use std::time::Duration;

    async fn dispatcher() -> (AdaptiveDispatcher, Arc<HealthLedger>) {
        let source = Arc::new(StaticSource::with_tools(builtin_catalog()));
        let registry = Arc::new(SchemaRegistry::new(source, RegistryConfig {
            refresh_interval: Duration::from_secs(60),
            manifest_roots: Vec::new(),
        }));
        registry.refresh(true).await.unwrap();

        let ledger = Arc::new(HealthLedger::new(LedgerConfig::default()));
        let dispatcher =
            AdaptiveDispatcher::new(registry, Arc::clone(&ledger), DispatcherConfig::default());
        (dispatcher, ledger)
    }

    fn failure(tool_id: &str) -> ErrorEvent {
        ErrorEvent::new(
            "executor",
            "ToolError",
            "failed",
            ErrorSeverity::Medium,
            ErrorCategory::Tool,
        )
        .with_call(tool_id, "run", None)
    }

    #[tokio::test]
    async fn select_ranks_specialist_first_for_research() {
        let (dispatcher, _ledger) = dispatcher().await;
        let task = TaskSpec::new(TaskType::Research, "research the history of rust");

        let candidates = dispatcher.select("deep_research", &task, 0).unwrap();
        assert_eq!(candidates[0].tool_id, "mcp-deepsearch");
        assert_eq!(candidates[0].action, "research");
    }

    #[tokio::test]
    async fn unavailable_tools_are_never_returned() {
        let (dispatcher, ledger) = dispatcher().await;
        let task = TaskSpec::new(TaskType::Research, "research rust");

        for _ in 0..3 {
            ledger.record_failure("mcp-deepsearch", &failure("mcp-deepsearch"));
        }
        assert!(!ledger.is_available("mcp-deepsearch"));

        let candidates = dispatcher.select("deep_research", &task, 0).unwrap();
        assert!(candidates.iter().all(|c| c.tool_id != "mcp-deepsearch"));
    }

    #[tokio::test]
    async fn no_candidates_when_all_tools_down() {
        let (dispatcher, ledger) = dispatcher().await;
        let task = TaskSpec::new(TaskType::Execute, "run code");

        for _ in 0..3 {
            ledger.record_failure("microsandbox", &failure("microsandbox"));
        }

        let result = dispatcher.select("code_execution", &task, 0);
        assert!(matches!(result, Err(DispatchError::NoCandidates { .. })));
    }

    #[tokio::test]
    async fn zero_action_tool_is_never_selected() {
        use conductor_registry::ToolSchema;

        let mut tools = builtin_catalog();
        tools.push(ToolSchema::new(
            "hollow-tool",
            "Hollow tool",
            "Announces actions it does not have",
            "research",
        ));
        let source = Arc::new(StaticSource::with_tools(tools));
        let registry = Arc::new(SchemaRegistry::new(source, RegistryConfig {
            refresh_interval: Duration::from_secs(60),
            manifest_roots: Vec::new(),
        }));
        registry.refresh(true).await.unwrap();

        let ledger = Arc::new(HealthLedger::new(LedgerConfig::default()));
        let dispatcher = AdaptiveDispatcher::new(registry, ledger, DispatcherConfig::default());
        dispatcher.register_capability(
            "deep_research",
            vec![
                ("hollow-tool".to_owned(), "research".to_owned()),
                ("mcp-deepsearch".to_owned(), "research".to_owned()),
            ],
        );

        let task = TaskSpec::new(TaskType::Research, "research rust");
        let candidates = dispatcher.select("deep_research", &task, 0).unwrap();

        // Reachable but action-less: filtered before scoring.
        assert!(candidates.iter().all(|c| c.tool_id != "hollow-tool"));
    }

    #[tokio::test]
    async fn unknown_capability_is_an_error() {
        let (dispatcher, _) = dispatcher().await;
        let task = TaskSpec::new(TaskType::from("whatever"), "whatever");
        assert!(matches!(
            dispatcher.select("underwater_basket_weaving", &task, 0),
            Err(DispatchError::UnknownCapability { .. })
        ));
    }

    #[tokio::test]
    async fn outcome_history_shifts_ranking() {
        let (dispatcher, _ledger) = dispatcher().await;
        let task = TaskSpec::new(TaskType::Search, "search for rust jobs");

        let before = dispatcher.select("web_search", &task, 0).unwrap();

        // Repeatedly fail the current leader in this exact context.
        for _ in 0..10 {
            let ranked = dispatcher.select("web_search", &task, 0).unwrap();
            let leader = ranked
                .iter()
                .find(|c| c.tool_id == before[0].tool_id)
                .cloned()
                .unwrap_or_else(|| ranked[0].clone());
            dispatcher.report_outcome(&leader, false, 0.5);
        }

        let after = dispatcher.select("web_search", &task, 0).unwrap();
        let demoted = after.iter().find(|c| c.tool_id == before[0].tool_id).unwrap();
        assert!(demoted.score < before[0].score);
    }

    #[tokio::test]
    async fn confident_outcomes_nudge_weights() {
        let (dispatcher, _) = dispatcher().await;
        let task = TaskSpec::new(TaskType::Research, "research something");

        let before = dispatcher.export_state().weights.unwrap();
        let candidates = dispatcher.select("deep_research", &task, 0).unwrap();
        dispatcher.report_outcome(&candidates[0], true, 0.95);
        let after = dispatcher.export_state().weights.unwrap();

        // Weights remain normalized.
        let sum = after.historical + after.performance + after.context + after.reliability;
        assert!((sum - 1.0).abs() < 1e-9);
        // Something moved.
        assert!(
            (before.historical - after.historical).abs() > 0.0
                || (before.performance - after.performance).abs() > 0.0
                || (before.context - after.context).abs() > 0.0
                || (before.reliability - after.reliability).abs() > 0.0
        );
    }

    #[tokio::test]
    async fn low_confidence_outcomes_leave_weights_alone() {
        let (dispatcher, _) = dispatcher().await;
        let task = TaskSpec::new(TaskType::Research, "research something");

        let before = dispatcher.export_state().weights.unwrap();
        let candidates = dispatcher.select("deep_research", &task, 0).unwrap();
        dispatcher.report_outcome(&candidates[0], false, 0.5);
        let after = dispatcher.export_state().weights.unwrap();

        assert!((before.historical - after.historical).abs() < 1e-12);
    }

    #[tokio::test]
    async fn context_hash_is_stable_and_sensitive() {
        let (dispatcher, _) = dispatcher().await;
        let a = TaskSpec::new(TaskType::Search, "search for rust jobs");
        let b = TaskSpec::new(TaskType::Search, "search for rust jobs");
        let c = TaskSpec::new(TaskType::Execute, "run the benchmark suite");

        assert_eq!(dispatcher.context_hash(&a, 0), dispatcher.context_hash(&b, 0));
        assert_ne!(dispatcher.context_hash(&a, 0), dispatcher.context_hash(&c, 0));
        assert_ne!(dispatcher.context_hash(&a, 0), dispatcher.context_hash(&a, 3));
    }

    #[tokio::test]
    async fn ranking_is_deterministic() {
        let (dispatcher, _) = dispatcher().await;
        let task = TaskSpec::new(TaskType::Search, "find the latest rustc release notes");

        let first = dispatcher.select("web_search", &task, 0).unwrap();
        let second = dispatcher.select("web_search", &task, 0).unwrap();
        let keys = |v: &[Candidate]| v.iter().map(Candidate::key).collect::<Vec<_>>();
        assert_eq!(keys(&first), keys(&second));
    }

    #[tokio::test]
    async fn state_roundtrip_preserves_history() {
        let (dispatcher_instance, _) = dispatcher().await;
        let task = TaskSpec::new(TaskType::Research, "research rust");

        let candidates = dispatcher_instance.select("deep_research", &task, 0).unwrap();
        dispatcher_instance.report_outcome(&candidates[0], true, 0.9);

        let json = serde_json::to_string(&dispatcher_instance.export_state()).unwrap();
        let restored: DispatcherState = serde_json::from_str(&json).unwrap();

        let (fresh, _) = dispatcher().await;
        fresh.restore(restored);
        // The restored history influences scoring for the same context.
        let ranked = fresh.select("deep_research", &task, 0).unwrap();
        assert!(ranked[0].terms.historical > 0.0);
    }

    #[test]
    fn complexity_estimation() {
        assert!(estimate_complexity("list my files") <= 0.3);
        assert!(estimate_complexity("comprehensive research on llm agents") >= 0.8);
        assert!(estimate_complexity("") == 0.0);
    }
}
