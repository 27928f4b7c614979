//! Validation critic.
//!
//! Triggered when recovery fails outright or the same failure signature
//! keeps recurring, the critic analyzes the recent error stream and proposes
//! executable [`CorrectionPatch`]es: substitute the tool, rename the action,
//! repair the parameter map (optionally via the LLM), switch to a
//! preconfigured alternative, or request a tool installation.  Every
//! non-advisory patch is validated by applying it to the failing call and
//! running the result through the structured-call validator; patches that
//! fail validation are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use conductor_health::{ErrorEvent, FailureSignature, HealthLedger};
use conductor_registry::validator::nearest_match;
use conductor_registry::{SchemaRegistry, TaskSpec, ToolCall, Validator, extract_json};

use crate::llm::{LlmClient, LlmMessage};

// ---------------------------------------------------------------------------
// Patch model
// ---------------------------------------------------------------------------

/// What a patch changes on the failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    /// Replace the action name.
    ReplaceAction,
    /// Replace the parameter map.
    FixParameters,
    /// Replace the tool (and possibly the action with it).
    SubstituteTool,
    /// Advisory: restart reasoning with a simplified task statement.
    ContextReframe,
    /// Route the call to the tool installer to close a capability gap.
    InstallTools,
}

impl PatchKind {
    /// Stable label used in trajectories and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::ReplaceAction => "replace_action",
            Self::FixParameters => "fix_parameters",
            Self::SubstituteTool => "substitute_tool",
            Self::ContextReframe => "context_reframe",
            Self::InstallTools => "install_tools",
        }
    }
}

/// The generation strategy that produced a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticStrategy {
    ToolMismatch,
    ActionCorrection,
    ParameterCorrection,
    AlternativeApproach,
    ContextReframe,
    SkillGap,
}

impl CriticStrategy {
    pub fn label(self) -> &'static str {
        match self {
            Self::ToolMismatch => "tool_mismatch",
            Self::ActionCorrection => "action_correction",
            Self::ParameterCorrection => "parameter_correction",
            Self::AlternativeApproach => "alternative_approach",
            Self::ContextReframe => "context_reframe",
            Self::SkillGap => "skill_gap",
        }
    }
}

/// A structured, executable correction proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionPatch {
    pub patch_id: Uuid,
    pub kind: PatchKind,
    pub strategy: CriticStrategy,

    /// The field path the patch rewrites ("tool_id", "action",
    /// "parameters").
    pub target_field: String,

    /// The value being replaced.
    pub original_value: Value,

    /// The replacement.  For [`PatchKind::SubstituteTool`] and
    /// [`PatchKind::InstallTools`] this is an object that may carry
    /// `tool_id`, `action`, and `parameters` together.
    pub corrected_value: Value,

    /// How to verify the patch worked.
    pub validation_steps: Vec<String>,

    /// How to undo it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<String>,

    /// Confidence in `[0, 1]`.
    pub confidence: f64,

    /// Whether the caller may apply this patch without confirmation.
    pub auto_apply: bool,

    /// Advisory patches carry guidance, not an executable rewrite.
    pub advisory: bool,
}

impl CorrectionPatch {
    /// Apply this patch to a call, producing the corrected call.
    ///
    /// An identity patch (corrected value equal to the original) leaves the
    /// call unchanged; advisory patches always do.
    pub fn apply(&self, call: &ToolCall) -> ToolCall {
        let mut patched = call.clone();
        if self.advisory {
            return patched;
        }

        match self.kind {
            PatchKind::ReplaceAction => {
                if let Some(action) = self.corrected_value.as_str() {
                    patched.action = action.to_owned();
                }
            }
            PatchKind::FixParameters => {
                if let Some(map) = self.corrected_value.as_object() {
                    patched.parameters = map.clone();
                }
            }
            PatchKind::SubstituteTool | PatchKind::InstallTools => {
                if let Some(tool_id) = self.corrected_value.get("tool_id").and_then(Value::as_str) {
                    patched.tool_id = tool_id.to_owned();
                }
                if let Some(action) = self.corrected_value.get("action").and_then(Value::as_str) {
                    patched.action = action.to_owned();
                }
                if let Some(params) = self
                    .corrected_value
                    .get("parameters")
                    .and_then(Value::as_object)
                {
                    patched.parameters = params.clone();
                }
            }
            PatchKind::ContextReframe => {}
        }

        patched
    }
}

/// The critic's output for one analysis run.
#[derive(Debug, Clone)]
pub struct CriticAnalysis {
    pub analysis_id: Uuid,
    pub root_cause: String,
    /// Surviving patches, ranked by confidence times learned strategy rate.
    pub patches: Vec<CorrectionPatch>,
    /// Mean confidence of the surviving patches.
    pub overall_confidence: f64,
    pub analyzed_events: usize,
}

// ---------------------------------------------------------------------------
// Failure patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FailurePattern {
    frequency: usize,
    last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Critic
// ---------------------------------------------------------------------------

/// Tunables for the critic.
#[derive(Debug, Clone)]
pub struct CriticConfig {
    /// Same-signature occurrences that trigger an analysis.
    pub trigger_threshold: usize,

    /// How many recent events one analysis consumes.
    pub history_window: usize,

    /// Deadline for the LLM parameter-repair call.
    pub llm_deadline: Duration,

    /// Confidence at or above which patches may auto-apply.
    pub auto_apply_threshold: f64,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 3,
            history_window: 5,
            llm_deadline: Duration::from_secs(10),
            auto_apply_threshold: 0.75,
        }
    }
}

/// The validation critic.
pub struct ValidationCritic {
    validator: Arc<Validator>,
    registry: Arc<SchemaRegistry>,
    llm: Option<Arc<dyn LlmClient>>,
    config: CriticConfig,
    patterns: Mutex<HashMap<String, FailurePattern>>,
    /// Learned per-strategy success rates, fed by outcome reports.
    strategy_rates: Mutex<HashMap<CriticStrategy, f64>>,
    /// Preconfigured alternative `(tool, action)` per failing tool.
    alternatives: HashMap<String, (String, String)>,
}

impl ValidationCritic {
    /// Create a critic over the given validator and registry.
    pub fn new(
        validator: Arc<Validator>,
        registry: Arc<SchemaRegistry>,
        llm: Option<Arc<dyn LlmClient>>,
        config: CriticConfig,
    ) -> Self {
        let pair = |t: &str, a: &str| (t.to_owned(), a.to_owned());
        let alternatives = HashMap::from([
            ("mcp-deepsearch".to_owned(), pair("browser_use", "browser_search_google")),
            ("browser_use".to_owned(), pair("mcp-deepsearch", "quick_research")),
            ("microsandbox".to_owned(), pair("mcp-search-tool", "analyze_tool_needs")),
        ]);

        Self {
            validator,
            registry,
            llm,
            config,
            patterns: Mutex::new(HashMap::new()),
            strategy_rates: Mutex::new(HashMap::new()),
            alternatives,
        }
    }

    /// Whether the latest event warrants a critic analysis: recovery already
    /// failed, or its signature keeps recurring.
    pub fn should_trigger(
        &self,
        ledger: &HealthLedger,
        event: &ErrorEvent,
        recovery_failed: bool,
    ) -> bool {
        recovery_failed
            || ledger.signature_count(&event.signature()) >= self.config.trigger_threshold
    }

    /// Analyze the recent error stream and propose patches.
    pub async fn analyze(&self, events: &[ErrorEvent], task: &TaskSpec) -> CriticAnalysis {
        let analysis_id = Uuid::now_v7();
        let recent: Vec<&ErrorEvent> = events
            .iter()
            .rev()
            .take(self.config.history_window)
            .collect();

        for event in &recent {
            self.record_pattern(event);
        }

        let Some(latest) = recent.first() else {
            return CriticAnalysis {
                analysis_id,
                root_cause: "no error history to analyze".to_owned(),
                patches: Vec::new(),
                overall_confidence: 0.0,
                analyzed_events: 0,
            };
        };

        let failing_call = call_from_event(latest, task);
        let snapshot = self.registry.snapshot();

        let mut candidates: Vec<CorrectionPatch> = Vec::new();
        if let Some(patch) = self.tool_mismatch(latest, &failing_call, &snapshot) {
            candidates.push(patch);
        }
        if let Some(patch) = self.action_correction(&failing_call, &snapshot) {
            candidates.push(patch);
        }
        if let Some(patch) = self.parameter_correction(latest, &failing_call, task).await {
            candidates.push(patch);
        }
        if let Some(patch) = self.alternative_approach(&failing_call, &snapshot) {
            candidates.push(patch);
        }
        if let Some(patch) = self.skill_gap(latest, task) {
            candidates.push(patch);
        }

        // Drop duplicate rewrites (e.g. mismatch and alternative agreeing).
        candidates.dedup_by(|a, b| {
            a.kind == b.kind && a.corrected_value == b.corrected_value
        });

        // Validate: applying a patch must yield a call the validator accepts.
        let mut patches = Vec::new();
        for patch in candidates {
            let applied = patch.apply(&failing_call);
            let report = self.validator.validate(&applied, task).await;
            if report.is_valid {
                patches.push(patch);
            } else {
                tracing::debug!(
                    strategy = patch.strategy.label(),
                    "candidate patch dropped: does not validate"
                );
            }
        }

        // Advisory reframe only when nothing structural fits and the
        // signature genuinely repeats.
        if patches.is_empty() {
            if let Some(patch) = self.context_reframe(&recent, &failing_call) {
                patches.push(patch);
            }
        }

        // Rank by confidence weighted with the learned strategy rate.
        {
            let rates = self.strategy_rates.lock().expect("critic lock poisoned");
            patches.sort_by(|a, b| {
                let wa = a.confidence * rates.get(&a.strategy).copied().unwrap_or(0.5);
                let wb = b.confidence * rates.get(&b.strategy).copied().unwrap_or(0.5);
                wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let overall_confidence = if patches.is_empty() {
            0.0
        } else {
            patches.iter().map(|p| p.confidence).sum::<f64>() / patches.len() as f64
        };

        let analysis = CriticAnalysis {
            analysis_id,
            root_cause: self.root_cause(&recent),
            patches,
            overall_confidence,
            analyzed_events: recent.len(),
        };

        tracing::info!(
            analysis_id = %analysis.analysis_id,
            patches = analysis.patches.len(),
            confidence = analysis.overall_confidence,
            "critic analysis complete"
        );

        analysis
    }

    /// Report the observed outcome of an applied patch; feeds future patch
    /// ranking.
    pub fn report_outcome(&self, patch: &CorrectionPatch, success: bool) {
        let mut rates = self.strategy_rates.lock().expect("critic lock poisoned");
        let rate = rates.entry(patch.strategy).or_insert(0.5);
        if success {
            *rate = (*rate + 0.1).min(1.0);
        } else {
            *rate = (*rate - 0.05).max(0.0);
        }

        tracing::debug!(
            strategy = patch.strategy.label(),
            success,
            rate = *rate,
            "patch outcome recorded"
        );
    }

    /// Learned success rate for a strategy (0.5 when nothing observed yet).
    pub fn strategy_rate(&self, strategy: CriticStrategy) -> f64 {
        self.strategy_rates
            .lock()
            .expect("critic lock poisoned")
            .get(&strategy)
            .copied()
            .unwrap_or(0.5)
    }

    // -- Generation strategies ---------------------------------------------

    /// The tool is unknown, or the action actually lives on another tool.
    fn tool_mismatch(
        &self,
        event: &ErrorEvent,
        call: &ToolCall,
        snapshot: &conductor_registry::RegistrySnapshot,
    ) -> Option<CorrectionPatch> {
        if call.tool_id.is_empty() {
            return None;
        }

        if snapshot.lookup(&call.tool_id).is_none() {
            let live = snapshot.tool_ids();
            let nearest = nearest_match(&call.tool_id, &live)?;
            return Some(self.patch(
                PatchKind::SubstituteTool,
                CriticStrategy::ToolMismatch,
                "tool_id",
                json!(call.tool_id),
                json!({"tool_id": nearest}),
                0.8,
                vec![
                    "resolve the substituted tool in the registry snapshot".to_owned(),
                    "re-validate the corrected call".to_owned(),
                ],
                Some(format!("restore tool_id `{}`", call.tool_id)),
            ));
        }

        // The tool exists but rejects this action; does any other live tool
        // support it?
        if event.error_type.contains("unsupported_action")
            || event.message.contains("does not support")
        {
            let owner = snapshot
                .whitelist()
                .iter()
                .find(|(tool, action)| *action == call.action && *tool != call.tool_id)?;
            return Some(self.patch(
                PatchKind::SubstituteTool,
                CriticStrategy::ToolMismatch,
                "tool_id",
                json!(call.tool_id),
                json!({"tool_id": owner.0, "action": call.action}),
                0.8,
                vec![
                    format!("confirm `{}` supports `{}`", owner.0, call.action),
                    "re-validate the corrected call".to_owned(),
                ],
                Some(format!("restore tool_id `{}`", call.tool_id)),
            ));
        }

        None
    }

    /// The action is unsupported for the tool: nearest supported action, or
    /// a keyword-selected default.
    fn action_correction(
        &self,
        call: &ToolCall,
        snapshot: &conductor_registry::RegistrySnapshot,
    ) -> Option<CorrectionPatch> {
        let schema = snapshot.lookup(&call.tool_id)?;
        if schema.action(&call.action).is_some() {
            return None;
        }

        let available: Vec<String> = schema
            .action_names()
            .iter()
            .map(|s| (*s).to_owned())
            .collect();

        let replacement = nearest_match(&call.action, &available).or_else(|| {
            // Keyword default: a search-shaped tool with a search-shaped
            // action maps to its research entry point.
            let searchy_tool =
                schema.category.contains("search") || schema.category.contains("research");
            (searchy_tool
                && call.action.to_lowercase().contains("search")
                && available.iter().any(|a| a == "research"))
            .then(|| "research".to_owned())
        })?;

        Some(self.patch(
            PatchKind::ReplaceAction,
            CriticStrategy::ActionCorrection,
            "action",
            json!(call.action),
            json!(replacement),
            0.75,
            vec!["re-validate the corrected call".to_owned()],
            Some(format!("restore action `{}`", call.action)),
        ))
    }

    /// Ask the LLM for a repaired parameter map, bounded by a strict JSON
    /// contract and the configured deadline.  Degrades to `None` (rule-based
    /// corrections only) when the LLM is unavailable.
    async fn parameter_correction(
        &self,
        event: &ErrorEvent,
        call: &ToolCall,
        _task: &TaskSpec,
    ) -> Option<CorrectionPatch> {
        if call.parameters.is_empty() {
            return None;
        }
        let llm = self.llm.as_ref()?;

        let prompt = format!(
            "A tool call failed validation.\n\
             error: {}\n\
             tool_id: {}\n\
             action: {}\n\
             current parameters: {}\n\
             Respond with ONLY a JSON object holding the corrected parameter \
             map, no prose.",
            event.message,
            call.tool_id,
            call.action,
            serde_json::to_string(&call.parameters).unwrap_or_default(),
        );
        let messages = [
            LlmMessage::system("You repair tool-call parameter maps. Output strict JSON."),
            LlmMessage::user(prompt),
        ];

        let response = tokio::time::timeout(
            self.config.llm_deadline,
            llm.generate(&messages, self.config.llm_deadline),
        )
        .await;

        let text = match response {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "llm parameter repair failed, rule-based only");
                return None;
            }
            Err(_) => {
                tracing::warn!("llm parameter repair timed out, rule-based only");
                return None;
            }
        };

        let repaired = extract_json(&text)?;
        let map = repaired.as_object()?.clone();

        Some(self.patch(
            PatchKind::FixParameters,
            CriticStrategy::ParameterCorrection,
            "parameters",
            Value::Object(call.parameters.clone()),
            Value::Object(map),
            0.7,
            vec!["re-validate the corrected call".to_owned()],
            Some("restore the original parameter map".to_owned()),
        ))
    }

    /// Preconfigured alternative tool for the same capability.
    fn alternative_approach(
        &self,
        call: &ToolCall,
        snapshot: &conductor_registry::RegistrySnapshot,
    ) -> Option<CorrectionPatch> {
        let (alt_tool, alt_action) = self.alternatives.get(&call.tool_id)?;
        if snapshot.lookup(alt_tool).is_none() {
            return None;
        }

        Some(self.patch(
            PatchKind::SubstituteTool,
            CriticStrategy::AlternativeApproach,
            "tool_id",
            json!({"tool_id": call.tool_id, "action": call.action}),
            json!({"tool_id": alt_tool, "action": alt_action}),
            0.6,
            vec!["re-validate the corrected call".to_owned()],
            Some(format!(
                "restore `{}.{}`",
                call.tool_id, call.action
            )),
        ))
    }

    /// Error keywords that reveal a missing tool class: route the call to
    /// the tool installer.
    fn skill_gap(&self, event: &ErrorEvent, task: &TaskSpec) -> Option<CorrectionPatch> {
        const GAPS: &[(&str, &str)] = &[
            ("pdf", "pdf-tools-mcp-server"),
            ("sql", "database-mcp-server"),
            ("database", "database-mcp-server"),
            ("image", "vision-mcp-server"),
            ("vision", "vision-mcp-server"),
        ];

        let message = event.message.to_lowercase();
        let (keyword, suggested) = GAPS.iter().find(|(k, _)| message.contains(k))?;

        let description = if task.description.trim().is_empty() {
            format!("need {keyword} processing capability")
        } else {
            task.description.clone()
        };

        Some(self.patch(
            PatchKind::InstallTools,
            CriticStrategy::SkillGap,
            "install_tools",
            json!({"tool_id": event.tool_id, "action": event.action}),
            json!({
                "tool_id": "mcp-search-tool",
                "action": "search_and_install_tools",
                "parameters": {
                    "task_description": description,
                    "reason": format!("missing {keyword} capability, suggested: {suggested}"),
                },
            }),
            0.7,
            vec![
                format!("install a {keyword}-capable tool"),
                "retry the original task after installation".to_owned(),
            ],
            None,
        ))
    }

    /// Advisory: the same signature keeps failing and nothing structural
    /// fits; suggest restarting reasoning with a simplified task statement.
    fn context_reframe(
        &self,
        recent: &[&ErrorEvent],
        call: &ToolCall,
    ) -> Option<CorrectionPatch> {
        if recent.len() < 2 {
            return None;
        }
        let signature = recent[0].signature();
        if recent[1].signature() != signature {
            return None;
        }

        let summary: Vec<String> = recent
            .iter()
            .take(3)
            .map(|e| format!("{}: {}", e.error_type, truncate(&e.message, 60)))
            .collect();

        let mut patch = self.patch(
            PatchKind::ContextReframe,
            CriticStrategy::ContextReframe,
            "task",
            json!({"tool_id": call.tool_id, "action": call.action}),
            json!({
                "advice": "restart reasoning with a simplified task statement",
                "repeated_failures": summary,
            }),
            0.5,
            vec!["restate the task and retry".to_owned()],
            None,
        );
        patch.advisory = true;
        patch.auto_apply = false;
        Some(patch)
    }

    // -- Helpers ------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn patch(
        &self,
        kind: PatchKind,
        strategy: CriticStrategy,
        target_field: &str,
        original_value: Value,
        corrected_value: Value,
        confidence: f64,
        validation_steps: Vec<String>,
        rollback: Option<String>,
    ) -> CorrectionPatch {
        CorrectionPatch {
            patch_id: Uuid::now_v7(),
            kind,
            strategy,
            target_field: target_field.to_owned(),
            original_value,
            corrected_value,
            validation_steps,
            rollback,
            confidence,
            auto_apply: confidence >= self.config.auto_apply_threshold,
            advisory: false,
        }
    }

    fn record_pattern(&self, event: &ErrorEvent) {
        let key = event.signature().to_string();
        let mut patterns = self.patterns.lock().expect("critic lock poisoned");
        patterns
            .entry(key)
            .and_modify(|p| {
                p.frequency += 1;
                p.last_seen = event.timestamp;
            })
            .or_insert(FailurePattern {
                frequency: 1,
                last_seen: event.timestamp,
            });
    }

    fn root_cause(&self, recent: &[&ErrorEvent]) -> String {
        let mut type_counts: HashMap<&str, usize> = HashMap::new();
        let mut component_counts: HashMap<&str, usize> = HashMap::new();
        for event in recent {
            *type_counts.entry(event.error_type.as_str()).or_default() += 1;
            *component_counts.entry(event.component.as_str()).or_default() += 1;
        }

        let dominant_type = type_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(t, _)| t)
            .unwrap_or("unknown");
        let dominant_component = component_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(c, _)| c)
            .unwrap_or("unknown");

        let repeats: Vec<(FailureSignature, usize)> = {
            let patterns = self.patterns.lock().expect("critic lock poisoned");
            recent
                .iter()
                .map(|e| e.signature())
                .filter_map(|sig| {
                    patterns
                        .get(&sig.to_string())
                        .map(|p| (sig, p.frequency))
                })
                .collect()
        };
        let max_repeat = repeats.iter().map(|(_, f)| *f).max().unwrap_or(0);

        if max_repeat >= 2 {
            format!(
                "dominant failure {dominant_type} in {dominant_component}; \
                 strongest signature repeated {max_repeat} times"
            )
        } else {
            format!("dominant failure {dominant_type} in {dominant_component}; no repeating signature")
        }
    }
}

fn call_from_event(event: &ErrorEvent, task: &TaskSpec) -> ToolCall {
    ToolCall {
        call_id: 0,
        task_id: task.task_id,
        tool_id: event.tool_id.clone().unwrap_or_default(),
        action: event.action.clone().unwrap_or_default(),
        parameters: event.parameters.clone().unwrap_or_default(),
        thinking: String::new(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
