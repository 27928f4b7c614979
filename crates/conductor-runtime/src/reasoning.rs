//! The reasoning loop.
//!
//! Per task: prompt the LLM with the live tool catalog, extract and validate
//! the proposed call, dispatch it through the capability tier chain (or
//! directly when no capability covers it), record the outcome, and feed the
//! result back to the model.  Failures flow through classification and
//! recovery; repeated failure signatures escalate to the critic, whose
//! patches re-enter validation before anything executes.

use std::sync::atomic::Ordering;
use std::time::Instant;

use serde_json::{Value, json};

use conductor_critic::{CorrectionPatch, LlmMessage};
use conductor_dispatch::CapabilityRequest;
use conductor_health::ErrorEvent;
use conductor_registry::{
    CallOutcome, Correction, TaskSpec, ToolCall, ToolCallResult, extract_json,
};

use crate::error::{Result, RuntimeError};
use crate::root::Runtime;
use crate::trajectory::{Trajectory, TrajectoryStep};

/// Outcome of executing one validated call, including the failure path.
struct StepExecution {
    result: ToolCallResult,
    events: Vec<ErrorEvent>,
    patches: Vec<CorrectionPatch>,
    recovery_summary: Option<String>,
}

impl Runtime {
    /// Drive one task to completion (or to its step budget) and emit its
    /// trajectory.
    pub async fn run_task(&self, task: &TaskSpec) -> Result<Trajectory> {
        let llm = self
            .llm
            .clone()
            .ok_or_else(|| RuntimeError::NotConfigured("llm client".to_owned()))?;

        let mut trajectory = Trajectory::new(task.clone());
        let mut messages = vec![
            LlmMessage::system(self.system_prompt()),
            LlmMessage::user(task.description.clone()),
        ];

        tracing::info!(
            task_id = %task.task_id,
            task_type = task.task_type.label(),
            "task started"
        );

        for step in 0..self.config.max_steps {
            let text = llm
                .generate(&messages, self.config.llm_deadline)
                .await
                .map_err(RuntimeError::Critic)?;

            let Some(proposal) = extract_json(&text) else {
                let event = self.classify("reasoning", "DataError", "LLM response contained no parseable JSON", None);
                self.ledger.record_event(&event);
                trajectory.push(TrajectoryStep {
                    index: step,
                    call: None,
                    result: None,
                    events: vec![event],
                    patches: Vec::new(),
                    recovery_summary: None,
                });
                messages.push(LlmMessage::assistant(text));
                messages.push(LlmMessage::user(
                    "Your response must be a single JSON object with the fields \
                     thinking, tool_id, action, parameters (or final_answer).",
                ));
                continue;
            };

            if let Some(answer) = proposal.get("final_answer").and_then(Value::as_str) {
                trajectory.final_answer = Some(answer.to_owned());
                trajectory.completed = true;
                tracing::info!(task_id = %task.task_id, steps = step, "task completed");
                break;
            }

            messages.push(LlmMessage::assistant(text));

            let call = ToolCall::from_proposal(&proposal, self.call_ids.next_id(), task.task_id);
            let report = self.validator.validate(&call, task).await;

            let (validated, mut corrections, mut events, mut patches) = if report.is_valid {
                (Some(report.call), report.corrections, Vec::new(), Vec::new())
            } else {
                self.repair_rejected_call(&report, task).await
            };

            let Some(validated_call) = validated else {
                // The call never became valid; tell the model why and move on.
                let reason = events
                    .last()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "call rejected by validation".to_owned());
                trajectory.push(TrajectoryStep {
                    index: step,
                    call: None,
                    result: None,
                    events,
                    patches,
                    recovery_summary: None,
                });
                messages.push(LlmMessage::user(format!(
                    "Tool call rejected: {reason}. Use only the tools and actions \
                     from the catalog (checksum {}).",
                    self.registry.action_whitelist_hash()
                )));
                continue;
            };

            let mut execution = self.execute_call(&validated_call, task).await;
            execution.result.corrections.append(&mut corrections);
            execution.result.corrections.extend(
                patches
                    .iter()
                    .map(|p| Correction::PatchApplied { patch_id: p.patch_id }),
            );
            events.append(&mut execution.events);
            patches.append(&mut execution.patches);

            let feedback = match (&execution.result.outcome, &execution.result.payload) {
                (CallOutcome::Success, Some(payload)) => format!(
                    "Tool result ({}): {}",
                    execution
                        .result
                        .tier
                        .map(|t| t.label())
                        .unwrap_or("direct"),
                    payload
                ),
                _ => format!(
                    "Tool call failed: {}",
                    execution
                        .result
                        .error
                        .as_deref()
                        .unwrap_or("unknown error")
                ),
            };
            messages.push(LlmMessage::user(feedback));

            trajectory.push(TrajectoryStep {
                index: step,
                call: Some(validated_call),
                result: Some(execution.result),
                events,
                patches,
                recovery_summary: execution.recovery_summary,
            });
        }

        if !trajectory.completed {
            tracing::warn!(
                task_id = %task.task_id,
                max_steps = self.config.max_steps,
                "task exhausted its step budget"
            );
        }

        self.trajectories.append(&trajectory)?;
        Ok(trajectory)
    }

    /// Attempt to repair a rejected call through the critic.  Returns the
    /// validated replacement call (if any) together with its corrections,
    /// the error events raised, and the patches applied.
    async fn repair_rejected_call(
        &self,
        report: &conductor_registry::ValidationReport,
        task: &TaskSpec,
    ) -> (
        Option<ToolCall>,
        Vec<Correction>,
        Vec<ErrorEvent>,
        Vec<CorrectionPatch>,
    ) {
        let failure_kind = report
            .failure
            .as_ref()
            .map(|f| f.kind())
            .unwrap_or("validation_error");
        let message = report
            .error_message()
            .unwrap_or_else(|| "call rejected".to_owned());

        let event = self.classify(
            "validator",
            failure_kind,
            &message,
            Some(&report.call),
        );
        self.ledger.record_event(&event);

        if !self.critic.should_trigger(&self.ledger, &event, false) {
            return (None, Vec::new(), vec![event], Vec::new());
        }

        let recent = self.ledger.recent_events(5);
        let analysis = self.critic.analyze(&recent, task).await;

        for patch in &analysis.patches {
            if patch.advisory || !patch.auto_apply {
                continue;
            }
            let applied = patch.apply(&report.call);
            let revalidated = self.validator.validate(&applied, task).await;
            if revalidated.is_valid {
                tracing::info!(
                    patch = patch.kind.label(),
                    strategy = patch.strategy.label(),
                    "critic patch applied to rejected call"
                );
                return (
                    Some(revalidated.call),
                    revalidated.corrections,
                    vec![event],
                    vec![patch.clone()],
                );
            }
        }

        (None, Vec::new(), vec![event], analysis.patches)
    }

    /// Execute one validated call: capability tier chain when one covers the
    /// action, direct tool call otherwise; recovery and critic escalation on
    /// failure.
    async fn execute_call(&self, call: &ToolCall, task: &TaskSpec) -> StepExecution {
        let (result, request) = self.attempt_execution(call, task).await;
        if result.outcome.is_success() {
            self.ledger.record_success(
                &call.tool_id,
                std::time::Duration::from_millis(result.duration_ms),
            );
            return StepExecution {
                result,
                events: Vec::new(),
                patches: Vec::new(),
                recovery_summary: None,
            };
        }

        // Classify and record the failure.
        let error_type = match result.outcome {
            CallOutcome::Timeout => "TimeoutError",
            _ => "ToolError",
        };
        let message = result.error.clone().unwrap_or_else(|| "call failed".to_owned());
        let event = self.classify("executor", error_type, &message, Some(call));
        self.ledger.record_failure(&call.tool_id, &event);

        // Recovery plan.
        let recovery = self.recovery.recover(&event, request.as_ref()).await;
        let summary = summarize_recovery(&recovery);

        if recovery.recovered {
            if let Some(payload) = recovery.payload {
                let mut recovered = ToolCallResult::success(call.call_id, payload, result.duration_ms);
                recovered.strategy_used = Some("recovery".to_owned());
                return StepExecution {
                    result: recovered,
                    events: vec![event],
                    patches: Vec::new(),
                    recovery_summary: Some(summary),
                };
            }

            // The fault was repaired without producing a payload (restart,
            // cleanup): one more attempt.
            let (retried, _) = self.attempt_execution(call, task).await;
            if retried.outcome.is_success() {
                self.ledger.record_success(
                    &call.tool_id,
                    std::time::Duration::from_millis(retried.duration_ms),
                );
                return StepExecution {
                    result: retried,
                    events: vec![event],
                    patches: Vec::new(),
                    recovery_summary: Some(summary),
                };
            }
        }

        // Repeated signature or exhausted recovery: ask the critic.
        let mut patches = Vec::new();
        if self
            .critic
            .should_trigger(&self.ledger, &event, !recovery.recovered)
        {
            let analysis = self.critic.analyze(&self.ledger.recent_events(5), task).await;
            for patch in analysis.patches {
                if patch.advisory || !patch.auto_apply {
                    patches.push(patch);
                    continue;
                }
                let applied = patch.apply(call);
                let report = self.validator.validate(&applied, task).await;
                if !report.is_valid {
                    continue;
                }
                let (patched_result, _) = self.attempt_execution(&report.call, task).await;
                let success = patched_result.outcome.is_success();
                self.critic.report_outcome(&patch, success);
                patches.push(patch.clone());
                if success {
                    self.ledger.record_success(
                        &report.call.tool_id,
                        std::time::Duration::from_millis(patched_result.duration_ms),
                    );
                    let mut result = patched_result;
                    result
                        .corrections
                        .push(Correction::PatchApplied { patch_id: patch.patch_id });
                    return StepExecution {
                        result,
                        events: vec![event],
                        patches,
                        recovery_summary: Some(summary),
                    };
                }
            }
        }

        StepExecution {
            result,
            events: vec![event],
            patches,
            recovery_summary: Some(summary),
        }
    }

    /// One execution attempt with no recovery: the tier chain for covered
    /// capabilities, a direct bounded tool call otherwise.
    async fn attempt_execution(
        &self,
        call: &ToolCall,
        task: &TaskSpec,
    ) -> (ToolCallResult, Option<CapabilityRequest>) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let outcome = self.attempt_execution_inner(call, task).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        outcome
    }

    async fn attempt_execution_inner(
        &self,
        call: &ToolCall,
        task: &TaskSpec,
    ) -> (ToolCallResult, Option<CapabilityRequest>) {
        let started = Instant::now();

        if let Some(capability) = capability_for(&call.action) {
            if self.executor.capabilities().iter().any(|c| c == capability) {
                let request = CapabilityRequest::new(capability, query_for(call, task))
                    .with_input(call.parameters.clone());

                // Rank candidates so outcome reporting keeps teaching the
                // dispatcher, even though the tier chain picks the runner.
                let load = (self.in_flight.load(Ordering::Relaxed).min(10)) as u8;
                let candidate = self
                    .dispatcher
                    .select(capability, task, load)
                    .ok()
                    .and_then(|ranked| ranked.into_iter().next());

                let report = match self.executor.execute(&request).await {
                    Ok(report) => report,
                    Err(e) => {
                        return (
                            ToolCallResult::failed(
                                call.call_id,
                                CallOutcome::Error,
                                e.to_string(),
                                started.elapsed().as_millis() as u64,
                            ),
                            Some(request),
                        );
                    }
                };

                if let Some(candidate) = candidate {
                    self.dispatcher.report_outcome(
                        &candidate,
                        report.outcome.is_success(),
                        candidate.score,
                    );
                }

                let duration_ms = started.elapsed().as_millis() as u64;
                let result = match report.outcome {
                    CallOutcome::Success => {
                        let mut result = ToolCallResult::success(
                            call.call_id,
                            report.payload.unwrap_or(Value::Null),
                            duration_ms,
                        );
                        result.tier = report.tier;
                        result.strategy_used = report.strategy_used;
                        result
                    }
                    outcome => {
                        let mut result = ToolCallResult::failed(
                            call.call_id,
                            outcome,
                            report
                                .error
                                .unwrap_or_else(|| "capability execution failed".to_owned()),
                            duration_ms,
                        );
                        result.tier = report.tier;
                        result
                    }
                };
                return (result, Some(request));
            }
        }

        // Direct call outside the capability map, bounded by the default
        // call timeout.
        let outcome = tokio::time::timeout(
            self.config.call_timeout,
            self.caller
                .call(&call.tool_id, &call.action, &call.parameters, self.config.call_timeout),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(payload)) => ToolCallResult::success(call.call_id, payload, duration_ms),
            Ok(Err(reason)) => {
                ToolCallResult::failed(call.call_id, CallOutcome::Failure, reason, duration_ms)
            }
            Err(_) => ToolCallResult::failed(
                call.call_id,
                CallOutcome::Timeout,
                format!("deadline of {:?} exceeded", self.config.call_timeout),
                duration_ms,
            ),
        };
        (result, None)
    }

    /// The system prompt: live catalog, contract, and drift checksum.
    fn system_prompt(&self) -> String {
        let snapshot = self.registry.snapshot();
        format!(
            "You are a tool-using reasoning agent.\n\n{}\n\n\
             Respond with exactly one JSON object per turn:\n\
             {{\"thinking\": \"...\", \"tool_id\": \"...\", \"action\": \"...\", \
             \"parameters\": {{...}}}}\n\
             When the task is done, respond with {{\"final_answer\": \"...\"}} instead.",
            snapshot.generate_llm_catalog()
        )
    }

    fn classify(
        &self,
        component: &str,
        error_type: &str,
        message: &str,
        call: Option<&ToolCall>,
    ) -> ErrorEvent {
        let recent = self
            .ledger
            .component_failures(component, std::time::Duration::from_secs(3600));
        self.classifier.event(
            component,
            error_type,
            message,
            call.map(|c| c.tool_id.as_str()).filter(|t| !t.is_empty()),
            call.map(|c| c.action.as_str()),
            call.map(|c| c.parameters.clone()),
            recent,
        )
    }
}

/// Which advertised capability an action belongs to.
fn capability_for(action: &str) -> Option<&'static str> {
    match action {
        "research" | "comprehensive_research" => Some("deep_research"),
        "quick_research" | "browser_search_google" => Some("web_search"),
        "microsandbox_execute" => Some("code_execution"),
        "search_and_install_tools" => Some("tool_installation"),
        _ => None,
    }
}

/// The primary textual input for a capability request.
fn query_for(call: &ToolCall, task: &TaskSpec) -> String {
    for key in ["question", "query", "task", "task_description", "code"] {
        if let Some(value) = call.parameters.get(key).and_then(Value::as_str) {
            if !value.trim().is_empty() {
                return value.to_owned();
            }
        }
    }
    task.description.clone()
}

fn summarize_recovery(report: &conductor_dispatch::RecoveryReport) -> String {
    if report.attempts.is_empty() {
        return "no recovery actions applicable".to_owned();
    }
    let parts: Vec<String> = report
        .attempts
        .iter()
        .map(|a| format!("{}:{}", a.action, if a.success { "ok" } else { "failed" }))
        .collect();
    parts.join(", ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use async_trait::async_trait;
    use conductor_critic::ScriptedLlm;
    use conductor_dispatch::ToolCaller;
    use conductor_registry::{StaticSource, TaskType, builtin_catalog};
    use std::sync::Arc;
    use std::time::Duration;

    struct EchoCaller;

    #[async_trait]
    impl ToolCaller for EchoCaller {
        async fn call(
            &self,
            tool_id: &str,
            action: &str,
            parameters: &serde_json::Map<String, Value>,
            _deadline: Duration,
        ) -> std::result::Result<Value, String> {
            Ok(json!({
                "tool": tool_id,
                "action": action,
                "params": parameters,
            }))
        }
    }

    fn test_config(dir: &std::path::Path) -> RuntimeConfig {
        RuntimeConfig {
            alias_config_path: dir.join("missing.toml"),
            manifest_roots: Vec::new(),
            state_path: dir.join("learning.json"),
            trajectory_path: dir.join("trajectories.jsonl"),
            max_steps: 6,
            ..RuntimeConfig::default()
        }
    }

    async fn runtime_with_llm(
        dir: &std::path::Path,
        responses: Vec<&str>,
    ) -> Arc<Runtime> {
        let llm: Arc<dyn conductor_critic::LlmClient> =
            Arc::new(ScriptedLlm::with_responses(responses));
        let runtime = Runtime::new(
            test_config(dir),
            Arc::new(StaticSource::with_tools(builtin_catalog())),
            Arc::new(EchoCaller),
            Some(llm),
        )
        .unwrap();
        runtime.init().await.unwrap();
        runtime
    }

    #[tokio::test]
    async fn task_with_aliased_call_completes() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_llm(
            dir.path(),
            vec![
                r#"{"thinking": "use search", "tool_id": "deepsearch", "action": "search",
                    "parameters": {"query": "python asyncio tutorial"}}"#,
                r#"{"final_answer": "found three good tutorials"}"#,
            ],
        )
        .await;

        let task = TaskSpec::new(TaskType::Research, "find latest asyncio tutorials");
        let trajectory = runtime.run_task(&task).await.unwrap();

        assert!(trajectory.completed);
        assert_eq!(trajectory.steps.len(), 1);

        let step = &trajectory.steps[0];
        let call = step.call.as_ref().unwrap();
        assert_eq!(call.tool_id, "mcp-deepsearch");
        assert_eq!(call.action, "research");

        let result = step.result.as_ref().unwrap();
        assert_eq!(result.outcome, CallOutcome::Success);
        let tags: Vec<&str> = result.corrections.iter().map(Correction::tag).collect();
        assert!(tags.contains(&"tool_id_alias"));
        assert!(tags.contains(&"parameter_alias"));
    }

    #[tokio::test]
    async fn unparseable_response_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_llm(
            dir.path(),
            vec![
                "I think I should search the web for this.",
                r#"{"final_answer": "done"}"#,
            ],
        )
        .await;

        let task = TaskSpec::new(TaskType::Research, "anything");
        let trajectory = runtime.run_task(&task).await.unwrap();

        assert!(trajectory.completed);
        // One step recording the parse failure event.
        assert_eq!(trajectory.steps.len(), 1);
        assert!(trajectory.steps[0].call.is_none());
        assert_eq!(trajectory.steps[0].events.len(), 1);
    }

    #[tokio::test]
    async fn missing_llm_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new(
            test_config(dir.path()),
            Arc::new(StaticSource::with_tools(builtin_catalog())),
            Arc::new(EchoCaller),
            None,
        )
        .unwrap();
        runtime.init().await.unwrap();

        let task = TaskSpec::new(TaskType::Research, "x");
        let result = runtime.run_task(&task).await;
        assert!(matches!(result, Err(RuntimeError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn trajectory_is_appended_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_llm(dir.path(), vec![r#"{"final_answer": "ok"}"#]).await;

        let task = TaskSpec::new(TaskType::from("summarize"), "trivial");
        runtime.run_task(&task).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("trajectories.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn direct_calls_bypass_the_tier_chain() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_llm(
            dir.path(),
            vec![
                r#"{"thinking": "navigate", "tool_id": "browser_use",
                    "action": "browser_navigate",
                    "parameters": {"url": "https://docs.rs"}}"#,
                r#"{"final_answer": "navigated"}"#,
            ],
        )
        .await;

        let task = TaskSpec::new(TaskType::Execute, "open docs.rs");
        let trajectory = runtime.run_task(&task).await.unwrap();

        let result = trajectory.steps[0].result.as_ref().unwrap();
        assert_eq!(result.outcome, CallOutcome::Success);
        // Direct path carries no tier.
        assert!(result.tier.is_none());
    }

    #[test]
    fn capability_mapping() {
        assert_eq!(capability_for("research"), Some("deep_research"));
        assert_eq!(capability_for("quick_research"), Some("web_search"));
        assert_eq!(capability_for("microsandbox_execute"), Some("code_execution"));
        assert_eq!(capability_for("browser_navigate"), None);
    }
}
