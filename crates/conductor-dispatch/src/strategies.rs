//! Built-in strategy runners.
//!
//! One runner per way of serving a capability: the specialist MCP tool, a
//! code-sandbox HTTP composition, offline synthesis from previously learned
//! material, and the emergency tier's user-assistance and skeleton-answer
//! responses.  Fallback-tier payloads are explicitly labeled with their
//! method so downstream consumers can tell degraded answers apart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde_json::{Value, json};

use conductor_registry::Tier;

use crate::caller::ToolCaller;
use crate::executor::{CapabilityRequest, Strategy, StrategyRunner};

// ---------------------------------------------------------------------------
// Synthesis cache
// ---------------------------------------------------------------------------

/// Cache of previously successful capability payloads, keyed by capability
/// plus normalized query keywords.  Backs the fallback tier.
pub struct SynthesisCache {
    cache: Cache<String, Value>,
}

impl SynthesisCache {
    /// Create a cache holding up to `capacity` entries for `ttl`.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    fn key(capability: &str, query: &str) -> String {
        let mut words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(str::to_owned)
            .collect();
        words.sort();
        words.dedup();
        format!("{capability}:{}", words.join("+"))
    }

    /// Store a successful payload for later offline synthesis.
    pub async fn learn(&self, capability: &str, query: &str, payload: Value) {
        self.cache.insert(Self::key(capability, query), payload).await;
    }

    /// Recall learned material for a query, if any.
    pub async fn recall(&self, capability: &str, query: &str) -> Option<Value> {
        self.cache.get(&Self::key(capability, query)).await
    }

    /// Drop all learned material (resource-cleanup hook).
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Number of cached entries.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.cache.entry_count() == 0
    }
}

impl Default for SynthesisCache {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(24 * 3600))
    }
}

// ---------------------------------------------------------------------------
// Primary: specialist tool
// ---------------------------------------------------------------------------

/// Calls the specialist MCP tool for the capability, teaching the synthesis
/// cache on success.
pub struct SpecialistToolStrategy {
    caller: Arc<dyn ToolCaller>,
    tool_id: String,
    action: String,
    /// The parameter name the query is sent under when the call's own
    /// parameters don't already carry it.
    query_param: String,
    deadline: Duration,
    cache: Option<Arc<SynthesisCache>>,
}

impl SpecialistToolStrategy {
    pub fn new(
        caller: Arc<dyn ToolCaller>,
        tool_id: impl Into<String>,
        action: impl Into<String>,
        query_param: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        Self {
            caller,
            tool_id: tool_id.into(),
            action: action.into(),
            query_param: query_param.into(),
            deadline,
            cache: None,
        }
    }

    /// Teach this cache on success (builder style).
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<SynthesisCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[async_trait]
impl StrategyRunner for SpecialistToolStrategy {
    async fn run(&self, request: &CapabilityRequest) -> std::result::Result<Value, String> {
        let mut parameters = request.input.clone();
        if !parameters.contains_key(&self.query_param) {
            parameters.insert(self.query_param.clone(), Value::String(request.query.clone()));
        }

        let payload = self
            .caller
            .call(&self.tool_id, &self.action, &parameters, self.deadline)
            .await?;

        if let Some(cache) = &self.cache {
            cache
                .learn(&request.capability, &request.query, payload.clone())
                .await;
        }

        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Secondary: sandbox HTTP composition
// ---------------------------------------------------------------------------

/// Serves search-shaped capabilities by running an HTTP-fetching script in
/// the code sandbox.
pub struct SandboxHttpStrategy {
    caller: Arc<dyn ToolCaller>,
    deadline: Duration,
}

impl SandboxHttpStrategy {
    pub fn new(caller: Arc<dyn ToolCaller>, deadline: Duration) -> Self {
        Self { caller, deadline }
    }
}

#[async_trait]
impl StrategyRunner for SandboxHttpStrategy {
    async fn run(&self, request: &CapabilityRequest) -> std::result::Result<Value, String> {
        // JSON-encode the query, then escape for a single-quoted Python
        // string literal, so arbitrary quotes embed safely in the script.
        let encoded = serde_json::to_string(&request.query)
            .map_err(|e| e.to_string())?
            .replace('\\', "\\\\")
            .replace('\'', "\\'");
        let script = format!(
            r#"import json
from urllib.parse import quote
from urllib.request import Request, urlopen

query = json.loads('{encoded}')
url = "https://duckduckgo.com/html/?q=" + quote(query)
req = Request(url, headers={{"User-Agent": "conductor/0.1"}})
body = urlopen(req, timeout=20).read().decode("utf-8", "replace")
print(json.dumps({{"query": query, "method": "sandbox_http", "body_chars": len(body), "body_head": body[:2000]}}))
"#
        );

        let mut parameters = serde_json::Map::new();
        parameters.insert("code".to_owned(), Value::String(script));

        self.caller
            .call("microsandbox", "microsandbox_execute", &parameters, self.deadline)
            .await
    }
}

// ---------------------------------------------------------------------------
// Fallback: cached synthesis
// ---------------------------------------------------------------------------

/// Answers from previously learned material, clearly labeled as such.
pub struct CachedSynthesisStrategy {
    cache: Arc<SynthesisCache>,
}

impl CachedSynthesisStrategy {
    pub fn new(cache: Arc<SynthesisCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl StrategyRunner for CachedSynthesisStrategy {
    async fn run(&self, request: &CapabilityRequest) -> std::result::Result<Value, String> {
        match self.cache.recall(&request.capability, &request.query).await {
            Some(material) => Ok(json!({
                "method": "cached_synthesis",
                "query": request.query,
                "material": material,
                "disclaimer": "served from previously learned material, may be stale",
            })),
            None => Err(format!(
                "no cached material for query `{}`",
                request.query
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Emergency tier
// ---------------------------------------------------------------------------

/// Returns a structured "assistance needed" payload instead of an answer.
pub struct UserAssistStrategy;

#[async_trait]
impl StrategyRunner for UserAssistStrategy {
    async fn run(&self, request: &CapabilityRequest) -> std::result::Result<Value, String> {
        Ok(json!({
            "method": "user_interaction_request",
            "requires_user_input": true,
            "query": request.query,
            "message": format!("unable to complete automatically: {}", request.query),
            "suggested_actions": [
                "provide a relevant resource link",
                "provide more specific keywords",
                "simplify the request",
            ],
        }))
    }
}

/// Returns a minimal structured skeleton answer.
pub struct OutlineStrategy;

#[async_trait]
impl StrategyRunner for OutlineStrategy {
    async fn run(&self, request: &CapabilityRequest) -> std::result::Result<Value, String> {
        let query = &request.query;
        let mut key_terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(str::to_owned)
            .collect();
        key_terms.dedup();

        Ok(json!({
            "method": "basic_outline",
            "query": query,
            "key_terms": key_terms,
            "outline": [
                format!("1. Core concepts behind {query}"),
                format!("2. Main characteristics of {query}"),
                format!("3. Typical applications of {query}"),
                format!("4. Current developments around {query}"),
                "5. Related resources and references",
            ],
        }))
    }
}

// ---------------------------------------------------------------------------
// Code-shaped tiers
// ---------------------------------------------------------------------------

/// Secondary tier for code execution: a local structural look at the code
/// instead of running it.
pub struct StaticAnalysisStrategy;

#[async_trait]
impl StrategyRunner for StaticAnalysisStrategy {
    async fn run(&self, request: &CapabilityRequest) -> std::result::Result<Value, String> {
        let code = request
            .input
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or(&request.query);

        if code.trim().is_empty() {
            return Err("no code to analyze".to_owned());
        }

        let line_count = code.lines().count();
        Ok(json!({
            "method": "static_analysis",
            "line_count": line_count,
            "has_imports": code.contains("import"),
            "has_functions": code.contains("def ") || code.contains("fn "),
            "has_classes": code.contains("class "),
            "estimated_complexity": match code.len() {
                0..100 => "low",
                100..500 => "medium",
                _ => "high",
            },
        }))
    }
}

/// Fallback tier for code execution: a rule-based review instead of a run.
pub struct CodeReviewStrategy;

#[async_trait]
impl StrategyRunner for CodeReviewStrategy {
    async fn run(&self, request: &CapabilityRequest) -> std::result::Result<Value, String> {
        let code = request
            .input
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or(&request.query);

        if code.trim().is_empty() {
            return Err("no code to review".to_owned());
        }

        let mut findings = Vec::new();
        if !code.contains('#') && !code.contains("//") {
            findings.push("no comments found");
        }
        if code.contains("except:") || code.contains("catch (") {
            findings.push("broad exception handler");
        }
        if code.lines().any(|l| l.len() > 120) {
            findings.push("long lines over 120 characters");
        }

        Ok(json!({
            "method": "code_review",
            "reviewed_chars": code.len(),
            "findings": findings,
            "note": "code was reviewed, not executed",
        }))
    }
}

// ---------------------------------------------------------------------------
// Default strategy lists
// ---------------------------------------------------------------------------

/// The built-in strategy lists for the capabilities Conductor advertises,
/// mirroring the tier semantics of the well-known tool fleet.
pub fn default_strategy_lists(
    caller: Arc<dyn ToolCaller>,
    cache: Arc<SynthesisCache>,
) -> Vec<(String, Vec<Strategy>)> {
    let web_search = vec![
        Strategy::new(
            "web_search_primary",
            "specialist search tool",
            Tier::Primary,
            Duration::from_secs(30),
            Arc::new(
                SpecialistToolStrategy::new(
                    Arc::clone(&caller),
                    "mcp-deepsearch",
                    "quick_research",
                    "question",
                    Duration::from_secs(30),
                )
                .with_cache(Arc::clone(&cache)),
            ),
        )
        .with_tool("mcp-deepsearch"),
        Strategy::new(
            "web_search_secondary",
            "sandbox HTTP request",
            Tier::Secondary,
            Duration::from_secs(45),
            Arc::new(SandboxHttpStrategy::new(
                Arc::clone(&caller),
                Duration::from_secs(45),
            )),
        )
        .with_tool("microsandbox"),
        Strategy::new(
            "web_search_fallback",
            "offline knowledge synthesis",
            Tier::Fallback,
            Duration::from_secs(15),
            Arc::new(CachedSynthesisStrategy::new(Arc::clone(&cache))),
        ),
        Strategy::new(
            "web_search_emergency",
            "user interaction request",
            Tier::Emergency,
            Duration::from_secs(300),
            Arc::new(UserAssistStrategy),
        ),
    ];

    let deep_research = vec![
        Strategy::new(
            "research_primary",
            "specialist research tool",
            Tier::Primary,
            Duration::from_secs(120),
            Arc::new(
                SpecialistToolStrategy::new(
                    Arc::clone(&caller),
                    "mcp-deepsearch",
                    "research",
                    "question",
                    Duration::from_secs(120),
                )
                .with_cache(Arc::clone(&cache)),
            ),
        )
        .with_tool("mcp-deepsearch"),
        Strategy::new(
            "research_secondary",
            "multi-source aggregation via sandbox",
            Tier::Secondary,
            Duration::from_secs(90),
            Arc::new(SandboxHttpStrategy::new(
                Arc::clone(&caller),
                Duration::from_secs(90),
            )),
        )
        .with_tool("microsandbox"),
        Strategy::new(
            "research_fallback",
            "structured knowledge synthesis",
            Tier::Fallback,
            Duration::from_secs(30),
            Arc::new(CachedSynthesisStrategy::new(Arc::clone(&cache))),
        ),
        Strategy::new(
            "research_emergency",
            "basic outline",
            Tier::Emergency,
            Duration::from_secs(60),
            Arc::new(OutlineStrategy),
        ),
    ];

    let code_execution = vec![
        Strategy::new(
            "code_primary",
            "sandbox execution",
            Tier::Primary,
            Duration::from_secs(60),
            Arc::new(SpecialistToolStrategy::new(
                Arc::clone(&caller),
                "microsandbox",
                "microsandbox_execute",
                "code",
                Duration::from_secs(60),
            )),
        )
        .with_tool("microsandbox"),
        Strategy::new(
            "code_secondary",
            "static analysis",
            Tier::Secondary,
            Duration::from_secs(30),
            Arc::new(StaticAnalysisStrategy),
        ),
        Strategy::new(
            "code_fallback",
            "code review",
            Tier::Fallback,
            Duration::from_secs(20),
            Arc::new(CodeReviewStrategy),
        ),
    ];

    vec![
        ("web_search".to_owned(), web_search),
        ("deep_research".to_owned(), deep_research),
        ("code_execution".to_owned(), code_execution),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct RecordingCaller {
        response: Value,
    }

    #[async_trait]
    impl ToolCaller for RecordingCaller {
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
                "response": self.response,
            }))
        }
    }

    #[tokio::test]
    async fn specialist_fills_query_param() {
        let caller = Arc::new(RecordingCaller { response: json!({"ok": true}) });
        let strategy = SpecialistToolStrategy::new(
            caller,
            "mcp-deepsearch",
            "research",
            "question",
            Duration::from_secs(5),
        );

        let request = CapabilityRequest::new("deep_research", "rust lifetimes");
        let payload = strategy.run(&request).await.unwrap();

        assert_eq!(payload["params"]["question"], "rust lifetimes");
        assert_eq!(payload["tool"], "mcp-deepsearch");
    }

    #[tokio::test]
    async fn specialist_keeps_existing_params() {
        let caller = Arc::new(RecordingCaller { response: json!({}) });
        let strategy = SpecialistToolStrategy::new(
            caller,
            "mcp-deepsearch",
            "research",
            "question",
            Duration::from_secs(5),
        );

        let mut input = serde_json::Map::new();
        input.insert("question".to_owned(), json!("the original question"));
        let request = CapabilityRequest::new("deep_research", "other").with_input(input);

        let payload = strategy.run(&request).await.unwrap();
        assert_eq!(payload["params"]["question"], "the original question");
    }

    #[tokio::test]
    async fn specialist_teaches_synthesis_cache() {
        let cache = Arc::new(SynthesisCache::default());
        let caller = Arc::new(RecordingCaller { response: json!({"answer": 42}) });
        let strategy = SpecialistToolStrategy::new(
            caller,
            "mcp-deepsearch",
            "research",
            "question",
            Duration::from_secs(5),
        )
        .with_cache(Arc::clone(&cache));

        let request = CapabilityRequest::new("deep_research", "rust async runtimes");
        strategy.run(&request).await.unwrap();

        assert!(cache.recall("deep_research", "rust async runtimes").await.is_some());
    }

    #[tokio::test]
    async fn cached_synthesis_labels_its_payload() {
        let cache = Arc::new(SynthesisCache::default());
        cache
            .learn("web_search", "rust news", json!({"hits": 3}))
            .await;

        let strategy = CachedSynthesisStrategy::new(cache);
        let payload = strategy
            .run(&CapabilityRequest::new("web_search", "rust news"))
            .await
            .unwrap();

        assert_eq!(payload["method"], "cached_synthesis");
        assert_eq!(payload["material"]["hits"], 3);
        assert!(payload["disclaimer"].as_str().unwrap().contains("learned"));
    }

    #[tokio::test]
    async fn cached_synthesis_misses_are_failures() {
        let strategy = CachedSynthesisStrategy::new(Arc::new(SynthesisCache::default()));
        let result = strategy
            .run(&CapabilityRequest::new("web_search", "never seen"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cache_key_is_word_order_insensitive() {
        let cache = SynthesisCache::default();
        cache
            .learn("web_search", "latest asyncio tutorials", json!(1))
            .await;
        assert!(cache.recall("web_search", "tutorials asyncio latest").await.is_some());
        assert!(cache.recall("deep_research", "latest asyncio tutorials").await.is_none());
    }

    #[tokio::test]
    async fn user_assist_payload_shape() {
        let payload = UserAssistStrategy
            .run(&CapabilityRequest::new("web_search", "find x"))
            .await
            .unwrap();

        assert_eq!(payload["method"], "user_interaction_request");
        assert_eq!(payload["requires_user_input"], true);
        assert!(payload["suggested_actions"].as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn outline_strategy_builds_skeleton() {
        let payload = OutlineStrategy
            .run(&CapabilityRequest::new("deep_research", "vector databases"))
            .await
            .unwrap();

        assert_eq!(payload["method"], "basic_outline");
        assert_eq!(payload["outline"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn static_analysis_reads_code_input() {
        let mut input = serde_json::Map::new();
        input.insert(
            "code".to_owned(),
            json!("import os\n\ndef main():\n    print(os.getcwd())\n"),
        );
        let request = CapabilityRequest::new("code_execution", "").with_input(input);

        let payload = StaticAnalysisStrategy.run(&request).await.unwrap();
        assert_eq!(payload["has_imports"], true);
        assert_eq!(payload["has_functions"], true);
        assert_eq!(payload["estimated_complexity"], "low");
    }

    #[tokio::test]
    async fn static_analysis_requires_code() {
        let result = StaticAnalysisStrategy
            .run(&CapabilityRequest::new("code_execution", "   "))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sandbox_http_script_embeds_query_safely() {
        let caller = Arc::new(RecordingCaller { response: json!({}) });
        let strategy = SandboxHttpStrategy::new(caller, Duration::from_secs(5));

        let request = CapabilityRequest::new("web_search", "what's \"new\" in rust");
        let payload = strategy.run(&request).await.unwrap();

        let code = payload["params"]["code"].as_str().unwrap();
        assert!(code.contains("json.loads"));
        assert_eq!(payload["tool"], "microsandbox");
        assert_eq!(payload["action"], "microsandbox_execute");
    }

    #[test]
    fn default_lists_cover_advertised_capabilities() {
        let caller: Arc<dyn ToolCaller> = Arc::new(RecordingCaller { response: json!({}) });
        let lists = default_strategy_lists(caller, Arc::new(SynthesisCache::default()));

        let names: Vec<&str> = lists.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, vec!["web_search", "deep_research", "code_execution"]);

        for (capability, strategies) in &lists {
            assert!(
                strategies
                    .iter()
                    .any(|s| matches!(s.tier, Tier::Fallback | Tier::Emergency)),
                "{capability} lacks a last line of defense"
            );
        }
    }
}
