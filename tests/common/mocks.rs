//! Mock implementations for testing.
//!
//! A scripted model that answers each kind of request from its own queue, a
//! counting search provider, and a helper that wires the full stack over an
//! in-memory libsql store.

use async_trait::async_trait;
use deep_research::llm::{ChatRequest, ChatResponse, ChatRole, ChatTurn, LLMClient, ModelFactory, TokenUsage};
use deep_research::tools::registry::{CONDUCT_RESEARCH, WEB_SEARCH};
use deep_research::tools::{SearchHit, SearchProvider, SearchRequest};
use deep_research::types::{AppError, Result, ToolCall};
use deep_research::{AppState, Capabilities, ResearchConfig, ResearchConfigManager, TursoClient};
use deep_research::timeline::MemoryTimelineStore;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Usage reported for every scripted call.
pub const CALL_USAGE: TokenUsage = TokenUsage {
    input_tokens: 10,
    output_tokens: 5,
};

/// Which part of a run a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Clarify,
    Brief,
    Summary,
    Supervisor,
    Researcher,
    Compress,
    Report,
}

impl Route {
    fn of(request: &ChatRequest) -> Self {
        if let Some(format) = &request.response_format {
            return match format.name.as_str() {
                "clarify_with_user" => Route::Clarify,
                "research_question" => Route::Brief,
                _ => Route::Summary,
            };
        }
        if request.tools.iter().any(|t| t.name == CONDUCT_RESEARCH) {
            return Route::Supervisor;
        }
        if request.tools.iter().any(|t| t.name == WEB_SEARCH) {
            return Route::Researcher;
        }
        let compress = request.messages.first().is_some_and(|m| {
            m.role == ChatRole::System && m.content.contains("clean up research findings")
        });
        if compress { Route::Compress } else { Route::Report }
    }

    fn default_reply(self) -> Reply {
        match self {
            Route::Clarify => Reply::text(
                r#"{"needClarification": false, "question": "", "verification": "Starting research now"}"#,
            ),
            Route::Brief => Reply::text(r#"{"researchBrief": "Compare solid-state and lithium-ion EV batteries"}"#),
            Route::Summary => Reply::text(r#"{"summary": "Short summary", "keyExcerpts": "Key quote"}"#),
            Route::Supervisor | Route::Researcher => Reply::text("Nothing more to do."),
            Route::Compress => Reply::text("Compressed findings [1]"),
            Route::Report => Reply::text("# Final Report\n\nFindings."),
        }
    }
}

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Tools(Vec<(String, serde_json::Value)>),
    Fail,
    Panic,
}

impl Reply {
    pub fn text(content: &str) -> Self {
        Reply::Text(content.to_string())
    }

    pub fn tool(name: &str, args: serde_json::Value) -> Self {
        Reply::Tools(vec![(name.to_string(), args)])
    }

    pub fn tools(calls: Vec<(&str, serde_json::Value)>) -> Self {
        Reply::Tools(calls.into_iter().map(|(n, a)| (n.to_string(), a)).collect())
    }
}

/// Mock LLM client answering from per-route scripts.
///
/// When a route's script runs dry the route's default reply is used; set
/// `repeat` to keep replaying the last scripted reply instead.
#[derive(Default)]
pub struct ScriptedLLMClient {
    scripts: Mutex<HashMap<Route, VecDeque<Reply>>>,
    repeat: Mutex<HashMap<Route, Reply>>,
    requests: Mutex<Vec<(Route, ChatRequest)>>,
    next_call_id: AtomicUsize,
}

impl ScriptedLLMClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, route: Route, replies: Vec<Reply>) -> &Self {
        self.scripts.lock().entry(route).or_default().extend(replies);
        self
    }

    /// Answer every request on `route` with `reply` once its script is empty.
    pub fn always(&self, route: Route, reply: Reply) -> &Self {
        self.repeat.lock().insert(route, reply);
        self
    }

    pub fn calls(&self, route: Route) -> usize {
        self.requests.lock().iter().filter(|(r, _)| *r == route).count()
    }

    pub fn requests(&self, route: Route) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|(r, _)| *r == route)
            .map(|(_, req)| req.clone())
            .collect()
    }

    fn next_reply(&self, route: Route) -> Reply {
        if let Some(reply) = self.scripts.lock().get_mut(&route).and_then(|q| q.pop_front()) {
            return reply;
        }
        self.repeat
            .lock()
            .get(&route)
            .cloned()
            .unwrap_or_else(|| route.default_reply())
    }
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let route = Route::of(&request);
        self.requests.lock().push((route, request));

        let message = match self.next_reply(route) {
            Reply::Fail => return Err(AppError::LLM("Mock LLM failure".to_string())),
            Reply::Panic => panic!("mock model panicked"),
            Reply::Text(content) => ChatTurn::assistant(content),
            Reply::Tools(calls) => ChatTurn {
                role: ChatRole::Assistant,
                content: String::new(),
                tool_calls: calls
                    .into_iter()
                    .map(|(name, args)| ToolCall {
                        id: format!("call_{}", self.next_call_id.fetch_add(1, Ordering::SeqCst)),
                        name,
                        arguments: args.to_string(),
                    })
                    .collect(),
                tool_call_id: None,
            },
        };

        let finish_reason = if message.tool_calls.is_empty() { "stop" } else { "tool_calls" };
        Ok(ChatResponse {
            message,
            usage: CALL_USAGE,
            finish_reason: finish_reason.to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Hands out the same scripted client for every run.
pub struct MockModelFactory {
    client: Arc<dyn LLMClient>,
}

impl MockModelFactory {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self { client }
    }
}

impl ModelFactory for MockModelFactory {
    fn create(
        &self,
        config: &ResearchConfig,
        model_id: Option<&str>,
    ) -> Result<(String, Arc<dyn LLMClient>)> {
        let id = model_id.unwrap_or(&config.default_model).to_string();
        Ok((id, Arc::clone(&self.client)))
    }
}

/// Search provider returning fixed hits and counting calls.
#[derive(Default)]
pub struct CountingSearchProvider {
    hits: Vec<SearchHit>,
    queries: Mutex<Vec<String>>,
}

impl CountingSearchProvider {
    pub fn new(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self {
            hits,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn with_sources(n: usize) -> Arc<Self> {
        Self::new((1..=n).map(|i| hit(&format!("https://example.com/{}", i), "snippet")).collect())
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchProvider for CountingSearchProvider {
    async fn search(&self, request: &SearchRequest) -> Vec<SearchHit> {
        self.queries.lock().push(request.query.clone());
        self.hits.clone()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

pub fn hit(url: &str, content: &str) -> SearchHit {
    SearchHit {
        url: url.to_string(),
        title: format!("Page at {}", url),
        content: content.to_string(),
        raw_content: None,
    }
}

/// Config tuned for tests: in-memory store, small pool, MEDIUM budgets.
pub fn test_config() -> ResearchConfig {
    let mut config = ResearchConfig::default();
    config.database.url = ":memory:".to_string();
    config.executor.max_pool_size = 2;
    config.executor.queue_capacity = 2;
    config.timeline.client_buffer = 64;
    config
}

/// Everything a test needs to drive and inspect the stack.
pub struct TestStack {
    pub state: AppState,
    pub llm: Arc<ScriptedLLMClient>,
    pub search: Arc<CountingSearchProvider>,
    pub timeline_store: Arc<MemoryTimelineStore>,
}

pub async fn test_stack_with(
    config: ResearchConfig,
    llm: Arc<ScriptedLLMClient>,
    search: Arc<CountingSearchProvider>,
) -> TestStack {
    let records = Arc::new(TursoClient::new_memory().await.unwrap());
    let timeline_store = Arc::new(MemoryTimelineStore::new());
    let state = AppState::build(
        Arc::new(ResearchConfigManager::from_config(config)),
        Capabilities {
            records,
            timeline_store: timeline_store.clone(),
            search: search.clone(),
            models: Arc::new(MockModelFactory::new(llm.clone())),
        },
    );
    TestStack {
        state,
        llm,
        search,
        timeline_store,
    }
}

pub async fn test_stack(llm: Arc<ScriptedLLMClient>) -> TestStack {
    test_stack_with(test_config(), llm, CountingSearchProvider::with_sources(2)).await
}
