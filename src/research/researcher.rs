//! Researcher: one delegated sub-topic, searched and then compressed.

use crate::llm::{ChatRequest, ChatTurn};
use crate::research::decision_loop::{self, BUDGET_EXHAUSTED, LoopPolicy};
use crate::research::prompts;
use crate::research::search::{SearchAgent, truncate_chars};
use crate::research::state::WorkflowRun;
use crate::research::AgentContext;
use crate::timeline::NewEvent;
use crate::tools::{Stage, ToolInvocation, registry};
use crate::types::{AppError, EventKind, Result};
use async_trait::async_trait;
use tracing::{info, instrument, warn};

/// Upper bound on the compressed fallback built from raw notes.
const RAW_NOTES_FALLBACK_CHARS: usize = 20_000;

struct ResearcherPolicy;

#[async_trait]
impl LoopPolicy for ResearcherPolicy {
    fn stage(&self) -> Stage {
        Stage::Researcher
    }

    fn counters(&self, run: &WorkflowRun) -> (u32, u32, u32) {
        (
            run.counters.search_count,
            run.budget.max_search_count,
            run.counters.researcher_iterations,
        )
    }

    fn bump_iteration(&self, run: &mut WorkflowRun) {
        run.counters.researcher_iterations += 1;
    }

    async fn act(
        &self,
        ctx: &AgentContext,
        run: &mut WorkflowRun,
        invocation: ToolInvocation,
    ) -> Result<String> {
        match invocation {
            ToolInvocation::WebSearch {
                query,
                max_results,
                topic,
            } => {
                if run.counters.search_count >= run.budget.max_search_count {
                    return Ok(BUDGET_EXHAUSTED.to_string());
                }
                run.counters.search_count += 1;
                let result = SearchAgent::run(ctx, run, &query, max_results, &topic).await?;
                run.raw_notes
                    .push(format!("[{}] {}", registry::WEB_SEARCH, result));
                Ok(result)
            }
            ToolInvocation::Think { reflection } => {
                ctx.publisher
                    .publish_event(
                        &run.research_id,
                        NewEvent::new(EventKind::Research, "Reflecting on findings")
                            .content(reflection.clone())
                            .parent(run.parents.research),
                    )
                    .await?;
                let result = format!("Reflection recorded: {}", reflection);
                run.raw_notes.push(format!("[{}] {}", registry::THINK, result));
                Ok(result)
            }
            other => Ok(format!("{:?} is not available to researchers", other)),
        }
    }
}

pub struct Researcher;

impl Researcher {
    /// Research one topic and return the compressed findings.
    ///
    /// Model failures inside the delegation degrade to whatever raw notes
    /// were gathered; only record-store failures propagate.
    #[instrument(skip(ctx, run, topic), fields(research_id = %run.research_id))]
    pub async fn run(ctx: &AgentContext, run: &mut WorkflowRun, topic: &str) -> Result<String> {
        run.counters.start_delegation();
        run.raw_notes.clear();

        let mut memory = vec![
            ChatTurn::system(prompts::researcher(run.budget.max_search_count)),
            ChatTurn::user(topic),
        ];

        match decision_loop::run_loop(&ResearcherPolicy, ctx, run, &mut memory).await {
            Ok(exit) => info!(
                ?exit,
                searches = run.counters.search_count,
                "Researcher finished"
            ),
            Err(e @ AppError::Database(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Researcher loop failed, using partial notes");
                return Ok(Self::fallback(run, topic));
            }
        }

        match Self::compress(ctx, run, topic, &memory).await {
            Ok(compressed) if !compressed.trim().is_empty() => Ok(compressed),
            Ok(_) => Ok(Self::fallback(run, topic)),
            Err(e) => {
                warn!(error = %e, "Compression failed, using raw notes");
                Ok(Self::fallback(run, topic))
            }
        }
    }

    async fn compress(
        ctx: &AgentContext,
        run: &mut WorkflowRun,
        topic: &str,
        memory: &[ChatTurn],
    ) -> Result<String> {
        let model = ctx.models.get(&run.research_id)?;

        let mut messages = vec![ChatTurn::system(prompts::compress_research_system())];
        // drop the researcher's own system prompt and task
        messages.extend(memory.iter().skip(2).cloned());
        messages.push(ChatTurn::user(prompts::compress_research_request(topic)));

        let response = model.chat(ChatRequest::new(messages)).await?;
        run.usage.record(&response.usage);
        Ok(response.message.content)
    }

    fn fallback(run: &WorkflowRun, topic: &str) -> String {
        if run.raw_notes.is_empty() {
            return format!("No findings were gathered for: {}", topic);
        }
        truncate_chars(&run.raw_notes.join("\n"), RAW_NOTES_FALLBACK_CHARS).to_string()
    }
}
