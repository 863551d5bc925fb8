//! Budget-bounded decide/act loop shared by the supervisor and researchers.
//!
//! Termination is checked before every Decide step: the primary budget is
//! spent, or the iteration count reached twice the primary budget. A turn
//! with no tool calls, or one that calls `researchComplete`, also ends the
//! loop. Tool results always go back into the loop memory so the model sees
//! what happened, including budget-exhausted sentinels and decode errors.

use crate::llm::{ChatRequest, ChatTurn};
use crate::research::AgentContext;
use crate::research::state::WorkflowRun;
use crate::tools::{Stage, ToolError, ToolInvocation};
use crate::types::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Result text handed to the model when an action would exceed its budget.
pub const BUDGET_EXHAUSTED: &str =
    "Budget exhausted: this action was not executed. Finish with what you have.";

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    BudgetSpent,
    IterationCap,
    NoToolCalls,
    Completed,
}

/// Returns the exit reason if a loop with these counters must stop.
pub fn budget_exit(primary: u32, max_primary: u32, iterations: u32) -> Option<LoopExit> {
    if primary >= max_primary {
        Some(LoopExit::BudgetSpent)
    } else if iterations >= max_primary.saturating_mul(2) {
        Some(LoopExit::IterationCap)
    } else {
        None
    }
}

/// The stage-specific half of a decision loop.
#[async_trait]
pub trait LoopPolicy: Send + Sync {
    fn stage(&self) -> Stage;

    /// (primary counter, primary budget, iteration counter)
    fn counters(&self, run: &WorkflowRun) -> (u32, u32, u32);

    fn bump_iteration(&self, run: &mut WorkflowRun);

    /// Execute one decoded invocation and return its result text.
    /// `ResearchComplete` never reaches this method.
    async fn act(
        &self,
        ctx: &AgentContext,
        run: &mut WorkflowRun,
        invocation: ToolInvocation,
    ) -> Result<String>;
}

/// Drive `policy` until one of the termination conditions holds.
///
/// `memory` must already hold the system prompt and the task; assistant and
/// tool-result turns are appended in place.
pub async fn run_loop<P: LoopPolicy + ?Sized>(
    policy: &P,
    ctx: &AgentContext,
    run: &mut WorkflowRun,
    memory: &mut Vec<ChatTurn>,
) -> Result<LoopExit> {
    let stage = policy.stage();
    let model = ctx.models.get(&run.research_id)?;
    let menu = ctx.tools.definitions(stage);

    loop {
        let (primary, max_primary, iterations) = policy.counters(run);
        if let Some(exit) = budget_exit(primary, max_primary, iterations) {
            debug!(research_id = %run.research_id, ?stage, ?exit, primary, iterations, "Decision loop finished");
            return Ok(exit);
        }

        let response = model
            .chat(ChatRequest::new(memory.clone()).with_tools(menu.clone()))
            .await?;
        run.usage.record(&response.usage);
        policy.bump_iteration(run);

        let calls = response.message.tool_calls.clone();
        memory.push(response.message);
        if calls.is_empty() {
            debug!(research_id = %run.research_id, ?stage, "Model requested no tools");
            return Ok(LoopExit::NoToolCalls);
        }

        let mut complete = false;
        for call in &calls {
            let result = match ctx.tools.decode(stage, call) {
                Ok(ToolInvocation::ResearchComplete) => {
                    complete = true;
                    "Research marked complete.".to_string()
                }
                Ok(invocation) => policy.act(ctx, run, invocation).await?,
                Err(e @ (ToolError::Unknown(_) | ToolError::NotAllowed { .. })) => {
                    warn!(research_id = %run.research_id, tool = %call.name, ?stage, "Skipping unavailable tool");
                    e.to_string()
                }
                Err(e) => {
                    warn!(research_id = %run.research_id, tool = %call.name, error = %e, "Skipping tool call");
                    e.to_string()
                }
            };
            memory.push(ChatTurn::tool_result(call, result));
        }

        if complete {
            return Ok(LoopExit::Completed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exit() {
        assert_eq!(budget_exit(0, 3, 0), None);
        assert_eq!(budget_exit(3, 3, 1), Some(LoopExit::BudgetSpent));
        assert_eq!(budget_exit(1, 2, 3), None);
        assert_eq!(budget_exit(1, 2, 4), Some(LoopExit::IterationCap));
        assert_eq!(budget_exit(0, 0, 0), Some(LoopExit::BudgetSpent));
    }
}
