//! Supervisor: plans the research and delegates sub-topics to researchers.

use crate::llm::ChatTurn;
use crate::research::AgentContext;
use crate::research::decision_loop::{self, BUDGET_EXHAUSTED, LoopPolicy};
use crate::research::prompts;
use crate::research::researcher::Researcher;
use crate::research::search::truncate_chars;
use crate::research::state::WorkflowRun;
use crate::timeline::NewEvent;
use crate::tools::{Stage, ToolInvocation};
use crate::types::{EventKind, EventStatus, Result, WorkflowStatus};
use async_trait::async_trait;
use tracing::{error, info, instrument};

struct SupervisorPolicy;

#[async_trait]
impl LoopPolicy for SupervisorPolicy {
    fn stage(&self) -> Stage {
        Stage::Supervisor
    }

    fn counters(&self, run: &WorkflowRun) -> (u32, u32, u32) {
        (
            run.counters.conduct_count,
            run.budget.max_conduct_count,
            run.counters.supervisor_iterations,
        )
    }

    fn bump_iteration(&self, run: &mut WorkflowRun) {
        run.counters.supervisor_iterations += 1;
    }

    async fn act(
        &self,
        ctx: &AgentContext,
        run: &mut WorkflowRun,
        invocation: ToolInvocation,
    ) -> Result<String> {
        match invocation {
            ToolInvocation::ConductResearch { research_topic } => {
                if run.counters.conduct_count >= run.budget.max_conduct_count {
                    return Ok(BUDGET_EXHAUSTED.to_string());
                }
                run.counters.conduct_count += 1;
                let task = run.counters.conduct_count;

                let research_event = ctx
                    .publisher
                    .publish_event(
                        &run.research_id,
                        NewEvent::new(
                            EventKind::Research,
                            format!("Research task {}: {}", task, truncate_chars(&research_topic, 80)),
                        )
                        .content(research_topic.clone())
                        .parent(run.parents.supervisor),
                    )
                    .await?;
                run.parents.research = Some(research_event);

                let findings = Researcher::run(ctx, run, &research_topic).await?;

                ctx.publisher
                    .publish_event(
                        &run.research_id,
                        NewEvent::new(EventKind::Research, format!("Research task {} finished", task))
                            .status(EventStatus::Completed)
                            .parent(Some(research_event)),
                    )
                    .await?;
                run.parents.research = None;
                run.notes.push(findings.clone());
                Ok(findings)
            }
            ToolInvocation::Think { reflection } => {
                ctx.publisher
                    .publish_event(
                        &run.research_id,
                        NewEvent::new(EventKind::Supervisor, "Reviewing research progress")
                            .content(reflection.clone())
                            .parent(run.parents.supervisor),
                    )
                    .await?;
                let result = format!("Reflection recorded: {}", reflection);
                run.notes.push(result.clone());
                Ok(result)
            }
            other => Ok(format!("{:?} is not available to the supervisor", other)),
        }
    }
}

pub struct Supervisor;

impl Supervisor {
    /// Sets `IN_RESEARCH` and runs the delegation loop over the brief.
    /// A model failure marks the run failed.
    #[instrument(skip(ctx, run), fields(research_id = %run.research_id))]
    pub async fn run(ctx: &AgentContext, run: &mut WorkflowRun) -> Result<()> {
        run.status = WorkflowStatus::InResearch;
        let brief = run.research_brief.clone().unwrap_or_default();

        let supervisor_event = ctx
            .publisher
            .publish_event(
                &run.research_id,
                NewEvent::new(EventKind::Supervisor, "Planning research"),
            )
            .await?;
        run.parents.supervisor = Some(supervisor_event);

        let mut memory = vec![
            ChatTurn::system(prompts::lead_researcher(
                run.budget.max_concurrent_units,
                run.budget.max_conduct_count,
            )),
            ChatTurn::user(brief),
        ];

        match decision_loop::run_loop(&SupervisorPolicy, ctx, run, &mut memory).await {
            Ok(exit) => {
                info!(?exit, delegations = run.counters.conduct_count, notes = run.notes.len(), "Supervisor finished");
                ctx.publisher
                    .publish_event(
                        &run.research_id,
                        NewEvent::new(EventKind::Supervisor, "Research finished")
                            .status(EventStatus::Completed)
                            .parent(Some(supervisor_event)),
                    )
                    .await?;
            }
            Err(e) => {
                error!(error = %e, "Supervisor loop failed");
                run.fail(format!("Research planning failed: {}", e));
            }
        }
        Ok(())
    }
}
