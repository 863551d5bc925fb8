//! Workflow Engine
//!
//! Drives one run through Scope, Supervisor and Report. Each phase sets the
//! run status itself; the engine inspects it afterwards and decides whether
//! to continue, halt, or fail. The engine alone emits the user-visible error
//! event and always releases the run's model handle, sequence counter and
//! viewers, whatever happened.

use crate::db::SessionProgress;
use crate::research::{AgentContext, Report, Scope, Supervisor, WorkflowRun};
use crate::timeline::NewEvent;
use crate::types::{EventKind, EventStatus, Result, WorkflowStatus};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, instrument, warn};

/// How the phase sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Halt {
    /// Every phase ran, or a phase stopped the run with a recognized status
    Settled,
    /// A phase left the run in a status that is not a valid continuation
    Unexpected {
        phase: &'static str,
        status: WorkflowStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scope,
    Research,
    Report,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Scope => "scope",
            Phase::Research => "research",
            Phase::Report => "report",
        }
    }

    /// The status a phase leaves behind when the next phase may run.
    fn continues_with(self) -> WorkflowStatus {
        match self {
            Phase::Scope => WorkflowStatus::InScope,
            Phase::Research => WorkflowStatus::InResearch,
            Phase::Report => WorkflowStatus::InReport,
        }
    }
}

/// Classify the status a phase left. `None` means carry on.
fn after_phase(phase: Phase, status: WorkflowStatus) -> Option<Halt> {
    match status {
        s if s == phase.continues_with() => None,
        WorkflowStatus::Failed => Some(Halt::Settled),
        WorkflowStatus::NeedClarification if phase == Phase::Scope => Some(Halt::Settled),
        status => Some(Halt::Unexpected {
            phase: phase.name(),
            status,
        }),
    }
}

/// Orchestrates research runs
pub struct WorkflowEngine {
    ctx: AgentContext,
}

impl WorkflowEngine {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Execute a run to a final or paused status and release its resources.
    #[instrument(skip(self, run), fields(research_id = %run.research_id))]
    pub async fn execute(&self, mut run: WorkflowRun) -> WorkflowRun {
        let outcome = AssertUnwindSafe(self.drive(&mut run)).catch_unwind().await;

        let title = match outcome {
            Ok(Ok(Halt::Settled)) => "Research failed",
            Ok(Ok(Halt::Unexpected { phase, status })) => {
                error!(phase, %status, "Unexpected status after phase");
                run.fail(format!(
                    "The {} phase ended in unexpected state {}",
                    phase, status
                ));
                "Unexpected workflow state"
            }
            Ok(Err(e)) => {
                error!(error = %e, "Run aborted");
                run.fail(e.to_string());
                "Research failed"
            }
            Err(_) => {
                error!("Run panicked");
                run.fail("Internal error while running the research");
                "Research failed"
            }
        };

        if run.is_failed() {
            let reason = run
                .failure_reason
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
            error!(%reason, "Run failed");
            if let Err(e) = self
                .ctx
                .publisher
                .publish_event(
                    &run.research_id,
                    NewEvent::new(EventKind::Error, title)
                        .status(EventStatus::Failed)
                        .content(reason),
                )
                .await
            {
                warn!(error = %e, "Could not publish error event");
            }
        }

        // a resubmission can only follow the persisted status, so per-run
        // state must be gone by then
        self.release(&run);
        if let Err(e) = self.persist(&run).await {
            warn!(error = %e, "Could not persist final status");
        }
        // viewers joining from here on read the final status themselves
        self.ctx
            .publisher
            .hub()
            .complete(&run.research_id, run.status)
            .await;

        info!(
            status = %run.status,
            input_tokens = run.usage.input_tokens(),
            output_tokens = run.usage.output_tokens(),
            "Run finished"
        );
        run
    }

    async fn drive(&self, run: &mut WorkflowRun) -> Result<Halt> {
        run.status = WorkflowStatus::Start;
        self.persist(run).await?;

        Scope::run(&self.ctx, run).await?;
        if let Some(halt) = after_phase(Phase::Scope, run.status) {
            return Ok(halt);
        }
        self.persist(run).await?;

        Supervisor::run(&self.ctx, run).await?;
        if let Some(halt) = after_phase(Phase::Research, run.status) {
            return Ok(halt);
        }
        self.persist(run).await?;

        Report::run(&self.ctx, run).await?;
        if let Some(halt) = after_phase(Phase::Report, run.status) {
            return Ok(halt);
        }

        run.status = WorkflowStatus::Completed;
        Ok(Halt::Settled)
    }

    async fn persist(&self, run: &WorkflowRun) -> Result<()> {
        self.ctx
            .publisher
            .records()
            .update_progress(
                &run.research_id,
                SessionProgress {
                    status: run.status,
                    total_input_tokens: run.usage.input_tokens(),
                    total_output_tokens: run.usage.output_tokens(),
                },
            )
            .await
    }

    fn release(&self, run: &WorkflowRun) {
        self.ctx.publisher.finish(&run.research_id);
        self.ctx.models.remove(&run.research_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WorkflowStatus; 9] = [
        WorkflowStatus::New,
        WorkflowStatus::Queue,
        WorkflowStatus::Start,
        WorkflowStatus::InScope,
        WorkflowStatus::NeedClarification,
        WorkflowStatus::InResearch,
        WorkflowStatus::InReport,
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
    ];

    #[test]
    fn test_scope_outcomes() {
        for status in ALL {
            let expected = match status {
                WorkflowStatus::InScope => None,
                WorkflowStatus::NeedClarification | WorkflowStatus::Failed => Some(Halt::Settled),
                status => Some(Halt::Unexpected {
                    phase: "scope",
                    status,
                }),
            };
            assert_eq!(after_phase(Phase::Scope, status), expected, "{}", status);
        }
    }

    #[test]
    fn test_research_and_report_outcomes() {
        for (phase, next) in [
            (Phase::Research, WorkflowStatus::InResearch),
            (Phase::Report, WorkflowStatus::InReport),
        ] {
            for status in ALL {
                let expected = if status == next {
                    None
                } else if status == WorkflowStatus::Failed {
                    Some(Halt::Settled)
                } else {
                    Some(Halt::Unexpected {
                        phase: phase.name(),
                        status,
                    })
                };
                assert_eq!(after_phase(phase, status), expected, "{:?} {}", phase, status);
            }
        }
    }

    #[test]
    fn test_clarification_only_halts_after_scope() {
        assert_eq!(
            after_phase(Phase::Research, WorkflowStatus::NeedClarification),
            Some(Halt::Unexpected {
                phase: "research",
                status: WorkflowStatus::NeedClarification,
            })
        );
    }
}
