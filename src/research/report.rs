//! Report phase: stream the final report to viewers and store it.

use crate::llm::{ChatRequest, ChatTurn, StreamDelta};
use crate::research::AgentContext;
use crate::research::prompts;
use crate::research::state::WorkflowRun;
use crate::timeline::NewEvent;
use crate::types::{EventKind, EventStatus, MessageRole, Result, WorkflowStatus};
use futures::StreamExt;
use tracing::{error, info, instrument};

pub struct Report;

impl Report {
    #[instrument(skip(ctx, run), fields(research_id = %run.research_id))]
    pub async fn run(ctx: &AgentContext, run: &mut WorkflowRun) -> Result<()> {
        run.status = WorkflowStatus::InReport;

        let report_event = ctx
            .publisher
            .publish_event(&run.research_id, NewEvent::new(EventKind::Report, "Writing report"))
            .await?;

        let brief = run.research_brief.clone().unwrap_or_default();
        let request = ChatRequest::new(vec![ChatTurn::user(prompts::final_report(
            &brief,
            &run.notes.join("\n"),
        ))]);

        let report = match Self::stream_report(ctx, run, request).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Report generation failed");
                run.fail(format!("Report generation failed: {}", e));
                return Ok(());
            }
        };
        if report.trim().is_empty() {
            run.fail("The model returned an empty report");
            return Ok(());
        }

        ctx.publisher
            .publish_message(&run.research_id, MessageRole::Assistant, &report)
            .await?;
        ctx.publisher
            .publish_event(
                &run.research_id,
                NewEvent::new(EventKind::Report, "Report ready")
                    .status(EventStatus::Completed)
                    .parent(Some(report_event)),
            )
            .await?;

        info!(chars = report.len(), "Report written");
        run.report = Some(report);
        Ok(())
    }

    async fn stream_report(
        ctx: &AgentContext,
        run: &mut WorkflowRun,
        request: ChatRequest,
    ) -> Result<String> {
        let model = ctx.models.get(&run.research_id)?;
        let mut deltas = model.stream_chat(request).await?;

        let mut report = String::new();
        while let Some(delta) = deltas.next().await {
            match delta? {
                StreamDelta::Text(text) => {
                    ctx.publisher.publish_report_stream(&run.research_id, &text);
                    report.push_str(&text);
                }
                StreamDelta::Usage(usage) => run.usage.record(&usage),
            }
        }
        Ok(report)
    }
}
