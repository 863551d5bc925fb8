//! Scope phase: decide whether the request needs clarification, then turn
//! the conversation into a research brief.

use crate::llm::{ChatRequest, ChatRole, ChatTurn};
use crate::research::AgentContext;
use crate::research::prompts;
use crate::research::search::truncate_chars;
use crate::research::state::WorkflowRun;
use crate::timeline::NewEvent;
use crate::types::{EventKind, EventStatus, MessageRole, Result, WorkflowStatus};
use crate::db::SessionMetadata;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

const TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyWithUser {
    #[serde(alias = "need_clarification")]
    pub need_clarification: bool,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub verification: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResearchQuestion {
    #[serde(alias = "research_brief")]
    pub research_brief: String,
}

fn clarify_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "needClarification": { "type": "boolean" },
            "question": { "type": "string" },
            "verification": { "type": "string" }
        },
        "required": ["needClarification", "question", "verification"],
        "additionalProperties": false
    })
}

fn brief_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": { "researchBrief": { "type": "string" } },
        "required": ["researchBrief"],
        "additionalProperties": false
    })
}

/// Render turns as `role: content` lines for templates.
pub fn buffer_string(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            format!("{}: {}", role, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Session title derived from the brief: first line, bounded length.
pub fn title_from_brief(brief: &str) -> String {
    let first_line = brief.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    truncate_chars(first_line, TITLE_CHARS).to_string()
}

pub struct Scope;

impl Scope {
    #[instrument(skip(ctx, run), fields(research_id = %run.research_id))]
    pub async fn run(ctx: &AgentContext, run: &mut WorkflowRun) -> Result<()> {
        run.status = WorkflowStatus::InScope;

        let request = run
            .chat_history
            .iter()
            .rev()
            .find(|turn| turn.role == ChatRole::User)
            .map(|turn| turn.content.clone())
            .unwrap_or_default();
        let scope_event = ctx
            .publisher
            .publish_event(
                &run.research_id,
                NewEvent::new(EventKind::Scope, "Analyzing your research request").content(request),
            )
            .await?;

        let model = ctx.models.get(&run.research_id)?;
        let mut memory = run.chat_history.clone();

        let clarify_request = ChatRequest::new(vec![ChatTurn::user(prompts::clarify_with_user(
            &buffer_string(&memory),
        ))])
        .with_response_format("clarify_with_user", clarify_schema());
        let clarify = match model.chat(clarify_request).await {
            Ok(response) => {
                run.usage.record(&response.usage);
                response.parse_json::<ClarifyWithUser>()
            }
            Err(e) => Err(e),
        };
        let clarify = match clarify {
            Ok(clarify) => clarify,
            Err(e) => {
                warn!(error = %e, "Clarification check failed");
                run.fail(format!("Could not analyze the request: {}", e));
                return Ok(());
            }
        };

        if clarify.need_clarification {
            ctx.publisher
                .publish_event(
                    &run.research_id,
                    NewEvent::new(EventKind::Scope, "More information needed")
                        .status(EventStatus::Completed)
                        .content(clarify.question.clone())
                        .parent(Some(scope_event)),
                )
                .await?;
            ctx.publisher
                .publish_message(&run.research_id, MessageRole::Assistant, &clarify.question)
                .await?;
            run.chat_history.push(ChatTurn::assistant(clarify.question));
            run.status = WorkflowStatus::NeedClarification;
            info!("Waiting for clarification");
            return Ok(());
        }

        ctx.publisher
            .publish_event(
                &run.research_id,
                NewEvent::new(EventKind::Scope, "Request understood")
                    .content(clarify.verification.clone())
                    .parent(Some(scope_event)),
            )
            .await?;
        memory.push(ChatTurn::assistant(clarify.verification));

        let brief_request = ChatRequest::new(vec![ChatTurn::user(prompts::research_brief(
            &buffer_string(&memory),
        ))])
        .with_response_format("research_question", brief_schema());
        let question = match model.chat(brief_request).await {
            Ok(response) => {
                run.usage.record(&response.usage);
                response.parse_json::<ResearchQuestion>()
            }
            Err(e) => Err(e),
        };
        let question = match question {
            Ok(question) if !question.research_brief.trim().is_empty() => question,
            Ok(_) => {
                run.fail("The research brief came back empty");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Research brief failed");
                run.fail(format!("Could not write a research brief: {}", e));
                return Ok(());
            }
        };

        ctx.publisher
            .publish_event(
                &run.research_id,
                NewEvent::new(EventKind::Scope, "Research plan ready")
                    .status(EventStatus::Completed)
                    .content(question.research_brief.clone())
                    .parent(Some(scope_event)),
            )
            .await?;

        ctx.publisher
            .records()
            .set_metadata(
                &run.research_id,
                &SessionMetadata {
                    model_id: None,
                    budget: None,
                    title: Some(title_from_brief(&question.research_brief)),
                },
            )
            .await?;

        run.research_brief = Some(question.research_brief);
        Ok(())
    }
}
