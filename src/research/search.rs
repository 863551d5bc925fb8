//! Search agent: run one web search and turn the hits into researcher notes.

use crate::llm::ChatRequest;
use crate::llm::ChatTurn;
use crate::research::AgentContext;
use crate::research::prompts;
use crate::research::state::WorkflowRun;
use crate::timeline::NewEvent;
use crate::tools::{SearchHit, SearchRequest};
use crate::types::{EventKind, EventStatus, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummarySchema {
    summary: String,
    #[serde(default, alias = "key_excerpts")]
    key_excerpts: String,
}

fn summary_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "keyExcerpts": { "type": "string" }
        },
        "required": ["summary", "keyExcerpts"],
        "additionalProperties": false
    })
}

/// Keep the first hit for every URL, in provider order.
pub fn dedupe_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| !hit.url.is_empty() && seen.insert(hit.url.clone()))
        .collect()
}

/// First `max_chars` characters, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn format_results(query: &str, sources: &[String]) -> String {
    if sources.is_empty() {
        return format!("No search results found for: {}", query);
    }

    let mut output = format!("Search results for query: '{}'\n\n", query);
    for (i, source) in sources.iter().enumerate() {
        output.push_str(&format!("\n--- SOURCE {} ---\n", i + 1));
        output.push_str(source);
        output.push('\n');
        output.push_str(&"-".repeat(80));
        output.push('\n');
    }
    output
}

pub struct SearchAgent;

impl SearchAgent {
    #[instrument(skip(ctx, run), fields(research_id = %run.research_id))]
    pub async fn run(
        ctx: &AgentContext,
        run: &mut WorkflowRun,
        query: &str,
        max_results: u32,
        topic: &str,
    ) -> Result<String> {
        let search_event = ctx
            .publisher
            .publish_event(
                &run.research_id,
                NewEvent::new(EventKind::Search, format!("Searching: {}", query))
                    .parent(run.parents.research),
            )
            .await?;

        let hits = ctx
            .search
            .search(&SearchRequest::new(query, max_results, topic))
            .await;
        let hits = dedupe_hits(hits);
        if hits.is_empty() {
            warn!(query, "No search results");
            ctx.publisher
                .publish_event(
                    &run.research_id,
                    NewEvent::new(EventKind::Search, "Found 0 sources")
                        .status(EventStatus::Completed)
                        .parent(Some(search_event)),
                )
                .await?;
            return Ok(format_results(query, &[]));
        }

        ctx.publisher
            .publish_event(
                &run.research_id,
                NewEvent::new(EventKind::Search, format!("Found {} sources", hits.len()))
                    .content(
                        hits.iter()
                            .map(|hit| format!("{} ({})", hit.title, hit.url))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    )
                    .parent(Some(search_event)),
            )
            .await?;

        let mut sources = Vec::with_capacity(hits.len());
        for hit in &hits {
            sources.push(Self::describe(ctx, run, hit).await);
        }

        ctx.publisher
            .publish_event(
                &run.research_id,
                NewEvent::new(EventKind::Search, "Search results analyzed")
                    .status(EventStatus::Completed)
                    .parent(Some(search_event)),
            )
            .await?;

        Ok(format_results(query, &sources))
    }

    async fn describe(ctx: &AgentContext, run: &mut WorkflowRun, hit: &SearchHit) -> String {
        let content = hit.best_content();
        if content.chars().count() <= ctx.search_config.summarize_threshold {
            return format!("[{}]\nURL: {}\n{}", hit.title, hit.url, content);
        }

        let (summary, excerpts) = match Self::summarize(ctx, run, content).await {
            Ok(summary) => (summary.summary, summary.key_excerpts),
            Err(e) => {
                debug!(url = %hit.url, error = %e, "Summarization failed, keeping raw prefix");
                (
                    truncate_chars(content, ctx.search_config.fallback_chars).to_string(),
                    String::new(),
                )
            }
        };
        format!(
            "[{}]\nURL: {}\n<summary>{}</summary>\n<key_excerpts>{}</key_excerpts>",
            hit.title, hit.url, summary, excerpts
        )
    }

    async fn summarize(
        ctx: &AgentContext,
        run: &mut WorkflowRun,
        content: &str,
    ) -> Result<SummarySchema> {
        let model = ctx.models.get(&run.research_id)?;
        let request = ChatRequest::new(vec![ChatTurn::user(prompts::summarize_webpage(content))])
            .with_response_format("webpage_summary", summary_schema());
        let response = model.chat(request).await?;
        run.usage.record(&response.usage);
        response.parse_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: url.to_string(),
            content: "c".to_string(),
            raw_content: None,
        }
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let hits = dedupe_hits(vec![hit("a"), hit("b"), hit("a"), hit("")]);
        let urls: Vec<_> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b"]);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_format_results() {
        assert_eq!(format_results("q", &[]), "No search results found for: q");
        let out = format_results("q", &["one".to_string(), "two".to_string()]);
        assert!(out.starts_with("Search results for query: 'q'"));
        assert!(out.contains("--- SOURCE 1 ---\none"));
        assert!(out.contains("--- SOURCE 2 ---\ntwo"));
    }
}
