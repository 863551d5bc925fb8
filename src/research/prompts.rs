//! Prompt templates for the research phases.

use chrono::Utc;

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

pub fn clarify_with_user(messages: &str) -> String {
    format!(
        r#"You review a research request before any research starts and decide whether it is clear enough to begin.

<Messages>
{messages}
</Messages>

Today's date is {date}.

Ask for clarification only when the request contains unexplained acronyms or jargon, is too broad to research, can be read in several materially different ways, or depends on a time span or region that is not given. Do not ask again if a similar question is already in the history, and never ask for unnecessary background.

When you ask, collect everything you need in one question and prefer concrete options over open questions.

Respond with JSON only, no code fences:
{{"needClarification": true|false, "question": "<question when clarification is needed>", "verification": "<short confirmation of what will be researched otherwise>"}}"#,
        messages = messages,
        date = today()
    )
}

pub fn research_brief(messages: &str) -> String {
    format!(
        r#"Turn the conversation below into one detailed research brief that a researcher can act on without seeing the conversation.

<Messages>
{messages}
</Messages>

Today's date is {date}.

Keep every detail and constraint the user gave. State open dimensions as open rather than inventing preferences. Write in the user's language and in the first person.

Respond with JSON only, no code fences:
{{"researchBrief": "<the brief>"}}"#,
        messages = messages,
        date = today()
    )
}

pub fn lead_researcher(max_concurrent_units: u32, max_conduct_count: u32) -> String {
    format!(
        r#"You are a research supervisor. Today's date is {date}.

Break the research brief into focused sub-topics and delegate each with the conductResearch tool. Describe every sub-topic completely, since researchers cannot see the brief or each other's work. Use thinkTool to reflect on what has been found and what is missing before delegating again. Call researchComplete as soon as the findings are enough to write a thorough report.

Limits:
- At most {units} sub-topics per turn
- At most {conduct} delegations in total; prefer fewer, broader topics for simple questions"#,
        date = today(),
        units = max_concurrent_units,
        conduct = max_conduct_count
    )
}

pub fn researcher(max_search_count: u32) -> String {
    format!(
        r#"You are a researcher gathering information on one topic. Today's date is {date}.

Use tavilySearch to find sources, starting broad and narrowing down. After each search use thinkTool to judge what you learned and whether another search is needed. Stop once you can answer the topic comprehensively or after {searches} searches, whichever comes first."#,
        date = today(),
        searches = max_search_count
    )
}

pub fn compress_research_system() -> String {
    format!(
        r#"You clean up research findings gathered through tool calls. Today's date is {date}.

Rewrite the findings into a comprehensive, well organized summary. Keep every relevant fact and quote, drop duplicates and irrelevant material, and cite sources inline as [n] with a numbered source list at the end."#,
        date = today()
    )
}

pub fn compress_research_request(topic: &str) -> String {
    format!(
        "All findings above were gathered for this topic:\n\n{topic}\n\nClean them up now. Keep all relevant information verbatim where possible."
    )
}

pub fn summarize_webpage(content: &str) -> String {
    format!(
        r#"Summarize the web page below for a researcher. Today's date is {date}.

<webpage_content>
{content}
</webpage_content>

Keep the main facts, figures and conclusions. Pick up to five verbatim excerpts that matter most.

Respond with JSON only, no code fences:
{{"summary": "<summary>", "keyExcerpts": "<excerpts separated by new lines>"}}"#,
        date = today()
    )
}

pub fn final_report(brief: &str, findings: &str) -> String {
    format!(
        r#"Write the final research report. Today's date is {date}.

<Research Brief>
{brief}
</Research Brief>

<Findings>
{findings}
</Findings>

Write in the language of the brief using Markdown: a title, clearly structured sections and a concluding summary. Cite sources inline as [n] and end with a "Sources" list of numbered URLs."#,
        date = today()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_embed_inputs() {
        assert!(clarify_with_user("user: batteries").contains("user: batteries"));
        assert!(lead_researcher(2, 3).contains("At most 3 delegations"));
        assert!(final_report("brief text", "notes").contains("brief text"));
    }
}
