//! Static tool table for the decision loops.
//!
//! Every tool is declared once with its schema and the stages allowed to see
//! it. Model-supplied arguments are decoded into [`ToolInvocation`] here and
//! raw JSON goes no further.

use crate::types::{ToolCall, ToolDefinition};
use serde::Deserialize;
use serde_json::json;

pub const CONDUCT_RESEARCH: &str = "conductResearch";
pub const RESEARCH_COMPLETE: &str = "researchComplete";
pub const THINK: &str = "thinkTool";
pub const WEB_SEARCH: &str = "tavilySearch";

/// Which decision loop is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Supervisor,
    Researcher,
}

/// A decoded tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    ConductResearch { research_topic: String },
    ResearchComplete,
    Think { reflection: String },
    WebSearch { query: String, max_results: u32, topic: String },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    Unknown(String),

    #[error("Tool '{name}' is not available to the {stage:?} stage")]
    NotAllowed { name: String, stage: Stage },

    #[error("Invalid arguments for '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConductResearchArgs {
    research_topic: String,
}

#[derive(Deserialize)]
struct ThinkArgs {
    reflection: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: u32,
    #[serde(default = "default_topic")]
    topic: String,
}

fn default_max_results() -> u32 {
    3
}

fn default_topic() -> String {
    "general".to_string()
}

struct ToolSpec {
    definition: ToolDefinition,
    stages: &'static [Stage],
}

pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let specs = vec![
            ToolSpec {
                definition: ToolDefinition {
                    name: CONDUCT_RESEARCH.to_string(),
                    description: "Delegate a research task to a dedicated researcher. \
                                  Describe the sub-topic in full, standalone detail."
                        .to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "researchTopic": {
                                "type": "string",
                                "description": "The topic to research, at least a paragraph long"
                            }
                        },
                        "required": ["researchTopic"]
                    }),
                },
                stages: &[Stage::Supervisor],
            },
            ToolSpec {
                definition: ToolDefinition {
                    name: RESEARCH_COMPLETE.to_string(),
                    description: "Signal that the research gathered so far is sufficient."
                        .to_string(),
                    parameters: json!({"type": "object", "properties": {}}),
                },
                stages: &[Stage::Supervisor],
            },
            ToolSpec {
                definition: ToolDefinition {
                    name: THINK.to_string(),
                    description: "Record a reflection on progress, gaps and the next step."
                        .to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "reflection": {
                                "type": "string",
                                "description": "Your reflection on the research so far"
                            }
                        },
                        "required": ["reflection"]
                    }),
                },
                stages: &[Stage::Supervisor, Stage::Researcher],
            },
            ToolSpec {
                definition: ToolDefinition {
                    name: WEB_SEARCH.to_string(),
                    description: "Search the web. Returns summarized sources.".to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "query": { "type": "string", "description": "Search query" },
                            "maxResults": {
                                "type": "integer",
                                "description": "Maximum number of results (default 3)",
                                "default": 3
                            },
                            "topic": {
                                "type": "string",
                                "enum": ["general", "news", "finance"],
                                "default": "general"
                            }
                        },
                        "required": ["query"]
                    }),
                },
                stages: &[Stage::Researcher],
            },
        ];

        Self { specs }
    }

    /// Tool menu offered to a stage.
    pub fn definitions(&self, stage: Stage) -> Vec<ToolDefinition> {
        self.specs
            .iter()
            .filter(|spec| spec.stages.contains(&stage))
            .map(|spec| spec.definition.clone())
            .collect()
    }

    /// Decode a model tool call for the given stage.
    pub fn decode(&self, stage: Stage, call: &ToolCall) -> Result<ToolInvocation, ToolError> {
        let spec = self
            .specs
            .iter()
            .find(|spec| spec.definition.name == call.name)
            .ok_or_else(|| ToolError::Unknown(call.name.clone()))?;

        if !spec.stages.contains(&stage) {
            return Err(ToolError::NotAllowed {
                name: call.name.clone(),
                stage,
            });
        }

        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            name: call.name.clone(),
            reason: e.to_string(),
        };

        match call.name.as_str() {
            CONDUCT_RESEARCH => {
                let args: ConductResearchArgs = serde_json::from_str(raw).map_err(invalid)?;
                Ok(ToolInvocation::ConductResearch {
                    research_topic: args.research_topic,
                })
            }
            RESEARCH_COMPLETE => Ok(ToolInvocation::ResearchComplete),
            THINK => {
                let args: ThinkArgs = serde_json::from_str(raw).map_err(invalid)?;
                Ok(ToolInvocation::Think {
                    reflection: args.reflection,
                })
            }
            WEB_SEARCH => {
                let args: SearchArgs = serde_json::from_str(raw).map_err(invalid)?;
                Ok(ToolInvocation::WebSearch {
                    query: args.query,
                    max_results: args.max_results.clamp(1, 10),
                    topic: args.topic,
                })
            }
            other => Err(ToolError::Unknown(other.to_string())),
        }
    }
}
