//! Mutable state of one research run
//!
//! A single [`WorkflowRun`] is created per admission and passed by `&mut`
//! from the orchestrator through every phase and decision loop.

use crate::llm::{ChatTurn, TokenUsage};
use crate::types::WorkflowStatus;
use crate::utils::toml_config::BudgetLevelConfig;
use serde::Serialize;

/// Numeric caps for one run, resolved from a `[budget.levels.*]` tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Budget {
    pub level: String,
    pub max_conduct_count: u32,
    pub max_search_count: u32,
    pub max_concurrent_units: u32,
}

impl Budget {
    pub fn from_level(level: impl Into<String>, config: BudgetLevelConfig) -> Self {
        Self {
            level: level.into(),
            max_conduct_count: config.max_conduct_count,
            max_search_count: config.max_search_count,
            max_concurrent_units: config.max_concurrent_units,
        }
    }
}

/// Running token totals for a run, seeded from the session row so a
/// restarted run keeps counting where the previous one stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageAccumulator {
    input_tokens: i64,
    output_tokens: i64,
}

impl UsageAccumulator {
    pub fn with_totals(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn record(&mut self, usage: &TokenUsage) {
        self.input_tokens = self
            .input_tokens
            .saturating_add(i64::try_from(usage.input_tokens).unwrap_or(i64::MAX));
        self.output_tokens = self
            .output_tokens
            .saturating_add(i64::try_from(usage.output_tokens).unwrap_or(i64::MAX));
    }

    pub fn input_tokens(&self) -> i64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> i64 {
        self.output_tokens
    }
}

/// Per-run loop counters. Search counters are reset per delegation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopCounters {
    pub conduct_count: u32,
    pub supervisor_iterations: u32,
    pub search_count: u32,
    pub researcher_iterations: u32,
}

impl LoopCounters {
    pub fn start_delegation(&mut self) {
        self.search_count = 0;
        self.researcher_iterations = 0;
    }
}

/// Ids of the events that nested events hang under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventParents {
    pub supervisor: Option<i64>,
    pub research: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub research_id: String,
    pub status: WorkflowStatus,
    /// Why the run failed, when it did
    pub failure_reason: Option<String>,
    pub budget: Budget,
    pub counters: LoopCounters,
    /// Conversation with the user, oldest first
    pub chat_history: Vec<ChatTurn>,
    pub research_brief: Option<String>,
    /// Supervisor notes: reflections and compressed delegation results
    pub notes: Vec<String>,
    /// Researcher notes for the current delegation
    pub raw_notes: Vec<String>,
    pub report: Option<String>,
    pub parents: EventParents,
    pub usage: UsageAccumulator,
}

impl WorkflowRun {
    pub fn new(
        research_id: impl Into<String>,
        budget: Budget,
        chat_history: Vec<ChatTurn>,
        usage: UsageAccumulator,
    ) -> Self {
        Self {
            research_id: research_id.into(),
            status: WorkflowStatus::Start,
            failure_reason: None,
            budget,
            counters: LoopCounters::default(),
            chat_history,
            research_brief: None,
            notes: Vec::new(),
            raw_notes: Vec::new(),
            report: None,
            parents: EventParents::default(),
            usage,
        }
    }

    /// Mark the run failed. The first reason wins.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = WorkflowStatus::Failed;
        if self.failure_reason.is_none() {
            self.failure_reason = Some(reason.into());
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == WorkflowStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Budget {
        Budget::from_level(
            "MEDIUM",
            BudgetLevelConfig {
                max_conduct_count: 2,
                max_search_count: 3,
                max_concurrent_units: 2,
            },
        )
    }

    #[test]
    fn test_usage_accumulates_on_seed() {
        let mut usage = UsageAccumulator::with_totals(100, 40);
        usage.record(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        usage.record(&TokenUsage {
            input_tokens: 1,
            output_tokens: 1,
        });
        assert_eq!(usage.input_tokens(), 111);
        assert_eq!(usage.output_tokens(), 46);
    }

    #[test]
    fn test_fail_keeps_first_reason() {
        let mut run = WorkflowRun::new("r1", budget(), Vec::new(), UsageAccumulator::default());
        assert_eq!(run.status, WorkflowStatus::Start);

        run.fail("model unavailable");
        run.fail("later problem");
        assert!(run.is_failed());
        assert_eq!(run.failure_reason.as_deref(), Some("model unavailable"));
    }

    #[test]
    fn test_delegation_resets_search_allowance() {
        let mut counters = LoopCounters {
            conduct_count: 1,
            supervisor_iterations: 2,
            search_count: 3,
            researcher_iterations: 4,
        };
        counters.start_delegation();
        assert_eq!(counters.search_count, 0);
        assert_eq!(counters.researcher_iterations, 0);
        assert_eq!(counters.conduct_count, 1);
        assert_eq!(counters.supervisor_iterations, 2);
    }
}
