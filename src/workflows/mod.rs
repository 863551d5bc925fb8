//! Workflow orchestration
//!
//! One [`WorkflowEngine`] is shared by every run. A run moves through
//!
//! ```text
//! NEW -> QUEUE -> START -> IN_SCOPE -> IN_RESEARCH -> IN_REPORT -> COMPLETED
//!                              \-> NEED_CLARIFICATION
//! ```
//!
//! and may end in `FAILED` from any non-final status.
//!
//! # Usage
//!
//! ```ignore
//! let engine = WorkflowEngine::new(ctx);
//! let run = engine.execute(WorkflowRun::new(id, budget, history, usage)).await;
//! println!("Final status: {}", run.status);
//! ```

pub mod engine;

pub use engine::WorkflowEngine;
