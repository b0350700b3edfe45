//! Run configuration for a single PDF Hunter investigation.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for one orchestrator run.
///
/// Every constant the component spec calls out by name (review round cap,
/// step/action budgets, LLM timeouts, super-step budget) lives here rather
/// than as a literal buried in `orchestrator.rs`, so a run can be tuned
/// without touching code.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Minimum priority (1-10) an image/static finding must reach to be
    /// surfaced in the final report.
    pub priority_threshold: u8,

    /// Maximum number of review-and-revise rounds Agent B will run before
    /// accepting the current findings as final.
    pub review_rounds_max: u32,

    /// Maximum ReAct steps (LLM turns) per investigation mission.
    pub react_step_budget: u32,

    /// Soft limit on remote-state-mutating tool calls within one mission;
    /// crossing it nudges the agent toward wrapping up but does not abort.
    pub action_budget_soft: u32,

    /// Hard limit on remote-state-mutating tool calls; crossing it forces
    /// the loop to exit with `ReactStatus::ActionBudgetExhausted`.
    pub action_budget_hard: u32,

    /// Timeout for a plain-text LLM completion.
    pub llm_timeout_text: Duration,

    /// Timeout for a tool-calling LLM turn (usually slower: larger context).
    pub llm_timeout_tool: Duration,

    /// Upper bound on total orchestrator super-steps (A, B, C, D-per-url, E)
    /// across the whole run, guarding against an unbounded branch.
    pub global_super_step_budget: u32,

    /// Root directory under which this run's session directory is created.
    /// Every artifact this run writes must resolve under it; see
    /// `Session::path_for`.
    pub output_directory: PathBuf,
}

impl RunConfig {
    /// Conservative defaults for an unattended investigation run.
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            priority_threshold: 5,
            review_rounds_max: 2,
            react_step_budget: 12,
            action_budget_soft: 6,
            action_budget_hard: 15,
            llm_timeout_text: Duration::from_secs(60),
            llm_timeout_tool: Duration::from_secs(120),
            global_super_step_budget: 30,
            output_directory: output_directory.into(),
        }
    }

    pub fn with_priority_threshold(mut self, threshold: u8) -> Self {
        self.priority_threshold = threshold;
        self
    }

    pub fn with_review_rounds_max(mut self, rounds: u32) -> Self {
        self.review_rounds_max = rounds;
        self
    }

    pub fn with_action_budget(mut self, soft: u32, hard: u32) -> Self {
        debug_assert!(soft <= hard, "soft action budget must not exceed hard budget");
        self.action_budget_soft = soft;
        self.action_budget_hard = hard;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_figures() {
        let cfg = RunConfig::new("/tmp/out");
        assert_eq!(cfg.priority_threshold, 5);
        assert_eq!(cfg.review_rounds_max, 2);
        assert_eq!(cfg.react_step_budget, 12);
        assert_eq!(cfg.action_budget_soft, 6);
        assert_eq!(cfg.action_budget_hard, 15);
        assert_eq!(cfg.global_super_step_budget, 30);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = RunConfig::new("/tmp/out")
            .with_priority_threshold(7)
            .with_review_rounds_max(3)
            .with_action_budget(4, 10);
        assert_eq!(cfg.priority_threshold, 7);
        assert_eq!(cfg.review_rounds_max, 3);
        assert_eq!(cfg.action_budget_soft, 4);
        assert_eq!(cfg.action_budget_hard, 10);
    }
}
