use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ChatMessage;

/// Outcome of a scenario run.
///
/// Failure and inconclusive outcomes share the same shape (`success == false`); only the
/// reasoning tells them apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub success: bool,
    pub conversation: Vec<ChatMessage>,
    pub reasoning: String,
    pub met_criteria: Vec<String>,
    pub unmet_criteria: Vec<String>,
    pub triggered_failures: Vec<String>,
    /// Wall time of the whole run.
    pub total_duration: Duration,
    /// Time spent inside the agent under test.
    pub agent_duration: Duration,
}

impl ScenarioResult {
    /// Durations are left at zero; the engine stamps them.
    pub fn success(
        conversation: Vec<ChatMessage>,
        reasoning: impl Into<String>,
        met_criteria: Vec<String>,
    ) -> Self {
        Self {
            success: true,
            conversation,
            reasoning: reasoning.into(),
            met_criteria,
            ..Self::default()
        }
    }

    pub fn failure(
        conversation: Vec<ChatMessage>,
        reasoning: impl Into<String>,
        met_criteria: Vec<String>,
        unmet_criteria: Vec<String>,
        triggered_failures: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            conversation,
            reasoning: reasoning.into(),
            met_criteria,
            unmet_criteria,
            triggered_failures,
            ..Self::default()
        }
    }

    pub fn inconclusive(
        conversation: Vec<ChatMessage>,
        reasoning: impl Into<String>,
        met_criteria: Vec<String>,
        unmet_criteria: Vec<String>,
        triggered_failures: Vec<String>,
    ) -> Self {
        Self::failure(
            conversation,
            reasoning,
            met_criteria,
            unmet_criteria,
            triggered_failures,
        )
    }

    /// Bare `success == false` placeholder paired with run errors.
    pub fn aborted() -> Self {
        Self::default()
    }

    pub fn with_durations(mut self, total: Duration, agent: Duration) -> Self {
        self.total_duration = total;
        self.agent_duration = agent;
        self
    }

    pub fn log_details(&self) {
        tracing::info!(
            success = self.success,
            reasoning = %self.reasoning,
            met_criteria = ?self.met_criteria,
            unmet_criteria = ?self.unmet_criteria,
            triggered_failures = ?self.triggered_failures,
            total_duration = ?self.total_duration,
            agent_duration = ?self.agent_duration,
            messages = self.conversation.len(),
            "scenario result details"
        );
    }
}
