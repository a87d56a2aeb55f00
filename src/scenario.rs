use std::{
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::{
    agents::Agent,
    error::{RunError, ScenarioError},
    history::ChatHistory,
    result::ScenarioResult,
    testing_agent::{NextStep, TestingAgent, TurnContext},
    types::{ChatMessage, MessageRole},
};

pub const DEFAULT_STRATEGY: &str =
    "Start with a first message and guide the conversation to play out the scenario.";

pub const DEFAULT_MAX_TURNS: i64 = 10;

/// A configured test case: what the simulated user is after, how success and failure
/// are judged, the turn budget, and the two parties to the conversation.
///
/// The transcript accumulates across calls to [`Scenario::run`]; build a fresh
/// scenario for each run.
pub struct Scenario {
    description: String,
    strategy: String,
    success_criteria: Vec<String>,
    failure_criteria: Vec<String>,
    max_turns: i64,
    timeout: Option<Duration>,
    agent: Option<Box<dyn Agent>>,
    testing_agent: Option<Arc<dyn TestingAgent>>,
    conversation: ChatHistory,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("description", &self.description)
            .field("strategy", &self.strategy)
            .field("success_criteria", &self.success_criteria)
            .field("failure_criteria", &self.failure_criteria)
            .field("max_turns", &self.max_turns)
            .field("timeout", &self.timeout)
            .field("has_agent", &self.agent.is_some())
            .field("has_testing_agent", &self.testing_agent.is_some())
            .field("conversation_len", &self.conversation.len())
            .finish()
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario {
    pub fn new() -> Self {
        Self {
            description: String::new(),
            strategy: DEFAULT_STRATEGY.to_string(),
            success_criteria: Vec::new(),
            failure_criteria: Vec::new(),
            max_turns: DEFAULT_MAX_TURNS,
            timeout: None,
            agent: None,
            testing_agent: None,
            conversation: ChatHistory::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Not validated: zero or negative budgets run no turns at all.
    pub fn with_max_turns(mut self, max_turns: i64) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_agent(mut self, agent: impl Agent + 'static) -> Self {
        self.agent = Some(Box::new(agent));
        self
    }

    pub fn with_testing_agent(mut self, testing_agent: Arc<dyn TestingAgent>) -> Self {
        self.testing_agent = Some(testing_agent);
        self
    }

    /// Replaces the success criteria. Order, duplicates and empty entries are kept.
    pub fn with_success_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the failure criteria. Order, duplicates and empty entries are kept.
    pub fn with_failure_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn success_criteria(&self) -> &[String] {
        &self.success_criteria
    }

    pub fn failure_criteria(&self) -> &[String] {
        &self.failure_criteria
    }

    pub fn max_turns(&self) -> i64 {
        self.max_turns
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_agent(&self) -> bool {
        self.agent.is_some()
    }

    pub fn has_testing_agent(&self) -> bool {
        self.testing_agent.is_some()
    }

    /// Everything exchanged so far, including turns cut short by an error.
    pub fn conversation(&self) -> &[ChatMessage] {
        self.conversation.messages()
    }

    pub async fn run(&mut self) -> Result<ScenarioResult, RunError> {
        self.run_with_cancellation(&CancellationToken::new()).await
    }

    /// Runs the turn loop until the testing agent renders a verdict or the turn budget
    /// is spent. Cancelling `cancel` aborts at the next collaborator call.
    pub async fn run_with_cancellation(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<ScenarioResult, RunError> {
        let Some(agent) = self.agent.as_mut() else {
            return Err(RunError::new(ScenarioError::AgentNotSet, ScenarioResult::aborted()));
        };
        let Some(testing_agent) = self.testing_agent.clone() else {
            return Err(RunError::new(
                ScenarioError::TestingAgentNotSet,
                ScenarioResult::aborted(),
            ));
        };

        let started = Instant::now();
        let mut agent_duration = Duration::ZERO;
        let guard = Interrupts::new(cancel, self.timeout);
        let abort = |error: ScenarioError, agent_duration: Duration| {
            tracing::warn!(error = %error, "scenario run aborted");
            RunError::new(
                error,
                ScenarioResult::aborted().with_durations(started.elapsed(), agent_duration),
            )
        };

        let opening = {
            let context = TurnContext {
                description: &self.description,
                strategy: &self.strategy,
                success_criteria: &self.success_criteria,
                failure_criteria: &self.failure_criteria,
                conversation: self.conversation.messages(),
                first_message: true,
                last_message: false,
            };
            guard
                .run(testing_agent.generate_next_message(&context))
                .await
                .map_err(|error| abort(error, agent_duration))?
                .map_err(|error| abort(ScenarioError::InitialMessage(error), agent_duration))?
        };

        let mut outgoing = match opening {
            NextStep::Message(text) => text,
            NextStep::Verdict(result) => {
                let error = ScenarioError::UnexpectedInitialVerdict {
                    reasoning: result.reasoning.clone(),
                };
                tracing::warn!(error = %error, "testing agent ended the test before it started");
                return Err(RunError::new(error, result));
            }
        };

        for turn in 0..self.max_turns {
            let last_message = turn == self.max_turns - 1;
            tracing::debug!(turn, last_message, "sending message to agent under test");

            self.conversation.push_user(outgoing.clone());

            let agent_started = Instant::now();
            let replies = guard
                .run(agent.run(&outgoing))
                .await
                .map_err(|error| abort(error, agent_duration))?
                .map_err(|error| abort(ScenarioError::AgentRun(error), agent_duration))?;
            if replies.is_empty() {
                return Err(abort(ScenarioError::EmptyAgentResponse, agent_duration));
            }

            let replies = strip_echoed_framing(replies);
            agent_duration += agent_started.elapsed();
            tracing::debug!(turn, replies = replies.len(), "agent under test replied");
            self.conversation.extend(replies);

            let context = TurnContext {
                description: &self.description,
                strategy: &self.strategy,
                success_criteria: &self.success_criteria,
                failure_criteria: &self.failure_criteria,
                conversation: self.conversation.messages(),
                first_message: false,
                last_message,
            };
            let step = guard
                .run(testing_agent.generate_next_message(&context))
                .await
                .map_err(|error| abort(error, agent_duration))?
                .map_err(|error| abort(ScenarioError::NextMessage(error), agent_duration))?;

            match step {
                NextStep::Verdict(result) => {
                    let result = result.with_durations(started.elapsed(), agent_duration);
                    tracing::info!(
                        turn,
                        success = result.success,
                        reasoning = %result.reasoning,
                        "testing agent rendered a verdict"
                    );
                    return Ok(result);
                }
                NextStep::Message(text) => outgoing = text,
            }
        }

        tracing::info!(max_turns = self.max_turns, "turn budget exhausted without a verdict");
        Ok(ScenarioResult::failure(
            self.conversation.snapshot(),
            format!(
                "The conversation did not end in a failure after {} turns.",
                self.max_turns
            ),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .with_durations(started.elapsed(), agent_duration))
    }
}

/// Drops a leading system message, then a leading user message, from an agent reply.
pub fn strip_echoed_framing(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    for framing in [MessageRole::System, MessageRole::User] {
        if messages.first().is_some_and(|message| message.role == framing) {
            messages.remove(0);
        }
    }
    messages
}

/// Races collaborator calls against cancellation and the run deadline.
struct Interrupts<'a> {
    cancel: &'a CancellationToken,
    deadline: Option<(tokio::time::Instant, Duration)>,
}

impl<'a> Interrupts<'a> {
    fn new(cancel: &'a CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|timeout| (tokio::time::Instant::now() + timeout, timeout)),
        }
    }

    async fn run<F: Future>(&self, future: F) -> Result<F::Output, ScenarioError> {
        let expired = async {
            match self.deadline {
                Some((deadline, timeout)) => {
                    tokio::time::sleep_until(deadline).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScenarioError::Cancelled),
            timeout = expired => Err(ScenarioError::TimedOut(timeout)),
            output = future => Ok(output),
        }
    }
}
