use std::{fmt, time::Duration};

use thiserror::Error;

use crate::result::ScenarioResult;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),
}

/// Failure to read the `finish_test` argument bag. Each variant names the field at fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("{field} is not a string")]
    NotAString { field: &'static str },

    #[error("details is not a map")]
    DetailsNotAMap,

    #[error("item at index {index} in {field} is not a string")]
    ItemNotAString { field: &'static str, index: usize },

    #[error("{field} is not a valid string array or null")]
    NotAnArray { field: &'static str },
}

#[derive(Debug, Error)]
pub enum TestingAgentError {
    #[error("failed to render system prompt: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("failed to serialize criteria: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to generate llm completion: {0}")]
    Completion(#[from] LLMError),

    #[error("no choices returned")]
    NoChoices,

    #[error("tool call is not a function")]
    NotAFunction,

    #[error("no content returned in choice")]
    NoContent,

    #[error("failed to extract finish_test parameters: {0}")]
    Arguments(#[from] ArgumentError),
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("agent not set")]
    AgentNotSet,

    #[error("testing agent not set")]
    TestingAgentNotSet,

    #[error("failed to generate initial message: {0}")]
    InitialMessage(#[source] TestingAgentError),

    #[error("initial message generated a result which is unexpected: {reasoning}")]
    UnexpectedInitialVerdict { reasoning: String },

    #[error("failed to run agent: {0}")]
    AgentRun(#[source] BoxError),

    #[error("no messages returned from agent")]
    EmptyAgentResponse,

    #[error("failed to generate next message: {0}")]
    NextMessage(#[source] TestingAgentError),

    #[error("scenario run was cancelled")]
    Cancelled,

    #[error("scenario run timed out after {0:?}")]
    TimedOut(Duration),
}

/// A failed run. Carries the partial result built at the point of failure so callers
/// can still inspect durations and criteria.
#[derive(Debug)]
pub struct RunError {
    error: ScenarioError,
    partial: Box<ScenarioResult>,
}

impl RunError {
    pub fn new(error: ScenarioError, partial: ScenarioResult) -> Self {
        Self {
            error,
            partial: Box::new(partial),
        }
    }

    pub fn kind(&self) -> &ScenarioError {
        &self.error
    }

    pub fn partial(&self) -> &ScenarioResult {
        &self.partial
    }

    pub fn into_parts(self) -> (ScenarioError, ScenarioResult) {
        (self.error, *self.partial)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.error)
    }
}
