pub mod error;
pub mod providers;
pub mod types;
pub mod functions;
pub mod history;
pub mod agents;
pub mod testing_agent;
pub mod result;
pub mod scenario;
pub mod definition;

pub use error::{ArgumentError, BoxError, LLMError, RunError, ScenarioError, TestingAgentError};
pub use providers::LLMProvider;
pub use types::{
    ChatMessage, CompletionChoice, CompletionRequest, CompletionResponse, MessageRole, TokenUsage,
};
pub use functions::{
    FunctionCall, FunctionDefinition, FunctionParameter, FunctionParameters, Tool, ToolCall,
    ToolCallType, ToolChoice,
};
pub use history::ChatHistory;
pub use agents::{Agent, PromptAgent};
pub use testing_agent::{
    LLMTestingAgent,
    NextStep,
    TestingAgent,
    TurnContext,
    Verdict,
    FINISH_TEST,
};
pub use result::ScenarioResult;
pub use scenario::Scenario;
pub use definition::{AgentDefinition, DefinitionError, ScenarioDefinition};
pub use tokio_util::sync::CancellationToken;
