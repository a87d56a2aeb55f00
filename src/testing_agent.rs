use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{
    error::{ArgumentError, TestingAgentError},
    functions::{FunctionDefinition, FunctionParameter, Tool, ToolChoice},
    providers::LLMProvider,
    result::ScenarioResult,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
};

pub const FINISH_TEST: &str = "finish_test";

const GREETING: &str = "Hello, how can I help you today?";

const SYSTEM_PROMPT_NAME: &str = "testing_agent_system";

const SYSTEM_PROMPT_TEMPLATE: &str = r#"
<role>
You are pretending to be a user, you are testing an AI Agent (shown as the user role) based on a scenario.
Approach this naturally, as a human user would, with very short inputs, few words, all lowercase, imperative, not periods, like when they google or talk to chatgpt.
</role>

<goal>
Your goal (assistant) is to interact with the Agent Under Test (user) as if you were a human user to see if it can complete the scenario successfully.
</goal>

<scenario>
{{description}}
</scenario>

<strategy>
{{strategy}}
</strategy>

<success_criteria>
{{success_criteria}}
</success_criteria>

<failure_criteria>
{{failure_criteria}}
</failure_criteria>

<execution_flow>
1. Generate the first message to start the scenario
2. After the Agent Under Test (user) responds, generate the next message to send to the Agent Under Test, keep repeating step 2 until the criteria match
3. If the test should end, use the finish_test tool to determine if success or failure criteria have been met
</execution_flow>

<rules>
1. Test should end immediately if a failure criteria is triggered
2. Test should continue until all success criteria have been met
3. DO NOT make any judgment calls that are not explicitly listed in the success or failure criteria, withhold judgement if necessary
4. DO NOT carry over any requests yourself, YOU ARE NOT the assistant today, wait for the user to do it
</rules>
"#;

const FINISH_TEST_MESSAGE: &str = r#"
System:

<finish_test>
This is the last message, conversation has reached the maximum number of turns, give your final verdict,
if you don't have enough information to make a verdict, say inconclusive with max turns reached.
</finish_test>"#;

static SYSTEM_PROMPT: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .register_template_string(SYSTEM_PROMPT_NAME, SYSTEM_PROMPT_TEMPLATE)
        .expect("testing agent system prompt is a valid template");
    registry
});

static FINISH_TEST_TOOL: Lazy<Tool> = Lazy::new(|| {
    let criteria = |description: &str| {
        json!({
            "type": "array",
            "items": { "type": "string" },
            "description": description,
        })
    };

    FunctionDefinition::new(FINISH_TEST)
        .with_description("Complete the test with a final verdict")
        .strict()
        .with_parameter(
            FunctionParameter::new(
                "verdict",
                json!({ "type": "string", "enum": ["success", "failure", "inconclusive"] }),
            )
            .with_description("The final verdict of the test"),
        )
        .with_parameter(
            FunctionParameter::new("reasoning", json!({ "type": "string" }))
                .with_description("Explanation of why this verdict was reached"),
        )
        .with_parameter(
            FunctionParameter::new(
                "details",
                json!({
                    "type": "object",
                    "properties": {
                        "met_criteria": criteria("List of success criteria that have been met"),
                        "unmet_criteria": criteria("List of success criteria that have not been met"),
                        "triggered_failures": criteria("List of failure criteria that have been triggered"),
                    },
                    "required": ["met_criteria", "unmet_criteria", "triggered_failures"],
                    "additionalProperties": false,
                }),
            )
            .with_description("Detailed information about criteria evaluation"),
        )
        .to_tool()
});

/// The `finish_test` tool offered to the testing agent on every turn.
pub fn finish_test_tool() -> Tool {
    FINISH_TEST_TOOL.clone()
}

/// Everything the testing agent sees when asked for its next move.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub description: &'a str,
    pub strategy: &'a str,
    pub success_criteria: &'a [String],
    pub failure_criteria: &'a [String],
    pub conversation: &'a [ChatMessage],
    pub first_message: bool,
    pub last_message: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Text to send to the agent under test.
    Message(String),
    /// The test is over. Durations are not yet stamped.
    Verdict(ScenarioResult),
}

#[async_trait]
pub trait TestingAgent: Send + Sync {
    async fn generate_next_message(
        &self,
        context: &TurnContext<'_>,
    ) -> Result<NextStep, TestingAgentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
    Inconclusive,
}

impl Verdict {
    /// Total over all strings: anything unrecognised is inconclusive.
    pub fn parse(value: &str) -> Self {
        match value {
            "success" => Verdict::Success,
            "failure" => Verdict::Failure,
            _ => Verdict::Inconclusive,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishTestArguments {
    pub verdict: Verdict,
    pub reasoning: String,
    pub met_criteria: Vec<String>,
    pub unmet_criteria: Vec<String>,
    pub triggered_failures: Vec<String>,
}

impl FinishTestArguments {
    pub fn from_value(arguments: &Value) -> Result<Self, ArgumentError> {
        let verdict = arguments
            .get("verdict")
            .and_then(Value::as_str)
            .ok_or(ArgumentError::NotAString { field: "verdict" })?;
        let reasoning = arguments
            .get("reasoning")
            .and_then(Value::as_str)
            .ok_or(ArgumentError::NotAString { field: "reasoning" })?;
        let details = arguments
            .get("details")
            .and_then(Value::as_object)
            .ok_or(ArgumentError::DetailsNotAMap)?;

        Ok(Self {
            verdict: Verdict::parse(verdict),
            reasoning: reasoning.to_string(),
            met_criteria: string_array(details, "met_criteria")?,
            unmet_criteria: string_array(details, "unmet_criteria")?,
            triggered_failures: string_array(details, "triggered_failures")?,
        })
    }

    pub fn into_result(self, conversation: Vec<ChatMessage>) -> ScenarioResult {
        let Self {
            verdict,
            reasoning,
            met_criteria,
            unmet_criteria,
            triggered_failures,
        } = self;

        match verdict {
            Verdict::Success => ScenarioResult::success(conversation, reasoning, met_criteria),
            Verdict::Failure => ScenarioResult::failure(
                conversation,
                reasoning,
                met_criteria,
                unmet_criteria,
                triggered_failures,
            ),
            Verdict::Inconclusive => ScenarioResult::inconclusive(
                conversation,
                reasoning,
                met_criteria,
                unmet_criteria,
                triggered_failures,
            ),
        }
    }
}

// Absent and null both read as "nothing listed".
fn string_array(
    details: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<String>, ArgumentError> {
    match details.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or(ArgumentError::ItemNotAString { field, index })
            })
            .collect(),
        Some(_) => Err(ArgumentError::NotAnArray { field }),
    }
}

#[derive(Serialize)]
struct SystemPromptParams<'a> {
    description: &'a str,
    strategy: &'a str,
    success_criteria: String,
    failure_criteria: String,
}

pub fn render_system_prompt(context: &TurnContext<'_>) -> Result<String, TestingAgentError> {
    let params = SystemPromptParams {
        description: context.description,
        strategy: context.strategy,
        success_criteria: serde_json::to_string_pretty(context.success_criteria)?,
        failure_criteria: serde_json::to_string_pretty(context.failure_criteria)?,
    };

    Ok(SYSTEM_PROMPT.render(SYSTEM_PROMPT_NAME, &params)?)
}

/// Swaps user and assistant on every message without tool calls, so the backend's
/// assistant turn becomes the simulated user's reply.
pub fn invert_roles(messages: &mut [ChatMessage]) {
    for message in messages.iter_mut().filter(|message| !message.has_tool_calls()) {
        message.role = message.role.inverted();
    }
}

/// Transcript as the completion backend sees it, roles already inverted.
pub fn build_messages(context: &TurnContext<'_>) -> Result<Vec<ChatMessage>, TestingAgentError> {
    let mut messages = Vec::with_capacity(context.conversation.len() + 3);
    messages.push(ChatMessage::system(render_system_prompt(context)?));
    messages.push(ChatMessage::assistant(GREETING));
    messages.extend(context.conversation.iter().cloned());
    if context.last_message {
        messages.push(ChatMessage::user(FINISH_TEST_MESSAGE));
    }

    invert_roles(&mut messages);
    Ok(messages)
}

fn interpret(
    response: CompletionResponse,
    conversation: &[ChatMessage],
) -> Result<NextStep, TestingAgentError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(TestingAgentError::NoChoices)?;
    let message = choice.message;

    if let Some(call) = message.tool_calls.first() {
        if !call.is_function() {
            return Err(TestingAgentError::NotAFunction);
        }

        if call.function.name == FINISH_TEST {
            let arguments = FinishTestArguments::from_value(&call.function.arguments)?;
            tracing::debug!(verdict = ?arguments.verdict, "testing agent finished the test");
            return Ok(NextStep::Verdict(arguments.into_result(conversation.to_vec())));
        }
    }

    match message.content {
        Some(content) if !content.is_empty() => Ok(NextStep::Message(content)),
        _ => Err(TestingAgentError::NoContent),
    }
}

/// Testing agent backed by a chat-completion provider.
pub struct LLMTestingAgent {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LLMTestingAgent {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: Some(0.0),
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TestingAgent for LLMTestingAgent {
    async fn generate_next_message(
        &self,
        context: &TurnContext<'_>,
    ) -> Result<NextStep, TestingAgentError> {
        let messages = build_messages(context)?;
        let mut request =
            CompletionRequest::new(self.model.clone(), messages).with_tool(finish_test_tool());

        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if context.last_message {
            request = request.with_tool_choice(ToolChoice::Required);
        }

        tracing::debug!(
            provider = self.provider.name(),
            model = %self.model,
            first_message = context.first_message,
            last_message = context.last_message,
            messages = request.messages.len(),
            "requesting testing agent completion"
        );

        let response = self.provider.complete(request).await?;
        interpret(response, context.conversation)
    }
}
