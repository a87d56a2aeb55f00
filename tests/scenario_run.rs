use std::sync::Arc;

use async_trait::async_trait;
use scenario::{
    providers::scripted::ScriptedProvider, Agent, BoxError, ChatMessage, LLMTestingAgent,
    MessageRole, PromptAgent, Scenario, ScenarioDefinition, ToolChoice, FINISH_TEST,
};
use serde_json::json;

struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn run(&mut self, message: &str) -> Result<Vec<ChatMessage>, BoxError> {
        Ok(vec![ChatMessage::assistant(format!("echo: {message}"))])
    }
}

fn verdict(verdict: &str, reasoning: &str) -> serde_json::Value {
    json!({
        "verdict": verdict,
        "reasoning": reasoning,
        "details": {
            "met_criteria": ["Agent answers politely"],
            "unmet_criteria": [],
            "triggered_failures": null
        }
    })
}

fn roles(messages: &[ChatMessage]) -> Vec<MessageRole> {
    messages.iter().map(|message| message.role).collect()
}

#[tokio::test]
async fn testing_agent_sees_an_inverted_transcript_and_ends_with_success() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_text("need a dinner idea")
            .with_tool_call(FINISH_TEST, verdict("success", "agent replied")),
    );
    let testing_agent = Arc::new(LLMTestingAgent::new(provider.clone(), "test-model"));

    let mut scenario = Scenario::new()
        .with_description("User wants a quick dinner")
        .with_success_criteria(["Agent answers politely"])
        .with_agent(EchoAgent)
        .with_testing_agent(testing_agent)
        .with_max_turns(3);

    let result = scenario.run().await.expect("scenario should finish");

    assert!(result.success);
    assert_eq!(result.reasoning, "agent replied");
    assert_eq!(result.met_criteria, vec!["Agent answers politely"]);
    assert_eq!(
        result.conversation,
        vec![
            ChatMessage::user("need a dinner idea"),
            ChatMessage::assistant("echo: need a dinner idea"),
        ]
    );

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.model, "test-model");
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].function.name, FINISH_TEST);
        assert!(request.tool_choice.is_none());
    }

    let system = requests[0].messages[0].text().unwrap_or_default();
    assert!(system.contains("User wants a quick dinner"));
    assert!(system.contains("\"Agent answers politely\""));
    assert_eq!(
        roles(&requests[0].messages),
        vec![MessageRole::System, MessageRole::User]
    );
    assert_eq!(
        roles(&requests[1].messages),
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
        ]
    );
}

#[tokio::test]
async fn final_turn_forces_the_finish_test_tool() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_text("hi")
            .with_text("still there?")
            .with_tool_call(FINISH_TEST, verdict("inconclusive", "max turns reached")),
    );
    let mut scenario = Scenario::new()
        .with_agent(EchoAgent)
        .with_testing_agent(Arc::new(LLMTestingAgent::new(provider.clone(), "m")))
        .with_max_turns(2);

    let result = scenario.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.reasoning, "max turns reached");
    assert!(result.triggered_failures.is_empty());
    assert_eq!(result.conversation.len(), 4);

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].tool_choice.is_none());
    assert_eq!(requests[2].tool_choice, Some(ToolChoice::Required));

    let cue = requests[2].messages.last().expect("finish cue");
    assert_eq!(cue.role, MessageRole::Assistant);
    assert!(cue.text().unwrap_or_default().contains("<finish_test>"));
}

#[tokio::test]
async fn ignoring_the_final_cue_exhausts_the_budget() {
    let provider = Arc::new(ScriptedProvider::new().with_text("hi").with_text("bye"));
    let mut scenario = Scenario::new()
        .with_agent(EchoAgent)
        .with_testing_agent(Arc::new(LLMTestingAgent::new(provider.clone(), "m")))
        .with_max_turns(1);

    let result = scenario.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(
        result.reasoning,
        "The conversation did not end in a failure after 1 turns."
    );
    assert_eq!(result.conversation.len(), 2);
    assert_eq!(provider.remaining(), 0);
}

#[tokio::test]
async fn malformed_verdicts_abort_the_run() {
    let provider = Arc::new(ScriptedProvider::new().with_text("hi").with_tool_call(
        FINISH_TEST,
        json!({ "verdict": "success", "reasoning": "ok", "details": { "met_criteria": "all" } }),
    ));
    let mut scenario = Scenario::new()
        .with_agent(EchoAgent)
        .with_testing_agent(Arc::new(LLMTestingAgent::new(provider, "m")));

    let error = scenario.run().await.unwrap_err();

    assert_eq!(
        error.to_string(),
        "failed to generate next message: failed to extract finish_test parameters: \
         met_criteria is not a valid string array or null"
    );
    assert!(!error.partial().success);
    assert_eq!(scenario.conversation().len(), 2);
}

#[tokio::test]
async fn prompt_agent_under_test_keeps_its_own_history() {
    let agent_provider = Arc::new(
        ScriptedProvider::new()
            .with_text("what ingredients do you have?")
            .with_text("try a chickpea curry"),
    );
    let testing_provider = Arc::new(
        ScriptedProvider::new()
            .with_text("dinner idea")
            .with_text("chickpeas and rice")
            .with_tool_call(FINISH_TEST, verdict("success", "recipe suggested")),
    );
    let agent = PromptAgent::new(
        "recipes",
        "You are a vegetarian recipe agent.",
        agent_provider.clone(),
        "agent-model",
    );

    let mut scenario = Scenario::new()
        .with_agent(agent)
        .with_testing_agent(Arc::new(LLMTestingAgent::new(testing_provider, "m")));

    let result = scenario.run().await.unwrap();

    assert!(result.success);
    assert_eq!(result.conversation.len(), 4);
    assert_eq!(result.conversation[3].text(), Some("try a chickpea curry"));
    assert_eq!(result.conversation[3].name.as_deref(), Some("recipes"));

    let requests = agent_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
    assert_eq!(requests[1].messages[0].role, MessageRole::System);
}

#[tokio::test]
async fn definitions_build_runnable_scenarios() {
    let definition = ScenarioDefinition::from_yaml_str(
        r#"
name: greeting
description: User says hello
success_criteria: [Agent answers politely]
max_turns: 2
agent:
  instructions: Be polite.
  model: agent-model
"#,
    )
    .unwrap();
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_text("hello")
            .with_text("hello! how can i help?")
            .with_tool_call(FINISH_TEST, verdict("success", "polite")),
    );

    let mut scenario = definition.build(provider.clone(), "judge-model");
    let result = scenario.run().await.unwrap();

    assert!(result.success);
    let models: Vec<String> = provider
        .requests()
        .into_iter()
        .map(|request| request.model)
        .collect();
    assert_eq!(models, vec!["judge-model", "agent-model", "judge-model"]);
}
