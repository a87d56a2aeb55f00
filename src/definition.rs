use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    agents::PromptAgent, scenario::Scenario, testing_agent::LLMTestingAgent, LLMProvider,
};

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml scenario: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid json scenario: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported scenario file: {0}")]
    UnsupportedFormat(PathBuf),
}

/// The agent under test, described as a prompt-driven [`PromptAgent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub instructions: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// A scenario as written in a YAML or JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub failure_criteria: Vec<String>,
    #[serde(default)]
    pub max_turns: Option<i64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub agent: AgentDefinition,
}

impl ScenarioDefinition {
    pub fn from_yaml_str(source: &str) -> Result<Self, DefinitionError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Parses a single file, picking the format from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let format = Format::of(path)
            .ok_or_else(|| DefinitionError::UnsupportedFormat(path.to_path_buf()))?;
        let source = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match format {
            Format::Yaml => Self::from_yaml_str(&source),
            Format::Json => Self::from_json_str(&source),
        }
    }

    /// Loads one file, or every `.yaml`/`.yml`/`.json` file in a directory sorted by path.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Self>, DefinitionError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Ok(vec![Self::from_path(path)?]);
        }

        let io_error = |source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(path).map_err(io_error)? {
            let file = entry.map_err(io_error)?.path();
            if file.is_file() && Format::of(&file).is_some() {
                files.push(file);
            }
        }
        files.sort();

        tracing::debug!(dir = %path.display(), files = files.len(), "loading scenario definitions");
        files.iter().map(Self::from_path).collect()
    }

    /// Wires up a scenario: a [`PromptAgent`] from the `agent` block and an
    /// [`LLMTestingAgent`], both backed by `provider`. `model` is used wherever the
    /// definition does not name one.
    pub fn build(&self, provider: Arc<dyn LLMProvider>, model: &str) -> Scenario {
        let agent_model = self.agent.model.as_deref().unwrap_or(model);
        let mut agent = PromptAgent::new(
            self.agent.name.clone().unwrap_or_else(|| self.name.clone()),
            self.agent.instructions.clone(),
            provider.clone(),
            agent_model,
        );
        if let Some(temperature) = self.agent.temperature {
            agent = agent.with_temperature(temperature);
        }

        let mut scenario = Scenario::new()
            .with_description(self.description.clone())
            .with_success_criteria(self.success_criteria.clone())
            .with_failure_criteria(self.failure_criteria.clone())
            .with_agent(agent)
            .with_testing_agent(Arc::new(LLMTestingAgent::new(provider, model)));

        if let Some(strategy) = &self.strategy {
            scenario = scenario.with_strategy(strategy.clone());
        }
        if let Some(max_turns) = self.max_turns {
            scenario = scenario.with_max_turns(max_turns);
        }
        if let Some(secs) = self.timeout_secs {
            scenario = scenario.with_timeout(Duration::from_secs(secs));
        }
        scenario
    }
}

enum Format {
    Yaml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Some(Self::Yaml),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{providers::scripted::ScriptedProvider, scenario::DEFAULT_STRATEGY};

    const RECIPE_YAML: &str = r#"
name: vegetarian-recipe
description: User is looking for a dinner idea
success_criteria:
  - Recipe agent generates a vegetarian recipe
  - Recipe includes step-by-step cooking instructions
failure_criteria:
  - The recipe includes meat
max_turns: 4
timeout_secs: 90
agent:
  instructions: You are a vegetarian recipe agent.
  temperature: 0.3
"#;

    #[test]
    fn parses_yaml_with_optional_fields() {
        let definition = ScenarioDefinition::from_yaml_str(RECIPE_YAML).unwrap();

        assert_eq!(definition.name, "vegetarian-recipe");
        assert_eq!(definition.success_criteria.len(), 2);
        assert_eq!(definition.failure_criteria, vec!["The recipe includes meat"]);
        assert_eq!(definition.max_turns, Some(4));
        assert_eq!(definition.timeout_secs, Some(90));
        assert!(definition.strategy.is_none());
        assert_eq!(definition.agent.temperature, Some(0.3));
        assert!(definition.agent.model.is_none());
    }

    #[test]
    fn json_criteria_default_to_empty() {
        let definition = ScenarioDefinition::from_json_str(
            r#"{"name":"n","description":"d","agent":{"instructions":"be brief"}}"#,
        )
        .unwrap();

        assert!(definition.success_criteria.is_empty());
        assert!(definition.failure_criteria.is_empty());
        assert!(definition.max_turns.is_none());
    }

    #[test]
    fn missing_agent_block_is_rejected() {
        let error = ScenarioDefinition::from_yaml_str("name: n\ndescription: d\n").unwrap_err();
        assert!(matches!(error, DefinitionError::Yaml(_)));
    }

    #[test]
    fn build_applies_overrides_and_defaults() {
        let provider = Arc::new(ScriptedProvider::new());

        let scenario = ScenarioDefinition::from_yaml_str(RECIPE_YAML)
            .unwrap()
            .build(provider.clone(), "gpt-4o-mini");
        assert_eq!(scenario.description(), "User is looking for a dinner idea");
        assert_eq!(scenario.strategy(), DEFAULT_STRATEGY);
        assert_eq!(scenario.max_turns(), 4);
        assert_eq!(scenario.timeout(), Some(Duration::from_secs(90)));
        assert!(scenario.has_agent());
        assert!(scenario.has_testing_agent());

        let mut definition = ScenarioDefinition::from_yaml_str(RECIPE_YAML).unwrap();
        definition.strategy = Some("Ask for something quick".to_string());
        definition.max_turns = None;
        let scenario = definition.build(provider, "gpt-4o-mini");
        assert_eq!(scenario.strategy(), "Ask for something quick");
        assert_eq!(scenario.max_turns(), 10);
    }

    #[test]
    fn loads_directories_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), RECIPE_YAML).unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{"name":"first","description":"d","agent":{"instructions":"i"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let definitions = ScenarioDefinition::load(dir.path()).unwrap();
        let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["first", "vegetarian-recipe"]);

        let single = ScenarioDefinition::load(dir.path().join("b.yaml")).unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn unknown_extensions_and_missing_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();

        let error = ScenarioDefinition::from_path(dir.path().join("scenario.toml")).unwrap_err();
        assert!(matches!(error, DefinitionError::UnsupportedFormat(_)));

        let error = ScenarioDefinition::from_path(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(error, DefinitionError::Io { .. }));
    }
}
