use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub strict: bool,
    pub parameters: FunctionParameters,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            strict: false,
            parameters: FunctionParameters::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_parameter(mut self, parameter: FunctionParameter) -> Self {
        self.add_parameter(parameter);
        self
    }

    pub fn add_parameter(&mut self, parameter: FunctionParameter) {
        let FunctionParameter {
            name,
            mut schema,
            description,
            required,
        } = parameter;

        if let Some(description) = description {
            if let Some(object) = schema.as_object_mut() {
                object.insert("description".to_string(), Value::String(description));
            }
        }

        if required {
            self.parameters.required.push(name.clone());
        }

        self.parameters.properties.insert(name, schema);
    }

    pub fn to_tool(&self) -> Tool {
        Tool::from(self.clone())
    }
}

/// JSON-Schema object describing a function's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
}

impl FunctionParameters {
    pub fn new() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: Some(false),
        }
    }
}

impl Default for FunctionParameters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct FunctionParameter {
    pub name: String,
    pub schema: Value,
    pub description: Option<String>,
    pub required: bool,
}

impl FunctionParameter {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            description: None,
            required: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: ToolType,
    pub function: FunctionDefinition,
}

impl From<FunctionDefinition> for Tool {
    fn from(function: FunctionDefinition) -> Self {
        Self {
            kind: ToolType::Function,
            function,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Function,
}

/// A call requested by the model. `arguments` is the decoded JSON bag; its shape is
/// whatever the model produced and must be validated by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
    pub raw_arguments: Option<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub kind: ToolCallType,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(function: FunctionCall) -> Self {
        Self {
            id: None,
            kind: ToolCallType::Function,
            function,
        }
    }

    pub fn with_kind(mut self, kind: ToolCallType) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, ToolCallType::Function)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallType {
    Function,
    /// Any call type other than `function`, kept verbatim.
    Other(String),
}

impl ToolCallType {
    pub fn as_str(&self) -> &str {
        match self {
            ToolCallType::Function => "function",
            ToolCallType::Other(kind) => kind,
        }
    }
}

impl From<&str> for ToolCallType {
    fn from(value: &str) -> Self {
        match value {
            "function" => ToolCallType::Function,
            other => ToolCallType::Other(other.to_string()),
        }
    }
}

impl Serialize for ToolCall {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ToolCall", 3)?;
        if let Some(id) = &self.id {
            state.serialize_field("id", id)?;
        }
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("function", &SerializableFunctionCall(&self.function))?;
        state.end()
    }
}

impl Serialize for ToolCallType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ToolCall {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize, Default)]
        struct RawFunctionCall {
            #[serde(default)]
            name: String,
            #[serde(default)]
            arguments: String,
        }

        #[derive(Deserialize)]
        struct RawToolCall {
            id: Option<String>,
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            function: Option<RawFunctionCall>,
        }

        let raw = RawToolCall::deserialize(deserializer)?;
        let kind = ToolCallType::from(raw.kind.as_str());
        let function = raw.function.unwrap_or_default();

        let arguments = match kind {
            ToolCallType::Function if !function.arguments.trim().is_empty() => {
                serde_json::from_str(&function.arguments).map_err(|error| {
                    serde::de::Error::custom(format!("failed to parse function arguments: {error}"))
                })?
            }
            ToolCallType::Function => Value::Object(serde_json::Map::new()),
            ToolCallType::Other(_) => Value::Null,
        };

        Ok(Self {
            id: raw.id,
            kind,
            function: FunctionCall {
                name: function.name,
                arguments,
                raw_arguments: Some(function.arguments),
            },
        })
    }
}

struct SerializableFunctionCall<'a>(&'a FunctionCall);

impl<'a> Serialize for SerializableFunctionCall<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("function", 2)?;
        state.serialize_field("name", &self.0.name)?;
        let raw = if let Some(raw) = &self.0.raw_arguments {
            raw.clone()
        } else {
            serde_json::to_string(&self.0.arguments)
                .map_err(|error| serde::ser::Error::custom(error.to_string()))?
        };
        state.serialize_field("arguments", &raw)?;
        state.end()
    }
}

/// Tool-choice directive. `Required` forces the model to call one of the offered tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    None,
    Auto,
    Required,
}
