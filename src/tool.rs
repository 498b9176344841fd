//! Tool system: the contract between the agent and external effects.
//!
//! A [`Tool`] exposes a [`ToolDescriptor`] (name, description, parameter
//! schema) for model-side discovery and a `call` method the runtime invokes
//! when the model requests it. Tools report recoverable failures *inside*
//! their result map (`{"success": false, "error": …}`) and reserve `Err` for
//! infrastructure failures, which keeps the model in the loop for failures
//! it can react to.
//!
//! [`ToolCollection`] is a name-indexed dispatch over a set of tools.
//! Dispatch never coerces arguments: if the model sends `"duration": "1s"`
//! where a number was declared, the tool sees the string. The opt-in
//! [`ToolCollection::call_validated`] checks the declared schema first and
//! rejects (never transforms) mismatches.
//!
//! # Examples
//!
//! ```rust,no_run
//! use agent_core::tool::tool;
//! use serde_json::json;
//!
//! let clock = tool("current_time", "Current time in the given timezone")
//!     .param("timezone", "string")
//!     .build(|args| async move {
//!         let tz = args["timezone"].as_str().unwrap_or("UTC");
//!         Ok(json!({"current_time": "2024-01-01T00:00:00Z", "timezone": tz}))
//!     });
//! ```

use crate::message::{ToolCallPart, ToolCallResultPart};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One node of the parameter schema: a JSON-schema subset with types
/// object, array, string, integer, number, boolean.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterProperty {
    /// The type of the parameter.
    #[serde(rename = "type")]
    pub property_type: String,
    /// Description of what the parameter does.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    /// Element schema when the type is "array".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub items: Option<Box<ParameterProperty>>,
    /// Field schemas when the type is "object".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub properties: Option<BTreeMap<String, ParameterProperty>>,
    /// Required field names when the type is "object".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub required: Option<Vec<String>>,
}

impl ParameterProperty {
    fn of_type(property_type: &str) -> Self {
        Self {
            property_type: property_type.to_string(),
            description: None,
            items: None,
            properties: None,
            required: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::of_type("string").with_description(description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::of_type("integer").with_description(description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::of_type("number").with_description(description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::of_type("boolean").with_description(description)
    }

    pub fn array(items: ParameterProperty) -> Self {
        let mut property = Self::of_type("array");
        property.items = Some(Box::new(items));
        property
    }

    pub fn object(properties: BTreeMap<String, ParameterProperty>, required: Vec<String>) -> Self {
        let mut property = Self::of_type("object");
        property.properties = Some(properties);
        property.required = Some(required);
        property
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn matches(&self, value: &Value) -> bool {
        match self.property_type.as_str() {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => match (value.as_array(), &self.items) {
                (Some(elements), Some(items)) => elements.iter().all(|e| items.matches(e)),
                (Some(_), None) => true,
                _ => false,
            },
            "object" => value.is_object(),
            _ => false,
        }
    }
}

/// Top-level parameter schema of a tool: always an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParametersSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, ParameterProperty>,
    pub required: Vec<String>,
}

impl Default for ParametersSchema {
    fn default() -> Self {
        Self::object()
    }
}

impl ParametersSchema {
    /// An empty object schema.
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Add a required property.
    pub fn property(mut self, name: impl Into<String>, property: ParameterProperty) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, property);
        self
    }

    /// Add an optional property.
    pub fn optional(mut self, name: impl Into<String>, property: ParameterProperty) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    /// Check an argument map against the schema. Types are matched exactly,
    /// never coerced; extra arguments are allowed.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<()> {
        for name in &self.required {
            if !arguments.contains_key(name) {
                return Err(Error::invalid_input(format!("missing required argument: {name}")));
            }
        }
        for (name, value) in arguments {
            if let Some(property) = self.properties.get(name) {
                if !property.matches(value) {
                    return Err(Error::invalid_input(format!(
                        "argument {name} does not match declared type {}",
                        property.property_type
                    )));
                }
            }
        }
        Ok(())
    }
}

/// What a tool exposes to the model for discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: ParametersSchema,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParametersSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// An external effect the agent may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Discovery metadata: name, description, parameter schema.
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool. Implementations are expected to respect the
    /// cancellation token for long-running work.
    async fn call(
        &self,
        cancel: &CancellationToken,
        invocation: &ToolCallPart,
    ) -> Result<ToolCallResultPart>;
}

type ToolHandler = Arc<
    dyn Fn(CancellationToken, Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// Closure-backed [`Tool`].
#[derive(Clone)]
pub struct FnTool {
    descriptor: ToolDescriptor,
    handler: ToolHandler,
}

#[async_trait]
impl Tool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn call(
        &self,
        cancel: &CancellationToken,
        invocation: &ToolCallPart,
    ) -> Result<ToolCallResultPart> {
        let arguments = Value::Object(invocation.arguments.clone());
        let output = (self.handler)(cancel.clone(), arguments).await?;
        let result = match output {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Ok(ToolCallResultPart::new(
            invocation.id.clone(),
            invocation.name.clone(),
            result,
        ))
    }
}

/// Start building a closure-backed tool.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder {
        name: name.into(),
        description: description.into(),
        parameters: ParametersSchema::object(),
    }
}

/// Builder returned by [`tool`].
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: ParametersSchema,
}

impl ToolBuilder {
    /// Add a required parameter with a bare type name
    /// (string/integer/number/boolean).
    pub fn param(mut self, name: impl Into<String>, type_name: &str) -> Self {
        self.parameters = self
            .parameters
            .property(name, ParameterProperty::of_type(type_name));
        self
    }

    /// Add an optional parameter with a bare type name.
    pub fn optional_param(mut self, name: impl Into<String>, type_name: &str) -> Self {
        self.parameters = self
            .parameters
            .optional(name, ParameterProperty::of_type(type_name));
        self
    }

    /// Add a required parameter with a full property schema.
    pub fn typed_param(mut self, name: impl Into<String>, property: ParameterProperty) -> Self {
        self.parameters = self.parameters.property(name, property);
        self
    }

    /// Replace the whole parameter schema.
    pub fn parameters(mut self, parameters: ParametersSchema) -> Self {
        self.parameters = parameters;
        self
    }

    /// Finish with a handler that ignores cancellation.
    pub fn build<F, Fut>(self, handler: F) -> FnTool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.build_with_cancel(move |_cancel, args| {
            let handler = Arc::clone(&handler);
            async move { handler(args).await }
        })
    }

    /// Finish with a cancellation-aware handler.
    pub fn build_with_cancel<F, Fut>(self, handler: F) -> FnTool
    where
        F: Fn(CancellationToken, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        FnTool {
            descriptor: ToolDescriptor::new(self.name, self.description, self.parameters),
            handler: Arc::new(move |cancel, args| Box::pin(handler(cancel, args))),
        }
    }
}

/// Resolve a model-supplied path against a configured root, rejecting
/// anything that escapes it.
///
/// The resolution is lexical (no filesystem access), so it works for paths
/// that do not exist yet. Absolute inputs are rejected outright; `..`
/// segments may not climb past the root.
pub fn resolve_within_root(root: &Path, path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(Error::invalid_input(format!("path escapes the tool root: {path}")));
    }

    let mut resolved = root.to_path_buf();
    let mut depth: usize = 0;
    for component in candidate.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Error::invalid_input(format!(
                        "path escapes the tool root: {path}"
                    )));
                }
                depth -= 1;
                resolved.pop();
            }
            Component::Normal(segment) => {
                depth += 1;
                resolved.push(segment);
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::invalid_input(format!(
                    "path escapes the tool root: {path}"
                )));
            }
        }
    }

    debug_assert!(resolved.starts_with(root));
    Ok(resolved)
}

/// Name-indexed dispatch over a set of tools.
#[derive(Clone, Default)]
pub struct ToolCollection {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolCollection {
    /// Build a collection from trait objects.
    pub fn of_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Add one tool.
    pub fn push(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors of every tool, in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    fn find(&self, name: &str) -> Result<&Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| t.descriptor().name == name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// Route an invocation to the tool named in it. Arguments pass through
    /// untouched.
    pub async fn call(
        &self,
        cancel: &CancellationToken,
        invocation: &ToolCallPart,
    ) -> Result<ToolCallResultPart> {
        self.find(&invocation.name)?.call(cancel, invocation).await
    }

    /// Route an invocation after checking the arguments against the tool's
    /// declared schema. Mismatches are rejected, never transformed.
    pub async fn call_validated(
        &self,
        cancel: &CancellationToken,
        invocation: &ToolCallPart,
    ) -> Result<ToolCallResultPart> {
        let tool = self.find(&invocation.name)?;
        tool.descriptor().parameters.validate(&invocation.arguments)?;
        tool.call(cancel, invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn clock() -> FnTool {
        tool("current_time", "Current time in the given timezone")
            .param("timezone", "string")
            .build(|args| async move {
                let tz = args["timezone"].as_str().unwrap_or("UTC").to_string();
                Ok(json!({"current_time": "2024-01-01T00:00:00Z", "timezone": tz}))
            })
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let descriptor = clock().descriptor();
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["name"], "current_time");
        assert_eq!(value["parameters"]["type"], "object");
        assert_eq!(value["parameters"]["properties"]["timezone"]["type"], "string");
        assert_eq!(value["parameters"]["required"], json!(["timezone"]));
    }

    #[test]
    fn test_schema_builder_nested() {
        let schema = ParametersSchema::object()
            .property(
                "filters",
                ParameterProperty::array(ParameterProperty::string("one filter")),
            )
            .optional("limit", ParameterProperty::integer("max results"));

        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["properties"]["filters"]["type"], "array");
        assert_eq!(value["properties"]["filters"]["items"]["type"], "string");
        assert_eq!(value["required"], json!(["filters"]));
    }

    #[test]
    fn test_schema_validation_rejects_without_coercion() {
        let schema = ParametersSchema::object()
            .property("duration", ParameterProperty::number("seconds"));

        assert!(schema.validate(&args(json!({"duration": 1.5}))).is_ok());
        assert!(schema.validate(&args(json!({"duration": 2}))).is_ok());
        // A numeric string stays a string: mismatch.
        assert!(schema.validate(&args(json!({"duration": "1s"}))).is_err());
        assert!(schema.validate(&args(json!({}))).is_err());
        // Extra arguments are allowed.
        assert!(
            schema
                .validate(&args(json!({"duration": 1, "verbose": true})))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_fn_tool_call_wraps_non_object_output() {
        let doubler = tool("double", "Double a number")
            .param("n", "number")
            .build(|args| async move { Ok(json!(args["n"].as_f64().unwrap_or(0.0) * 2.0)) });

        let cancel = CancellationToken::new();
        let invocation = ToolCallPart::new("call_1", "double", args(json!({"n": 21})));
        let result = doubler.call(&cancel, &invocation).await.unwrap();
        assert_eq!(result.id, "call_1");
        assert_eq!(result.result["result"], json!(42.0));
    }

    #[tokio::test]
    async fn test_collection_dispatch_and_unknown_tool() {
        let collection = ToolCollection::of_tools(vec![Arc::new(clock())]);

        let cancel = CancellationToken::new();
        let invocation =
            ToolCallPart::new("call_1", "current_time", args(json!({"timezone": "UTC"})));
        let result = collection.call(&cancel, &invocation).await.unwrap();
        assert_eq!(result.name, "current_time");
        assert_eq!(result.result["timezone"], "UTC");

        let unknown = ToolCallPart::new("call_2", "missing_tool", Map::new());
        assert!(matches!(
            collection.call(&cancel, &unknown).await,
            Err(Error::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_call_validated_rejects_mismatch() {
        let collection = ToolCollection::of_tools(vec![Arc::new(clock())]);
        let cancel = CancellationToken::new();

        let bad = ToolCallPart::new("call_1", "current_time", args(json!({"timezone": 5})));
        assert!(matches!(
            collection.call_validated(&cancel, &bad).await,
            Err(Error::InvalidInput(_))
        ));

        // Plain dispatch passes the same arguments through untouched; the
        // tool sees the raw number and applies its own fallback.
        let result = collection.call(&cancel, &bad).await.unwrap();
        assert_eq!(result.result["timezone"], "UTC");
    }

    #[tokio::test]
    async fn test_cancellation_aware_tool() {
        let sleeper = tool("sleep", "Sleep for the given seconds")
            .param("seconds", "number")
            .build_with_cancel(|cancel, args| async move {
                let seconds = args["seconds"].as_f64().unwrap_or(0.0);
                tokio::select! {
                    _ = cancel.cancelled() => Ok(json!({"success": false, "error": "sleep cancelled"})),
                    _ = tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)) => {
                        Ok(json!({"success": true}))
                    }
                }
            });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let invocation = ToolCallPart::new("call_1", "sleep", args(json!({"seconds": 30})));
        let result = sleeper.call(&cancel, &invocation).await.unwrap();
        assert_eq!(result.result["error"], "sleep cancelled");
    }

    #[test]
    fn test_resolve_within_root() {
        let root = Path::new("/workspace/project");

        assert_eq!(
            resolve_within_root(root, "src/main.rs").unwrap(),
            PathBuf::from("/workspace/project/src/main.rs")
        );
        assert_eq!(
            resolve_within_root(root, "./src/../README.md").unwrap(),
            PathBuf::from("/workspace/project/README.md")
        );
        // Does not need to exist.
        assert_eq!(
            resolve_within_root(root, "brand/new/file.txt").unwrap(),
            PathBuf::from("/workspace/project/brand/new/file.txt")
        );

        assert!(resolve_within_root(root, "../outside").is_err());
        assert!(resolve_within_root(root, "src/../../outside").is_err());
        assert!(resolve_within_root(root, "/etc/passwd").is_err());
    }

    #[test]
    fn test_descriptors_in_registration_order() {
        let collection = ToolCollection::of_tools(vec![
            Arc::new(tool("b_tool", "b").build(|_| async { Ok(json!({})) })),
            Arc::new(tool("a_tool", "a").build(|_| async { Ok(json!({})) })),
        ]);
        let names: Vec<String> = collection
            .descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["b_tool", "a_tool"]);
    }
}
