//! Translation of tool server capabilities into backend function declarations.
//!
//! Every capability is published to the backend under an encoded name of the
//! form `MCP<serverIndex><kindTag>_<capabilityName>`, for example
//! `MCP0tool_echo` or `MCP2resourceTemplate_rows`. The name is the only thing
//! the backend hands back when it calls a function, so decoding it must
//! recover the owning server and the capability kind exactly.
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::models::tool::FunctionDescriptor;

pub const SERVER_PREFIX: &str = "MCP";

/// Longest function name accepted by OpenAI compatible backends
pub const MAX_NAME_LEN: usize = 64;

lazy_static! {
    static ref CAPABILITY_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    static ref ILLEGAL_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("property `{0}` has no type")]
    MissingType(String),

    #[error("property `{path}` has unsupported type `{type_name}`")]
    UnsupportedType { path: String, type_name: String },

    #[error("invalid capability name `{0}`")]
    InvalidName(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityKind {
    Tool,
    Resource,
    ResourceTemplate,
    Prompt,
}

impl CapabilityKind {
    pub fn tag(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Resource => "resource",
            CapabilityKind::ResourceTemplate => "resourceTemplate",
            CapabilityKind::Prompt => "prompt",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "tool" => Some(CapabilityKind::Tool),
            "resource" => Some(CapabilityKind::Resource),
            "resourceTemplate" => Some(CapabilityKind::ResourceTemplate),
            "prompt" => Some(CapabilityKind::Prompt),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One named operation exposed by a tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    pub name: String,
    pub description: String,
    /// Raw JSON schema of the arguments, as listed by the server
    pub schema: Value,
}

impl Capability {
    pub fn new<N, D>(kind: CapabilityKind, name: N, description: D, schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            kind,
            name: name.into(),
            description: description.into(),
            schema,
        }
    }
}

/// The result of decoding a backend function name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedName {
    pub server_index: usize,
    pub kind: CapabilityKind,
    pub capability: String,
}

/// Whether `name` only uses characters backends accept in function names
pub fn is_valid_name(name: &str) -> bool {
    CAPABILITY_NAME.is_match(name)
}

fn validate_name(name: &str) -> Result<(), CapabilityError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(CapabilityError::InvalidName(name.to_string()))
    }
}

/// Replace every character a backend would reject with `_`
pub fn sanitize_name(name: &str) -> String {
    ILLEGAL_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn encode_name(
    server_index: usize,
    kind: CapabilityKind,
    capability: &str,
) -> Result<String, CapabilityError> {
    validate_name(capability)?;
    let encoded = format!("{}{}{}_{}", SERVER_PREFIX, server_index, kind.tag(), capability);
    if encoded.len() > MAX_NAME_LEN {
        return Err(CapabilityError::InvalidName(format!(
            "{} (encoded name exceeds {} characters)",
            capability, MAX_NAME_LEN
        )));
    }
    Ok(encoded)
}

/// Inverse of [`encode_name`]. The kind tag ends at the first `_`, everything
/// after it is the capability name and may itself contain `_`.
pub fn decode_name(encoded: &str) -> Option<DecodedName> {
    let rest = encoded.strip_prefix(SERVER_PREFIX)?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let (index, rest) = rest.split_at(digits);
    // a leading zero could never have come out of encode_name
    if index.is_empty() || (index.len() > 1 && index.starts_with('0')) {
        return None;
    }
    let server_index: usize = index.parse().ok()?;

    let (tag, capability) = rest.split_once('_')?;
    let kind = CapabilityKind::from_tag(tag)?;
    if !CAPABILITY_NAME.is_match(capability) {
        return None;
    }

    Some(DecodedName {
        server_index,
        kind,
        capability: capability.to_string(),
    })
}

/// A parameter schema restricted to the types backends understand
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSchema {
    String {
        description: Option<String>,
        enumeration: Option<Vec<Value>>,
    },
    Number {
        description: Option<String>,
    },
    Integer {
        description: Option<String>,
    },
    Boolean {
        description: Option<String>,
    },
    Object {
        description: Option<String>,
        properties: BTreeMap<String, ParameterSchema>,
        required: Vec<String>,
    },
    Array {
        description: Option<String>,
        items: Box<ParameterSchema>,
    },
}

impl ParameterSchema {
    pub fn empty_object() -> Self {
        ParameterSchema::Object {
            description: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Parse a JSON schema node. `path` names the node in error messages.
    pub fn from_json(value: &Value, path: &str) -> Result<Self, CapabilityError> {
        let node = value.as_object().ok_or_else(|| {
            CapabilityError::InvalidSchema(format!("`{}` is not a schema object", display(path)))
        })?;
        let description = node
            .get("description")
            .and_then(Value::as_str)
            .map(String::from);

        let type_name = schema_type(node, path)?;
        match type_name {
            "string" => Ok(ParameterSchema::String {
                description,
                enumeration: node.get("enum").and_then(Value::as_array).cloned(),
            }),
            "number" => Ok(ParameterSchema::Number { description }),
            "integer" => Ok(ParameterSchema::Integer { description }),
            "boolean" => Ok(ParameterSchema::Boolean { description }),
            "object" => {
                let mut properties = BTreeMap::new();
                if let Some(props) = node.get("properties") {
                    let props = props.as_object().ok_or_else(|| {
                        CapabilityError::InvalidSchema(format!(
                            "`{}.properties` is not an object",
                            display(path)
                        ))
                    })?;
                    for (name, child) in props {
                        let child_path = join(path, name);
                        properties.insert(name.clone(), Self::from_json(child, &child_path)?);
                    }
                }
                let required = node
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .filter(|name| properties.contains_key(*name))
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(ParameterSchema::Object {
                    description,
                    properties,
                    required,
                })
            }
            "array" => {
                let items = node.get("items").ok_or_else(|| {
                    CapabilityError::InvalidSchema(format!(
                        "array `{}` has no items schema",
                        display(path)
                    ))
                })?;
                let items = Self::from_json(items, &join(path, "[]"))?;
                Ok(ParameterSchema::Array {
                    description,
                    items: Box::new(items),
                })
            }
            other => Err(CapabilityError::UnsupportedType {
                path: display(path).to_string(),
                type_name: other.to_string(),
            }),
        }
    }

    /// Render the schema in the JSON schema subset sent to the backend
    pub fn to_backend(&self) -> Value {
        let (type_name, description) = match self {
            ParameterSchema::String { description, .. } => ("string", description),
            ParameterSchema::Number { description } => ("number", description),
            ParameterSchema::Integer { description } => ("integer", description),
            ParameterSchema::Boolean { description } => ("boolean", description),
            ParameterSchema::Object { description, .. } => ("object", description),
            ParameterSchema::Array { description, .. } => ("array", description),
        };

        let mut out = Map::new();
        out.insert("type".to_string(), json!(type_name));
        if let Some(description) = description {
            out.insert("description".to_string(), json!(description));
        }

        match self {
            ParameterSchema::String {
                enumeration: Some(values),
                ..
            } => {
                out.insert("enum".to_string(), Value::Array(values.clone()));
            }
            ParameterSchema::Object {
                properties,
                required,
                ..
            } => {
                let properties: Map<String, Value> = properties
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.to_backend()))
                    .collect();
                out.insert("properties".to_string(), Value::Object(properties));
                if !required.is_empty() {
                    out.insert("required".to_string(), json!(required));
                }
            }
            ParameterSchema::Array { items, .. } => {
                out.insert("items".to_string(), items.to_backend());
            }
            _ => {}
        }
        Value::Object(out)
    }
}

/// JSON schema allows `"type": ["string", "null"]`; the first non-null entry wins
fn schema_type<'a>(node: &'a Map<String, Value>, path: &str) -> Result<&'a str, CapabilityError> {
    match node.get("type") {
        Some(Value::String(name)) => Ok(name.as_str()),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|name| *name != "null")
            .ok_or_else(|| CapabilityError::MissingType(display(path).to_string())),
        _ => Err(CapabilityError::MissingType(display(path).to_string())),
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

fn display(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

/// Materialize one capability of the server registered at `server_index`
pub fn translate(
    server_index: usize,
    capability: &Capability,
) -> Result<FunctionDescriptor, CapabilityError> {
    let name = encode_name(server_index, capability.kind, &capability.name)?;

    let parameters = match &capability.schema {
        Value::Null => ParameterSchema::empty_object(),
        schema => ParameterSchema::from_json(schema, "")?,
    };
    if !matches!(parameters, ParameterSchema::Object { .. }) {
        return Err(CapabilityError::InvalidSchema(
            "top level parameters must be an object".to_string(),
        ));
    }

    Ok(FunctionDescriptor::new(
        name,
        capability.description.clone(),
        parameters.to_backend(),
    ))
}
