use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::FunctionDescriptor;

#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// Variables available to the configured system instruction template
#[derive(Debug, Clone, Serialize)]
pub struct InstructionContext {
    pub model: String,
    pub date: String,
    pub tools: Vec<ToolSummary>,
    pub servers: Vec<String>,
}

impl InstructionContext {
    pub fn new(model: &str, tools: &[FunctionDescriptor], servers: Vec<String>) -> Self {
        Self {
            model: model.to_string(),
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            tools: tools
                .iter()
                .map(|tool| ToolSummary {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                })
                .collect(),
            servers,
        }
    }
}

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}
