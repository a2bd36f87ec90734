// Tool Permission Validator
//
// Pure check of a tool name against a ValidationContext snapshot. Each tool
// declares the requirements it needs; no requirements means always allowed.

use std::collections::HashMap;

use crate::models::guardrail::{ToolRequirement, ValidationContext, ValidationResult};

use super::tools::catalog;

/// Maps tool names to their declared requirements
#[derive(Debug, Clone)]
pub struct ToolPermissionValidator {
    requirements: HashMap<String, Vec<ToolRequirement>>,
}

impl ToolPermissionValidator {
    /// Empty validator; every tool is unknown until declared
    pub fn new() -> Self {
        Self {
            requirements: HashMap::new(),
        }
    }

    /// Validator covering the built-in tool catalog
    pub fn from_catalog() -> Self {
        let mut validator = Self::new();
        for tool in catalog() {
            validator.declare(tool.name, tool.requirements.to_vec());
        }
        validator
    }

    pub fn declare(&mut self, tool_name: impl Into<String>, requirements: Vec<ToolRequirement>) {
        self.requirements.insert(tool_name.into(), requirements);
    }

    pub fn validate(&self, tool_name: &str, context: &ValidationContext) -> ValidationResult {
        let Some(requirements) = self.requirements.get(tool_name) else {
            return ValidationResult::rejected(format!("Unknown tool: {}", tool_name));
        };

        let unmet: Vec<&str> = requirements
            .iter()
            .filter(|r| !r.is_met(context))
            .map(|r| r.unmet_reason())
            .collect();

        if unmet.is_empty() {
            ValidationResult::allowed()
        } else {
            ValidationResult::rejected(format!(
                "Tool '{}' is unavailable: {}",
                tool_name,
                unmet.join("; ")
            ))
        }
    }
}

impl Default for ToolPermissionValidator {
    fn default() -> Self {
        Self::from_catalog()
    }
}
