// Guardrail data models
// Inputs and verdicts of the tool permission check

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of the conditions a tool may depend on.
///
/// Built fresh before every tool execution; never held across turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationContext {
    pub has_image: bool,
    pub has_dashboard_context: bool,
    pub connection_verified: bool,
}

/// Verdict of a tool permission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// A condition a tool needs before it may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRequirement {
    /// An image (screenshot) is attached to the session or request
    Image,
    /// The UI has reported a loaded dashboard
    DashboardContext,
    /// The conversation's connection is registered and authenticated
    LiveConnection,
}

impl ToolRequirement {
    pub fn is_met(&self, context: &ValidationContext) -> bool {
        match self {
            ToolRequirement::Image => context.has_image,
            ToolRequirement::DashboardContext => context.has_dashboard_context,
            ToolRequirement::LiveConnection => context.connection_verified,
        }
    }

    /// Why the requirement is unmet, phrased for the model
    pub fn unmet_reason(&self) -> &'static str {
        match self {
            ToolRequirement::Image => {
                "no image is available; ask the user to attach a screenshot first"
            }
            ToolRequirement::DashboardContext => {
                "no dashboard is loaded in the connected UI"
            }
            ToolRequirement::LiveConnection => {
                "no verified live connection to the dashboard UI is registered"
            }
        }
    }
}
