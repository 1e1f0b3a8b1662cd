//! Model roles and size-based role selection.
//!
//! A [`ModelPack`] assigns a [`ModelRoleConfig`] to each processing role.
//! Every role config may carry a large-context fallback that takes over when
//! a request no longer fits the primary model.

use serde::{Deserialize, Serialize};

/// Processing role a model config serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Planning and chat replies.
    Planner,
    /// Implementation replies.
    Coder,
    /// Context gathering.
    Architect,
}

/// Backend model parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseModelConfig {
    /// Provider label.
    pub provider: String,
    /// Model name sent in requests.
    pub model_name: String,
    /// Context window in tokens.
    pub max_tokens: usize,
    /// Tokens held back for the reply.
    pub reserved_output_tokens: usize,
}

/// One role's model configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRoleConfig {
    /// Role served.
    pub role: ModelRole,
    /// Backend model.
    pub base: BaseModelConfig,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Config used when the input no longer fits this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_context_fallback: Option<Box<ModelRoleConfig>>,
}

impl ModelRoleConfig {
    /// Input tokens this config alone accepts.
    pub fn max_input_tokens(&self) -> usize {
        self.base
            .max_tokens
            .saturating_sub(self.base.reserved_output_tokens)
    }

    /// Largest input any config in the fallback chain accepts.
    pub fn effective_max_tokens(&self) -> usize {
        let own = self.max_input_tokens();
        self.large_context_fallback
            .as_deref()
            .map_or(own, |fb| own.max(fb.effective_max_tokens()))
    }

    /// Tokens reserved for output.
    pub fn reserved_output_tokens(&self) -> usize {
        self.base.reserved_output_tokens
    }

    /// Pick the first config in the fallback chain that fits `input_tokens`.
    ///
    /// When nothing fits, the last config in the chain is returned; the
    /// caller's budget check is responsible for rejecting such requests.
    pub fn role_for_input_tokens(&self, input_tokens: usize) -> &ModelRoleConfig {
        let mut current = self;
        loop {
            if input_tokens <= current.max_input_tokens() {
                return current;
            }
            match current.large_context_fallback.as_deref() {
                Some(next) => current = next,
                None => return current,
            }
        }
    }
}

/// Model configs for all roles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPack {
    /// Planner config (required).
    pub planner: ModelRoleConfig,
    /// Coder config; falls back to the planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coder: Option<ModelRoleConfig>,
    /// Context-loader config; falls back to the planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architect: Option<ModelRoleConfig>,
}

impl ModelPack {
    /// Pack where every role uses `planner`.
    pub fn single(planner: ModelRoleConfig) -> Self {
        Self {
            planner,
            coder: None,
            architect: None,
        }
    }

    /// Config serving `role`.
    pub fn role(&self, role: ModelRole) -> &ModelRoleConfig {
        match role {
            ModelRole::Planner => &self.planner,
            ModelRole::Coder => self.coder.as_ref().unwrap_or(&self.planner),
            ModelRole::Architect => self.architect.as_ref().unwrap_or(&self.planner),
        }
    }
}
