//! Model, variant and mode resolution
//!
//! A session's effective selection is layered: what the session chose, then
//! what the active mode is configured with, then the global fallback. Stale
//! choices (a provider that went away, a variant the model no longer offers)
//! are healed here so every caller sees a selection the server can run.

use crate::error::{BridgeError, Result};
use crate::session::ModeSelection;
use crate::session_api::{
    AgentInfo, AgentMode, MessageInfo, MessageWithParts, ModelInfo, ModelRef, ProviderList,
};
use serde::Serialize;

/// Variant name that stands for "no variant" and is never offered to clients
pub const DEFAULT_VARIANT: &str = "default";

/// Snapshot of the providers and models currently available
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    providers: ProviderList,
}

/// A selectable model entry published to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOption {
    pub model_id: String,
    pub name: String,
}

impl ModelCatalog {
    pub fn new(providers: ProviderList) -> Self {
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers
            .providers
            .iter()
            .all(|provider| provider.models.is_empty())
    }

    pub fn model(&self, model: &ModelRef) -> Option<&ModelInfo> {
        self.providers
            .providers
            .iter()
            .find(|provider| provider.id == model.provider_id)
            .and_then(|provider| provider.models.get(&model.model_id))
    }

    pub fn contains(&self, model: &ModelRef) -> bool {
        self.model(model).is_some()
    }

    /// Variant names registered for a model, excluding the implicit default
    pub fn variants(&self, model: &ModelRef) -> Vec<String> {
        self.model(model)
            .map(|info| {
                info.variants
                    .keys()
                    .filter(|name| name.as_str() != DEFAULT_VARIANT)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_variant(&self, model: &ModelRef, variant: &str) -> bool {
        variant != DEFAULT_VARIANT
            && self
                .model(model)
                .is_some_and(|info| info.variants.contains_key(variant))
    }

    /// Context window size, when the provider reports one
    pub fn context_limit(&self, model: &ModelRef) -> Option<u64> {
        self.model(model)
            .map(|info| info.limit.context)
            .filter(|limit| *limit > 0)
    }

    /// Global fallback: configured model, else a provider's preferred model,
    /// else the first model offered
    pub fn default_model(&self, configured: Option<&str>) -> Result<ModelRef> {
        if self.is_empty() {
            return Err(BridgeError::AuthRequired(
                "no model providers are connected".to_string(),
            ));
        }

        if let Some(configured) = configured {
            match self.parse_model_id(configured) {
                Ok((model, _)) => return Ok(model),
                Err(e) => tracing::warn!(
                    "Configured default model '{}' is unavailable: {}",
                    configured,
                    e
                ),
            }
        }

        for provider in &self.providers.providers {
            if let Some(model_id) = self.providers.default.get(&provider.id) {
                if provider.models.contains_key(model_id) {
                    return Ok(ModelRef::new(provider.id.clone(), model_id.clone()));
                }
            }
        }

        self.providers
            .providers
            .iter()
            .find_map(|provider| {
                provider
                    .models
                    .keys()
                    .next()
                    .map(|model_id| ModelRef::new(provider.id.clone(), model_id.clone()))
            })
            .ok_or_else(|| BridgeError::AuthRequired("no models are available".to_string()))
    }

    /// Parse `provider/model` or `provider/model/variant`
    ///
    /// Model ids may themselves contain `/`, so the whole remainder is tried as
    /// a model id before the trailing segment is considered as a variant.
    pub fn parse_model_id(&self, id: &str) -> Result<(ModelRef, Option<String>)> {
        let (provider_id, rest) = id
            .split_once('/')
            .filter(|(provider, rest)| !provider.is_empty() && !rest.is_empty())
            .ok_or_else(|| {
                BridgeError::InvalidParams(format!(
                    "model id '{}' must have the form provider/model[/variant]",
                    id
                ))
            })?;

        let provider = self
            .providers
            .providers
            .iter()
            .find(|provider| provider.id == provider_id)
            .ok_or_else(|| {
                BridgeError::InvalidParams(format!("unknown provider '{}'", provider_id))
            })?;

        if provider.models.contains_key(rest) {
            return Ok((ModelRef::new(provider_id, rest), None));
        }

        if let Some((model_id, variant)) = rest.rsplit_once('/') {
            if let Some(info) = provider.models.get(model_id) {
                let model = ModelRef::new(provider_id, model_id);
                if variant == DEFAULT_VARIANT {
                    return Ok((model, None));
                }
                if info.variants.contains_key(variant) {
                    return Ok((model, Some(variant.to_string())));
                }
            }
        }

        Err(BridgeError::InvalidParams(format!("unknown model '{}'", id)))
    }

    /// Every model, and optionally every model/variant pair, as client options
    pub fn available_models(&self, with_variants: bool) -> Vec<ModelOption> {
        let mut options = Vec::new();
        for provider in &self.providers.providers {
            let provider_name = if provider.name.is_empty() {
                &provider.id
            } else {
                &provider.name
            };
            for (model_id, info) in &provider.models {
                let model = ModelRef::new(provider.id.clone(), model_id.clone());
                let model_name = if info.name.is_empty() { model_id } else { &info.name };
                options.push(ModelOption {
                    model_id: format_model_id(&model, None, false),
                    name: format!("{}/{}", provider_name, model_name),
                });
                if with_variants {
                    for variant in self.variants(&model) {
                        options.push(ModelOption {
                            model_id: format_model_id(&model, Some(&variant), true),
                            name: format!("{}/{} ({})", provider_name, model_name, variant),
                        });
                    }
                }
            }
        }
        options
    }
}

pub fn format_model_id(model: &ModelRef, variant: Option<&str>, with_variant: bool) -> String {
    match variant {
        Some(variant) if with_variant && variant != DEFAULT_VARIANT => {
            format!("{}/{}/{}", model.provider_id, model.model_id, variant)
        }
        _ => model.to_string(),
    }
}

/// A mode's configured defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeDefaults {
    pub model: Option<ModelRef>,
    pub variant: Option<String>,
}

impl From<&AgentInfo> for ModeDefaults {
    fn from(agent: &AgentInfo) -> Self {
        Self {
            model: agent.model.clone(),
            variant: agent.variant.clone(),
        }
    }
}

/// Effective selection for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub model: ModelRef,
    pub variant: Option<String>,
    pub available_variants: Vec<String>,
    /// The session's own model was unavailable and has been replaced
    pub healed_model: bool,
    /// The session's own variant was unavailable and has been cleared
    pub cleared_variant: bool,
}

impl Resolution {
    pub fn model_id(&self, with_variant: bool) -> String {
        format_model_id(&self.model, self.variant.as_deref(), with_variant)
    }
}

pub fn resolve(
    session: &ModeSelection,
    mode: Option<&ModeDefaults>,
    fallback: &ModelRef,
    catalog: &ModelCatalog,
) -> Resolution {
    let mode_model = mode.and_then(|mode| mode.model.as_ref());
    let candidate = session.model.as_ref().or(mode_model).unwrap_or(fallback);

    let (model, healed_model) = if catalog.contains(candidate) {
        (candidate.clone(), false)
    } else {
        tracing::warn!(
            "Model {} is no longer available, falling back to {}",
            candidate,
            fallback
        );
        (fallback.clone(), true)
    };

    let mode_variant = mode
        .filter(|mode| mode.model.as_ref() == Some(&model))
        .and_then(|mode| mode.variant.clone());
    let candidate_variant = session.variant.clone().or(mode_variant);

    let (variant, cleared_variant) = match candidate_variant {
        Some(variant) if catalog.has_variant(&model, &variant) => (Some(variant), false),
        Some(variant) => {
            tracing::debug!("Variant {} is not offered by {}, clearing", variant, model);
            (None, session.variant.is_some())
        }
        None => (None, false),
    };

    Resolution {
        available_variants: catalog.variants(&model),
        model,
        variant,
        healed_model,
        cleared_variant,
    }
}

/// Selection recorded on the most recent user message, if still runnable
pub fn selection_from_history(
    messages: &[MessageWithParts],
    catalog: &ModelCatalog,
) -> Option<ModeSelection> {
    let user = messages.iter().rev().find_map(|message| match &message.info {
        MessageInfo::User(user) => Some(user),
        MessageInfo::Assistant(_) => None,
    })?;
    let model = user.model.as_ref().filter(|model| catalog.contains(model))?;
    let variant = user
        .variant
        .as_ref()
        .filter(|variant| catalog.has_variant(model, variant))
        .cloned();
    Some(ModeSelection {
        model: Some(model.clone()),
        variant,
    })
}

/// Agents the client may pick as a mode
pub fn selectable_modes(agents: &[AgentInfo]) -> Vec<&AgentInfo> {
    agents
        .iter()
        .filter(|agent| agent.mode != AgentMode::Subagent && !agent.hidden)
        .collect()
}

/// Current mode: the remembered one, else the configured default, else the first
pub fn default_mode(
    modes: &[&AgentInfo],
    remembered: Option<&str>,
    configured: Option<&str>,
) -> Option<String> {
    let is_available = |name: &str| modes.iter().any(|agent| agent.name == name);
    remembered
        .filter(|name| is_available(name))
        .or_else(|| configured.filter(|name| is_available(name)))
        .map(str::to_string)
        .or_else(|| modes.first().map(|agent| agent.name.clone()))
}
