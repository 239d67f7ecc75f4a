//! Provider Registry: resolves a provider name or alias to its credential and endpoint.
//!
//! Resolution precedence, first hit wins:
//! 1. exact configuration key
//! 2. configuration key, case-insensitive
//! 3. display name, case-insensitive
//!
//! Within a tier entries are scanned in ascending key order, so a collision
//! always resolves to the same entry.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{LlmTraceConfig, ProviderConfig, DEFAULT_PROVIDER_BASE_URL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    /// Configuration key of the matched entry.
    pub key: String,
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub model: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub models: Vec<ModelInfo>,
}

/// Read-only view over the configured providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(providers: BTreeMap<String, ProviderConfig>) -> Self {
        Self { providers }
    }

    pub fn from_config(config: &LlmTraceConfig) -> Self {
        Self::new(config.providers.clone())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// `None` means nothing matched; callers turn that into a "provider not configured" error.
    pub fn resolve(&self, name: &str) -> Option<ResolvedProvider> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let exact = self.providers.get_key_value(name);
        let by_key = || {
            self.providers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
        };
        let by_display_name = || {
            self.providers
                .iter()
                .find(|(_, p)| !p.name.is_empty() && p.name.eq_ignore_ascii_case(name))
        };

        let (key, provider) = exact.or_else(by_key).or_else(by_display_name)?;

        let base_url = if provider.base_url.is_empty() {
            DEFAULT_PROVIDER_BASE_URL.to_string()
        } else {
            provider.base_url.clone()
        };

        Some(ResolvedProvider {
            key: key.clone(),
            api_key: provider.api_key.clone(),
            base_url,
        })
    }

    /// Operator-facing listing in key order.
    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|(key, provider)| {
                let name = if provider.name.is_empty() {
                    key.clone()
                } else {
                    provider.name.clone()
                };
                ProviderInfo {
                    name: name.clone(),
                    kind: name,
                    enabled: provider.enabled,
                    models: provider
                        .models
                        .iter()
                        .map(|model| ModelInfo {
                            name: model.clone(),
                            model: model.clone(),
                            enabled: true,
                        })
                        .collect(),
                }
            })
            .collect()
    }
}
