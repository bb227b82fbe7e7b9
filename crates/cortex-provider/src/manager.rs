use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::provider::{GenerateRequest, GenerateResponse, LlmProvider, ProviderError};

/// Per-user `(provider_id, model_name)` preference, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPref {
    pub provider_id: String,
    pub model_name: String,
}

/// `~/.cortex-model-prefs.json` — user id → preferred provider/model.
pub struct ModelPrefsStore {
    path: PathBuf,
}

impl ModelPrefsStore {
    pub fn new(storage_dir: Option<&str>) -> Self {
        Self {
            path: state_path(storage_dir, ".cortex-model-prefs.json"),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<ModelPref> {
        load_map::<ModelPref>(&self.path).remove(user_id)
    }

    pub fn set(&self, user_id: &str, pref: ModelPref) -> std::io::Result<()> {
        let mut data = load_map::<ModelPref>(&self.path);
        data.insert(user_id.to_string(), pref);
        save_map(&self.path, &data)
    }

    pub fn clear(&self, user_id: &str) -> std::io::Result<()> {
        let mut data = load_map::<ModelPref>(&self.path);
        if data.remove(user_id).is_some() {
            save_map(&self.path, &data)?;
        }
        Ok(())
    }
}

/// `~/.cortex-api-keys.json` (0600) — user id → provider id → API key.
pub struct ApiKeyStore {
    path: PathBuf,
}

impl ApiKeyStore {
    pub fn new(storage_dir: Option<&str>) -> Self {
        Self {
            path: state_path(storage_dir, ".cortex-api-keys.json"),
        }
    }

    pub fn get(&self, user_id: &str, provider_id: &str) -> Option<String> {
        load_map::<BTreeMap<String, String>>(&self.path)
            .remove(user_id)?
            .remove(provider_id)
    }

    pub fn set(&self, user_id: &str, provider_id: &str, key: &str) -> std::io::Result<()> {
        let mut data = load_map::<BTreeMap<String, String>>(&self.path);
        data.entry(user_id.to_string())
            .or_default()
            .insert(provider_id.to_string(), key.to_string());
        save_map(&self.path, &data)
    }

    pub fn delete(&self, user_id: &str, provider_id: &str) -> std::io::Result<bool> {
        let mut data = load_map::<BTreeMap<String, String>>(&self.path);
        let removed = data
            .get_mut(user_id)
            .map(|m| m.remove(provider_id).is_some())
            .unwrap_or(false);
        if removed {
            save_map(&self.path, &data)?;
        }
        Ok(removed)
    }
}

fn state_path(storage_dir: Option<&str>, file: &str) -> PathBuf {
    let dir = storage_dir
        .map(String::from)
        .unwrap_or_else(|| std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    PathBuf::from(dir).join(file)
}

fn load_map<V: serde::de::DeserializeOwned>(path: &PathBuf) -> BTreeMap<String, V> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeMap::new(),
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "state file unreadable, treating as empty");
        BTreeMap::new()
    })
}

fn save_map<V: Serialize>(path: &PathBuf, data: &BTreeMap<String, V>) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_string_pretty(data)?)?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Outcome of a routed generation, carrying provenance for turn metadata.
#[derive(Debug)]
pub struct RoutedResponse {
    pub response: GenerateResponse,
    pub provider_id: String,
    /// Set when quota exhaustion forced a fall back to the default
    /// provider; holds the provider that was originally selected.
    pub fallback_from: Option<String>,
}

/// Routes requests to the user's preferred provider, with quota fallback.
pub struct ModelManager {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_provider: String,
    default_model: String,
    prefs: ModelPrefsStore,
}

impl ModelManager {
    pub fn new(default_provider: &str, default_model: &str, prefs: ModelPrefsStore) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.to_string(),
            default_model: default_model.to_string(),
            prefs,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        info!(provider = provider.id(), "registered LLM provider");
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Persist a user's `(provider, model)` choice.
    pub fn set_user_pref(
        &self,
        user_id: &str,
        provider_id: &str,
        model_name: &str,
    ) -> Result<(), ProviderError> {
        if !self.providers.contains_key(provider_id) {
            return Err(ProviderError::Unavailable(format!(
                "provider '{provider_id}' is not registered"
            )));
        }
        self.prefs
            .set(
                user_id,
                ModelPref {
                    provider_id: provider_id.to_string(),
                    model_name: model_name.to_string(),
                },
            )
            .map_err(|e| ProviderError::Unavailable(e.to_string()))
    }

    /// Resolve the provider and model for a user: their stored preference
    /// when the provider is still registered, otherwise the default.
    pub fn resolve_for_user(
        &self,
        user_id: &str,
    ) -> Result<(Arc<dyn LlmProvider>, String), ProviderError> {
        if let Some(pref) = self.prefs.get(user_id) {
            if let Some(provider) = self.providers.get(&pref.provider_id) {
                return Ok((provider.clone(), pref.model_name));
            }
            warn!(
                user = user_id,
                provider = %pref.provider_id,
                "preferred provider not registered, using default"
            );
        }
        self.default()
    }

    /// The configured default route, used for quota fallback.
    pub fn default_route(&self) -> Result<(Arc<dyn LlmProvider>, String), ProviderError> {
        self.default()
    }

    pub fn default_provider_id(&self) -> &str {
        &self.default_provider
    }

    fn default(&self) -> Result<(Arc<dyn LlmProvider>, String), ProviderError> {
        self.providers
            .get(&self.default_provider)
            .or_else(|| self.providers.values().next())
            .cloned()
            .map(|p| (p, self.default_model.clone()))
            .ok_or_else(|| ProviderError::Unavailable("no LLM providers registered".to_string()))
    }

    /// Generate for a user, falling back to the default provider when the
    /// preferred one reports quota exhaustion. Other errors propagate.
    pub async fn generate_for_user(
        &self,
        user_id: &str,
        mut req: GenerateRequest,
    ) -> Result<RoutedResponse, ProviderError> {
        let (provider, model) = self.resolve_for_user(user_id)?;
        req.model = model;
        req.user_id = Some(user_id.to_string());

        match provider.generate(&req).await {
            Ok(response) => Ok(RoutedResponse {
                response,
                provider_id: provider.id().to_string(),
                fallback_from: None,
            }),
            Err(ProviderError::QuotaExhausted(msg))
                if provider.id() != self.default_provider
                    && self.providers.contains_key(&self.default_provider) =>
            {
                warn!(
                    user = user_id,
                    from = provider.id(),
                    to = %self.default_provider,
                    "quota exhausted, falling back to default provider: {msg}"
                );
                let (fallback, model) = self.default()?;
                req.model = model;
                let response = fallback.generate(&req).await?;
                Ok(RoutedResponse {
                    response,
                    provider_id: fallback.id().to_string(),
                    fallback_from: Some(provider.id().to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }
}
