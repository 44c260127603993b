//! Wires the lifecycle manager to the host adapters

use std::path::Path;
use std::sync::Arc;

use ai_runtime::{
    BackendSelector, EngineLifecycleManager, HardwareValidator, OllamaEngineLoader,
    PreferenceStore, RuntimeError,
};
use domain::{ModelFile, ModelFiles, ModelKey};
use infrastructure::{
    AppConfig, CommandHardwareValidator, FilePreferenceStore, InfrastructureError,
    SystemHardwarePlatform,
};

/// Load `path` if given, otherwise `./gemmunch.toml` when present
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, InfrastructureError> {
    path.map_or_else(AppConfig::load, AppConfig::load_from)
}

/// Selector over the system platform; the validator tier is only wired when
/// a validator program is configured
pub fn build_selector(config: &AppConfig) -> Result<BackendSelector, RuntimeError> {
    let platform = Arc::new(SystemHardwarePlatform::new(&config.platform));
    let validator = CommandHardwareValidator::from_config(&config.platform);
    let validator: Option<Arc<dyn HardwareValidator>> = if validator.is_configured() {
        Some(Arc::new(validator))
    } else {
        None
    };
    BackendSelector::new(platform, validator, &config.runtime)
}

/// Everything a command needs to drive the engine
#[derive(Debug)]
pub struct Runtime {
    pub manager: EngineLifecycleManager,
    pub files: ModelFiles,
    pub loader: Arc<OllamaEngineLoader>,
    pub preferences: Arc<FilePreferenceStore>,
    default_model: ModelKey,
}

impl Runtime {
    /// Build the manager; no engine is loaded yet
    pub fn build(config: &AppConfig) -> Result<Self, RuntimeError> {
        let preferences = Arc::new(FilePreferenceStore::new(&config.preferences.path));
        let loader = Arc::new(OllamaEngineLoader::new(config.ollama.clone())?);

        let manager = EngineLifecycleManager::new(
            config.runtime.clone(),
            Arc::clone(&loader) as _,
            build_selector(config)?,
            Arc::clone(&preferences) as _,
        )?;
        manager.register_teardown(Arc::clone(&preferences) as _)?;

        Ok(Self {
            manager,
            files: config.model_files(),
            loader,
            preferences,
            default_model: config.runtime.default_model.clone(),
        })
    }

    /// The persisted selection, or the configured default
    pub fn selected_model(&self) -> ModelKey {
        self.preferences
            .selected_model()
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// File for `key`, or `ModelNotConfigured`
    pub fn model_file(&self, key: &ModelKey) -> Result<&ModelFile, RuntimeError> {
        self.files
            .get(key)
            .ok_or_else(|| RuntimeError::model_not_configured(key.as_str()))
    }
}
