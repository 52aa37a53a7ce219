use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::settings::{load_settings_file, save_settings_file, PluginSettings};
use super::{
    Action, Analyzer, Capability, Database, PluginDescriptor, PluginError, PluginInstance,
    Reporter, PLUGIN_MAGIC,
};

/// Lifecycle state of one plugin name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PluginState {
    Unloaded,
    Loaded,
    Registered,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Plugin '{0}' is not available")]
    NotFound(String),

    #[error("Can't load non-compatible plugin '{name}': {reason}")]
    Incompatible { name: String, reason: String },

    #[error("Plugin '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Plugin '{0}' is not registered")]
    NotRegistered(String),

    #[error("Plugin '{name}' is not an {expected} plugin")]
    WrongCapability { name: String, expected: Capability },

    #[error("Can't initialize plugin '{name}': {source}")]
    InitFailed {
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("Can't write settings of plugin '{name}': {source}")]
    Settings {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Front-end view of one known plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub enabled: bool,
    pub capability: Option<Capability>,
    pub name: String,
    pub version: String,
    pub description: String,
    pub contact: String,
    pub homepage: String,
}

struct PluginEntry {
    descriptor: PluginDescriptor,
    capability: Capability,
    instance: Option<PluginInstance>,
    settings: PluginSettings,
}

/// Catalog of available plugins plus the live lifecycle state of each.
///
/// Settings for plugin `Name` live in `<conf_dir>/Name.conf`.
pub struct PluginRegistry {
    catalog: BTreeMap<String, PluginDescriptor>,
    conf_dir: PathBuf,
    expected_magic: u32,
    entries: BTreeMap<String, PluginEntry>,
}

impl PluginRegistry {
    /// Empty registry with no catalog entries.
    pub fn new(conf_dir: impl AsRef<Path>) -> Self {
        Self {
            catalog: BTreeMap::new(),
            conf_dir: conf_dir.as_ref().to_path_buf(),
            expected_magic: PLUGIN_MAGIC,
            entries: BTreeMap::new(),
        }
    }

    /// Registry whose catalog holds every compiled-in plugin.
    pub fn with_builtins(conf_dir: impl AsRef<Path>) -> Self {
        let mut registry = Self::new(conf_dir);
        for descriptor in super::builtin::builtin_descriptors() {
            registry.add_to_catalog(descriptor);
        }
        registry
    }

    /// Make a plugin available for loading. Replaces a catalog entry of the same name.
    pub fn add_to_catalog(&mut self, descriptor: PluginDescriptor) -> &mut Self {
        self.catalog.insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    pub fn settings_path(&self, name: &str) -> PathBuf {
        self.conf_dir.join(format!("{name}.conf"))
    }

    /// Sorted names of every plugin in the catalog.
    pub fn catalog_names(&self) -> Vec<String> {
        self.catalog.keys().cloned().collect()
    }

    pub fn state(&self, name: &str) -> PluginState {
        match self.entries.get(name) {
            None => PluginState::Unloaded,
            Some(entry) if entry.instance.is_some() => PluginState::Registered,
            Some(_) => PluginState::Loaded,
        }
    }

    /// Capability of a loaded or registered plugin.
    pub fn capability_of(&self, name: &str) -> Option<Capability> {
        self.entries.get(name).map(|entry| entry.capability)
    }

    /// Validate a catalog descriptor and move the plugin to Loaded.
    ///
    /// Loading an already loaded plugin returns the existing descriptor.
    pub fn load(&mut self, name: &str) -> Result<&PluginDescriptor, RegistryError> {
        if !self.entries.contains_key(name) {
            let descriptor = self
                .catalog
                .get(name)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(name.into()))?;

            if descriptor.magic_number != self.expected_magic {
                let reason = format!(
                    "magic number {} does not match {}",
                    descriptor.magic_number, self.expected_magic
                );
                warn!(plugin = name, "Can't load non-compatible plugin: {reason}");
                return Err(RegistryError::Incompatible { name: name.into(), reason });
            }
            let Some(capability) = Capability::from_i32(descriptor.capability) else {
                let reason = format!("unknown capability tag {}", descriptor.capability);
                warn!(plugin = name, "Can't load non-compatible plugin: {reason}");
                return Err(RegistryError::Incompatible { name: name.into(), reason });
            };

            debug!(plugin = name, version = %descriptor.version, "plugin loaded");
            self.entries.insert(
                name.to_string(),
                PluginEntry {
                    descriptor,
                    capability,
                    instance: None,
                    settings: PluginSettings::new(),
                },
            );
        }

        self.entries
            .get(name)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| RegistryError::NotLoaded(name.into()))
    }

    /// Instantiate, initialize and configure a loaded plugin.
    ///
    /// A failing init hook unloads the plugin and reports `InitFailed`.
    pub fn register(&mut self, name: &str) -> Result<(), RegistryError> {
        let settings_path = self.settings_path(name);
        let entry =
            self.entries.get_mut(name).ok_or_else(|| RegistryError::NotLoaded(name.into()))?;
        if entry.instance.is_some() {
            return Ok(());
        }

        let mut instance = (entry.descriptor.factory)();
        if instance.capability() != entry.capability {
            let reason = format!(
                "factory built an {} but the descriptor declares {}",
                instance.capability(),
                entry.capability
            );
            error!(plugin = name, "Can't initialize plugin: {reason}");
            self.entries.remove(name);
            return Err(RegistryError::InitFailed {
                name: name.into(),
                source: PluginError::Failed(reason),
            });
        }

        let settings = load_settings_file(&settings_path).unwrap_or_else(|err| {
            warn!(plugin = name, path = %settings_path.display(), "can't read settings: {err}");
            PluginSettings::new()
        });

        if let Err(source) = instance.init() {
            error!(plugin = name, "Can't initialize plugin: {source}");
            self.entries.remove(name);
            return Err(RegistryError::InitFailed { name: name.into(), source });
        }
        instance.apply_settings(&settings);

        info!("Registered {} plugin '{}'", entry.capability, name);
        entry.settings = settings;
        entry.instance = Some(instance);
        Ok(())
    }

    /// Registered -> Loaded. No-op in any other state.
    pub fn unregister(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            if let Some(mut instance) = entry.instance.take() {
                instance.deinit();
                info!("UnRegistered {} plugin '{}'", entry.capability, name);
            }
        }
    }

    /// Loaded (or Registered) -> Unloaded. No-op when already unloaded.
    pub fn unload(&mut self, name: &str) {
        self.unregister(name);
        if self.entries.remove(name).is_some() {
            debug!(plugin = name, "plugin unloaded");
        }
    }

    /// Load and register in one step, as done for enabled plugins at startup.
    pub fn activate(&mut self, name: &str) -> Result<(), RegistryError> {
        self.load(name)?;
        self.register(name)
    }

    fn instance(&self, name: &str) -> Result<&PluginInstance, RegistryError> {
        self.entries
            .get(name)
            .and_then(|entry| entry.instance.as_ref())
            .ok_or_else(|| RegistryError::NotRegistered(name.into()))
    }

    fn wrong(name: &str, expected: Capability) -> RegistryError {
        RegistryError::WrongCapability { name: name.into(), expected }
    }

    pub fn analyzer(&self, name: &str) -> Result<&dyn Analyzer, RegistryError> {
        match self.instance(name)? {
            PluginInstance::Analyzer(plugin) => Ok(&**plugin),
            _ => Err(Self::wrong(name, Capability::Analyzer)),
        }
    }

    pub fn action(&self, name: &str) -> Result<&dyn Action, RegistryError> {
        match self.instance(name)? {
            PluginInstance::Action(plugin) => Ok(&**plugin),
            _ => Err(Self::wrong(name, Capability::Action)),
        }
    }

    pub fn reporter(&self, name: &str) -> Result<&dyn Reporter, RegistryError> {
        match self.instance(name)? {
            PluginInstance::Reporter(plugin) => Ok(&**plugin),
            _ => Err(Self::wrong(name, Capability::Reporter)),
        }
    }

    pub fn database(&self, name: &str) -> Result<&dyn Database, RegistryError> {
        match self.instance(name)? {
            PluginInstance::Database(plugin) => Ok(&**plugin),
            _ => Err(Self::wrong(name, Capability::Database)),
        }
    }

    /// Catalog listing in name order; `enabled` means registered.
    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.catalog
            .values()
            .map(|descriptor| PluginInfo {
                enabled: self.state(&descriptor.name) == PluginState::Registered,
                capability: Capability::from_i32(descriptor.capability),
                name: descriptor.name.clone(),
                version: descriptor.version.clone(),
                description: descriptor.description.clone(),
                contact: descriptor.contact.clone(),
                homepage: descriptor.homepage.clone(),
            })
            .collect()
    }

    /// Settings applied to a registered plugin.
    pub fn plugin_settings(&self, name: &str) -> Result<&PluginSettings, RegistryError> {
        self.entries
            .get(name)
            .filter(|entry| entry.instance.is_some())
            .map(|entry| &entry.settings)
            .ok_or_else(|| RegistryError::NotRegistered(name.into()))
    }

    /// Persist new settings for a registered plugin and apply them.
    pub fn set_plugin_settings(
        &mut self,
        name: &str,
        settings: PluginSettings,
    ) -> Result<(), RegistryError> {
        let path = self.settings_path(name);
        let entry = self
            .entries
            .get_mut(name)
            .filter(|entry| entry.instance.is_some())
            .ok_or_else(|| RegistryError::NotRegistered(name.into()))?;

        save_settings_file(&path, &settings)
            .map_err(|source| RegistryError::Settings { name: name.into(), source })?;
        if let Some(instance) = entry.instance.as_mut() {
            instance.apply_settings(&settings);
        }
        entry.settings = settings;
        Ok(())
    }
}
