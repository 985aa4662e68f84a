/// Ordered plugin registry
///
/// Registration order is the tie-breaker for every arbitration stage, so
/// plugins are kept in a `Vec` rather than a map.

use crate::error::{AriaError, Result};
use crate::plugin::{Capabilities, Plugin};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

/// Registry shared between the dispatch loop and reload tasks
pub type SharedRegistry = Arc<RwLock<Registry>>;

/// A plugin with its capability descriptor and enabled state
#[derive(Clone)]
pub struct RegisteredPlugin {
    pub plugin: Arc<dyn Plugin>,
    pub capabilities: Capabilities,
    pub enabled: bool,
}

impl RegisteredPlugin {
    pub fn id(&self) -> &str {
        &self.plugin.info().id
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("id", &self.id())
            .field("capabilities", &self.capabilities)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegisteredPlugin>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Register an enabled plugin
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.register_with_state(plugin, true)
    }

    /// Register a plugin, reading its capability descriptor once
    pub fn register_with_state(&mut self, plugin: Arc<dyn Plugin>, enabled: bool) -> Result<()> {
        let id = plugin.info().id.clone();
        if id.trim().is_empty() || id.contains(char::is_whitespace) {
            return Err(AriaError::InvalidQuery(format!(
                "plugin id '{}' must be a single word",
                id
            )));
        }
        if self.get(&id).is_some() {
            return Err(AriaError::DuplicatePlugin(id));
        }

        let capabilities = plugin.capabilities();
        self.entries.push(RegisteredPlugin {
            plugin,
            capabilities,
            enabled,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All plugins in registration order
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredPlugin> {
        self.entries.iter()
    }

    /// Enabled plugins in registration order
    pub fn enabled(&self) -> impl Iterator<Item = &RegisteredPlugin> {
        self.entries.iter().filter(|entry| entry.enabled)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(RegisteredPlugin::id).collect()
    }

    /// Exact id lookup
    pub fn get(&self, id: &str) -> Option<&RegisteredPlugin> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.get(id).is_some_and(|entry| entry.enabled)
    }

    /// Ids starting with `prefix`, ignoring case, in registration order
    pub fn candidate_ids(&self, prefix: &str) -> Vec<&str> {
        let prefix = prefix.to_lowercase();
        self.entries
            .iter()
            .map(RegisteredPlugin::id)
            .filter(|id| id.to_lowercase().starts_with(&prefix))
            .collect()
    }

    /// Exact id, otherwise the single plugin whose id starts with `token`
    ///
    /// An ambiguous prefix matches nothing.
    pub fn lookup(&self, token: &str) -> Option<&RegisteredPlugin> {
        lookup_in(self.entries.iter(), token)
    }

    /// Same as `lookup`, considering only enabled plugins
    pub fn lookup_enabled(&self, token: &str) -> Option<&RegisteredPlugin> {
        lookup_in(self.enabled(), token)
    }

    /// Enable a plugin; `Ok(false)` if it already was
    pub fn enable(&mut self, id: &str) -> Result<bool> {
        self.set_enabled(id, true)
    }

    /// Disable a plugin; `Ok(false)` if it already was
    pub fn disable(&mut self, id: &str) -> Result<bool> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<bool> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.id() == id)
            .ok_or_else(|| AriaError::UnknownPlugin(id.to_string()))?;

        if entry.enabled == enabled {
            return Ok(false);
        }
        entry.enabled = enabled;
        info!(plugin = id, enabled, "plugin state changed");
        Ok(true)
    }

    /// Apply `[plugins]` flags from the config; unknown ids are ignored
    ///
    /// Returns the ids whose state changed.
    pub fn apply_enabled_flags(&mut self, flags: &BTreeMap<String, bool>) -> Vec<String> {
        let mut changed = Vec::new();
        for entry in &mut self.entries {
            if let Some(&enabled) = flags.get(entry.plugin.info().id.as_str()) {
                if entry.enabled != enabled {
                    entry.enabled = enabled;
                    changed.push(entry.id().to_string());
                }
            }
        }
        changed
    }

    /// Register a copy of `template` under `new_id`
    pub fn clone_from_template(&mut self, new_id: &str, template: &str) -> Result<()> {
        if self.get(new_id).is_some() {
            return Err(AriaError::DuplicatePlugin(new_id.to_string()));
        }

        let source = self
            .get(template)
            .ok_or_else(|| AriaError::UnknownPlugin(template.to_string()))?;

        let plugin = source.plugin.instantiate(new_id).ok_or_else(|| {
            AriaError::Template(format!("'{}' can't be used as a template", template))
        })?;

        if plugin.info().id != new_id {
            return Err(AriaError::Template(format!(
                "'{}' produced a plugin named '{}' instead of '{}'",
                template,
                plugin.info().id,
                new_id
            )));
        }

        self.register(plugin)?;
        info!(plugin = new_id, template, "created plugin from template");
        Ok(())
    }

    /// Every declared requirement that is absent or at another version
    ///
    /// Mismatches are logged and returned; they never block execution.
    pub fn check_requirements(&self) -> Vec<AriaError> {
        let mut mismatches = Vec::new();

        for entry in &self.entries {
            for (required, expected) in &entry.plugin.info().requirements {
                let found = match self.get(required) {
                    Some(dep) if &dep.plugin.info().version == expected => continue,
                    Some(dep) => dep.plugin.info().version.clone(),
                    None => "nothing".to_string(),
                };

                let mismatch = AriaError::RequirementMismatch {
                    required: required.clone(),
                    expected: expected.clone(),
                    found,
                };
                warn!(plugin = entry.id(), "{}", mismatch);
                mismatches.push(mismatch);
            }
        }

        mismatches
    }
}

/// Read access for arbitration; a poisoned lock is recovered
pub fn read(registry: &SharedRegistry) -> RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write access for enable/disable, template clones, and reloads
pub fn write(registry: &SharedRegistry) -> RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

fn lookup_in<'a>(
    entries: impl Iterator<Item = &'a RegisteredPlugin>,
    token: &str,
) -> Option<&'a RegisteredPlugin> {
    let token = token.to_lowercase();
    if token.is_empty() {
        return None;
    }

    let mut prefixed = None;
    let mut ambiguous = false;

    for entry in entries {
        let id = entry.id().to_lowercase();
        if id == token {
            return Some(entry);
        }
        if id.starts_with(&token) {
            if prefixed.is_some() {
                ambiguous = true;
            } else {
                prefixed = Some(entry);
            }
        }
    }

    if ambiguous {
        None
    } else {
        prefixed
    }
}
