//! Plugin metadata aggregated by static capability discovery.

use serde::{Deserialize, Serialize};

use crate::Capability;

#[cfg(test)]
use crate::CapabilityId;

/// Describes a plugin and the capabilities it contributes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginManifest {
    plugin_id: String,
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    capabilities: Vec<Capability>,
}

impl PluginManifest {
    /// Starts building a [`PluginManifest`].
    #[must_use]
    pub fn builder(plugin_id: impl Into<String>) -> PluginManifestBuilder {
        PluginManifestBuilder {
            plugin_id: plugin_id.into(),
            name: None,
            version: None,
            description: None,
            capabilities: Vec::new(),
        }
    }

    /// Returns the plugin identifier.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Returns the plugin display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the plugin version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the capabilities contributed by the plugin.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }
}

/// Builder for [`PluginManifest`].
#[derive(Debug)]
pub struct PluginManifestBuilder {
    plugin_id: String,
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    capabilities: Vec<Capability>,
}

impl PluginManifestBuilder {
    /// Sets the human-readable plugin name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the semantic version string.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets an optional description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a capability. Its plugin id is taken from the manifest.
    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Consumes the builder and returns the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidManifest`] if the plugin id is blank or
    /// two capabilities share an identifier.
    pub fn build(self) -> crate::Result<PluginManifest> {
        if self.plugin_id.trim().is_empty() {
            return Err(crate::Error::InvalidManifest {
                reason: "plugin id cannot be empty".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for capability in &self.capabilities {
            if !seen.insert(capability.id().as_str()) {
                return Err(crate::Error::InvalidManifest {
                    reason: format!("duplicate capability `{}`", capability.id()),
                });
            }
        }

        let capabilities = self
            .capabilities
            .into_iter()
            .map(|capability| {
                if capability.plugin_id().is_some() {
                    capability
                } else {
                    capability.stamp_plugin(&self.plugin_id)
                }
            })
            .collect();

        Ok(PluginManifest {
            name: self.name.unwrap_or_else(|| self.plugin_id.clone()),
            version: self.version.unwrap_or_else(|| "0.1.0".into()),
            plugin_id: self.plugin_id,
            description: self.description,
            capabilities,
        })
    }
}
