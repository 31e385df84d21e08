//! Capability descriptors shared across the agent runtime.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_ID_LEN: usize = 64;
const MAX_NAME_LEN: usize = 96;
const MAX_SCOPE_LEN: usize = 128;
const DEFAULT_VERSION: &str = "1.0.0";

/// Identifier for a capability exposed by a plugin.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityId(String);

impl CapabilityId {
    /// Creates a new capability identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapabilityId`] if the supplied identifier is empty,
    /// too long, or contains unsupported characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_identifier(&id)?;
        Ok(Self(id))
    }

    /// Returns the capability identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CapabilityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CapabilityId> for String {
    fn from(value: CapabilityId) -> Self {
        value.0
    }
}

impl TryFrom<String> for CapabilityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CapabilityId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

fn validate_identifier(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidCapabilityId {
            id: String::new(),
            reason: "identifier cannot be empty".into(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(Error::InvalidCapabilityId {
            id: id.into(),
            reason: format!("identifier length must be <= {MAX_ID_LEN}"),
        });
    }

    if !id
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '_' | '.'))
    {
        return Err(Error::InvalidCapabilityId {
            id: id.into(),
            reason: "identifier must contain lowercase alphanumeric, dash, underscore, or dot"
                .into(),
        });
    }

    Ok(())
}

/// Describes a capability contributed by a plugin.
///
/// `required_scopes` may be empty: such a capability stays executable by
/// direct invocation but is never advertised to a model.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    id: CapabilityId,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plugin_id: Option<String>,
    #[serde(default)]
    required_scopes: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

impl Capability {
    /// Starts building a capability descriptor.
    #[must_use]
    pub fn builder(id: CapabilityId) -> CapabilityBuilder {
        CapabilityBuilder {
            id,
            name: None,
            description: None,
            version: None,
            plugin_id: None,
            scopes: BTreeSet::new(),
            parameters: None,
        }
    }

    /// Minimal descriptor named after its identifier with no scopes.
    #[must_use]
    pub fn unscoped(id: CapabilityId) -> Self {
        Self {
            name: id.as_str().to_owned(),
            id,
            description: None,
            version: DEFAULT_VERSION.into(),
            plugin_id: None,
            required_scopes: BTreeSet::new(),
            parameters: None,
        }
    }

    /// Returns the unique capability identifier.
    #[must_use]
    pub fn id(&self) -> &CapabilityId {
        &self.id
    }

    /// Human-friendly capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional capability description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Semantic version string of the capability.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Identifier of the contributing plugin, if any.
    #[must_use]
    pub fn plugin_id(&self) -> Option<&str> {
        self.plugin_id.as_deref()
    }

    /// Scopes a caller must hold before the capability runs.
    #[must_use]
    pub fn required_scopes(&self) -> &BTreeSet<String> {
        &self.required_scopes
    }

    /// JSON schema describing the capability parameters, if declared.
    #[must_use]
    pub fn parameters(&self) -> Option<&serde_json::Value> {
        self.parameters.as_ref()
    }

    /// Replaces the required scopes, returning the updated descriptor.
    #[must_use]
    pub fn with_required_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn stamp_plugin(mut self, plugin_id: &str) -> Self {
        self.plugin_id = Some(plugin_id.to_owned());
        self
    }
}

/// Builder for [`Capability`].
#[derive(Debug)]
pub struct CapabilityBuilder {
    id: CapabilityId,
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    plugin_id: Option<String>,
    scopes: BTreeSet<String>,
    parameters: Option<serde_json::Value>,
}

impl CapabilityBuilder {
    /// Sets the display name for the capability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] if the name is empty or exceeds the
    /// maximum supported length.
    pub fn name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidCapability {
                reason: "name cannot be empty".into(),
            });
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidCapability {
                reason: format!("name length must be <= {MAX_NAME_LEN}"),
            });
        }
        self.name = Some(name);
        Ok(self)
    }

    /// Sets an optional description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the version string for the capability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] if the version string is empty.
    pub fn version(mut self, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(Error::InvalidCapability {
                reason: "version cannot be empty".into(),
            });
        }
        self.version = Some(version);
        Ok(self)
    }

    /// Records the plugin contributing this capability.
    #[must_use]
    pub fn plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    /// Declares the JSON schema of the capability parameters.
    #[must_use]
    pub fn parameters(mut self, schema: serde_json::Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    /// Adds a required scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] if the scope is empty or exceeds the
    /// maximum supported length.
    pub fn add_scope(mut self, scope: impl Into<String>) -> Result<Self> {
        let scope = scope.into();
        validate_scope(&scope)?;
        self.scopes.insert(scope);
        Ok(self)
    }

    /// Finalises the capability descriptor. Name defaults to the identifier
    /// and version to `1.0.0`.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible so validation can grow without
    /// breaking callers.
    pub fn build(self) -> Result<Capability> {
        let name = self.name.unwrap_or_else(|| self.id.as_str().to_owned());
        let version = self.version.unwrap_or_else(|| DEFAULT_VERSION.into());

        Ok(Capability {
            id: self.id,
            name,
            description: self.description,
            version,
            plugin_id: self.plugin_id,
            required_scopes: self.scopes,
            parameters: self.parameters,
        })
    }
}

fn validate_scope(scope: &str) -> Result<()> {
    if scope.trim().is_empty() {
        return Err(Error::InvalidCapability {
            reason: "scope cannot be empty".into(),
        });
    }
    if scope.len() > MAX_SCOPE_LEN {
        return Err(Error::InvalidCapability {
            reason: format!("scope length must be <= {MAX_SCOPE_LEN}"),
        });
    }
    Ok(())
}
