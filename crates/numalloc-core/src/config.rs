//! Allocator configuration.

use std::path::PathBuf;

use crate::policy::NumaPolicy;
use crate::topology::{NodeId, DEFAULT_SYSFS_ROOT};
use crate::NumaError;

/// Configuration applied when an allocator is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Initial placement policy
    pub policy: NumaPolicy,
    /// Node used by the default policy
    pub default_node: Option<NodeId>,
    /// Adopt the caller's node as default node on first topology initialization
    pub local_default: bool,
    /// Serialize usage accounting from the start
    pub thread_safe: bool,
    /// Root of the sysfs node tree read by [`SysfsTopology`](crate::SysfsTopology)
    pub sysfs_root: PathBuf,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            policy: NumaPolicy::Default,
            default_node: None,
            local_default: false,
            thread_safe: false,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
        }
    }
}

impl AllocatorConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> AllocatorConfigBuilder {
        AllocatorConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Node ids are checked against the topology later, when the allocator
    /// applies them.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::InvalidConfig`] if the configuration is invalid.
    pub fn validate(&self) -> Result<(), NumaError> {
        if self.default_node.is_some() && self.local_default {
            return Err(NumaError::InvalidConfig(
                "default_node and local_default are mutually exclusive".to_string(),
            ));
        }
        if self.sysfs_root.as_os_str().is_empty() {
            return Err(NumaError::InvalidConfig(
                "sysfs_root must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for `AllocatorConfig`.
#[derive(Debug, Default)]
pub struct AllocatorConfigBuilder {
    policy: Option<NumaPolicy>,
    default_node: Option<NodeId>,
    local_default: Option<bool>,
    thread_safe: Option<bool>,
    sysfs_root: Option<PathBuf>,
}

impl AllocatorConfigBuilder {
    /// Sets the initial placement policy.
    #[must_use]
    pub fn policy(mut self, policy: NumaPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the default node.
    #[must_use]
    pub fn default_node(mut self, node: NodeId) -> Self {
        self.default_node = Some(node);
        self
    }

    /// Use the caller's node as default node once topology is known.
    #[must_use]
    pub fn local_default(mut self, enabled: bool) -> Self {
        self.local_default = Some(enabled);
        self
    }

    /// Enables lock-serialized usage accounting from construction.
    #[must_use]
    pub fn thread_safe(mut self, enabled: bool) -> Self {
        self.thread_safe = Some(enabled);
        self
    }

    /// Sets the sysfs node tree root.
    #[must_use]
    pub fn sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = Some(root.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<AllocatorConfig, NumaError> {
        let config = AllocatorConfig {
            policy: self.policy.unwrap_or_default(),
            default_node: self.default_node,
            local_default: self.local_default.unwrap_or(false),
            thread_safe: self.thread_safe.unwrap_or(false),
            sysfs_root: self
                .sysfs_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
        };
        config.validate()?;
        Ok(config)
    }
}
