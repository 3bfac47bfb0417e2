//! Parameter store with fixed precedence.

use std::sync::Arc;

use tracing::debug;

use crate::error::BuildError;
use crate::future::ParamSpec;
use crate::types::Value;

use super::file::ParameterOverrides;
use super::source::{EnvSource, SecretSource};

/// Where a resolved parameter value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOrigin {
    /// Run-time parameters file or flag.
    Override,
    /// Value passed by a parent module.
    Caller,
    /// External configuration or secret source.
    External,
    /// Module-declared default.
    Default,
}

/// Resolves parameters, highest precedence first:
/// run-time override, caller-supplied value, external source, default.
#[derive(Clone)]
pub struct ParameterStore {
    overrides: ParameterOverrides,
    source: Arc<dyn SecretSource>,
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(ParameterOverrides::new())
    }
}

impl ParameterStore {
    /// Store backed by process environment for external lookups.
    pub fn new(overrides: ParameterOverrides) -> Self {
        Self::with_source(overrides, Arc::new(EnvSource))
    }

    pub fn with_source(overrides: ParameterOverrides, source: Arc<dyn SecretSource>) -> Self {
        Self { overrides, source }
    }

    pub fn overrides(&self) -> &ParameterOverrides {
        &self.overrides
    }

    /// Resolve one parameter of `module`.
    ///
    /// The external source is queried only when no override or caller value
    /// exists, and only for parameters that declare a source key.
    pub fn resolve(
        &self,
        module: &str,
        name: &str,
        spec: &ParamSpec,
        caller_value: Option<&Value>,
    ) -> Result<(Value, ParamOrigin), BuildError> {
        let mismatch = |detail: String| BuildError::ParameterTypeMismatch {
            module: module.to_string(),
            name: name.to_string(),
            expected: spec.kind,
            detail,
        };

        if let Some(raw) = self.overrides.get(module, name) {
            let value = spec.kind.from_json(raw).map_err(mismatch)?;
            debug!(module, name, "parameter resolved from run-time override");
            return Ok((value, ParamOrigin::Override));
        }

        if let Some(value) = caller_value {
            let value = spec.kind.coerce(value.clone()).map_err(mismatch)?;
            debug!(module, name, "parameter resolved from caller");
            return Ok((value, ParamOrigin::Caller));
        }

        if let Some(key) = &spec.source
            && let Some(raw) = self.source.lookup(key)
        {
            let value = spec.kind.parse_str(&raw).map_err(mismatch)?;
            debug!(module, name, key = key.as_str(), "parameter resolved from external source");
            return Ok((value, ParamOrigin::External));
        }

        if let Some(default) = &spec.default {
            let value = spec.kind.coerce(default.clone()).map_err(mismatch)?;
            return Ok((value, ParamOrigin::Default));
        }

        Err(BuildError::UnresolvedParameter {
            module: module.to_string(),
            name: name.to_string(),
        })
    }
}
