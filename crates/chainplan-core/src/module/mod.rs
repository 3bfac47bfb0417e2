//! Module definitions and composition.
//!
//! A [`Module`] is a named factory that declares futures through an
//! explicit [`ModuleBuilder`] and exports some of them by logical name.
//! Modules are expanded by the [`composer`] into one flat registry.

pub mod builder;
pub mod composer;
pub mod manifest;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BuildError;
use crate::future::FutureRef;

pub use builder::{FutureOptions, ModuleBuilder};
pub use composer::{Composition, compose};
pub use manifest::{ModuleManifest, load_manifest};

/// Exported futures keyed by logical name.
pub type Exports = BTreeMap<String, FutureRef>;

type BuildFn = dyn Fn(&mut ModuleBuilder<'_>) -> Result<Exports, BuildError> + Send + Sync;

/// Named, parameterized factory of futures.
///
/// A module is identified by its name: every use of a module with a given
/// name within one composition expands to the same futures.
#[derive(Clone)]
pub struct Module {
    name: String,
    build: Arc<BuildFn>,
}

impl Module {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&mut ModuleBuilder<'_>) -> Result<Exports, BuildError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(&self, builder: &mut ModuleBuilder<'_>) -> Result<Exports, BuildError> {
        (self.build)(builder)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("name", &self.name).finish()
    }
}
