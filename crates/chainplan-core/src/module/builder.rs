//! Explicit builder context threaded through every declaration.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::BuildError;
use crate::future::{
    Argument, Future, FutureKind, FutureRef, ParamBinding, ParamSpec, Payload, Sender,
};
use crate::types::{FutureId, Value};

use super::composer::CompositionState;
use super::{Exports, Module};

/// Options shared by contract deployments and calls.
#[derive(Debug, Clone, Default)]
pub struct FutureOptions {
    /// Local id overriding the derived one.
    pub id: Option<String>,
    /// Futures that must complete first without feeding data in.
    pub after: Vec<FutureRef>,
    pub from: Sender,
    /// Native value sent along with the transaction.
    pub value: u128,
}

impl FutureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn after(mut self, future: &FutureRef) -> Self {
        self.after.push(future.clone());
        self
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.from = sender;
        self
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// Declaration context for one module expansion.
pub struct ModuleBuilder<'c> {
    module: String,
    state: &'c mut CompositionState,
    caller_params: BTreeMap<String, Value>,
    declared: BTreeSet<FutureId>,
    declared_params: BTreeSet<String>,
}

impl<'c> ModuleBuilder<'c> {
    pub(crate) fn new(
        module: String,
        state: &'c mut CompositionState,
        caller_params: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            module,
            state,
            caller_params,
            declared: BTreeSet::new(),
            declared_params: BTreeSet::new(),
        }
    }

    /// Name of the module being expanded.
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Declare a parameter binding.
    pub fn get_parameter(
        &mut self,
        name: &str,
        spec: ParamSpec,
    ) -> Result<FutureRef, BuildError> {
        self.check_local(name)?;
        let id = FutureId::scoped(&self.module, &format!("param.{name}"));
        let binding = ParamBinding {
            module: self.module.clone(),
            name: name.to_string(),
            spec,
            caller_value: self.caller_params.get(name).cloned(),
            value: None,
        };
        self.declared_params.insert(name.to_string());
        self.declare(id, Payload::Parameter(binding), &[])
    }

    /// Declare a contract deployment. `args` may hold references to other
    /// futures.
    pub fn contract(
        &mut self,
        contract: &str,
        args: Vec<Argument>,
        options: FutureOptions,
    ) -> Result<FutureRef, BuildError> {
        let local = options.id.clone().unwrap_or_else(|| contract.to_string());
        self.check_local(&local)?;
        let id = FutureId::scoped(&self.module, &local);
        let payload = Payload::Deployment {
            contract: contract.to_string(),
            args,
            from: options.from,
            value: options.value,
        };
        self.declare(id, payload, &options.after)
    }

    /// Declare a call on a deployed contract.
    pub fn call(
        &mut self,
        target: &FutureRef,
        method: &str,
        args: Vec<Argument>,
        options: FutureOptions,
    ) -> Result<FutureRef, BuildError> {
        if target.kind() != FutureKind::ContractDeployment {
            return Err(BuildError::InvalidReference {
                module: self.module.clone(),
                detail: format!("call target '{}' is not a contract deployment", target.id()),
            });
        }
        let local = match &options.id {
            Some(id) => id.clone(),
            None => {
                let contract = target
                    .id()
                    .as_str()
                    .split_once('#')
                    .map(|(_, local)| local)
                    .unwrap_or(target.id().as_str());
                format!("{contract}.{method}")
            }
        };
        self.check_local(&local)?;
        let id = FutureId::scoped(&self.module, &local);
        let payload = Payload::Call {
            target: target.id().clone(),
            method: method.to_string(),
            args,
            from: options.from,
            value: options.value,
        };
        self.declare(id, payload, &options.after)
    }

    /// Compose a sub-module and return its exports.
    pub fn use_module(&mut self, module: &Module) -> Result<Exports, BuildError> {
        self.use_module_with(module, BTreeMap::new())
    }

    /// Compose a sub-module, passing values for its parameters.
    ///
    /// Using the same module again returns the same futures; using it with
    /// different parameters is a conflict.
    pub fn use_module_with(
        &mut self,
        module: &Module,
        params: BTreeMap<String, Value>,
    ) -> Result<Exports, BuildError> {
        let (reference, exports) = self.state.expand(module, params)?;
        self.declared.insert(reference.id().clone());
        Ok(exports)
    }

    fn check_local(&self, local: &str) -> Result<(), BuildError> {
        if local.is_empty() || local.contains('#') {
            return Err(BuildError::InvalidReference {
                module: self.module.clone(),
                detail: format!("invalid future name '{local}'"),
            });
        }
        Ok(())
    }

    fn declare(
        &mut self,
        id: FutureId,
        payload: Payload,
        after: &[FutureRef],
    ) -> Result<FutureRef, BuildError> {
        let future = Future {
            id: id.clone(),
            payload,
            after: after.iter().map(|f| f.id().clone()).collect(),
        };
        let kind = future.kind();
        self.state.registry.insert(future)?;
        self.declared.insert(id.clone());
        Ok(FutureRef::new(id, kind))
    }

    /// Futures declared directly by this module, plus references to the
    /// modules it used.
    pub(crate) fn into_parts(self) -> (BTreeSet<FutureId>, BTreeMap<String, Value>, BTreeSet<String>) {
        (self.declared, self.caller_params, self.declared_params)
    }
}
