//! Future declarations: the unit of deployment work.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::types::{Address, FutureId, ParamKind, Value};

/// Kind of deployment action a future stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FutureKind {
    ContractDeployment,
    ContractCall,
    ParameterBinding,
    ModuleReference,
}

impl FutureKind {
    /// Whether executing this kind sends a transaction.
    pub fn is_onchain(self) -> bool {
        matches!(
            self,
            FutureKind::ContractDeployment | FutureKind::ContractCall
        )
    }
}

/// Handle to a declared future, returned by the module builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FutureRef {
    id: FutureId,
    kind: FutureKind,
}

impl FutureRef {
    pub(crate) fn new(id: FutureId, kind: FutureKind) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> &FutureId {
        &self.id
    }

    pub fn kind(&self) -> FutureKind {
        self.kind
    }
}

/// Constructor or call argument.
///
/// `Future` is a placeholder token for another future's eventual result; the
/// scheduler substitutes it once that future has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Value(Value),
    Future(FutureId),
    Array(Vec<Argument>),
}

impl Argument {
    /// Collect every future this argument refers to.
    pub fn collect_references(&self, out: &mut BTreeSet<FutureId>) {
        match self {
            Argument::Value(_) => {}
            Argument::Future(id) => {
                out.insert(id.clone());
            }
            Argument::Array(items) => items.iter().for_each(|item| item.collect_references(out)),
        }
    }

    /// Replace placeholders with the results known so far.
    pub fn resolve(&self, results: &BTreeMap<FutureId, Value>) -> Result<Value, ExecutionError> {
        match self {
            Argument::Value(value) => Ok(value.clone()),
            Argument::Future(id) => results
                .get(id)
                .cloned()
                .ok_or_else(|| ExecutionError::MissingResult(id.clone())),
            Argument::Array(items) => items
                .iter()
                .map(|item| item.resolve(results))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Value(value)
    }
}

impl From<&FutureRef> for Argument {
    fn from(value: &FutureRef) -> Self {
        Argument::Future(value.id.clone())
    }
}

impl From<FutureRef> for Argument {
    fn from(value: FutureRef) -> Self {
        Argument::Future(value.id)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Value(Value::from(value))
    }
}

impl From<u128> for Argument {
    fn from(value: u128) -> Self {
        Argument::Value(Value::Number(value))
    }
}

impl From<Address> for Argument {
    fn from(value: Address) -> Self {
        Argument::Value(Value::Address(value))
    }
}

/// Account a transaction is sent from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// First account of the network profile.
    #[default]
    Default,
    /// Account by index in the network profile.
    Account(usize),
    /// Explicit address; must belong to a configured account.
    Address(Address),
}

/// Declared parameter: kind, optional default and external source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub default: Option<Value>,
    /// Symbolic key looked up in the external configuration source.
    pub source: Option<String>,
}

impl ParamSpec {
    pub fn new(kind: ParamKind) -> Self {
        Self {
            kind,
            default: None,
            source: None,
        }
    }

    pub fn string(default: &str) -> Self {
        Self::new(ParamKind::String).with_default(Value::from(default))
    }

    pub fn number(default: u128) -> Self {
        Self::new(ParamKind::Number).with_default(Value::Number(default))
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_source(mut self, key: impl Into<String>) -> Self {
        self.source = Some(key.into());
        self
    }
}

/// Parameter binding as held in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    pub module: String,
    pub name: String,
    pub spec: ParamSpec,
    /// Value passed by the parent module through `use_module_with`.
    pub caller_value: Option<Value>,
    /// Filled once the parameter store has resolved the binding.
    pub value: Option<Value>,
}

/// What executing a future does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Deployment {
        contract: String,
        args: Vec<Argument>,
        from: Sender,
        value: u128,
    },
    Call {
        target: FutureId,
        method: String,
        args: Vec<Argument>,
        from: Sender,
        value: u128,
    },
    Parameter(ParamBinding),
    ModuleReference {
        module: String,
        members: BTreeSet<FutureId>,
        exports: BTreeMap<String, FutureId>,
    },
}

/// A declared deployment action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Future {
    pub id: FutureId,
    pub payload: Payload,
    /// Explicit ordering hints with no data dependency.
    pub after: BTreeSet<FutureId>,
}

impl Future {
    pub fn kind(&self) -> FutureKind {
        match self.payload {
            Payload::Deployment { .. } => FutureKind::ContractDeployment,
            Payload::Call { .. } => FutureKind::ContractCall,
            Payload::Parameter(_) => FutureKind::ParameterBinding,
            Payload::ModuleReference { .. } => FutureKind::ModuleReference,
        }
    }

    /// Futures whose results this future consumes.
    pub fn data_dependencies(&self) -> BTreeSet<FutureId> {
        let mut deps = BTreeSet::new();
        match &self.payload {
            Payload::Deployment { args, .. } => {
                args.iter().for_each(|arg| arg.collect_references(&mut deps));
            }
            Payload::Call { target, args, .. } => {
                deps.insert(target.clone());
                args.iter().for_each(|arg| arg.collect_references(&mut deps));
            }
            Payload::Parameter(_) => {}
            Payload::ModuleReference { members, .. } => deps.extend(members.iter().cloned()),
        }
        deps
    }

    /// Data dependencies plus ordering hints.
    pub fn depends_on(&self) -> BTreeSet<FutureId> {
        let mut deps = self.data_dependencies();
        deps.extend(self.after.iter().cloned());
        deps
    }

    /// Short description for plans and reports.
    pub fn describe(&self) -> String {
        match &self.payload {
            Payload::Deployment { contract, .. } => format!("deploy {contract}"),
            Payload::Call { target, method, .. } => format!("call {target}.{method}"),
            Payload::Parameter(binding) => format!("parameter {}", binding.name),
            Payload::ModuleReference { module, .. } => format!("module {module}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_arguments_collect_all_references() {
        let arg = Argument::Array(vec![
            Argument::Future(FutureId::new("M#a")),
            Argument::Value(Value::Bool(true)),
            Argument::Array(vec![Argument::Future(FutureId::new("M#b"))]),
        ]);
        let mut refs = BTreeSet::new();
        arg.collect_references(&mut refs);
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec![FutureId::new("M#a"), FutureId::new("M#b")]
        );
    }

    #[test]
    fn resolve_reports_missing_placeholder() {
        let arg = Argument::Future(FutureId::new("M#a"));
        let err = arg.resolve(&BTreeMap::new()).unwrap_err();
        assert_eq!(err, ExecutionError::MissingResult(FutureId::new("M#a")));
    }

    #[test]
    fn call_depends_on_target_and_hints() {
        let future = Future {
            id: FutureId::new("M#C.init"),
            payload: Payload::Call {
                target: FutureId::new("M#C"),
                method: "init".into(),
                args: vec![],
                from: Sender::Default,
                value: 0,
            },
            after: [FutureId::new("M#D")].into_iter().collect(),
        };
        let deps = future.depends_on();
        assert!(deps.contains(&FutureId::new("M#C")));
        assert!(deps.contains(&FutureId::new("M#D")));
        assert_eq!(future.kind(), FutureKind::ContractCall);
    }
}
