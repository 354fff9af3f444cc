//! User macro registration.
//!
//! Per Design Note 9, user macros are "full host-language power" in the
//! original Python implementation; here they are a registered function
//! interface with a fixed signature, built before `Model::load` /
//! `QueryRenderer::new` are called rather than through a global mutable
//! registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use planforge_error::{PlanError, PlanResult};

use crate::ast::MacroNode;
use crate::eval::MacroEvaluator;

/// What a user macro function may return: nothing (the call site is
/// deleted), one replacement node, or several (spliced in sequence).
pub enum MacroOutput {
    None,
    Node(MacroNode),
    Nodes(Vec<MacroNode>),
}

pub type UserMacroFn =
    Arc<dyn Fn(&mut MacroEvaluator, &[MacroNode]) -> PlanResult<MacroOutput> + Send + Sync>;

/// Macro names are case-insensitive; registry keys are upper-cased.
#[derive(Clone, Default)]
pub struct MacroRegistry {
    macros: BTreeMap<String, UserMacroFn>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: UserMacroFn) {
        self.macros.insert(name.into().to_ascii_uppercase(), f);
    }

    pub fn get(&self, name: &str) -> Option<&UserMacroFn> {
        self.macros.get(&name.to_ascii_uppercase())
    }

    pub fn call(
        &self,
        evaluator: &mut MacroEvaluator,
        name: &str,
        args: &[MacroNode],
    ) -> PlanResult<MacroOutput> {
        match self.get(name) {
            Some(f) => f(evaluator, args),
            None => Err(PlanError::macro_eval(
                format!("Macro '@{name}' does not exist"),
                String::new(),
                String::new(),
            )),
        }
    }
}
