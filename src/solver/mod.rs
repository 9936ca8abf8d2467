//! The three-phase resolver: upward expansion over the layered dependency
//! graph, application of the picked values, and the informed-oldconfig
//! downward fixpoint.

pub mod apply;
pub mod expand;
pub mod grouper;
pub mod oldconfig;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::config::Config;
use crate::decision::{Decision, Decisions};
use crate::kconfig::{SymbolId, SymbolTable, SymbolValue};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    #[error("no satisfying assignment for the dependencies of symbol {symbol}")]
    Unsatisfiable { symbol: String },
    #[error("cancelled")]
    Cancelled,
}

/// Cooperative cancellation, polled between layers and between fixpoint
/// iterations. On cancel the solver returns [`SolveError::Cancelled`] and no
/// output file is touched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<(), SolveError> {
        if self.is_cancelled() {
            return Err(SolveError::Cancelled);
        }
        Ok(())
    }
}

/// A fully upward-expanded decision dict: what the resolver will enforce.
pub type Solution = IndexMap<SymbolId, Decision>;

/// Generates the resolved configuration for a base config and a set of
/// modification requests. The result is a fixed point of the informed
/// oldconfig pass.
pub fn generate(
    table: &SymbolTable,
    base: &Config,
    decisions: &Decisions,
    cancel: &CancelToken,
) -> Result<Config, SolveError> {
    let mut roots: Vec<SymbolId> = base
        .iter()
        .filter_map(|(name, _)| table.id_by_name(name))
        .collect();
    roots.extend(decisions.keys());

    let layers = grouper::group(table, roots);
    let solution = expand::expand(table, &layers, decisions, base, cancel)?;
    let partial = apply::apply(table, &layers, &solution, base, cancel)?;

    let mut config = base.clone();
    config.merge(&partial);
    oldconfig::run(table, config, &solution, cancel)
}

/// Evaluation lookup over a config, with constants resolved from the table.
pub(crate) fn config_lookup<'a>(
    table: &'a SymbolTable,
    config: &'a Config,
) -> impl Fn(SymbolId) -> Option<SymbolValue> + 'a {
    table.value_lookup(move |sym| sym.name.as_deref().and_then(|name| config.get(name)).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_round_trip() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(SolveError::Cancelled));
    }
}
