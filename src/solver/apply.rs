//! The apply phase: walks the layers bottom-up, validates that every
//! expanded decision is still reachable under the values picked so far and
//! writes the chosen value into a partial config.

use log::warn;

use super::grouper::Layers;
use super::{config_lookup, CancelToken, Solution, SolveError};
use crate::config::Config;
use crate::decision::Decision;
use crate::kconfig::{Symbol, SymbolId, SymbolKind, SymbolTable, SymbolValue, Tristate, TristateSet};

pub fn apply(
    table: &SymbolTable,
    layers: &Layers,
    solution: &Solution,
    base: &Config,
    cancel: &CancelToken,
) -> Result<Config, SolveError> {
    let mut partial = Config::new();

    for layer in layers.iter() {
        cancel.check()?;
        for sym_id in layer {
            let Some(decision) = solution.get(sym_id) else {
                continue;
            };
            apply_one(table, &mut partial, base, *sym_id, decision)?;
        }
    }

    // Decisions on symbols outside the layered graph cannot exist by
    // construction, but the guard keeps the phases independent.
    for (sym_id, decision) in solution {
        if layers.layer_of(*sym_id).is_none() {
            apply_one(table, &mut partial, base, *sym_id, decision)?;
        }
    }
    Ok(partial)
}

fn apply_one(
    table: &SymbolTable,
    partial: &mut Config,
    base: &Config,
    sym_id: SymbolId,
    decision: &Decision,
) -> Result<(), SolveError> {
    let symbol = table.get(sym_id);
    if symbol.name.is_none() {
        // Anonymous choice entries never appear in a config; their members
        // carry the decisions.
        return Ok(());
    }

    let merged_lookup = {
        let partial_lookup = config_lookup(table, partial);
        let base_lookup = config_lookup(table, base);
        move |id: SymbolId| partial_lookup(id).or_else(|| base_lookup(id))
    };

    let value = match decision {
        Decision::Tristate(set) => {
            let dir = symbol.direct_deps(&merged_lookup);
            let rev = symbol.reverse_deps(&merged_lookup);
            SymbolValue::Tristate(pick_tristate(symbol, *set, dir, rev).ok_or_else(|| {
                SolveError::Unsatisfiable {
                    symbol: symbol.name.clone().unwrap_or_default(),
                }
            })?)
        }
        Decision::Value(value) => {
            if symbol.direct_deps(&merged_lookup) == Tristate::No {
                return Err(SolveError::Unsatisfiable {
                    symbol: symbol.name.clone().unwrap_or_default(),
                });
            }
            clamp_to_range(symbol, value.clone(), &merged_lookup)
        }
    };

    // Disabled value kinds stay absent; the informed oldconfig keeps them
    // out via the decision dict.
    if !symbol.kind.is_tristate_like() && value == SymbolValue::Tristate(Tristate::No) {
        return Ok(());
    }

    drop(merged_lookup);
    partial
        .set(symbol, value)
        .expect("picked values match the symbol kind");
    Ok(())
}

/// Picks a concrete tristate from the still-acceptable set: the decision
/// must fit between the reverse dependencies (lower bound) and the
/// dependency-derived upper bound. `{m,y}` decisions prefer `m`.
fn pick_tristate(symbol: &Symbol, set: TristateSet, dir: Tristate, rev: Tristate) -> Option<Tristate> {
    let upper = match symbol.kind {
        SymbolKind::Tristate => dir,
        // Bool visibility promotes: any satisfied dependency allows y.
        _ => {
            if dir > Tristate::No {
                Tristate::Yes
            } else {
                Tristate::No
            }
        }
    };
    let rev = match symbol.kind {
        SymbolKind::Tristate => rev,
        _ => {
            if rev > Tristate::No {
                Tristate::Yes
            } else {
                Tristate::No
            }
        }
    };

    let valid: Vec<Tristate> = set.iter_values().filter(|v| *v >= rev && *v <= upper).collect();
    // Prefer the smallest enabled value (m over y), fall back to n.
    valid
        .iter()
        .copied()
        .find(|v| *v >= Tristate::Mod)
        .or_else(|| valid.first().copied())
}

fn clamp_to_range<L>(symbol: &Symbol, value: SymbolValue, lookup: &L) -> SymbolValue
where
    L: Fn(SymbolId) -> Option<SymbolValue>,
{
    let Some((low, high)) = symbol.active_range(lookup) else {
        return value;
    };
    match value {
        SymbolValue::Int(v) => {
            let clamped = (v as i128).clamp(low, high);
            if clamped != v as i128 {
                warn!(
                    "value {} for {} is out of range [{}, {}], clamping",
                    v,
                    symbol.name.as_deref().unwrap_or("<choice>"),
                    low,
                    high
                );
            }
            SymbolValue::Int(clamped as i64)
        }
        SymbolValue::Hex(v) => {
            let clamped = (v as i128).clamp(low.max(0), high);
            if clamped != v as i128 {
                warn!(
                    "value 0x{:x} for {} is out of range, clamping",
                    v,
                    symbol.name.as_deref().unwrap_or("<choice>")
                );
            }
            SymbolValue::Hex(clamped as u64)
        }
        value => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kconfig::{Expr, SymbolTableBuilder};
    use crate::solver::grouper;

    fn apply_solution(table: &SymbolTable, solution: &Solution, base: &Config) -> Result<Config, SolveError> {
        let layers = grouper::group(table, solution.keys().copied().collect());
        apply(table, &layers, solution, base, &CancelToken::new())
    }

    #[test]
    fn prefers_module_for_either_decision() {
        let mut builder = SymbolTableBuilder::new();
        let a = builder.symbol("A", SymbolKind::Tristate);
        builder.add_prompt(a, "A", Expr::Const(Tristate::Yes));
        let table = builder.finish();

        let solution = Solution::from_iter([(a, Decision::Tristate(TristateSet::MOD | TristateSet::YES))]);
        let partial = apply_solution(&table, &solution, &Config::new()).unwrap();
        assert_eq!(partial.get("A"), Some(&SymbolValue::Tristate(Tristate::Mod)));
    }

    #[test]
    fn dependency_limits_the_choice() {
        // B depends on A; A is picked m, so B=y is impossible but B=m works.
        let mut builder = SymbolTableBuilder::new();
        let a = builder.symbol("A", SymbolKind::Tristate);
        let b = builder.symbol("B", SymbolKind::Tristate);
        builder.add_prompt(a, "A", Expr::Const(Tristate::Yes));
        builder.add_prompt(b, "B", Expr::Const(Tristate::Yes));
        builder.set_dir_dep(b, Expr::Symbol(a));
        let table = builder.finish();

        let solution = Solution::from_iter([
            (a, Decision::Tristate(TristateSet::MOD)),
            (b, Decision::Tristate(TristateSet::MOD | TristateSet::YES)),
        ]);
        let partial = apply_solution(&table, &solution, &Config::new()).unwrap();
        assert_eq!(partial.get("B"), Some(&SymbolValue::Tristate(Tristate::Mod)));

        let solution = Solution::from_iter([
            (a, Decision::Tristate(TristateSet::MOD)),
            (b, Decision::Tristate(TristateSet::YES)),
        ]);
        let err = apply_solution(&table, &solution, &Config::new()).unwrap_err();
        assert_eq!(err, SolveError::Unsatisfiable { symbol: "B".into() });
    }

    #[test]
    fn reverse_dependency_overrides_disable() {
        // A=y selects B; a disable decision on B cannot hold.
        let mut builder = SymbolTableBuilder::new();
        let a = builder.symbol("A", SymbolKind::Tristate);
        let b = builder.symbol("B", SymbolKind::Tristate);
        builder.add_prompt(a, "A", Expr::Const(Tristate::Yes));
        builder.add_select(a, b, Expr::Const(Tristate::Yes));
        let table = builder.finish();

        let mut base = Config::new();
        base.set(table.by_name("A").unwrap(), SymbolValue::Tristate(Tristate::Yes))
            .unwrap();

        let solution = Solution::from_iter([(b, Decision::Tristate(TristateSet::NO))]);
        let err = apply_solution(&table, &solution, &base).unwrap_err();
        assert_eq!(err, SolveError::Unsatisfiable { symbol: "B".into() });
    }

    #[test]
    fn bool_promotes_module_dependency() {
        // FLAG (bool) depends on TRI which is only m: bool still gets y.
        let mut builder = SymbolTableBuilder::new();
        let tri = builder.symbol("TRI", SymbolKind::Tristate);
        let flag = builder.symbol("FLAG", SymbolKind::Bool);
        builder.add_prompt(tri, "tri", Expr::Const(Tristate::Yes));
        builder.add_prompt(flag, "flag", Expr::Const(Tristate::Yes));
        builder.set_dir_dep(flag, Expr::Symbol(tri));
        let table = builder.finish();

        let mut base = Config::new();
        base.set(table.by_name("TRI").unwrap(), SymbolValue::Tristate(Tristate::Mod))
            .unwrap();

        let solution = Solution::from_iter([(flag, Decision::Tristate(TristateSet::YES))]);
        let partial = apply_solution(&table, &solution, &base).unwrap();
        assert_eq!(partial.get("FLAG"), Some(&SymbolValue::Tristate(Tristate::Yes)));
    }

    #[test]
    fn value_decisions_are_written_and_clamped() {
        let mut builder = SymbolTableBuilder::new();
        let count = builder.symbol("COUNT", SymbolKind::Int);
        builder.add_prompt(count, "count", Expr::Const(Tristate::Yes));
        let low = builder.constant("2");
        let high = builder.constant("8");
        builder.add_range(count, low, high, Expr::Const(Tristate::Yes));
        let table = builder.finish();

        let solution = Solution::from_iter([(count, Decision::Value(SymbolValue::Int(64)))]);
        let partial = apply_solution(&table, &solution, &Config::new()).unwrap();
        assert_eq!(partial.get("COUNT"), Some(&SymbolValue::Int(8)));
    }

    #[test]
    fn disabled_value_kind_stays_absent() {
        let mut builder = SymbolTableBuilder::new();
        let name = builder.symbol("NAME", SymbolKind::String);
        builder.add_prompt(name, "name", Expr::Const(Tristate::Yes));
        let table = builder.finish();

        let solution = Solution::from_iter([(name, Decision::Tristate(TristateSet::NO))]);
        let partial = apply_solution(&table, &solution, &Config::new()).unwrap();
        assert!(partial.is_empty());
    }
}
