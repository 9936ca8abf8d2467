//! Upward expansion: walks the layers from the dependents down to the
//! dependencies and chooses values for prerequisite symbols that make every
//! decision satisfiable. Alternative prerequisite assignments are merged by
//! value-set intersection; among the surviving candidates the one with the
//! least impact wins.

use std::collections::HashSet;

use log::debug;

use super::grouper::Layers;
use super::{config_lookup, CancelToken, Solution, SolveError};
use crate::config::Config;
use crate::decision::{Decision, Decisions};
use crate::kconfig::{Expr, Symbol, SymbolId, SymbolKind, SymbolTable, SymbolValue, Tristate, TristateSet};

pub fn expand(
    table: &SymbolTable,
    layers: &Layers,
    decisions: &Decisions,
    base: &Config,
    cancel: &CancelToken,
) -> Result<Solution, SolveError> {
    let mut need: Solution = decisions.iter().map(|(id, d)| (id, d.clone())).collect();
    let mut solution = Solution::new();

    for layer_index in (0..layers.len()).rev() {
        cancel.check()?;

        let in_layer: Vec<SymbolId> = layers
            .layer(layer_index)
            .iter()
            .copied()
            .filter(|s| need.contains_key(s))
            .collect();
        if in_layer.is_empty() {
            continue;
        }
        for sym in &in_layer {
            let decision = need.shift_remove(sym).expect("filtered on membership");
            merge_into_solution(table, &mut solution, *sym, decision)?;
        }

        // The no-extra-change candidate: just what is still left to solve.
        let mut candidates: Vec<Solution> = vec![need.clone()];

        for sym_id in &in_layer {
            let symbol = table.get(*sym_id);
            let decision = &solution[sym_id];
            let Some(desired) = desired_value(symbol, decision) else {
                continue;
            };

            let lookup = picked_lookup(table, &solution, base);
            let alternatives = satisfy_symbol(table, &lookup, symbol, desired);
            if alternatives.is_empty() {
                return Err(unsatisfiable(symbol));
            }

            let mut merged = Vec::new();
            for candidate in &candidates {
                for alternative in &alternatives {
                    if let Some(next) = merge_assignments(candidate, alternative) {
                        merged.push(next);
                    }
                }
            }
            if merged.is_empty() {
                return Err(unsatisfiable(symbol));
            }
            candidates = merged;
        }

        let baseline: HashSet<SymbolId> = need.keys().copied().collect();
        need = candidates
            .into_iter()
            .min_by_key(|c| impact(table, c, &baseline))
            .expect("candidates is nonempty");

        // Assignments that landed in the current layer (select cycles) or
        // above cannot be revisited; fold them into the solution now.
        let stuck: Vec<SymbolId> = need
            .keys()
            .copied()
            .filter(|s| layers.layer_of(*s).map_or(true, |l| l >= layer_index))
            .collect();
        for sym in stuck {
            let decision = need.shift_remove(&sym).expect("key exists");
            merge_into_solution(table, &mut solution, sym, decision)?;
        }
    }

    for (sym, decision) in std::mem::take(&mut need) {
        merge_into_solution(table, &mut solution, sym, decision)?;
    }
    Ok(solution)
}

fn unsatisfiable(symbol: &Symbol) -> SolveError {
    SolveError::Unsatisfiable {
        symbol: symbol.name.clone().unwrap_or_else(|| "<choice>".into()),
    }
}

/// The minimum-impact score: fewer newly touched symbols, fewer forced `y`,
/// fewer forced `m`, then lexicographic symbol names. Smaller is better.
fn impact(table: &SymbolTable, candidate: &Solution, baseline: &HashSet<SymbolId>) -> (usize, usize, usize, Vec<String>) {
    let new_symbols = candidate.keys().filter(|s| !baseline.contains(s)).count();
    let forced_yes = candidate
        .values()
        .filter(|d| matches!(d, Decision::Tristate(set) if *set == TristateSet::YES))
        .count();
    let forced_mod = candidate
        .values()
        .filter(|d| matches!(d, Decision::Tristate(set) if *set == TristateSet::MOD))
        .count();
    let mut names: Vec<String> = candidate
        .keys()
        .filter_map(|s| table.get(*s).name.clone())
        .collect();
    names.sort();
    (new_symbols, forced_yes, forced_mod, names)
}

/// The minimal dependency strength a decision requires: the smallest
/// non-`n` value for tristate symbols, plain visibility (`m`) for
/// everything else. `None` when the decision is "off" and needs nothing.
fn desired_value(symbol: &Symbol, decision: &Decision) -> Option<Tristate> {
    match decision {
        Decision::Tristate(set) => {
            let lowest = set.at_least(Tristate::Mod).min_value()?;
            match symbol.kind {
                SymbolKind::Tristate => Some(lowest),
                _ => Some(Tristate::Mod),
            }
        }
        Decision::Value(_) => Some(Tristate::Mod),
    }
}

/// Values already fixed by the solution, over the base config.
fn picked_lookup<'a>(
    table: &'a SymbolTable,
    solution: &'a Solution,
    base: &'a Config,
) -> impl Fn(SymbolId) -> Option<SymbolValue> + 'a {
    let base_lookup = config_lookup(table, base);
    move |id: SymbolId| {
        match solution.get(&id) {
            Some(Decision::Tristate(set)) => {
                if let Some(t) = set.as_singleton() {
                    return Some(SymbolValue::Tristate(t));
                }
            }
            Some(Decision::Value(value)) => return Some(value.clone()),
            None => {}
        }
        base_lookup(id)
    }
}

fn merge_into_solution(
    table: &SymbolTable,
    solution: &mut Solution,
    sym: SymbolId,
    decision: Decision,
) -> Result<(), SolveError> {
    let merged = match (solution.get(&sym), &decision) {
        (None, _) => decision,
        (Some(Decision::Tristate(a)), Decision::Tristate(b)) => {
            let both = *a & *b;
            if both.is_empty() {
                return Err(unsatisfiable(table.get(sym)));
            }
            Decision::Tristate(both)
        }
        (Some(existing), _) if *existing == decision => return Ok(()),
        _ => return Err(unsatisfiable(table.get(sym))),
    };
    solution.insert(sym, merged);
    Ok(())
}

fn merge_assignments(a: &Solution, b: &Solution) -> Option<Solution> {
    let mut merged = a.clone();
    for (sym, decision) in b {
        match merged.get(sym) {
            None => {
                merged.insert(*sym, decision.clone());
            }
            Some(Decision::Tristate(existing)) => {
                if let Decision::Tristate(incoming) = decision {
                    let both = *existing & *incoming;
                    if both.is_empty() {
                        return None;
                    }
                    merged.insert(*sym, Decision::Tristate(both));
                } else {
                    return None;
                }
            }
            Some(existing) => {
                if existing != decision {
                    return None;
                }
            }
        }
    }
    Some(merged)
}

/// All prerequisite assignments that make `symbol` reach `desired`:
/// `dir_dep >= desired`, and for promptless symbols additionally one of the
/// reverse-dependency clauses (they can only be enabled by a selector).
fn satisfy_symbol<L>(table: &SymbolTable, lookup: &L, symbol: &Symbol, desired: Tristate) -> Vec<Solution>
where
    L: Fn(SymbolId) -> Option<SymbolValue>,
{
    let mut alternatives = satisfy_expr(table, lookup, &symbol.dir_dep, desired);

    if symbol.prompt_count() == 0 && !symbol.rev_dep.or_clauses().is_empty() {
        let selected = satisfy_expr(table, lookup, &symbol.rev_dep, desired);
        let mut merged = Vec::new();
        for a in &alternatives {
            for b in &selected {
                if let Some(next) = merge_assignments(a, b) {
                    merged.push(next);
                }
            }
        }
        alternatives = merged;
    }
    alternatives
}

/// The recursive expression satisfier. Returns every assignment (as
/// `symbol -> value-set`) under which the expression evaluates to at least
/// `desired`; an empty list means the expression cannot be satisfied by
/// assignment.
fn satisfy_expr<L>(table: &SymbolTable, lookup: &L, expr: &Expr, desired: Tristate) -> Vec<Solution>
where
    L: Fn(SymbolId) -> Option<SymbolValue>,
{
    // Nothing to do when the expression already evaluates high enough.
    if expr.eval(lookup) >= desired {
        return vec![Solution::new()];
    }

    match expr {
        Expr::Const(_) => Vec::new(),
        Expr::And(a, b) => {
            let left = satisfy_expr(table, lookup, a, desired);
            let right = satisfy_expr(table, lookup, b, desired);
            let mut merged = Vec::new();
            for a in &left {
                for b in &right {
                    if let Some(next) = merge_assignments(a, b) {
                        merged.push(next);
                    }
                }
            }
            merged
        }
        Expr::Or(a, b) => {
            let mut alternatives = satisfy_expr(table, lookup, a, desired);
            alternatives.extend(satisfy_expr(table, lookup, b, desired));
            alternatives
        }
        Expr::Not(inner) => match &**inner {
            Expr::Symbol(s) => require(table, *s, TristateSet::NO),
            Expr::Eq(a, b) => satisfy_neq(table, *a, *b, desired),
            Expr::Neq(a, b) => satisfy_eq(table, *a, *b),
            _ => {
                debug!("cannot satisfy complex negated expression");
                Vec::new()
            }
        },
        Expr::Symbol(s) => require_at_least(table, *s, desired),
        Expr::Eq(a, b) => satisfy_eq(table, *a, *b),
        Expr::Neq(a, b) => satisfy_neq(table, *a, *b, desired),
        _ => {
            debug!("cannot satisfy comparison expression by assignment");
            Vec::new()
        }
    }
}

/// `sym = value` with one constant side.
fn satisfy_eq(table: &SymbolTable, a: SymbolId, b: SymbolId) -> Vec<Solution> {
    match const_tristate(table, a, b) {
        Some((sym, value)) => require(table, sym, TristateSet::only(value)),
        None => Vec::new(),
    }
}

/// `sym != value` with one constant side. The replacement value prefers the
/// desired strength and promotes around the excluded value.
fn satisfy_neq(table: &SymbolTable, a: SymbolId, b: SymbolId, desired: Tristate) -> Vec<Solution> {
    let Some((sym, excluded)) = const_tristate(table, a, b) else {
        return Vec::new();
    };
    let symbol = table.get(sym);
    let values = match excluded {
        Tristate::No => symbol.kind.all_values().at_least(desired),
        Tristate::Mod => TristateSet::YES,
        Tristate::Yes => TristateSet::MOD,
    };
    require(table, sym, values)
}

/// Splits an (symbol, constant) comparison; `None` when neither side is a
/// tristate constant.
fn const_tristate(table: &SymbolTable, a: SymbolId, b: SymbolId) -> Option<(SymbolId, Tristate)> {
    let (sym, konst) = if table.get(a).is_const() {
        (b, a)
    } else if table.get(b).is_const() {
        (a, b)
    } else {
        return None;
    };
    match table.get(konst).const_value {
        Some(SymbolValue::Tristate(t)) => Some((sym, t)),
        _ => None,
    }
}

/// A direct assignment requirement, restricted to what the symbol's kind
/// can express.
fn require(table: &SymbolTable, sym: SymbolId, values: TristateSet) -> Vec<Solution> {
    let symbol = table.get(sym);
    if symbol.is_const() {
        return match symbol.const_value {
            Some(SymbolValue::Tristate(t)) if values.contains_value(t) => vec![Solution::new()],
            _ => Vec::new(),
        };
    }
    let possible = values & (symbol.kind.all_values() | TristateSet::NO);
    if possible.is_empty() {
        return Vec::new();
    }
    vec![Solution::from_iter([(sym, Decision::Tristate(possible))])]
}

fn require_at_least(table: &SymbolTable, sym: SymbolId, desired: Tristate) -> Vec<Solution> {
    let symbol = table.get(sym);
    if symbol.is_const() {
        let value = symbol
            .const_value
            .as_ref()
            .map(SymbolValue::as_tristate)
            .unwrap_or(Tristate::No);
        return if value >= desired { vec![Solution::new()] } else { Vec::new() };
    }
    match symbol.kind {
        SymbolKind::Bool | SymbolKind::Tristate | SymbolKind::Choice => {
            let values = symbol.kind.all_values().at_least(desired);
            if values.is_empty() {
                return Vec::new();
            }
            vec![Solution::from_iter([(sym, Decision::Tristate(values))])]
        }
        _ => {
            debug!("cannot satisfy value-kind dependency by assignment");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::grouper;

    fn expand_all(table: &SymbolTable, decisions: &Decisions, base: &Config) -> Result<Solution, SolveError> {
        let mut roots: Vec<SymbolId> = base.iter().filter_map(|(n, _)| table.id_by_name(n)).collect();
        roots.extend(decisions.keys());
        let layers = grouper::group(table, roots);
        expand(table, &layers, decisions, base, &CancelToken::new())
    }

    fn tristate_chain() -> SymbolTable {
        let mut builder = SymbolTableBuilder::new();
        let a = builder.symbol("A", SymbolKind::Tristate);
        let b = builder.symbol("B", SymbolKind::Tristate);
        builder.add_prompt(a, "A", Expr::Const(Tristate::Yes));
        builder.add_prompt(b, "B", Expr::Const(Tristate::Yes));
        builder.set_dir_dep(b, Expr::Symbol(a));
        builder.finish()
    }

    use crate::kconfig::SymbolTableBuilder;

    #[test]
    fn no_expansion_needed_when_base_satisfies() {
        let table = tristate_chain();
        let mut base = Config::new();
        base.set(table.by_name("A").unwrap(), SymbolValue::Tristate(Tristate::Yes))
            .unwrap();

        let mut decisions = Decisions::new();
        decisions.module(table.by_name("B").unwrap()).unwrap();

        let solution = expand_all(&table, &decisions, &base).unwrap();
        assert_eq!(solution.len(), 1);
        assert_eq!(
            solution[&table.id_by_name("B").unwrap()],
            Decision::Tristate(TristateSet::MOD)
        );
    }

    #[test]
    fn missing_dependency_is_expanded() {
        let table = tristate_chain();
        let mut base = Config::new();
        base.set(table.by_name("A").unwrap(), SymbolValue::Tristate(Tristate::No))
            .unwrap();

        let mut decisions = Decisions::new();
        decisions.module(table.by_name("B").unwrap()).unwrap();

        let solution = expand_all(&table, &decisions, &base).unwrap();
        // B=m needs A >= m; both m and y stay acceptable for A.
        assert_eq!(
            solution[&table.id_by_name("A").unwrap()],
            Decision::Tristate(TristateSet::MOD | TristateSet::YES)
        );
    }

    #[test]
    fn builtin_decision_needs_builtin_dependency() {
        let table = tristate_chain();
        let base = Config::new();
        let mut decisions = Decisions::new();
        decisions.builtin(table.by_name("B").unwrap()).unwrap();

        let solution = expand_all(&table, &decisions, &base).unwrap();
        assert_eq!(
            solution[&table.id_by_name("B").unwrap()],
            Decision::Tristate(TristateSet::YES)
        );
        assert_eq!(
            solution[&table.id_by_name("A").unwrap()],
            Decision::Tristate(TristateSet::YES)
        );
    }

    #[test]
    fn disable_needs_no_expansion() {
        let table = tristate_chain();
        let base = Config::new();
        let mut decisions = Decisions::new();
        decisions.disable(table.by_name("B").unwrap()).unwrap();

        let solution = expand_all(&table, &decisions, &base).unwrap();
        assert_eq!(solution.len(), 1);
        assert!(solution[&table.id_by_name("B").unwrap()].is_disable());
    }

    #[test]
    fn or_dependencies_pick_minimum_impact() {
        // C depends on A || (B1 && B2): enabling A touches fewer symbols.
        let mut builder = SymbolTableBuilder::new();
        let a = builder.symbol("A", SymbolKind::Bool);
        let b1 = builder.symbol("B1", SymbolKind::Bool);
        let b2 = builder.symbol("B2", SymbolKind::Bool);
        let c = builder.symbol("C", SymbolKind::Bool);
        for (sym, name) in [(a, "A"), (b1, "B1"), (b2, "B2"), (c, "C")] {
            builder.add_prompt(sym, name, Expr::Const(Tristate::Yes));
        }
        builder.set_dir_dep(
            c,
            Expr::Or(
                Box::new(Expr::Symbol(a)),
                Box::new(Expr::And(Box::new(Expr::Symbol(b1)), Box::new(Expr::Symbol(b2)))),
            ),
        );
        let table = builder.finish();

        let mut decisions = Decisions::new();
        decisions.builtin(table.by_name("C").unwrap()).unwrap();

        let solution = expand_all(&table, &decisions, &Config::new()).unwrap();
        assert!(solution.contains_key(&a));
        assert!(!solution.contains_key(&b1));
        assert!(!solution.contains_key(&b2));
    }

    #[test]
    fn lexicographic_tie_break() {
        // C depends on B || A, both equally cheap: A wins by name.
        let mut builder = SymbolTableBuilder::new();
        let b = builder.symbol("B", SymbolKind::Bool);
        let a = builder.symbol("A", SymbolKind::Bool);
        let c = builder.symbol("C", SymbolKind::Bool);
        for (sym, name) in [(a, "A"), (b, "B"), (c, "C")] {
            builder.add_prompt(sym, name, Expr::Const(Tristate::Yes));
        }
        builder.set_dir_dep(c, Expr::Or(Box::new(Expr::Symbol(b)), Box::new(Expr::Symbol(a))));
        let table = builder.finish();

        let mut decisions = Decisions::new();
        decisions.builtin(table.by_name("C").unwrap()).unwrap();

        let solution = expand_all(&table, &decisions, &Config::new()).unwrap();
        assert!(solution.contains_key(&a));
        assert!(!solution.contains_key(&b));
    }

    #[test]
    fn negated_dependency_disables_blocker() {
        let mut builder = SymbolTableBuilder::new();
        let old = builder.symbol("OLD_DRIVER", SymbolKind::Bool);
        let new = builder.symbol("NEW_DRIVER", SymbolKind::Bool);
        builder.add_prompt(old, "old", Expr::Const(Tristate::Yes));
        builder.add_prompt(new, "new", Expr::Const(Tristate::Yes));
        builder.set_dir_dep(new, Expr::Not(Box::new(Expr::Symbol(old))));
        let table = builder.finish();

        let mut base = Config::new();
        base.set(table.by_name("OLD_DRIVER").unwrap(), SymbolValue::Tristate(Tristate::Yes))
            .unwrap();

        let mut decisions = Decisions::new();
        decisions.builtin(table.by_name("NEW_DRIVER").unwrap()).unwrap();

        let solution = expand_all(&table, &decisions, &base).unwrap();
        assert!(solution[&old].is_disable());
    }

    #[test]
    fn unsatisfiable_constant_dependency() {
        let mut builder = SymbolTableBuilder::new();
        let dead = builder.symbol("DEAD", SymbolKind::Bool);
        builder.add_prompt(dead, "dead", Expr::Const(Tristate::Yes));
        builder.set_dir_dep(dead, Expr::Const(Tristate::No));
        let table = builder.finish();

        let mut decisions = Decisions::new();
        decisions.builtin(table.by_name("DEAD").unwrap()).unwrap();

        let err = expand_all(&table, &decisions, &Config::new()).unwrap_err();
        assert_eq!(err, SolveError::Unsatisfiable { symbol: "DEAD".into() });
    }

    #[test]
    fn promptless_symbol_expands_through_selector() {
        // LIB has no prompt; only GADGET selects it. Requesting LIB must
        // enable GADGET (and GADGET's own dependency).
        let mut builder = SymbolTableBuilder::new();
        let core = builder.symbol("CORE", SymbolKind::Tristate);
        let gadget = builder.symbol("GADGET", SymbolKind::Tristate);
        let lib = builder.symbol("LIB", SymbolKind::Tristate);
        builder.add_prompt(core, "core", Expr::Const(Tristate::Yes));
        builder.add_prompt(gadget, "gadget", Expr::Const(Tristate::Yes));
        builder.set_dir_dep(gadget, Expr::Symbol(core));
        builder.add_select(gadget, lib, Expr::Const(Tristate::Yes));
        let table = builder.finish();

        let mut decisions = Decisions::new();
        decisions.module(table.by_name("LIB").unwrap()).unwrap();

        let solution = expand_all(&table, &decisions, &Config::new()).unwrap();
        assert_eq!(
            solution[&gadget],
            Decision::Tristate(TristateSet::MOD | TristateSet::YES)
        );
        assert_eq!(solution[&core], Decision::Tristate(TristateSet::MOD | TristateSet::YES));
    }

    #[test]
    fn conflicting_expansion_requirements_fail() {
        // B needs BLOCK=y, C needs !BLOCK; requesting both cannot work.
        let mut builder = SymbolTableBuilder::new();
        let block = builder.symbol("BLOCK", SymbolKind::Bool);
        let b = builder.symbol("B", SymbolKind::Bool);
        let c = builder.symbol("C", SymbolKind::Bool);
        for (sym, name) in [(block, "BLOCK"), (b, "B"), (c, "C")] {
            builder.add_prompt(sym, name, Expr::Const(Tristate::Yes));
        }
        builder.set_dir_dep(b, Expr::Symbol(block));
        builder.set_dir_dep(c, Expr::Not(Box::new(Expr::Symbol(block))));
        let table = builder.finish();

        let mut decisions = Decisions::new();
        decisions.builtin(table.by_name("B").unwrap()).unwrap();
        decisions.builtin(table.by_name("C").unwrap()).unwrap();

        assert!(expand_all(&table, &decisions, &Config::new()).is_err());
    }

    #[test]
    fn cancellation_stops_expansion() {
        let table = tristate_chain();
        let mut decisions = Decisions::new();
        decisions.module(table.by_name("B").unwrap()).unwrap();

        let layers = grouper::group(&table, decisions.keys().collect());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = expand(&table, &layers, &decisions, &Config::new(), &cancel).unwrap_err();
        assert_eq!(err, SolveError::Cancelled);
    }
}
