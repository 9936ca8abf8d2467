//! The informed oldconfig runner: starting from a (partially resolved)
//! config, repeatedly assign sensible values to symbols that became
//! assignable, honoring "off" decisions the way `make oldconfig` honors an
//! answer file. The pass terminates because every iteration only shrinks
//! the set of unassigned assignable symbols.

use std::collections::HashSet;

use log::warn;

use super::{config_lookup, CancelToken, Solution, SolveError};
use crate::config::Config;
use crate::kconfig::{Expr, Symbol, SymbolId, SymbolKind, SymbolTable, SymbolValue, Tristate};

pub fn run(
    table: &SymbolTable,
    mut config: Config,
    decisions: &Solution,
    cancel: &CancelToken,
) -> Result<Config, SolveError> {
    let mut processed_choices: HashSet<SymbolId> = HashSet::new();
    let mut iterations = 0usize;

    loop {
        cancel.check()?;

        let (new, new_choices) = collect_assignable(table, &config, decisions, &processed_choices);
        if new.is_empty() && new_choices.is_empty() {
            break;
        }

        for sym_id in new {
            let value = initial_value(table, &config, decisions, sym_id);
            match value {
                Some(value) => {
                    config
                        .set(table.get(sym_id), value)
                        .expect("initial values match the symbol kind");
                }
                // A value-kind symbol pinned off stays absent.
                None => {}
            }
        }

        for choice_id in new_choices {
            processed_choices.insert(choice_id);
            resolve_choice(table, &mut config, decisions, choice_id);
        }

        iterations += 1;
        if iterations > table.len() + 1 {
            warn!("oldconfig did not converge, giving up");
            break;
        }
    }
    Ok(config)
}

/// Symbols that have no value yet but can receive one: user-visible ones,
/// selected ones, and promptless ones whose default fires.
fn collect_assignable(
    table: &SymbolTable,
    config: &Config,
    decisions: &Solution,
    processed_choices: &HashSet<SymbolId>,
) -> (Vec<SymbolId>, Vec<SymbolId>) {
    let lookup = config_lookup(table, config);
    let mut new = Vec::new();
    let mut new_choices = Vec::new();

    for symbol in table.iter_all() {
        if symbol.is_const() || symbol.kind == SymbolKind::Unknown {
            continue;
        }
        if symbol.kind == SymbolKind::Choice {
            if !processed_choices.contains(&symbol.id()) && symbol.visibility(&lookup) > Tristate::No {
                new_choices.push(symbol.id());
            }
            continue;
        }
        // Members receive their value when their choice group activates.
        if symbol.choice_parent.is_some() {
            continue;
        }
        let Some(name) = symbol.name.as_deref() else {
            continue;
        };
        if config.contains(name) {
            continue;
        }
        // A value kind pinned off stays permanently absent; treating it as
        // assignable would keep the fixpoint busy forever.
        if !symbol.kind.is_tristate_like()
            && decisions.get(&symbol.id()).map_or(false, |d| d.is_disable())
        {
            continue;
        }

        let dir = symbol.direct_deps(&lookup);
        let vis = symbol.visibility(&lookup);
        let rev = symbol.reverse_deps(&lookup);
        let has_default = first_applicable_default(symbol, &lookup).is_some();
        if vis > Tristate::No || rev > Tristate::No || (dir > Tristate::No && has_default) {
            new.push(symbol.id());
        }
    }
    (new, new_choices)
}

fn first_applicable_default<'a, L>(symbol: &'a Symbol, lookup: &L) -> Option<&'a Expr>
where
    L: Fn(SymbolId) -> Option<SymbolValue>,
{
    symbol
        .defaults
        .iter()
        .find(|d| d.condition.eval(lookup) >= Tristate::Mod)
        .map(|d| &d.value)
}

/// The value a newly assignable symbol receives: `n` when the decisions pin
/// it off, otherwise its first applicable default clamped to what the
/// dependencies allow, raised to what the reverse dependencies require.
/// `None` keeps the symbol absent (disabled value kinds).
fn initial_value(
    table: &SymbolTable,
    config: &Config,
    decisions: &Solution,
    sym_id: SymbolId,
) -> Option<SymbolValue> {
    let lookup = config_lookup(table, config);
    let symbol = table.get(sym_id);
    let pinned_off = decisions.get(&sym_id).map_or(false, |d| d.is_disable());

    match symbol.kind {
        SymbolKind::Bool | SymbolKind::Tristate => {
            if pinned_off {
                return Some(SymbolValue::Tristate(Tristate::No));
            }
            let default = first_applicable_default(symbol, &lookup)
                .map(|value| value.eval(&lookup))
                .unwrap_or(Tristate::No);

            // Defaults of promptless symbols are not limited by prompt
            // visibility, only by the dependencies themselves.
            let upper = if symbol.prompt_count() > 0 {
                symbol.visibility(&lookup)
            } else {
                symbol.direct_deps(&lookup)
            };
            let rev = symbol.reverse_deps(&lookup);
            let mut value = default.min(upper).max(rev);
            if symbol.kind == SymbolKind::Bool && value > Tristate::No {
                value = Tristate::Yes;
            }
            Some(SymbolValue::Tristate(value))
        }
        SymbolKind::Int | SymbolKind::Hex | SymbolKind::String => {
            if pinned_off {
                return None;
            }
            let value = first_applicable_default(symbol, &lookup)
                .map(|value| default_literal(symbol, value, &lookup))
                .unwrap_or_else(|| zero_value(symbol.kind));
            Some(value)
        }
        _ => None,
    }
}

/// Resolves a default expression of a value-kind symbol: usually a symbol
/// reference whose (constant) value is taken and coerced to the kind.
fn default_literal<L>(symbol: &Symbol, value: &Expr, lookup: &L) -> SymbolValue
where
    L: Fn(SymbolId) -> Option<SymbolValue>,
{
    let Expr::Symbol(source) = value else {
        return zero_value(symbol.kind);
    };
    match lookup(*source) {
        Some(SymbolValue::String(text)) if symbol.kind != SymbolKind::String => {
            symbol.parse_value(&text).unwrap_or_else(|_| zero_value(symbol.kind))
        }
        Some(value @ SymbolValue::String(_)) if symbol.kind == SymbolKind::String => value,
        Some(value @ SymbolValue::Int(_)) if symbol.kind == SymbolKind::Int => value,
        Some(value @ SymbolValue::Hex(_)) if symbol.kind == SymbolKind::Hex => value,
        _ => zero_value(symbol.kind),
    }
}

fn zero_value(kind: SymbolKind) -> SymbolValue {
    match kind {
        SymbolKind::Int => SymbolValue::Int(0),
        SymbolKind::Hex => SymbolValue::Hex(0),
        _ => SymbolValue::String(String::new()),
    }
}

/// Within an active choice exactly one member ends up `y`: a member the
/// config or decisions already picked, else the first firing choice
/// default, else the first visible member. Every other member becomes `n`.
fn resolve_choice(table: &SymbolTable, config: &mut Config, decisions: &Solution, choice_id: SymbolId) {
    let choice = table.get(choice_id);
    let members = &choice.choice_members;
    if members.is_empty() {
        return;
    }

    // Member visibility is evaluated with the (anonymous) choice treated as
    // active.
    let member_lookup = {
        let lookup = config_lookup(table, config);
        move |id: SymbolId| {
            if id == choice_id {
                return Some(SymbolValue::Tristate(Tristate::Yes));
            }
            lookup(id)
        }
    };

    let already_picked = members.iter().copied().find(|m| {
        table
            .get(*m)
            .name
            .as_deref()
            .and_then(|n| config.get(n))
            .map_or(false, |v| v.tristate() == Some(Tristate::Yes))
    });
    let decided = members.iter().copied().find(|m| {
        matches!(decisions.get(m), Some(crate::decision::Decision::Tristate(set))
            if set.contains_value(Tristate::Yes))
    });
    let defaulted = first_applicable_default(choice, &member_lookup).and_then(|value| match value {
        Expr::Symbol(id) if members.contains(id) => Some(*id),
        _ => None,
    });
    let visible = members
        .iter()
        .copied()
        .find(|m| table.get(*m).visibility(&member_lookup) > Tristate::No);
    drop(member_lookup);

    let winner = already_picked
        .or(decided)
        .or(defaulted)
        .or(visible)
        .unwrap_or(members[0]);

    for member_id in members {
        let member = table.get(*member_id);
        let value = Tristate::from(*member_id == winner);
        if member.name.is_some() {
            config
                .set(member, SymbolValue::Tristate(value))
                .expect("choice members are bool-like");
        }
    }
}
