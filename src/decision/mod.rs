//! The decision store: for every requested symbol the set of values that is
//! still acceptable after intersecting all user requests.

pub mod dsl;

use indexmap::IndexMap;
use thiserror::Error;

use crate::kconfig::{Symbol, SymbolId, SymbolKind, SymbolValue, TristateSet};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("conflicting requests for symbol {symbol} leave no acceptable value")]
    Conflict { symbol: String },
    #[error("cannot {request} {kind} symbol {symbol}")]
    TypeMismatch {
        symbol: String,
        kind: SymbolKind,
        request: &'static str,
    },
    #[error("invalid value {value:?} for {kind} symbol {symbol}")]
    InvalidValue {
        symbol: String,
        kind: SymbolKind,
        value: String,
    },
}

/// The still-acceptable values for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// For tristate and bool symbols: a nonempty subset of their values.
    Tristate(TristateSet),
    /// For string/int/hex symbols: a single literal.
    Value(SymbolValue),
}

impl Decision {
    /// A decision that pins the symbol to "off".
    pub fn is_disable(&self) -> bool {
        matches!(self, Decision::Tristate(set) if *set == TristateSet::NO)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Tristate(set) => write!(f, "{}", set),
            Decision::Value(SymbolValue::String(s)) => write!(f, "{:?}", s),
            Decision::Value(SymbolValue::Int(v)) => write!(f, "{}", v),
            Decision::Value(SymbolValue::Hex(v)) => write!(f, "0x{:x}", v),
            Decision::Value(SymbolValue::Tristate(t)) => write!(f, "{}", t),
        }
    }
}

/// Accumulated modification requests for one generation pass. Successive
/// requests on the same symbol intersect; an empty intersection is a hard
/// error unless the symbol is discarded first.
#[derive(Debug, Default)]
pub struct Decisions {
    entries: IndexMap<SymbolId, Decision>,
}

impl Decisions {
    pub fn new() -> Decisions {
        Decisions::default()
    }

    pub fn get(&self, sym: SymbolId) -> Option<&Decision> {
        self.entries.get(&sym)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Decision)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `disable FOO`: force off.
    pub fn disable(&mut self, symbol: &Symbol) -> Result<(), DecisionError> {
        match symbol.kind {
            SymbolKind::Bool | SymbolKind::Tristate | SymbolKind::Choice => {
                self.intersect(symbol, TristateSet::NO)
            }
            SymbolKind::Int | SymbolKind::Hex | SymbolKind::String => {
                // "Off" for a value kind means the option carries no text;
                // an earlier literal request contradicts that.
                match self.entries.get(&symbol.id()) {
                    Some(Decision::Value(_)) => Err(conflict(symbol)),
                    _ => {
                        self.entries.insert(symbol.id(), Decision::Tristate(TristateSet::NO));
                        Ok(())
                    }
                }
            }
            kind => Err(mismatch(symbol, kind, "disable")),
        }
    }

    /// `module FOO`: force `m`. Only meaningful for tristate symbols.
    pub fn module(&mut self, symbol: &Symbol) -> Result<(), DecisionError> {
        match symbol.kind {
            SymbolKind::Tristate => self.intersect(symbol, TristateSet::MOD),
            kind => Err(mismatch(symbol, kind, "module")),
        }
    }

    /// `builtin FOO`: force `y`.
    pub fn builtin(&mut self, symbol: &Symbol) -> Result<(), DecisionError> {
        match symbol.kind {
            SymbolKind::Bool | SymbolKind::Tristate | SymbolKind::Choice => {
                self.intersect(symbol, TristateSet::YES)
            }
            kind => Err(mismatch(symbol, kind, "builtin")),
        }
    }

    /// `builtin-or-module FOO`: accept either `m` or `y` (just `y` for
    /// bools).
    pub fn builtin_or_module(&mut self, symbol: &Symbol) -> Result<(), DecisionError> {
        match symbol.kind {
            SymbolKind::Tristate => self.intersect(symbol, TristateSet::MOD | TristateSet::YES),
            SymbolKind::Bool | SymbolKind::Choice => self.intersect(symbol, TristateSet::YES),
            kind => Err(mismatch(symbol, kind, "builtin-or-module")),
        }
    }

    /// `set FOO value`: a single literal value of the symbol's kind.
    pub fn set(&mut self, symbol: &Symbol, text: &str) -> Result<(), DecisionError> {
        let value = symbol.parse_value(text).map_err(|_| DecisionError::InvalidValue {
            symbol: display_name(symbol),
            kind: symbol.kind,
            value: text.to_string(),
        })?;
        match value {
            SymbolValue::Tristate(t) => self.intersect(symbol, TristateSet::only(t)),
            value => match self.entries.get(&symbol.id()) {
                None => {
                    self.entries.insert(symbol.id(), Decision::Value(value));
                    Ok(())
                }
                Some(Decision::Value(existing)) if *existing == value => Ok(()),
                Some(_) => Err(conflict(symbol)),
            },
        }
    }

    /// `append FOO text`: extend a string literal, joined by exactly one
    /// space. Bypasses intersection because it mutates the literal.
    pub fn append(&mut self, symbol: &Symbol, text: &str, base: Option<&SymbolValue>) -> Result<(), DecisionError> {
        if symbol.kind != SymbolKind::String {
            return Err(mismatch(symbol, symbol.kind, "append"));
        }
        let mut current = self.seed_string(symbol, base)?;
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(text);
        self.entries.insert(symbol.id(), Decision::Value(SymbolValue::String(current)));
        Ok(())
    }

    /// `add FOO text`: whitespace set-union for strings, numeric addition
    /// for ints.
    pub fn add(&mut self, symbol: &Symbol, text: &str, base: Option<&SymbolValue>) -> Result<(), DecisionError> {
        match symbol.kind {
            SymbolKind::String => {
                let mut current = self.seed_string(symbol, base)?;
                for token in text.split_whitespace() {
                    if !current.split_whitespace().any(|t| t == token) {
                        if !current.is_empty() {
                            current.push(' ');
                        }
                        current.push_str(token);
                    }
                }
                self.entries.insert(symbol.id(), Decision::Value(SymbolValue::String(current)));
                Ok(())
            }
            SymbolKind::Int => {
                let addend: i64 = text.parse().map_err(|_| DecisionError::InvalidValue {
                    symbol: display_name(symbol),
                    kind: symbol.kind,
                    value: text.to_string(),
                })?;
                let current = match self.entries.get(&symbol.id()) {
                    Some(Decision::Value(SymbolValue::Int(v))) => *v,
                    Some(_) => return Err(conflict(symbol)),
                    None => match base {
                        Some(SymbolValue::Int(v)) => *v,
                        _ => 0,
                    },
                };
                self.entries
                    .insert(symbol.id(), Decision::Value(SymbolValue::Int(current + addend)));
                Ok(())
            }
            kind => Err(mismatch(symbol, kind, "add")),
        }
    }

    /// `discard FOO`: drop all accumulated requests for the symbol.
    pub fn discard(&mut self, symbol: &Symbol) {
        self.entries.shift_remove(&symbol.id());
    }

    fn seed_string(&self, symbol: &Symbol, base: Option<&SymbolValue>) -> Result<String, DecisionError> {
        match self.entries.get(&symbol.id()) {
            Some(Decision::Value(SymbolValue::String(s))) => Ok(s.clone()),
            Some(_) => Err(conflict(symbol)),
            None => match base {
                Some(SymbolValue::String(s)) => Ok(s.clone()),
                _ => Ok(String::new()),
            },
        }
    }

    fn intersect(&mut self, symbol: &Symbol, requested: TristateSet) -> Result<(), DecisionError> {
        let merged = match self.entries.get(&symbol.id()) {
            None => requested,
            Some(Decision::Tristate(existing)) => *existing & requested,
            Some(Decision::Value(_)) => TristateSet::empty(),
        };
        if merged.is_empty() {
            return Err(conflict(symbol));
        }
        self.entries.insert(symbol.id(), Decision::Tristate(merged));
        Ok(())
    }
}

fn display_name(symbol: &Symbol) -> String {
    symbol.name.clone().unwrap_or_else(|| "<choice>".into())
}

fn conflict(symbol: &Symbol) -> DecisionError {
    DecisionError::Conflict {
        symbol: display_name(symbol),
    }
}

fn mismatch(symbol: &Symbol, kind: SymbolKind, request: &'static str) -> DecisionError {
    DecisionError::TypeMismatch {
        symbol: display_name(symbol),
        kind,
        request,
    }
}
