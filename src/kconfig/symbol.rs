use std::fmt::Write as _;

use thiserror::Error;

use super::expr::Expr;
use super::types::{SymbolId, SymbolKind, SymbolValue, Tristate};

use bitflags::bitflags;

bitflags! {
    pub struct SymbolFlags: u32 {
        const CONST     = 0x0001;
        const CHOICE    = 0x0010;
        const CHOICEVAL = 0x0020;
        const OPTIONAL  = 0x0100;
    }
}

/// A prompt makes a symbol user-choosable while its visibility holds.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    pub visible: Expr,
}

#[derive(Debug, Clone)]
pub struct Select {
    pub target: SymbolId,
    pub condition: Expr,
}

#[derive(Debug, Clone)]
pub struct DefaultValue {
    pub value: Expr,
    pub condition: Expr,
}

/// Valid bounds for an int/hex symbol. Bounds are symbol references, the
/// way Kconfig stores them (usually constant symbols).
#[derive(Debug, Clone)]
pub struct RangeBound {
    pub low: SymbolId,
    pub high: SymbolId,
    pub condition: Expr,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("valid tristates are: n, m, y")]
    InvalidTristate,
    #[error("valid booleans are: n, y")]
    InvalidBoolean,
    #[error("cannot be parsed as an integer")]
    InvalidInt,
    #[error("cannot be parsed as a hex integer")]
    InvalidHex,
    #[error("{kind} symbols cannot be assigned directly")]
    NotAssignable { kind: SymbolKind },
    #[error("incompatible value for a {kind} symbol")]
    KindMismatch { kind: SymbolKind },
}

/// An immutable symbol descriptor. Built once per kernel source tree by the
/// importer and shared read-only by any number of configs.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub(crate) id: SymbolId,
    pub name: Option<String>,
    pub kind: SymbolKind,
    pub flags: SymbolFlags,
    /// The `depends on` clause. Defaults to constant `y`.
    pub dir_dep: Expr,
    /// Disjunction of the select clauses targeting this symbol. Defaults to
    /// constant `n`.
    pub rev_dep: Expr,
    pub prompts: Vec<Prompt>,
    pub selects: Vec<Select>,
    pub defaults: Vec<DefaultValue>,
    pub ranges: Vec<RangeBound>,
    /// Members, when this symbol is a choice.
    pub choice_members: Vec<SymbolId>,
    /// The owning choice, when this symbol is a choice member.
    pub choice_parent: Option<SymbolId>,
    /// Constant symbols carry their value in their name (`n`, `m`, `y`,
    /// number and string literals used as comparison operands).
    pub const_value: Option<SymbolValue>,
}

impl Symbol {
    pub fn id(&self) -> SymbolId {
        self.id
    }

    pub fn is_const(&self) -> bool {
        self.flags.intersects(SymbolFlags::CONST)
    }

    pub fn is_choice(&self) -> bool {
        self.flags.intersects(SymbolFlags::CHOICE)
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.len()
    }

    /// `vis(s)`: the direct dependencies anded with the strongest visible
    /// prompt. A symbol without prompts is not user-choosable and has
    /// visibility `n`.
    pub fn visibility<L>(&self, lookup: &L) -> Tristate
    where
        L: Fn(SymbolId) -> Option<SymbolValue>,
    {
        let prompt_vis = self
            .prompts
            .iter()
            .map(|p| p.visible.eval(lookup))
            .max()
            .unwrap_or(Tristate::No);
        self.dir_dep.eval(lookup).and(prompt_vis)
    }

    pub fn direct_deps<L>(&self, lookup: &L) -> Tristate
    where
        L: Fn(SymbolId) -> Option<SymbolValue>,
    {
        self.dir_dep.eval(lookup)
    }

    pub fn reverse_deps<L>(&self, lookup: &L) -> Tristate
    where
        L: Fn(SymbolId) -> Option<SymbolValue>,
    {
        self.rev_dep.eval(lookup)
    }

    /// First range whose condition holds, resolved to numeric bounds.
    pub fn active_range<L>(&self, lookup: &L) -> Option<(i128, i128)>
    where
        L: Fn(SymbolId) -> Option<SymbolValue>,
    {
        let numeric = |sym: SymbolId| -> Option<i128> {
            match lookup(sym)? {
                SymbolValue::Int(v) => Some(v as i128),
                SymbolValue::Hex(v) => Some(v as i128),
                SymbolValue::String(s) if matches!(self.kind, SymbolKind::Int | SymbolKind::Hex) => {
                    match parse_int_literal(&s, self.kind).ok()? {
                        SymbolValue::Int(v) => Some(v as i128),
                        SymbolValue::Hex(v) => Some(v as i128),
                        _ => None,
                    }
                }
                _ => None,
            }
        };
        for range in &self.ranges {
            if range.condition.eval(lookup) >= Tristate::Mod {
                return Some((numeric(range.low)?, numeric(range.high)?));
            }
        }
        None
    }

    /// Parses a textual value according to this symbol's kind. The input is
    /// the raw right-hand side of an assignment, strings already unescaped.
    pub fn parse_value(&self, text: &str) -> Result<SymbolValue, ValueError> {
        match self.kind {
            SymbolKind::Tristate => text
                .parse::<Tristate>()
                .map(SymbolValue::Tristate)
                .map_err(|_| ValueError::InvalidTristate),
            SymbolKind::Bool => match text {
                "y" => Ok(SymbolValue::Tristate(Tristate::Yes)),
                "n" => Ok(SymbolValue::Tristate(Tristate::No)),
                _ => Err(ValueError::InvalidBoolean),
            },
            SymbolKind::Int | SymbolKind::Hex => parse_int_literal(text, self.kind),
            SymbolKind::String => Ok(SymbolValue::String(text.to_string())),
            kind => Err(ValueError::NotAssignable { kind }),
        }
    }

    /// Checks that a value is representable by this symbol's kind.
    pub fn validate_value(&self, value: &SymbolValue) -> Result<(), ValueError> {
        match (self.kind, value) {
            (SymbolKind::Tristate, SymbolValue::Tristate(_)) => Ok(()),
            (SymbolKind::Bool | SymbolKind::Choice, SymbolValue::Tristate(t)) if *t != Tristate::Mod => Ok(()),
            (SymbolKind::Bool | SymbolKind::Choice, SymbolValue::Tristate(_)) => Err(ValueError::InvalidBoolean),
            (SymbolKind::Int, SymbolValue::Int(_)) => Ok(()),
            (SymbolKind::Hex, SymbolValue::Hex(_)) => Ok(()),
            (SymbolKind::String, SymbolValue::String(_)) => Ok(()),
            // Disabling a value-kind symbol marks it as absent from the
            // config; there is no text to validate.
            (SymbolKind::Int | SymbolKind::Hex | SymbolKind::String, SymbolValue::Tristate(Tristate::No)) => Ok(()),
            (kind, _) => Err(ValueError::KindMismatch { kind }),
        }
    }

    /// Canonical right-hand side for a `.config` line, or `None` when the
    /// value is expressed as a `# CONFIG_<name> is not set` comment (tristate
    /// and bool `n`) or omitted entirely (disabled value kinds).
    pub fn format_value(&self, value: &SymbolValue) -> Option<String> {
        match value {
            SymbolValue::Tristate(Tristate::No) => None,
            SymbolValue::Tristate(t) => Some(t.to_string()),
            SymbolValue::Int(v) => Some(v.to_string()),
            SymbolValue::Hex(v) => Some(format!("0x{:x}", v)),
            SymbolValue::String(s) => Some(format!("\"{}\"", escape_string(s))),
        }
    }
}

fn parse_int_literal(text: &str, kind: SymbolKind) -> Result<SymbolValue, ValueError> {
    match kind {
        SymbolKind::Int => text.parse::<i64>().map(SymbolValue::Int).map_err(|_| ValueError::InvalidInt),
        SymbolKind::Hex => {
            let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
            u64::from_str_radix(digits, 16)
                .map(SymbolValue::Hex)
                .map_err(|_| ValueError::InvalidHex)
        }
        _ => unreachable!(),
    }
}

pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape_string(s: &str) -> Result<String, ValueError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(c @ ('\\' | '"')) => out.push(c),
                _ => return Err(ValueError::KindMismatch { kind: SymbolKind::String }),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Renders a symbol with its value for diagnostics, e.g. `USB=m`.
pub fn display_assignment(name: &str, value: &SymbolValue) -> String {
    let mut out = String::new();
    match value {
        SymbolValue::Tristate(t) => write!(out, "{}={}", name, t),
        SymbolValue::Int(v) => write!(out, "{}={}", name, v),
        SymbolValue::Hex(v) => write!(out, "{}=0x{:x}", name, v),
        SymbolValue::String(s) => write!(out, "{}=\"{}\"", name, escape_string(s)),
    }
    .ok();
    out
}
