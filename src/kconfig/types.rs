use colored::Color;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

/// Three-valued logic over `n < m < y`. `and` is min, `or` is max.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Hash)]
#[repr(u8)]
pub enum Tristate {
    No,
    Mod,
    Yes,
}

impl Tristate {
    pub fn and(self, other: Tristate) -> Tristate {
        self.min(other)
    }

    pub fn or(self, other: Tristate) -> Tristate {
        self.max(other)
    }

    pub fn invert(self) -> Tristate {
        match self {
            Tristate::No => Tristate::Yes,
            Tristate::Mod => Tristate::Mod,
            Tristate::Yes => Tristate::No,
        }
    }

    pub fn color(&self) -> Color {
        match self {
            Tristate::No => Color::Red,
            Tristate::Mod => Color::Cyan,
            Tristate::Yes => Color::Green,
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value {
            Tristate::Yes
        } else {
            Tristate::No
        }
    }
}

impl FromStr for Tristate {
    type Err = ();
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "n" => Ok(Tristate::No),
            "m" => Ok(Tristate::Mod),
            "y" => Ok(Tristate::Yes),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tristate::No => write!(f, "n"),
            Tristate::Mod => write!(f, "m"),
            Tristate::Yes => write!(f, "y"),
        }
    }
}

bitflags! {
    /// The still-acceptable tristate values for a symbol. Decisions shrink
    /// this set by intersection; an empty intersection is a conflict.
    pub struct TristateSet: u8 {
        const NO  = 0b001;
        const MOD = 0b010;
        const YES = 0b100;
    }
}

impl TristateSet {
    pub fn only(value: Tristate) -> TristateSet {
        match value {
            Tristate::No => TristateSet::NO,
            Tristate::Mod => TristateSet::MOD,
            Tristate::Yes => TristateSet::YES,
        }
    }

    pub fn contains_value(&self, value: Tristate) -> bool {
        self.contains(TristateSet::only(value))
    }

    /// Smallest contained value in `n < m < y` order.
    pub fn min_value(&self) -> Option<Tristate> {
        self.iter_values().next()
    }

    /// Largest contained value.
    pub fn max_value(&self) -> Option<Tristate> {
        self.iter_values().last()
    }

    pub fn as_singleton(&self) -> Option<Tristate> {
        let mut it = self.iter_values();
        match (it.next(), it.next()) {
            (Some(v), None) => Some(v),
            _ => None,
        }
    }

    pub fn iter_values(&self) -> impl Iterator<Item = Tristate> + '_ {
        [Tristate::No, Tristate::Mod, Tristate::Yes]
            .into_iter()
            .filter(|v| self.contains_value(*v))
    }

    /// Values of `self` that are at least `value`.
    pub fn at_least(&self, value: Tristate) -> TristateSet {
        let mut out = TristateSet::empty();
        for v in self.iter_values() {
            if v >= value {
                out |= TristateSet::only(v);
            }
        }
        out
    }
}

impl fmt::Display for TristateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.iter_values().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
    }
}

/// The declared kind of a symbol. Int and hex are first-class even though
/// the kernel stores them as strings internally.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SymbolKind {
    Unknown,
    Bool,
    Tristate,
    Int,
    Hex,
    String,
    Choice,
}

impl SymbolKind {
    pub fn is_tristate_like(&self) -> bool {
        matches!(self, SymbolKind::Bool | SymbolKind::Tristate | SymbolKind::Choice)
    }

    /// The full value-set a symbol of this kind may take.
    pub fn all_values(&self) -> TristateSet {
        match self {
            SymbolKind::Tristate => TristateSet::NO | TristateSet::MOD | TristateSet::YES,
            SymbolKind::Bool | SymbolKind::Choice => TristateSet::NO | TristateSet::YES,
            _ => TristateSet::empty(),
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Unknown => "unknown",
            SymbolKind::Bool => "bool",
            SymbolKind::Tristate => "tristate",
            SymbolKind::Int => "int",
            SymbolKind::Hex => "hex",
            SymbolKind::String => "string",
            SymbolKind::Choice => "choice",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SymbolKind {
    type Err = ();
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "unknown" => SymbolKind::Unknown,
            "bool" | "boolean" => SymbolKind::Bool,
            "tristate" => SymbolKind::Tristate,
            "int" => SymbolKind::Int,
            "hex" => SymbolKind::Hex,
            "string" => SymbolKind::String,
            "choice" => SymbolKind::Choice,
            _ => return Err(()),
        })
    }
}

/// A concrete value held by a symbol. Bool symbols use the tristate variant
/// restricted to `n`/`y`. Int is signed because a few kernel options
/// (e.g. PANIC_TIMEOUT) take negative values.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum SymbolValue {
    Tristate(Tristate),
    Int(i64),
    Hex(u64),
    String(String),
}

impl SymbolValue {
    pub fn tristate(&self) -> Option<Tristate> {
        match self {
            SymbolValue::Tristate(t) => Some(*t),
            _ => None,
        }
    }

    /// Tristate view used by expression evaluation: non-tristate values
    /// count as enabled when nonempty/nonzero.
    pub fn as_tristate(&self) -> Tristate {
        match self {
            SymbolValue::Tristate(t) => *t,
            SymbolValue::Int(_) | SymbolValue::Hex(_) => Tristate::Yes,
            SymbolValue::String(s) => Tristate::from(!s.is_empty()),
        }
    }
}

/// A dense index into the symbol arena. Expressions reference symbols by id
/// so the AST stays a plain value type even though the graph is cyclic.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}
