use std::cmp::Ordering;
use std::fmt;

use super::table::SymbolTable;
use super::types::{SymbolId, SymbolValue, Tristate};

/// Immutable boolean/comparison tree over symbol references. Evaluation is
/// total and side-effect-free; a missing symbol evaluates as `n`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Expr {
    Const(Tristate),
    Symbol(SymbolId),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(SymbolId, SymbolId),
    Neq(SymbolId, SymbolId),
    Lth(SymbolId, SymbolId),
    Leq(SymbolId, SymbolId),
    Gth(SymbolId, SymbolId),
    Geq(SymbolId, SymbolId),
    Range(SymbolId, SymbolId),
    List(Option<Box<Expr>>, SymbolId),
}

/// Compare two symbol values of comparable kinds. String operands (constant
/// symbols carry their literal as a string) are coerced to the other side's
/// kind first. Returns `None` when the kinds cannot be compared, which
/// collapses the comparison to `n`.
fn compare(l: &SymbolValue, r: &SymbolValue) -> Option<Ordering> {
    match (l, r) {
        (SymbolValue::Tristate(a), SymbolValue::Tristate(b)) => Some(a.cmp(b)),
        (SymbolValue::Int(a), SymbolValue::Int(b)) => Some(a.cmp(b)),
        (SymbolValue::Hex(a), SymbolValue::Hex(b)) => Some(a.cmp(b)),
        (SymbolValue::Int(a), SymbolValue::Hex(b)) => Some((*a as i128).cmp(&(*b as i128))),
        (SymbolValue::Hex(a), SymbolValue::Int(b)) => Some((*a as i128).cmp(&(*b as i128))),
        (SymbolValue::String(a), SymbolValue::String(b)) => Some(a.cmp(b)),
        (SymbolValue::String(a), SymbolValue::Tristate(_)) => {
            compare(&SymbolValue::Tristate(a.parse().ok()?), r)
        }
        (SymbolValue::Tristate(_), SymbolValue::String(b)) => {
            compare(l, &SymbolValue::Tristate(b.parse().ok()?))
        }
        (SymbolValue::String(a), SymbolValue::Int(_) | SymbolValue::Hex(_)) => {
            compare(&parse_numeric(a)?, r)
        }
        (SymbolValue::Int(_) | SymbolValue::Hex(_), SymbolValue::String(b)) => {
            compare(l, &parse_numeric(b)?)
        }
        _ => None,
    }
}

fn parse_numeric(s: &str) -> Option<SymbolValue> {
    if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(digits, 16).ok().map(SymbolValue::Hex)
    } else {
        s.parse::<i64>().ok().map(SymbolValue::Int)
    }
}

impl Expr {
    pub fn eval<L>(&self, lookup: &L) -> Tristate
    where
        L: Fn(SymbolId) -> Option<SymbolValue>,
    {
        let value_of = |sym: SymbolId| lookup(sym).unwrap_or(SymbolValue::Tristate(Tristate::No));
        let cmp = |l: SymbolId, r: SymbolId| compare(&value_of(l), &value_of(r));

        match self {
            Expr::Const(t) => *t,
            Expr::Symbol(s) => value_of(*s).as_tristate(),
            Expr::Not(e) => e.eval(lookup).invert(),
            Expr::And(l, r) => l.eval(lookup).and(r.eval(lookup)),
            Expr::Or(l, r) => l.eval(lookup).or(r.eval(lookup)),
            Expr::Eq(l, r) => Tristate::from(cmp(*l, *r) == Some(Ordering::Equal)),
            Expr::Neq(l, r) => {
                Tristate::from(matches!(cmp(*l, *r), Some(Ordering::Less | Ordering::Greater)))
            }
            Expr::Lth(l, r) => Tristate::from(cmp(*l, *r) == Some(Ordering::Less)),
            Expr::Leq(l, r) => {
                Tristate::from(matches!(cmp(*l, *r), Some(Ordering::Less | Ordering::Equal)))
            }
            Expr::Gth(l, r) => Tristate::from(cmp(*l, *r) == Some(Ordering::Greater)),
            Expr::Geq(l, r) => {
                Tristate::from(matches!(cmp(*l, *r), Some(Ordering::Greater | Ordering::Equal)))
            }
            // Ranges only occur as symbol range properties; in an expression
            // position there is no subject to test.
            Expr::Range(_, _) => Tristate::No,
            Expr::List(prev, s) => {
                let tail = value_of(*s).as_tristate();
                match prev {
                    Some(e) => e.eval(lookup).or(tail),
                    None => tail,
                }
            }
        }
    }

    /// All symbol references in this expression, in syntactic order.
    pub fn collect_symbols(&self, out: &mut Vec<SymbolId>) {
        match self {
            Expr::Const(_) => {}
            Expr::Symbol(s) => out.push(*s),
            Expr::Not(e) => e.collect_symbols(out),
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_symbols(out);
                r.collect_symbols(out);
            }
            Expr::Eq(l, r)
            | Expr::Neq(l, r)
            | Expr::Lth(l, r)
            | Expr::Leq(l, r)
            | Expr::Gth(l, r)
            | Expr::Geq(l, r)
            | Expr::Range(l, r) => {
                out.push(*l);
                out.push(*r);
            }
            Expr::List(prev, s) => {
                if let Some(e) = prev {
                    e.collect_symbols(out);
                }
                out.push(*s);
            }
        }
    }

    /// Splits a conjunction into its clauses (a single clause otherwise).
    pub fn and_clauses(&self) -> Vec<&Expr> {
        match self {
            Expr::And(l, r) => {
                let mut clauses = l.and_clauses();
                clauses.extend(r.and_clauses());
                clauses
            }
            other => vec![other],
        }
    }

    /// Splits a disjunction into its clauses (a single clause otherwise).
    pub fn or_clauses(&self) -> Vec<&Expr> {
        match self {
            Expr::Or(l, r) => {
                let mut clauses = l.or_clauses();
                clauses.extend(r.or_clauses());
                clauses
            }
            Expr::Const(Tristate::No) => vec![],
            other => vec![other],
        }
    }

    pub fn display<'a>(&'a self, table: &'a SymbolTable) -> ExprDisplay<'a> {
        ExprDisplay { expr: self, table }
    }
}

enum ParentType {
    And,
    Or,
    Other,
}

pub struct ExprDisplay<'a> {
    expr: &'a Expr,
    table: &'a SymbolTable,
}

fn symstr<'a>(table: &'a SymbolTable, sym: SymbolId) -> &'a str {
    table.get(sym).name.as_deref().unwrap_or("<choice>")
}

fn display_expr(table: &SymbolTable, expr: &Expr, f: &mut fmt::Formatter<'_>, parent: ParentType) -> fmt::Result {
    match (parent, expr) {
        (ParentType::And, Expr::And(l, r)) => {
            display_expr(table, l, f, ParentType::And)?;
            write!(f, " && ")?;
            display_expr(table, r, f, ParentType::And)
        }
        (ParentType::Or, Expr::Or(l, r)) => {
            display_expr(table, l, f, ParentType::Or)?;
            write!(f, " || ")?;
            display_expr(table, r, f, ParentType::Or)
        }
        (_, Expr::And(l, r)) => {
            write!(f, "(")?;
            display_expr(table, l, f, ParentType::And)?;
            write!(f, " && ")?;
            display_expr(table, r, f, ParentType::And)?;
            write!(f, ")")
        }
        (_, Expr::Or(l, r)) => {
            write!(f, "(")?;
            display_expr(table, l, f, ParentType::Or)?;
            write!(f, " || ")?;
            display_expr(table, r, f, ParentType::Or)?;
            write!(f, ")")
        }
        (_, Expr::Not(e)) => {
            write!(f, "!")?;
            display_expr(table, e, f, ParentType::Other)
        }
        (_, Expr::Const(t)) => write!(f, "{}", t),
        (_, Expr::Symbol(s)) => write!(f, "{}", symstr(table, *s)),
        (_, Expr::Eq(l, r)) => write!(f, "{} = {}", symstr(table, *l), symstr(table, *r)),
        (_, Expr::Neq(l, r)) => write!(f, "{} != {}", symstr(table, *l), symstr(table, *r)),
        (_, Expr::Lth(l, r)) => write!(f, "{} < {}", symstr(table, *l), symstr(table, *r)),
        (_, Expr::Leq(l, r)) => write!(f, "{} <= {}", symstr(table, *l), symstr(table, *r)),
        (_, Expr::Gth(l, r)) => write!(f, "{} > {}", symstr(table, *l), symstr(table, *r)),
        (_, Expr::Geq(l, r)) => write!(f, "{} >= {}", symstr(table, *l), symstr(table, *r)),
        (_, Expr::Range(l, r)) => write!(f, "[{} {}]", symstr(table, *l), symstr(table, *r)),
        (_, Expr::List(prev, s)) => {
            if let Some(e) = prev {
                display_expr(table, e, f, ParentType::Other)?;
                write!(f, " ^ ")?;
            }
            write!(f, "{}", symstr(table, *s))
        }
    }
}

impl<'a> fmt::Display for ExprDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_expr(self.table, self.expr, f, ParentType::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(i: u32) -> SymbolId {
        SymbolId(i)
    }

    #[test]
    fn eval_boolean_operators() {
        let lookup = |s: SymbolId| {
            Some(SymbolValue::Tristate(match s.0 {
                0 => Tristate::No,
                1 => Tristate::Mod,
                _ => Tristate::Yes,
            }))
        };

        let a = Expr::Symbol(sym(1));
        let b = Expr::Symbol(sym(2));
        assert_eq!(Expr::And(Box::new(a.clone()), Box::new(b.clone())).eval(&lookup), Tristate::Mod);
        assert_eq!(Expr::Or(Box::new(a.clone()), Box::new(b)).eval(&lookup), Tristate::Yes);
        assert_eq!(Expr::Not(Box::new(a)).eval(&lookup), Tristate::Mod);
        assert_eq!(Expr::Symbol(sym(0)).eval(&lookup), Tristate::No);
    }

    #[test]
    fn eval_missing_symbol_is_no() {
        let lookup = |_: SymbolId| None;
        assert_eq!(Expr::Symbol(sym(7)).eval(&lookup), Tristate::No);
        // n = n holds even when both operands are unknown
        assert_eq!(Expr::Eq(sym(7), sym(8)).eval(&lookup), Tristate::Yes);
    }

    #[test]
    fn eval_comparisons() {
        let lookup = |s: SymbolId| {
            Some(match s.0 {
                0 => SymbolValue::Int(4),
                1 => SymbolValue::Int(10),
                2 => SymbolValue::String("foo".into()),
                _ => SymbolValue::Tristate(Tristate::Yes),
            })
        };
        assert_eq!(Expr::Lth(sym(0), sym(1)).eval(&lookup), Tristate::Yes);
        assert_eq!(Expr::Geq(sym(0), sym(1)).eval(&lookup), Tristate::No);
        assert_eq!(Expr::Neq(sym(0), sym(1)).eval(&lookup), Tristate::Yes);
        // int vs string is not comparable and collapses to n
        assert_eq!(Expr::Eq(sym(0), sym(2)).eval(&lookup), Tristate::No);
        assert_eq!(Expr::Neq(sym(0), sym(2)).eval(&lookup), Tristate::No);
    }

    #[test]
    fn clause_splitting() {
        let e = Expr::And(
            Box::new(Expr::And(Box::new(Expr::Symbol(sym(0))), Box::new(Expr::Symbol(sym(1))))),
            Box::new(Expr::Symbol(sym(2))),
        );
        assert_eq!(e.and_clauses().len(), 3);
        assert_eq!(e.or_clauses().len(), 1);
        assert!(Expr::Const(Tristate::No).or_clauses().is_empty());
    }
}
