//! Statement conditions (`if`/`unless`). Conditions compile once into a
//! small postfix program so they can be re-evaluated cheaply against the
//! `(kernel version, symbol table, previous truth)` context.

use std::cmp::Ordering;
use std::path::Path;
use std::str::FromStr;

use super::token::Token;
use super::DslError;
use crate::config::CONFIG_PREFIX;
use crate::kconfig::SymbolTable;

/// The running kernel tree's version, as found in `KERNELVERSION`.
/// `-rc`/localversion suffixes are tolerated and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl KernelVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> KernelVersion {
        KernelVersion { major, minor, patch }
    }

    fn component(&self, i: usize) -> u64 {
        match i {
            0 => self.major,
            1 => self.minor,
            _ => self.patch,
        }
    }

    /// Compares against a version literal, considering only as many
    /// components as the literal provides: `kver == 5.4` holds for any
    /// 5.4.x kernel.
    fn compare_req(&self, req: &VersionReq) -> Ordering {
        for (i, part) in req.parts.iter().enumerate().take(3) {
            match self.component(i).cmp(part) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl FromStr for KernelVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let numeric_prefix = |part: &str| -> Result<u64, ()> {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().map_err(|_| ())
        };

        let mut parts = s.split('.');
        let major = numeric_prefix(parts.next().ok_or(())?)?;
        let minor = parts.next().map(numeric_prefix).transpose()?.unwrap_or(0);
        let patch = parts.next().map(numeric_prefix).transpose()?.unwrap_or(0);
        Ok(KernelVersion { major, minor, patch })
    }
}

impl std::fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn parse(s: &str) -> Option<CmpOp> {
        Some(match s {
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            "==" | "=" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            _ => return None,
        })
    }

    fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
        }
    }
}

/// A version literal from a condition; keeps only the components that were
/// actually written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionReq {
    parts: Vec<u64>,
}

impl FromStr for VersionReq {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split('.')
            .map(|p| p.parse::<u64>().map_err(|_| ()))
            .collect::<Result<Vec<_>, _>>()?;
        if parts.is_empty() || parts.len() > 3 {
            return Err(());
        }
        Ok(VersionReq { parts })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CondOp {
    True,
    False,
    /// `_`: the previous statement condition's truth value.
    Prev,
    /// `exists` without argument: every target of the statement resolves.
    ExistsTarget,
    /// `exists ARG`: a symbol (or a file, when the argument looks like a
    /// path) exists.
    Exists(String),
    Kver(CmpOp, VersionReq),
    Kmaj(CmpOp, u64),
    Kmin(CmpOp, u64),
    Kpatch(CmpOp, u64),
    Not,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondProgram {
    ops: Vec<CondOp>,
}

pub struct CondContext<'a> {
    pub kernel_version: KernelVersion,
    pub table: &'a SymbolTable,
    /// Raw target tokens of the enclosing statement (for bare `exists`).
    pub targets: &'a [String],
    pub prev: bool,
}

impl CondProgram {
    pub fn eval(&self, ctx: &CondContext) -> bool {
        let mut stack: Vec<bool> = Vec::new();
        for op in &self.ops {
            match op {
                CondOp::True => stack.push(true),
                CondOp::False => stack.push(false),
                CondOp::Prev => stack.push(ctx.prev),
                CondOp::ExistsTarget => {
                    let all = !ctx.targets.is_empty()
                        && ctx.targets.iter().all(|t| symbol_exists(ctx.table, t));
                    stack.push(all);
                }
                CondOp::Exists(arg) => stack.push(exists(ctx.table, arg)),
                CondOp::Kver(op, req) => stack.push(op.matches(ctx.kernel_version.compare_req(req))),
                CondOp::Kmaj(op, n) => stack.push(op.matches(ctx.kernel_version.major.cmp(n))),
                CondOp::Kmin(op, n) => stack.push(op.matches(ctx.kernel_version.minor.cmp(n))),
                CondOp::Kpatch(op, n) => stack.push(op.matches(ctx.kernel_version.patch.cmp(n))),
                CondOp::Not => {
                    let a = stack.pop().unwrap_or(false);
                    stack.push(!a);
                }
                CondOp::And => {
                    let b = stack.pop().unwrap_or(false);
                    let a = stack.pop().unwrap_or(false);
                    stack.push(a && b);
                }
                CondOp::Or => {
                    let b = stack.pop().unwrap_or(false);
                    let a = stack.pop().unwrap_or(false);
                    stack.push(a || b);
                }
            }
        }
        stack.pop().unwrap_or(false)
    }

    /// Whether the program guards target existence, which downgrades an
    /// unknown target from a hard error to a skipped statement.
    pub fn guards_existence(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, CondOp::ExistsTarget))
    }
}

fn exists(table: &SymbolTable, arg: &str) -> bool {
    if arg.contains('/') {
        return Path::new(arg).exists();
    }
    symbol_exists(table, arg)
}

fn symbol_exists(table: &SymbolTable, name: &str) -> bool {
    let name = name.strip_prefix(CONFIG_PREFIX).unwrap_or(name);
    table.by_name(name).is_some()
}

/// Recursive-descent compiler for condition token streams. Precedence is
/// `!` over `&&` over `||`.
pub fn compile(file: &str, line: usize, tokens: &[Token]) -> Result<CondProgram, DslError> {
    let error = |message: String| DslError::Parse {
        file: file.to_string(),
        line,
        message,
    };

    // Split leading `!` off fused tokens so `!exists` and `! exists` parse
    // the same way.
    let mut split: Vec<Token> = Vec::new();
    for token in tokens {
        if !token.quoted {
            let mut rest = token.text.as_str();
            while let Some(stripped) = rest.strip_prefix('!') {
                if stripped.starts_with('=') {
                    break;
                }
                split.push(Token {
                    text: "!".into(),
                    quoted: false,
                });
                rest = stripped;
            }
            if !rest.is_empty() {
                split.push(Token {
                    text: rest.to_string(),
                    quoted: token.quoted,
                });
            }
        } else {
            split.push(token.clone());
        }
    }

    let mut parser = CondParser {
        tokens: &split,
        pos: 0,
        ops: Vec::new(),
    };
    parser.parse_or(&error)?;
    if parser.pos != parser.tokens.len() {
        return Err(error(format!(
            "unexpected token {:?} in condition",
            parser.tokens[parser.pos].text
        )));
    }
    Ok(CondProgram { ops: parser.ops })
}

struct CondParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ops: Vec<CondOp>,
}

impl<'a> CondParser<'a> {
    fn peek_keyword(&self) -> Option<String> {
        self.tokens.get(self.pos).and_then(|t| t.keyword())
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or<E>(&mut self, error: &E) -> Result<(), DslError>
    where
        E: Fn(String) -> DslError,
    {
        self.parse_and(error)?;
        while matches!(self.peek_keyword().as_deref(), Some("||" | "or")) {
            self.pos += 1;
            self.parse_and(error)?;
            self.ops.push(CondOp::Or);
        }
        Ok(())
    }

    fn parse_and<E>(&mut self, error: &E) -> Result<(), DslError>
    where
        E: Fn(String) -> DslError,
    {
        self.parse_not(error)?;
        while matches!(self.peek_keyword().as_deref(), Some("&&" | "and")) {
            self.pos += 1;
            self.parse_not(error)?;
            self.ops.push(CondOp::And);
        }
        Ok(())
    }

    fn parse_not<E>(&mut self, error: &E) -> Result<(), DslError>
    where
        E: Fn(String) -> DslError,
    {
        let mut negations = 0;
        while matches!(self.peek_keyword().as_deref(), Some("!" | "not")) {
            self.pos += 1;
            negations += 1;
        }
        self.parse_atom(error)?;
        for _ in 0..negations {
            self.ops.push(CondOp::Not);
        }
        Ok(())
    }

    fn parse_atom<E>(&mut self, error: &E) -> Result<(), DslError>
    where
        E: Fn(String) -> DslError,
    {
        let token = self.next().ok_or_else(|| error("missing condition".into()))?;
        let keyword = token.keyword();
        match keyword.as_deref() {
            Some("true") => self.ops.push(CondOp::True),
            Some("false") => self.ops.push(CondOp::False),
            Some("_") => self.ops.push(CondOp::Prev),
            Some("exists") => {
                // An optional argument: the next token unless it starts a
                // combinator.
                let arg = match self.peek_keyword().as_deref() {
                    None | Some("&&" | "and" | "||" | "or" | "!" | "not") => None,
                    _ => self.next().map(|t| t.text.clone()),
                };
                self.ops.push(match arg {
                    Some(arg) => CondOp::Exists(arg),
                    None => CondOp::ExistsTarget,
                });
            }
            Some(kw @ ("kver" | "kmaj" | "kmin" | "kpatch")) => {
                let kw = kw.to_string();
                let op = self
                    .next()
                    .and_then(|t| CmpOp::parse(&t.text))
                    .ok_or_else(|| error(format!("{} needs a comparison operator", kw)))?;
                let operand = self
                    .next()
                    .ok_or_else(|| error(format!("{} needs a version operand", kw)))?;
                let cond_op = if kw == "kver" {
                    let req = operand
                        .text
                        .parse::<VersionReq>()
                        .map_err(|_| error(format!("invalid version {:?}", operand.text)))?;
                    CondOp::Kver(op, req)
                } else {
                    let n = operand
                        .text
                        .parse::<u64>()
                        .map_err(|_| error(format!("invalid number {:?}", operand.text)))?;
                    match kw.as_str() {
                        "kmaj" => CondOp::Kmaj(op, n),
                        "kmin" => CondOp::Kmin(op, n),
                        _ => CondOp::Kpatch(op, n),
                    }
                };
                self.ops.push(cond_op);
            }
            _ => {
                return Err(error(format!("unexpected token {:?} in condition", token.text)));
            }
        }
        Ok(())
    }
}
