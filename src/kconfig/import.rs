//! Importer for the JSON symbol dump emitted by the external Kconfig
//! parser. Importing is a plain function from input to a fresh
//! [`SymbolTable`]; no process-global state is involved, so any number of
//! trees can be imported in one process.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

use serde::Deserialize;
use thiserror::Error;

use super::expr::Expr;
use super::table::{SymbolTable, SymbolTableBuilder};
use super::types::{SymbolKind, Tristate};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("could not read symbol dump")]
    Io(#[from] std::io::Error),
    #[error("malformed symbol dump")]
    Json(#[from] serde_json::Error),
    #[error("symbol {symbol} has unknown kind {kind:?}")]
    UnknownKind { symbol: String, kind: String },
    #[error("symbol {symbol} is declared twice")]
    DuplicateSymbol { symbol: String },
    #[error("choice references undeclared member {member}")]
    UnknownChoiceMember { member: String },
    #[error("kconfig parser exited with {status}")]
    ParserFailed { status: std::process::ExitStatus },
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawSymbol {
    name: Option<String>,
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    depends: Option<RawExpr>,
    #[serde(default)]
    prompts: Vec<RawPrompt>,
    #[serde(default)]
    defaults: Vec<RawDefault>,
    #[serde(default)]
    selects: Vec<RawSelect>,
    #[serde(default)]
    ranges: Vec<RawRange>,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawPrompt {
    text: String,
    #[serde(default)]
    visible: Option<RawExpr>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawDefault {
    value: RawExpr,
    #[serde(default)]
    condition: Option<RawExpr>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawSelect {
    target: String,
    #[serde(default)]
    condition: Option<RawExpr>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawRange {
    low: String,
    high: String,
    #[serde(default)]
    condition: Option<RawExpr>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "op", rename_all = "lowercase")]
enum RawExpr {
    Const { value: String },
    Symbol { name: String },
    Not { expr: Box<RawExpr> },
    And { left: Box<RawExpr>, right: Box<RawExpr> },
    Or { left: Box<RawExpr>, right: Box<RawExpr> },
    Eq { left: String, right: String },
    Neq { left: String, right: String },
    Lth { left: String, right: String },
    Leq { left: String, right: String },
    Gth { left: String, right: String },
    Geq { left: String, right: String },
    Range { left: String, right: String },
    List { prev: Option<Box<RawExpr>>, symbol: String },
}

struct Importer {
    builder: SymbolTableBuilder,
    declared: HashMap<String, SymbolKind>,
}

impl Importer {
    /// Comparison operands and default values name either a declared symbol
    /// or a literal; anything not declared becomes a constant symbol.
    fn operand(&mut self, name: &str) -> super::types::SymbolId {
        if self.declared.contains_key(name) {
            self.builder.reference(name)
        } else {
            self.builder.constant(name)
        }
    }

    fn convert(&mut self, raw: &RawExpr) -> Expr {
        match raw {
            RawExpr::Const { value } => {
                Expr::Const(value.parse::<Tristate>().unwrap_or(Tristate::No))
            }
            RawExpr::Symbol { name } => Expr::Symbol(self.operand(name)),
            RawExpr::Not { expr } => Expr::Not(Box::new(self.convert(expr))),
            RawExpr::And { left, right } => {
                Expr::And(Box::new(self.convert(left)), Box::new(self.convert(right)))
            }
            RawExpr::Or { left, right } => {
                Expr::Or(Box::new(self.convert(left)), Box::new(self.convert(right)))
            }
            RawExpr::Eq { left, right } => Expr::Eq(self.operand(left), self.operand(right)),
            RawExpr::Neq { left, right } => Expr::Neq(self.operand(left), self.operand(right)),
            RawExpr::Lth { left, right } => Expr::Lth(self.operand(left), self.operand(right)),
            RawExpr::Leq { left, right } => Expr::Leq(self.operand(left), self.operand(right)),
            RawExpr::Gth { left, right } => Expr::Gth(self.operand(left), self.operand(right)),
            RawExpr::Geq { left, right } => Expr::Geq(self.operand(left), self.operand(right)),
            RawExpr::Range { left, right } => Expr::Range(self.operand(left), self.operand(right)),
            RawExpr::List { prev, symbol } => {
                let prev = prev.as_ref().map(|e| Box::new(self.convert(e)));
                Expr::List(prev, self.operand(symbol))
            }
        }
    }

    fn convert_opt(&mut self, raw: &Option<RawExpr>, fallback: Tristate) -> Expr {
        match raw {
            Some(raw) => self.convert(raw),
            None => Expr::Const(fallback),
        }
    }
}

pub fn from_json_str(content: &str) -> Result<SymbolTable, ImportError> {
    let raw_symbols: Vec<RawSymbol> = serde_json::from_str(content)?;
    let mut importer = Importer {
        builder: SymbolTableBuilder::new(),
        declared: HashMap::new(),
    };

    // First pass: declare every named symbol so that expression operands can
    // tell symbols and constants apart.
    for raw in &raw_symbols {
        let kind = raw.typ.parse::<SymbolKind>().map_err(|_| ImportError::UnknownKind {
            symbol: raw.name.clone().unwrap_or_else(|| "<choice>".into()),
            kind: raw.typ.clone(),
        })?;
        if let Some(name) = &raw.name {
            if importer.declared.insert(name.clone(), kind).is_some() {
                return Err(ImportError::DuplicateSymbol { symbol: name.clone() });
            }
        }
    }

    // Second pass: create symbols in emission order and attach expressions.
    for raw in &raw_symbols {
        let kind = raw.typ.parse::<SymbolKind>().unwrap();
        let id = if kind == SymbolKind::Choice {
            let members = raw
                .members
                .iter()
                .map(|m| {
                    if !importer.declared.contains_key(m) {
                        return Err(ImportError::UnknownChoiceMember { member: m.clone() });
                    }
                    Ok(importer.builder.reference(m))
                })
                .collect::<Result<Vec<_>, _>>()?;
            importer.builder.choice(raw.name.as_deref(), &members)
        } else {
            // A plain declaration; reference() placeholders from earlier
            // expressions are upgraded in place.
            match &raw.name {
                Some(name) => importer.builder.symbol(name, kind),
                None => continue,
            }
        };

        let dep = importer.convert_opt(&raw.depends, Tristate::Yes);
        importer.builder.set_dir_dep(id, dep);
        for prompt in &raw.prompts {
            let visible = importer.convert_opt(&prompt.visible, Tristate::Yes);
            importer.builder.add_prompt(id, &prompt.text, visible);
        }
        for default in &raw.defaults {
            let value = importer.convert(&default.value);
            let condition = importer.convert_opt(&default.condition, Tristate::Yes);
            importer.builder.add_default(id, value, condition);
        }
        for select in &raw.selects {
            let target = importer.builder.reference(&select.target);
            let condition = importer.convert_opt(&select.condition, Tristate::Yes);
            importer.builder.add_select(id, target, condition);
        }
        for range in &raw.ranges {
            let low = importer.operand(&range.low);
            let high = importer.operand(&range.high);
            let condition = importer.convert_opt(&range.condition, Tristate::Yes);
            importer.builder.add_range(id, low, high, condition);
        }
    }

    Ok(importer.builder.finish())
}

pub fn from_json_file(path: impl AsRef<Path>) -> Result<SymbolTable, ImportError> {
    let content = std::fs::read_to_string(path)?;
    from_json_str(&content)
}

/// Runs the external Kconfig parser and imports the symbol dump it prints
/// to stdout. The parser expects `ARCH`, `SRCARCH`, `KERNELVERSION` and
/// `srctree` in its environment; absent entries are inherited.
pub fn from_command(
    command: &[String],
    kernel_dir: impl AsRef<Path>,
    env: &[(String, String)],
) -> Result<SymbolTable, ImportError> {
    let mut child = Command::new(&command[0]);
    child
        .args(&command[1..])
        .current_dir(kernel_dir.as_ref())
        .env("srctree", kernel_dir.as_ref())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    for (k, v) in env {
        child.env(k, v);
    }

    let mut child = child.spawn()?;
    let mut stdout = String::new();
    child
        .stdout
        .take()
        .expect("stdout was piped")
        .read_to_string(&mut stdout)?;
    let status = child.wait()?;
    if !status.success() {
        return Err(ImportError::ParserFailed { status });
    }
    from_json_str(&stdout)
}
