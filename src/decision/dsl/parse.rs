//! Statement parser: token streams become typed statements of the shape
//! `<verb> [modifier] <target...> [if|unless <cond>]`.

use super::cond::{self, CondProgram};
use super::token::{StatementTokens, Token};
use super::DslError;

/// Keywords that must be quoted to be used as symbol names.
pub const RESERVED: &[&str] = &[
    "disable", "n", "module", "m", "builtin", "y", "builtin-or-module", "ym", "set", "append", "add", "discard",
    "include", "driver", "modalias", "if", "unless", "not", "and", "or", "true", "false", "_", "exists", "kver",
    "kmaj", "kmin", "kpatch", "packages", "pkg", "hwdetect", "hardware-detect",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Disable,
    Module,
    Builtin,
    BuiltinOrModule,
    Set,
    Append,
    Add,
    Discard,
    Include,
    HardwareDetect,
    Packages,
}

impl Verb {
    fn from_keyword(keyword: &str) -> Option<Verb> {
        Some(match keyword {
            "disable" | "n" => Verb::Disable,
            "module" | "m" => Verb::Module,
            "builtin" | "y" => Verb::Builtin,
            "builtin-or-module" | "ym" => Verb::BuiltinOrModule,
            "set" => Verb::Set,
            "append" => Verb::Append,
            "add" => Verb::Add,
            "discard" => Verb::Discard,
            "include" => Verb::Include,
            "hardware-detect" | "hwdetect" => Verb::HardwareDetect,
            "packages" | "pkg" => Verb::Packages,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Verb::Disable => "disable",
            Verb::Module => "module",
            Verb::Builtin => "builtin",
            Verb::BuiltinOrModule => "builtin-or-module",
            Verb::Set => "set",
            Verb::Append => "append",
            Verb::Add => "add",
            Verb::Discard => "discard",
            Verb::Include => "include",
            Verb::HardwareDetect => "hardware-detect",
            Verb::Packages => "packages",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    /// Targets are kernel module names, resolved to symbols externally.
    Driver,
    /// Targets are module aliases, resolved to modules first.
    Modalias,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub verb: Verb,
    pub modifier: Option<Modifier>,
    /// Symbol names, module names/aliases, a file for `include`, or
    /// package names, depending on verb and modifier.
    pub targets: Vec<String>,
    /// The literal for `set`/`append`/`add`.
    pub value: Option<String>,
    pub cond: Option<CondProgram>,
    /// `unless` inverts the condition.
    pub unless: bool,
    pub line: usize,
}

pub fn parse(file: &str, statements: Vec<StatementTokens>) -> Result<Vec<Statement>, DslError> {
    statements
        .into_iter()
        .map(|tokens| parse_statement(file, tokens))
        .collect()
}

fn parse_statement(file: &str, statement: StatementTokens) -> Result<Statement, DslError> {
    let line = statement.line;
    let error = |message: String| DslError::Parse {
        file: file.to_string(),
        line,
        message,
    };

    let mut tokens = statement.tokens;

    // Split off a trailing `if`/`unless` condition first; those keywords
    // cannot occur in target position unquoted.
    let mut cond = None;
    let mut unless = false;
    if let Some(pos) = tokens
        .iter()
        .position(|t| t.is_keyword("if") || t.is_keyword("unless"))
    {
        unless = tokens[pos].is_keyword("unless");
        let cond_tokens = tokens.split_off(pos + 1);
        tokens.pop();
        if cond_tokens.is_empty() {
            return Err(error("missing condition after if/unless".into()));
        }
        cond = Some(cond::compile(file, line, &cond_tokens)?);
    }

    let mut tokens = tokens.into_iter().peekable();
    let verb_token = tokens.next().ok_or_else(|| error("empty statement".into()))?;
    let verb = verb_token
        .keyword()
        .as_deref()
        .and_then(Verb::from_keyword)
        .ok_or_else(|| error(format!("unknown verb {:?}", verb_token.text)))?;

    let modifier = match tokens.peek() {
        Some(t) if t.is_keyword("driver") => {
            tokens.next();
            Some(Modifier::Driver)
        }
        Some(t) if t.is_keyword("modalias") => {
            tokens.next();
            Some(Modifier::Modalias)
        }
        _ => None,
    };
    if modifier.is_some() && !matches!(verb, Verb::Disable | Verb::Module | Verb::Builtin | Verb::BuiltinOrModule) {
        return Err(error(format!("{} does not take a driver/modalias modifier", verb.name())));
    }

    let rest: Vec<Token> = tokens.collect();
    let mut targets: Vec<String> = rest.iter().map(|t| t.text.clone()).collect();
    let mut value = None;

    // How many leading tokens name symbols (and thus may not collide with
    // unquoted keywords); the value token and file/package arguments are
    // free-form.
    let symbol_targets;
    match verb {
        Verb::Set | Verb::Append | Verb::Add => {
            if targets.len() != 2 {
                return Err(error(format!("{} takes a symbol and a value", verb.name())));
            }
            value = targets.pop();
            symbol_targets = 1;
        }
        Verb::Include => {
            if targets.len() != 1 {
                return Err(error("include takes exactly one file".into()));
            }
            symbol_targets = 0;
        }
        Verb::HardwareDetect => {
            symbol_targets = 0;
        }
        Verb::Packages => {
            if targets.is_empty() {
                return Err(error("packages takes at least one package name".into()));
            }
            symbol_targets = 0;
        }
        _ => {
            if targets.is_empty() {
                return Err(error(format!("{} takes at least one symbol", verb.name())));
            }
            symbol_targets = targets.len();
        }
    }

    for token in rest.iter().take(symbol_targets) {
        if let Some(keyword) = token.keyword() {
            if RESERVED.contains(&keyword.as_str()) {
                return Err(error(format!(
                    "reserved keyword {:?} must be quoted to name a symbol",
                    token.text
                )));
            }
        }
    }

    Ok(Statement {
        verb,
        modifier,
        targets,
        value,
        cond,
        unless,
        line,
    })
}
