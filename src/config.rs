//! The mutable `symbol -> value` mapping and the `.config` text format.
//!
//! The on-disk format is bit-exact compatible with the kernel's own
//! configuration files: `# CONFIG_<NAME> is not set` for disabled
//! tristates, `CONFIG_<NAME>=<value>` otherwise, strings quoted with
//! `\\` and `\"` escapes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::warn;
use thiserror::Error;

use crate::kconfig::symbol::unescape_string;
use crate::kconfig::{Symbol, SymbolKind, SymbolTable, SymbolValue, Tristate, ValueError};

pub const CONFIG_PREFIX: &str = "CONFIG_";
const NOT_SET_SUFFIX: &str = " is not set";
const HEADER: &str = "#\n# Automatically generated file; DO NOT EDIT.\n#\n";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("symbol {symbol}: {source}")]
    InvalidValue {
        symbol: String,
        #[source]
        source: ValueError,
    },
    #[error("symbol has no name and cannot be stored in a config")]
    Anonymous,
}

/// A single kernel configuration. Known symbols are kept as typed values,
/// unknown ones as raw text (only when the caller asked to preserve them).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    values: IndexMap<String, SymbolValue>,
    /// Unknown symbol name -> raw right-hand side (`None` for the
    /// `is not set` comment form).
    unknown: IndexMap<String, Option<String>>,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn get(&self, name: &str) -> Option<&SymbolValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Validates the value against the symbol's kind before storing it.
    pub fn set(&mut self, symbol: &Symbol, value: SymbolValue) -> Result<(), ConfigError> {
        let name = symbol.name.as_ref().ok_or(ConfigError::Anonymous)?;
        symbol.validate_value(&value).map_err(|source| ConfigError::InvalidValue {
            symbol: name.clone(),
            source,
        })?;
        self.values.insert(name.clone(), value);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<SymbolValue> {
        self.values.shift_remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlays `other` onto `self`, overwriting on collision.
    pub fn merge(&mut self, other: &Config) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
        for (name, raw) in &other.unknown {
            self.unknown.insert(name.clone(), raw.clone());
        }
    }

    pub fn load(path: impl AsRef<Path>, table: &SymbolTable, keep_unknown: bool) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Config::parse(&content, table, keep_unknown)
    }

    /// Parses `.config` content. Malformed lines are collected while the
    /// rest of the file is drained; the first error is surfaced.
    pub fn parse(content: &str, table: &SymbolTable, keep_unknown: bool) -> Result<Config, ConfigError> {
        let mut config = Config::new();
        let mut first_error = None;

        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            if let Err(error) = config.parse_line(line, line_no, table, keep_unknown) {
                warn!("config line {}: {}", line_no, error);
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(config),
        }
    }

    fn parse_line(
        &mut self,
        line: &str,
        line_no: usize,
        table: &SymbolTable,
        keep_unknown: bool,
    ) -> Result<(), ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            line: line_no,
            message,
        };

        if line.trim().is_empty() {
            return Ok(());
        }

        if let Some(comment) = line.strip_prefix("# ") {
            // The disabled form is a comment with fixed spacing; any other
            // comment is skipped.
            if let Some(name) = comment
                .strip_suffix(NOT_SET_SUFFIX)
                .and_then(|n| n.strip_prefix(CONFIG_PREFIX))
            {
                if !is_symbol_name(name) {
                    return Err(parse_error(format!("invalid symbol name {:?}", name)));
                }
                return self.record(name, None, table, keep_unknown, line_no);
            }
            return Ok(());
        }
        if line.starts_with('#') {
            return Ok(());
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| parse_error(format!("expected an assignment, got {:?}", line)))?;
        let name = key
            .strip_prefix(CONFIG_PREFIX)
            .ok_or_else(|| parse_error(format!("symbol {:?} is missing the {} prefix", key, CONFIG_PREFIX)))?;
        if !is_symbol_name(name) {
            return Err(parse_error(format!("invalid symbol name {:?}", name)));
        }
        self.record(name, Some(value), table, keep_unknown, line_no)
    }

    fn record(
        &mut self,
        name: &str,
        raw: Option<&str>,
        table: &SymbolTable,
        keep_unknown: bool,
        line_no: usize,
    ) -> Result<(), ConfigError> {
        let Some(symbol) = table.by_name(name) else {
            warn!("ignoring unknown symbol {} in config", name);
            if keep_unknown {
                self.unknown.insert(name.to_string(), raw.map(str::to_string));
            }
            return Ok(());
        };

        let value = match raw {
            None => {
                if !matches!(symbol.kind, SymbolKind::Bool | SymbolKind::Tristate) {
                    return Err(ConfigError::Parse {
                        line: line_no,
                        message: format!("{} is a {} symbol and cannot be \"not set\"", name, symbol.kind),
                    });
                }
                SymbolValue::Tristate(Tristate::No)
            }
            Some(raw) => parse_rhs(symbol, raw).map_err(|source| ConfigError::Parse {
                line: line_no,
                message: format!("{}: {}", name, source),
            })?,
        };

        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Renders the config in symbol-table order, preserved unknowns last.
    pub fn serialize(&self, table: &SymbolTable) -> String {
        let mut out = String::from(HEADER);
        for symbol in table.iter_all() {
            let Some(name) = symbol.name.as_deref() else {
                continue;
            };
            let Some(value) = self.values.get(name) else {
                continue;
            };
            match symbol.format_value(value) {
                Some(rhs) => {
                    out.push_str(CONFIG_PREFIX);
                    out.push_str(name);
                    out.push('=');
                    out.push_str(&rhs);
                    out.push('\n');
                }
                None if symbol.kind.is_tristate_like() => {
                    out.push_str("# ");
                    out.push_str(CONFIG_PREFIX);
                    out.push_str(name);
                    out.push_str(NOT_SET_SUFFIX);
                    out.push('\n');
                }
                // A disabled value-kind symbol has no line.
                None => {}
            }
        }
        for (name, raw) in &self.unknown {
            match raw {
                Some(rhs) => out.push_str(&format!("{}{}={}\n", CONFIG_PREFIX, name, rhs)),
                None => out.push_str(&format!("# {}{}{}\n", CONFIG_PREFIX, name, NOT_SET_SUFFIX)),
            }
        }
        out
    }

    /// Atomic write: the content goes to `<path>.tmp`, is fsynced, and the
    /// temp file is renamed over the target. The temp file is unlinked on
    /// any error path.
    pub fn store(&self, path: impl AsRef<Path>, table: &SymbolTable) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(self.serialize(table).as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(io_error)
    }
}

fn is_symbol_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses a right-hand side according to the symbol kind. Quoted strings are
/// unescaped; the accepted unquoted string subset is a token without
/// whitespace, `"` or `#`.
fn parse_rhs(symbol: &Symbol, raw: &str) -> Result<SymbolValue, ValueError> {
    if let Some(quoted) = raw.strip_prefix('"') {
        let inner = quoted
            .strip_suffix('"')
            .ok_or(ValueError::KindMismatch { kind: symbol.kind })?;
        let text = unescape_string(inner)?;
        return match symbol.kind {
            SymbolKind::String => Ok(SymbolValue::String(text)),
            kind => Err(ValueError::KindMismatch { kind }),
        };
    }

    if symbol.kind == SymbolKind::String {
        if raw.contains(char::is_whitespace) || raw.contains('"') || raw.contains('#') {
            return Err(ValueError::KindMismatch { kind: SymbolKind::String });
        }
        return Ok(SymbolValue::String(raw.to_string()));
    }
    symbol.parse_value(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kconfig::SymbolTableBuilder;

    fn table() -> SymbolTable {
        let mut builder = SymbolTableBuilder::new();
        builder.symbol("TRI", SymbolKind::Tristate);
        builder.symbol("FLAG", SymbolKind::Bool);
        builder.symbol("NAME", SymbolKind::String);
        builder.symbol("COUNT", SymbolKind::Int);
        builder.symbol("ADDR", SymbolKind::Hex);
        builder.finish()
    }

    #[test]
    fn parse_basic_forms() {
        let table = table();
        let config = Config::parse(
            "# comment\n\
             \n\
             CONFIG_TRI=m\n\
             # CONFIG_FLAG is not set\n\
             CONFIG_NAME=\"hello \\\"world\\\"\"\n\
             CONFIG_COUNT=-3\n\
             CONFIG_ADDR=0xdead\n",
            &table,
            false,
        )
        .unwrap();

        assert_eq!(config.get("TRI"), Some(&SymbolValue::Tristate(Tristate::Mod)));
        assert_eq!(config.get("FLAG"), Some(&SymbolValue::Tristate(Tristate::No)));
        assert_eq!(config.get("NAME"), Some(&SymbolValue::String("hello \"world\"".into())));
        assert_eq!(config.get("COUNT"), Some(&SymbolValue::Int(-3)));
        assert_eq!(config.get("ADDR"), Some(&SymbolValue::Hex(0xdead)));
    }

    #[test]
    fn parse_unquoted_string_subset() {
        let table = table();
        let config = Config::parse("CONFIG_NAME=plain-token\n", &table, false).unwrap();
        assert_eq!(config.get("NAME"), Some(&SymbolValue::String("plain-token".into())));
    }

    #[test]
    fn parse_reports_first_error_after_draining() {
        let table = table();
        let err = Config::parse(
            "CONFIG_TRI=q\n\
             CONFIG_FLAG=y\n\
             garbage line\n",
            &table,
            false,
        )
        .unwrap_err();
        // The first error wins even though later lines are also bad.
        match err {
            ConfigError::Parse { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn parse_unknown_symbols() {
        let table = table();
        let content = "CONFIG_NOT_DECLARED=y\n";
        let dropped = Config::parse(content, &table, false).unwrap();
        assert!(dropped.is_empty());

        let kept = Config::parse(content, &table, true).unwrap();
        assert!(kept.serialize(&table).contains("CONFIG_NOT_DECLARED=y"));
    }

    #[test]
    fn serialize_parse_round_trip() {
        let table = table();
        let mut config = Config::new();
        config.set(table.by_name("TRI").unwrap(), SymbolValue::Tristate(Tristate::No)).unwrap();
        config.set(table.by_name("FLAG").unwrap(), SymbolValue::Tristate(Tristate::Yes)).unwrap();
        config
            .set(table.by_name("NAME").unwrap(), SymbolValue::String("a \\ \"b\"".into()))
            .unwrap();
        config.set(table.by_name("COUNT").unwrap(), SymbolValue::Int(7)).unwrap();
        config.set(table.by_name("ADDR").unwrap(), SymbolValue::Hex(0x10)).unwrap();

        let text = config.serialize(&table);
        assert!(text.starts_with("#\n# Automatically generated file; DO NOT EDIT.\n#\n"));
        assert!(text.contains("# CONFIG_TRI is not set\n"));

        let reparsed = Config::parse(&text, &table, false).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn set_validates_kind() {
        let table = table();
        let mut config = Config::new();
        let err = config
            .set(table.by_name("FLAG").unwrap(), SymbolValue::Tristate(Tristate::Mod))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn store_atomic_write() {
        let table = table();
        let dir = tempdir::TempDir::new("kernelconfig-test").unwrap();
        let path = dir.path().join(".config");

        let mut config = Config::new();
        config.set(table.by_name("TRI").unwrap(), SymbolValue::Tristate(Tristate::Yes)).unwrap();
        config.store(&path, &table).unwrap();

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());

        let reloaded = Config::load(&path, &table, false).unwrap();
        assert_eq!(reloaded, config);
    }
}
