//! The modification-request language. Files are tokenized, parsed into
//! statements and applied to a [`Decisions`] store; conditions are compiled
//! once and evaluated against the kernel version and symbol table.

pub mod cond;
pub mod parse;
pub mod token;

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

use crate::config::{Config, CONFIG_PREFIX};
use crate::decision::{DecisionError, Decisions};
use crate::kconfig::{Symbol, SymbolTable};

pub use cond::{CondContext, CondProgram, KernelVersion};
pub use parse::{Modifier, Statement, Verb};

#[derive(Error, Debug)]
pub enum DslError {
    #[error("{file}:{line}: {message}")]
    Parse { file: String, line: usize, message: String },
    #[error("{file}:{line}: unknown symbol {symbol}")]
    UnknownSymbol { file: String, line: usize, symbol: String },
    #[error("{file}:{line}: {source}")]
    Decision {
        file: String,
        line: usize,
        #[source]
        source: DecisionError,
    },
    #[error("could not read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}:{line}: {modifier} targets require a module resolver")]
    NoModuleResolver { file: String, line: usize, modifier: &'static str },
    #[error("{file}:{line}: {verb} requires a request source")]
    NoRequestSource { file: String, line: usize, verb: &'static str },
    #[error("{file}:{line}: request source failed: {message}")]
    RequestSourceFailed { file: String, line: usize, message: String },
}

/// Maps kernel module names and aliases to configuration symbols, the way a
/// `modules.alias` database does. Implemented by an external collaborator.
pub trait ModuleResolver {
    /// Symbols that build the given kernel module.
    fn symbols_for_module(&self, module: &str) -> Vec<String>;
    /// Modules matching the given alias.
    fn modules_for_alias(&self, alias: &str) -> Vec<String>;
}

/// Produces further request statements from hardware detection or the
/// package manager. Implemented by an external collaborator; the returned
/// text is parsed like an included file.
pub trait RequestSource {
    fn hardware_requests(&self) -> Result<String, String>;
    fn package_requests(&self, packages: &[String]) -> Result<String, String>;
}

pub struct Interpreter<'a> {
    table: &'a SymbolTable,
    kernel_version: KernelVersion,
    base: Option<&'a Config>,
    resolver: Option<&'a dyn ModuleResolver>,
    requests: Option<&'a dyn RequestSource>,
    decisions: Decisions,
    include_queue: VecDeque<PathBuf>,
    prev_cond: bool,
}

impl<'a> Interpreter<'a> {
    pub fn new(table: &'a SymbolTable, kernel_version: KernelVersion) -> Interpreter<'a> {
        Interpreter {
            table,
            kernel_version,
            base: None,
            resolver: None,
            requests: None,
            decisions: Decisions::new(),
            include_queue: VecDeque::new(),
            prev_cond: false,
        }
    }

    /// The base config seeds `append`/`add` on symbols without a prior
    /// decision.
    pub fn with_base(mut self, base: &'a Config) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_module_resolver(mut self, resolver: &'a dyn ModuleResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_request_source(mut self, requests: &'a dyn RequestSource) -> Self {
        self.requests = Some(requests);
        self
    }

    pub fn decisions(&self) -> &Decisions {
        &self.decisions
    }

    pub fn into_decisions(self) -> Decisions {
        self.decisions
    }

    /// Runs a request file, then everything it queued via `include`.
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<(), DslError> {
        self.exec_file(path.as_ref())?;
        while let Some(next) = self.include_queue.pop_front() {
            self.exec_file(&next)?;
        }
        Ok(())
    }

    /// Runs request text that does not come from a file (tests, request
    /// sources). Includes resolve relative to the working directory.
    pub fn run_str(&mut self, file: &str, content: &str) -> Result<(), DslError> {
        self.exec_str(file, content, None)?;
        while let Some(next) = self.include_queue.pop_front() {
            self.exec_file(&next)?;
        }
        Ok(())
    }

    fn exec_file(&mut self, path: &Path) -> Result<(), DslError> {
        let content = fs::read_to_string(path).map_err(|source| DslError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.exec_str(&path.display().to_string(), &content, path.parent())
    }

    fn exec_str(&mut self, file: &str, content: &str, dir: Option<&Path>) -> Result<(), DslError> {
        let statements = parse::parse(file, token::tokenize(file, content)?)?;
        for statement in &statements {
            self.apply(file, dir, statement)?;
        }
        Ok(())
    }

    fn apply(&mut self, file: &str, dir: Option<&Path>, statement: &Statement) -> Result<(), DslError> {
        if let Some(cond) = &statement.cond {
            let truth = cond.eval(&CondContext {
                kernel_version: self.kernel_version,
                table: self.table,
                targets: &statement.targets,
                prev: self.prev_cond,
            });
            self.prev_cond = truth;
            if truth == statement.unless {
                debug!("{}:{}: condition not met, skipping {}", file, statement.line, statement.verb.name());
                return Ok(());
            }
        }

        match statement.verb {
            Verb::Include => {
                let target = Path::new(&statement.targets[0]);
                let path = match dir {
                    Some(dir) if target.is_relative() => dir.join(target),
                    _ => target.to_path_buf(),
                };
                self.include_queue.push_back(path);
                return Ok(());
            }
            Verb::HardwareDetect => {
                let requests = self.request_source(file, statement, "hardware-detect")?;
                let text = requests
                    .hardware_requests()
                    .map_err(|message| DslError::RequestSourceFailed {
                        file: file.to_string(),
                        line: statement.line,
                        message,
                    })?;
                return self.exec_str("<hardware-detect>", &text, dir);
            }
            Verb::Packages => {
                let requests = self.request_source(file, statement, "packages")?;
                let text = requests
                    .package_requests(&statement.targets)
                    .map_err(|message| DslError::RequestSourceFailed {
                        file: file.to_string(),
                        line: statement.line,
                        message,
                    })?;
                return self.exec_str("<packages>", &text, dir);
            }
            _ => {}
        }

        for symbol in self.resolve_targets(file, statement)? {
            let symbol = self.table.get(symbol);
            self.apply_verb(statement, symbol)
                .map_err(|source| DslError::Decision {
                    file: file.to_string(),
                    line: statement.line,
                    source,
                })?;
        }
        Ok(())
    }

    fn apply_verb(&mut self, statement: &Statement, symbol: &Symbol) -> Result<(), DecisionError> {
        let base = self.base;
        let base_value = move |name: Option<&String>| {
            base.and_then(|base| name.and_then(|n| base.get(n))).cloned()
        };
        match statement.verb {
            Verb::Disable => self.decisions.disable(symbol),
            Verb::Module => self.decisions.module(symbol),
            Verb::Builtin => self.decisions.builtin(symbol),
            Verb::BuiltinOrModule => self.decisions.builtin_or_module(symbol),
            Verb::Set => self.decisions.set(symbol, statement.value.as_deref().unwrap_or("")),
            Verb::Append => self.decisions.append(
                symbol,
                statement.value.as_deref().unwrap_or(""),
                base_value(symbol.name.as_ref()).as_ref(),
            ),
            Verb::Add => self.decisions.add(
                symbol,
                statement.value.as_deref().unwrap_or(""),
                base_value(symbol.name.as_ref()).as_ref(),
            ),
            Verb::Discard => {
                self.decisions.discard(symbol);
                Ok(())
            }
            Verb::Include | Verb::HardwareDetect | Verb::Packages => unreachable!(),
        }
    }

    fn resolve_targets(&self, file: &str, statement: &Statement) -> Result<Vec<crate::kconfig::SymbolId>, DslError> {
        let mut symbols = Vec::new();

        match statement.modifier {
            None => {
                for target in &statement.targets {
                    let name = target.strip_prefix(CONFIG_PREFIX).unwrap_or(target.as_str());
                    match self.table.id_by_name(name) {
                        Some(id) => symbols.push(id),
                        None => {
                            return Err(DslError::UnknownSymbol {
                                file: file.to_string(),
                                line: statement.line,
                                symbol: name.to_string(),
                            })
                        }
                    }
                }
            }
            Some(modifier) => {
                let resolver = self.resolver.ok_or_else(|| DslError::NoModuleResolver {
                    file: file.to_string(),
                    line: statement.line,
                    modifier: match modifier {
                        Modifier::Driver => "driver",
                        Modifier::Modalias => "modalias",
                    },
                })?;
                let modules: Vec<String> = match modifier {
                    Modifier::Driver => statement.targets.clone(),
                    Modifier::Modalias => statement
                        .targets
                        .iter()
                        .flat_map(|alias| resolver.modules_for_alias(alias))
                        .collect(),
                };
                for module in &modules {
                    for name in resolver.symbols_for_module(module) {
                        let name = name.strip_prefix(CONFIG_PREFIX).unwrap_or(name.as_str());
                        match self.table.id_by_name(name) {
                            Some(id) => symbols.push(id),
                            // Module databases routinely carry symbols for
                            // other kernel versions; skip those.
                            None => warn!("module {} maps to unknown symbol {}", module, name),
                        }
                    }
                }
            }
        }
        Ok(symbols)
    }

    fn request_source(
        &self,
        file: &str,
        statement: &Statement,
        verb: &'static str,
    ) -> Result<&'a dyn RequestSource, DslError> {
        self.requests.ok_or_else(|| DslError::NoRequestSource {
            file: file.to_string(),
            line: statement.line,
            verb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use crate::kconfig::{SymbolKind, SymbolTableBuilder, SymbolValue, Tristate, TristateSet};
    use std::collections::HashMap;

    fn table() -> SymbolTable {
        let mut builder = SymbolTableBuilder::new();
        builder.symbol("USB", SymbolKind::Tristate);
        builder.symbol("E1000E", SymbolKind::Tristate);
        builder.symbol("DEBUG_INFO", SymbolKind::Bool);
        builder.symbol("CMDLINE", SymbolKind::String);
        builder.symbol("NR_CPUS", SymbolKind::Int);
        builder.finish()
    }

    fn kver() -> KernelVersion {
        KernelVersion::new(5, 19, 1)
    }

    #[test]
    fn basic_statements() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        interpreter
            .run_str(
                "test",
                "module USB\n\
                 disable DEBUG_INFO\n\
                 set NR_CPUS 64\n\
                 set CMDLINE \"quiet splash\"\n",
            )
            .unwrap();
        let decisions = interpreter.into_decisions();

        assert_eq!(
            decisions.get(table.id_by_name("USB").unwrap()),
            Some(&Decision::Tristate(TristateSet::MOD))
        );
        assert!(decisions.get(table.id_by_name("DEBUG_INFO").unwrap()).unwrap().is_disable());
        assert_eq!(
            decisions.get(table.id_by_name("NR_CPUS").unwrap()),
            Some(&Decision::Value(SymbolValue::Int(64)))
        );
        assert_eq!(
            decisions.get(table.id_by_name("CMDLINE").unwrap()),
            Some(&Decision::Value(SymbolValue::String("quiet splash".into())))
        );
    }

    #[test]
    fn config_prefix_is_stripped() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        interpreter.run_str("test", "builtin CONFIG_USB\n").unwrap();
        assert_eq!(
            interpreter.decisions().get(table.id_by_name("USB").unwrap()),
            Some(&Decision::Tristate(TristateSet::YES))
        );
    }

    #[test]
    fn unknown_symbol_is_a_hard_error() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        let err = interpreter.run_str("test", "module NOPE\n").unwrap_err();
        assert!(matches!(err, DslError::UnknownSymbol { symbol, .. } if symbol == "NOPE"));
    }

    #[test]
    fn exists_guard_downgrades_unknown_symbols() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        interpreter.run_str("test", "module NOPE if exists\n").unwrap();
        assert!(interpreter.decisions().is_empty());
    }

    #[test]
    fn conditions_gate_statements() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        interpreter
            .run_str(
                "test",
                "module USB if kver >= 6.0\n\
                 builtin USB unless kver >= 6.0\n",
            )
            .unwrap();
        assert_eq!(
            interpreter.decisions().get(table.id_by_name("USB").unwrap()),
            Some(&Decision::Tristate(TristateSet::YES))
        );
    }

    #[test]
    fn previous_truth_chains_statements() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        interpreter
            .run_str(
                "test",
                "module USB if kver >= 5.0\n\
                 builtin DEBUG_INFO if _\n",
            )
            .unwrap();
        assert_eq!(
            interpreter.decisions().get(table.id_by_name("DEBUG_INFO").unwrap()),
            Some(&Decision::Tristate(TristateSet::YES))
        );
    }

    #[test]
    fn conflict_is_reported_with_location() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        let err = interpreter
            .run_str("test", "builtin USB\ndisable USB\n")
            .unwrap_err();
        assert!(matches!(err, DslError::Decision { line: 2, .. }));
    }

    #[test]
    fn discard_allows_rerequesting() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        interpreter
            .run_str("test", "builtin USB\ndiscard USB\ndisable USB\n")
            .unwrap();
        assert!(interpreter.decisions().get(table.id_by_name("USB").unwrap()).unwrap().is_disable());
    }

    #[test]
    fn append_seeds_from_base_config() {
        let table = table();
        let mut base = Config::new();
        base.set(table.by_name("CMDLINE").unwrap(), SymbolValue::String("quiet".into()))
            .unwrap();

        let mut interpreter = Interpreter::new(&table, kver()).with_base(&base);
        interpreter.run_str("test", "append CMDLINE splash\n").unwrap();
        assert_eq!(
            interpreter.decisions().get(table.id_by_name("CMDLINE").unwrap()),
            Some(&Decision::Value(SymbolValue::String("quiet splash".into())))
        );
    }

    struct MapResolver {
        modules: HashMap<&'static str, Vec<&'static str>>,
        aliases: HashMap<&'static str, Vec<&'static str>>,
    }

    impl ModuleResolver for MapResolver {
        fn symbols_for_module(&self, module: &str) -> Vec<String> {
            self.modules
                .get(module)
                .map(|v| v.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default()
        }
        fn modules_for_alias(&self, alias: &str) -> Vec<String> {
            self.aliases
                .get(alias)
                .map(|v| v.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default()
        }
    }

    #[test]
    fn driver_and_modalias_modifiers() {
        let table = table();
        let resolver = MapResolver {
            modules: HashMap::from([("e1000e", vec!["E1000E"])]),
            aliases: HashMap::from([("pci:v8086d10D3", vec!["e1000e"])]),
        };

        let mut interpreter = Interpreter::new(&table, kver()).with_module_resolver(&resolver);
        interpreter.run_str("test", "module driver e1000e\n").unwrap();
        assert_eq!(
            interpreter.decisions().get(table.id_by_name("E1000E").unwrap()),
            Some(&Decision::Tristate(TristateSet::MOD))
        );

        let mut interpreter = Interpreter::new(&table, kver()).with_module_resolver(&resolver);
        interpreter.run_str("test", "builtin modalias pci:v8086d10D3\n").unwrap();
        assert_eq!(
            interpreter.decisions().get(table.id_by_name("E1000E").unwrap()),
            Some(&Decision::Tristate(TristateSet::YES))
        );
    }

    #[test]
    fn driver_modifier_requires_resolver() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver());
        let err = interpreter.run_str("test", "module driver e1000e\n").unwrap_err();
        assert!(matches!(err, DslError::NoModuleResolver { .. }));
    }

    struct FixedRequests;
    impl RequestSource for FixedRequests {
        fn hardware_requests(&self) -> Result<String, String> {
            Ok("module USB\n".into())
        }
        fn package_requests(&self, packages: &[String]) -> Result<String, String> {
            assert_eq!(packages, ["nftables"]);
            Ok("builtin DEBUG_INFO\n".into())
        }
    }

    #[test]
    fn request_sources_produce_statements() {
        let table = table();
        let mut interpreter = Interpreter::new(&table, kver()).with_request_source(&FixedRequests);
        interpreter
            .run_str("test", "hardware-detect\npackages nftables\n")
            .unwrap();
        let decisions = interpreter.into_decisions();
        assert_eq!(decisions.len(), 2);
    }

    #[test]
    fn include_queues_files() {
        let table = table();
        let dir = tempdir::TempDir::new("kernelconfig-dsl").unwrap();
        let included = dir.path().join("extra.conf");
        std::fs::write(&included, "builtin USB\n").unwrap();
        let main = dir.path().join("main.conf");
        std::fs::write(&main, "include extra.conf\n").unwrap();

        let mut interpreter = Interpreter::new(&table, kver());
        interpreter.run_file(&main).unwrap();
        assert_eq!(
            interpreter.decisions().get(table.id_by_name("USB").unwrap()),
            Some(&Decision::Tristate(TristateSet::YES))
        );
    }
}
