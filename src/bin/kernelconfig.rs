use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use itertools::Itertools;

use kernelconfig::config::Config;
use kernelconfig::decision::dsl::{Interpreter, KernelVersion};
use kernelconfig::decision::Decisions;
use kernelconfig::kconfig::{import, SymbolTable, Tristate};
use kernelconfig::settings::{self, Settings};
use kernelconfig::solver::{self, expand, grouper, CancelToken, Solution};

/// Kernelconfig generates a working kernel .config from a base
/// configuration, the kernel's Kconfig symbol universe and a list of
/// modification requests. Requested values are validated against the
/// dependency graph, missing prerequisites are resolved automatically and
/// the final configuration is written as an oldconfig fixed point.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// The settings file to use
    #[clap(short, long, value_name = "FILE", default_value = "/etc/kernelconfig/settings.toml")]
    settings: PathBuf,
    /// The kernel directory to operate on, overriding the settings file
    #[clap(short, long, value_parser, value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
    kernel_dir: Option<PathBuf>,

    #[clap(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Args)]
struct ActionGenerate {
    /// The output file, defaults to {kernel_dir}/.config if not given.
    #[clap(short, long, value_parser, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
struct ActionSatisfy {
    /// The symbol to satisfy
    symbol: String,
    /// The value to solve for (n, m or y)
    #[clap(default_value = "y")]
    value: String,
    /// Solve against an all-default configuration instead of the base
    #[clap(short, long)]
    ignore_base: bool,
}

#[derive(Debug, clap::Args)]
struct ActionOldconfig {
    /// The base .config to resolve; defaults to the settings' base config
    #[clap(short, long, value_parser, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    base: Option<PathBuf>,
    /// The output file, defaults to {kernel_dir}/.config if not given.
    #[clap(short, long, value_parser, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Generate a .config by applying the modification requests on top of
    /// the base configuration and resolving all dependencies
    Generate(ActionGenerate),
    /// Evaluate and print the changes to other symbols that are required
    /// before the given symbol can be set
    Satisfy(ActionSatisfy),
    /// Run only the informed-oldconfig pass over a base configuration
    Oldconfig(ActionOldconfig),
}

fn main() {
    env_logger::init();
    if let Err(err) = try_main() {
        eprintln!("{}: {}", "error".red(), err);
        err.chain()
            .skip(1)
            .for_each(|cause| eprintln!("{}: {}", "because".yellow(), cause));
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let mut settings = settings::load(&args.settings)?;
    if let Some(kernel_dir) = &args.kernel_dir {
        settings.kernel.dir = kernel_dir.clone();
    }

    let table = load_table(&settings)?;
    match &args.action {
        Action::Generate(action) => generate(&settings, &table, action),
        Action::Satisfy(action) => satisfy(&settings, &table, action),
        Action::Oldconfig(action) => oldconfig(&settings, &table, action),
    }
}

fn load_table(settings: &Settings) -> Result<SymbolTable> {
    let time_start = Instant::now();
    let table = match (&settings.symbols.dump, &settings.symbols.command) {
        (Some(dump), _) => import::from_json_file(dump)
            .with_context(|| format!("could not import symbols from {}", dump.display()))?,
        (None, Some(command)) if !command.is_empty() => {
            import::from_command(command, &settings.kernel.dir, &settings.symbols.env)
                .context("could not import symbols from the kconfig parser")?
        }
        _ => bail!("settings name neither a symbol dump nor a kconfig parser command"),
    };
    println!(
        "{:>12} symbol table [{} symbols] in {:.2?}",
        "Imported".green(),
        table.len(),
        time_start.elapsed()
    );
    Ok(table)
}

fn kernel_version(settings: &Settings) -> Result<KernelVersion> {
    let raw = match &settings.kernel.version {
        Some(version) => version.clone(),
        None => std::env::var("KERNELVERSION").context(
            "kernel version is neither configured (kernel.version) nor present as KERNELVERSION",
        )?,
    };
    raw.parse()
        .map_err(|_| anyhow!("invalid kernel version {:?}", raw))
}

fn load_base(settings: &Settings, table: &SymbolTable) -> Result<Config> {
    let path = settings
        .base
        .config
        .clone()
        .unwrap_or_else(|| settings.kernel.dir.join(".config"));
    if !path.exists() {
        println!("{:>12} empty base configuration", "Using".green());
        return Ok(Config::new());
    }
    println!("{:>12} base configuration ({})", "Loading".green(), path.display());
    Ok(Config::load(&path, table, settings.base.keep_unknown)?)
}

fn build_decisions(settings: &Settings, table: &SymbolTable, base: &Config) -> Result<Decisions> {
    let version = kernel_version(settings)?;
    let mut interpreter = Interpreter::new(table, version).with_base(base);
    for request in &settings.generate.requests {
        println!("{:>12} requests ({})", "Applying".green(), request.display());
        interpreter.run_file(request)?;
    }
    Ok(interpreter.into_decisions())
}

fn generate(settings: &Settings, table: &SymbolTable, action: &ActionGenerate) -> Result<()> {
    let base = load_base(settings, table)?;
    let decisions = build_decisions(settings, table, &base)?;

    println!("{:>12} {} decisions", "Resolving".green(), decisions.len());
    let config = solver::generate(table, &base, &decisions, &CancelToken::new())?;

    let output = action
        .output
        .clone()
        .or_else(|| settings.generate.output.clone())
        .unwrap_or_else(|| settings.kernel.dir.join(".config"));
    println!("{:>12} kernel config ({})", "Writing".green(), output.display());
    config.store(&output, table)?;
    Ok(())
}

fn satisfy(settings: &Settings, table: &SymbolTable, action: &ActionSatisfy) -> Result<()> {
    let base = if action.ignore_base {
        Config::new()
    } else {
        load_base(settings, table)?
    };

    let symbol = table
        .by_name(&action.symbol)
        .with_context(|| format!("symbol {} does not exist", action.symbol))?;
    let value: Tristate = action
        .value
        .parse()
        .map_err(|_| anyhow!("invalid symbol value '{}'", action.value))?;

    println!(
        "Trying to satisfy {}={}...",
        action.symbol.blue(),
        value.to_string().color(value.color())
    );

    let mut decisions = Decisions::new();
    match value {
        Tristate::No => decisions.disable(symbol)?,
        Tristate::Mod => decisions.module(symbol)?,
        Tristate::Yes => decisions.builtin(symbol)?,
    }

    let mut roots: Vec<_> = base.iter().filter_map(|(n, _)| table.id_by_name(n)).collect();
    roots.extend(decisions.keys());
    let layers = grouper::group(table, roots);
    let solution = expand::expand(table, &layers, &decisions, &base, &CancelToken::new())?;

    let changes = solution
        .iter()
        .filter(|(id, _)| **id != symbol.id())
        .filter_map(|(id, d)| table.get(*id).name.as_deref().map(|n| (n, d)))
        .collect_vec();
    if changes.is_empty() {
        println!("Nothing to do :)");
        return Ok(());
    }

    eprintln!("{}: you may want to set these symbols beforehand", "note".green());
    eprintln!("   {}", "|".blue());
    for (name, decision) in changes {
        eprintln!("   {} {} {}", "|".blue(), name, decision.to_string().cyan());
    }
    eprintln!("   {}", "|".blue());
    Ok(())
}

fn oldconfig(settings: &Settings, table: &SymbolTable, action: &ActionOldconfig) -> Result<()> {
    let base = match &action.base {
        Some(path) => {
            println!("{:>12} base configuration ({})", "Loading".green(), path.display());
            Config::load(path, table, settings.base.keep_unknown)?
        }
        None => load_base(settings, table)?,
    };
    let decisions = build_decisions(settings, table, &base)?;
    let solution: Solution = decisions.iter().map(|(id, d)| (id, d.clone())).collect();

    println!("{:>12} oldconfig fixpoint", "Running".green());
    let config = solver::oldconfig::run(table, base, &solution, &CancelToken::new())?;

    let output = action
        .output
        .clone()
        .or_else(|| settings.generate.output.clone())
        .unwrap_or_else(|| settings.kernel.dir.join(".config"));
    println!("{:>12} kernel config ({})", "Writing".green(), output.display());
    config.store(&output, table)?;
    Ok(())
}
