use kernelconfig::kconfig::{Expr, SymbolId, SymbolKind, SymbolTableBuilder, Tristate};

/// Declares a tristate symbol with an always-visible prompt.
pub fn tristate(builder: &mut SymbolTableBuilder, name: &str) -> SymbolId {
    let id = builder.symbol(name, SymbolKind::Tristate);
    builder.add_prompt(id, name, Expr::Const(Tristate::Yes));
    id
}

/// Declares a bool symbol with an always-visible prompt.
pub fn boolean(builder: &mut SymbolTableBuilder, name: &str) -> SymbolId {
    let id = builder.symbol(name, SymbolKind::Bool);
    builder.add_prompt(id, name, Expr::Const(Tristate::Yes));
    id
}

pub fn depends_on(builder: &mut SymbolTableBuilder, sym: SymbolId, dep: SymbolId) {
    builder.set_dir_dep(sym, Expr::Symbol(dep));
}
