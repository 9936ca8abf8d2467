pub mod expr;
pub mod import;
pub mod symbol;
pub mod table;
pub mod types;

pub use expr::Expr;
pub use import::ImportError;
pub use symbol::{Symbol, SymbolFlags, ValueError};
pub use table::{SymbolTable, SymbolTableBuilder};
pub use types::{SymbolId, SymbolKind, SymbolValue, Tristate, TristateSet};
