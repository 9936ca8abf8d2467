use std::collections::HashMap;

use super::expr::Expr;
use super::symbol::{DefaultValue, Prompt, RangeBound, Select, Symbol, SymbolFlags};
use super::types::{SymbolId, SymbolKind, SymbolValue, Tristate};

/// The immutable symbol universe of one kernel source tree. Symbols live in
/// an arena keyed by dense index; iteration order is the order in which the
/// importer emitted entries, which makes output deterministic.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
    tri_consts: [SymbolId; 3],
}

impl SymbolTable {
    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn by_name(&self, name: &str) -> Option<&Symbol> {
        self.id_by_name(name).map(|id| self.get(id))
    }

    pub fn id_by_name(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    /// All symbols including nameless choice entries, in emission order.
    pub fn iter_all(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn choice_members(&self, choice: &Symbol) -> Vec<&Symbol> {
        choice.choice_members.iter().map(|id| self.get(*id)).collect()
    }

    pub fn const_id(&self, value: Tristate) -> SymbolId {
        self.tri_consts[value as usize]
    }

    /// Builds an evaluation lookup that resolves constant symbols to their
    /// literal value and everything else through `values`.
    pub fn value_lookup<'a, V>(&'a self, values: V) -> impl Fn(SymbolId) -> Option<SymbolValue> + 'a
    where
        V: Fn(&Symbol) -> Option<SymbolValue> + 'a,
    {
        move |id: SymbolId| {
            let sym = self.get(id);
            if let Some(value) = &sym.const_value {
                return Some(value.clone());
            }
            values(sym)
        }
    }
}

/// Interns symbols and expression operands, then freezes them into a table.
/// Forward references are held as placeholders and stay `unknown` when never
/// declared, so every expression operand resolves to some arena entry.
pub struct SymbolTableBuilder {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
    tri_consts: [SymbolId; 3],
}

impl SymbolTableBuilder {
    pub fn new() -> Self {
        let mut builder = SymbolTableBuilder {
            symbols: Vec::new(),
            by_name: HashMap::new(),
            tri_consts: [SymbolId(0); 3],
        };
        for value in [Tristate::No, Tristate::Mod, Tristate::Yes] {
            let id = builder.push(Symbol {
                id: SymbolId(0),
                name: Some(value.to_string()),
                kind: SymbolKind::Tristate,
                flags: SymbolFlags::CONST,
                dir_dep: Expr::Const(Tristate::Yes),
                rev_dep: Expr::Const(Tristate::No),
                prompts: Vec::new(),
                selects: Vec::new(),
                defaults: Vec::new(),
                ranges: Vec::new(),
                choice_members: Vec::new(),
                choice_parent: None,
                const_value: Some(SymbolValue::Tristate(value)),
            });
            builder.tri_consts[value as usize] = id;
        }
        builder
    }

    fn push(&mut self, mut symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        symbol.id = id;
        if let Some(name) = &symbol.name {
            self.by_name.insert(name.clone(), id);
        }
        self.symbols.push(symbol);
        id
    }

    /// Declares a named symbol, upgrading an interned forward reference in
    /// place when one exists.
    pub fn symbol(&mut self, name: &str, kind: SymbolKind) -> SymbolId {
        if let Some(id) = self.by_name.get(name).copied() {
            let sym = &mut self.symbols[id.index()];
            sym.kind = kind;
            return id;
        }
        self.push(Symbol {
            id: SymbolId(0),
            name: Some(name.to_string()),
            kind,
            flags: SymbolFlags::empty(),
            dir_dep: Expr::Const(Tristate::Yes),
            rev_dep: Expr::Const(Tristate::No),
            prompts: Vec::new(),
            selects: Vec::new(),
            defaults: Vec::new(),
            ranges: Vec::new(),
            choice_members: Vec::new(),
            choice_parent: None,
            const_value: None,
        })
    }

    /// Declares an anonymous choice group over the given members.
    pub fn choice(&mut self, name: Option<&str>, members: &[SymbolId]) -> SymbolId {
        let id = self.push(Symbol {
            id: SymbolId(0),
            name: name.map(str::to_string),
            kind: SymbolKind::Choice,
            flags: SymbolFlags::CHOICE,
            dir_dep: Expr::Const(Tristate::Yes),
            rev_dep: Expr::Const(Tristate::No),
            prompts: Vec::new(),
            selects: Vec::new(),
            defaults: Vec::new(),
            ranges: Vec::new(),
            choice_members: members.to_vec(),
            choice_parent: None,
            const_value: None,
        });
        for member in members {
            let sym = &mut self.symbols[member.index()];
            sym.choice_parent = Some(id);
            sym.flags |= SymbolFlags::CHOICEVAL;
        }
        id
    }

    /// Interns a name as a forward reference without declaring it.
    pub fn reference(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.by_name.get(name).copied() {
            return id;
        }
        self.symbol(name, SymbolKind::Unknown)
    }

    /// Interns a constant operand (`n`/`m`/`y`, numbers, string literals).
    pub fn constant(&mut self, literal: &str) -> SymbolId {
        if let Ok(t) = literal.parse::<Tristate>() {
            return self.tri_consts[t as usize];
        }
        if let Some(id) = self.by_name.get(literal).copied() {
            if self.symbols[id.index()].is_const() {
                return id;
            }
        }
        // Constants share the name namespace prefixed to avoid clashing
        // with real symbols of the same spelling.
        let key = format!("\"{}\"", literal);
        if let Some(id) = self.by_name.get(&key).copied() {
            return id;
        }
        let id = self.push(Symbol {
            id: SymbolId(0),
            name: Some(key),
            kind: SymbolKind::String,
            flags: SymbolFlags::CONST,
            dir_dep: Expr::Const(Tristate::Yes),
            rev_dep: Expr::Const(Tristate::No),
            prompts: Vec::new(),
            selects: Vec::new(),
            defaults: Vec::new(),
            ranges: Vec::new(),
            choice_members: Vec::new(),
            choice_parent: None,
            const_value: Some(SymbolValue::String(literal.to_string())),
        });
        id
    }

    pub fn set_dir_dep(&mut self, id: SymbolId, dep: Expr) {
        self.symbols[id.index()].dir_dep = dep;
    }

    pub fn add_prompt(&mut self, id: SymbolId, text: &str, visible: Expr) {
        self.symbols[id.index()].prompts.push(Prompt {
            text: text.to_string(),
            visible,
        });
    }

    pub fn add_default(&mut self, id: SymbolId, value: Expr, condition: Expr) {
        self.symbols[id.index()].defaults.push(DefaultValue { value, condition });
    }

    pub fn add_range(&mut self, id: SymbolId, low: SymbolId, high: SymbolId, condition: Expr) {
        self.symbols[id.index()].ranges.push(RangeBound { low, high, condition });
    }

    /// Records `selector select target if condition` and extends the
    /// target's reverse dependencies accordingly.
    pub fn add_select(&mut self, selector: SymbolId, target: SymbolId, condition: Expr) {
        self.symbols[selector.index()].selects.push(Select {
            target,
            condition: condition.clone(),
        });
        let clause = match condition {
            Expr::Const(Tristate::Yes) => Expr::Symbol(selector),
            condition => Expr::And(Box::new(Expr::Symbol(selector)), Box::new(condition)),
        };
        let target = &mut self.symbols[target.index()];
        target.rev_dep = match std::mem::replace(&mut target.rev_dep, Expr::Const(Tristate::No)) {
            Expr::Const(Tristate::No) => clause,
            existing => Expr::Or(Box::new(existing), Box::new(clause)),
        };
    }

    pub fn finish(self) -> SymbolTable {
        SymbolTable {
            symbols: self.symbols,
            by_name: self.by_name,
            tri_consts: self.tri_consts,
        }
    }
}

impl Default for SymbolTableBuilder {
    fn default() -> Self {
        SymbolTableBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_interns_forward_references() {
        let mut builder = SymbolTableBuilder::new();
        let dep = builder.reference("LATER");
        let a = builder.symbol("A", SymbolKind::Tristate);
        builder.set_dir_dep(a, Expr::Symbol(dep));
        let later = builder.symbol("LATER", SymbolKind::Bool);
        assert_eq!(dep, later);

        let table = builder.finish();
        assert_eq!(table.by_name("LATER").unwrap().kind, SymbolKind::Bool);
        assert_eq!(table.by_name("A").unwrap().dir_dep, Expr::Symbol(later));
    }

    #[test]
    fn tristate_constants_are_seeded() {
        let table = SymbolTableBuilder::new().finish();
        let y = table.get(table.const_id(Tristate::Yes));
        assert!(y.is_const());
        assert_eq!(y.const_value, Some(SymbolValue::Tristate(Tristate::Yes)));
        assert_eq!(table.by_name("y").unwrap().id(), y.id());
    }

    #[test]
    fn select_extends_reverse_dependencies() {
        let mut builder = SymbolTableBuilder::new();
        let a = builder.symbol("A", SymbolKind::Tristate);
        let b = builder.symbol("B", SymbolKind::Tristate);
        let c = builder.symbol("C", SymbolKind::Tristate);
        builder.add_select(a, c, Expr::Const(Tristate::Yes));
        builder.add_select(b, c, Expr::Symbol(a));
        let table = builder.finish();

        let rev = &table.by_name("C").unwrap().rev_dep;
        assert_eq!(rev.or_clauses().len(), 2);

        // A=y, B=y: both clauses fire
        let lookup = table.value_lookup(|sym| match sym.name.as_deref() {
            Some("A") | Some("B") => Some(SymbolValue::Tristate(Tristate::Yes)),
            _ => None,
        });
        assert_eq!(rev.eval(&lookup), Tristate::Yes);
    }

    #[test]
    fn constants_do_not_shadow_symbols() {
        let mut builder = SymbolTableBuilder::new();
        let sym = builder.symbol("FOO", SymbolKind::String);
        let lit = builder.constant("FOO");
        assert_ne!(sym, lit);
        let table = builder.finish();
        assert_eq!(table.get(lit).const_value, Some(SymbolValue::String("FOO".into())));
        assert_eq!(table.by_name("FOO").unwrap().id(), sym);
    }

    #[test]
    fn choice_membership() {
        let mut builder = SymbolTableBuilder::new();
        let c1 = builder.symbol("C1", SymbolKind::Bool);
        let c2 = builder.symbol("C2", SymbolKind::Bool);
        let choice = builder.choice(None, &[c1, c2]);
        let table = builder.finish();

        let group = table.get(choice);
        assert!(group.is_choice());
        assert_eq!(
            table.choice_members(group).iter().map(|s| s.id()).collect::<Vec<_>>(),
            vec![c1, c2]
        );
        assert_eq!(table.get(c1).choice_parent, Some(choice));
    }
}
