//! Symbol interning.

use crate::value::Sym;
use rustc_hash::FxHashMap;

/// Per-VM symbol table. Symbols are never freed.
#[derive(Debug, Default)]
pub struct SymbolTable {
    ids: FxHashMap<Box<str>, Sym>,
    names: Vec<Box<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Sym {
        if let Some(&sym) = self.ids.get(name) {
            return sym;
        }
        let sym = Sym(self.names.len() as u32);
        self.names.push(name.into());
        self.ids.insert(name.into(), sym);
        sym
    }

    pub fn name(&self, sym: Sym) -> &str {
        self.names.get(sym.0 as usize).map(|s| &**s).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo");
        let b = table.intern("bar");
        assert_ne!(a, b);
        assert_eq!(table.intern("foo"), a);
        assert_eq!(table.name(b), "bar");
        assert_eq!(table.name(Sym(99)), "");
    }
}
