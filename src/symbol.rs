use std::collections::HashMap;

/// An interned byte string, represented as a small integer handle.
///
/// Two symbols compare equal exactly when the byte sequences they were
/// interned from are equal; the rest of the crate leans on this for
/// O(1) name comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

/// Interns byte strings (rule names, literal text, file names) and
/// hands out stable [`Symbol`] handles for them.
///
/// There is no removal; everything lives until the table is dropped.
#[derive(Debug, Default)]
pub struct SymbolTable {
    map: HashMap<Vec<u8>, Symbol>,
    texts: Vec<Vec<u8>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Intern `bytes`, returning the existing handle if the identical
    /// sequence was interned before.
    pub fn intern(&mut self, bytes: &[u8]) -> Symbol {
        if let Some(&sym) = self.map.get(bytes) {
            return sym;
        }
        let sym = Symbol(self.texts.len() as u32);
        self.texts.push(bytes.to_vec());
        self.map.insert(bytes.to_vec(), sym);
        sym
    }

    pub fn intern_str(&mut self, text: &str) -> Symbol {
        self.intern(text.as_bytes())
    }

    /// Intern a rule name. Nonterminal names are case-insensitive in
    /// ABNF, so they are folded to lowercase before interning.
    pub fn intern_name(&mut self, name: &str) -> Symbol {
        self.intern(name.to_ascii_lowercase().as_bytes())
    }

    /// The bytes originally stored for `sym`. Never fails for a handle
    /// produced by this table.
    pub fn text(&self, sym: Symbol) -> &[u8] {
        &self.texts[sym.0 as usize]
    }

    /// The stored bytes rendered as a string, for diagnostics.
    pub fn display(&self, sym: Symbol) -> String {
        String::from_utf8_lossy(self.text(sym)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"ALPHA");
        let b = table.intern(b"ALPHA");
        assert_eq!(a, b);
        assert_eq!(table.text(a), b"ALPHA");
    }

    #[test]
    fn test_distinct_bytes_get_distinct_handles() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"a");
        let b = table.intern(b"b");
        assert_ne!(a, b);
        assert_eq!(table.text(a), b"a");
        assert_eq!(table.text(b), b"b");
    }

    #[test]
    fn test_names_are_case_folded() {
        let mut table = SymbolTable::new();
        let a = table.intern_name("Crlf");
        let b = table.intern_name("CRLF");
        assert_eq!(a, b);
        assert_eq!(table.text(a), b"crlf");
        // Plain interning preserves case.
        let c = table.intern(b"CRLF");
        assert_ne!(a, c);
    }
}
