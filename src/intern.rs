//! Interned identifier and string table.
//!
//! Loaded once per module (the constant pool, spec §6) and read lock-free
//! afterwards (spec §5: "the interned-string table is mutated during program
//! load only"). Backed by `hashbrown` keyed with `xxh3` instead of the
//! default SipHash, since identifier strings are short and the default
//! hasher's DoS resistance is not a concern for trusted, locally-compiled
//! bytecode.

use std::hash::{BuildHasherDefault, Hasher};
use std::sync::RwLock;

use hashbrown::HashMap;
use xxhash_rust::xxh3::Xxh3;

#[derive(Default)]
pub struct Xxh3Hasher(Xxh3);

impl Hasher for Xxh3Hasher {
    fn finish(&self) -> u64 {
        self.0.digest()
    }
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes)
    }
}

pub type Xxh3Build = BuildHasherDefault<Xxh3Hasher>;

/// An interned string or identifier. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize))]
pub struct Symbol(u32);

impl Symbol {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Constructs a `Symbol` directly from a constant-pool index, for
    /// decoders reading instruction payloads against a pool the loader
    /// already interned in matching order (spec §6: the constant pool is
    /// interned once, up front, before instructions are decoded).
    pub fn from_index(i: u32) -> Symbol {
        Symbol(i)
    }
}

/// Process-wide-per-VM interner. One instance is shared (via `Arc`) across
/// every `Module` loaded into a given `Vm`.
pub struct Interner {
    strings: RwLock<Vec<Box<str>>>,
    lookup: RwLock<HashMap<Box<str>, Symbol, Xxh3Build>>,
}

impl Interner {
    pub fn new() -> Self {
        Interner {
            strings: RwLock::new(Vec::new()),
            lookup: RwLock::new(HashMap::with_hasher(Xxh3Build::default())),
        }
    }

    pub fn intern(&self, s: &str) -> Symbol {
        if let Some(sym) = self.lookup.read().unwrap().get(s) {
            return *sym;
        }
        let mut lookup = self.lookup.write().unwrap();
        if let Some(sym) = lookup.get(s) {
            return *sym;
        }
        let mut strings = self.strings.write().unwrap();
        let id = strings.len() as u32;
        strings.push(s.into());
        let sym = Symbol(id);
        lookup.insert(s.into(), sym);
        sym
    }

    pub fn resolve(&self, sym: Symbol) -> Box<str> {
        self.strings.read().unwrap()[sym.index()].clone()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let it = Interner::new();
        let a = it.intern("foo");
        let b = it.intern("foo");
        let c = it.intern("bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(&*it.resolve(a), "foo");
    }
}
