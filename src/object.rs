//! Heap `Object` (spec §3/§4.2): kind, `ltable` fast-path, general `fields`
//! map, parent-class list, and variant payload.

use hashbrown::HashMap;

use crate::element::{Element, NodeId};
use crate::external::{ExternalData, ExternalFn};
use crate::intern::{Symbol, Xxh3Build};
use crate::module::Module;
use std::sync::Arc;

/// Closed set of well-known field names given an O(1) slot in `ltable`
/// instead of a `fields` map lookup (spec §3/§4.2). Covers both Object-level
/// keys (`class`, `constructor`, …) and Block-frame keys (`$ip`, `$parent`,
/// …) — a Block is just a `Plain` Object whose `ltable` happens to be used
/// for frame bookkeeping (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CommonKey {
    Class = 0,
    Parent = 1,
    SelfKey = 2,
    Ip = 3,
    ModuleKey = 4,
    Resval = 5,
    Length = 6,
    Constructor = 7,
    Deconstructor = 8,
    Caller = 9,
    StackSize = 10,
    TryGoto = 11,
    ErrorFlag = 12,
    Initialized = 13,
}

pub const COMMON_KEY_COUNT: usize = 14;

impl CommonKey {
    pub const ALL: [CommonKey; COMMON_KEY_COUNT] = [
        CommonKey::Class,
        CommonKey::Parent,
        CommonKey::SelfKey,
        CommonKey::Ip,
        CommonKey::ModuleKey,
        CommonKey::Resval,
        CommonKey::Length,
        CommonKey::Constructor,
        CommonKey::Deconstructor,
        CommonKey::Caller,
        CommonKey::StackSize,
        CommonKey::TryGoto,
        CommonKey::ErrorFlag,
        CommonKey::Initialized,
    ];

    /// Matches a field name against the closed CommonKey set, so that
    /// `Object::set_field` can write-through into `ltable` (spec §4.2).
    pub fn from_name(name: &str) -> Option<CommonKey> {
        Some(match name {
            "class" => CommonKey::Class,
            "parent" => CommonKey::Parent,
            "self" => CommonKey::SelfKey,
            "$ip" => CommonKey::Ip,
            "$module" => CommonKey::ModuleKey,
            "$resval" => CommonKey::Resval,
            "length" => CommonKey::Length,
            "constructor" => CommonKey::Constructor,
            "deconstructor" => CommonKey::Deconstructor,
            "$caller" => CommonKey::Caller,
            "$stack_size" => CommonKey::StackSize,
            "$try_goto" => CommonKey::TryGoto,
            "$error" => CommonKey::ErrorFlag,
            "$initialized" => CommonKey::Initialized,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CommonKey::Class => "class",
            CommonKey::Parent => "parent",
            CommonKey::SelfKey => "self",
            CommonKey::Ip => "$ip",
            CommonKey::ModuleKey => "$module",
            CommonKey::Resval => "$resval",
            CommonKey::Length => "length",
            CommonKey::Constructor => "constructor",
            CommonKey::Deconstructor => "deconstructor",
            CommonKey::Caller => "$caller",
            CommonKey::StackSize => "$stack_size",
            CommonKey::TryGoto => "$try_goto",
            CommonKey::ErrorFlag => "$error",
            CommonKey::Initialized => "$initialized",
        }
    }
}

/// Fixed-size fast-path table indexed by `CommonKey`. Unset slots read as
/// `Element::None`.
#[derive(Debug, Clone, Copy)]
pub struct LTable {
    slots: [Element; COMMON_KEY_COUNT],
}

impl LTable {
    pub fn new() -> Self {
        LTable { slots: [Element::None; COMMON_KEY_COUNT] }
    }

    pub fn get(&self, key: CommonKey) -> Element {
        self.slots[key as usize]
    }

    pub fn set(&mut self, key: CommonKey, value: Element) {
        self.slots[key as usize] = value;
    }
}

impl Default for LTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    Array,
    Tuple,
    Module,
    ExternalFnCell,
    ExternalDataCell,
}

pub enum Payload {
    None,
    Array(Vec<Element>),
    Tuple(Vec<Element>),
    Module(Arc<Module>),
    ExternalFn(ExternalFn),
    ExternalData(ExternalData),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::None => write!(f, "None"),
            Payload::Array(v) => write!(f, "Array(len={})", v.len()),
            Payload::Tuple(v) => write!(f, "Tuple(len={})", v.len()),
            Payload::Module(m) => write!(f, "Module({})", m.name),
            Payload::ExternalFn(_) => write!(f, "ExternalFn(..)"),
            Payload::ExternalData(_) => write!(f, "ExternalData(..)"),
        }
    }
}

#[derive(Debug)]
pub struct Object {
    pub kind: ObjectKind,
    pub ltable: LTable,
    pub fields: HashMap<Symbol, Element, Xxh3Build>,
    pub parent_classes: Vec<NodeId>,
    pub payload: Payload,
    pub is_external: bool,
    pub is_const: bool,
    pub node: NodeId,
}

impl Object {
    pub fn new(node: NodeId, kind: ObjectKind) -> Self {
        let payload = match kind {
            ObjectKind::Array => Payload::Array(Vec::new()),
            ObjectKind::Tuple => Payload::Tuple(Vec::new()),
            _ => Payload::None,
        };
        Object {
            kind,
            ltable: LTable::new(),
            fields: HashMap::with_hasher(Xxh3Build::default()),
            parent_classes: Vec::new(),
            payload,
            is_external: false,
            is_const: false,
            node,
        }
    }

    /// Read a field. `common`, when `Some`, is the CommonKey the caller has
    /// already resolved `sym`'s name to (the engine caches this mapping per
    /// interner, spec §4.2's `ltable` fast path) — callers without that
    /// context can pass `None` and fall back to the general map.
    pub fn get(&self, sym: Symbol, common: Option<CommonKey>) -> Option<Element> {
        if let Some(key) = common {
            let v = self.ltable.get(key);
            if !v.is_none() {
                return Some(v);
            }
        }
        self.fields.get(&sym).copied()
    }

    pub fn get_field(&self, sym: Symbol) -> Option<Element> {
        self.fields.get(&sym).copied()
    }

    /// Raw field set: updates `fields` and, if `common` names a CommonKey,
    /// the `ltable` slot too. Does NOT perform the graph edge bookkeeping
    /// (§4.2) — callers go through `MemoryGraph::set_field` for that.
    pub fn set_field_raw(&mut self, sym: Symbol, common: Option<CommonKey>, value: Element) {
        self.fields.insert(sym, value);
        if let Some(key) = common {
            self.ltable.set(key, value);
        }
    }

    /// Updates the `length` ltable slot only, without touching the general
    /// `fields` map — used by array/tuple mutators which don't have (and
    /// don't need) an interned `Symbol` for `"length"` on hand.
    pub fn set_length(&mut self, len: i64) {
        self.ltable.set(CommonKey::Length, Element::int(len));
    }

    pub fn as_array(&self) -> Option<&Vec<Element>> {
        match &self.payload {
            Payload::Array(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Element>> {
        match &mut self.payload {
            Payload::Array(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_tuple(&self) -> Option<&Vec<Element>> {
        match &self.payload {
            Payload::Tuple(v) => Some(v),
            _ => None,
        }
    }
}
