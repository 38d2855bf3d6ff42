//! Class identity and inheritance (spec §3 "Class", §4.1/§4.6 `IS`).
//!
//! A class is just an Object whose `class` field points at a meta-class and
//! whose `parent_classes` lists its ancestors in MRO order; there is no
//! separate `Class` Rust type. `inherits_from` and the well-known class
//! roster live here, grounded on `JL/class.h`'s `ISCLASS`/`inherits_from`
//! predicates and extern class globals.

use hashbrown::HashMap;

use crate::element::NodeId;
use crate::intern::Symbol;
use crate::memory_graph::MemoryGraph;

/// `inherits_from(c, p)`: true iff `p == c` or `p` is reachable by walking
/// `parent_classes` transitively from `c` (spec §3). Cycle-safe: a
/// `parent_classes` cycle can only arise from a bug since class construction
/// rejects cycles (§8 invariant 3), but traversal still guards with a
/// visited set rather than trusting that invariant blindly.
pub fn inherits_from(graph: &MemoryGraph, c: NodeId, p: NodeId) -> bool {
    if c == p {
        return true;
    }
    let mut visited = hashbrown::HashSet::new();
    let mut stack = vec![c];
    while let Some(cur) = stack.pop() {
        if !visited.insert(cur) {
            continue;
        }
        if cur == p {
            return true;
        }
        if let Some(node) = graph.get(cur) {
            let obj = node.object.lock();
            for parent in &obj.parent_classes {
                stack.push(*parent);
            }
        }
    }
    false
}

/// `obj_deep_lookup(name)` (spec §4.2): breadth-first search starting at
/// `class` and walking `parent_classes` for a field named `sym`, emulating
/// single/multiple inheritance (methods/class-level fields live on the
/// class object, not the instance — callers check the instance's own
/// fields first and fall back to this for inherited members).
pub fn deep_lookup(graph: &MemoryGraph, class: NodeId, sym: Symbol) -> Option<crate::element::Element> {
    let mut visited = hashbrown::HashSet::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(class);
    visited.insert(class);
    while let Some(cur) = queue.pop_front() {
        let node = graph.get(cur)?;
        let found = {
            let obj = node.object.lock();
            let found = obj.get_field(sym);
            if found.is_none() {
                for parent in &obj.parent_classes {
                    if visited.insert(*parent) {
                        queue.push_back(*parent);
                    }
                }
            }
            found
        };
        if let Some(v) = found {
            return Some(v);
        }
    }
    None
}

/// Returns `true` if adding `new_parent` to `class`'s `parent_classes` would
/// introduce a cycle (spec §8 invariant 3: "cycles in `parent_classes` are
/// rejected at class construction").
pub fn would_cycle(graph: &MemoryGraph, class: NodeId, new_parent: NodeId) -> bool {
    class == new_parent || inherits_from(graph, new_parent, class)
}

/// Registry of built-in classes every loaded program can assume exist,
/// pinned from `JL/class.h`'s extern globals (`class_object`,
/// `class_array`, `class_string`, `class_tuple`, `class_function`,
/// `class_external_function`, `class_method`, `class_module`,
/// `class_thread`, …). The core registers the *identity* of these classes;
/// their method bodies are external-function registrations supplied by the
/// `builtin`/`io`/`struct`/`error` standard modules (out of core scope, spec
/// §1).
#[derive(Debug, Default)]
pub struct WellKnownClasses {
    by_name: HashMap<Symbol, NodeId>,
}

impl WellKnownClasses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: Symbol, node: NodeId) {
        self.by_name.insert(name, node);
    }

    pub fn get(&self, name: Symbol) -> Option<NodeId> {
        self.by_name.get(&name).copied()
    }
}

/// The canonical well-known class names, in the order `JL/class.h` declares
/// their extern globals.
pub const WELL_KNOWN_CLASS_NAMES: &[&str] = &[
    "Class",
    "Object",
    "Array",
    "String",
    "Tuple",
    "Function",
    "AnonFunction",
    "ExternalFunction",
    "Method",
    "ExternalMethod",
    "MethodInstance",
    "ExternalMethodInstance",
    "Module",
    "Thread",
    "Error",
];
