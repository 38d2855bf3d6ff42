//! Block: a `Plain` Object used as a call-stack frame (spec §3/§4.5).
//!
//! There is no dedicated Rust `Block` struct — a Block *is* an Object in
//! the graph, so that locals stay reachable for closures during
//! reclamation (spec §9: "retain this: closures would otherwise need a
//! separate upvalue mechanism"). This module is a thin, typed accessor
//! layer over the `CommonKey` slots spec §3 lists as a Block's fixed
//! fields: `$module`, `$ip`, `$parent`, `self`, `$caller`, `$resval` (root
//! only), `$stack_size`, `$try_goto`, `$error`.

use crate::element::Element;
use crate::element::NodeId;
use crate::error::{VmError, VmResult};
use crate::memory_graph::MemoryGraph;
use crate::object::{CommonKey, ObjectKind};

/// Allocates a new Block Object (a `Plain` Object) and wires its fixed
/// slots. `parent` is the lexical parent block (closures look locals up by
/// walking this chain, spec §4.5); `module` identifies which Module's
/// instructions `$ip` indexes into.
pub fn new_block(
    graph: &MemoryGraph,
    module: NodeId,
    parent: Option<NodeId>,
    self_obj: Option<NodeId>,
    caller: Option<NodeId>,
    entry_ip: i64,
) -> VmResult<NodeId> {
    let block = graph.new_node(ObjectKind::Plain);
    graph.set_field(block, sym_for(CommonKey::ModuleKey), Some(CommonKey::ModuleKey), Element::object(module))?;
    graph.inc_edge(block, module);
    if let Some(p) = parent {
        set_parent(graph, block, p)?;
    }
    if let Some(s) = self_obj {
        set_self(graph, block, s)?;
    }
    if let Some(c) = caller {
        set_caller(graph, block, c)?;
    }
    set_ip(graph, block, entry_ip)?;
    Ok(block)
}

fn sym_for(key: CommonKey) -> crate::intern::Symbol {
    // Block fields are only ever addressed via `CommonKey`, so any stable
    // placeholder symbol works here — these writes never go through the
    // general `fields` map lookup path, only the `ltable` fast path.
    crate::intern::Symbol::from_index(key as u32 | 0x8000_0000)
}

pub fn ip(graph: &MemoryGraph, block: NodeId) -> VmResult<i64> {
    let node = graph.get(block).ok_or_else(|| VmError::internal("ip: missing block"))?;
    match node.object.lock().ltable.get(CommonKey::Ip) {
        Element::Value(v) => Ok(v.as_i64().unwrap_or(0)),
        _ => Ok(0),
    }
}

pub fn set_ip(graph: &MemoryGraph, block: NodeId, ip: i64) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::Ip), Some(CommonKey::Ip), Element::int(ip))
}

pub fn module(graph: &MemoryGraph, block: NodeId) -> VmResult<NodeId> {
    let node = graph.get(block).ok_or_else(|| VmError::internal("module: missing block"))?;
    match node.object.lock().ltable.get(CommonKey::ModuleKey) {
        Element::Object(m) => Ok(m),
        _ => Err(VmError::internal("block has no $module")),
    }
}

pub fn parent(graph: &MemoryGraph, block: NodeId) -> Option<NodeId> {
    let node = graph.get(block)?;
    match node.object.lock().ltable.get(CommonKey::Parent) {
        Element::Object(p) => Some(p),
        _ => None,
    }
}

pub fn set_parent(graph: &MemoryGraph, block: NodeId, parent: NodeId) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::Parent), Some(CommonKey::Parent), Element::object(parent))
}

pub fn self_obj(graph: &MemoryGraph, block: NodeId) -> Option<NodeId> {
    let node = graph.get(block)?;
    match node.object.lock().ltable.get(CommonKey::SelfKey) {
        Element::Object(s) => Some(s),
        _ => None,
    }
}

pub fn set_self(graph: &MemoryGraph, block: NodeId, self_obj: NodeId) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::SelfKey), Some(CommonKey::SelfKey), Element::object(self_obj))
}

pub fn caller(graph: &MemoryGraph, block: NodeId) -> Option<NodeId> {
    let node = graph.get(block)?;
    match node.object.lock().ltable.get(CommonKey::Caller) {
        Element::Object(c) => Some(c),
        _ => None,
    }
}

pub fn set_caller(graph: &MemoryGraph, block: NodeId, caller: NodeId) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::Caller), Some(CommonKey::Caller), Element::object(caller))
}

pub fn resval(graph: &MemoryGraph, root_block: NodeId) -> Element {
    graph.get(root_block).map(|n| n.object.lock().ltable.get(CommonKey::Resval)).unwrap_or(Element::None)
}

pub fn set_resval(graph: &MemoryGraph, root_block: NodeId, value: Element) -> VmResult<()> {
    graph.set_field(root_block, sym_for(CommonKey::Resval), Some(CommonKey::Resval), value)
}

pub fn stack_size(graph: &MemoryGraph, block: NodeId) -> usize {
    match graph.get(block).map(|n| n.object.lock().ltable.get(CommonKey::StackSize)) {
        Some(Element::Value(v)) => v.as_i64().unwrap_or(0).max(0) as usize,
        _ => 0,
    }
}

pub fn set_stack_size(graph: &MemoryGraph, block: NodeId, size: usize) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::StackSize), Some(CommonKey::StackSize), Element::int(size as i64))
}

/// `$try_goto`: the catch target installed by `CTCH` (spec §4.7). `None`
/// means this block carries no active catch frame.
pub fn try_goto(graph: &MemoryGraph, block: NodeId) -> Option<i64> {
    match graph.get(block)?.object.lock().ltable.get(CommonKey::TryGoto) {
        Element::Value(v) => v.as_i64(),
        _ => None,
    }
}

pub fn set_try_goto(graph: &MemoryGraph, block: NodeId, target: i64) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::TryGoto), Some(CommonKey::TryGoto), Element::int(target))
}

pub fn clear_try_goto(graph: &MemoryGraph, block: NodeId) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::TryGoto), Some(CommonKey::TryGoto), Element::None)
}

pub fn has_error(graph: &MemoryGraph, block: NodeId) -> bool {
    matches!(
        graph.get(block).map(|n| n.object.lock().ltable.get(CommonKey::ErrorFlag)),
        Some(e) if e.is_truthy()
    )
}

pub fn set_error(graph: &MemoryGraph, block: NodeId, error: Element) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::ErrorFlag), Some(CommonKey::ErrorFlag), error)
}

pub fn clear_error(graph: &MemoryGraph, block: NodeId) -> VmResult<()> {
    graph.set_field(block, sym_for(CommonKey::ErrorFlag), Some(CommonKey::ErrorFlag), Element::None)
}

pub fn error_value(graph: &MemoryGraph, block: NodeId) -> Element {
    graph.get(block).map(|n| n.object.lock().ltable.get(CommonKey::ErrorFlag)).unwrap_or(Element::None)
}
