//! Aggregate group: `TUPL n ANEW n AIDX ASET TGET` (spec §4.4): "Construct
//! tuple/array from top n of stack; index; assign."

use crate::class;
use crate::element::{Element, Value};
use crate::engine::{Engine, Step};
use crate::error::{VmError, VmResult};
use crate::object::{CommonKey, ObjectKind};
use crate::thread::Thread;

fn count(payload: Value) -> VmResult<usize> {
    let n = payload.as_i64().ok_or_else(|| VmError::type_("TUPL/ANEW count must be an integer"))?;
    usize::try_from(n).map_err(|_| VmError::type_("TUPL/ANEW count must be non-negative"))
}

/// `TUPL n`: pops `n` operand-stack items and appends them to a new Tuple
/// *in pop order* — `(stack[-1], stack[-2], …, stack[-n])` — pinning spec
/// §9's open question on `tuple_add`'s append order.
pub fn tupl(engine: &mut Engine, thread: &mut Thread, payload: Value) -> VmResult<Step> {
    let n = count(payload)?;
    let tup = engine.graph.new_node(ObjectKind::Tuple);
    for _ in 0..n {
        let v = thread.pop(&engine.graph)?;
        engine.graph.tuple_add(tup, v)?;
    }
    thread.set_resval(&engine.graph, Element::object(tup))?;
    engine.alloc_tick();
    Ok(Step::Continue)
}

/// `ANEW n`: as `TUPL n` but for a mutable `Array`, kept in the same
/// pop-order convention for consistency.
pub fn anew(engine: &mut Engine, thread: &mut Thread, payload: Value) -> VmResult<Step> {
    let n = count(payload)?;
    let arr = engine.graph.new_node(ObjectKind::Array);
    for _ in 0..n {
        let v = thread.pop(&engine.graph)?;
        engine.graph.array_push(arr, v)?;
    }
    thread.set_resval(&engine.graph, Element::object(arr))?;
    engine.alloc_tick();
    Ok(Step::Continue)
}

fn index_of(engine: &Engine, thread: &Thread) -> VmResult<usize> {
    match thread.resval(&engine.graph) {
        Element::Value(v) => {
            let i = v.as_i64().ok_or_else(|| VmError::type_("index must be an integer"))?;
            usize::try_from(i).map_err(|_| VmError::index("negative index"))
        }
        _ => Err(VmError::type_("index must be an integer")),
    }
}

fn deep_lookup_method(engine: &Engine, target: crate::element::NodeId, name: &str) -> Option<crate::element::NodeId> {
    let class = engine.graph.get(target)?.object.lock().ltable.get(CommonKey::Class);
    let Element::Object(class_id) = class else { return None };
    match class::deep_lookup(&engine.graph, class_id, engine.interner.intern(name)) {
        Some(Element::Object(m)) => Some(m),
        _ => None,
    }
}

/// `AIDX`: pops the container, reads `resval` as the index, sets
/// `resval = container[index]`. Delegates to `__index__` for non-Array
/// Objects (spec §4.6's arraylike protocol).
pub fn aidx(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let index = index_of(engine, thread)?;
    let container = thread.pop(&engine.graph)?;
    let Element::Object(container_id) = container else {
        return Err(VmError::type_("AIDX on a non-Object"));
    };
    let is_array = engine.graph.get(container_id).map(|n| n.object.lock().kind == ObjectKind::Array).unwrap_or(false);
    if is_array {
        let v = engine.graph.array_get(container_id, index)?;
        thread.set_resval(&engine.graph, v)?;
        return Ok(Step::Continue);
    }
    if let Some(method) = deep_lookup_method(engine, container_id, "__index__") {
        let bound = engine.bind_method(method, container_id)?;
        thread.set_resval(&engine.graph, Element::int(index as i64))?;
        engine.invoke(thread, Element::object(bound))?;
        return Ok(Step::Continue);
    }
    Err(VmError::type_("value does not support indexing"))
}

/// `ASET`: pops the value, peeks (does not pop) the container, writes
/// `container[resval] = value`, leaving the container on the stack for
/// chaining.
pub fn aset(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let index = index_of(engine, thread)?;
    let value = thread.pop(&engine.graph)?;
    let container = thread.peek(&engine.graph)?;
    let Element::Object(container_id) = container else {
        return Err(VmError::type_("ASET on a non-Object"));
    };
    let is_array = engine.graph.get(container_id).map(|n| n.object.lock().kind == ObjectKind::Array).unwrap_or(false);
    if is_array {
        engine.graph.array_set(container_id, index, value)?;
        return Ok(Step::Continue);
    }
    if let Some(method) = deep_lookup_method(engine, container_id, "__set__") {
        let bound = engine.bind_method(method, container_id)?;
        thread.push(&engine.graph, value)?;
        thread.set_resval(&engine.graph, Element::int(index as i64))?;
        engine.invoke(thread, Element::object(bound))?;
        return Ok(Step::Continue);
    }
    Err(VmError::type_("value does not support index assignment"))
}

/// `TGET`: like `AIDX` but for the immutable `Tuple` variant.
pub fn tget(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let index = index_of(engine, thread)?;
    let container = thread.pop(&engine.graph)?;
    let Element::Object(container_id) = container else {
        return Err(VmError::type_("TGET on a non-Object"));
    };
    let node = engine.graph.get(container_id).ok_or_else(|| VmError::internal("dangling tuple"))?;
    let value = {
        let obj = node.object.lock();
        let tuple = obj.as_tuple().ok_or_else(|| VmError::type_("TGET on a non-Tuple"))?;
        tuple.get(index).copied().ok_or_else(|| VmError::index(format!("index {index} out of range")))?
    };
    thread.set_resval(&engine.graph, value)?;
    Ok(Step::Continue)
}
