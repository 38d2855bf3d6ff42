//! Binding group: `SET MDST FLD GET GTSH` (spec §4.4).

use crate::block;
use crate::class;
use crate::element::Element;
use crate::engine::{Engine, Step};
use crate::error::VmError;
use crate::error::VmResult;
use crate::intern::Symbol;
use crate::object::CommonKey;
use crate::thread::Thread;

/// `SET id`: writes current block's local `id` from `resval`, via
/// `memory_graph_set_var` (nearest enclosing lexical block already
/// defining `id`, else the current block; spec §4.4/§4.5).
pub fn set(engine: &mut Engine, thread: &mut Thread, id: Symbol) -> VmResult<Step> {
    let value = thread.resval(&engine.graph);
    engine.graph.set_var(thread.current_block, id, value)?;
    Ok(Step::Continue)
}

/// `MDST id`: writes a module-level field from `resval`.
pub fn mdst(engine: &mut Engine, thread: &mut Thread, id: Symbol) -> VmResult<Step> {
    let module = block::module(&engine.graph, thread.current_block)?;
    let value = thread.resval(&engine.graph);
    engine.graph.set_field(module, id, None, value)?;
    Ok(Step::Continue)
}

/// `FLD id`: pops the target object and sets its field `id` to `resval`.
pub fn fld(engine: &mut Engine, thread: &mut Thread, id: Symbol) -> VmResult<Step> {
    let target = thread.pop(&engine.graph)?;
    let Element::Object(target_id) = target else {
        return Err(VmError::nil("field access on None"));
    };
    let value = thread.resval(&engine.graph);
    engine.graph.set_field(target_id, id, None, value)?;
    Ok(Step::Continue)
}

/// Whether `node_id` is a callable (`Function`/`ExternalFunction`) Object:
/// has an entry `$ip` or carries an `ExternalFn` payload.
fn is_callable(engine: &Engine, node_id: crate::element::NodeId) -> bool {
    engine
        .graph
        .get(node_id)
        .map(|n| {
            let obj = n.object.lock();
            matches!(obj.ltable.get(CommonKey::Ip), Element::Value(_)) || matches!(obj.payload, crate::object::Payload::ExternalFn(_))
        })
        .unwrap_or(false)
}

/// `GET id`: `resval = resval.id`, checking the object's own fields first
/// and falling back to `obj_deep_lookup` over its class hierarchy. A
/// callable found only via the class fallback (i.e. a method, not a plain
/// inherited data field) is bound to the receiver as a `MethodInstance`/
/// `ExternalMethodInstance` (spec §4.5 step 4's "`self` is the receiver").
pub fn get(engine: &mut Engine, thread: &mut Thread, id: Symbol) -> VmResult<Step> {
    let target = thread.resval(&engine.graph);
    let Element::Object(target_id) = target else {
        return Err(VmError::nil("field access on None"));
    };
    let common = CommonKey::from_name(&engine.interner.resolve(id));
    let direct = engine.graph.get(target_id).and_then(|n| n.object.lock().get(id, common));
    let value = match direct {
        Some(v) => v,
        None => {
            let class = engine
                .graph
                .get(target_id)
                .map(|n| n.object.lock().ltable.get(CommonKey::Class))
                .unwrap_or(Element::None);
            let found = match class {
                Element::Object(class_id) => class::deep_lookup(&engine.graph, class_id, id).unwrap_or(Element::None),
                _ => Element::None,
            };
            match found {
                Element::Object(method_id) if is_callable(engine, method_id) => {
                    Element::object(engine.bind_method(method_id, target_id)?)
                }
                other => other,
            }
        }
    };
    thread.set_resval(&engine.graph, value)?;
    Ok(Step::Continue)
}

/// `GTSH id` = `GET` + `PUSH` in one step.
pub fn gtsh(engine: &mut Engine, thread: &mut Thread, id: Symbol) -> VmResult<Step> {
    get(engine, thread, id)?;
    let v = thread.resval(&engine.graph);
    thread.push(&engine.graph, v)?;
    Ok(Step::Continue)
}
