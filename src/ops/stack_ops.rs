//! Stack group: `PUSH PEEK RES PSRS DUP SINC` (spec §4.4).

use crate::element::{Element, Value};
use crate::engine::{Engine, Step};
use crate::error::{VmError, VmResult};
use crate::thread::Thread;

pub fn push(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let v = thread.resval(&engine.graph);
    thread.push(&engine.graph, v)?;
    engine.alloc_tick();
    Ok(Step::Continue)
}

/// Reads the stack top into `resval` without removing it.
pub fn peek(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let v = thread.peek(&engine.graph)?;
    thread.set_resval(&engine.graph, v)?;
    Ok(Step::Continue)
}

pub fn res(engine: &mut Engine, thread: &mut Thread, payload: Value) -> VmResult<Step> {
    thread.set_resval(&engine.graph, Element::Value(payload))?;
    Ok(Step::Continue)
}

/// `PSRS` = `PUSH` + `RES`: pushes the current `resval`, then loads the new
/// literal into `resval` (spec §4.4).
pub fn psrs(engine: &mut Engine, thread: &mut Thread, payload: Value) -> VmResult<Step> {
    let old = thread.resval(&engine.graph);
    thread.push(&engine.graph, old)?;
    thread.set_resval(&engine.graph, Element::Value(payload))?;
    engine.alloc_tick();
    Ok(Step::Continue)
}

pub fn dup(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let top = thread.peek(&engine.graph)?;
    thread.push(&engine.graph, top)?;
    engine.alloc_tick();
    Ok(Step::Continue)
}

/// `SINC v`: adds `v` to the top-of-stack int in place.
pub fn sinc(engine: &mut Engine, thread: &mut Thread, payload: Value) -> VmResult<Step> {
    let top = thread.pop(&engine.graph)?;
    let Element::Value(top_val) = top else {
        return Err(VmError::type_("SINC on a non-Value stack top"));
    };
    let sum = top_val.add(payload)?;
    thread.push(&engine.graph, Element::Value(sum))?;
    Ok(Step::Continue)
}
