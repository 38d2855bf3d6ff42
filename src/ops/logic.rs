//! Logic group: `NOT NOTC AND OR XOR` (spec §4.1/§4.4).

use crate::element::Element;
use crate::engine::{Engine, Step};
use crate::error::VmResult;
use crate::thread::Thread;

/// JL-`not`: `None` for truthy input, integer `1` for falsy — unary, acts
/// on `resval` in place.
pub fn not(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let v = thread.resval(&engine.graph);
    thread.set_resval(&engine.graph, v.logical_not())?;
    Ok(Step::Continue)
}

/// C-style `!!`: `0`/`1`.
pub fn not_c(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let v = thread.resval(&engine.graph);
    thread.set_resval(&engine.graph, v.c_not())?;
    Ok(Step::Continue)
}

#[derive(Clone, Copy)]
pub enum Op {
    And,
    Or,
    Xor,
}

/// Pops `rhs` then `lhs` (both operands already evaluated by codegen —
/// short-circuiting, where required, is emitted as `IF`/`IFN` branches
/// around the operand evaluation itself, not inside this opcode).
pub fn binary(engine: &mut Engine, thread: &mut Thread, op: Op) -> VmResult<Step> {
    let rhs = thread.pop(&engine.graph)?.is_truthy();
    let lhs = thread.pop(&engine.graph)?.is_truthy();
    let result = match op {
        Op::And => lhs && rhs,
        Op::Or => lhs || rhs,
        Op::Xor => lhs ^ rhs,
    };
    thread.set_resval(&engine.graph, if result { Element::int(1) } else { Element::None })?;
    Ok(Step::Continue)
}
