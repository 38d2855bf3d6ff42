//! Arithmetic group: `ADD SUB MULT DIV MOD INC DEC` (spec §4.1/§4.4).

use crate::class;
use crate::element::Element;
use crate::engine::{Engine, Step};
use crate::error::{VmError, VmResult};
use crate::object::CommonKey;
use crate::thread::Thread;

#[derive(Clone, Copy)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Op {
    fn operator_method_name(self) -> &'static str {
        match self {
            Op::Add => "__add__",
            Op::Sub => "__sub__",
            Op::Mul => "__mul__",
            Op::Div => "__div__",
            Op::Rem => "__mod__",
        }
    }
}

/// Pops `rhs` then `lhs`, applies `op`, stores the result in `resval` (spec
/// §4.4: "Pop two"). If either operand is an Object, the operation
/// delegates to the class's operator method (spec §4.1) instead of
/// attempting numeric promotion.
pub fn binary(engine: &mut Engine, thread: &mut Thread, op: Op) -> VmResult<Step> {
    let rhs = thread.pop(&engine.graph)?;
    let lhs = thread.pop(&engine.graph)?;
    match (lhs, rhs) {
        (Element::Value(a), Element::Value(b)) => {
            let result = match op {
                Op::Add => a.add(b)?,
                Op::Sub => a.sub(b)?,
                Op::Mul => a.mul(b)?,
                Op::Div => a.div(b)?,
                Op::Rem => a.rem(b)?,
            };
            thread.set_resval(&engine.graph, Element::Value(result))?;
            Ok(Step::Continue)
        }
        (Element::Object(lhs_id), _) => {
            let class = engine
                .graph
                .get(lhs_id)
                .map(|n| n.object.lock().ltable.get(CommonKey::Class))
                .unwrap_or(Element::None);
            let Element::Object(class_id) = class else {
                return Err(VmError::type_("operator on an Object with no class"));
            };
            let method_name = engine.interner.intern(op.operator_method_name());
            let method = class::deep_lookup(&engine.graph, class_id, method_name);
            match method {
                Some(Element::Object(method_id)) => {
                    let bound = engine.bind_method(method_id, lhs_id)?;
                    thread.set_resval(&engine.graph, rhs)?;
                    engine.invoke(thread, Element::object(bound))?;
                    Ok(Step::Continue)
                }
                _ => Err(VmError::type_(format!(
                    "class has no {} operator method",
                    op.operator_method_name()
                ))),
            }
        }
        _ => Err(VmError::type_("operator applied to incompatible operands")),
    }
}

/// `INC`/`DEC`: update `resval` in place by `delta` (spec §4.4: "update
/// one").
pub fn inc_dec(engine: &mut Engine, thread: &mut Thread, delta: i64) -> VmResult<Step> {
    let cur = thread.resval(&engine.graph);
    let Element::Value(v) = cur else {
        return Err(VmError::type_("INC/DEC on a non-Value resval"));
    };
    let updated = v.add(crate::element::Value::Int64(delta))?;
    thread.set_resval(&engine.graph, Element::Value(updated))?;
    Ok(Step::Continue)
}
