//! Compare group: `EQ NEQ GT GTE LT LTE` (spec §4.4): "Produce truthy-`1` or
//! `None`."

use std::cmp::Ordering;

use crate::element::Element;
use crate::engine::{Engine, Step};
use crate::error::{VmError, VmResult};
use crate::thread::Thread;

#[derive(Clone, Copy)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

fn truthy_result(b: bool) -> Element {
    if b {
        Element::int(1)
    } else {
        Element::None
    }
}

/// Equality of two Object references compares by Node identity; equality of
/// Values compares by tag+payload with numeric promotion (spec §4.1).
fn elements_equal(a: Element, b: Element) -> bool {
    match (a, b) {
        (Element::None, Element::None) => true,
        (Element::Value(x), Element::Value(y)) => x.numeric_eq(y),
        (Element::Object(x), Element::Object(y)) => x == y,
        _ => false,
    }
}

pub fn compare(engine: &mut Engine, thread: &mut Thread, op: Op) -> VmResult<Step> {
    let rhs = thread.pop(&engine.graph)?;
    let lhs = thread.pop(&engine.graph)?;
    let result = match op {
        Op::Eq => truthy_result(elements_equal(lhs, rhs)),
        Op::Neq => truthy_result(!elements_equal(lhs, rhs)),
        ordering_op => {
            let (Element::Value(a), Element::Value(b)) = (lhs, rhs) else {
                return Err(VmError::type_("ordering comparison requires two Values"));
            };
            let ord = a.compare(b);
            let keep = match ordering_op {
                Op::Gt => ord == Ordering::Greater,
                Op::Gte => ord != Ordering::Less,
                Op::Lt => ord == Ordering::Less,
                Op::Lte => ord != Ordering::Greater,
                Op::Eq | Op::Neq => unreachable!(),
            };
            truthy_result(keep)
        }
    };
    thread.set_resval(&engine.graph, result)?;
    Ok(Step::Continue)
}
