//! Type group: `IS` (spec §4.4/§4.6): "Pop a class, pop an instance, test
//! class membership across the inheritance graph."

use crate::element::Element;
use crate::engine::{Engine, Step};
use crate::error::VmResult;
use crate::object::CommonKey;
use crate::thread::Thread;

/// `IS`: pops `rhs` (the candidate class), pops `lhs` (the instance), and
/// writes a truthy `resval` if `lhs`'s class is `rhs` or inherits from it.
/// Non-Object `lhs`, or a non-Object `rhs`, is never a match.
pub fn is(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let rhs = thread.pop(&engine.graph)?;
    let lhs = thread.pop(&engine.graph)?;
    let result = match (lhs, rhs) {
        (Element::Object(instance_id), Element::Object(class_id)) => {
            let lhs_class = engine
                .graph
                .get(instance_id)
                .map(|n| n.object.lock().ltable.get(CommonKey::Class))
                .unwrap_or(Element::None);
            match lhs_class {
                Element::Object(lhs_class_id) => {
                    lhs_class_id == class_id || crate::class::inherits_from(&engine.graph, lhs_class_id, class_id)
                }
                _ => false,
            }
        }
        _ => false,
    };
    thread.set_resval(&engine.graph, if result { Element::int(1) } else { Element::None })?;
    Ok(Step::Continue)
}
