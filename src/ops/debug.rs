//! Debug group: `ADR PRNT` (spec §4.4/§9): "Expose enough of the runtime to
//! write introspection tooling without leaking raw memory."

use crate::element::Element;
use crate::engine::{Engine, Step};
use crate::error::VmResult;
use crate::thread::Thread;

/// `ADR`: spec §9 leaves the representation of "object address" open since
/// JL has no raw pointers by design here — resolved as the stable integer
/// `NodeId`, which is already the only handle user code ever holds.
/// Applied to a non-Object `resval` it is a no-op (there is no address to
/// take).
pub fn adr(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let v = thread.resval(&engine.graph);
    if let Element::Object(id) = v {
        thread.set_resval(&engine.graph, Element::int(id.0 as i64))?;
    }
    Ok(Step::Continue)
}

/// `PRNT`: writes `resval`'s display form to the engine's output sink
/// followed by a newline, then leaves `resval` untouched.
pub fn prnt(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let v = thread.resval(&engine.graph);
    engine.print_line(&format!("{v}"));
    Ok(Step::Continue)
}
