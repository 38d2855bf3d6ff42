//! Exception mechanism (spec §4.7): `CTCH` installs a catch target, `RAIS`
//! flags the current block, and the engine's next dispatch tick walks the
//! saved-block stack looking for a frame carrying `$try_goto`.

use crate::block;
use crate::element::Element;
use crate::engine::Engine;
use crate::error::{VmError, VmResult};
use crate::memory_graph::MemoryGraph;
use crate::object::{CommonKey, ObjectKind};
use crate::thread::Thread;

/// `CTCH n`: installs `$try_goto = ip + n + 1` on the current block, where
/// `ip` is the CTCH instruction's own instruction pointer (spec §4.4).
pub fn install_catch(graph: &MemoryGraph, thread: &Thread, ctch_ip: i64, offset: i64) -> VmResult<()> {
    block::set_try_goto(graph, thread.current_block, ctch_ip + offset + 1)
}

/// `RAIS`: snapshots the thread's current `resval` as the raised value and
/// flags the current block (spec §4.7: "sets `$error=1`... re-enters the
/// exception handler at the next dispatch").
pub fn raise(graph: &MemoryGraph, thread: &Thread) -> VmResult<()> {
    let value = thread.resval(graph);
    let value = if value.is_none() { Element::int(1) } else { value };
    block::set_error(graph, thread.current_block, value)
}

pub enum Outcome {
    /// A catch frame absorbed the exception; execution resumes at the
    /// returned instruction pointer with `$error` cleared.
    Caught { resume_ip: i64 },
    /// No frame anywhere up the saved-block stack carries a catch target.
    Unhandled(Element),
}

/// Runs once `$error` is observed set on the current block (spec §4.6's
/// "check `$error` on current block -> if set, run exception machinery").
/// Pops frames (exactly like `RET`, restoring the operand stack to each
/// popped frame's saved depth) until one carrying `$try_goto` is found, or
/// the saved-block stack empties.
pub fn handle_exception(graph: &MemoryGraph, thread: &mut Thread) -> VmResult<Outcome> {
    loop {
        if let Some(target) = block::try_goto(graph, thread.current_block) {
            let exception = block::error_value(graph, thread.current_block);
            block::clear_try_goto(graph, thread.current_block)?;
            block::clear_error(graph, thread.current_block)?;
            thread.set_resval(graph, exception)?;
            return Ok(Outcome::Caught { resume_ip: target });
        }
        let exception = block::error_value(graph, thread.current_block);
        if !thread.pop_frame(graph)? {
            return Ok(Outcome::Unhandled(exception));
        }
        block::set_error(graph, thread.current_block, exception)?;
    }
}

/// Engine-internal helper: every failed op calls through here instead of
/// returning a bare `VmError`, so Rust-level failures (type/nil/index/
/// arithmetic/timeout/argument/io) become catchable JL exceptions rather
/// than aborting the engine (spec §4.7: "`vm_throw_error`... used by all
/// failed ops").
///
/// Builds an instance of the well-known `Error` class carrying `kind` (the
/// `ErrorKind` name, e.g. `"TypeError"`) and `message` fields, if the host
/// has registered one (spec §7: "as instances of subclasses of the `Error`
/// class"; the core ships only the `Error` base class itself — the
/// per-kind subclasses live in the `error` standard module, out of scope
/// here). Without a registered `Error` class, falls back to raising the
/// message length as a bare integer so the engine still halts to a clean
/// unhandled-exception report rather than losing the failure.
pub fn throw(engine: &Engine, thread: &Thread, err: VmError) -> VmResult<()> {
    if !err.is_catchable() {
        return Err(err);
    }
    let message = err.to_string();
    let kind = err.kind();
    let value = match engine.class("Error") {
        Some(class_id) => {
            let instance = engine.graph.new_node(ObjectKind::Plain);
            engine.graph.set_field(instance, engine.interner.intern("class"), Some(CommonKey::Class), Element::object(class_id))?;
            // `kind`/`message` are stored as raw interned-symbol indices: a
            // full `String` Object is a built-in-module concept (spec §1's
            // Non-goals), out of reach for the core to construct directly.
            let kind_sym = engine.interner.intern(kind.class_name());
            engine.graph.set_field(instance, engine.interner.intern("kind"), None, Element::int(kind_sym.index() as i64))?;
            let message_sym = engine.interner.intern(&message);
            engine.graph.set_field(instance, engine.interner.intern("message"), None, Element::int(message_sym.index() as i64))?;
            Element::object(instance)
        }
        None => Element::int(message.len() as i64),
    };
    thread.set_resval(&engine.graph, value)?;
    raise(&engine.graph, thread)
}
