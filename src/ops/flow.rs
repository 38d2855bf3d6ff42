//! Flow group: `NOP EXIT JMP IF IFN GOTO RET CALL MCLL RMDL CTCH RAIS`
//! (spec §4.4).

use crate::block;
use crate::element::Value;
use crate::engine::{Engine, Step};
use crate::error::{VmError, VmResult};
use crate::exception;
use crate::intern::Symbol;
use crate::thread::Thread;

fn offset(v: Value) -> VmResult<i64> {
    v.as_i64().ok_or_else(|| VmError::type_("jump offset must be an integer"))
}

pub fn jmp(engine: &mut Engine, thread: &mut Thread, ip: i64, payload: Value) -> VmResult<Step> {
    let target = ip + offset(payload)?;
    block::set_ip(&engine.graph, thread.current_block, target)?;
    Ok(Step::Jumped)
}

/// `IF`/`IFN`: jumps when `resval` is truthy (`IF`) or falsy (`IFN`); falls
/// through to normal auto-advance otherwise (spec §4.4).
pub fn branch(engine: &mut Engine, thread: &mut Thread, ip: i64, payload: Value, on_truthy: bool) -> VmResult<Step> {
    let cond = thread.resval(&engine.graph).is_truthy();
    if cond == on_truthy {
        let target = ip + offset(payload)?;
        block::set_ip(&engine.graph, thread.current_block, target)?;
        Ok(Step::Jumped)
    } else {
        Ok(Step::Continue)
    }
}

/// `GOTO`: absolute jump to the instruction index named by the payload
/// (codegen resolves the label to an address at compile time).
pub fn goto(engine: &mut Engine, thread: &mut Thread, payload: Value) -> VmResult<Step> {
    let target = offset(payload)?;
    block::set_ip(&engine.graph, thread.current_block, target)?;
    Ok(Step::Jumped)
}

pub fn ret(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    if thread.pop_frame(&engine.graph)? {
        Ok(Step::Continue)
    } else {
        Ok(Step::Halt)
    }
}

pub fn call(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    let callee = thread.pop(&engine.graph)?;
    engine.invoke(thread, callee)
}

pub fn mcll(engine: &mut Engine, thread: &mut Thread, name: Symbol) -> VmResult<Step> {
    engine.exec_mcll(thread, name)
}

pub fn rmdl(engine: &mut Engine, thread: &mut Thread, name: Symbol) -> VmResult<Step> {
    engine.exec_rmdl(thread, name)
}

pub fn ctch(engine: &mut Engine, thread: &mut Thread, ip: i64, payload: Value) -> VmResult<Step> {
    let n = offset(payload)?;
    exception::install_catch(&engine.graph, thread, ip, n)?;
    Ok(Step::Continue)
}

pub fn rais(engine: &mut Engine, thread: &mut Thread) -> VmResult<Step> {
    exception::raise(&engine.graph, thread)?;
    Ok(Step::Continue)
}
