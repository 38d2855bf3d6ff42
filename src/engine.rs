//! The execution engine (spec §4.6): fetch/decode/dispatch of instructions,
//! operator semantics, and the function/method/constructor call protocol.
//!
//! Grounded on the teacher's `execution_engine.rs` (`execute()`/
//! `execute_next()`'s fetch-dispatch-advance loop, `execute_try`/
//! `execute_throw`'s exception state machine) and `jump_table/mod.rs` (one
//! category module per opcode group, registered into a single dispatch
//! point) — generalised here from Neo's opcode set to JL's.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::block;
use crate::class::{self, WellKnownClasses};
use crate::element::{Element, NodeId};
use crate::error::{VmError, VmResult};
use crate::exception;
use crate::intern::{Interner, Symbol};
use crate::limits::EngineLimits;
use crate::memory_graph::{IdMode, MemoryGraph};
use crate::module::{Instruction, Module};
use crate::object::{CommonKey, ObjectKind, Payload};
use crate::opcode::OpCode;
use crate::ops;
use crate::thread::Thread;

/// What the engine's post-instruction bookkeeping should do with `ip`.
pub enum Step {
    /// Auto-advance the (possibly now different, after a `CALL`/`RET`)
    /// current block's `ip` by one.
    Continue,
    /// The handler already set `ip` explicitly (`JMP`/`IF`/`IFN`/`GOTO`
    /// taken) — don't also advance.
    Jumped,
    /// Halt: either an `EXIT` with no enclosing frame to return to, or the
    /// handler observed an unhandled exception.
    Halt,
}

/// Whether [`Engine::start_function_call`] already ran `callable` to
/// completion (an external function: one native call, inherently atomic)
/// or merely pushed a frame that the caller must drive to completion via
/// repeated [`Engine::step`] calls (a JL function body).
pub enum CallStart {
    Done,
    Pushed,
}

pub struct Engine {
    pub graph: MemoryGraph,
    pub limits: EngineLimits,
    pub classes: WellKnownClasses,
    pub interner: Arc<Interner>,
    /// Loaded modules by interned name (spec §4.8's module registry; also
    /// backs `RMDL`'s by-name lookup).
    pub modules: HashMap<Symbol, (NodeId, Arc<Module>)>,
    init_locks: Mutex<HashMap<NodeId, Arc<Mutex<()>>>>,
    alloc_count: std::sync::atomic::AtomicU64,
    /// Sink for `PRNT` (spec §4.4's debug group). Defaults to stdout; hosts
    /// embedding the engine can swap it for a buffer via [`Engine::set_output`].
    output: Mutex<Box<dyn std::io::Write + Send>>,
    /// Weak back-reference to the `Arc<Mutex<Engine>>` the host wrapped this
    /// Engine in, set once by `Vm::new` (spec §4.9/§5: `Thread.start`
    /// spawns a real OS thread that must drive the *same* Engine — this is
    /// how its native function gets back in).
    self_handle: Mutex<Option<std::sync::Weak<Mutex<Engine>>>>,
}

impl Engine {
    pub fn new(interner: Arc<Interner>, limits: EngineLimits) -> Self {
        Engine {
            graph: MemoryGraph::new(IdMode::Sequential),
            limits,
            classes: WellKnownClasses::new(),
            interner,
            modules: HashMap::new(),
            init_locks: Mutex::new(HashMap::new()),
            alloc_count: std::sync::atomic::AtomicU64::new(0),
            output: Mutex::new(Box::new(std::io::stdout())),
            self_handle: Mutex::new(None),
        }
    }

    /// Records the `Arc<Mutex<Engine>>` this Engine lives inside, so native
    /// thread-runtime functions can re-acquire it from a spawned OS thread.
    pub fn set_self_handle(&self, handle: std::sync::Weak<Mutex<Engine>>) {
        *self.self_handle.lock() = Some(handle);
    }

    pub fn self_handle(&self) -> Option<std::sync::Weak<Mutex<Engine>>> {
        self.self_handle.lock().clone()
    }

    /// Redirects `PRNT` output, e.g. to an in-memory buffer for tests.
    pub fn set_output(&mut self, sink: Box<dyn std::io::Write + Send>) {
        self.output = Mutex::new(sink);
    }

    /// Writes a line to the `PRNT` sink, ignoring I/O errors (matching the
    /// teacher's best-effort `log`/trace sinks — a broken pipe must never
    /// abort VM execution).
    pub fn print_line(&self, line: &str) {
        let mut out = self.output.lock();
        let _ = writeln!(out, "{line}");
    }

    /// Loads a compiled `Module`, wrapping it in a `Module`-kind root
    /// Object the graph can reference (spec §3 "Module"). Registers it
    /// under its interned name for `RMDL`.
    pub fn load_module(&mut self, module: Module) -> NodeId {
        let name_sym = self.interner.intern(&module.name);
        let module = Arc::new(module);
        let node = self.graph.create_root_element(ObjectKind::Module);
        if let Some(n) = self.graph.get(node) {
            n.object.lock().payload = Payload::Module(module.clone());
        }
        self.modules.insert(name_sym, (node, module));
        node
    }

    pub fn module_node(&self, name: &str) -> Option<NodeId> {
        let sym = self.interner.intern(name);
        self.modules.get(&sym).map(|(n, _)| *n)
    }

    fn module_payload(&self, module_node: NodeId) -> VmResult<Arc<Module>> {
        let node = self.graph.get(module_node).ok_or_else(|| VmError::internal("missing module node"))?;
        match &node.object.lock().payload {
            Payload::Module(m) => Ok(m.clone()),
            _ => Err(VmError::internal("node is not a Module")),
        }
    }

    /// A thread entering a module's top-level code *is* that module's
    /// first entry (spec §4.8) — mark it initialized up front so a `CALL`
    /// back into one of its own functions from that same top-level code
    /// doesn't re-trigger `ensure_module_initialized` and re-run it.
    pub fn new_thread(&self, module_node: NodeId) -> VmResult<Thread> {
        let thread = Thread::new(&self.graph, module_node, -1)?;
        self.graph.set_field(
            module_node,
            self.interner.intern("$initialized"),
            Some(CommonKey::Initialized),
            Element::int(1),
        )?;
        Ok(thread)
    }

    /// Runs `thread` until `EXIT` halts it or an unhandled exception
    /// propagates out.
    pub fn run(&mut self, thread: &mut Thread) -> VmResult<()> {
        loop {
            if !self.step(thread)? {
                return Ok(());
            }
        }
    }

    fn maybe_reclaim(&self) {
        let n = self.alloc_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if n % self.limits.reclaim_every_n_allocations == 0 {
            self.graph.free_space();
        }
    }

    /// One dispatch tick (spec §4.6). Returns `Ok(false)` when the thread
    /// has halted.
    pub fn step(&mut self, thread: &mut Thread) -> VmResult<bool> {
        if block::has_error(&self.graph, thread.current_block) {
            return match exception::handle_exception(&self.graph, thread)? {
                exception::Outcome::Caught { resume_ip } => {
                    block::set_ip(&self.graph, thread.current_block, resume_ip)?;
                    Ok(true)
                }
                exception::Outcome::Unhandled(e) => {
                    Err(VmError::UnhandledException(format!("{e}")))
                }
            };
        }

        let module_node = block::module(&self.graph, thread.current_block)?;
        let module = self.module_payload(module_node)?;
        let ip = block::ip(&self.graph, thread.current_block)?;
        if ip < 0 {
            // A freshly created root/module-init block starts at `entry -
            // 1` (entry == 0 for these) with nobody around yet to apply the
            // usual post-dispatch "+1"; this placeholder tick supplies it
            // without fetching an instruction. Blocks pushed by a CALL never
            // hit this branch: the CALL tick's own post-dispatch advance
            // (below) already carries their `entry - 1` up to `entry`
            // before the next fetch.
            block::set_ip(&self.graph, thread.current_block, 0)?;
            return Ok(true);
        }
        let instr: Instruction = *module.instruction_at(ip as u32)?;

        let outcome = ops::dispatch(self, thread, &instr, ip);
        let step = match outcome {
            Ok(step) => step,
            Err(err) if err.is_catchable() => {
                exception::throw(self, thread, err)?;
                Step::Continue
            }
            Err(err) => return Err(err),
        };

        match step {
            Step::Halt => Ok(false),
            Step::Jumped => Ok(true),
            Step::Continue => {
                let cur_ip = block::ip(&self.graph, thread.current_block)?;
                block::set_ip(&self.graph, thread.current_block, cur_ip + 1)?;
                Ok(true)
            }
        }
    }

    /// `EXIT`: pops the current frame like `RET` if one exists, otherwise
    /// halts the thread (unifies top-level program exit, function-body
    /// fallthrough, and module-init return onto one mechanism).
    pub fn exec_exit(&mut self, thread: &mut Thread) -> VmResult<Step> {
        if thread.pop_frame(&self.graph)? {
            Ok(Step::Continue)
        } else {
            Ok(Step::Halt)
        }
    }

    /// Unwraps a `MethodInstance`/`ExternalMethodInstance` Object (spec §3's
    /// bound-method roster entries) into its underlying callable and
    /// receiver, if `candidate` is one; otherwise returns it unchanged with
    /// no bound receiver (a plain `Function`/`ExternalFunction`/`Class`).
    fn unbind_method(&self, candidate: NodeId) -> (NodeId, Option<NodeId>) {
        let Some(node) = self.graph.get(candidate) else { return (candidate, None) };
        let class = node.object.lock().ltable.get(CommonKey::Class);
        let Element::Object(class_id) = class else { return (candidate, None) };
        let is_bound = [self.interner.intern("MethodInstance"), self.interner.intern("ExternalMethodInstance")]
            .iter()
            .any(|name| self.classes.get(*name) == Some(class_id));
        if !is_bound {
            return (candidate, None);
        }
        let obj = node.object.lock();
        let func = obj.get_field(self.interner.intern("func"));
        let recv = obj.get_field(self.interner.intern("self"));
        match (func, recv) {
            (Some(Element::Object(f)), Some(Element::Object(r))) => (f, Some(r)),
            _ => (candidate, None),
        }
    }

    /// Wraps `func` (a `Function` or `ExternalFunction` Object found via
    /// `obj_deep_lookup`) together with `receiver` into a bound
    /// `MethodInstance`/`ExternalMethodInstance` Object (spec §3's method
    /// roster), so a later `CALL` can recover `self` (spec §4.5 step 4:
    /// "`self` is the receiver").
    pub fn bind_method(&mut self, func: NodeId, receiver: NodeId) -> VmResult<NodeId> {
        let is_external =
            self.graph.get(func).map(|n| matches!(n.object.lock().payload, Payload::ExternalFn(_))).unwrap_or(false);
        let class_name = if is_external { "ExternalMethodInstance" } else { "MethodInstance" };
        let class_id = self.classes.get(self.interner.intern(class_name));
        let mi = self.graph.new_node(ObjectKind::Plain);
        if let Some(class_id) = class_id {
            self.graph.set_field(mi, self.interner.intern("class"), Some(CommonKey::Class), Element::object(class_id))?;
        }
        self.graph.set_field(mi, self.interner.intern("func"), None, Element::object(func))?;
        self.graph.set_field(mi, self.interner.intern("self"), None, Element::object(receiver))?;
        Ok(mi)
    }

    /// Call protocol (spec §4.5). `callee` has already been popped off the
    /// operand stack by the caller (the `CALL`/`MCLL` handler).
    pub fn invoke(&mut self, thread: &mut Thread, callee: Element) -> VmResult<Step> {
        let Element::Object(raw_callee_id) = callee else {
            return Err(VmError::type_("calling a non-callable value"));
        };
        let (callee_id, bound_self) = self.unbind_method(raw_callee_id);
        let node = self.graph.get(callee_id).ok_or_else(|| VmError::internal("dangling callee"))?;
        let (kind, class_field, external_fn, entry_ip, owner_module) = {
            let obj = node.object.lock();
            let class_field = obj.ltable.get(CommonKey::Class);
            let external_fn = match &obj.payload {
                Payload::ExternalFn(f) => Some(f.clone()),
                _ => None,
            };
            let entry_ip = match obj.ltable.get(CommonKey::Ip) {
                Element::Value(v) => v.as_i64(),
                _ => None,
            };
            let owner_module = match obj.ltable.get(CommonKey::ModuleKey) {
                Element::Object(m) => Some(m),
                _ => None,
            };
            (obj.kind, class_field, external_fn, entry_ip, owner_module)
        };

        if bound_self.is_none() && self.is_class_object(callee_id) {
            return self.instantiate(thread, callee_id);
        }

        if let Some(f) = external_fn {
            let arg = thread.resval(&self.graph);
            let result = match bound_self {
                Some(receiver) => self.call_external_with_receiver(thread, &f, receiver, arg)?,
                None => f(self, thread, None, arg)?,
            };
            thread.set_resval(&self.graph, result)?;
            return Ok(Step::Continue);
        }

        let _ = (kind, class_field);
        let entry = entry_ip.ok_or_else(|| VmError::type_("value is not callable"))?;
        let module = owner_module.ok_or_else(|| VmError::internal("function object missing $module"))?;
        self.ensure_module_initialized(thread, module)?;
        if thread.saved_blocks_len(&self.graph) >= self.limits.max_call_depth {
            return Err(VmError::CallDepthExceeded(self.limits.max_call_depth));
        }
        let new_block = block::new_block(&self.graph, module, Some(module), bound_self, Some(callee_id), entry - 1)?;
        thread.push_frame(&self.graph, new_block)?;
        Ok(Step::Continue)
    }

    /// Calls an external `Mutex.acquire`-style bound method: swaps the
    /// receiver's `ExternalData` out of its Node for the duration of the
    /// call (native functions need `&mut ExternalData`, but the receiver's
    /// own Object mutex can't stay locked across a call that may re-enter
    /// the graph), then restores it.
    fn call_external_with_receiver(
        &mut self,
        thread: &mut Thread,
        f: &crate::external::ExternalFn,
        receiver: NodeId,
        arg: Element,
    ) -> VmResult<Element> {
        let node = self.graph.get(receiver).ok_or_else(|| VmError::internal("dangling method receiver"))?;
        let mut data = {
            let mut obj = node.object.lock();
            match std::mem::replace(&mut obj.payload, Payload::None) {
                Payload::ExternalData(d) => d,
                other => {
                    obj.payload = other;
                    crate::external::ExternalData::new(receiver)
                }
            }
        };
        let result = f(self, thread, Some(&mut data), arg);
        if let Some(node) = self.graph.get(receiver) {
            node.object.lock().payload = Payload::ExternalData(data);
        }
        result
    }

    fn is_class_object(&self, id: NodeId) -> bool {
        let Some(class_class) = self.classes.get(self.interner.intern("Class")) else { return false };
        let Some(node) = self.graph.get(id) else { return false };
        node.object.lock().ltable.get(CommonKey::Class) == Element::object(class_class)
    }

    /// `CALL` on a Class (spec §4.5 step 2): allocate an instance, invoke
    /// its constructor if present, leave `resval` holding the instance.
    fn instantiate(&mut self, thread: &mut Thread, class_id: NodeId) -> VmResult<Step> {
        let is_external = self.graph.get(class_id).map(|n| n.object.lock().is_external).unwrap_or(false);
        let constructor = class::deep_lookup(&self.graph, class_id, self.interner.intern("constructor"));
        let kind = if is_external { ObjectKind::ExternalDataCell } else { ObjectKind::Plain };
        let instance = self.graph.new_node(kind);
        self.graph.set_field(
            instance,
            self.interner.intern("class"),
            Some(CommonKey::Class),
            Element::object(class_id),
        )?;
        if is_external {
            if let Some(node) = self.graph.get(instance) {
                node.object.lock().payload = Payload::ExternalData(crate::external::ExternalData::new(instance));
            }
        }
        if let Some(Element::Object(ctor_id)) = constructor {
            let arg = thread.resval(&self.graph);
            thread.set_resval(&self.graph, arg)?;
            self.invoke_with_self(thread, ctor_id, instance)?;
        }
        thread.set_resval(&self.graph, Element::object(instance))?;
        Ok(Step::Continue)
    }

    fn invoke_with_self(&mut self, thread: &mut Thread, callable: NodeId, self_obj: NodeId) -> VmResult<()> {
        let node = self.graph.get(callable).ok_or_else(|| VmError::internal("dangling constructor"))?;
        let (external_fn, entry_ip, owner_module) = {
            let obj = node.object.lock();
            let external_fn = match &obj.payload {
                Payload::ExternalFn(f) => Some(f.clone()),
                _ => None,
            };
            let entry_ip = match obj.ltable.get(CommonKey::Ip) {
                Element::Value(v) => v.as_i64(),
                _ => None,
            };
            let owner_module = match obj.ltable.get(CommonKey::ModuleKey) {
                Element::Object(m) => Some(m),
                _ => None,
            };
            (external_fn, entry_ip, owner_module)
        };
        if let Some(f) = external_fn {
            let arg = thread.resval(&self.graph);
            let mut data = crate::external::ExternalData::new(self_obj);
            let result = f(self, thread, Some(&mut data), arg)?;
            thread.set_resval(&self.graph, result)?;
            if let Some(n) = self.graph.get(self_obj) {
                n.object.lock().payload = Payload::ExternalData(data);
            }
            return Ok(());
        }
        let entry = entry_ip.ok_or_else(|| VmError::type_("constructor is not callable"))?;
        let module = owner_module.ok_or_else(|| VmError::internal("constructor missing $module"))?;
        let saved_depth_before = thread.saved_blocks_len(&self.graph);
        let new_block = block::new_block(&self.graph, module, Some(module), Some(self_obj), Some(callable), entry - 1)?;
        thread.push_frame(&self.graph, new_block)?;
        self.run_until_frame_pops(thread, saved_depth_before)
    }

    /// `MCLL id`: pops a module object, creates a new block entering its
    /// `id` reference (spec §4.6).
    pub fn exec_mcll(&mut self, thread: &mut Thread, name: Symbol) -> VmResult<Step> {
        let callee = thread.pop(&self.graph)?;
        let Element::Object(module_node) = callee else {
            return Err(VmError::type_("MCLL target is not a Module"));
        };
        self.ensure_module_initialized(thread, module_node)?;
        let module = self.module_payload(module_node)?;
        let entry = module.resolve_ref(name)?;
        let new_block = block::new_block(&self.graph, module_node, Some(module_node), None, None, entry as i64 - 1)?;
        thread.push_frame(&self.graph, new_block)?;
        Ok(Step::Continue)
    }

    /// `RMDL id`: ensures the named module is initialised and leaves it in
    /// `resval` (spec §4.4/§4.8).
    pub fn exec_rmdl(&mut self, thread: &mut Thread, name: Symbol) -> VmResult<Step> {
        let (module_node, _) =
            *self.modules.get(&name).ok_or_else(|| VmError::UnknownModule((*self.interner.resolve(name)).to_string()))?;
        self.ensure_module_initialized(thread, module_node)?;
        thread.set_resval(&self.graph, Element::object(module_node))?;
        Ok(Step::Continue)
    }

    /// Module initialisation (spec §4.8/§5): mutually exclusive per module
    /// via a per-module lock guarding a CAS-style check-then-set on
    /// `$initialized`.
    pub fn ensure_module_initialized(&mut self, thread: &mut Thread, module_node: NodeId) -> VmResult<()> {
        let lock = {
            let mut locks = self.init_locks.lock();
            locks.entry(module_node).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock();
        let already = self
            .graph
            .get(module_node)
            .map(|n| n.object.lock().ltable.get(CommonKey::Initialized).is_truthy())
            .unwrap_or(true);
        if already {
            return Ok(());
        }
        // Flip the flag before running the body, not after: the body's own
        // top-level code may itself `CALL` a function it defines, which
        // would otherwise re-enter this same check and re-run the module
        // from scratch.
        self.graph.set_field(
            module_node,
            self.interner.intern("$initialized"),
            Some(CommonKey::Initialized),
            Element::int(1),
        )?;
        let saved_resval = thread.resval(&self.graph);
        let saved_depth = thread.saved_blocks_len(&self.graph);
        let init_block = block::new_block(&self.graph, module_node, Some(module_node), None, None, -1)?;
        thread.push_frame(&self.graph, init_block)?;
        self.run_until_frame_pops(thread, saved_depth)?;
        thread.set_resval(&self.graph, saved_resval)?;
        Ok(())
    }

    /// Drives `thread` until its saved-block stack has unwound back to
    /// `target_depth` (i.e. the synthetic frame this call pushed has been
    /// popped by its own `EXIT`/`RET`).
    fn run_until_frame_pops(&mut self, thread: &mut Thread, target_depth: usize) -> VmResult<()> {
        loop {
            if thread.saved_blocks_len(&self.graph) <= target_depth {
                return Ok(());
            }
            if !self.step(thread)? {
                return Ok(());
            }
        }
    }

    pub fn alloc_tick(&self) {
        self.maybe_reclaim();
    }

    pub fn op_count() -> usize {
        OpCode::COUNT
    }

    pub fn class(&self, name: &str) -> Option<NodeId> {
        self.classes.get(self.interner.intern(name))
    }

    pub fn inherits_from(&self, c: NodeId, p: NodeId) -> bool {
        class::inherits_from(&self.graph, c, p)
    }

    /// Begins a top-level call to `callable` with `arg` as `resval`, without
    /// running a JL function body to completion itself — that part is left
    /// to the caller's own step loop (spec §5: callers that want other
    /// `Thread.start` threads to interleave must not hold the engine lock
    /// across more than one instruction at a time; see [`crate::vm::drive`]).
    /// Used by [`crate::thread_runtime`]'s `Thread.start` and by
    /// [`crate::vm::Vm::run_file`]'s single-call convenience paths.
    pub fn start_function_call(&mut self, thread: &mut Thread, callable: NodeId, arg: Element) -> VmResult<CallStart> {
        thread.set_resval(&self.graph, arg)?;
        let node = self.graph.get(callable).ok_or_else(|| VmError::internal("dangling callable"))?;
        let (external_fn, entry_ip, owner_module) = {
            let obj = node.object.lock();
            let external_fn = match &obj.payload {
                Payload::ExternalFn(f) => Some(f.clone()),
                _ => None,
            };
            let entry_ip = match obj.ltable.get(CommonKey::Ip) {
                Element::Value(v) => v.as_i64(),
                _ => None,
            };
            let owner_module = match obj.ltable.get(CommonKey::ModuleKey) {
                Element::Object(m) => Some(m),
                _ => None,
            };
            (external_fn, entry_ip, owner_module)
        };
        if let Some(f) = external_fn {
            let arg = thread.resval(&self.graph);
            let result = f(self, thread, None, arg)?;
            thread.set_resval(&self.graph, result)?;
            return Ok(CallStart::Done);
        }
        let entry = entry_ip.ok_or_else(|| VmError::type_("value is not callable"))?;
        let module = owner_module.ok_or_else(|| VmError::internal("function object missing $module"))?;
        let new_block = block::new_block(&self.graph, module, Some(module), None, Some(callable), entry - 1)?;
        thread.push_frame(&self.graph, new_block)?;
        Ok(CallStart::Pushed)
    }
}
