//! Host entry point (spec §6): bootstraps the well-known class roster,
//! binds the thread-runtime's native classes, loads compiled modules from a
//! colon-separated search path, and drives the CLI `run <module>.jb` surface.
//!
//! Grounded on the teacher's `main.rs`/config-loading shape (environment
//! variable driven search path, fatal-on-missing-standard-module startup
//! check) generalised from Neo's node config onto JL's module loader.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::element::{Element, NodeId};
use crate::engine::{CallStart, Engine};
use crate::error::{VmError, VmResult};
use crate::intern::Interner;
use crate::limits::EngineLimits;
use crate::module::{ClassEntry, InstructionDecoder, Module};
use crate::object::{CommonKey, ObjectKind};
use crate::thread::Thread;
use crate::thread_runtime;

/// Standard modules the core expects to find at startup (spec §6); missing
/// any of these is fatal.
pub const REQUIRED_MODULES: &[&str] = &["builtin", "io", "struct", "error"];

/// Environment variable carrying the colon-separated module search path
/// (spec §6 names the mechanism, not a variable name — this pins one).
pub const MODULE_PATH_VAR: &str = "JL_MODULE_PATH";

pub struct Vm {
    pub engine: Arc<Mutex<Engine>>,
    search_path: Vec<PathBuf>,
}

impl Vm {
    /// Builds a fresh VM: allocates the shared `Engine`, wires its
    /// `self_handle` (spec §4.9's `Thread.start` needs to re-enter the same
    /// engine from a spawned OS thread), and registers the well-known class
    /// roster plus the thread-runtime's native classes.
    pub fn new(limits: EngineLimits) -> VmResult<Vm> {
        let interner = Arc::new(Interner::new());
        let engine = Arc::new(Mutex::new(Engine::new(interner, limits)));
        engine.lock().set_self_handle(Arc::downgrade(&engine));
        let search_path = std::env::var(MODULE_PATH_VAR)
            .ok()
            .map(|raw| raw.split(':').map(PathBuf::from).collect())
            .unwrap_or_default();
        let vm = Vm { engine, search_path };
        vm.bootstrap_classes()?;
        vm.bootstrap_thread_runtime()?;
        Ok(vm)
    }

    pub fn with_search_path(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_path = paths;
        self
    }

    /// Registers every name in `class::WELL_KNOWN_CLASS_NAMES` as a root
    /// Plain Object, `Object` at the root of single inheritance and every
    /// other well-known class a direct child of it (spec §3: "a class is
    /// just an Object... whose `parent_classes` lists its ancestors").
    fn bootstrap_classes(&self) -> VmResult<()> {
        let mut engine = self.engine.lock();
        let interner = engine.interner.clone();
        let mut nodes = std::collections::HashMap::new();
        for name in crate::class::WELL_KNOWN_CLASS_NAMES {
            let node = engine.graph.create_root_element(ObjectKind::Plain);
            nodes.insert(*name, node);
            engine.classes.register(interner.intern(name), node);
        }
        let object_id = nodes["Object"];
        let class_id = nodes["Class"];
        for name in crate::class::WELL_KNOWN_CLASS_NAMES {
            let node = nodes[name];
            engine.graph.set_field(node, interner.intern("class"), Some(CommonKey::Class), Element::object(class_id))?;
            if *name != "Object" {
                if let Some(n) = engine.graph.get(node) {
                    n.object.lock().parent_classes.push(object_id);
                }
            }
        }
        Ok(())
    }

    /// Registers `Thread`'s constructor/methods, plus the host-only (not in
    /// the pinned `class.h` roster) `Mutex`/`Semaphore`/`RwLock` classes and
    /// the free functions `sleep`/`num_cpus` (spec §4.9).
    fn bootstrap_thread_runtime(&self) -> VmResult<()> {
        let mut engine = self.engine.lock();
        let interner = engine.interner.clone();

        let thread_class = engine.classes.get(interner.intern("Thread")).expect("Thread registered");
        bind_external(&mut engine, thread_class, "constructor", thread_runtime::thread_new())?;
        bind_external(&mut engine, thread_class, "start", thread_runtime::thread_start())?;
        bind_external(&mut engine, thread_class, "wait", thread_runtime::thread_wait())?;
        bind_external(&mut engine, thread_class, "get", thread_runtime::thread_get())?;

        for (name, ctor, methods) in [
            ("Mutex", thread_runtime::mutex_new(), vec![("acquire", thread_runtime::mutex_acquire()), ("release", thread_runtime::mutex_release())]),
            (
                "Semaphore",
                thread_runtime::semaphore_new(),
                vec![("acquire", thread_runtime::semaphore_acquire()), ("release", thread_runtime::semaphore_release())],
            ),
            (
                "RwLock",
                thread_runtime::rwlock_new(),
                vec![
                    ("acquire_read", thread_runtime::rwlock_acquire_read()),
                    ("acquire_write", thread_runtime::rwlock_acquire_write()),
                    ("release_read", thread_runtime::rwlock_release_read()),
                    ("release_write", thread_runtime::rwlock_release_write()),
                ],
            ),
        ] {
            let class_node = engine.graph.create_root_element(ObjectKind::Plain);
            engine.classes.register(interner.intern(name), class_node);
            if let Some(object_id) = engine.classes.get(interner.intern("Object")) {
                if let Some(n) = engine.graph.get(class_node) {
                    let mut obj = n.object.lock();
                    obj.parent_classes.push(object_id);
                    obj.is_external = true;
                }
            }
            bind_external(&mut engine, class_node, "constructor", ctor)?;
            for (method_name, f) in methods {
                bind_external(&mut engine, class_node, method_name, f)?;
            }
        }

        let builtin_module = engine.graph.create_root_element(ObjectKind::Plain);
        bind_external(&mut engine, builtin_module, "sleep", thread_runtime::sleep_fn())?;
        bind_external(&mut engine, builtin_module, "num_cpus", thread_runtime::num_cpus_fn())?;
        Ok(())
    }

    /// Resolves `name` (without extension) against the search path,
    /// defaulting to `./<name>.jb` when the path is empty.
    fn resolve_module_path(&self, name: &str) -> Option<PathBuf> {
        if self.search_path.is_empty() {
            let local = PathBuf::from(format!("{name}.jb"));
            return local.exists().then_some(local);
        }
        self.search_path.iter().map(|dir| dir.join(format!("{name}.jb"))).find(|p| p.exists())
    }

    /// Loads a compiled module file from disk (spec §6's on-disk format)
    /// and registers it on the engine.
    pub fn load_module_file(&self, path: impl AsRef<Path>) -> VmResult<NodeId> {
        let bytes = std::fs::read(path.as_ref())?;
        let mut engine = self.engine.lock();
        let interner = engine.interner.clone();
        let module = decode_compiled_module(&bytes, &interner)?;
        Ok(engine.load_module(module))
    }

    /// Loads a module by name, searching [`Vm::with_search_path`]'s
    /// directories (spec §6: "module search path (colon-separated)").
    pub fn load_module_named(&self, name: &str) -> VmResult<NodeId> {
        let path = self.resolve_module_path(name).ok_or_else(|| VmError::UnknownModule(name.to_string()))?;
        self.load_module_file(path)
    }

    /// Loads the four standard modules the core requires at startup (spec
    /// §6: "Missing any is fatal at startup").
    pub fn bootstrap_standard_modules(&self) -> VmResult<()> {
        for name in REQUIRED_MODULES {
            self.load_module_named(name)?;
        }
        Ok(())
    }

    /// CLI surface (spec §6): loads `path` as the entry module, runs it to
    /// completion on a fresh thread, and returns the process exit code (`0`
    /// on `EXIT`, non-zero on an uncaught exception).
    pub fn run_file(&self, path: impl AsRef<Path>) -> i32 {
        let module_node = match self.load_module_file(path) {
            Ok(n) => n,
            Err(e) => {
                log::error!("failed to load module: {e}");
                return 1;
            }
        };
        let mut thread = match self.engine.lock().new_thread(module_node) {
            Ok(t) => t,
            Err(e) => {
                log::error!("failed to start thread: {e}");
                return 1;
            }
        };
        match drive(&self.engine, &mut thread) {
            Ok(()) => 0,
            Err(e) => {
                log::error!("uncaught error: {e}");
                1
            }
        }
    }
}

/// Drives `thread` to completion one instruction at a time, re-acquiring
/// `engine`'s lock for each [`Engine::step`] call rather than holding it for
/// the whole run (spec §5: "a thread may be preempted between any two
/// instructions" — a `Thread.start`-spawned OS thread and the caller of this
/// function compete for the same lock on every tick, so neither can run two
/// instructions back to back without giving the other a chance to acquire it).
pub fn drive(engine: &Arc<Mutex<Engine>>, thread: &mut Thread) -> VmResult<()> {
    loop {
        if !engine.lock().step(thread)? {
            return Ok(());
        }
    }
}

/// Begins a call to `callable` and, if it didn't complete synchronously
/// (an external function), drives it to completion via [`drive`]. Leaves
/// the result in `thread`'s `resval` either way.
pub fn drive_call(engine: &Arc<Mutex<Engine>>, thread: &mut Thread, callable: NodeId, arg: Element) -> VmResult<()> {
    let start = engine.lock().start_function_call(thread, callable, arg)?;
    match start {
        CallStart::Done => Ok(()),
        CallStart::Pushed => drive(engine, thread),
    }
}

fn bind_external(engine: &mut Engine, owner: NodeId, name: &str, f: crate::external::ExternalFn) -> VmResult<()> {
    let sym = engine.interner.intern(name);
    let cell = engine.graph.new_node(ObjectKind::ExternalFnCell);
    if let Some(n) = engine.graph.get(cell) {
        n.object.lock().payload = crate::object::Payload::ExternalFn(f);
    }
    engine.graph.set_field(owner, sym, None, Element::object(cell))
}

/// Decodes spec §6's on-disk module format: magic `JLBC`, version, name,
/// string pool (interned in file order — the loader and a matching
/// compiler share one global append-only intern table built up module by
/// module, so a pool index is valid as an absolute `Symbol` the instant
/// it's interned), instruction list, reference table, class table. Section
/// framing (explicit counts rather than sentinels) is this crate's own
/// choice where spec §6 leaves the byte-level layout unspecified.
fn decode_compiled_module(bytes: &[u8], interner: &Arc<Interner>) -> VmResult<Module> {
    let mut r = ByteReader::new(bytes);
    let magic = r.take(4)?;
    if magic != b"JLBC" {
        return Err(VmError::parse(0, "bad magic"));
    }
    let _version = r.u32()?;
    let name_len = r.u16()? as usize;
    let name = String::from_utf8(r.take(name_len)?.to_vec()).map_err(|_| VmError::parse(r.pos, "module name not utf8"))?;

    let pool_count = r.u32()?;
    for _ in 0..pool_count {
        let len = r.u16()? as usize;
        let s = String::from_utf8(r.take(len)?.to_vec()).map_err(|_| VmError::parse(r.pos, "pool entry not utf8"))?;
        interner.intern(&s);
    }

    let instr_count = r.u32()? as usize;
    let mut decoder = InstructionDecoder::new(&bytes[r.pos..]);
    let mut instructions = Vec::with_capacity(instr_count);
    for _ in 0..instr_count {
        instructions.push(decoder.decode_one()?);
    }
    r.pos += decoder.pos();

    let refs_count = r.u32()?;
    let mut refs = hashbrown::HashMap::new();
    for _ in 0..refs_count {
        let name_idx = r.u32()?;
        let ip = r.u32()?;
        refs.insert(crate::intern::Symbol::from_index(name_idx), ip);
    }

    let classes_count = r.u32()?;
    let mut classes = hashbrown::HashMap::new();
    for _ in 0..classes_count {
        let name_idx = r.u32()?;
        let parents_count = r.u16()?;
        let mut parents = Vec::with_capacity(parents_count as usize);
        for _ in 0..parents_count {
            parents.push(crate::intern::Symbol::from_index(r.u32()?));
        }
        let methods_count = r.u16()?;
        let mut methods = hashbrown::HashMap::new();
        for _ in 0..methods_count {
            let m_name = crate::intern::Symbol::from_index(r.u32()?);
            let m_ip = r.u32()?;
            methods.insert(m_name, m_ip);
        }
        let sym = crate::intern::Symbol::from_index(name_idx);
        classes.insert(sym, ClassEntry { name: sym, parents, methods });
    }

    let mut module = Module::new(name, interner.clone());
    module.instructions = instructions;
    module.refs = refs;
    module.classes = classes;
    Ok(module)
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> VmResult<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| VmError::parse(self.pos, "unexpected end of stream"))?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> VmResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> VmResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
