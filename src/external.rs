//! External-function bridge (spec §4.8).
//!
//! A native callable is `fn(engine, thread, external_data, argument) ->
//! Element`. Shaped after `JL/external/strings.c` and `JL/external/file.c`:
//! those two files show the concrete calling convention (one packed
//! argument `Element`, usually a Tuple when the native function is
//! variadic, plus a per-instance `ExternalData` map for host state such as
//! an open `File`'s real file descriptor or a `Mutex`'s real
//! `parking_lot::Mutex`).

use std::sync::Arc;

use hashbrown::HashMap;

use crate::element::{Element, NodeId};
use crate::engine::Engine;
use crate::error::VmResult;
use crate::intern::Symbol;
use crate::thread::Thread;

/// Opaque host-side state attached to one instance of an external class
/// (spec §4.8: "`ExternalData` carrying the new Object and a name→opaque
/// mapping of host state"). `Any + Send + Sync` lets each host type
/// (`File`'s fd, `Mutex`'s `parking_lot::Mutex`, a `Thread`'s `JoinHandle`)
/// stash whatever it needs without the core knowing its shape.
pub struct ExternalData {
    pub owner: NodeId,
    slots: HashMap<Symbol, Box<dyn std::any::Any + Send + Sync>>,
}

impl ExternalData {
    pub fn new(owner: NodeId) -> Self {
        ExternalData { owner, slots: HashMap::new() }
    }

    pub fn insert<T: std::any::Any + Send + Sync>(&mut self, key: Symbol, value: T) {
        self.slots.insert(key, Box::new(value));
    }

    pub fn get<T: std::any::Any + Send + Sync>(&self, key: Symbol) -> Option<&T> {
        self.slots.get(&key).and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_mut<T: std::any::Any + Send + Sync>(&mut self, key: Symbol) -> Option<&mut T> {
        self.slots.get_mut(&key).and_then(|b| b.downcast_mut::<T>())
    }
}

impl std::fmt::Debug for ExternalData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalData").field("owner", &self.owner).field("slots", &self.slots.len()).finish()
    }
}

/// A registered native callable (spec §4.8). Boxed behind `Arc` so the same
/// function object can be shared by every instance of a class that defines
/// it (registration attaches it once, as a field on the class/module
/// Object).
pub type ExternalFn = Arc<
    dyn Fn(&mut Engine, &mut Thread, Option<&mut ExternalData>, Element) -> VmResult<Element> + Send + Sync,
>;

/// Wraps a plain closure into an [`ExternalFn`] — the registration-time
/// convenience the `builtin`/`io`/`struct`/`error` standard modules (out of
/// core scope) use to attach native bodies to classes.
pub fn native_fn<F>(f: F) -> ExternalFn
where
    F: Fn(&mut Engine, &mut Thread, Option<&mut ExternalData>, Element) -> VmResult<Element> + Send + Sync + 'static,
{
    Arc::new(f)
}
