//! Concurrency properties (spec §8, §5): the graph is driven by real OS
//! threads racing on a shared `MemoryGraph`, not a single-threaded harness
//! simulating interleaving.

use std::sync::Arc;
use std::thread;

use jlvm::element::Element;
use jlvm::intern::Symbol;
use jlvm::memory_graph::{IdMode, MemoryGraph};
use jlvm::object::ObjectKind;

/// N threads each doing M `Array.push` onto a shared array: the final
/// length is `N*M` and the multiset of elements is the union of every
/// thread's inputs — no push is lost or double-counted under contention.
#[test]
fn concurrent_array_pushes_land_every_element() {
    const THREADS: i64 = 8;
    const PER_THREAD: i64 = 200;

    let graph = Arc::new(MemoryGraph::new(IdMode::Sequential));
    let array = graph.create_root_element(ObjectKind::Array);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let graph = graph.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    graph.array_push(array, Element::int(t * PER_THREAD + i)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let node = graph.get(array).unwrap();
    let values: Vec<i64> = {
        let obj = node.object.lock();
        obj.as_array().unwrap().iter().map(|e| e.as_value().unwrap().as_i64().unwrap()).collect()
    };
    assert_eq!(values.len(), (THREADS * PER_THREAD) as usize);
    let mut expected: Vec<i64> = (0..THREADS * PER_THREAD).collect();
    let mut actual = values.clone();
    expected.sort_unstable();
    actual.sort_unstable();
    assert_eq!(actual, expected);
}

/// `free_space` running concurrently with mutators never deletes a Node
/// reachable from roots: a background thread hammers `free_space` in a
/// loop while the foreground thread repeatedly attaches a fresh child to a
/// root via `set_field` (which edges it in before `free_space` can observe
/// it) and immediately confirms it's still there.
#[test]
fn free_space_never_collects_a_reachable_node() {
    const ITERATIONS: usize = 500;

    let graph = Arc::new(MemoryGraph::new(IdMode::Sequential));
    let root = graph.create_root_element(ObjectKind::Plain);

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let sweeper = {
        let graph = graph.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                graph.free_space();
            }
        })
    };

    for i in 0..ITERATIONS {
        let child = graph.new_node(ObjectKind::Plain);
        let name = Symbol::from_index(i as u32);
        graph.set_field(root, name, None, Element::object(child)).unwrap();
        assert!(graph.get(child).is_some(), "child {i} vanished while still reachable from a root");
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    sweeper.join().unwrap();
}
