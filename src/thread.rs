//! Per-thread execution state (spec §4.5/§4.9): operand stack, saved-block
//! stack, and current block, each living as graph Objects on a `Thread`
//! root so every intermediate value participating in an in-flight
//! expression stays reachable during reclamation.
//!
//! Thread identity is a process-wide monotonic counter (spec §4.9).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::block;
use crate::element::{Element, NodeId};
use crate::error::{VmError, VmResult};
use crate::memory_graph::MemoryGraph;
use crate::object::ObjectKind;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId {
    pub fn next() -> ThreadId {
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A thread's execution state. `resval` is thread-local by construction: it
/// lives in the `root_block`'s `$resval` ltable slot, never on the shared
/// VM root (spec §5's ordering-guarantees note).
pub struct Thread {
    pub id: ThreadId,
    /// The `Thread` host Object itself, pinned as a graph root (spec §4.9).
    pub thread_obj: NodeId,
    /// An `Array` Object: the operand stack (spec §4.5).
    pub operand_stack: NodeId,
    /// An `Array` Object of prior Block references: the saved-block stack.
    pub saved_blocks: NodeId,
    /// The first Block created for this thread — `$resval` always targets
    /// this node regardless of how deep the current call chain is.
    pub root_block: NodeId,
    pub current_block: NodeId,
}

impl Thread {
    /// Spawns the graph-side state for a new thread: its Thread Object, its
    /// operand/saved-block arrays, and its root Block.
    pub fn new(graph: &MemoryGraph, module: NodeId, entry_ip: i64) -> VmResult<Thread> {
        let thread_obj = graph.create_root_element(ObjectKind::Plain);
        let operand_stack = graph.new_node(ObjectKind::Array);
        let saved_blocks = graph.new_node(ObjectKind::Array);
        graph.inc_edge(thread_obj, operand_stack);
        graph.inc_edge(thread_obj, saved_blocks);
        let root_block = block::new_block(graph, module, None, None, None, entry_ip)?;
        graph.inc_edge(thread_obj, root_block);
        Ok(Thread {
            id: ThreadId::next(),
            thread_obj,
            operand_stack,
            saved_blocks,
            root_block,
            current_block: root_block,
        })
    }

    pub fn push(&self, graph: &MemoryGraph, value: Element) -> VmResult<()> {
        graph.array_push(self.operand_stack, value)
    }

    pub fn pop(&self, graph: &MemoryGraph) -> VmResult<Element> {
        graph.array_pop(self.operand_stack).map_err(|_| VmError::StackUnderflow)
    }

    pub fn peek(&self, graph: &MemoryGraph) -> VmResult<Element> {
        let len = self.stack_len(graph);
        if len == 0 {
            return Err(VmError::StackUnderflow);
        }
        graph.array_get(self.operand_stack, len - 1)
    }

    pub fn stack_len(&self, graph: &MemoryGraph) -> usize {
        graph.get(self.operand_stack).map(|n| n.object.lock().as_array().map(|v| v.len()).unwrap_or(0)).unwrap_or(0)
    }

    /// Truncates the operand stack back to `size`, dropping edges for every
    /// discarded element (spec §4.5 `RET`: "truncate operand stack back to
    /// the saved size").
    pub fn truncate_stack(&self, graph: &MemoryGraph, size: usize) -> VmResult<()> {
        while self.stack_len(graph) > size {
            self.pop(graph)?;
        }
        Ok(())
    }

    pub fn resval(&self, graph: &MemoryGraph) -> Element {
        block::resval(graph, self.root_block)
    }

    pub fn set_resval(&self, graph: &MemoryGraph, value: Element) -> VmResult<()> {
        block::set_resval(graph, self.root_block, value)
    }

    /// `CALL`'s frame-push step: saves the current block (and the operand
    /// stack depth at call time) onto the saved-block stack, then makes
    /// `new_block` current.
    pub fn push_frame(&mut self, graph: &MemoryGraph, new_block: NodeId) -> VmResult<()> {
        block::set_stack_size(graph, self.current_block, self.stack_len(graph))?;
        graph.array_push(self.saved_blocks, Element::object(self.current_block))?;
        self.current_block = new_block;
        Ok(())
    }

    /// `RET`'s frame-pop step: restores the caller block as current and
    /// truncates the operand stack to its saved depth.
    pub fn pop_frame(&mut self, graph: &MemoryGraph) -> VmResult<bool> {
        if self.saved_blocks_len(graph) == 0 {
            return Ok(false);
        }
        let saved = graph.array_pop(self.saved_blocks)?;
        let Element::Object(caller_block) = saved else {
            return Err(VmError::internal("saved-block stack held a non-Object entry"));
        };
        let size = block::stack_size(graph, caller_block);
        self.current_block = caller_block;
        self.truncate_stack(graph, size)?;
        Ok(true)
    }

    pub fn saved_blocks_len(&self, graph: &MemoryGraph) -> usize {
        graph
            .get(self.saved_blocks)
            .map(|n| n.object.lock().as_array().map(|v| v.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}
