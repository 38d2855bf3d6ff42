//! Engine configuration knobs (spec §5/§9's "Open question: reclamation
//! trigger frequency"). Grounds the teacher's referenced-but-missing
//! `ExecutionEngineLimits` — rebuilt here from the handful of call sites a
//! faithful engine needs: block-chain depth, try-nesting depth, operand
//! stack size, and the reclamation cadence the spec leaves to the
//! implementer.

#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    /// Max length of a thread's saved-block stack (spec §4.5 call depth).
    pub max_call_depth: usize,
    /// Max simultaneously-installed catch frames per block chain (spec
    /// §4.7).
    pub max_try_depth: usize,
    /// Max operand-stack depth before `StackOverflow` (spec §6's bound is
    /// unspecified; this is the implementer's choice per spec §9).
    pub max_stack_size: usize,
    /// Run `free_space` after this many heap allocations. Spec §9 leaves
    /// the cadence to the implementer ("requires bounded memory in
    /// long-running programs") — chosen here as a simple allocation
    /// counter rather than a timer, matching the cooperative-trigger model
    /// spec §5 describes.
    pub reclaim_every_n_allocations: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        EngineLimits {
            max_call_depth: 4_096,
            max_try_depth: 256,
            max_stack_size: 1_048_576,
            reclaim_every_n_allocations: 4_096,
        }
    }
}
