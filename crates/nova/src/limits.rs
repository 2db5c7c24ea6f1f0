use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use crate::error::{ErrorKind, RunError, RunResult};

/// Recommended maximum recursion depth if not otherwise specified.
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 1000;

/// Configuration for execution limits and reflective-access policy.
///
/// A limit of 0 disables the corresponding check. Use
/// `SecurityPolicy::default()` for the default posture (recursion capped,
/// everything else unlimited), or build custom limits with the chained
/// setters.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    /// Maximum function call depth. 0 disables the check.
    pub max_recursion_depth: u32,
    /// Maximum total loop back-edges per frame chain. 0 disables the check.
    pub max_loop_iterations: u64,
    /// Maximum wall-clock execution time in milliseconds. 0 disables the check.
    pub max_execution_ms: u64,
    /// Maximum concurrently active async tasks. 0 disables the check.
    pub max_async_tasks: u32,
    /// Whether reflective access may be elevated on non-public host members.
    pub allow_set_accessible: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_loop_iterations: 0,
            max_execution_ms: 0,
            max_async_tasks: 0,
            allow_set_accessible: false,
        }
    }
}

impl SecurityPolicy {
    /// A policy with every check disabled.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_recursion_depth: 0,
            max_loop_iterations: 0,
            max_execution_ms: 0,
            max_async_tasks: 0,
            allow_set_accessible: false,
        }
    }

    /// Sets the maximum recursion depth.
    #[must_use]
    pub fn max_recursion_depth(mut self, limit: u32) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    /// Sets the maximum number of loop back-edges.
    #[must_use]
    pub fn max_loop_iterations(mut self, limit: u64) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    /// Sets the maximum wall-clock execution time in milliseconds.
    #[must_use]
    pub fn max_execution_ms(mut self, limit: u64) -> Self {
        self.max_execution_ms = limit;
        self
    }

    /// Sets the maximum number of concurrently active async tasks.
    #[must_use]
    pub fn max_async_tasks(mut self, limit: u32) -> Self {
        self.max_async_tasks = limit;
        self
    }

    /// Allows reflective access elevation on non-public host members.
    #[must_use]
    pub fn allow_set_accessible(mut self, allow: bool) -> Self {
        self.allow_set_accessible = allow;
        self
    }
}

/// Per-interpreter enforcement state for the active security policy.
///
/// Limits are measured at frame entries and loop back-edges only; a pure
/// straight-line program cannot overrun them. Each worker's child interpreter
/// carries its own guard state, so limits apply per frame chain.
#[derive(Debug)]
pub(crate) struct Guards {
    pub policy: SecurityPolicy,
    /// When this frame chain started executing.
    start: Instant,
    /// Total loop back-edges taken.
    loop_count: u64,
    /// Current call depth.
    depth: u32,
}

impl Guards {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            policy,
            start: Instant::now(),
            loop_count: 0,
            depth: 0,
        }
    }

    /// Restarts the wall-clock and loop counters for a fresh top-level run.
    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.loop_count = 0;
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Called before pushing a call frame; constructors (`<init>`) skip this.
    pub fn enter_frame(&mut self) -> RunResult<()> {
        let limit = self.policy.max_recursion_depth;
        if limit != 0 && self.depth >= limit {
            return Err(RunError::raise(
                ErrorKind::RecursionLimit,
                format!("maximum recursion depth exceeded: {limit}"),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    /// Called when a frame is popped, including during unwinding.
    pub fn exit_frame(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Increments call depth without the limit check, for constructor frames.
    pub fn enter_frame_unchecked(&mut self) {
        self.depth += 1;
    }

    /// Called on every loop back-edge: iteration budget, wall clock, and
    /// cancellation, in that order.
    pub fn on_back_edge(&mut self, cancel: Option<&AtomicBool>) -> RunResult<()> {
        self.loop_count += 1;
        let limit = self.policy.max_loop_iterations;
        if limit != 0 && self.loop_count > limit {
            return Err(RunError::raise(
                ErrorKind::ResourceLimit,
                format!("loop iteration limit exceeded: {limit}"),
            ));
        }
        self.check_clock()?;
        if let Some(flag) = cancel
            && flag.load(Ordering::Relaxed)
        {
            return Err(RunError::raise(ErrorKind::Interrupted, "task cancelled"));
        }
        Ok(())
    }

    /// Wall-clock check, also run at host-call boundaries.
    pub fn check_clock(&self) -> RunResult<()> {
        let limit_ms = self.policy.max_execution_ms;
        if limit_ms != 0 {
            let elapsed = self.start.elapsed().as_millis();
            if elapsed > u128::from(limit_ms) {
                return Err(RunError::raise(
                    ErrorKind::ResourceLimit,
                    format!("execution time limit exceeded: {elapsed}ms > {limit_ms}ms"),
                ));
            }
        }
        Ok(())
    }
}
