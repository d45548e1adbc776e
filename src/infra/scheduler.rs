//! Interval-driven task scheduling without threads. The host advances the
//! scheduler with elapsed milliseconds; due tasks run on that stack. A task
//! reports success or failure, and repeated failure can disable it.
//!
//! [`ProcessingFlags`] complements the scheduler with one-shot event flags
//! for work that must run once on the next processing pass rather than on a
//! cadence.
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

/// Work callback: returns `true` on success, `false` to request a retry.
pub type TaskWork = Box<dyn FnMut() -> bool>;

/// One periodic task slot.
pub struct PeriodicTask {
    pub name: String,
    pub interval_ms: u32,
    pub elapsed_ms: u32,
    pub enabled: bool,
    /// 0 means retry forever.
    pub max_retries: u32,
    pub retry_count: u32,
    work: TaskWork,
}

impl PeriodicTask {
    /// Whether the task should run on the next update pass.
    pub fn due(&self) -> bool {
        self.enabled && self.elapsed_ms >= self.interval_ms
    }
}

/// Ordered collection of periodic tasks driven by `update(dt_ms)`.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<PeriodicTask>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Register a task that never exhausts retries.
    pub fn add<F: FnMut() -> bool + 'static>(
        &mut self,
        name: &str,
        interval_ms: u32,
        work: F,
    ) -> usize {
        self.add_with_retries(name, interval_ms, work, 0)
    }

    /// Register a task that disables itself after `max_retries` consecutive
    /// failures (0 = unlimited).
    pub fn add_with_retries<F: FnMut() -> bool + 'static>(
        &mut self,
        name: &str,
        interval_ms: u32,
        work: F,
        max_retries: u32,
    ) -> usize {
        self.tasks.push(PeriodicTask {
            name: String::from(name),
            interval_ms,
            elapsed_ms: 0,
            enabled: true,
            max_retries,
            retry_count: 0,
            work: Box::new(work),
        });
        self.tasks.len() - 1
    }

    /// Advance every enabled task and run the ones that come due.
    pub fn update(&mut self, dt_ms: u32) {
        for task in self.tasks.iter_mut() {
            if !task.enabled {
                continue;
            }
            task.elapsed_ms = task.elapsed_ms.saturating_add(dt_ms);
            if task.elapsed_ms < task.interval_ms {
                continue;
            }
            task.elapsed_ms = 0;
            if (task.work)() {
                task.retry_count = 0;
            } else {
                task.retry_count += 1;
                if task.max_retries != 0 && task.retry_count >= task.max_retries {
                    log::debug!(
                        "scheduler: task '{}' disabled after {} failed attempts",
                        task.name,
                        task.retry_count
                    );
                    task.enabled = false;
                }
            }
        }
    }

    /// Force the task to fire on the next update regardless of its timer.
    pub fn trigger(&mut self, index: usize) {
        if let Some(task) = self.tasks.get_mut(index) {
            task.elapsed_ms = task.interval_ms;
        }
    }

    /// Re-enable a task; its elapsed time restarts from zero.
    pub fn enable(&mut self, index: usize) {
        if let Some(task) = self.tasks.get_mut(index) {
            task.enabled = true;
            task.elapsed_ms = 0;
            task.retry_count = 0;
        }
    }

    pub fn disable(&mut self, index: usize) {
        if let Some(task) = self.tasks.get_mut(index) {
            task.enabled = false;
        }
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.tasks.get(index).is_some_and(|task| task.enabled)
    }

    pub fn count(&self) -> usize {
        self.tasks.len()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

/// Highest usable flag index (a 32-bit mask).
const MAX_FLAGS: u8 = 32;

/// One-shot event flags with an optional handler per flag.
///
/// `set` marks a flag pending from anywhere in the protocol stack; the next
/// `process()` call runs the registered handlers for every pending flag and
/// clears the mask. A flag without a handler is still cleared.
#[derive(Default)]
pub struct ProcessingFlags {
    pending: u32,
    handlers: [Option<Box<dyn FnMut()>>; MAX_FLAGS as usize],
}

impl ProcessingFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `flag`.
    pub fn register_flag<F: FnMut() + 'static>(&mut self, flag: u8, handler: F) {
        if flag < MAX_FLAGS {
            self.handlers[flag as usize] = Some(Box::new(handler));
        }
    }

    /// Mark `flag` pending. Flags at or beyond the mask width are ignored.
    pub fn set(&mut self, flag: u8) {
        if flag < MAX_FLAGS {
            self.pending |= 1 << flag;
        }
    }

    pub fn clear(&mut self, flag: u8) {
        if flag < MAX_FLAGS {
            self.pending &= !(1 << flag);
        }
    }

    pub fn is_set(&self, flag: u8) -> bool {
        flag < MAX_FLAGS && self.pending & (1 << flag) != 0
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn any_pending(&self) -> bool {
        self.pending != 0
    }

    /// Run the handler of every pending flag and clear the mask.
    pub fn process(&mut self) {
        let pending = self.pending;
        self.pending = 0;
        for flag in 0..MAX_FLAGS {
            if pending & (1 << flag) == 0 {
                continue;
            }
            if let Some(handler) = self.handlers[flag as usize].as_mut() {
                handler();
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
