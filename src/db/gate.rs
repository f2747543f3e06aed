//! Reader/writer admission gate for the store façade.
//!
//! One mutex guards two counters — `readers` and a single-writer flag —
//! with a condition variable per side:
//!
//! - A **writer** waits until no reader and no other writer is inside,
//!   marks itself active, runs its mutation, then clears the flag and wakes
//!   both sides. Writers are therefore serialized, and never overlap a
//!   reader.
//! - A **reader** waits until no writer is active, *then* increments the
//!   reader count; on exit it decrements and wakes waiting writers once
//!   the count reaches zero. Checking the writer flag before touching the
//!   count means a late-arriving reader can never strand a writer that
//!   already owns the section.
//!
//! The scheme is writer-preferring only in the sense that admitted readers
//! block writers and vice versa; both sides run to completion, there is no
//! cancellation. Admission is exposed as RAII passes so an early return or
//! panic still releases the slot.

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct GateState {
    /// Number of readers currently inside.
    readers: usize,

    /// Whether the single writer slot is taken.
    writer_active: bool,
}

/// Admission control separating concurrent readers from serialized
/// writers. Owned by the `Db` object; there is no process-global state.
#[derive(Default)]
pub struct AccessGate {
    state: Mutex<GateState>,

    /// Readers wait here while a writer is inside.
    readers_cv: Condvar,

    /// Writers wait here while readers (or another writer) are inside.
    writers_cv: Condvar,
}

impl AccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no writer is active, then enter as a reader.
    pub fn read(&self) -> ReadPass<'_> {
        let mut state = self.state.lock();
        while state.writer_active {
            self.readers_cv.wait(&mut state);
        }
        state.readers += 1;
        ReadPass { gate: self }
    }

    /// Block until the section is empty, then enter as the writer.
    pub fn write(&self) -> WritePass<'_> {
        let mut state = self.state.lock();
        while state.readers > 0 || state.writer_active {
            self.writers_cv.wait(&mut state);
        }
        state.writer_active = true;
        WritePass { gate: self }
    }
}

/// RAII reader admission; dropping it leaves the section.
pub struct ReadPass<'a> {
    gate: &'a AccessGate,
}

impl Drop for ReadPass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.gate.writers_cv.notify_all();
        }
    }
}

/// RAII writer admission; dropping it leaves the section.
pub struct WritePass<'a> {
    gate: &'a AccessGate,
}

impl Drop for WritePass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.writer_active = false;
        self.gate.readers_cv.notify_all();
        self.gate.writers_cv.notify_all();
    }
}
