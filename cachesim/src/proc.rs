use std::cell::Cell;

/// Read-only view of the processor state the cache model is allowed to see.
///
/// The Hawkeye policy indexes its predictor by the program counter of the
/// instruction responsible for each access, so caches hold a shared handle to
/// whatever implements this trait. Nothing in the model ever writes through
/// it.
pub trait PcSource {
    fn pc(&self) -> u64;
}

/// Minimal stand-in for a processor: a single PC register the replay driver
/// updates before dispatching each trace record.
#[derive(Debug, Default)]
pub struct ProcState {
    pc: Cell<u64>,
}

impl ProcState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pc(&self, pc: u64) {
        self.pc.set(pc);
    }
}

impl PcSource for ProcState {
    fn pc(&self) -> u64 {
        self.pc.get()
    }
}
