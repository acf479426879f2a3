use log::warn;

use crate::task::CpuState;

/// A handler for one interrupt vector, called with the captured frame.
pub type TrapHandler = fn(&mut CpuState);

const VECTOR_COUNT: usize = 256;

/// Handlers registered by vector number, 0–255.
pub struct Dispatch {
    handlers: [Option<TrapHandler>; VECTOR_COUNT],
}

impl Dispatch {
    pub const fn new() -> Self {
        Self {
            handlers: [None; VECTOR_COUNT],
        }
    }

    /// Install `handler` for `vector`, replacing any previous one.
    pub fn register(&mut self, vector: u8, handler: TrapHandler) {
        self.handlers[vector as usize] = Some(handler);
    }

    pub fn unregister(&mut self, vector: u8) {
        self.handlers[vector as usize] = None;
    }

    /// Route `frame` to the handler for its vector. Returns whether one was
    /// registered.
    pub fn handle(&self, frame: &mut CpuState) -> bool {
        match self.handlers[(frame.vector & 0xff) as usize] {
            Some(handler) => {
                handler(frame);
                true
            }
            None => {
                warn!("no handler for vector {}", frame.vector);
                false
            }
        }
    }
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::new()
    }
}
