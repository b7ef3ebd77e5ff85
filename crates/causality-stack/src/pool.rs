//! Bounded frame pool

use crate::StackFrame;

/// Recycles cleared frames to avoid allocation churn at tick frequency
#[derive(Debug)]
pub struct FramePool {
    free: Vec<StackFrame>,
    max_size: usize,
    allocated: u64,
}

impl FramePool {
    pub fn new(max_size: usize) -> Self {
        FramePool {
            free: Vec::with_capacity(max_size),
            max_size,
            allocated: 0,
        }
    }

    /// Fill the pool with `count` fresh frames, up to `max_size`
    pub fn prewarm(&mut self, count: usize) {
        let target = count.min(self.max_size);
        while self.free.len() < target {
            self.free.push(StackFrame::empty());
            self.allocated += 1;
        }
    }

    /// Take a frame, allocating when the pool is dry
    pub fn checkout(&mut self) -> StackFrame {
        match self.free.pop() {
            Some(frame) => frame,
            None => {
                self.allocated += 1;
                StackFrame::empty()
            }
        }
    }

    /// Return a frame; it is cleared and retained only while below the bound
    pub fn give_back(&mut self, mut frame: StackFrame) {
        if self.free.len() >= self.max_size {
            return;
        }
        frame.clear();
        self.free.push(frame);
    }

    /// Frames currently retained
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Total frames ever allocated by this pool
    pub fn allocated(&self) -> u64 {
        self.allocated
    }
}
