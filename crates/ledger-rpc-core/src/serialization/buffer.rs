use std::sync::Mutex;

/// Buffers larger than this are released instead of returned to the pool
/// so one oversized payload does not pin memory.
const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// A small free-list of scratch buffers reused across serializations.
///
/// A size of zero disables pooling; `take` then always allocates.
pub(super) struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
}

impl BufferPool {
    pub(super) fn new(max_buffers: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
        }
    }

    /// Hand out an empty buffer with at least `capacity` bytes reserved.
    /// Returns `None` if the pool lock is poisoned.
    pub(super) fn take(&self, capacity: usize) -> Option<Vec<u8>> {
        let mut buf = if self.max_buffers == 0 {
            Vec::new()
        } else {
            self.buffers.lock().ok()?.pop().unwrap_or_default()
        };
        buf.clear();
        buf.reserve(capacity);
        Some(buf)
    }

    pub(super) fn give(&self, mut buf: Vec<u8>) {
        if self.max_buffers == 0 || buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        if let Ok(mut buffers) = self.buffers.lock() {
            if buffers.len() < self.max_buffers {
                buffers.push(buf);
            }
        }
    }

    #[cfg(test)]
    pub(super) fn pooled(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }
}
