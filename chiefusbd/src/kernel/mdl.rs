use std::sync::Arc;

use parking_lot::Mutex;

/// Descriptor for a locked direct-I/O buffer. Requests reference the caller's
/// pages rather than a copy, so clones share the same backing storage.
#[derive(Clone, Debug)]
pub struct Mdl {
    pages: Arc<Mutex<Vec<u8>>>,
}

impl Mdl {
    pub fn new(len: usize) -> Self {
        Self {
            pages: Arc::new(Mutex::new(vec![0; len])),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(data)),
        }
    }

    pub fn byte_count(&self) -> usize {
        self.pages.lock().len()
    }

    /// Copy `src` into the head of the buffer, returning the number of bytes
    /// written (the transfer length for a partial read).
    pub fn fill(&self, src: &[u8]) -> usize {
        let mut pages = self.pages.lock();
        let len = src.len().min(pages.len());
        pages[..len].copy_from_slice(&src[..len]);
        len
    }

    pub fn contents(&self) -> Vec<u8> {
        self.pages.lock().clone()
    }
}
