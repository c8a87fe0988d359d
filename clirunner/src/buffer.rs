//! Growable capture buffer for child output.

use std::borrow::Cow;
use std::collections::TryReserveError;

/// Capacity allocated on the first non-empty append.
pub const MIN_CAPACITY: usize = 4096;

/// Append-only byte buffer that doubles its capacity as it fills.
///
/// The storage always keeps one NUL byte past the logical end, so the
/// captured output can be handed to C-string consumers without a copy.
/// Capacity never shrinks until [`OutputBuffer::release`].
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    // Logical bytes followed by a single NUL; empty until the first append.
    data: Vec<u8>,
    min_capacity: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::with_min_capacity(MIN_CAPACITY)
    }

    /// Create a buffer whose first allocation is `min_capacity` bytes.
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            min_capacity: min_capacity.max(1),
        }
    }

    /// Append `bytes`, growing geometrically when needed.
    ///
    /// On allocation failure the buffer is left exactly as it was.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), TryReserveError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let need = self.len().saturating_add(bytes.len()).saturating_add(1);
        let cap = self.data.capacity();
        if need > cap {
            let mut new_cap = if cap == 0 { self.min_capacity } else { cap };
            while new_cap < need {
                new_cap = new_cap.saturating_mul(2);
            }
            self.data.try_reserve_exact(new_cap - self.data.len())?;
        }

        self.data.pop();
        self.data.extend_from_slice(bytes);
        self.data.push(0);
        Ok(())
    }

    /// Free the storage. Calling this again is a no-op.
    pub fn release(&mut self) {
        self.data = Vec::new();
    }

    pub fn len(&self) -> usize {
        self.data.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.get(..self.len()).unwrap_or_default()
    }

    /// The captured bytes followed by the terminating NUL.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        if self.data.is_empty() {
            b"\0"
        } else {
            &self.data
        }
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Take ownership of the captured bytes (without the NUL).
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.pop();
        self.data
    }
}

impl AsRef<[u8]> for OutputBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
