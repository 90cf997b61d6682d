//! Shadow of EVM memory: a growable byte-addressed array of `DepByte`.
//!
//! Growth always rounds up to a 32-byte boundary and fills with the
//! implicit-zero byte, mirroring the EVM's zero-initialized word-granular
//! expansion.

use crate::{formula::DepByte, stack::Word};

#[derive(Debug, Clone, Default)]
pub struct ShadowMemory {
    data: Vec<DepByte>,
}

impl ShadowMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[DepByte] {
        &self.data
    }

    fn extend_to(&mut self, size: usize) {
        let size = size.next_multiple_of(32);
        if size > self.data.len() {
            self.data.resize(size, DepByte::init_zero());
        }
    }

    /// MSTORE8.
    pub fn set(&mut self, offset: usize, value: DepByte) {
        self.extend_to(offset + 1);
        self.data[offset] = value;
    }

    /// MSTORE.
    pub fn set_word(&mut self, offset: usize, value: &Word) {
        self.extend_to(offset + value.len());
        self.data[offset..offset + value.len()].copy_from_slice(value);
    }

    /// Region store; a zero-length write does not expand memory.
    pub fn set_n(&mut self, offset: usize, value: &[DepByte]) {
        if value.is_empty() {
            return;
        }
        self.extend_to(offset + value.len());
        self.data[offset..offset + value.len()].copy_from_slice(value);
    }

    /// Region load. Loads extend memory first, so reads past the current end
    /// observe implicit zeroes — same as the EVM.
    pub fn load(&mut self, offset: usize, size: usize) -> Vec<DepByte> {
        if size == 0 {
            return Vec::new();
        }
        self.extend_to(offset + size);
        self.data[offset..offset + size].to_vec()
    }
}
