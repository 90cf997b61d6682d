//! Per-call execution context shadows.

use ethereum_types::{Address, H256};

use crate::{errors::TracerError, formula::DepByte, memory::ShadowMemory, stack::ShadowStack};

/// One call context: who is executing, which bytes it sees, and the shadows
/// of its stack and memory. Calldata and code are owned copies — each frame
/// observes the world as it was at entry.
#[derive(Debug, Clone)]
pub struct Frame {
    pub is_create: bool,
    pub address: Address,
    pub address_version: u64,
    pub code_address: Address,
    pub calldata: Vec<DepByte>,
    pub code: Vec<DepByte>,
    pub code_hash: H256,
    pub initcode_hash: H256,
    pub stack: ShadowStack,
    pub memory: ShadowMemory,
}

impl Frame {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        is_create: bool,
        address: Address,
        address_version: u64,
        code_address: Address,
        calldata: Vec<DepByte>,
        code: Vec<DepByte>,
        code_hash: H256,
        initcode_hash: H256,
    ) -> Self {
        Self {
            is_create,
            address,
            address_version,
            code_address,
            calldata,
            code,
            code_hash,
            initcode_hash,
            stack: ShadowStack::new(),
            memory: ShadowMemory::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<Frame, TracerError> {
        self.frames.pop().ok_or(TracerError::MissingFrame)
    }

    /// Drop every frame above `depth` — the revert path.
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    pub fn current(&self) -> Result<&Frame, TracerError> {
        self.frames.last().ok_or(TracerError::MissingFrame)
    }

    pub fn current_mut(&mut self) -> Result<&mut Frame, TracerError> {
        self.frames.last_mut().ok_or(TracerError::MissingFrame)
    }
}
