//! C ABI for driving the tracer from a non-Rust host.
//!
//! Everything is keyed on an explicit `*mut ProvexTracer` handle — there is
//! no process-wide state. The host creates a tracer from a JSON config,
//! optionally registers state-reader callbacks (required for CREATE
//! address derivation and pre-existing code shadows), then forwards its
//! callback stream. All functions return 0 on success and a negative code
//! on failure; failures are also logged.

use std::{
    ffi::{CStr, c_char},
    rc::Rc,
    slice,
};

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use tracing::error;

use provex_tracer::{
    DepHandler, StateReader, TracerConfig, TxStart, output::OutputWriter,
};

pub const PROVEX_OK: i32 = 0;
pub const PROVEX_ERR_NULL: i32 = -1;
pub const PROVEX_ERR_CONFIG: i32 = -2;
pub const PROVEX_ERR_TRACE: i32 = -3;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProvexAddress {
    pub data: [u8; 20],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProvexHash {
    pub data: [u8; 32],
}

/// Borrowed byte buffer. `data` may be null when `len` is zero.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProvexBytes {
    pub data: *const u8,
    pub len: usize,
}

/// Host stack snapshot, bottom to top, one 32-byte big-endian word each.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProvexStack {
    pub words: *const ProvexHash,
    pub len: usize,
}

pub type ProvexGetNonceFn = unsafe extern "C" fn(ProvexAddress) -> u64;
pub type ProvexGetCodeFn = unsafe extern "C" fn(ProvexAddress) -> ProvexBytes;
pub type ProvexLogFn = unsafe extern "C" fn(*const c_char);

struct CallbackReader {
    get_nonce: Option<ProvexGetNonceFn>,
    get_code: Option<ProvexGetCodeFn>,
}

impl StateReader for CallbackReader {
    fn get_nonce(&self, addr: Address) -> u64 {
        match self.get_nonce {
            Some(f) => unsafe { f(pack_address(addr)) },
            None => 0,
        }
    }

    fn get_code(&self, addr: Address) -> Bytes {
        match self.get_code {
            Some(f) => {
                let raw = unsafe { f(pack_address(addr)) };
                unpack_bytes(&raw)
            }
            None => Bytes::new(),
        }
    }
}

/// Opaque tracer handle.
pub struct ProvexTracer {
    handler: DepHandler,
    get_nonce: Option<ProvexGetNonceFn>,
    get_code: Option<ProvexGetCodeFn>,
}

fn pack_address(addr: Address) -> ProvexAddress {
    ProvexAddress { data: addr.0 }
}

fn unpack_address(addr: &ProvexAddress) -> Address {
    Address::from(addr.data)
}

fn unpack_hash(hash: &ProvexHash) -> H256 {
    H256(hash.data)
}

fn unpack_bytes(bytes: &ProvexBytes) -> Bytes {
    if bytes.data.is_null() || bytes.len == 0 {
        return Bytes::new();
    }
    let raw = unsafe { slice::from_raw_parts(bytes.data, bytes.len) };
    Bytes::copy_from_slice(raw)
}

fn unpack_stack(stack: &ProvexStack) -> Vec<U256> {
    if stack.words.is_null() || stack.len == 0 {
        return Vec::new();
    }
    let raw = unsafe { slice::from_raw_parts(stack.words, stack.len) };
    raw.iter()
        .map(|word| U256::from_big_endian(&word.data))
        .collect()
}

/// Create a tracer from a JSON config. The optional log callback receives
/// every output line; without it output goes where the config says.
/// Returns null on failure.
///
/// # Safety
/// `config_json` must be a valid NUL-terminated string; `log` must be a
/// valid function pointer or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_new(
    config_json: *const c_char,
    log: Option<ProvexLogFn>,
) -> *mut ProvexTracer {
    if config_json.is_null() {
        return std::ptr::null_mut();
    }
    let raw = unsafe { CStr::from_ptr(config_json) };
    let Ok(raw) = raw.to_str() else {
        return std::ptr::null_mut();
    };
    let config = match TracerConfig::from_json(raw) {
        Ok(config) => config,
        Err(e) => {
            error!("provex_new: {e}");
            return std::ptr::null_mut();
        }
    };

    let handler = match log {
        Some(callback) => {
            let writer = OutputWriter::callback(move |line: &str| {
                let mut owned = line.as_bytes().to_vec();
                owned.push(0);
                // The callback must not retain the pointer past the call.
                unsafe { callback(owned.as_ptr().cast()) };
            });
            DepHandler::with_writer(config, Rc::new(writer))
        }
        None => DepHandler::new(config),
    };

    match handler {
        Ok(handler) => Box::into_raw(Box::new(ProvexTracer {
            handler,
            get_nonce: None,
            get_code: None,
        })),
        Err(e) => {
            error!("provex_new: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Destroy a tracer created with [`provex_new`].
///
/// # Safety
/// `tracer` must be a pointer returned by `provex_new`, not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_free(tracer: *mut ProvexTracer) {
    if !tracer.is_null() {
        drop(unsafe { Box::from_raw(tracer) });
    }
}

/// # Safety
/// `tracer` must be a valid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_register_get_nonce(
    tracer: *mut ProvexTracer,
    f: Option<ProvexGetNonceFn>,
) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    tracer.get_nonce = f;
    PROVEX_OK
}

/// # Safety
/// `tracer` must be a valid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_register_get_code(
    tracer: *mut ProvexTracer,
    f: Option<ProvexGetCodeFn>,
) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    tracer.get_code = f;
    PROVEX_OK
}

fn trace_result(result: Result<(), provex_tracer::TracerError>) -> i32 {
    match result {
        Ok(()) => PROVEX_OK,
        Err(e) => {
            error!("provex: {e}");
            PROVEX_ERR_TRACE
        }
    }
}

/// # Safety
/// `tracer` must be a valid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_block_start(
    tracer: *mut ProvexTracer,
    block_number: u64,
    timestamp: u64,
) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    trace_result(tracer.handler.on_block_start(block_number, timestamp))
}

/// # Safety
/// `tracer` must be a valid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_block_end(tracer: *mut ProvexTracer) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    tracer.handler.on_block_end();
    PROVEX_OK
}

/// # Safety
/// `tracer` must be a valid handle; buffer arguments must describe valid
/// memory for the duration of the call.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn provex_tx_start(
    tracer: *mut ProvexTracer,
    is_create: bool,
    addr: ProvexAddress,
    input: ProvexBytes,
    block_number: u64,
    timestamp: u64,
    origin: ProvexAddress,
    tx_hash: ProvexHash,
    code: ProvexBytes,
    is_cancun: bool,
    is_london: bool,
) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    let reader: Rc<dyn StateReader> = Rc::new(CallbackReader {
        get_nonce: tracer.get_nonce,
        get_code: tracer.get_code,
    });
    let tx = TxStart {
        block_number,
        timestamp,
        origin: unpack_address(&origin),
        tx_hash: unpack_hash(&tx_hash),
        is_create,
        address: unpack_address(&addr),
        input: unpack_bytes(&input),
        code: unpack_bytes(&code),
        is_cancun,
        is_london,
    };
    trace_result(tracer.handler.on_tx_start(tx, Some(reader)))
}

/// # Safety
/// `tracer` must be a valid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_tx_end(tracer: *mut ProvexTracer) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    trace_result(tracer.handler.on_tx_end())
}

/// # Safety
/// `tracer` must be a valid handle; buffer arguments must describe valid
/// memory for the duration of the call.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn provex_opcode(
    tracer: *mut ProvexTracer,
    stack: ProvexStack,
    memory: ProvexBytes,
    addr: ProvexAddress,
    pc: u64,
    op: u8,
    cost: u64,
    has_error: bool,
) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    let stack = unpack_stack(&stack);
    let memory = unpack_bytes(&memory);
    trace_result(tracer.handler.on_opcode(
        pc,
        op,
        cost,
        &stack,
        &memory,
        unpack_address(&addr),
        has_error,
    ))
}

/// # Safety
/// `tracer` must be a valid handle; `input` must describe valid memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_enter(
    tracer: *mut ProvexTracer,
    to: ProvexAddress,
    input: ProvexBytes,
) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    let input = unpack_bytes(&input);
    tracer.handler.on_enter(unpack_address(&to), &input);
    PROVEX_OK
}

/// # Safety
/// `tracer` must be a valid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_fault(tracer: *mut ProvexTracer, op: u8) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    trace_result(tracer.handler.on_fault(op))
}

/// # Safety
/// `tracer` must be a valid handle; `output` must describe valid memory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn provex_exit(
    tracer: *mut ProvexTracer,
    output: ProvexBytes,
    has_error: bool,
) -> i32 {
    let Some(tracer) = (unsafe { tracer.as_mut() }) else {
        return PROVEX_ERR_NULL;
    };
    let output = unpack_bytes(&output);
    trace_result(tracer.handler.on_exit(&output, has_error))
}
