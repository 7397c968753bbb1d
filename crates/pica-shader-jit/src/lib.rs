//! JIT shader engine: compiles shader programs to WebAssembly and runs them
//! under wasmtime, with results bit-identical to the interpreter.
//!
//! Compiled programs are cached by a hash of the program store, the swizzle
//! table and the entry point. The cache only grows; when a miss could push it
//! past its budget, the whole cache and the backing wasmtime store are
//! dropped and rebuilt, which releases every instantiated module at once.

pub mod backend;
pub mod codegen;

use hashbrown::HashMap;
use tracing::{debug, info};
use xxhash_rust::xxh3::Xxh3;

use pica_shader::setup::{ShaderSetup, MAX_PROGRAM_CODE_LENGTH};
use pica_shader::state::UnitState;
use pica_shader::{ShaderEngine, ShaderError};

use crate::backend::WasmtimeBackend;

/// Total compiled-module budget before the cache is flushed.
const CACHE_CAPACITY_BYTES: usize = 16 << 20;
/// Upper bound on one compiled program, reserved ahead of each compilation.
const WORST_CASE_PROGRAM_BYTES: usize = 2 << 20;

#[derive(Clone, Copy)]
struct CachedProgram {
    index: u32,
    entry_point: u32,
}

pub struct JitShaderEngine {
    backend: WasmtimeBackend,
    cache: HashMap<u64, CachedProgram>,
    cache_bytes: usize,
    capacity_bytes: usize,
    reservation_bytes: usize,
    active: Option<CachedProgram>,
}

impl JitShaderEngine {
    pub fn new() -> Self {
        Self::with_cache_budget(CACHE_CAPACITY_BYTES, WORST_CASE_PROGRAM_BYTES)
    }

    /// Engine with an explicit cache budget: `capacity_bytes` of compiled
    /// modules total, with `reservation_bytes` held back ahead of each
    /// compilation for the incoming module.
    pub fn with_cache_budget(capacity_bytes: usize, reservation_bytes: usize) -> Self {
        Self {
            backend: WasmtimeBackend::new(),
            cache: HashMap::new(),
            cache_bytes: 0,
            capacity_bytes,
            reservation_bytes,
            active: None,
        }
    }

    pub fn cached_programs(&self) -> usize {
        self.cache.len()
    }

    fn cache_key(setup: &ShaderSetup, entry_point: u32) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(bytemuck::cast_slice(&setup.program_code[..]));
        hasher.update(bytemuck::cast_slice(&setup.swizzle_data[..]));
        hasher.update(&entry_point.to_le_bytes());
        hasher.digest()
    }
}

impl Default for JitShaderEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderEngine for JitShaderEngine {
    fn setup_batch(&mut self, setup: &mut ShaderSetup, entry_point: u32) -> Result<(), ShaderError> {
        if entry_point as usize >= MAX_PROGRAM_CODE_LENGTH {
            return Err(ShaderError::InvalidEntryPoint(entry_point));
        }
        setup.entry_point = entry_point;

        let key = Self::cache_key(setup, entry_point);
        if let Some(&cached) = self.cache.get(&key) {
            self.active = Some(cached);
            return Ok(());
        }

        if self.cache_bytes + self.reservation_bytes > self.capacity_bytes {
            info!(
                programs = self.cache.len(),
                bytes = self.cache_bytes,
                "shader cache full, flushing"
            );
            self.cache.clear();
            self.cache_bytes = 0;
            self.backend.reset();
        }

        let wasm = codegen::compile(&setup.program_code, &setup.swizzle_data, entry_point);
        debug!(key, bytes = wasm.len(), "compiled shader program");
        let index = self.backend.add_program(&wasm)?;
        self.cache_bytes += wasm.len();
        let cached = CachedProgram { index, entry_point };
        self.cache.insert(key, cached);
        self.active = Some(cached);
        Ok(())
    }

    fn run(&mut self, setup: &ShaderSetup, state: &mut UnitState) -> Result<(), ShaderError> {
        let program = self
            .active
            .ok_or_else(|| ShaderError::Execute("no shader batch configured".into()))?;
        self.backend.run(program.index, setup, state, program.entry_point)
    }
}
