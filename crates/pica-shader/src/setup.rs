//! Persistent per-unit-type shader setup: program and swizzle storage plus
//! the uniform banks, fed by streamed configuration writes.

use pica_types::Float24;
use tracing::{error, trace};

/// Program store size in 32-bit words.
pub const MAX_PROGRAM_CODE_LENGTH: usize = 4096;
/// Swizzle table size in 32-bit words.
pub const MAX_SWIZZLE_DATA_LENGTH: usize = 4096;
/// Float uniform bank size (c0..c95).
pub const NUM_FLOAT_UNIFORMS: usize = 96;
/// Bool uniform bank size (b0..b15).
pub const NUM_BOOL_UNIFORMS: usize = 16;
/// Int uniform bank size (i0..i3).
pub const NUM_INT_UNIFORMS: usize = 4;

/// Which shader stage a setup belongs to; only used to tag log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    Vertex,
    Geometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformFormat {
    Float24,
    Float32,
}

/// The uniform banks read by a running shader.
#[derive(Clone)]
pub struct Uniforms {
    pub f: [[Float24; 4]; NUM_FLOAT_UNIFORMS],
    pub b: [bool; NUM_BOOL_UNIFORMS],
    pub i: [[u8; 4]; NUM_INT_UNIFORMS],
}

impl Default for Uniforms {
    fn default() -> Self {
        Self {
            f: [[Float24::zero(); 4]; NUM_FLOAT_UNIFORMS],
            b: [false; NUM_BOOL_UNIFORMS],
            i: [[0; 4]; NUM_INT_UNIFORMS],
        }
    }
}

/// Long-lived program state for one shader stage. Shared read-only by every
/// invocation of the program; mutated only through the configuration-write
/// methods below.
pub struct ShaderSetup {
    pub kind: ShaderKind,
    pub program_code: Box<[u32; MAX_PROGRAM_CODE_LENGTH]>,
    pub swizzle_data: Box<[u32; MAX_SWIZZLE_DATA_LENGTH]>,
    pub uniforms: Uniforms,
    /// Entry offset for the current batch, set by `setup_batch`.
    pub entry_point: u32,

    // Streaming-write cursors.
    float_uniform_index: u32,
    float_uniform_format: UniformFormat,
    float_word_buffer: [u32; 4],
    float_word_count: usize,
    program_offset: u32,
    swizzle_offset: u32,
}

impl ShaderSetup {
    pub fn new(kind: ShaderKind) -> Self {
        Self {
            kind,
            program_code: Box::new([0; MAX_PROGRAM_CODE_LENGTH]),
            swizzle_data: Box::new([0; MAX_SWIZZLE_DATA_LENGTH]),
            uniforms: Uniforms::default(),
            entry_point: 0,
            float_uniform_index: 0,
            float_uniform_format: UniformFormat::Float24,
            float_word_buffer: [0; 4],
            float_word_count: 0,
            program_offset: 0,
            swizzle_offset: 0,
        }
    }

    /// Starts a float-uniform upload at `index`, discarding any partially
    /// buffered words.
    pub fn begin_uniform_upload(&mut self, index: u32, format: UniformFormat) {
        self.float_uniform_index = index;
        self.float_uniform_format = format;
        self.float_word_count = 0;
    }

    /// Pushes one raw word of a float-uniform stream. A float4 slot completes
    /// after 4 words in 32-bit mode or 3 words in 24-bit mode; completed
    /// slots advance the target index. Component order is reversed relative
    /// to the stream.
    pub fn push_uniform_word(&mut self, value: u32) {
        self.float_word_buffer[self.float_word_count] = value;
        self.float_word_count += 1;

        let filled = match self.float_uniform_format {
            UniformFormat::Float32 => self.float_word_count >= 4,
            UniformFormat::Float24 => self.float_word_count >= 3,
        };
        if !filled {
            return;
        }
        self.float_word_count = 0;

        let index = self.float_uniform_index;
        if index as usize >= NUM_FLOAT_UNIFORMS {
            error!(kind = ?self.kind, index, "invalid float uniform index, write dropped");
            return;
        }

        let buffer = &self.float_word_buffer;
        let uniform = &mut self.uniforms.f[index as usize];
        match self.float_uniform_format {
            UniformFormat::Float32 => {
                for (i, component) in uniform.iter_mut().enumerate() {
                    *component = Float24::from_f32(f32::from_bits(buffer[3 - i]));
                }
            }
            UniformFormat::Float24 => {
                uniform[3] = Float24::from_raw(buffer[0] >> 8);
                uniform[2] =
                    Float24::from_raw(((buffer[0] & 0xff) << 16) | ((buffer[1] >> 16) & 0xffff));
                uniform[1] =
                    Float24::from_raw(((buffer[1] & 0xffff) << 8) | ((buffer[2] >> 24) & 0xff));
                uniform[0] = Float24::from_raw(buffer[2] & 0xff_ffff);
            }
        }
        trace!(
            kind = ?self.kind,
            index,
            x = uniform[0].to_f32(),
            y = uniform[1].to_f32(),
            z = uniform[2].to_f32(),
            w = uniform[3].to_f32(),
            "set float uniform"
        );
        self.float_uniform_index += 1;
    }

    /// One write unpacks all 16 bool uniforms from the low bits.
    pub fn set_bool_uniforms(&mut self, value: u32) {
        for (i, flag) in self.uniforms.b.iter_mut().enumerate() {
            *flag = value & (1 << i) != 0;
        }
    }

    /// Direct indexed write of an int uniform's 4 byte lanes.
    pub fn set_int_uniform(&mut self, index: u32, value: u32) {
        if index as usize >= NUM_INT_UNIFORMS {
            error!(kind = ?self.kind, index, value, "invalid int uniform index, write dropped");
            return;
        }
        self.uniforms.i[index as usize] = value.to_le_bytes();
        trace!(kind = ?self.kind, index, value, "set int uniform");
    }

    pub fn set_program_offset(&mut self, offset: u32) {
        self.program_offset = offset;
    }

    pub fn write_program_word(&mut self, word: u32) {
        let offset = self.program_offset;
        if offset as usize >= MAX_PROGRAM_CODE_LENGTH {
            error!(kind = ?self.kind, offset, "program code write out of bounds, dropped");
            return;
        }
        self.program_code[offset as usize] = word;
        self.program_offset += 1;
    }

    pub fn set_swizzle_offset(&mut self, offset: u32) {
        self.swizzle_offset = offset;
    }

    pub fn write_swizzle_word(&mut self, word: u32) {
        let offset = self.swizzle_offset;
        if offset as usize >= MAX_SWIZZLE_DATA_LENGTH {
            error!(kind = ?self.kind, offset, "swizzle pattern write out of bounds, dropped");
            return;
        }
        self.swizzle_data[offset as usize] = word;
        self.swizzle_offset += 1;
    }
}

/// Already-decoded per-stage pipeline configuration the shader engine reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShaderConfig {
    /// Program entry offset in words.
    pub main_offset: u32,
    /// Number of input attributes minus one.
    pub max_input_attribute_index: u32,
    /// 4 bits per attribute, selecting the input register it lands in.
    pub input_attribute_to_register_map: u64,
    /// Bit i enables output register i.
    pub output_mask: u32,
}

impl ShaderConfig {
    pub fn register_for_attribute(&self, attribute_index: usize) -> usize {
        ((self.input_attribute_to_register_map >> (attribute_index * 4)) & 0xf) as usize
    }
}
