//! Per-unit execution state: the register file, condition and address
//! registers, and the geometry-shader emitter.

use pica_types::Float24;
use tracing::trace;

use crate::output::{OutputLayout, OutputVertex};
use crate::setup::ShaderConfig;

/// One float4 register.
pub type Attribute = [Float24; 4];

/// A bank of 16 float4 attributes, used both for shader input and for the
/// compacted output handed to the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeBuffer {
    pub attr: [Attribute; 16],
}

impl Default for AttributeBuffer {
    fn default() -> Self {
        Self {
            attr: [[Float24::zero(); 4]; 16],
        }
    }
}

/// The three register banks an executing program addresses directly.
#[derive(Clone)]
pub struct RegisterFile {
    pub input: [Attribute; 16],
    pub temporary: [Attribute; 16],
    pub output: [Attribute; 16],
}

impl Default for RegisterFile {
    fn default() -> Self {
        let zero = [[Float24::zero(); 4]; 16];
        Self {
            input: zero,
            temporary: zero,
            output: zero,
        }
    }
}

/// Called with the three corners of each emitted triangle.
pub type TriangleHandler = Box<dyn FnMut(OutputVertex, OutputVertex, OutputVertex)>;

/// Primitive-assembly state driven by the SETEMIT and EMIT instructions.
/// Only present on the unit running geometry shaders.
pub struct GeometryEmitter {
    /// Full output-register snapshots, one per triangle corner.
    pub buffers: [[Attribute; 16]; 3],
    pub vertex_id: u8,
    pub prim_emit: bool,
    pub winding: bool,
    pub output_mask: u32,
    pub layout: OutputLayout,
    pub handler: Option<TriangleHandler>,
}

impl GeometryEmitter {
    pub fn new(output_mask: u32, layout: OutputLayout) -> Self {
        Self {
            buffers: [[[Float24::zero(); 4]; 16]; 3],
            vertex_id: 0,
            prim_emit: false,
            winding: false,
            output_mask,
            layout,
            handler: None,
        }
    }

    pub fn set_params(&mut self, vertex_id: u8, prim_emit: bool, winding: bool) {
        self.vertex_id = vertex_id;
        self.prim_emit = prim_emit;
        self.winding = winding;
    }

    /// Snapshots the output bank into the slot selected by the last SETEMIT
    /// and, when primitive emission is armed, hands the assembled triangle to
    /// the rasterizer. Misuse is a caller bug and aborts the run.
    pub fn emit(&mut self, output_regs: &[Attribute; 16]) {
        assert!(
            self.vertex_id < 3,
            "emit vertex id {} out of range",
            self.vertex_id
        );
        self.buffers[self.vertex_id as usize] = *output_regs;

        if !self.prim_emit {
            return;
        }
        trace!(winding = self.winding, "emitting triangle");
        let vertices = self.buffers.map(|regs| {
            let mut compacted = AttributeBuffer::default();
            let mut slot = 0;
            for (reg, value) in regs.iter().enumerate() {
                if self.output_mask & (1 << reg) != 0 {
                    compacted.attr[slot] = *value;
                    slot += 1;
                }
            }
            OutputVertex::from_attribute_buffer(&self.layout, &compacted)
        });
        let handler = self
            .handler
            .as_mut()
            .expect("no triangle handler bound at primitive emission");
        let [v0, v1, v2] = vertices;
        if self.winding {
            handler(v2, v1, v0);
        } else {
            handler(v0, v1, v2);
        }
    }
}

/// Transient execution context for one invocation on one shader unit.
#[derive(Default)]
pub struct UnitState {
    pub registers: RegisterFile,
    /// cc.x and cc.y, written by CMP and read by conditional flow control.
    pub conditional_code: [bool; 2],
    /// a0.x, a0.y and the loop counter aL.
    pub address_registers: [i32; 3],
    pub emitter: Option<GeometryEmitter>,
}

impl UnitState {
    /// Clears the per-invocation registers. Program-visible setup (uniforms,
    /// emitter configuration) is unaffected.
    pub fn reset_run_state(&mut self) {
        self.conditional_code = [false; 2];
        self.address_registers = [0; 3];
    }

    /// Routes input attributes into the input registers selected by the
    /// attribute map.
    pub fn load_input(&mut self, config: &ShaderConfig, input: &AttributeBuffer) {
        let count = config.max_input_attribute_index as usize + 1;
        for attribute in 0..count {
            self.registers.input[config.register_for_attribute(attribute)] =
                input.attr[attribute];
        }
    }

    /// Compacts the enabled output registers into consecutive attributes.
    pub fn write_output(&self, config: &ShaderConfig, output: &mut AttributeBuffer) {
        let mut slot = 0;
        for (reg, value) in self.registers.output.iter().enumerate() {
            if config.output_mask & (1 << reg) != 0 {
                output.attr[slot] = *value;
                slot += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn f24(v: f32) -> Float24 {
        Float24::from_f32(v)
    }

    #[test]
    fn load_input_follows_the_attribute_map() {
        let config = ShaderConfig {
            max_input_attribute_index: 1,
            // Attribute 0 lands in v3, attribute 1 in v0.
            input_attribute_to_register_map: 0x03,
            ..Default::default()
        };
        let mut input = AttributeBuffer::default();
        input.attr[0] = [f24(1.0); 4];
        input.attr[1] = [f24(2.0); 4];

        let mut unit = UnitState::default();
        unit.load_input(&config, &input);
        assert_eq!(unit.registers.input[3][0].to_f32(), 1.0);
        assert_eq!(unit.registers.input[0][0].to_f32(), 2.0);
        assert_eq!(unit.registers.input[1][0].to_f32(), 0.0);
    }

    #[test]
    fn write_output_compacts_by_mask() {
        let config = ShaderConfig {
            output_mask: 0b101,
            ..Default::default()
        };
        let mut unit = UnitState::default();
        unit.registers.output[0] = [f24(1.0); 4];
        unit.registers.output[1] = [f24(9.0); 4];
        unit.registers.output[2] = [f24(3.0); 4];

        let mut output = AttributeBuffer::default();
        unit.write_output(&config, &mut output);
        assert_eq!(output.attr[0][0].to_f32(), 1.0);
        assert_eq!(output.attr[1][0].to_f32(), 3.0);
        assert_eq!(output.attr[2][0].to_f32(), 0.0);
    }

    #[test]
    fn emitter_buffers_vertices_until_primitive_emission() {
        let layout = OutputLayout::from_raw(&[[0, 1, 2, 3]]);
        let mut emitter = GeometryEmitter::new(0b1, layout);
        let emitted = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = emitted.clone();
        emitter.handler = Some(Box::new(move |v0, v1, v2| {
            sink.borrow_mut().push([v0, v1, v2]);
        }));

        let mut regs = [[Float24::zero(); 4]; 16];
        regs[0] = [f24(1.0), f24(0.0), f24(0.0), f24(1.0)];
        emitter.set_params(0, false, false);
        emitter.emit(&regs);
        assert!(emitted.borrow().is_empty());

        regs[0][0] = f24(2.0);
        emitter.set_params(1, false, false);
        emitter.emit(&regs);

        regs[0][0] = f24(3.0);
        emitter.set_params(2, true, false);
        emitter.emit(&regs);

        let triangles = emitted.borrow();
        assert_eq!(triangles.len(), 1);
        assert_eq!(triangles[0][0].pos[0].to_f32(), 1.0);
        assert_eq!(triangles[0][1].pos[0].to_f32(), 2.0);
        assert_eq!(triangles[0][2].pos[0].to_f32(), 3.0);
    }

    #[test]
    fn winding_reverses_vertex_order() {
        let layout = OutputLayout::from_raw(&[[0, 1, 2, 3]]);
        let mut emitter = GeometryEmitter::new(0b1, layout);
        let emitted = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = emitted.clone();
        emitter.handler = Some(Box::new(move |v0, v1, v2| {
            sink.borrow_mut().push([v0, v1, v2]);
        }));

        let mut regs = [[Float24::zero(); 4]; 16];
        for (id, x) in [(0u8, 1.0f32), (1, 2.0)] {
            regs[0][0] = f24(x);
            emitter.set_params(id, false, false);
            emitter.emit(&regs);
        }
        regs[0][0] = f24(3.0);
        emitter.set_params(2, true, true);
        emitter.emit(&regs);

        let triangles = emitted.borrow();
        assert_eq!(triangles[0][0].pos[0].to_f32(), 3.0);
        assert_eq!(triangles[0][1].pos[0].to_f32(), 2.0);
        assert_eq!(triangles[0][2].pos[0].to_f32(), 1.0);
    }

    #[test]
    #[should_panic(expected = "no triangle handler bound")]
    fn primitive_emission_without_handler_is_fatal() {
        let mut emitter = GeometryEmitter::new(0b1, OutputLayout::default());
        emitter.set_params(0, true, false);
        emitter.emit(&[[Float24::zero(); 4]; 16]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_vertex_id_is_fatal() {
        let mut emitter = GeometryEmitter::new(0b1, OutputLayout::default());
        emitter.set_params(3, false, false);
        emitter.emit(&[[Float24::zero(); 4]; 16]);
    }
}
