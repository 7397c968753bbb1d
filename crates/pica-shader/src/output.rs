//! Mapping from shader output registers to the fixed vertex attributes the
//! rasterizer consumes.

use pica_types::Float24;
use tracing::error;

use crate::state::AttributeBuffer;

/// Destination slot for one output register component. Raw values come from
/// a 5-bit hardware field; 17 and 21 are padding inside [`OutputVertex`] and
/// 31 discards the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Semantic {
    PositionX = 0,
    PositionY = 1,
    PositionZ = 2,
    PositionW = 3,
    QuaternionX = 4,
    QuaternionY = 5,
    QuaternionZ = 6,
    QuaternionW = 7,
    ColorR = 8,
    ColorG = 9,
    ColorB = 10,
    ColorA = 11,
    TexCoord0U = 12,
    TexCoord0V = 13,
    TexCoord1U = 14,
    TexCoord1V = 15,
    TexCoord0W = 16,
    ViewX = 18,
    ViewY = 19,
    ViewZ = 20,
    TexCoord2U = 22,
    TexCoord2V = 23,
    Invalid = 31,
}

impl Semantic {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::PositionX,
            1 => Self::PositionY,
            2 => Self::PositionZ,
            3 => Self::PositionW,
            4 => Self::QuaternionX,
            5 => Self::QuaternionY,
            6 => Self::QuaternionZ,
            7 => Self::QuaternionW,
            8 => Self::ColorR,
            9 => Self::ColorG,
            10 => Self::ColorB,
            11 => Self::ColorA,
            12 => Self::TexCoord0U,
            13 => Self::TexCoord0V,
            14 => Self::TexCoord1U,
            15 => Self::TexCoord1V,
            16 => Self::TexCoord0W,
            18 => Self::ViewX,
            19 => Self::ViewY,
            20 => Self::ViewZ,
            22 => Self::TexCoord2U,
            23 => Self::TexCoord2V,
            31 => Self::Invalid,
            _ => return None,
        })
    }
}

/// Maximum number of output attributes forwarded to the rasterizer.
pub const MAX_OUTPUT_ATTRIBUTES: usize = 7;

/// Decoded semantic assignment for each output attribute component.
#[derive(Debug, Clone, Copy)]
pub struct OutputLayout {
    pub total_attributes: usize,
    pub semantics: [[Semantic; 4]; MAX_OUTPUT_ATTRIBUTES],
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            total_attributes: 0,
            semantics: [[Semantic::Invalid; 4]; MAX_OUTPUT_ATTRIBUTES],
        }
    }
}

impl OutputLayout {
    /// Decodes raw 5-bit semantic ids. Ids with no slot in [`OutputVertex`]
    /// are logged and treated as discards.
    pub fn from_raw(raw: &[[u32; 4]]) -> Self {
        let mut layout = Self {
            total_attributes: raw.len().min(MAX_OUTPUT_ATTRIBUTES),
            ..Self::default()
        };
        for (attr, components) in raw.iter().take(layout.total_attributes).enumerate() {
            for (comp, &id) in components.iter().enumerate() {
                layout.semantics[attr][comp] = Semantic::from_raw(id).unwrap_or_else(|| {
                    error!(attr, comp, id, "unknown output semantic id, component discarded");
                    Semantic::Invalid
                });
            }
        }
        layout
    }
}

/// A fully assembled vertex, in the slot order the rasterizer expects.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputVertex {
    pub pos: [Float24; 4],
    pub quat: [Float24; 4],
    pub color: [Float24; 4],
    pub tc0: [Float24; 2],
    pub tc1: [Float24; 2],
    pub tc0_w: Float24,
    pub view: [Float24; 3],
    pub tc2: [Float24; 2],
}

impl OutputVertex {
    /// Scatters a compacted attribute buffer into named vertex slots and
    /// clamps color components to [0, 1] by absolute value.
    pub fn from_attribute_buffer(layout: &OutputLayout, input: &AttributeBuffer) -> Self {
        let mut vertex = Self::default();
        for attr in 0..layout.total_attributes {
            for comp in 0..4 {
                let value = input.attr[attr][comp];
                match layout.semantics[attr][comp] {
                    Semantic::PositionX => vertex.pos[0] = value,
                    Semantic::PositionY => vertex.pos[1] = value,
                    Semantic::PositionZ => vertex.pos[2] = value,
                    Semantic::PositionW => vertex.pos[3] = value,
                    Semantic::QuaternionX => vertex.quat[0] = value,
                    Semantic::QuaternionY => vertex.quat[1] = value,
                    Semantic::QuaternionZ => vertex.quat[2] = value,
                    Semantic::QuaternionW => vertex.quat[3] = value,
                    Semantic::ColorR => vertex.color[0] = value,
                    Semantic::ColorG => vertex.color[1] = value,
                    Semantic::ColorB => vertex.color[2] = value,
                    Semantic::ColorA => vertex.color[3] = value,
                    Semantic::TexCoord0U => vertex.tc0[0] = value,
                    Semantic::TexCoord0V => vertex.tc0[1] = value,
                    Semantic::TexCoord1U => vertex.tc1[0] = value,
                    Semantic::TexCoord1V => vertex.tc1[1] = value,
                    Semantic::TexCoord0W => vertex.tc0_w = value,
                    Semantic::ViewX => vertex.view[0] = value,
                    Semantic::ViewY => vertex.view[1] = value,
                    Semantic::ViewZ => vertex.view[2] = value,
                    Semantic::TexCoord2U => vertex.tc2[0] = value,
                    Semantic::TexCoord2V => vertex.tc2[1] = value,
                    Semantic::Invalid => {}
                }
            }
        }
        for c in &mut vertex.color {
            *c = Float24::from_f32(c.to_f32().abs().min(1.0));
        }
        vertex
    }
}
