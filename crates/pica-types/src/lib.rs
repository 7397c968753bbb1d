//! Hardware numeric formats of the PICA200 shader pipeline.
//!
//! The GPU stores shader values in narrow floating-point formats (24/20/16
//! bits wide) and rasterizer coordinates in signed 28.4 fixed point. These
//! types reproduce the hardware's bit layouts and arithmetic quirks exactly;
//! host `f32` is only used as the internal working representation.

mod fixed;
mod float;

pub use fixed::{Fixed, FixedS28P4};
pub use float::{Float, Float16, Float20, Float24};
