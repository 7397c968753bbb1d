use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// A PICA floating-point value with `M` mantissa bits, `E` exponent bits and
/// one sign bit, biased by `128 - 2^(E-1)`.
///
/// The raw layout, from bit 0 upward, is mantissa, exponent, sign. The value
/// is held as a host `f32` so arithmetic can run on the host FPU; only
/// [`Float::from_raw`] and [`Float::to_raw`] touch the hardware encoding.
///
/// Multiplication deviates from IEEE 754: when either operand is exactly
/// zero and the other is not NaN the result is exactly zero, even if the
/// other operand is infinite.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float<const M: u32, const E: u32> {
    value: f32,
}

/// 24-bit float, the primary shader register format.
pub type Float24 = Float<16, 7>;
/// 20-bit float, used by vertex attribute and texture coordinate paths.
pub type Float20 = Float<12, 7>;
/// 16-bit float.
pub type Float16 = Float<10, 5>;

impl<const M: u32, const E: u32> Float<M, E> {
    const WIDTH: u32 = M + E + 1;
    const BIAS: i32 = 128 - (1 << (E - 1));
    const MANTISSA_MASK: u32 = (1 << M) - 1;
    const EXPONENT_MASK: u32 = (1 << E) - 1;

    pub fn from_f32(val: f32) -> Self {
        Self { value: val }
    }

    /// Decodes a hardware bit pattern.
    ///
    /// A pattern whose magnitude bits are all zero decodes to a signed zero;
    /// anything else is repositioned into an IEEE 754 single with the
    /// exponent rebased. Hardware "denormals" (zero exponent, non-zero
    /// mantissa) therefore decode to small normal values.
    pub fn from_raw(hex: u32) -> Self {
        let sign = (hex >> (M + E)) & 1;
        let exponent = (hex >> M) & Self::EXPONENT_MASK;
        let mantissa = hex & Self::MANTISSA_MASK;

        let bits = if hex & ((1 << (Self::WIDTH - 1)) - 1) != 0 {
            (sign << 31)
                | (exponent.wrapping_add(Self::BIAS as u32) << 23)
                | (mantissa << (23 - M))
        } else {
            sign << 31
        };
        Self {
            value: f32::from_bits(bits),
        }
    }

    /// Encodes the stored value back into the hardware bit pattern.
    ///
    /// The mantissa is truncated. Values below the format's range collapse to
    /// signed zero and values above it saturate to the maximum exponent; NaN
    /// keeps a non-zero mantissa so it stays a NaN pattern.
    pub fn to_raw(self) -> u32 {
        let bits = self.value.to_bits();
        let sign = bits >> 31;
        let exponent = ((bits >> 23) & 0xff) as i32 - Self::BIAS;
        let mut mantissa = (bits >> (23 - M)) & Self::MANTISSA_MASK;

        if self.value == 0.0 || exponent < 0 {
            return sign << (M + E);
        }
        let exponent = if exponent > Self::EXPONENT_MASK as i32 {
            if self.value.is_nan() && mantissa == 0 {
                mantissa = 1;
            }
            Self::EXPONENT_MASK
        } else {
            exponent as u32
        };
        (sign << (M + E)) | (exponent << M) | mantissa
    }

    pub const fn zero() -> Self {
        Self { value: 0.0 }
    }

    // Not recommended for anything but host-side math and logging.
    pub fn to_f32(self) -> f32 {
        self.value
    }
}

impl<const M: u32, const E: u32> Mul for Float<M, E> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        if (self.value == 0.0 && !rhs.value.is_nan())
            || (rhs.value == 0.0 && !self.value.is_nan())
        {
            // PICA gives 0 instead of NaN when multiplying by inf.
            Self::zero()
        } else {
            Self::from_f32(self.value * rhs.value)
        }
    }
}

impl<const M: u32, const E: u32> Div for Float<M, E> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self::from_f32(self.value / rhs.value)
    }
}

impl<const M: u32, const E: u32> Add for Float<M, E> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::from_f32(self.value + rhs.value)
    }
}

impl<const M: u32, const E: u32> Sub for Float<M, E> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::from_f32(self.value - rhs.value)
    }
}

impl<const M: u32, const E: u32> Neg for Float<M, E> {
    type Output = Self;

    fn neg(self) -> Self {
        Self::from_f32(-self.value)
    }
}

impl<const M: u32, const E: u32> MulAssign for Float<M, E> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<const M: u32, const E: u32> DivAssign for Float<M, E> {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl<const M: u32, const E: u32> AddAssign for Float<M, E> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<const M: u32, const E: u32> SubAssign for Float<M, E> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<const M: u32, const E: u32> PartialEq for Float<M, E> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<const M: u32, const E: u32> PartialOrd for Float<M, E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}
