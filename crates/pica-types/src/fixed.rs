use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// A signed fixed-point value with `I` integer bits and `F` fraction bits,
/// backed by an `i32`.
///
/// Arithmetic is truncating: multiply and divide shift the low `F` bits off
/// the result without rounding, and overflow wraps with the underlying
/// integer width. The rasterizer's subpixel coordinates use [`FixedS28P4`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fixed<const I: u32, const F: u32> {
    value: i32,
}

/// Signed 28.4 fixed point, the rasterizer coordinate format.
pub type FixedS28P4 = Fixed<28, 4>;

impl<const I: u32, const F: u32> Fixed<I, F> {
    pub const FRAC_MASK: u32 = (1 << F) - 1;
    pub const INT_MASK: u32 = ((1u64 << I) - 1) as u32;

    pub const fn from_raw(hex: i32) -> Self {
        Self { value: hex }
    }

    pub fn from_fixed(int: i32, frac: u32) -> Self {
        Self::from_raw(
            (int.wrapping_shl(F) & !(Self::FRAC_MASK as i32)) | (frac & Self::FRAC_MASK) as i32,
        )
    }

    /// Rounds to the nearest representable value, ties away from zero.
    pub fn from_f32(val: f32) -> Self {
        Self::from_raw((val * (1u32 << F) as f32).round() as i32)
    }

    pub const fn zero() -> Self {
        Self::from_raw(0)
    }

    pub const fn to_raw(self) -> i32 {
        self.value
    }

    /// The integer part, sign-extended.
    pub const fn int(self) -> i32 {
        self.value >> F
    }

    /// The raw fraction bits.
    pub const fn fract(self) -> u32 {
        (self.value as u32) & Self::FRAC_MASK
    }

    pub fn to_f32(self) -> f32 {
        self.value as f32 / (1u32 << F) as f32
    }
}

impl<const I: u32, const F: u32> Mul for Fixed<I, F> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::from_raw(self.value.wrapping_mul(rhs.value) >> F)
    }
}

impl<const I: u32, const F: u32> Div for Fixed<I, F> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self::from_raw(self.value.wrapping_shl(F).wrapping_div(rhs.value))
    }
}

impl<const I: u32, const F: u32> Add for Fixed<I, F> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::from_raw(self.value.wrapping_add(rhs.value))
    }
}

impl<const I: u32, const F: u32> Sub for Fixed<I, F> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::from_raw(self.value.wrapping_sub(rhs.value))
    }
}

impl<const I: u32, const F: u32> Neg for Fixed<I, F> {
    type Output = Self;

    fn neg(self) -> Self {
        Self::from_raw(self.value.wrapping_neg())
    }
}

impl<const I: u32, const F: u32> MulAssign for Fixed<I, F> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<const I: u32, const F: u32> DivAssign for Fixed<I, F> {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl<const I: u32, const F: u32> AddAssign for Fixed<I, F> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<const I: u32, const F: u32> SubAssign for Fixed<I, F> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
