//! Fixed-point world-space scalar and point types.
//!
//! All spatial math in this crate runs on [`Fixed`], a signed 48.16 binary
//! fixed-point number. Integer arithmetic is bit-exact on every platform, so
//! quantization, line stepping, and hashing produce identical results on
//! every machine given identical inputs. Floating-point values only appear at
//! the API boundary, where they are converted once (round to nearest) and
//! never touched again.

use nalgebra::Point3;

/// A signed 48.16 fixed-point number.
///
/// One world unit is `1 << 16` raw ticks, giving a resolution of about
/// 1.5e-5 world units and a range of roughly ±1.4e14 units — far beyond the
/// coordinate ranges any grid in practice occupies.
///
/// # Example
///
/// ```
/// use worldgrid::Fixed;
///
/// let a = Fixed::from_f64(1.5);
/// let b = Fixed::from_int(2);
/// assert_eq!((a + b).to_f64(), 3.5);
/// assert_eq!(Fixed::ONE.to_f64(), 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fixed(i64);

impl Fixed {
    /// Number of fractional bits.
    pub const FRAC_BITS: u32 = 16;

    /// Zero.
    pub const ZERO: Self = Self(0);

    /// One world unit.
    pub const ONE: Self = Self(1 << Self::FRAC_BITS);

    /// Creates a value from raw fixed-point ticks.
    #[must_use]
    pub const fn from_bits(bits: i64) -> Self {
        Self(bits)
    }

    /// Returns the raw fixed-point ticks.
    #[must_use]
    pub const fn to_bits(self) -> i64 {
        self.0
    }

    /// Creates a value from a whole number of world units.
    ///
    /// # Example
    ///
    /// ```
    /// use worldgrid::Fixed;
    ///
    /// assert_eq!(Fixed::from_int(-3).to_f64(), -3.0);
    /// ```
    #[must_use]
    pub const fn from_int(v: i32) -> Self {
        Self((v as i64) << Self::FRAC_BITS)
    }

    /// Converts a float to fixed-point, rounding to the nearest tick.
    ///
    /// This is the single point where floating-point input enters the
    /// deterministic domain; IEEE 754 `round` is itself exact, so the
    /// conversion is reproducible across platforms.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f64(v: f64) -> Self {
        Self((v * f64::from(1u32 << Self::FRAC_BITS)).round() as i64)
    }

    /// Converts back to a float. Lossless for any value this crate produces.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / f64::from(1u32 << Self::FRAC_BITS)
    }

    /// Absolute value (saturating at the numeric limit).
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// Component-wise minimum.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Component-wise maximum.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Rounds down to the nearest multiple of `step`.
    ///
    /// Uses Euclidean division so negative values round toward negative
    /// infinity, not toward zero.
    ///
    /// # Example
    ///
    /// ```
    /// use worldgrid::Fixed;
    ///
    /// let p = Fixed::from_f64(-0.5);
    /// assert_eq!(p.floor_to(Fixed::ONE).to_f64(), -1.0);
    /// ```
    #[must_use]
    pub fn floor_to(self, step: Self) -> Self {
        Self(self.0.div_euclid(step.0) * step.0)
    }

    /// Rounds up to the nearest multiple of `step`.
    ///
    /// # Example
    ///
    /// ```
    /// use worldgrid::Fixed;
    ///
    /// let p = Fixed::from_f64(-0.5);
    /// assert_eq!(p.ceil_to(Fixed::ONE).to_f64(), 0.0);
    /// ```
    #[must_use]
    pub fn ceil_to(self, step: Self) -> Self {
        let floored = self.0.div_euclid(step.0) * step.0;
        if floored == self.0 {
            Self(floored)
        } else {
            Self(floored + step.0)
        }
    }

    /// Euclidean quotient of this value by `step`, as an integer.
    ///
    /// This is the lattice index of the cell of width `step` containing the
    /// value: `Fixed::from_f64(-0.5).div_floor_by(Fixed::ONE) == -1`.
    #[must_use]
    pub fn div_floor_by(self, step: Self) -> i64 {
        self.0.div_euclid(step.0)
    }

    /// Smallest integer number of world units covering this value.
    ///
    /// `ceil_units` of 2.3 units is 3; of -2.3 units is -2.
    #[must_use]
    pub fn ceil_units(self) -> i64 {
        -(-self.0).div_euclid(Self::ONE.0)
    }
}

impl std::ops::Add for Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl std::ops::Sub for Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::Neg for Fixed {
    type Output = Self;

    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

impl std::ops::Mul<i64> for Fixed {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self {
        Self(self.0.wrapping_mul(rhs))
    }
}

impl std::ops::Div<i64> for Fixed {
    type Output = Self;

    /// Truncating division by an integer. Division by zero is a caller bug
    /// and panics as it would for any integer.
    fn div(self, rhs: i64) -> Self {
        Self(self.0 / rhs)
    }
}

/// A 3-component fixed-point world-space point.
///
/// This is the interchange type for all spatial queries. Construct it from
/// explicit floats with [`FixedPoint::from_xyz`] or convert from a
/// [`nalgebra::Point3`] at the API boundary.
///
/// # Example
///
/// ```
/// use worldgrid::FixedPoint;
/// use nalgebra::Point3;
///
/// let p = FixedPoint::from(Point3::new(1.5, -0.25, 3.0));
/// assert_eq!(p.to_point(), Point3::new(1.5, -0.25, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedPoint {
    /// X component (width axis).
    pub x: Fixed,
    /// Y component (depth axis).
    pub y: Fixed,
    /// Z component (height axis).
    pub z: Fixed,
}

impl FixedPoint {
    /// Creates a point from fixed-point components.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self { x, y, z }
    }

    /// The origin (0, 0, 0).
    #[must_use]
    pub const fn origin() -> Self {
        Self::new(Fixed::ZERO, Fixed::ZERO, Fixed::ZERO)
    }

    /// Creates a point from float components, rounding each to the nearest
    /// fixed-point tick.
    #[must_use]
    pub fn from_xyz(x: f64, y: f64, z: f64) -> Self {
        Self::new(Fixed::from_f64(x), Fixed::from_f64(y), Fixed::from_f64(z))
    }

    /// Converts to a floating-point point.
    #[must_use]
    pub fn to_point(self) -> Point3<f64> {
        Point3::new(self.x.to_f64(), self.y.to_f64(), self.z.to_f64())
    }

    /// Component-wise minimum of two points.
    #[must_use]
    pub fn component_min(self, other: Self) -> Self {
        Self::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// Component-wise maximum of two points.
    #[must_use]
    pub fn component_max(self, other: Self) -> Self {
        Self::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }
}

impl From<Point3<f64>> for FixedPoint {
    fn from(p: Point3<f64>) -> Self {
        Self::from_xyz(p.x, p.y, p.z)
    }
}

impl From<[f64; 3]> for FixedPoint {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self::from_xyz(x, y, z)
    }
}

impl From<FixedPoint> for Point3<f64> {
    fn from(p: FixedPoint) -> Self {
        p.to_point()
    }
}

impl std::ops::Add for FixedPoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for FixedPoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f64_round_trip() {
        // Values representable in 16 fractional bits survive exactly.
        for v in [0.0, 1.0, -1.0, 0.5, -0.5, 1.25, -39.5, 123.0625] {
            assert_eq!(Fixed::from_f64(v).to_f64(), v);
        }
    }

    #[test]
    fn test_from_f64_quantization_error_bounded() {
        use approx::assert_relative_eq;
        // Values that do not land on a tick still convert within half a tick.
        for v in [0.3, -7.77, 123.456, -0.001] {
            assert_relative_eq!(Fixed::from_f64(v).to_f64(), v, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_from_int() {
        assert_eq!(Fixed::from_int(5), Fixed::from_f64(5.0));
        assert_eq!(Fixed::from_int(-40), Fixed::from_f64(-40.0));
    }

    #[test]
    fn test_floor_to_negative() {
        let p = Fixed::from_f64(-39.5);
        assert_eq!(p.floor_to(Fixed::ONE).to_f64(), -40.0);
        let q = Fixed::from_f64(-40.0);
        assert_eq!(q.floor_to(Fixed::ONE).to_f64(), -40.0);
    }

    #[test]
    fn test_ceil_to_negative() {
        let p = Fixed::from_f64(-39.5);
        assert_eq!(p.ceil_to(Fixed::ONE).to_f64(), -39.0);
        let q = Fixed::from_f64(-39.0);
        assert_eq!(q.ceil_to(Fixed::ONE).to_f64(), -39.0);
    }

    #[test]
    fn test_floor_idempotent() {
        for v in [0.3, -0.3, 17.99, -17.99, 5.0] {
            let once = Fixed::from_f64(v).floor_to(Fixed::ONE);
            assert_eq!(once.floor_to(Fixed::ONE), once);
        }
    }

    #[test]
    fn test_ceil_idempotent() {
        for v in [0.3, -0.3, 17.99, -17.99, 5.0] {
            let once = Fixed::from_f64(v).ceil_to(Fixed::ONE);
            assert_eq!(once.ceil_to(Fixed::ONE), once);
        }
    }

    #[test]
    fn test_div_floor_by() {
        assert_eq!(Fixed::from_f64(-0.5).div_floor_by(Fixed::ONE), -1);
        assert_eq!(Fixed::from_f64(0.5).div_floor_by(Fixed::ONE), 0);
        assert_eq!(Fixed::from_f64(-1.0).div_floor_by(Fixed::ONE), -1);
    }

    #[test]
    fn test_ceil_units() {
        assert_eq!(Fixed::from_f64(2.3).ceil_units(), 3);
        assert_eq!(Fixed::from_f64(-2.3).ceil_units(), -2);
        assert_eq!(Fixed::from_f64(4.0).ceil_units(), 4);
        assert_eq!(Fixed::ZERO.ceil_units(), 0);
    }

    #[test]
    fn test_div_truncates() {
        // 9 units split into 10 increments: 0.9 is not representable, the
        // remainder is dropped deterministically.
        let inc = Fixed::from_int(9) / 10;
        assert_eq!(inc.to_bits(), (9i64 << 16) / 10);
    }

    #[test]
    fn test_point_conversions() {
        let p = FixedPoint::from_xyz(1.5, -0.25, 3.0);
        assert_eq!(p.to_point(), Point3::new(1.5, -0.25, 3.0));
        let q: FixedPoint = [1.5, -0.25, 3.0].into();
        assert_eq!(p, q);
    }

    #[test]
    fn test_point_component_min_max() {
        let a = FixedPoint::from_xyz(1.0, 5.0, -2.0);
        let b = FixedPoint::from_xyz(3.0, 2.0, -4.0);
        assert_eq!(a.component_min(b), FixedPoint::from_xyz(1.0, 2.0, -4.0));
        assert_eq!(a.component_max(b), FixedPoint::from_xyz(3.0, 5.0, -2.0));
    }
}
