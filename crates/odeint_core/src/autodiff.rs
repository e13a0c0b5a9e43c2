use crate::traits::{Differentiable, DynamicalSystem, Scalar};
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Dual number for forward-mode AD.
/// val: real part
/// eps: tangent (directional derivative) part
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    /// A constant: zero tangent.
    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }

    /// An independent variable: unit tangent.
    pub fn variable(val: f64) -> Self {
        Self::new(val, 1.0)
    }

    /// Applies a scalar function with value `f` and derivative `df` at `self.val`.
    fn chain(self, f: f64, df: f64) -> Self {
        Self::new(f, df * self.eps)
    }

    /// Drops the tangent part.
    fn flat(self, f: f64) -> Self {
        Self::new(f, 0.0)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let q = self.val / rhs.val;
        Self::new(q, (self.eps - q * rhs.eps) / rhs.val)
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // d(a % b) = da - trunc(a / b) db away from the discontinuities.
        let n = (self.val / rhs.val).trunc();
        Self::new(self.val % rhs.val, self.eps - n * rhs.eps)
    }
}

macro_rules! impl_assign_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for Dual {
            fn $method(&mut self, rhs: Self) {
                *self = *self $op rhs;
            }
        }
    };
}

impl_assign_op!(AddAssign, add_assign, +);
impl_assign_op!(SubAssign, sub_assign, -);
impl_assign_op!(MulAssign, mul_assign, *);
impl_assign_op!(DivAssign, div_assign, /);
impl_assign_op!(RemAssign, rem_assign, %);

impl Num for Dual {
    type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix).map(Self::constant)
    }
}

impl ToPrimitive for Dual {
    fn to_i64(&self) -> Option<i64> {
        self.val.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.val.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.val)
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for Dual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

impl Float for Dual {
    fn nan() -> Self {
        Self::constant(f64::NAN)
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::new(-0.0, 0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn epsilon() -> Self {
        Self::constant(f64::EPSILON)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }
    fn is_nan(self) -> bool {
        self.val.is_nan() || self.eps.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite() && self.eps.is_finite()
    }
    fn is_normal(self) -> bool {
        self.val.is_normal()
    }
    fn classify(self) -> std::num::FpCategory {
        self.val.classify()
    }
    fn floor(self) -> Self {
        self.flat(self.val.floor())
    }
    fn ceil(self) -> Self {
        self.flat(self.val.ceil())
    }
    fn round(self) -> Self {
        self.flat(self.val.round())
    }
    fn trunc(self) -> Self {
        self.flat(self.val.trunc())
    }
    fn fract(self) -> Self {
        Self::new(self.val.fract(), self.eps)
    }
    fn abs(self) -> Self {
        if self.val >= 0.0 {
            self
        } else {
            -self
        }
    }
    fn signum(self) -> Self {
        self.flat(self.val.signum())
    }
    fn is_sign_positive(self) -> bool {
        self.val.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.val.is_sign_negative()
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        let r = self.val.recip();
        self.chain(r, -r * r)
    }
    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        self.chain(self.val.powi(n), n as f64 * self.val.powi(n - 1))
    }
    fn powf(self, n: Self) -> Self {
        // x^y = exp(y ln x); the ln x term only matters when the exponent moves.
        let p = self.val.powf(n.val);
        let d_base = if self.eps == 0.0 {
            0.0
        } else {
            n.val * self.val.powf(n.val - 1.0) * self.eps
        };
        let d_exp = if n.eps == 0.0 {
            0.0
        } else {
            p * self.val.ln() * n.eps
        };
        Self::new(p, d_base + d_exp)
    }
    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        self.chain(s, 0.5 / s)
    }
    fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }
    fn exp2(self) -> Self {
        let e = self.val.exp2();
        self.chain(e, e * std::f64::consts::LN_2)
    }
    fn ln(self) -> Self {
        self.chain(self.val.ln(), self.val.recip())
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.chain(self.val.log2(), (self.val * std::f64::consts::LN_2).recip())
    }
    fn log10(self) -> Self {
        self.chain(self.val.log10(), (self.val * std::f64::consts::LN_10).recip())
    }
    fn max(self, other: Self) -> Self {
        if self.val >= other.val {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val <= other.val {
            self
        } else {
            other
        }
    }
    fn abs_sub(self, other: Self) -> Self {
        if self.val > other.val {
            self - other
        } else {
            Self::zero()
        }
    }
    fn cbrt(self) -> Self {
        let c = self.val.cbrt();
        self.chain(c, (3.0 * c * c).recip())
    }
    fn hypot(self, other: Self) -> Self {
        (self * self + other * other).sqrt()
    }
    fn sin(self) -> Self {
        self.chain(self.val.sin(), self.val.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.val.cos(), -self.val.sin())
    }
    fn tan(self) -> Self {
        let t = self.val.tan();
        self.chain(t, 1.0 + t * t)
    }
    fn asin(self) -> Self {
        self.chain(self.val.asin(), (1.0 - self.val * self.val).sqrt().recip())
    }
    fn acos(self) -> Self {
        self.chain(self.val.acos(), -(1.0 - self.val * self.val).sqrt().recip())
    }
    fn atan(self) -> Self {
        self.chain(self.val.atan(), (1.0 + self.val * self.val).recip())
    }
    fn atan2(self, other: Self) -> Self {
        let denom = self.val * self.val + other.val * other.val;
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / denom,
        )
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }
    fn exp_m1(self) -> Self {
        self.chain(self.val.exp_m1(), self.val.exp())
    }
    fn ln_1p(self) -> Self {
        self.chain(self.val.ln_1p(), (1.0 + self.val).recip())
    }
    fn sinh(self) -> Self {
        self.chain(self.val.sinh(), self.val.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.val.cosh(), self.val.sinh())
    }
    fn tanh(self) -> Self {
        let t = self.val.tanh();
        self.chain(t, 1.0 - t * t)
    }
    fn asinh(self) -> Self {
        self.chain(self.val.asinh(), (self.val * self.val + 1.0).sqrt().recip())
    }
    fn acosh(self) -> Self {
        self.chain(self.val.acosh(), (self.val * self.val - 1.0).sqrt().recip())
    }
    fn atanh(self) -> Self {
        self.chain(self.val.atanh(), (1.0 - self.val * self.val).recip())
    }
    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }
}

// --- Forward-mode VJP wrapper ---

/// Supplies [`Differentiable`] for any system that can also be evaluated on
/// [`Dual`] numbers.
///
/// `cotangentᵀ J` is assembled one input direction at a time: each sweep seeds
/// a single state, time or parameter component and projects the resulting
/// tangent onto the cotangent. The Jacobian itself is never stored.
///
/// One VJP costs `n + p + 1` dual evaluations of the dynamics for `n` states
/// and `p` parameters; implement [`Differentiable`] by hand when `p` is large.
pub struct ForwardVjp<S> {
    pub inner: S,
}

impl<S> ForwardVjp<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<T: Scalar, S: DynamicalSystem<T>> DynamicalSystem<T> for ForwardVjp<S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn apply(&self, t: T, x: &[T], params: &[T], out: &mut [T]) {
        self.inner.apply(t, x, params, out)
    }

    fn validate(&self, t0: T, x0: &[T], params: &[T]) -> crate::error::Result<()> {
        self.inner.validate(t0, x0, params)
    }
}

impl<S> Differentiable for ForwardVjp<S>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
{
    fn vjp(
        &self,
        t: f64,
        x: &[f64],
        params: &[f64],
        cotangent: &[f64],
        x_bar: &mut [f64],
        params_bar: &mut [f64],
    ) -> f64 {
        let n = DynamicalSystem::<Dual>::dimension(&self.inner);
        let mut dual_x: Vec<Dual> = x.iter().map(|&v| Dual::constant(v)).collect();
        let mut dual_p: Vec<Dual> = params.iter().map(|&v| Dual::constant(v)).collect();
        let mut dual_out = vec![Dual::zero(); n];
        let project = |out: &[Dual]| -> f64 {
            out.iter().zip(cotangent).map(|(o, c)| o.eps * c).sum()
        };

        let t_const = Dual::constant(t);
        for j in 0..dual_x.len() {
            dual_x[j].eps = 1.0;
            self.inner.apply(t_const, &dual_x, &dual_p, &mut dual_out);
            x_bar[j] = project(&dual_out);
            dual_x[j].eps = 0.0;
        }

        for j in 0..dual_p.len() {
            dual_p[j].eps = 1.0;
            self.inner.apply(t_const, &dual_x, &dual_p, &mut dual_out);
            params_bar[j] = project(&dual_out);
            dual_p[j].eps = 0.0;
        }

        self.inner
            .apply(Dual::variable(t), &dual_x, &dual_p, &mut dual_out);
        project(&dual_out)
    }
}
