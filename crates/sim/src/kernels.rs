//! 2D SPH smoothing kernels.
//!
//! All kernels have compact support `[0, radius)` and take the precomputed
//! normalisation factors from [`KernelCoefficients`]. The WGSL versions in the
//! GPU crate are line-for-line equivalents.

use crate::params::KernelCoefficients;

/// Poly6 kernel, used as the viscosity weight.
#[inline]
pub fn poly6(dst: f32, k: &KernelCoefficients) -> f32 {
    if dst < k.radius {
        let v = k.sqr_radius - dst * dst;
        v * v * v * k.poly6
    } else {
        0.0
    }
}

/// Spiky kernel (squared falloff), used for density.
#[inline]
pub fn spiky_pow2(dst: f32, k: &KernelCoefficients) -> f32 {
    if dst < k.radius {
        let v = k.radius - dst;
        v * v * k.spiky_pow2
    } else {
        0.0
    }
}

/// Spiky kernel (cubic falloff), used for near density.
#[inline]
pub fn spiky_pow3(dst: f32, k: &KernelCoefficients) -> f32 {
    if dst < k.radius {
        let v = k.radius - dst;
        v * v * v * k.spiky_pow3
    } else {
        0.0
    }
}

#[inline]
pub fn spiky_pow2_derivative(dst: f32, k: &KernelCoefficients) -> f32 {
    if dst <= k.radius {
        let v = k.radius - dst;
        -v * k.spiky_pow2_derivative
    } else {
        0.0
    }
}

#[inline]
pub fn spiky_pow3_derivative(dst: f32, k: &KernelCoefficients) -> f32 {
    if dst <= k.radius {
        let v = k.radius - dst;
        -v * v * k.spiky_pow3_derivative
    } else {
        0.0
    }
}

#[inline]
pub fn density_kernel(dst: f32, k: &KernelCoefficients) -> f32 {
    spiky_pow2(dst, k)
}

#[inline]
pub fn near_density_kernel(dst: f32, k: &KernelCoefficients) -> f32 {
    spiky_pow3(dst, k)
}

#[inline]
pub fn density_derivative(dst: f32, k: &KernelCoefficients) -> f32 {
    spiky_pow2_derivative(dst, k)
}

#[inline]
pub fn near_density_derivative(dst: f32, k: &KernelCoefficients) -> f32 {
    spiky_pow3_derivative(dst, k)
}

#[inline]
pub fn viscosity_kernel(dst: f32, k: &KernelCoefficients) -> f32 {
    poly6(dst, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn coefficients(radius: f32) -> KernelCoefficients {
        KernelCoefficients::try_new(radius).unwrap()
    }

    /// Integrate a radial kernel over the disc by midpoint rule.
    fn integrate(radius: f32, kernel: impl Fn(f32) -> f32) -> f32 {
        let steps = 20_000;
        let dr = radius / steps as f32;
        (0..steps)
            .map(|i| {
                let r = (i as f32 + 0.5) * dr;
                kernel(r) * 2.0 * PI * r * dr
            })
            .sum()
    }

    #[test]
    fn kernels_are_normalised_over_the_disc() {
        for radius in [0.2, 0.35, 1.0] {
            let k = coefficients(radius);
            for (name, integral) in [
                ("poly6", integrate(radius, |d| poly6(d, &k))),
                ("spiky_pow2", integrate(radius, |d| spiky_pow2(d, &k))),
                ("spiky_pow3", integrate(radius, |d| spiky_pow3(d, &k))),
            ] {
                assert!(
                    (integral - 1.0).abs() < 1e-3,
                    "{} integrates to {} at radius {}",
                    name,
                    integral,
                    radius
                );
            }
        }
    }

    #[test]
    fn kernels_vanish_at_support_boundary() {
        let k = coefficients(0.35);
        assert_eq!(poly6(0.35, &k), 0.0);
        assert_eq!(spiky_pow2(0.35, &k), 0.0);
        assert_eq!(spiky_pow3(0.4, &k), 0.0);
        assert_eq!(spiky_pow2_derivative(0.35, &k), 0.0);
        assert_eq!(spiky_pow3_derivative(1.0, &k), 0.0);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let k = coefficients(0.5);
        let h = 1e-3;
        for d in [0.05, 0.1, 0.2, 0.3, 0.4] {
            let fd2 = (spiky_pow2(d + h, &k) - spiky_pow2(d - h, &k)) / (2.0 * h);
            let fd3 = (spiky_pow3(d + h, &k) - spiky_pow3(d - h, &k)) / (2.0 * h);
            let a2 = spiky_pow2_derivative(d, &k);
            let a3 = spiky_pow3_derivative(d, &k);
            assert!((fd2 - a2).abs() <= a2.abs() * 1e-2 + 1e-2, "pow2 at {}", d);
            assert!((fd3 - a3).abs() <= a3.abs() * 1e-2 + 1e-2, "pow3 at {}", d);
        }
    }

    #[test]
    fn derivatives_are_non_positive() {
        let k = coefficients(0.35);
        for i in 0..=35 {
            let d = i as f32 * 0.01;
            assert!(density_derivative(d, &k) <= 0.0);
            assert!(near_density_derivative(d, &k) <= 0.0);
        }
    }
}
