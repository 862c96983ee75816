// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Transform-size admissibility. Pure host arithmetic; nothing here touches a
//! device.

use crate::error::{FftError, Result};

/// Largest prime factor the accelerator kernels can decompose. Extents whose
/// greatest prime factor stays at or below this bound are executable.
pub const MAX_SUPPORTED_PRIME_FACTOR: u64 = 13;

/// Greatest prime factor of `n`. By convention `greatest_prime_factor(1) == 1`
/// and `greatest_prime_factor(0) == 0`.
pub fn greatest_prime_factor(mut n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let mut largest = 1u64;
    while n % 2 == 0 {
        largest = 2;
        n /= 2;
    }
    let mut d = 3u64;
    while d * d <= n {
        while n % d == 0 {
            largest = d;
            n /= d;
        }
        d += 2;
    }
    if n > 1 {
        largest = n;
    }
    largest
}

/// Whether a single axis extent is executable.
pub fn supported(extent: u64) -> bool {
    extent >= 1 && greatest_prime_factor(extent) <= MAX_SUPPORTED_PRIME_FACTOR
}

/// Greatest prime factor across all axes of an image shape; 1 for rank 0.
pub fn image_greatest_prime_factor(extents: &[u64]) -> u64 {
    extents
        .iter()
        .map(|&e| greatest_prime_factor(e))
        .max()
        .unwrap_or(1)
}

/// Checks every axis of a shape, front axis first. The first inadmissible
/// axis is reported; admissible shapes return `Ok(())` without any device
/// interaction.
pub fn validate(extents: &[u64]) -> Result<()> {
    for (axis, &extent) in extents.iter().enumerate() {
        if extent == 0 {
            return Err(FftError::unsupported(axis, extent, "zero extent"));
        }
        let factor = greatest_prime_factor(extent);
        if factor > MAX_SUPPORTED_PRIME_FACTOR {
            return Err(FftError::unsupported(
                axis,
                extent,
                format!(
                    "greatest prime factor {factor} exceeds supported maximum \
                     {MAX_SUPPORTED_PRIME_FACTOR}"
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpf_small_values() {
        assert_eq!(greatest_prime_factor(0), 0);
        assert_eq!(greatest_prime_factor(1), 1);
        assert_eq!(greatest_prime_factor(2), 2);
        assert_eq!(greatest_prime_factor(13), 13);
        assert_eq!(greatest_prime_factor(17), 17);
        assert_eq!(greatest_prime_factor(4096), 2);
        // 360360 = 2^3 * 3^2 * 5 * 7 * 11 * 13
        assert_eq!(greatest_prime_factor(360_360), 13);
        assert_eq!(greatest_prime_factor(9973), 9973);
        // composite with a large prime hiding behind small ones
        assert_eq!(greatest_prime_factor(2 * 3 * 9973), 9973);
    }

    #[test]
    fn supported_set_boundaries() {
        assert!(supported(1));
        assert!(supported(11));
        assert!(supported(13));
        assert!(supported(64));
        assert!(supported(11 * 13));
        assert!(!supported(0));
        assert!(!supported(17));
        assert!(!supported(2 * 17));
    }

    #[test]
    fn image_gpf_takes_axis_maximum() {
        assert_eq!(image_greatest_prime_factor(&[]), 1);
        assert_eq!(image_greatest_prime_factor(&[64, 64]), 2);
        assert_eq!(image_greatest_prime_factor(&[8, 9, 5]), 5);
        assert_eq!(image_greatest_prime_factor(&[64, 17]), 17);
    }

    #[test]
    fn validate_names_the_offending_axis() {
        assert!(validate(&[64, 64]).is_ok());
        assert!(validate(&[6, 10, 14]).is_ok());

        let err = validate(&[64, 17]).unwrap_err();
        match err {
            FftError::UnsupportedSize { axis, extent, .. } => {
                assert_eq!(axis, 1);
                assert_eq!(extent, 17);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validate_rejects_zero_extent() {
        let err = validate(&[8, 0, 4]).unwrap_err();
        match err {
            FftError::UnsupportedSize { axis, extent, detail } => {
                assert_eq!(axis, 1);
                assert_eq!(extent, 0);
                assert!(detail.contains("zero"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
