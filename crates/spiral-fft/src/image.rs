// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Host-side image model.
//!
//! An [`Image`] is a dense N-dimensional block of real samples with the first
//! axis fastest in memory (stride 1), matching the layout the transfer engine
//! uploads verbatim. The signed index origin is carried as metadata only; the
//! transform never interprets it, it is copied onto the output unchanged.
//!
//! `ndarray` interop reverses the axis order: `ArrayD` is C-ordered (last
//! axis fastest), so an array of shape `[d0, .., dk]` becomes an image with
//! extents `[dk, .., d0]` sharing the exact same sample buffer.

use ndarray::{ArrayD, IxDyn};
use num_complex::Complex;

use crate::backend::plan::Precision;
use crate::error::{FftError, Result};

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Scalar sample types the engine can transform. Implemented for `f32` and
/// `f64` only; other element types are rejected at compile time.
pub trait FftSample:
    sealed::Sealed + bytemuck::Pod + Copy + Send + Sync + std::fmt::Debug + 'static
{
    /// Device precision the sample type maps to.
    const PRECISION: Precision;
}

impl FftSample for f32 {
    const PRECISION: Precision = Precision::Single;
}

impl FftSample for f64 {
    const PRECISION: Precision = Precision::Double;
}

/// Product of axis extents, or `None` on u64 overflow.
pub(crate) fn volume_of(extents: &[u64]) -> Option<u64> {
    extents.iter().try_fold(1u64, |acc, &e| acc.checked_mul(e))
}

/// Dense real-valued N-dimensional image, first axis fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<S: FftSample> {
    extents: Vec<u64>,
    origin: Vec<i64>,
    data: Vec<S>,
}

impl<S: FftSample> Image<S> {
    /// Builds an image from axis extents and a sample buffer. The buffer
    /// length must equal the extent product; the origin starts at zero on
    /// every axis.
    pub fn from_shape_vec(extents: impl Into<Vec<u64>>, data: Vec<S>) -> Result<Self> {
        let extents = extents.into();
        let volume = volume_of(&extents)
            .ok_or_else(|| FftError::transfer("image extent product overflows u64"))?;
        if volume != data.len() as u64 {
            return Err(FftError::transfer(format!(
                "image buffer holds {} samples but extents {:?} require {}",
                data.len(),
                extents,
                volume
            )));
        }
        let origin = vec![0; extents.len()];
        Ok(Self {
            extents,
            origin,
            data,
        })
    }

    /// Image of the given shape with every sample set to `value`.
    pub fn filled(extents: impl Into<Vec<u64>>, value: S) -> Result<Self> {
        let extents = extents.into();
        let volume = volume_of(&extents)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| FftError::transfer("image extent product overflows usize"))?;
        Self::from_shape_vec(extents, vec![value; volume])
    }

    /// Converts a C-ordered `ndarray` into an image (axis order reversed,
    /// buffer shared verbatim; non-standard layouts are copied first).
    pub fn from_array(array: ArrayD<S>) -> Self {
        let mut extents: Vec<u64> = array.shape().iter().map(|&d| d as u64).collect();
        extents.reverse();
        let data = if array.is_standard_layout() {
            array.into_raw_vec()
        } else {
            array.as_standard_layout().into_owned().into_raw_vec()
        };
        let origin = vec![0; extents.len()];
        Self {
            extents,
            origin,
            data,
        }
    }

    pub fn extents(&self) -> &[u64] {
        &self.extents
    }

    pub fn origin(&self) -> &[i64] {
        &self.origin
    }

    /// Replaces the index origin. The rank must match the image rank.
    pub fn set_origin(&mut self, origin: Vec<i64>) {
        assert_eq!(
            origin.len(),
            self.extents.len(),
            "origin rank must match image rank"
        );
        self.origin = origin;
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn volume(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn as_slice(&self) -> &[S] {
        &self.data
    }
}

/// Complex-valued counterpart of [`Image`]; produced by the transform with
/// the input geometry copied over.
#[derive(Clone, Debug, PartialEq)]
pub struct ComplexImage<S: FftSample> {
    extents: Vec<u64>,
    origin: Vec<i64>,
    data: Vec<Complex<S>>,
}

impl<S: FftSample> ComplexImage<S> {
    pub(crate) fn from_parts(
        extents: Vec<u64>,
        origin: Vec<i64>,
        data: Vec<Complex<S>>,
    ) -> Self {
        debug_assert_eq!(volume_of(&extents), Some(data.len() as u64));
        Self {
            extents,
            origin,
            data,
        }
    }

    pub fn extents(&self) -> &[u64] {
        &self.extents
    }

    pub fn origin(&self) -> &[i64] {
        &self.origin
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn volume(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn as_slice(&self) -> &[Complex<S>] {
        &self.data
    }

    /// Consumes the image into a C-ordered `ndarray` (axis order reversed,
    /// buffer shared verbatim).
    pub fn into_array(self) -> ArrayD<Complex<S>> {
        let mut shape: Vec<usize> = self.extents.iter().map(|&e| e as usize).collect();
        shape.reverse();
        ArrayD::from_shape_vec(IxDyn(&shape), self.data)
            .expect("extents match buffer length")
    }
}
