// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Accelerator-backed forward FFT for N-dimensional images.
//!
//! [`ForwardFftFilter`] is the front door: configure a device id, hand in an
//! [`Image`], get the complex spectrum or a typed [`FftError`] back. Under
//! it sit a size validator (extents whose greatest prime factor exceeds 13
//! are rejected before any device work), reference-counted per-device
//! [`DeviceContext`]s, a per-context plan cache keyed by exact
//! shape/precision/batch/direction, and a mixed-radix Stockham kernel family
//! executed through `wgpu`.
//!
//! Transforms are unnormalized and forward-only, in `f32` or `f64` (the
//! latter requires the adapter's `SHADER_F64` feature). Execution is
//! synchronous: a returned `Ok` means the device finished and the output is
//! fully populated; any failure returns an error and no partial image.

pub mod backend;
pub mod config;
pub mod error;
pub mod filter;
pub mod image;
pub mod primes;
pub mod telemetry;

pub use backend::device::{
    device_initializations, is_available, live_context_count, ContextStats, DeviceBuffer,
    DeviceContext,
};
pub use backend::execute::{execute, execute_complex};
pub use backend::plan::{
    shader_source, CacheStats, Direction, FftPlan, PlanKey, Precision, MAX_TRANSFORM_RANK,
    PLAN_CACHE_CAPACITY,
};
pub use error::{FftError, Result};
pub use filter::ForwardFftFilter;
pub use image::{ComplexImage, FftSample, Image};
pub use primes::MAX_SUPPORTED_PRIME_FACTOR;

pub use num_complex::Complex;
