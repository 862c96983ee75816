// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Filter-style entry point tying validation, device acquisition, planning
//! and execution together.
//!
//! ```no_run
//! use spiral_fft::{ForwardFftFilter, Image};
//!
//! # fn main() -> spiral_fft::Result<()> {
//! let image = Image::filled(vec![64, 64], 1.0f32)?;
//! let mut filter = ForwardFftFilter::new();
//! let spectrum = filter.transform(&image)?;
//! assert_eq!(spectrum.extents(), image.extents());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use crate::backend::device::DeviceContext;
use crate::backend::execute;
use crate::backend::plan::PlanKey;
use crate::config;
use crate::error::Result;
use crate::image::{ComplexImage, FftSample, Image};
use crate::primes;

/// Forward FFT of N-dimensional real images on a configurable device.
///
/// The filter holds at most one context reference; it is acquired lazily on
/// the first transform and released when the device id changes or the filter
/// is dropped.
pub struct ForwardFftFilter<S: FftSample> {
    device_id: u64,
    context: Option<Arc<DeviceContext>>,
    _samples: PhantomData<fn() -> S>,
}

impl<S: FftSample> ForwardFftFilter<S> {
    /// Filter targeting the process-wide default device
    /// ([`config::default_device_id`]).
    pub fn new() -> Self {
        Self::with_device(config::default_device_id())
    }

    /// Filter targeting a specific device id.
    pub fn with_device(device_id: u64) -> Self {
        Self {
            device_id,
            context: None,
            _samples: PhantomData,
        }
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Retargets the filter. A context held for the previous id is released
    /// immediately; the next transform acquires the new device.
    pub fn set_device_id(&mut self, device_id: u64) {
        if device_id != self.device_id {
            self.context = None;
        }
        self.device_id = device_id;
    }

    /// Largest prime factor across the image's axis extents. Host-only; an
    /// image is executable when this stays at or below
    /// [`Self::max_supported_prime_factor`].
    pub fn greatest_prime_factor(image: &Image<S>) -> u64 {
        primes::image_greatest_prime_factor(image.extents())
    }

    /// Largest prime factor the backend kernels can decompose.
    pub fn max_supported_prime_factor() -> u64 {
        primes::MAX_SUPPORTED_PRIME_FACTOR
    }

    /// Forward transform of `image` on the configured device.
    ///
    /// The size validator runs first and rejects inadmissible extents with
    /// zero device work. Only then is the context acquired (reusing a held
    /// one), the whole-image plan fetched from that context's cache, and the
    /// engine run to completion. There is no internal retry; every failure
    /// maps one-to-one onto [`FftError`](crate::FftError) and leaves no
    /// partial output.
    pub fn transform(&mut self, image: &Image<S>) -> Result<ComplexImage<S>> {
        primes::validate(image.extents())?;
        let context = match &self.context {
            Some(held) => Arc::clone(held),
            None => {
                let acquired = DeviceContext::acquire(self.device_id)?;
                self.context = Some(Arc::clone(&acquired));
                acquired
            }
        };
        let key = PlanKey::forward(image.extents(), S::PRECISION, 1);
        trace!(device = self.device_id, key = %key, "running forward transform");
        let plan = context.plan(&key)?;
        let data = execute::execute::<S>(&context, &plan, image.as_slice())?;
        Ok(ComplexImage::from_parts(
            image.extents().to_vec(),
            image.origin().to_vec(),
            data,
        ))
    }
}

impl<S: FftSample> Default for ForwardFftFilter<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FftSample> fmt::Debug for ForwardFftFilter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardFftFilter")
            .field("device_id", &self.device_id)
            .field("context_held", &self.context.is_some())
            .finish()
    }
}
