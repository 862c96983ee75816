// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Failure taxonomy for the forward FFT engine.
//!
//! Every fallible surface in this crate reports one of the kinds below; there
//! is no wrapping or chaining across layers. A failed call never leaves a
//! partially written output image behind.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, FftError>;

/// Everything that can go wrong between handing an image in and getting the
/// spectrum back.
#[derive(Debug, Error)]
pub enum FftError {
    /// An axis extent the accelerator backend cannot factor into supported
    /// radices. Raised by the size validator before any device work.
    #[error("unsupported transform size on axis {axis} (extent {extent}): {detail}")]
    UnsupportedSize {
        axis: usize,
        extent: u64,
        detail: String,
    },

    /// The device identifier maps to no usable adapter, or device
    /// initialization failed.
    #[error("device {device_id} unavailable: {detail}")]
    DeviceUnavailable { device_id: u64, detail: String },

    /// A device allocation was refused or exceeds what the device can hold.
    #[error("device {device_id} out of memory: {requested_bytes} bytes requested ({detail})")]
    DeviceOutOfMemory {
        device_id: u64,
        requested_bytes: u64,
        detail: String,
    },

    /// The backend rejected the shape/precision/batch combination, or the
    /// kernel for it failed to build.
    #[error("plan compilation failed on device {device_id}: {detail}")]
    PlanCompilationFailed { device_id: u64, detail: String },

    /// A host/device copy could not complete.
    #[error("host/device transfer failed: {detail}")]
    TransferFailed { detail: String },

    /// The plan was submitted but did not run to completion.
    #[error("transform execution failed: {detail}")]
    ExecutionFailed { detail: String },
}

impl FftError {
    pub fn unsupported(axis: usize, extent: u64, detail: impl Into<String>) -> Self {
        Self::UnsupportedSize {
            axis,
            extent,
            detail: detail.into(),
        }
    }

    pub fn unavailable(device_id: u64, detail: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            device_id,
            detail: detail.into(),
        }
    }

    pub fn out_of_memory(device_id: u64, requested_bytes: u64, detail: impl Into<String>) -> Self {
        Self::DeviceOutOfMemory {
            device_id,
            requested_bytes,
            detail: detail.into(),
        }
    }

    pub fn plan(device_id: u64, detail: impl Into<String>) -> Self {
        Self::PlanCompilationFailed {
            device_id,
            detail: detail.into(),
        }
    }

    pub fn transfer(detail: impl Into<String>) -> Self {
        Self::TransferFailed {
            detail: detail.into(),
        }
    }

    pub fn execution(detail: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            detail: detail.into(),
        }
    }

    /// Short stable tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedSize { .. } => "unsupported_size",
            Self::DeviceUnavailable { .. } => "device_unavailable",
            Self::DeviceOutOfMemory { .. } => "device_out_of_memory",
            Self::PlanCompilationFailed { .. } => "plan_compilation_failed",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::ExecutionFailed { .. } => "execution_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = FftError::unsupported(1, 17, "greatest prime factor 17 exceeds 13");
        let text = err.to_string();
        assert!(text.contains("axis 1"), "{text}");
        assert!(text.contains("17"), "{text}");

        let err = FftError::out_of_memory(2, 4096, "max_buffer_size is 1024");
        assert!(err.to_string().contains("4096 bytes"));
        assert_eq!(err.kind(), "device_out_of_memory");
    }

    #[test]
    fn kinds_are_distinct() {
        let all = [
            FftError::unsupported(0, 0, "zero extent").kind(),
            FftError::unavailable(0, "no adapter").kind(),
            FftError::out_of_memory(0, 0, "refused").kind(),
            FftError::plan(0, "rank").kind(),
            FftError::transfer("map failed").kind(),
            FftError::execution("device lost").kind(),
        ];
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
