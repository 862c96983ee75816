// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-wide default device selection.
//!
//! Newly constructed filters start from this default. It is seeded once from
//! [`ENV_DEVICE`] on first use and can be moved at runtime; filters that were
//! already constructed keep the id they copied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use tracing::warn;

/// Environment variable consulted once for the initial default device id.
pub const ENV_DEVICE: &str = "SPIRAL_FFT_DEVICE";

static DEFAULT_DEVICE: OnceLock<AtomicU64> = OnceLock::new();

fn cell() -> &'static AtomicU64 {
    DEFAULT_DEVICE.get_or_init(|| {
        let seed = match std::env::var(ENV_DEVICE) {
            Ok(raw) => parse_device(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "ignoring malformed {ENV_DEVICE}");
                0
            }),
            Err(_) => 0,
        };
        AtomicU64::new(seed)
    })
}

fn parse_device(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

/// Device id new filters start from.
pub fn default_device_id() -> u64 {
    cell().load(Ordering::Relaxed)
}

/// Moves the process-wide default. Does not touch filters already built.
pub fn set_default_device_id(id: u64) {
    cell().store(id, Ordering::Relaxed);
}

/// Serializes tests that move the process default.
#[cfg(test)]
pub(crate) fn tests_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
