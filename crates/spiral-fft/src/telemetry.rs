// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Tracing bootstrap for binaries and tests that embed the engine.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT: OnceLock<bool> = OnceLock::new();

/// Installs a compact `tracing` subscriber filtered by `RUST_LOG` (falling
/// back to `info`). Idempotent: only the first call in a process attempts the
/// install; the return value says whether this crate's subscriber is the one
/// that got registered.
pub fn init_tracing() -> bool {
    *INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        match tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init()
        {
            Ok(()) => true,
            Err(err) => {
                // another subscriber won the race; keep logging through it
                tracing::debug!(error = %err, "tracing subscriber already installed");
                false
            }
        }
    })
}
