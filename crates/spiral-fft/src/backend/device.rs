// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-device accelerator contexts.
//!
//! A [`DeviceContext`] owns the `wgpu` device and queue for one adapter,
//! identified by its index in the platform enumeration, together with that
//! device's plan cache and allocation counters. Contexts are handed out as
//! `Arc`s from a process-wide registry: acquiring an id that is already live
//! returns the same instance, and the context is torn down when the last
//! holder drops it. A later acquire initializes the device again from
//! scratch.
//!
//! All device memory goes through [`DeviceContext::allocate`] /
//! [`DeviceContext::allocate_init`] so the counters stay truthful; freeing is
//! dropping the returned [`DeviceBuffer`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::backend::plan::{CacheStats, FftPlan, PlanCache, PlanKey};
use crate::error::{FftError, Result};

static REGISTRY: Lazy<Mutex<HashMap<u64, Weak<DeviceContext>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static DEVICE_INITIALIZATIONS: AtomicU64 = AtomicU64::new(0);

/// Number of real device initializations performed by this process. Cache
/// hits on the registry do not move it.
pub fn device_initializations() -> u64 {
    DEVICE_INITIALIZATIONS.load(Ordering::Relaxed)
}

/// Number of contexts currently alive in the registry.
pub fn live_context_count() -> usize {
    REGISTRY
        .lock()
        .unwrap()
        .values()
        .filter(|weak| weak.strong_count() > 0)
        .count()
}

/// Whether a usable device exists at `device_id`. Initializes (and promptly
/// releases) a context when none is live, so prefer holding the result of
/// [`DeviceContext::acquire`] in code that will transform right after.
pub fn is_available(device_id: u64) -> bool {
    DeviceContext::acquire(device_id).is_ok()
}

#[derive(Default)]
struct AllocCounters {
    allocations: AtomicU64,
    live: AtomicU64,
    bytes_in_use: AtomicU64,
}

/// Point-in-time allocation counters of one context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Total allocations performed over the context lifetime.
    pub allocations: u64,
    /// Allocations currently alive.
    pub live_allocations: u64,
    /// Bytes held by live allocations.
    pub bytes_in_use: u64,
}

/// RAII device allocation. Dropping it returns the bytes to the counters;
/// the underlying `wgpu` buffer is released with it.
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    bytes: u64,
    counters: Arc<AllocCounters>,
}

impl DeviceBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::Relaxed);
        self.counters
            .bytes_in_use
            .fetch_sub(self.bytes, Ordering::Relaxed);
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

/// Shared accelerator state for one device id.
pub struct DeviceContext {
    id: u64,
    generation: u64,
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    features: wgpu::Features,
    limits: wgpu::Limits,
    counters: Arc<AllocCounters>,
    plans: PlanCache,
}

impl DeviceContext {
    /// Returns the live context for `device_id`, creating it when none
    /// exists. Creation is serialized under the registry lock, so concurrent
    /// acquires of one id perform exactly one initialization and all see the
    /// same instance.
    pub fn acquire(device_id: u64) -> Result<Arc<Self>> {
        let mut registry = REGISTRY.lock().unwrap();
        if let Some(existing) = registry.get(&device_id).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let context = Arc::new(Self::init(device_id)?);
        registry.retain(|_, weak| weak.strong_count() > 0);
        registry.insert(device_id, Arc::downgrade(&context));
        Ok(context)
    }

    fn init(device_id: u64) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let count = adapters.len();
        let Some(index) = usize::try_from(device_id).ok().filter(|&i| i < count) else {
            warn!(device = device_id, adapters = count, "no adapter at requested index");
            return Err(FftError::unavailable(
                device_id,
                format!("adapter index out of range ({count} adapters present)"),
            ));
        };
        let adapter = adapters.swap_remove(index);

        let mut required_features = wgpu::Features::empty();
        if adapter.features().contains(wgpu::Features::SHADER_F64) {
            required_features |= wgpu::Features::SHADER_F64;
        }
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("spiral_fft.device"),
                required_features,
                required_limits: adapter.limits(),
            },
            None,
        ))
        .map_err(|err| {
            warn!(device = device_id, error = %err, "device request failed");
            FftError::unavailable(device_id, format!("device request failed: {err}"))
        })?;

        let generation = DEVICE_INITIALIZATIONS.fetch_add(1, Ordering::Relaxed) + 1;
        let adapter_info = adapter.get_info();
        info!(
            device = device_id,
            generation,
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            kind = ?adapter_info.device_type,
            "device context initialized"
        );
        let features = device.features();
        let limits = device.limits();
        Ok(Self {
            id: device_id,
            generation,
            adapter_info,
            device,
            queue,
            features,
            limits,
            counters: Arc::new(AllocCounters::default()),
            plans: PlanCache::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Process-unique serial of this initialization. Two contexts can share an
    /// id when one is re-created after the first was dropped; the serial tells
    /// them apart.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn features(&self) -> wgpu::Features {
        self.features
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Human-readable adapter description for logs.
    pub fn adapter_summary(&self) -> String {
        format!(
            "{} ({:?}, {:?})",
            self.adapter_info.name, self.adapter_info.backend, self.adapter_info.device_type
        )
    }

    pub fn supports_double(&self) -> bool {
        self.features.contains(wgpu::Features::SHADER_F64)
    }

    /// Cached plan for `key`, compiling it on first request. Compilation is
    /// serialized per context; a failed compilation is not cached.
    pub fn plan(&self, key: &PlanKey) -> Result<Arc<FftPlan>> {
        self.plans.get_or_create(self, key)
    }

    pub fn plan_stats(&self) -> CacheStats {
        self.plans.stats()
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            live_allocations: self.counters.live.load(Ordering::Relaxed),
            bytes_in_use: self.counters.bytes_in_use.load(Ordering::Relaxed),
        }
    }

    /// Uninitialized device allocation, validated against the device limits.
    pub fn allocate(
        &self,
        bytes: u64,
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> Result<DeviceBuffer> {
        self.check_allocation(bytes, usage)?;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage,
            mapped_at_creation: false,
        });
        Ok(self.track(buffer, bytes))
    }

    /// Allocation created with `contents` already uploaded.
    pub fn allocate_init(
        &self,
        contents: &[u8],
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> Result<DeviceBuffer> {
        let bytes = contents.len() as u64;
        self.check_allocation(bytes, usage)?;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        Ok(self.track(buffer, bytes))
    }

    fn check_allocation(&self, bytes: u64, usage: wgpu::BufferUsages) -> Result<()> {
        if bytes > self.limits.max_buffer_size {
            return Err(FftError::out_of_memory(
                self.id,
                bytes,
                format!("max_buffer_size is {}", self.limits.max_buffer_size),
            ));
        }
        if usage.contains(wgpu::BufferUsages::STORAGE)
            && bytes > u64::from(self.limits.max_storage_buffer_binding_size)
        {
            return Err(FftError::out_of_memory(
                self.id,
                bytes,
                format!(
                    "max_storage_buffer_binding_size is {}",
                    self.limits.max_storage_buffer_binding_size
                ),
            ));
        }
        Ok(())
    }

    fn track(&self, buffer: wgpu::Buffer, bytes: u64) -> DeviceBuffer {
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        self.counters.live.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_in_use
            .fetch_add(bytes, Ordering::Relaxed);
        DeviceBuffer {
            buffer,
            bytes,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("id", &self.id)
            .field("adapter", &self.adapter_info.name)
            .finish_non_exhaustive()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        debug!(device = self.id, "device context torn down");
    }
}
