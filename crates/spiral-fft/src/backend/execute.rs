// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Host/device transfers and plan execution.
//!
//! Execution is synchronous: upload, dispatch every stage, submit once, block
//! until the device signals completion, read back. On any failure the caller
//! gets an error and no output; work buffers are reclaimed on drop either
//! way. Real input is widened to interleaved complex on-device by the plan's
//! pack kernel, complex input skips that step and uploads straight into the
//! first work buffer.

use std::panic::{catch_unwind, AssertUnwindSafe};

use num_complex::Complex;
use tracing::trace;

use crate::backend::device::{DeviceBuffer, DeviceContext};
use crate::backend::panic_payload_to_string;
use crate::backend::plan::FftPlan;
use crate::error::{FftError, Result};
use crate::image::FftSample;

const WORK_USAGE: wgpu::BufferUsages =
    wgpu::BufferUsages::STORAGE.union(wgpu::BufferUsages::COPY_SRC);

/// Runs `plan` over `input` real samples and returns the complex spectrum,
/// batch instances laid out contiguously. The input length must equal the
/// plan's total element count.
pub fn execute<S: FftSample>(
    ctx: &DeviceContext,
    plan: &FftPlan,
    input: &[S],
) -> Result<Vec<Complex<S>>> {
    ensure_binding::<S>(ctx, plan, input.len() as u64)?;
    let input_buf = ctx.allocate_init(
        bytemuck::cast_slice(input),
        wgpu::BufferUsages::STORAGE,
        "spiral_fft.exec.input",
    )?;
    let work_a = ctx.allocate(plan.complex_bytes, WORK_USAGE, "spiral_fft.exec.work_a")?;
    run(ctx, plan, Some(&input_buf), work_a)
}

/// Same as [`execute`] for interleaved complex input.
pub fn execute_complex<S: FftSample>(
    ctx: &DeviceContext,
    plan: &FftPlan,
    input: &[Complex<S>],
) -> Result<Vec<Complex<S>>> {
    ensure_binding::<S>(ctx, plan, input.len() as u64)?;
    let work_a = ctx.allocate_init(
        bytemuck::cast_slice(input),
        WORK_USAGE,
        "spiral_fft.exec.work_a",
    )?;
    run(ctx, plan, None, work_a)
}

fn ensure_binding<S: FftSample>(ctx: &DeviceContext, plan: &FftPlan, input_len: u64) -> Result<()> {
    if plan.device_id != ctx.id() {
        return Err(FftError::execution(format!(
            "plan is bound to device {} but was submitted on device {}",
            plan.device_id,
            ctx.id()
        )));
    }
    // A context re-created after a drop keeps the id but not the generation;
    // plans from the released context must not reach the backend.
    if plan.generation != ctx.generation() {
        return Err(FftError::execution(format!(
            "plan was compiled on a released context of device {}; request a new plan",
            ctx.id()
        )));
    }
    if S::PRECISION != plan.key.precision() {
        return Err(FftError::transfer(format!(
            "input precision {} does not match plan precision {}",
            S::PRECISION,
            plan.key.precision()
        )));
    }
    if input_len != plan.total {
        return Err(FftError::transfer(format!(
            "input holds {input_len} elements but the plan expects {} ({} instances of {})",
            plan.total,
            plan.key.batch(),
            plan.volume
        )));
    }
    Ok(())
}

fn run<S: FftSample>(
    ctx: &DeviceContext,
    plan: &FftPlan,
    real_input: Option<&DeviceBuffer>,
    work_a: DeviceBuffer,
) -> Result<Vec<Complex<S>>> {
    let device = ctx.device();
    let work_b = if plan.stages.is_empty() {
        None
    } else {
        Some(ctx.allocate(plan.complex_bytes, WORK_USAGE, "spiral_fft.exec.work_b")?)
    };
    let staging = ctx.allocate(
        plan.complex_bytes,
        wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        "spiral_fft.exec.staging",
    )?;

    // ping-pong parity decides where the spectrum lands
    let final_buffer = match (&work_b, plan.stages.len() % 2) {
        (Some(b), 1) => b,
        _ => &work_a,
    };

    let limit = ctx.limits().max_compute_workgroups_per_dimension;
    // bind-group creation validates against the device and can panic like
    // submission, so it stays under the unwind guard
    catch_unwind(AssertUnwindSafe(|| {
        let pack_group = real_input.map(|input| {
            bind_group(
                device,
                plan,
                input,
                &work_a,
                &plan.pack_params,
                "spiral_fft.exec.pack",
            )
        });
        let mut stage_groups = Vec::with_capacity(plan.stages.len());
        if let Some(work_b) = &work_b {
            for (index, stage) in plan.stages.iter().enumerate() {
                let (src, dst) = if index % 2 == 0 {
                    (&work_a, work_b)
                } else {
                    (work_b, &work_a)
                };
                let label = format!("spiral_fft.exec.stage{index}");
                stage_groups.push(bind_group(device, plan, src, dst, &stage.params, &label));
            }
        }
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("spiral_fft.exec.encoder"),
        });
        if let Some(group) = &pack_group {
            let (gx, gy) = workgroup_grid(plan.total as u32, plan.workgroup, limit);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("spiral_fft.exec.pack"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&plan.pack_pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.dispatch_workgroups(gx, gy, 1);
        }
        for (stage, group) in plan.stages.iter().zip(&stage_groups) {
            let (gx, gy) = workgroup_grid(stage.desc.threads, plan.workgroup, limit);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("spiral_fft.exec.stage"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&plan.stage_pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.dispatch_workgroups(gx, gy, 1);
        }
        encoder.copy_buffer_to_buffer(final_buffer.raw(), 0, staging.raw(), 0, plan.complex_bytes);
        ctx.queue().submit(Some(encoder.finish()));
    }))
    .map_err(|payload| {
        FftError::execution(format!(
            "device dispatch panicked: {}",
            panic_payload_to_string(payload)
        ))
    })?;

    let scalars = read_back::<S>(ctx, &staging)?;
    trace!(
        device = ctx.id(),
        key = %plan.key,
        elements = plan.total,
        "transform complete"
    );
    Ok(collect_complex(&scalars))
}

fn bind_group(
    device: &wgpu::Device,
    plan: &FftPlan,
    src: &DeviceBuffer,
    dst: &DeviceBuffer,
    params: &DeviceBuffer,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &plan.bind_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: src.raw().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: dst.raw().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: plan.twiddles.raw().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: params.raw().as_entire_binding(),
            },
        ],
    })
}

fn read_back<S: FftSample>(ctx: &DeviceContext, staging: &DeviceBuffer) -> Result<Vec<S>> {
    let slice = staging.raw().slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = ctx.device().poll(wgpu::Maintain::Wait);
    match pollster::block_on(receiver.receive()) {
        Some(Ok(())) => {}
        Some(Err(err)) => {
            return Err(FftError::transfer(format!(
                "output readback mapping failed: {err}"
            )))
        }
        None => {
            return Err(FftError::transfer(
                "output readback channel closed before completion",
            ))
        }
    }
    let data = slice.get_mapped_range();
    let scalars = bytemuck::cast_slice::<u8, S>(&data).to_vec();
    drop(data);
    staging.raw().unmap();
    Ok(scalars)
}

fn collect_complex<S: FftSample>(scalars: &[S]) -> Vec<Complex<S>> {
    scalars
        .chunks_exact(2)
        .map(|pair| Complex::new(pair[0], pair[1]))
        .collect()
}

/// Splits `threads` over a (x, y) workgroup grid, honoring the per-dimension
/// dispatch limit; the kernels flatten the grid back with `num_workgroups`.
pub(crate) fn workgroup_grid(threads: u32, workgroup: u32, max_per_dimension: u32) -> (u32, u32) {
    let groups = threads.div_ceil(workgroup).max(1);
    if groups <= max_per_dimension {
        (groups, 1)
    } else {
        let rows = groups.div_ceil(max_per_dimension);
        (groups.div_ceil(rows), rows)
    }
}
