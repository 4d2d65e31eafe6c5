// src/engine/gpu.rs
// Parallel engine: wgpu compute megakernel, progressive accumulation and
// transparent fallback onto the internal reference engine.
// RELEVANT FILES: src/engine/layout.rs, src/engine/readback.rs, src/shaders/pt_kernel.wgsl

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use log::{debug, warn};
use wgpu::util::DeviceExt;

use super::layout::{self, PackedScene};
use super::params::{SimulationParameters, CONVERGENCE_CHECK_INTERVAL, SAMPLES_PER_FRAME};
use super::readback::{decode_results, read_accumulator, relative_delta};
use super::reference::ReferenceRaytracer;
use super::{preflight, RunRecord, Raytracer};
use crate::error::{EngineError, EngineResult};
use crate::gpu::{EngineCaps, GpuContext};
use crate::sampling::RR_WARMUP_BOUNCES;
use crate::scene::Scene;
use crate::stats::{statistics_from_results, IlluminanceResult, SimulationStatistics};

const WORKGROUP_SIZE: u32 = 64;

/// Per-frame uniform block. Mirrors the WGSL `Uniforms` struct exactly;
/// the vec4 members must stay 16-byte aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Uniforms {
    point_count: u32,
    surface_count: u32,
    light_count: u32,
    has_bounds: u32,
    frame_index: u32,
    samples_per_frame: u32,
    max_bounces: u32,
    seed_lo: u32,
    seed_hi: u32,
    rr_warmup: u32,
    _pad: [u32; 2],
    room_min: [f32; 4],
    room_max: [f32; 4],
}

/// Device-side image of the uploaded scene; rebuilt only on scene change.
struct SceneBuffers {
    bind_group: wgpu::BindGroup,
    packed: PackedScene,
}

struct Pipeline {
    compute: wgpu::ComputePipeline,
    bgl_uniforms: wgpu::BindGroupLayout,
    bgl_scene: wgpu::BindGroupLayout,
    bgl_run: wgpu::BindGroupLayout,
}

/// Accelerated engine. Holds a reference engine and delegates to it when
/// the device is unavailable (permanently, after a failed capability probe
/// or shader build) or fails mid-call (for that call only).
pub struct GpuRaytracer {
    ctx: Option<GpuContext>,
    pipeline: Option<Pipeline>,
    scene_buffers: Option<SceneBuffers>,
    scene: Option<Scene>,
    caps: EngineCaps,
    disabled_reason: Option<String>,
    fallback: ReferenceRaytracer,
    last: Option<RunRecord>,
    disposed: bool,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuRaytracer {
    /// Probe for a compute device and build the kernel pipeline.
    ///
    /// Returns `Err(Capability)` only when no device exists at all (the
    /// factory then constructs a plain reference engine). A shader build
    /// failure yields a working instance with acceleration disabled.
    pub fn new() -> EngineResult<Self> {
        let (ctx, caps) = GpuContext::new()?;
        let mut engine = Self {
            ctx: Some(ctx),
            pipeline: None,
            scene_buffers: None,
            scene: None,
            caps,
            disabled_reason: None,
            fallback: ReferenceRaytracer::new(),
            last: None,
            disposed: false,
        };
        if let Err(e) = engine.build_pipeline() {
            engine.disable_acceleration(&e.to_string());
        }
        Ok(engine)
    }

    /// Construct an instance whose accelerated path is unavailable from the
    /// start, as after a failed capability probe. Used by the factory
    /// contract tests to exercise the fallback path deterministically.
    pub fn reference_only(reason: &str) -> Self {
        let mut engine = Self {
            ctx: None,
            pipeline: None,
            scene_buffers: None,
            scene: None,
            caps: EngineCaps::reference_only(),
            disabled_reason: None,
            fallback: ReferenceRaytracer::new(),
            last: None,
            disposed: false,
        };
        engine.disable_acceleration(reason);
        engine
    }

    pub fn acceleration_available(&self) -> bool {
        self.disabled_reason.is_none() && self.ctx.is_some() && self.pipeline.is_some()
    }

    /// Permanently mark this instance reference-only. Non-fatal by
    /// contract: subsequent calls silently use the reference engine.
    pub fn disable_acceleration(&mut self, reason: &str) {
        warn!("acceleration disabled: {reason}; delegating to reference engine");
        self.disabled_reason = Some(reason.to_string());
        self.caps.parallel_available = false;
        self.pipeline = None;
        self.scene_buffers = None;
        self.ctx = None;
    }

    fn build_pipeline(&mut self) -> EngineResult<()> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| EngineError::capability("no device context"))?;
        let device = &ctx.device;

        // Validation errors from shader/pipeline creation arrive through
        // the error scope, not as Results.
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pt_kernel"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/pt_kernel.wgsl").into()),
        });

        let bgl_uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lux-bgl-uniforms"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let bgl_scene = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lux-bgl-scene"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, true),
                storage_entry(6, true),
            ],
        });
        let bgl_run = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lux-bgl-run"),
            entries: &[storage_entry(0, true), storage_entry(1, false)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lux-pt-pipeline-layout"),
            bind_group_layouts: &[&bgl_uniforms, &bgl_scene, &bgl_run],
            push_constant_ranges: &[],
        });

        let compute = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("lux-pt-compute"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(EngineError::shader_build(format!("{err}")));
        }

        self.pipeline = Some(Pipeline {
            compute,
            bgl_uniforms,
            bgl_scene,
            bgl_run,
        });
        Ok(())
    }

    /// Pack the scene into layout v1 and upload it once; re-uploaded only
    /// when the scene changes.
    fn stage_scene(&mut self, scene: &Scene) -> EngineResult<()> {
        let (Some(ctx), Some(pipeline)) = (self.ctx.as_ref(), self.pipeline.as_ref()) else {
            return Ok(());
        };
        let device = &ctx.device;
        let packed = layout::pack(scene);

        let make = |label: &str, data: &[[f32; 4]]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &PackedScene::padded_bytes(data),
                usage: wgpu::BufferUsages::STORAGE,
            })
        };

        let vertices = make("lux-surface-vertices", &packed.surface_vertices);
        let normals = make("lux-surface-normals", &packed.surface_normals);
        let materials = make("lux-surface-materials", &packed.surface_materials);
        let faces = make("lux-face-materials", &packed.face_materials);
        let light_pos = make("lux-light-positions", &packed.light_positions);
        let light_dir = make("lux-light-directions", &packed.light_directions);
        let light_par = make("lux-light-params", &packed.light_params);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lux-bg-scene"),
            layout: &pipeline.bgl_scene,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: vertices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: normals.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: materials.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: faces.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: light_pos.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: light_dir.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: light_par.as_entire_binding(),
                },
            ],
        });

        self.scene_buffers = Some(SceneBuffers { bind_group, packed });
        Ok(())
    }

    /// Progressive frame loop: dispatch, periodic convergence check via
    /// blocking readback, final decode. Returns the results plus how many
    /// frames ran and whether the loop stopped on the threshold.
    fn run_gpu(
        &mut self,
        points: &[Vec3],
        params: &SimulationParameters,
    ) -> EngineResult<(Vec<IlluminanceResult>, u32, bool)> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| EngineError::device("device context missing"))?;
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| EngineError::device("pipeline missing"))?;
        let buffers = self
            .scene_buffers
            .as_ref()
            .ok_or_else(|| EngineError::device("scene not staged"))?;
        let scene = self
            .scene
            .as_ref()
            .ok_or_else(|| EngineError::device("host scene missing"))?;
        let device = &ctx.device;
        let queue = &ctx.queue;

        let seed = params.seed.unwrap_or_else(rand::random);
        let header = &buffers.packed.header;
        let mut uniforms = Uniforms {
            point_count: points.len() as u32,
            surface_count: header.surface_count,
            light_count: header.light_count,
            has_bounds: header.has_bounds,
            frame_index: 0,
            samples_per_frame: SAMPLES_PER_FRAME,
            max_bounces: params.max_bounces,
            seed_lo: seed as u32,
            seed_hi: (seed >> 32) as u32,
            rr_warmup: RR_WARMUP_BOUNCES,
            _pad: [0; 2],
            room_min: header.room_min,
            room_max: header.room_max,
        };

        let ubo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lux-ubo"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let point_data: Vec<[f32; 4]> = points.iter().map(|p| [p.x, p.y, p.z, 0.0]).collect();
        let points_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lux-points"),
            contents: bytemuck::cast_slice(&point_data),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let accum_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lux-accum"),
            size: (points.len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let bg_uniforms = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lux-bg-uniforms"),
            layout: &pipeline.bgl_uniforms,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: ubo.as_entire_binding(),
            }],
        });
        let bg_run = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lux-bg-run"),
            layout: &pipeline.bgl_run,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: points_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: accum_buf.as_entire_binding(),
                },
            ],
        });

        // Runtime device errors (OOM, lost device) surface through these
        // scopes and trigger the per-call fallback retry. The scopes must be
        // popped on every exit path, so the frame loop runs inside a closure
        // and its error propagates only after both pops.
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let budget = params.frame_budget();
        let groups = points.len().div_ceil(WORKGROUP_SIZE as usize) as u32;

        let loop_result = (|| -> EngineResult<(Vec<f32>, u32, bool)> {
            let mut snapshot: Option<Vec<f32>> = None;
            let mut frames_run = budget;
            let mut converged = false;

            for frame in 0..budget {
                uniforms.frame_index = frame;
                queue.write_buffer(&ubo, 0, bytemuck::bytes_of(&uniforms));

                let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("lux-frame-encoder"),
                });
                {
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("lux-pt-pass"),
                        ..Default::default()
                    });
                    cpass.set_pipeline(&pipeline.compute);
                    cpass.set_bind_group(0, &bg_uniforms, &[]);
                    cpass.set_bind_group(1, &buffers.bind_group, &[]);
                    cpass.set_bind_group(2, &bg_run, &[]);
                    cpass.dispatch_workgroups(groups, 1, 1);
                }
                queue.submit([encoder.finish()]);

                if (frame + 1) % CONVERGENCE_CHECK_INTERVAL == 0 && frame + 1 < budget {
                    let current = read_accumulator(device, queue, &accum_buf, points.len())?;
                    if let Some(prev) = &snapshot {
                        let delta = relative_delta(&current, prev);
                        debug!("frame {}: accumulator delta {delta:.3e}", frame + 1);
                        if delta < params.convergence_threshold {
                            frames_run = frame + 1;
                            converged = true;
                            break;
                        }
                    }
                    snapshot = Some(current);
                }
            }

            let final_accum = read_accumulator(device, queue, &accum_buf, points.len())?;
            Ok((final_accum, frames_run, converged))
        })();

        let oom = pollster::block_on(device.pop_error_scope());
        let validation = pollster::block_on(device.pop_error_scope());
        let (final_accum, frames_run, converged) = loop_result?;
        if let Some(err) = oom.or(validation) {
            return Err(EngineError::device(format!("{err}")));
        }

        let results = decode_results(scene, params, points, &final_accum)?;
        Ok((results, frames_run, converged))
    }
}

impl Raytracer for GpuRaytracer {
    fn upload_scene(&mut self, scene: &Scene) -> EngineResult<()> {
        super::ensure_live(self.disposed)?;
        scene.validate()?;
        // The fallback engine always carries the scene so a mid-call
        // delegation needs no extra staging.
        self.fallback.upload_scene(scene)?;
        self.scene = Some(scene.clone());
        self.stage_scene(scene)?;
        Ok(())
    }

    fn run_simulation(
        &mut self,
        points: &[Vec3],
        params: &SimulationParameters,
    ) -> EngineResult<Vec<IlluminanceResult>> {
        preflight(self.disposed, self.scene.as_ref(), params)?;
        if points.is_empty() {
            self.last = Some(RunRecord {
                results: vec![],
                samples_per_point: 0,
                converged_early: false,
            });
            return Ok(vec![]);
        }

        let outcome = if self.acceleration_available() {
            match self.run_gpu(points, params) {
                Ok(ok) => Some(ok),
                Err(e) if e.is_retryable() => {
                    warn!("accelerated pass failed ({e}); retrying on reference engine");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let record = match outcome {
            Some((results, frames_run, converged_early)) => RunRecord {
                results,
                samples_per_point: frames_run * SAMPLES_PER_FRAME,
                converged_early,
            },
            None => {
                let results = self.fallback.run_simulation(points, params)?;
                RunRecord {
                    results,
                    samples_per_point: params.rays_per_point,
                    converged_early: false,
                }
            }
        };
        self.last = Some(record.clone());
        Ok(record.results)
    }

    fn statistics(&self) -> EngineResult<SimulationStatistics> {
        super::ensure_live(self.disposed)?;
        let record = self.last.as_ref().ok_or(EngineError::NoResults)?;
        statistics_from_results(
            &record.results,
            record.samples_per_point,
            record.converged_early,
        )
    }

    fn caps(&self) -> &EngineCaps {
        &self.caps
    }

    fn dispose(&mut self) {
        // Buffers, pipeline and device drop here; wgpu reclaims device
        // memory when the last handle goes away.
        self.scene_buffers = None;
        self.pipeline = None;
        self.ctx = None;
        self.scene = None;
        self.last = None;
        self.fallback.dispose();
        self.disposed = true;
    }
}
