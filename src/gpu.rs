//! Device acquisition and capability probing
//!
//! Unlike a global context singleton, every accelerated engine owns its
//! GpuContext so device buffers are released deterministically on dispose.

use crate::error::{EngineError, EngineResult};

/// Owned wgpu device/queue/adapter triple for one engine instance.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
}

/// Capability report for the active adapter, probed once at engine
/// construction.
#[derive(Debug, Clone)]
pub struct EngineCaps {
    /// Backend identifier (vulkan, dx12, metal, gl)
    pub backend: String,

    /// Adapter name from driver
    pub adapter_name: String,

    /// Device type (integrated, discrete, virtual, cpu, other)
    pub device_type: String,

    /// Maximum storage buffer binding size; bounds the packed scene size
    pub max_storage_buffer_binding_size: u32,

    /// Maximum invocations per compute workgroup
    pub max_compute_invocations_per_workgroup: u32,

    /// Whether the accelerated path is usable on this instance
    pub parallel_available: bool,
}

impl EngineCaps {
    /// Caps for an instance running without any device (reference-only).
    pub fn reference_only() -> Self {
        Self {
            backend: "none".into(),
            adapter_name: "reference engine".into(),
            device_type: "cpu".into(),
            max_storage_buffer_binding_size: 0,
            max_compute_invocations_per_workgroup: 0,
            parallel_available: false,
        }
    }

    fn from_adapter(adapter: &wgpu::Adapter, device: &wgpu::Device) -> Self {
        let info = adapter.get_info();
        let limits = device.limits();
        Self {
            backend: format!("{:?}", info.backend).to_lowercase(),
            adapter_name: info.name.clone(),
            device_type: format!("{:?}", info.device_type).to_lowercase(),
            max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
            max_compute_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            parallel_available: true,
        }
    }
}

impl GpuContext {
    /// Probe for an adapter with compute support and request a device.
    ///
    /// Returns `EngineError::Capability` when no suitable adapter exists or
    /// the device request is refused; callers treat that as a downgrade to
    /// the reference engine, never as a hard failure.
    pub fn new() -> EngineResult<(Self, EngineCaps)> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| EngineError::capability("no suitable GPU adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                label: Some("luxtrace-device"),
            },
            None,
        ))
        .map_err(|e| EngineError::capability(format!("request_device failed: {e}")))?;

        let caps = EngineCaps::from_adapter(&adapter, &device);
        Ok((
            GpuContext {
                device,
                queue,
                adapter,
            },
            caps,
        ))
    }
}
