//! Render Settings Configuration
//!
//! This module defines the configuration options for the renderer
//! façade.
//!
//! # Overview
//!
//! | Group | Controls |
//! |-------|----------|
//! | `frames_in_flight` | Depth of every per-frame ring |
//! | `debug` | API validation toggles |
//! | `device` | Adapter selection and minimum capabilities |
//! | `window` | Presentation surface creation |
//! | `blackboard` | Local and transient allocator sizing |
//! | `descriptor_heap` | Initial per-frame descriptor capacity |
//! | `categories` | Pool defaults and staging uploader sizing |
//! | `information` | Telemetry toggles |
//!
//! Device and window creation themselves happen outside the core (the
//! façade receives an already constructed device and swapchain); those
//! groups exist so an application can hand one configuration record to
//! both its backend factory and the renderer.

use crate::errors::{QuarryError, Result};
use crate::frame::{CategorySettings, LocalMemoryInfo, TransientMemoryInfo};

/// API validation toggles.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DebugSettings {
    pub use_debug_layer: bool,
    pub use_gpu_validation: bool,
}

/// Adapter selection and minimum device capabilities.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DeviceSettings {
    /// Pin to a specific adapter; `-1` means "first matching".
    pub adapter_index: i32,
    /// Minimum feature level, encoded the backend's way.
    pub required_feature_level: u32,
    /// Minimum raytracing tier; zero accepts any.
    pub rt_tier: u32,
    /// Minimum shader model, encoded the backend's way.
    pub shader_model: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            adapter_index: -1,
            required_feature_level: 0,
            rt_tier: 0,
            shader_model: 0,
        }
    }
}

/// Presentation window creation options.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct WindowSettings {
    pub class_name: String,
    pub title: String,
    pub size: (u32, u32),
    pub windowed: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            class_name: "quarry".into(),
            title: "quarry".into(),
            size: (1280, 720),
            windowed: true,
        }
    }
}

/// Sizing of the per-frame blackboard allocators.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BlackboardSettings {
    pub local: LocalMemoryInfo,
    pub transient: TransientMemoryInfo,
}

/// Managed descriptor heap sizing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DescriptorHeapSettings {
    /// Initial per-frame descriptor capacity; doubles on overflow.
    pub start_descriptors_per_frame: u32,
}

impl Default for DescriptorHeapSettings {
    fn default() -> Self {
        Self {
            start_descriptors_per_frame: 1000,
        }
    }
}

/// Telemetry toggles. Collection itself lives outside the core; the
/// façade only carries the switches.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InformationSettings {
    pub perform_timings_cpu: bool,
    pub perform_timings_gpu: bool,
    pub render_imgui: bool,
}

impl Default for InformationSettings {
    fn default() -> Self {
        Self {
            perform_timings_cpu: true,
            perform_timings_gpu: true,
            render_imgui: true,
        }
    }
}

/// Configuration of the renderer façade.
#[derive(Clone, PartialEq, Debug)]
pub struct RenderSettings {
    /// Number of frames that may be in flight simultaneously.
    pub frames_in_flight: usize,
    pub debug: DebugSettings,
    pub device: DeviceSettings,
    pub window: WindowSettings,
    pub blackboard: BlackboardSettings,
    pub descriptor_heap: DescriptorHeapSettings,
    pub categories: CategorySettings,
    pub information: InformationSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            debug: DebugSettings::default(),
            device: DeviceSettings::default(),
            window: WindowSettings::default(),
            blackboard: BlackboardSettings::default(),
            descriptor_heap: DescriptorHeapSettings::default(),
            categories: CategorySettings::default(),
            information: InformationSettings::default(),
        }
    }
}

impl RenderSettings {
    /// Reject out-of-range or inconsistent settings before any GPU
    /// object is created.
    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.frames_in_flight) {
            return Err(QuarryError::InvalidConfiguration(format!(
                "frames_in_flight must be between 1 and 8, got {}",
                self.frames_in_flight
            )));
        }
        if self.descriptor_heap.start_descriptors_per_frame == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "start_descriptors_per_frame must be non-zero".into(),
            ));
        }
        if self.categories.static_upload.size == 0 || self.categories.dynamic_upload.size == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "staging uploader sizes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
