//! Scheduling and execution configuration.
//!
//! A [`Context`] describes which devices are enabled, how many threads the
//! scheduler may hand out, and which allocators back each device. It is
//! built in code by the surrounding runtime:
//!
//! ```
//! use strata_core::{Context, GpuDeviceInfo};
//!
//! let context = Context::new()
//!     .with_thread_num(4)
//!     .with_parallel(true)
//!     .with_gpu(GpuDeviceInfo { enable_fp16: true });
//! assert!(context.is_gpu_enabled());
//! ```

use crate::allocator::{Allocator, DefaultAllocator};
use crate::types::DeviceType;
use crate::{Error, Result};
use std::sync::Arc;

/// CPU options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuDeviceInfo {
    /// Prefer float16 kernels for float32 nodes.
    pub enable_fp16: bool,
}

/// GPU options. Presence in [`Context::gpu`] enables the GPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuDeviceInfo {
    /// Select float16 GPU kernels for float32 nodes.
    pub enable_fp16: bool,
}

/// NPU options. Presence in [`Context::npu`] enables the NPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NpuDeviceInfo {
    pub frequency: u32,
}

/// A third-party kernel provider.
#[derive(Debug, Clone)]
pub struct ProviderDevice {
    /// Provider name, matched against [`crate::KernelKey::provider`].
    pub provider: String,
    /// Architecture the provider's kernels run on.
    pub device: DeviceType,
    /// Allocator for intermediate tensors of the provider's kernels.
    pub allocator: Option<Arc<dyn Allocator>>,
}

/// Scheduler and runtime configuration.
#[derive(Debug, Clone)]
pub struct Context {
    /// Total threads available to the graph.
    pub thread_num: usize,

    /// Run the cost-balanced partitioner before scheduling.
    pub enable_parallel: bool,

    pub cpu: CpuDeviceInfo,
    pub gpu: Option<GpuDeviceInfo>,
    pub npu: Option<NpuDeviceInfo>,

    /// Custom kernel providers, probed before the builtin kernels.
    pub providers: Vec<ProviderDevice>,

    /// Emit float32 CPU kernels as plain top-level kernels instead of
    /// wrapping each run of them into a CPU subgraph.
    pub flatten_cpu_subgraphs: bool,

    allocator: Arc<dyn Allocator>,
    gpu_allocator: Arc<dyn Allocator>,
    npu_allocator: Arc<dyn Allocator>,
}

impl Context {
    /// Create a CPU-only context with two threads.
    pub fn new() -> Self {
        Self {
            thread_num: 2,
            enable_parallel: false,
            cpu: CpuDeviceInfo::default(),
            gpu: None,
            npu: None,
            providers: Vec::new(),
            flatten_cpu_subgraphs: false,
            allocator: Arc::new(DefaultAllocator::new("cpu")),
            gpu_allocator: Arc::new(DefaultAllocator::new("gpu")),
            npu_allocator: Arc::new(DefaultAllocator::new("npu")),
        }
    }

    pub fn with_thread_num(mut self, thread_num: usize) -> Self {
        self.thread_num = thread_num;
        self
    }

    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.enable_parallel = enable;
        self
    }

    pub fn with_cpu_fp16(mut self, enable: bool) -> Self {
        self.cpu.enable_fp16 = enable;
        self
    }

    pub fn with_gpu(mut self, info: GpuDeviceInfo) -> Self {
        self.gpu = Some(info);
        self
    }

    pub fn with_npu(mut self, info: NpuDeviceInfo) -> Self {
        self.npu = Some(info);
        self
    }

    pub fn with_provider(mut self, provider: ProviderDevice) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_flatten_cpu_subgraphs(mut self, flatten: bool) -> Self {
        self.flatten_cpu_subgraphs = flatten;
        self
    }

    /// Replace the graph-level (CPU) allocator.
    pub fn with_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn is_gpu_enabled(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn is_npu_enabled(&self) -> bool {
        self.npu.is_some()
    }

    pub fn is_cpu_fp16_enabled(&self) -> bool {
        self.cpu.enable_fp16
    }

    pub fn is_gpu_fp16_enabled(&self) -> bool {
        self.gpu.is_some_and(|gpu| gpu.enable_fp16)
    }

    /// Long-lived allocator for graph inputs, constants and CPU kernels.
    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Allocator for tensors produced on `device`.
    pub fn allocator_for(&self, device: DeviceType) -> Arc<dyn Allocator> {
        match device {
            DeviceType::Cpu => self.allocator.clone(),
            DeviceType::Gpu => self.gpu_allocator.clone(),
            DeviceType::Npu => self.npu_allocator.clone(),
        }
    }

    /// Allocator registered for a kernel provider, if any.
    pub fn provider_allocator(&self, provider: &str) -> Option<Arc<dyn Allocator>> {
        self.providers
            .iter()
            .find(|p| p.provider == provider)
            .and_then(|p| p.allocator.clone())
    }

    /// Check the configuration before scheduling.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no threads are available.
    pub fn validate(&self) -> Result<()> {
        if self.thread_num == 0 {
            return Err(Error::Config("thread_num must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_cpu_only() {
        let context = Context::default();
        assert_eq!(context.thread_num, 2);
        assert!(!context.is_gpu_enabled());
        assert!(!context.is_npu_enabled());
        assert!(!context.is_cpu_fp16_enabled());
        context.validate().unwrap();
    }

    #[test]
    fn test_device_allocators_are_distinct() {
        let context = Context::new().with_gpu(GpuDeviceInfo::default());
        assert_eq!(context.allocator_for(DeviceType::Cpu).name(), "cpu");
        assert_eq!(context.allocator_for(DeviceType::Gpu).name(), "gpu");
        assert_eq!(context.allocator_for(DeviceType::Npu).name(), "npu");
    }

    #[test]
    fn test_provider_allocator_lookup() {
        let allocator: Arc<dyn Allocator> = Arc::new(DefaultAllocator::new("vendor"));
        let context = Context::new().with_provider(ProviderDevice {
            provider: "vendor".to_string(),
            device: DeviceType::Cpu,
            allocator: Some(allocator),
        });
        assert_eq!(
            context.provider_allocator("vendor").map(|a| a.name().to_string()),
            Some("vendor".to_string())
        );
        assert!(context.provider_allocator("other").is_none());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let context = Context::new().with_thread_num(0);
        assert!(matches!(context.validate(), Err(Error::Config(_))));
    }
}
