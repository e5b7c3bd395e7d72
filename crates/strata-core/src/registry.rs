//! Registries for shape functions and kernel implementations.
//!
//! Both registries are plain values owned by the caller and passed to the
//! scheduler by reference.

use crate::kernel::{KernelCreateCtx, OpKernel};
use crate::operator::Operator;
use crate::types::{DataType, DeviceType};
use crate::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shape functions by op type name.
///
/// ```ignore
/// let mut operators = OperatorRegistry::new();
/// operators.register("Add", SameShape).register("Conv2D", ConvShape);
/// let add = operators.get("Add").unwrap();
/// ```
#[derive(Default)]
pub struct OperatorRegistry {
    by_op: HashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `operator` for `op_type`, replacing any earlier one.
    pub fn register<O>(&mut self, op_type: &str, operator: O) -> &mut Self
    where
        O: Operator + 'static,
    {
        self.by_op.insert(op_type.to_owned(), Arc::new(operator));
        self
    }

    pub fn get(&self, op_type: &str) -> Option<&Arc<dyn Operator>> {
        self.by_op.get(op_type)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.by_op.contains_key(op_type)
    }

    pub fn len(&self) -> usize {
        self.by_op.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_op.is_empty()
    }
}

/// Lookup key of a kernel implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub arch: DeviceType,
    pub data_type: DataType,
    pub op_type: String,
    /// Third-party provider; `None` for builtin kernels.
    pub provider: Option<String>,
}

impl KernelKey {
    /// Key of a builtin kernel.
    pub fn new(arch: DeviceType, data_type: DataType, op_type: impl Into<String>) -> Self {
        Self {
            arch,
            data_type,
            op_type: op_type.into(),
            provider: None,
        }
    }

    /// Same key, served by `provider`.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.arch, self.data_type, self.op_type)?;
        if let Some(provider) = &self.provider {
            write!(f, " from '{provider}'")?;
        }
        Ok(())
    }
}

/// Constructor of a kernel implementation.
pub type KernelCreator =
    Arc<dyn Fn(&KernelCreateCtx<'_>) -> Result<Box<dyn OpKernel>> + Send + Sync>;

/// Kernel creators keyed by [`KernelKey`].
#[derive(Default)]
pub struct KernelRegistry {
    creators: HashMap<KernelKey, KernelCreator>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `creator` under `key`, replacing any earlier one.
    pub fn register<F>(&mut self, key: KernelKey, creator: F) -> &mut Self
    where
        F: Fn(&KernelCreateCtx<'_>) -> Result<Box<dyn OpKernel>> + Send + Sync + 'static,
    {
        self.creators.insert(key, Arc::new(creator));
        self
    }

    pub fn get(&self, key: &KernelKey) -> Option<&KernelCreator> {
        self.creators.get(key)
    }

    pub fn contains(&self, key: &KernelKey) -> bool {
        self.creators.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.creators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelCtx;
    use crate::operator::{InferCtx, InferOutcome};

    struct Deferring(&'static str);
    impl Operator for Deferring {
        fn name(&self) -> &str {
            self.0
        }
        fn infer_shapes(&self, _ctx: &InferCtx<'_>) -> Result<InferOutcome> {
            Ok(InferOutcome::Deferred)
        }
    }

    struct Nop;
    impl OpKernel for Nop {
        fn run(&mut self, _ctx: &mut KernelCtx<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_operator_lookup_by_op_type() {
        let mut operators = OperatorRegistry::new();
        assert!(operators.is_empty());
        operators
            .register("Add", Deferring("Add"))
            .register("Conv2D", Deferring("Conv2D"));

        assert_eq!(operators.len(), 2);
        assert!(operators.contains("Conv2D"));
        assert_eq!(operators.get("Add").map(|op| op.name()), Some("Add"));
        assert!(operators.get("Relu").is_none());
    }

    #[test]
    fn test_operator_reregistration_replaces() {
        let mut operators = OperatorRegistry::new();
        operators
            .register("Add", Deferring("first"))
            .register("Add", Deferring("second"));

        assert_eq!(operators.len(), 1);
        assert_eq!(operators.get("Add").map(|op| op.name()), Some("second"));
    }

    #[test]
    fn test_kernel_keys_distinguish_arch_and_type() {
        let mut registry = KernelRegistry::new();
        registry
            .register(KernelKey::new(DeviceType::Cpu, DataType::F32, "Add"), |_| {
                Ok(Box::new(Nop))
            })
            .register(KernelKey::new(DeviceType::Cpu, DataType::F16, "Add"), |_| {
                Ok(Box::new(Nop))
            });

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&KernelKey::new(DeviceType::Cpu, DataType::F16, "Add")));
        assert!(!registry.contains(&KernelKey::new(DeviceType::Gpu, DataType::F32, "Add")));
        assert!(!registry.contains(
            &KernelKey::new(DeviceType::Cpu, DataType::F32, "Add").with_provider("vendor")
        ));
    }

    #[test]
    fn test_key_display_names_triple() {
        let key = KernelKey::new(DeviceType::Gpu, DataType::F16, "Conv2D");
        assert_eq!(key.to_string(), "(gpu, float16, Conv2D)");
        assert_eq!(
            key.with_provider("acme").to_string(),
            "(gpu, float16, Conv2D) from 'acme'"
        );
    }
}
