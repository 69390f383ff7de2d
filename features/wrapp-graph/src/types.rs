use std::{
    any::{Any, TypeId},
    sync::Arc,
};

/// Error returned by user constructors
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// A constructor error once it has been handed to the graph.
///
/// Errors are shared between every requester of a failed build, so they must be cheap to clone.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Constructors may run on worker threads of the parallel scheduler,
/// so anything injectable needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// A value held by the graph
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    pub instance: Arc<dyn Any + Send + Sync + 'static>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instance").field(&self.info.type_name).finish()
    }
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            instance: Arc::new(instance),
        }
    }

    /// Stand-in committed for `info` when constructors are skipped in dry-run mode.
    ///
    /// Downcasting a placeholder always fails.
    pub(crate) fn placeholder(info: TypeInfo) -> Self {
        Instance {
            info,
            instance: Arc::new(Placeholder),
        }
    }

    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.instance.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.info.type_name),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.instance.is::<Placeholder>()
    }
}

struct Placeholder;

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}
