//! A provider graph for dependency injection.
//!
//! Constructors are registered with the types they need and the types they provide. Requesting a
//! value builds exactly what it depends on, calling each constructor at most once. Scopes form a
//! tree: a scope sees everything its ancestors provide, decorators replace values for a scope and
//! its descendants.
//!
//! ```
//! use std::{convert::Infallible, sync::Arc};
//! use wrapp_graph::Container;
//!
//! struct Config { port: u16 }
//! struct Server { port: u16 }
//!
//! let container = Container::new();
//! container.provide(|| Ok::<_, Infallible>(Config { port: 8080 })).unwrap();
//! container
//!     .provide(|config: Arc<Config>| Ok::<_, Infallible>(Server { port: config.port }))
//!     .unwrap();
//!
//! let server = container.resolve::<Server>().unwrap();
//! assert_eq!(server.port, 8080);
//! ```

mod constructor;
mod container;
mod cycle;
mod decorator;
mod deferred;
mod errors;
mod inject;
mod key;
mod node;
mod output;
mod param;
mod scheduler;
mod scope;
mod types;

pub use constructor::{
    Arguments, Constructor, ConstructorBuilder, ConstructorFn, Outputs, ProvideInfo,
    ProvideOptions,
};
pub use container::{Container, ContainerBuilder, ContainerOptions};
pub use cycle::{CycleEntry, CyclePath};
pub use deferred::{BuildResult, Deferred};
pub use errors::DiError;
pub use inject::{Group, GroupTag, Inject, IntoConstructor, Invocable, Named, Tag};
pub use key::Key;
pub use output::{Output, OutputValue};
pub use param::{Param, ParamValue};
pub use scheduler::{Scheduler, SchedulerKind, Synchronous, Work, WorkerPool};
pub use scope::Scope;
pub use types::{DynError, Injectable, Instance, SharedError, TypeInfo};
