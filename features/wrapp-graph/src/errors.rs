use std::error::Error as StdError;

use thiserror::Error;

use crate::{cycle::CyclePath, key::Key, types::SharedError};

/// Errors raised while registering or building the provider graph
///
/// Errors are wrapped once per graph level, so the chain of a build failure reads from the
/// invoked function down to the constructor that caused it. Use [DiError::root_cause] to
/// get to the original error.
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// A key was malformed
    #[error("invalid key for '{type_name}': {reason}")]
    InvalidKey {
        type_name: &'static str,
        reason: String,
    },
    /// A constructor or decorator could not be registered as described
    #[error("invalid constructor '{constructor}': {reason}")]
    InvalidConstructor { constructor: String, reason: String },
    /// The key already has a provider in the registering scope
    #[error("cannot provide {key} from '{constructor}': already provided by '{existing}'")]
    AlreadyProvided {
        key: Key,
        constructor: String,
        existing: String,
    },
    /// The key already has a decorator in the decorating scope
    #[error("cannot decorate {key} from '{decorator}' in scope '{scope}': already decorated by '{existing}'")]
    AlreadyDecorated {
        key: Key,
        decorator: String,
        existing: String,
        scope: String,
    },
    /// A registration would make a key depend on itself
    #[error("'{constructor}' introduces a cycle: {cycle}")]
    Cycle { constructor: String, cycle: CyclePath },

    /// Required keys without any provider, value or decorator
    #[error("missing dependencies for '{function}': {}", join_keys(.missing))]
    MissingDependencies { function: String, missing: Vec<Key> },
    /// A single required key could not be found during a build
    #[error("missing type: {key}")]
    MissingType { key: Key },

    /// One of the arguments of a function failed to build
    #[error("could not build arguments for '{function}': {source}")]
    ArgumentsFailed {
        function: String,
        #[source]
        source: Box<DiError>,
    },
    /// The provider of a parameter failed
    #[error("failed to build {key} using '{provider}': {source}")]
    ParamFailed {
        key: Key,
        provider: String,
        #[source]
        source: Box<DiError>,
    },
    /// A constructor returned an error
    #[error("'{constructor}' failed: {source}")]
    ConstructorFailed {
        constructor: String,
        #[source]
        source: SharedError,
    },
    /// A constructor panicked, the panic was caught and the build aborted
    #[error("'{constructor}' panicked: {message}")]
    ConstructorPanicked { constructor: String, message: String },
    /// Scheduled work panicked
    #[error("scheduled work panicked: {0}")]
    TaskPanicked(String),

    #[error("failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },
    /// The graph for the function resolved, but nothing was executed
    #[error("'{function}' was not called: dry run")]
    DryRun { function: String },
    /// An invariant of the build engine was violated - aborts the current operation only
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_keys(keys: &[Key]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl DiError {
    /// Missing dependencies are the only failures optional parameters swallow
    pub fn is_missing_dependency(&self) -> bool {
        matches!(
            self,
            DiError::MissingDependencies { .. } | DiError::MissingType { .. }
        )
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, DiError::Cycle { .. })
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, DiError::DryRun { .. })
    }

    /// Returns the innermost error of the chain
    ///
    /// For a failed constructor this is the deepest source of the error the constructor returned.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        match self {
            DiError::ArgumentsFailed { source, .. } | DiError::ParamFailed { source, .. } => {
                source.root_cause()
            }
            DiError::ConstructorFailed { source, .. } => {
                let mut cause: &(dyn StdError + 'static) = &**source;
                while let Some(next) = cause.source() {
                    cause = next;
                }
                cause
            }
            other => other as &(dyn StdError + 'static),
        }
    }

    /// Finds an error of type `E` returned by a failed constructor, anywhere in its chain
    pub fn find_cause<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            DiError::ArgumentsFailed { source, .. } | DiError::ParamFailed { source, .. } => {
                source.find_cause()
            }
            DiError::ConstructorFailed { source, .. } => {
                let first: &(dyn StdError + 'static) = &**source;
                let mut cause = Some(first);
                while let Some(err) = cause {
                    if let Some(found) = err.downcast_ref::<E>() {
                        return Some(found);
                    }
                    cause = err.source();
                }
                None
            }
            _ => None,
        }
    }
}
