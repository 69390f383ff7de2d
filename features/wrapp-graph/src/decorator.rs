//! Decorators replace a value for one scope and its descendants.
//!
//! A decorator has the same shape as a constructor: it receives the undecorated value among its
//! parameters and returns the replacement. While it is building, lookups of its own keys skip it,
//! which is how it gets to see the value it decorates.

use crate::{
    constructor::Constructor, errors::DiError, key::Key, output::Staged, scope::ScopeInner,
    types::Instance,
};

/// Rejects keys which already have a decorator in `scope`
pub(crate) fn check_conflicts(scope: &ScopeInner, decorator: &Constructor) -> Result<(), DiError> {
    for key in decorator.output_keys() {
        if let Some(existing) = scope.decorator_of(&key) {
            return Err(DiError::AlreadyDecorated {
                key,
                decorator: decorator.name().to_string(),
                existing: existing.name().to_string(),
                scope: scope.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Stores the replacement values
///
/// A decorated group replaces the whole collection, every group output of the decorator is
/// collected into it.
pub(crate) fn commit(scope: &ScopeInner, staged: Vec<Staged>) {
    let mut groups: Vec<(Key, Vec<Instance>)> = Vec::new();
    for staged in staged {
        match staged {
            Staged::Value(key, instance) => scope.insert_decorated_value(key, instance),
            Staged::GroupItems(key, items) => match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, collected)) => collected.extend(items),
                None => groups.push((key, items)),
            },
        }
    }
    for (key, items) in groups {
        scope.insert_decorated_group(key, items);
    }
}
