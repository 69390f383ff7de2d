use std::{fmt, sync::Arc};

use crate::{errors::DiError, types::TypeInfo};

/// Identity of a value in the graph
///
/// A key is a type plus at most one disambiguator: either a name or a group.
/// Keys are immutable once created and are cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    type_info: TypeInfo,
    name: Option<Arc<str>>,
    group: Option<Arc<str>>,
}

impl Key {
    /// Creates a key, rejecting a name and a group at the same time
    pub fn new(
        type_info: TypeInfo,
        name: Option<&str>,
        group: Option<&str>,
    ) -> Result<Self, DiError> {
        match (name, group) {
            (Some(name), Some(group)) => Err(DiError::InvalidKey {
                type_name: type_info.type_name,
                reason: format!("cannot use name '{name}' and group '{group}' together"),
            }),
            (None, Some("")) => Err(DiError::InvalidKey {
                type_name: type_info.type_name,
                reason: "group name must not be empty".to_string(),
            }),
            _ => Ok(Key {
                type_info,
                name: name.map(Arc::from),
                group: group.map(Arc::from),
            }),
        }
    }

    pub fn of<T: 'static + ?Sized>() -> Self {
        Key {
            type_info: TypeInfo::of::<T>(),
            name: None,
            group: None,
        }
    }

    pub fn named<T: 'static + ?Sized>(name: &str) -> Self {
        Key {
            type_info: TypeInfo::of::<T>(),
            name: Some(Arc::from(name)),
            group: None,
        }
    }

    /// Key of a value group, identified by its element type
    pub fn group<T: 'static + ?Sized>(group: &str) -> Result<Self, DiError> {
        Key::new(TypeInfo::of::<T>(), None, Some(group))
    }

    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn group_name(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.group) {
            (Some(name), _) => write!(f, "{}[name=\"{name}\"]", self.type_info),
            (_, Some(group)) => write!(f, "{}[group=\"{group}\"]", self.type_info),
            _ => write!(f, "{}", self.type_info),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}
