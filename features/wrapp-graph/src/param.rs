//! Parameters of constructors, decorators and invoked functions, and how they are built.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::{
    deferred::Deferred,
    errors::DiError,
    key::Key,
    scope::ScopeInner,
    types::{Instance, TypeInfo},
};

/// Classification of a single function parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// One value
    Single { key: Key, optional: bool },
    /// A struct whose fields are parameters themselves
    Object {
        type_info: TypeInfo,
        fields: Vec<Param>,
    },
    /// Every value contributed to a group
    ///
    /// Soft groups only receive values which were already built by someone else.
    Group { key: Key, soft: bool },
}

impl Param {
    pub fn single<T: 'static + ?Sized>() -> Self {
        Param::Single {
            key: Key::of::<T>(),
            optional: false,
        }
    }

    pub fn named<T: 'static + ?Sized>(name: &str) -> Self {
        Param::Single {
            key: Key::named::<T>(name),
            optional: false,
        }
    }

    pub fn group<T: 'static + ?Sized>(group: &str) -> Result<Self, DiError> {
        Ok(Param::Group {
            key: Key::group::<T>(group)?,
            soft: false,
        })
    }

    pub fn object<T: 'static + ?Sized>(fields: Vec<Param>) -> Self {
        Param::Object {
            type_info: TypeInfo::of::<T>(),
            fields,
        }
    }

    /// Marks a single parameter as optional - no-op for other shapes
    pub fn optional(self) -> Self {
        match self {
            Param::Single { key, .. } => Param::Single {
                key,
                optional: true,
            },
            other => other,
        }
    }

    /// Marks a group parameter as soft - no-op for other shapes
    pub fn soft(self) -> Self {
        match self {
            Param::Group { key, .. } => Param::Group { key, soft: true },
            other => other,
        }
    }

    /// All keys this parameter depends on
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<Key>) {
        match self {
            Param::Single { key, .. } | Param::Group { key, .. } => keys.push(key.clone()),
            Param::Object { fields, .. } => fields.iter().for_each(|f| f.collect_keys(keys)),
        }
    }

    /// Types of every key the parameter uses, objects included
    pub(crate) fn type_infos(&self) -> Vec<TypeInfo> {
        match self {
            Param::Single { key, .. } | Param::Group { key, .. } => vec![key.type_info()],
            Param::Object { type_info, fields } => std::iter::once(*type_info)
                .chain(fields.iter().flat_map(Param::type_infos))
                .collect(),
        }
    }

    fn build(&self, scope: &Rc<ScopeInner>, slot: Slot) -> Deferred {
        match self {
            Param::Single { key, optional } => build_single(scope, key, *optional, slot),
            Param::Group { key, soft } => build_group(scope, key, *soft, slot),
            Param::Object { fields, .. } => {
                let (built, fields) = build_list(scope, fields);
                built.then(move || match take_values(&fields) {
                    Ok(values) => {
                        *slot.borrow_mut() = Some(ParamValue::Object(values));
                        Deferred::ok()
                    }
                    Err(e) => Deferred::err(e),
                })
            }
        }
    }
}

/// A built parameter, shaped like its [Param]
#[derive(Debug, Clone)]
pub enum ParamValue {
    /// `None` for an optional parameter without a provider
    Single(Option<Instance>),
    Object(Vec<ParamValue>),
    Group(Vec<Instance>),
}

pub(crate) type Slot = Rc<RefCell<Option<ParamValue>>>;

/// Starts building every parameter, returning the combined Deferred and the slots the values
/// land in
///
/// Once a parameter has already failed no further parameters are started.
pub(crate) fn build_list(scope: &Rc<ScopeInner>, params: &[Param]) -> (Deferred, Vec<Slot>) {
    let slots: Vec<Slot> = params.iter().map(|_| Slot::default()).collect();
    let mut started = Vec::with_capacity(params.len());
    for (param, slot) in params.iter().zip(&slots) {
        let deferred = param.build(scope, slot.clone());
        let failed = matches!(deferred.result(), Some(Err(_)));
        started.push(deferred);
        if failed {
            break;
        }
    }
    (Deferred::when_all(started), slots)
}

pub(crate) fn take_values(slots: &[Slot]) -> Result<Vec<ParamValue>, DiError> {
    slots
        .iter()
        .map(|slot| {
            slot.borrow_mut()
                .take()
                .ok_or_else(|| DiError::Internal("parameter taken before it was built".to_string()))
        })
        .collect()
}

/// Required single keys that nothing up the scope chain could supply
pub(crate) fn missing_dependencies(scope: &Rc<ScopeInner>, params: &[Param]) -> Vec<Key> {
    let mut missing = Vec::new();
    collect_missing(scope, params, &mut missing);
    missing
}

fn collect_missing(scope: &Rc<ScopeInner>, params: &[Param], missing: &mut Vec<Key>) {
    for param in params {
        match param {
            Param::Single {
                key,
                optional: false,
            } if !scope.can_provide(key) => missing.push(key.clone()),
            Param::Object { fields, .. } => collect_missing(scope, fields, missing),
            _ => {}
        }
    }
}

fn build_single(scope: &Rc<ScopeInner>, key: &Key, optional: bool, slot: Slot) -> Deferred {
    for level in scope.ancestry() {
        if let Some(decorator) = level.decorator_of(key) {
            // A decorator resolving its own parameters sees the undecorated value
            if !decorator.is_resolving() {
                let wrapped = key.clone();
                let provider = decorator.name().to_string();
                let key = key.clone();
                let skipped = Rc::new(Cell::new(false));
                let skip = skipped.clone();
                return decorator
                    .call()
                    .catch(move |source| {
                        if optional && source.is_missing_dependency() {
                            skip.set(true);
                            return Ok(());
                        }
                        Err(DiError::ParamFailed {
                            key: wrapped,
                            provider,
                            source: Box::new(source),
                        })
                    })
                    .then(move || match level.decorated_value(&key) {
                        _ if skipped.get() => {
                            *slot.borrow_mut() = Some(ParamValue::Single(None));
                            Deferred::ok()
                        }
                        Some(value) => {
                            *slot.borrow_mut() = Some(ParamValue::Single(Some(value)));
                            Deferred::ok()
                        }
                        None => Deferred::err(DiError::Internal(format!(
                            "decorator finished without producing {key}"
                        ))),
                    });
            }
        }

        if let Some(value) = level.value(key) {
            *slot.borrow_mut() = Some(ParamValue::Single(Some(value)));
            return Deferred::ok();
        }

        // The first level with a provider decides, ancestors are not consulted anymore
        let Some(node) = level.providers_of(key).into_iter().next() else {
            continue;
        };
        let wrapped = key.clone();
        let key = key.clone();
        let skipped = Rc::new(Cell::new(false));
        let skip = skipped.clone();
        return node
            .call()
            .catch(move |source| {
                if optional && source.is_missing_dependency() {
                    skip.set(true);
                    return Ok(());
                }
                Err(DiError::ParamFailed {
                    key: wrapped,
                    provider: node.name().to_string(),
                    source: Box::new(source),
                })
            })
            .then(move || {
                if skipped.get() {
                    *slot.borrow_mut() = Some(ParamValue::Single(None));
                    return Deferred::ok();
                }
                match level.value(&key) {
                    Some(value) => {
                        *slot.borrow_mut() = Some(ParamValue::Single(Some(value)));
                        Deferred::ok()
                    }
                    None => Deferred::err(DiError::Internal(format!(
                        "provider finished without producing {key}"
                    ))),
                }
            });
    }

    if optional {
        *slot.borrow_mut() = Some(ParamValue::Single(None));
        Deferred::ok()
    } else {
        Deferred::err(DiError::MissingType { key: key.clone() })
    }
}

fn build_group(scope: &Rc<ScopeInner>, key: &Key, soft: bool, slot: Slot) -> Deferred {
    let ancestry = scope.ancestry();

    for level in &ancestry {
        let Some(decorator) = level.decorator_of(key) else {
            continue;
        };
        if decorator.is_resolving() {
            continue;
        }
        let wrapped = key.clone();
        let provider = decorator.name().to_string();
        let key = key.clone();
        let level = level.clone();
        return decorator
            .call()
            .catch(move |source| {
                Err(DiError::ParamFailed {
                    key: wrapped,
                    provider,
                    source: Box::new(source),
                })
            })
            .then(move || match level.decorated_group(&key) {
                Some(mut values) => {
                    level.shared().shuffle(&mut values);
                    *slot.borrow_mut() = Some(ParamValue::Group(values));
                    Deferred::ok()
                }
                None => Deferred::err(DiError::Internal(format!(
                    "decorator finished without producing {key}"
                ))),
            });
    }

    let mut calls = Vec::new();
    if !soft {
        'levels: for level in &ancestry {
            for node in level.providers_of(key) {
                let wrapped = key.clone();
                let provider = node.name().to_string();
                let call = node.call().catch(move |source| {
                    Err(DiError::ParamFailed {
                        key: wrapped,
                        provider,
                        source: Box::new(source),
                    })
                });
                let failed = matches!(call.result(), Some(Err(_)));
                calls.push(call);
                if failed {
                    break 'levels;
                }
            }
        }
    }

    let key = key.clone();
    let scope = scope.clone();
    Deferred::when_all(calls).then(move || {
        let mut values: Vec<Instance> = ancestry
            .iter()
            .flat_map(|level| level.group_values(&key))
            .collect();
        scope.shared().shuffle(&mut values);
        *slot.borrow_mut() = Some(ParamValue::Group(values));
        Deferred::ok()
    })
}
