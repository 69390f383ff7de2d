use std::{
    any::type_name,
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
    sync::Arc,
};

use rand::{seq::SliceRandom, RngCore};

use crate::{
    constructor::{Arguments, ProvideInfo, ProvideOptions},
    container::ContainerOptions,
    cycle, decorator,
    errors::DiError,
    inject::{Inject, IntoConstructor, Invocable},
    key::Key,
    node::{ConstructorNode, Role},
    param::{self, Param, ParamValue},
    scheduler::Scheduler,
    types::{Injectable, Instance},
};

/// State shared by every scope of one container
pub(crate) struct Shared {
    options: ContainerOptions,
    scheduler: Rc<dyn Scheduler>,
    rng: RefCell<Box<dyn RngCore>>,
    next_id: Cell<usize>,
}

impl Shared {
    pub(crate) fn new(
        options: ContainerOptions,
        scheduler: Rc<dyn Scheduler>,
        rng: Box<dyn RngCore>,
    ) -> Self {
        Shared {
            scheduler,
            options,
            rng: RefCell::new(rng),
            next_id: Cell::new(0),
        }
    }

    pub(crate) fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub(crate) fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    /// Group members have no order, callers must not come to rely on one
    pub(crate) fn shuffle(&self, values: &mut [Instance]) {
        values.shuffle(&mut **self.rng.borrow_mut());
    }

    fn next_id(&self) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

/// Registry of one scope
///
/// Only ever touched by the thread owning the container.
pub(crate) struct ScopeInner {
    name: String,
    parent: Option<Weak<ScopeInner>>,
    children: RefCell<Vec<Rc<ScopeInner>>>,
    shared: Rc<Shared>,

    providers: RefCell<HashMap<Key, Vec<Rc<ConstructorNode>>>>,
    /// Nodes registered into this scope, in registration order
    nodes: RefCell<Vec<Rc<ConstructorNode>>>,
    values: RefCell<HashMap<Key, Instance>>,
    groups: RefCell<HashMap<Key, Vec<Instance>>>,

    decorators: RefCell<HashMap<Key, Rc<ConstructorNode>>>,
    decorated_values: RefCell<HashMap<Key, Instance>>,
    decorated_groups: RefCell<HashMap<Key, Vec<Instance>>>,

    /// False while registrations since the last cycle check are unverified
    acyclic: Cell<bool>,
}

impl ScopeInner {
    pub(crate) fn root(shared: Shared) -> Rc<Self> {
        Rc::new(Self::new("root".to_string(), None, Rc::new(shared)))
    }

    fn new(name: String, parent: Option<Weak<ScopeInner>>, shared: Rc<Shared>) -> Self {
        ScopeInner {
            name,
            parent,
            children: RefCell::default(),
            shared,
            providers: RefCell::default(),
            nodes: RefCell::default(),
            values: RefCell::default(),
            groups: RefCell::default(),
            decorators: RefCell::default(),
            decorated_values: RefCell::default(),
            decorated_groups: RefCell::default(),
            acyclic: Cell::new(true),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    fn parent(&self) -> Option<Rc<ScopeInner>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// This scope followed by its ancestors up to the root
    pub(crate) fn ancestry(self: &Rc<Self>) -> Vec<Rc<ScopeInner>> {
        let mut ancestry = vec![self.clone()];
        let mut current = self.parent();
        while let Some(scope) = current {
            current = scope.parent();
            ancestry.push(scope);
        }
        ancestry
    }

    pub(crate) fn providers_of(&self, key: &Key) -> Vec<Rc<ConstructorNode>> {
        self.providers.borrow().get(key).cloned().unwrap_or_default()
    }

    pub(crate) fn decorator_of(&self, key: &Key) -> Option<Rc<ConstructorNode>> {
        self.decorators.borrow().get(key).cloned()
    }

    pub(crate) fn value(&self, key: &Key) -> Option<Instance> {
        self.values.borrow().get(key).cloned()
    }

    pub(crate) fn group_values(&self, key: &Key) -> Vec<Instance> {
        self.groups.borrow().get(key).cloned().unwrap_or_default()
    }

    pub(crate) fn decorated_value(&self, key: &Key) -> Option<Instance> {
        self.decorated_values.borrow().get(key).cloned()
    }

    pub(crate) fn decorated_group(&self, key: &Key) -> Option<Vec<Instance>> {
        self.decorated_groups.borrow().get(key).cloned()
    }

    pub(crate) fn insert_value(&self, key: Key, instance: Instance) {
        self.values.borrow_mut().insert(key, instance);
    }

    pub(crate) fn extend_group(&self, key: Key, items: Vec<Instance>) {
        self.groups.borrow_mut().entry(key).or_default().extend(items);
    }

    pub(crate) fn insert_decorated_value(&self, key: Key, instance: Instance) {
        self.decorated_values.borrow_mut().insert(key, instance);
    }

    pub(crate) fn insert_decorated_group(&self, key: Key, items: Vec<Instance>) {
        self.decorated_groups.borrow_mut().insert(key, items);
    }

    /// Whether a lookup of `key` from here would find a decorator, a value or a provider
    pub(crate) fn can_provide(self: &Rc<Self>, key: &Key) -> bool {
        self.ancestry().iter().any(|scope| {
            scope.decorators.borrow().contains_key(key)
                || scope.values.borrow().contains_key(key)
                || scope.providers.borrow().get(key).is_some_and(|p| !p.is_empty())
        })
    }

    /// Name of whatever already provides the single key `key` in this scope
    fn existing_provider(&self, key: &Key) -> Option<String> {
        if let Some(node) = self.providers_of(key).first() {
            return Some(node.name().to_string());
        }
        self.values
            .borrow()
            .get(key)
            .map(|instance| format!("supplied {}", instance.info))
    }

    fn add_provider(&self, keys: &[Key], node: &Rc<ConstructorNode>) {
        let mut providers = self.providers.borrow_mut();
        for key in keys {
            let entry = providers.entry(key.clone()).or_default();
            if !entry.iter().any(|n| Rc::ptr_eq(n, node)) {
                entry.push(node.clone());
            }
        }
    }

    fn remove_provider(&self, keys: &[Key], node: &Rc<ConstructorNode>) {
        let mut providers = self.providers.borrow_mut();
        for key in keys {
            if let Some(entry) = providers.get_mut(key) {
                entry.retain(|n| !Rc::ptr_eq(n, node));
                if entry.is_empty() {
                    providers.remove(key);
                }
            }
        }
    }

    /// Marks this scope and every descendant as needing a cycle check
    fn invalidate_acyclic(&self) {
        self.acyclic.set(false);
        for child in self.children.borrow().iter() {
            child.invalidate_acyclic();
        }
    }
}

/// A node in the tree of registries
///
/// Lookups walk from a scope towards the root, so values provided to a scope are visible to it
/// and its descendants but never to its parent or siblings. A scope handle keeps the whole tree
/// alive.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
    root: Rc<ScopeInner>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("root", &self.root.name)
            .field("providers", &self.inner.nodes.borrow().len())
            .field("values", &self.inner.values.borrow().len())
            .field("decorators", &self.inner.decorators.borrow().len())
            .field("children", &self.inner.children.borrow().len())
            .finish()
    }
}

impl Scope {
    pub(crate) fn root(inner: Rc<ScopeInner>) -> Self {
        Scope {
            root: inner.clone(),
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Creates a child scope
    pub fn scope(&self, name: impl Into<String>) -> Scope {
        let child = Rc::new(ScopeInner::new(
            name.into(),
            Some(Rc::downgrade(&self.inner)),
            self.inner.shared.clone(),
        ));
        child.acyclic.set(self.inner.acyclic.get());
        self.inner.children.borrow_mut().push(child.clone());
        tracing::debug!("Created scope '{}' below '{}'", child.name, self.inner.name);
        Scope {
            inner: child,
            root: self.root.clone(),
        }
    }

    /// Registers a constructor in this scope
    pub fn provide<M>(&self, ctor: impl IntoConstructor<M>) -> Result<ProvideInfo, DiError> {
        self.provide_with(ctor, ProvideOptions::default())
    }

    pub fn provide_with<M>(
        &self,
        ctor: impl IntoConstructor<M>,
        options: ProvideOptions,
    ) -> Result<ProvideInfo, DiError> {
        let ctor = ctor.into_constructor(&options)?;
        ctor.validate()?;

        let target = match options.is_export() {
            true => self.inner.parent().unwrap_or_else(|| self.inner.clone()),
            false => self.inner.clone(),
        };

        let outputs = ctor.output_keys();
        for key in outputs.iter().filter(|key| !key.is_group()) {
            if let Some(existing) = target.existing_provider(key) {
                return Err(DiError::AlreadyProvided {
                    key: key.clone(),
                    constructor: ctor.name().to_string(),
                    existing,
                });
            }
        }

        let shared = &self.inner.shared;
        let node = Rc::new(ConstructorNode::new(
            shared.next_id(),
            Role::Provider,
            ctor,
            &target,
            &self.inner,
        ));

        target.add_provider(&outputs, &node);
        if shared.options.defer_acyclic_verification {
            target.invalidate_acyclic();
        } else if let Err(cycle) = cycle::detect_from(&node) {
            target.remove_provider(&outputs, &node);
            tracing::debug!("Rejected '{}': {cycle}", node.name());
            return Err(DiError::Cycle {
                constructor: node.name().to_string(),
                cycle,
            });
        }
        target.nodes.borrow_mut().push(node.clone());

        tracing::debug!(
            "Provided {} from '{}' in scope '{}'",
            join(&outputs),
            node.name(),
            target.name
        );
        Ok(ProvideInfo {
            id: node.id(),
            inputs: node.param_keys(),
            outputs,
        })
    }

    /// Registers an already built value
    pub fn supply<T: Injectable>(&self, value: T) -> Result<(), DiError> {
        self.supply_key(Key::of::<T>(), Instance::new(value))
    }

    pub fn supply_named<T: Injectable>(&self, name: &str, value: T) -> Result<(), DiError> {
        self.supply_key(Key::named::<T>(name), Instance::new(value))
    }

    fn supply_key(&self, key: Key, instance: Instance) -> Result<(), DiError> {
        if let Some(existing) = self.inner.existing_provider(&key) {
            return Err(DiError::AlreadyProvided {
                constructor: format!("supplied {}", instance.info),
                key,
                existing,
            });
        }
        tracing::debug!("Supplied {key} in scope '{}'", self.inner.name);
        self.inner.insert_value(key, instance);
        Ok(())
    }

    /// Registers a decorator for this scope and its descendants
    pub fn decorate<M>(&self, ctor: impl IntoConstructor<M>) -> Result<ProvideInfo, DiError> {
        self.decorate_with(ctor, ProvideOptions::default())
    }

    /// Options select the decorated key of a function decorator, export is ignored
    pub fn decorate_with<M>(
        &self,
        ctor: impl IntoConstructor<M>,
        options: ProvideOptions,
    ) -> Result<ProvideInfo, DiError> {
        let ctor = ctor.into_constructor(&options)?;
        ctor.validate()?;
        decorator::check_conflicts(&self.inner, &ctor)?;

        let node = Rc::new(ConstructorNode::new(
            self.inner.shared.next_id(),
            Role::Decorator,
            ctor,
            &self.inner,
            &self.inner,
        ));
        let outputs = node.output_keys();
        {
            let mut decorators = self.inner.decorators.borrow_mut();
            for key in &outputs {
                decorators.insert(key.clone(), node.clone());
            }
        }

        tracing::debug!(
            "Decorated {} with '{}' in scope '{}'",
            join(&outputs),
            node.name(),
            self.inner.name
        );
        Ok(ProvideInfo {
            id: node.id(),
            inputs: node.param_keys(),
            outputs,
        })
    }

    /// Builds the parameters of `function` and calls it on the current thread
    ///
    /// In dry-run mode the graph is built with placeholders and the function is not called.
    pub fn invoke<M, F: Invocable<M>>(&self, function: F) -> Result<F::Output, DiError> {
        let name = type_name::<F>();
        let values = self.build(name, &F::params()?)?;
        self.check_dry_run(name)?;
        function.invoke(Arguments::new(values))
    }

    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, DiError> {
        self.resolve_as::<Arc<T>>()
    }

    /// Resolves any [Inject] type, e.g. `Option<Arc<T>>` or a [crate::Group]
    pub fn resolve_as<I: Inject>(&self) -> Result<I, DiError> {
        let function = format!("resolve::<{}>", type_name::<I>());
        let value = self.build_one(&function, I::param()?)?;
        I::extract(value)
    }

    pub fn resolve_named<T: Injectable>(&self, name: &str) -> Result<Arc<T>, DiError> {
        let instance = self.resolve_key(Key::named::<T>(name))?;
        instance
            .downcast::<T>()
            .map_err(|actual_type| DiError::DowncastFailed {
                required_type: type_name::<T>(),
                actual_type,
            })
    }

    pub fn resolve_group<T: Injectable>(&self, group: &str) -> Result<Vec<Arc<T>>, DiError> {
        let function = format!("resolve_group::<{}>", type_name::<T>());
        match self.build_one(&function, Param::group::<T>(group)?)? {
            ParamValue::Group(instances) => instances
                .iter()
                .map(|instance| {
                    instance
                        .downcast::<T>()
                        .map_err(|actual_type| DiError::DowncastFailed {
                            required_type: type_name::<T>(),
                            actual_type,
                        })
                })
                .collect(),
            other => Err(DiError::Internal(format!(
                "group resolved to {other:?}"
            ))),
        }
    }

    /// Resolves the value of a single key
    pub fn resolve_key(&self, key: Key) -> Result<Instance, DiError> {
        if key.is_group() {
            return Err(DiError::InvalidKey {
                type_name: key.type_info().type_name,
                reason: format!("{key} is a group, use resolve_group"),
            });
        }
        let function = format!("resolve_key({key})");
        let param = Param::Single {
            key,
            optional: false,
        };
        match self.build_one(&function, param)? {
            ParamValue::Single(Some(instance)) => Ok(instance),
            other => Err(DiError::Internal(format!("key resolved to {other:?}"))),
        }
    }

    fn build_one(&self, function: &str, param: Param) -> Result<ParamValue, DiError> {
        let mut values = self.build(function, std::slice::from_ref(&param))?;
        self.check_dry_run(function)?;
        values
            .pop()
            .ok_or_else(|| DiError::Internal(format!("'{function}' built no value")))
    }

    fn check_dry_run(&self, function: &str) -> Result<(), DiError> {
        match self.inner.shared.options.dry_run {
            true => Err(DiError::DryRun {
                function: function.to_string(),
            }),
            false => Ok(()),
        }
    }

    /// Builds `params` from this scope and flushes the scheduler
    fn build(&self, function: &str, params: &[Param]) -> Result<Vec<ParamValue>, DiError> {
        self.verify_acyclic()?;

        let missing = param::missing_dependencies(&self.inner, params);
        if !missing.is_empty() {
            return Err(DiError::MissingDependencies {
                function: function.to_string(),
                missing,
            });
        }

        tracing::trace!("Building arguments for '{function}'");
        let (built, slots) = param::build_list(&self.inner, params);
        self.inner.shared.scheduler.flush()?;

        match built.result() {
            Some(Ok(())) => param::take_values(&slots),
            Some(Err(source)) => {
                tracing::debug!("Failed to build arguments for '{function}': {source}");
                Err(DiError::ArgumentsFailed {
                    function: function.to_string(),
                    source: Box::new(source),
                })
            }
            None => Err(DiError::Internal(format!(
                "arguments for '{function}' were still pending after the scheduler was flushed"
            ))),
        }
    }

    /// Runs the cycle check postponed by deferred verification
    fn verify_acyclic(&self) -> Result<(), DiError> {
        if self.inner.acyclic.get() {
            return Ok(());
        }

        let nodes: Vec<Rc<ConstructorNode>> = self
            .inner
            .ancestry()
            .iter()
            .flat_map(|scope| scope.nodes.borrow().clone())
            .collect();
        tracing::trace!("Checking {} constructors for cycles", nodes.len());
        cycle::detect_all(&nodes).map_err(|(node, cycle)| DiError::Cycle {
            constructor: node.name().to_string(),
            cycle,
        })?;

        self.inner.acyclic.set(true);
        Ok(())
    }

    /// Number of constructors registered into this scope, including exported ones from children
    pub fn provider_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// Whether `key` could be built from this scope
    pub fn can_provide(&self, key: &Key) -> bool {
        self.inner.can_provide(key)
    }
}

fn join(keys: &[Key]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
