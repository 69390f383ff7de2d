use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
    sync::Arc,
};

use futures_channel::oneshot;

use crate::{
    constructor::{Arguments, Constructor, Outputs},
    decorator,
    deferred::{BuildResult, Deferred},
    errors::DiError,
    key::Key,
    output::{self, OutputValue, Staged},
    param::{self, Slot},
    scheduler::Work,
    scope::ScopeInner,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Idle,
    /// Building its arguments or waiting for its body to run
    Building,
    Called,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Provider,
    Decorator,
}

/// A registered constructor or decorator
///
/// Called at most once successfully. Every caller while a build is in flight shares its
/// Deferred, a failed build may be retried by the next caller.
pub(crate) struct ConstructorNode {
    id: usize,
    role: Role,
    ctor: Constructor,
    /// Scope the outputs are stored in
    scope: Weak<ScopeInner>,
    /// Scope the node was registered from, parameters are looked up from here
    origin: Weak<ScopeInner>,
    state: Cell<NodeState>,
    /// Set while the node looks up its own parameters. For a decorator, lookups of its keys
    /// made meanwhile fall through to the undecorated value.
    resolving: Cell<bool>,
    deferred: RefCell<Deferred>,
}

impl fmt::Debug for ConstructorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorNode")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("name", &self.ctor.name())
            .field("state", &self.state.get())
            .finish()
    }
}

impl ConstructorNode {
    pub(crate) fn new(
        id: usize,
        role: Role,
        ctor: Constructor,
        scope: &Rc<ScopeInner>,
        origin: &Rc<ScopeInner>,
    ) -> Self {
        ConstructorNode {
            id,
            role,
            ctor,
            scope: Rc::downgrade(scope),
            origin: Rc::downgrade(origin),
            state: Cell::new(NodeState::Idle),
            resolving: Cell::new(false),
            deferred: RefCell::new(Deferred::new()),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        self.ctor.name()
    }

    pub(crate) fn param_keys(&self) -> Vec<Key> {
        self.ctor.input_keys()
    }

    pub(crate) fn output_keys(&self) -> Vec<Key> {
        self.ctor.output_keys()
    }

    pub(crate) fn origin(&self) -> Option<Rc<ScopeInner>> {
        self.origin.upgrade()
    }

    pub(crate) fn is_resolving(&self) -> bool {
        self.resolving.get()
    }

    /// Builds the arguments, runs the constructor and stores its outputs
    pub(crate) fn call(self: &Rc<Self>) -> Deferred {
        match self.state.get() {
            NodeState::Called | NodeState::Building => return self.deferred.borrow().clone(),
            NodeState::Idle => {}
        }

        let deferred = Deferred::new();
        *self.deferred.borrow_mut() = deferred.clone();
        self.state.set(NodeState::Building);
        tracing::trace!("Building '{}'", self.name());

        let node = self.clone();
        let target = deferred.clone();
        self.start().observe(move |result| node.finish(result, &target));
        deferred
    }

    fn start(self: &Rc<Self>) -> Deferred {
        let (Some(scope), Some(origin)) = (self.scope.upgrade(), self.origin.upgrade()) else {
            return Deferred::err(DiError::Internal(format!(
                "scope of '{}' was dropped",
                self.name()
            )));
        };

        let params = self.ctor.params();
        let missing = param::missing_dependencies(&origin, params);
        if !missing.is_empty() {
            return Deferred::err(DiError::MissingDependencies {
                function: self.name().to_string(),
                missing,
            });
        }

        // Every lookup of a parameter happens inside build_list, later steps only read values
        self.resolving.set(true);
        let (built, slots) = param::build_list(&origin, params);
        self.resolving.set(false);
        let function = self.name().to_string();
        let node = self.clone();
        built
            .catch(move |source| {
                Err(DiError::ArgumentsFailed {
                    function,
                    source: Box::new(source),
                })
            })
            .then(move || node.run(scope, slots))
    }

    fn run(self: &Rc<Self>, scope: Rc<ScopeInner>, slots: Vec<Slot>) -> Deferred {
        if scope.shared().options().dry_run {
            let placeholders = output::placeholders(self.ctor.outputs());
            return Deferred::settled(self.commit(&scope, placeholders));
        }

        let args = match param::take_values(&slots) {
            Ok(args) => args,
            Err(e) => return Deferred::err(e),
        };

        let (tx, mut rx) = oneshot::channel::<Outputs>();
        let func = self.ctor.func();
        let constructor = self.name().to_string();
        let work: Work = Box::new(move || {
            let outputs = func(Arguments::new(args)).map_err(|e| DiError::ConstructorFailed {
                constructor,
                source: Arc::from(e),
            })?;
            tx.send(outputs)
                .map_err(|_| DiError::Internal("constructor result was dropped".to_string()))
        });

        let scheduled = scope.shared().scheduler().schedule(work);
        let constructor = self.name().to_string();
        let node = self.clone();
        scheduled
            .catch(move |e| match e {
                DiError::TaskPanicked(message) => Err(DiError::ConstructorPanicked {
                    constructor,
                    message,
                }),
                other => Err(other),
            })
            .then(move || match rx.try_recv() {
                Ok(Some(outputs)) => Deferred::settled(node.commit(&scope, outputs.into_values())),
                _ => Deferred::err(DiError::Internal(format!(
                    "'{}' finished without a result",
                    node.name()
                ))),
            })
    }

    fn commit(&self, scope: &ScopeInner, values: Vec<OutputValue>) -> BuildResult {
        let staged: Vec<Staged> =
            output::stage(self.ctor.outputs(), values).map_err(|reason| {
                DiError::InvalidConstructor {
                    constructor: self.name().to_string(),
                    reason,
                }
            })?;

        match self.role {
            Role::Provider => {
                for staged in staged {
                    match staged {
                        Staged::Value(key, instance) => scope.insert_value(key, instance),
                        Staged::GroupItems(key, items) => scope.extend_group(key, items),
                    }
                }
            }
            Role::Decorator => decorator::commit(scope, staged),
        }
        Ok(())
    }

    fn finish(&self, result: BuildResult, deferred: &Deferred) {
        match &result {
            Ok(()) => {
                self.state.set(NodeState::Called);
                tracing::debug!("Built '{}'", self.name());
            }
            Err(error) => {
                self.state.set(NodeState::Idle);
                tracing::debug!("Failed to build '{}': {error}", self.name());
            }
        }
        deferred.resolve(result);
    }
}
