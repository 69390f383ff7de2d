//! Single-resolution future used to coordinate builds.
//!
//! A [Deferred] lives on the coordinating thread only. Worker threads never see it; they report
//! back to the scheduler, which resolves the matching Deferred.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::errors::DiError;

pub type BuildResult = Result<(), DiError>;

type Observer = Box<dyn FnOnce(BuildResult)>;

/// Unresolved until [Deferred::resolve] is called once
///
/// Cloning a Deferred hands out another handle to the same future.
#[derive(Clone, Default)]
pub struct Deferred(Rc<RefCell<DeferredInner>>);

#[derive(Default)]
struct DeferredInner {
    result: Option<BuildResult>,
    observers: Vec<Observer>,
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        let state = match &inner.result {
            None => "pending",
            Some(Ok(())) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Deferred")
            .field("state", &state)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    /// An already settled Deferred
    pub fn settled(result: BuildResult) -> Self {
        let deferred = Self::new();
        deferred.resolve(result);
        deferred
    }

    pub fn ok() -> Self {
        Self::settled(Ok(()))
    }

    pub fn err(error: DiError) -> Self {
        Self::settled(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        self.0.borrow().result.is_some()
    }

    /// The settled result, `None` while pending
    pub fn result(&self) -> Option<BuildResult> {
        self.0.borrow().result.clone()
    }

    /// Registers `observer`, running it right away if already settled
    pub fn observe(&self, observer: impl FnOnce(BuildResult) + 'static) {
        let settled = {
            let mut inner = self.0.borrow_mut();
            match &inner.result {
                Some(result) => result.clone(),
                None => {
                    inner.observers.push(Box::new(observer));
                    return;
                }
            }
        };
        observer(settled);
    }

    /// Settles the Deferred - subsequent calls are ignored
    pub fn resolve(&self, result: BuildResult) {
        let observers = {
            let mut inner = self.0.borrow_mut();
            if inner.result.is_some() {
                return;
            }
            inner.result = Some(result.clone());
            std::mem::take(&mut inner.observers)
        };

        // Observers may register new observers or resolve other Deferreds,
        // so the borrow must be released before running them.
        for observer in observers {
            observer(result.clone());
        }
    }

    /// Chains `next` after a successful resolution
    pub fn then(&self, next: impl FnOnce() -> Deferred + 'static) -> Deferred {
        let chained = Deferred::new();
        let target = chained.clone();
        self.observe(move |result| match result {
            Ok(()) => next().observe(move |result| target.resolve(result)),
            Err(error) => target.resolve(Err(error)),
        });
        chained
    }

    /// Passes a failure through `handler`, which may swallow it by returning `Ok`
    pub fn catch(&self, handler: impl FnOnce(DiError) -> BuildResult + 'static) -> Deferred {
        let chained = Deferred::new();
        let target = chained.clone();
        self.observe(move |result| match result {
            Ok(()) => target.resolve(Ok(())),
            Err(error) => target.resolve(handler(error)),
        });
        chained
    }

    /// Resolves once every input resolved, with the first error seen
    pub fn when_all(deferreds: impl IntoIterator<Item = Deferred>) -> Deferred {
        let deferreds: Vec<Deferred> = deferreds.into_iter().collect();
        if deferreds.is_empty() {
            return Deferred::ok();
        }

        let all = Deferred::new();
        let pending = Rc::new(std::cell::Cell::new(deferreds.len()));
        for deferred in deferreds {
            let all = all.clone();
            let pending = pending.clone();
            deferred.observe(move |result| match result {
                Err(error) => all.resolve(Err(error)),
                Ok(()) => {
                    pending.set(pending.get() - 1);
                    if pending.get() == 0 {
                        all.resolve(Ok(()));
                    }
                }
            });
        }
        all
    }
}
