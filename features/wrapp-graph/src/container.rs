use std::{fmt::Debug, ops::Deref, rc::Rc};

use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::{
    scheduler::{Scheduler, SchedulerKind},
    scope::{Scope, ScopeInner, Shared},
};

/// Settings shared by every scope of a container
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    /// Ignored when the builder was given a custom scheduler
    pub scheduler: SchedulerKind,
    /// Check for cycles on the first resolution instead of on every registration
    pub defer_acyclic_verification: bool,
    /// Skip every constructor and decorator body, storing placeholders instead
    pub dry_run: bool,
    /// Seed of the random source ordering group members
    pub rand_seed: Option<u64>,
}

/// The root scope of a provider graph
///
/// Derefs to its root [Scope]. The container and all of its scopes belong to the thread that
/// created them, only constructor bodies may run elsewhere.
pub struct Container {
    root: Scope,
    options: ContainerOptions,
}

impl Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("options", &self.options)
            .field("root", &self.root)
            .finish()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Container with a synchronous scheduler and a randomly seeded group order
    pub fn new() -> Self {
        ContainerBuilder::new().build()
    }

    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub fn root(&self) -> &Scope {
        &self.root
    }
}

impl Deref for Container {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.root
    }
}

/// Configures a [Container]
#[derive(Default)]
pub struct ContainerBuilder {
    options: ContainerOptions,
    rng: Option<Box<dyn RngCore>>,
    custom_scheduler: Option<Rc<dyn Scheduler>>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.options.scheduler = scheduler;
        self
    }

    /// Runs constructors through `scheduler` instead of one selected by [SchedulerKind]
    pub fn custom_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.custom_scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Makes group ordering reproducible
    pub fn rand_seed(mut self, seed: u64) -> Self {
        self.options.rand_seed = Some(seed);
        self
    }

    /// Random source ordering group members, takes precedence over [ContainerBuilder::rand_seed]
    pub fn rng(mut self, rng: impl RngCore + 'static) -> Self {
        self.rng = Some(Box::new(rng));
        self
    }

    pub fn defer_acyclic_verification(mut self, defer: bool) -> Self {
        self.options.defer_acyclic_verification = defer;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.options.dry_run = dry_run;
        self
    }

    pub fn build(self) -> Container {
        let rng: Box<dyn RngCore> = match (self.rng, self.options.rand_seed) {
            (Some(rng), _) => rng,
            (None, Some(seed)) => Box::new(StdRng::seed_from_u64(seed)),
            (None, None) => Box::new(StdRng::from_os_rng()),
        };

        tracing::debug!("Creating container with {:?}", self.options);
        let scheduler = self
            .custom_scheduler
            .unwrap_or_else(|| self.options.scheduler.build());
        let shared = Shared::new(self.options.clone(), scheduler, rng);
        Container {
            root: Scope::root(ScopeInner::root(shared)),
            options: self.options,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn builder_collects_options() {
        let container = Container::builder()
            .scheduler(SchedulerKind::Parallel(4))
            .rand_seed(7)
            .defer_acyclic_verification(true)
            .dry_run(true)
            .build();

        assert_eq!(container.options().scheduler, SchedulerKind::Parallel(4));
        assert_eq!(container.options().rand_seed, Some(7));
        assert!(container.options().defer_acyclic_verification);
        assert!(container.options().dry_run);
        assert_eq!(container.name(), "root");
    }

    /// Runs work right away and remembers how much it ran
    struct Counting(Rc<std::cell::Cell<usize>>);

    impl Scheduler for Counting {
        fn schedule(&self, work: crate::Work) -> crate::Deferred {
            self.0.set(self.0.get() + 1);
            crate::Synchronous.schedule(work)
        }

        fn flush(&self) -> Result<(), crate::DiError> {
            Ok(())
        }
    }

    #[test]
    fn custom_scheduler_runs_constructors() {
        let scheduled = Rc::new(std::cell::Cell::new(0));
        let container = Container::builder()
            .custom_scheduler(Counting(scheduled.clone()))
            .build();
        container.supply(2u32).unwrap();
        container
            .provide(|n: std::sync::Arc<u32>| Ok::<_, std::convert::Infallible>(*n as u64 * 10))
            .unwrap();

        assert_eq!(*container.resolve::<u64>().unwrap(), 20);
        assert_eq!(scheduled.get(), 1);
    }

    #[test]
    fn defaults_are_synchronous_and_eager() {
        let container = Container::default();
        assert_eq!(container.options().scheduler, SchedulerKind::Synchronous);
        assert!(!container.options().defer_acyclic_verification);
        assert!(!container.options().dry_run);
    }
}
