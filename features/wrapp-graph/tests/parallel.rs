use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
};

use wrapp_graph::{Container, DiError, Group, ProvideOptions, SchedulerKind};

type Never = Infallible;

wrapp_graph::group_tag!(Workers = "workers");

#[derive(Debug)]
struct Left(u32);
struct Right(u32);
struct Top(u32);

fn diamond(container: &Container, calls: &Arc<AtomicUsize>) {
    let counter = calls.clone();
    container
        .provide(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Never>(1u32)
        })
        .unwrap();
    container
        .provide(|base: Arc<u32>| Ok::<_, Never>(Left(*base + 1)))
        .unwrap();
    container
        .provide(|base: Arc<u32>| Ok::<_, Never>(Right(*base + 2)))
        .unwrap();
    container
        .provide(|left: Arc<Left>, right: Arc<Right>| Ok::<_, Never>(Top(left.0 + right.0)))
        .unwrap();
}

#[test]
fn diamond_builds_shared_dependency_once() {
    for scheduler in [
        SchedulerKind::Synchronous,
        SchedulerKind::Parallel(4),
        SchedulerKind::Unbounded,
    ] {
        let container = Container::builder().scheduler(scheduler).build();
        let calls = Arc::new(AtomicUsize::new(0));
        diamond(&container, &calls);

        assert_eq!(container.resolve::<Top>().unwrap().0, 5, "{scheduler:?}");
        assert_eq!(container.resolve::<Top>().unwrap().0, 5, "{scheduler:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{scheduler:?}");
    }
}

#[test]
fn constructors_run_on_worker_threads() {
    let container = Container::builder()
        .scheduler(SchedulerKind::Parallel(2))
        .build();
    container
        .provide(|| Ok::<_, Never>(thread::current().name().map(str::to_string)))
        .unwrap();

    let name = container.resolve::<Option<String>>().unwrap();
    let name = name.as_deref().unwrap_or_default();
    assert!(name.starts_with("wrapp-graph-worker"), "{name}");
}

#[test]
fn independent_constructors_run_concurrently() {
    let container = Container::builder()
        .scheduler(SchedulerKind::Parallel(2))
        .build();
    // Both constructors have to be running at the same time to get past the barrier
    let barrier = Arc::new(Barrier::new(2));
    let left = barrier.clone();
    let right = barrier.clone();
    container
        .provide(move || {
            left.wait();
            Ok::<_, Never>(Left(1))
        })
        .unwrap();
    container
        .provide(move || {
            right.wait();
            Ok::<_, Never>(Right(2))
        })
        .unwrap();

    let sum = container
        .invoke(|left: Arc<Left>, right: Arc<Right>| left.0 + right.0)
        .unwrap();
    assert_eq!(sum, 3);
}

#[test]
fn unbounded_scheduler_collects_groups() {
    let container = Container::builder()
        .scheduler(SchedulerKind::Unbounded)
        .build();
    for id in 0..8usize {
        container
            .provide_with(
                move || Ok::<_, Never>(id),
                ProvideOptions::new().group("workers"),
            )
            .unwrap();
    }

    let mut ids: Vec<usize> = container
        .invoke(|workers: Group<usize, Workers>| workers.iter().map(|id| **id).collect::<Vec<_>>())
        .unwrap();
    ids.sort();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
}

#[test]
fn panicking_constructor_becomes_an_error() {
    let container = Container::builder()
        .scheduler(SchedulerKind::Parallel(2))
        .build();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    container
        .provide(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first call explodes");
            }
            Ok::<_, Never>(Left(1))
        })
        .unwrap();

    let err = container.resolve::<Left>().unwrap_err();
    let cause = err.root_cause().downcast_ref::<DiError>();
    assert!(
        matches!(cause, Some(DiError::ConstructorPanicked { message, .. }) if message == "first call explodes"),
        "{err}"
    );

    // The container stays usable and the constructor is retried
    assert_eq!(container.resolve::<Left>().unwrap().0, 1);
}

#[test]
fn failure_in_one_branch_keeps_the_other() {
    #[derive(Debug, thiserror::Error)]
    #[error("right side unavailable")]
    struct Unavailable;

    let container = Container::builder()
        .scheduler(SchedulerKind::Parallel(2))
        .build();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    container
        .provide(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Never>(Left(1))
        })
        .unwrap();
    container
        .provide(|| Err::<Right, _>(Unavailable))
        .unwrap();

    let err = container
        .invoke(|left: Arc<Left>, right: Arc<Right>| left.0 + right.0)
        .unwrap_err();
    assert!(err.find_cause::<Unavailable>().is_some(), "{err}");

    assert_eq!(container.resolve::<Left>().unwrap().0, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
