use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use wrapp_graph::{Container, DiError, ProvideOptions};

type Never = Infallible;

#[derive(Debug)]
struct Config;
#[derive(Debug)]
struct Service;

fn dry_container() -> Container {
    Container::builder().dry_run(true).build()
}

#[test]
fn constructors_are_never_called() {
    // Arrange
    let container = dry_container();
    let calls = Arc::new(AtomicUsize::new(0));
    let config_calls = calls.clone();
    let service_calls = calls.clone();
    container
        .provide(move || {
            config_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Never>(Config)
        })
        .unwrap();
    container
        .provide(move |_: Arc<Config>| {
            service_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Never>(Service)
        })
        .unwrap();

    // Act
    let resolved = container.resolve::<Service>();
    let invoked = container.invoke(|_: Arc<Service>| -> u32 { panic!("must not run") });

    // Assert
    assert!(resolved.unwrap_err().is_dry_run());
    assert!(invoked.unwrap_err().is_dry_run());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_dependencies_are_still_reported() {
    let container = dry_container();
    container
        .provide(|_: Arc<Config>| Ok::<_, Never>(Service))
        .unwrap();

    let err = container.resolve::<Service>().unwrap_err();
    assert!(!err.is_dry_run());
    let cause = err.root_cause().downcast_ref::<DiError>();
    assert!(cause.is_some_and(DiError::is_missing_dependency), "{err}");
}

#[test]
fn cycles_are_still_detected() {
    let container = dry_container();
    container
        .provide(|_: Arc<Service>| Ok::<_, Never>(Config))
        .unwrap();
    let err = container
        .provide(|_: Arc<Config>| Ok::<_, Never>(Service))
        .unwrap_err();
    assert!(err.is_cycle(), "{err}");
}

#[test]
fn groups_and_scopes_resolve_without_calls() {
    let container = dry_container();
    let calls = Arc::new(AtomicUsize::new(0));
    for value in [1u32, 2] {
        let calls = calls.clone();
        container
            .provide_with(
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Never>(value)
                },
                ProvideOptions::new().group("numbers"),
            )
            .unwrap();
    }
    let child = container.scope("child");
    child
        .decorate(|_: Arc<Config>| Ok::<_, Never>(Config))
        .unwrap();
    container.supply(Config).unwrap();

    assert!(child.resolve_group::<u32>("numbers").unwrap_err().is_dry_run());
    assert!(child.resolve::<Config>().unwrap_err().is_dry_run());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
