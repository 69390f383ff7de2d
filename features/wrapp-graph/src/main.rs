use std::{convert::Infallible, sync::Arc};

use wrapp_graph::{Container, DiError, SchedulerKind};

fn main() -> Result<(), DiError> {
    let app = Container::builder()
        .scheduler(SchedulerKind::Parallel(2))
        .build();

    app.supply("test".to_string())?;
    app.provide(|name: Arc<String>| Ok::<_, Infallible>(Test { a: name }))?;

    let request = app.scope("request");
    request.decorate(|test: Arc<Test>| {
        Ok::<_, Infallible>(Test {
            a: Arc::new(format!("{}-request", test.a)),
        })
    })?;

    println!("{:?}", app);
    println!("{:?}", app.resolve::<Test>()?);
    println!("{:?}", request.resolve::<Test>()?);
    Ok(())
}

#[derive(Debug)]
struct Test {
    a: Arc<String>,
}
