mod common;

use arbor::StatusCode;

#[tokio::test]
async fn middleware_short_circuits_without_next() {
    let addr = common::start(|server| {
        server.middleware(|ctx| {
            Box::pin(async move {
                ctx.set_status(StatusCode::UNAUTHORIZED);
                ctx.write_str("Unauthorized");
                Ok(())
            })
        });
        server.get("/protected", |ctx| {
            Box::pin(async move {
                ctx.write_str("ok");
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/protected").await;
    assert_eq!(response.status, 401);
    assert_eq!(response.body_str(), "Unauthorized");
}

#[tokio::test]
async fn middlewares_run_in_registration_order() {
    let addr = common::start(|server| {
        server.middleware(|ctx| {
            Box::pin(async move {
                ctx.write_str("1>");
                ctx.next().await?;
                ctx.write_str("<1");
                Ok(())
            })
        });
        server.middleware(|ctx| {
            Box::pin(async move {
                ctx.write_str("2>");
                ctx.next().await?;
                ctx.write_str("<2");
                Ok(())
            })
        });
        server.get("/order", |ctx| {
            Box::pin(async move {
                ctx.write_str("h");
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/order").await;
    assert_eq!(response.body_str(), "1>2>h<2<1");
}

#[tokio::test]
async fn middleware_errors_reach_the_error_handler() {
    let addr = common::start(|server| {
        server.middleware(|_ctx| Box::pin(async move { Err(anyhow::anyhow!("denied hard")) }));
        server.get("/x", |ctx| {
            Box::pin(async move {
                ctx.write_str("never");
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/x").await;
    assert_eq!(response.status, 500);
    assert!(!response.body_str().contains("never"));
}

#[tokio::test]
async fn group_routes_compose_prefix_and_auto_advance() {
    let addr = common::start(|server| {
        let mut api = server.group("/api");
        // Neither calls next nor errors; the wrapped layer must still run.
        api.middleware(|ctx| {
            Box::pin(async move {
                ctx.set_header("X-Api", "1");
                Ok(())
            })
        });

        let mut v1 = api.group("/v1");
        v1.get("/users/:id", |ctx| {
            Box::pin(async move {
                let id = ctx.param("id").to_owned();
                ctx.write_str("user:");
                ctx.write_str(&id);
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/api/v1/users/9").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_str(), "user:9");
    assert_eq!(response.header("X-Api"), Some("1"));

    // The group prefix is required.
    let response = common::get(addr, "/v1/users/9").await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn group_middleware_can_still_short_circuit_with_an_error() {
    let addr = common::start(|server| {
        let mut admin = server.group("/admin");
        admin.middleware(|_ctx| Box::pin(async move { Err(anyhow::anyhow!("forbidden")) }));
        admin.get("/panel", |ctx| {
            Box::pin(async move {
                ctx.write_str("secret");
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/admin/panel").await;
    assert_eq!(response.status, 500);
    assert!(!response.body_str().contains("secret"));
}
