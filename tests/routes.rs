mod common;

use arbor::{Method, Server, ServerError};

#[tokio::test]
async fn static_route_wins_over_parameter() {
    let addr = common::start(|server| {
        server.get("/greet/city", |ctx| {
            Box::pin(async move {
                ctx.write_str("city handler");
                Ok(())
            })
        });
        server.get("/greet/:name", |ctx| {
            Box::pin(async move {
                let name = ctx.param("name").to_owned();
                ctx.write_str("Hello ");
                ctx.write_str(&name);
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/greet/city").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_str(), "city handler");

    let response = common::get(addr, "/greet/alice").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_str(), "Hello alice");
}

#[tokio::test]
async fn consecutive_parameters_capture_in_order() {
    let addr = common::start(|server| {
        server.get("/posts/:year/:title", |ctx| {
            Box::pin(async move {
                let rendered = format!("{}:{}", ctx.param("year"), ctx.param("title"));
                ctx.write_str(&rendered);
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/posts/2024/easter-message").await;
    assert_eq!(response.body_str(), "2024:easter-message");
}

#[test]
fn conflicting_parameter_names_are_rejected() {
    let mut server = Server::new();
    server.get("/posts/:year/:title", |ctx| {
        Box::pin(async move {
            ctx.write_str("ok");
            Ok(())
        })
    });

    let err = server
        .try_route(
            Method::GET,
            "/posts/:year/:slug",
            arbor::handler(|ctx| {
                Box::pin(async move {
                    ctx.write_str("never");
                    Ok(())
                })
            }),
        )
        .unwrap_err();

    assert!(matches!(err, ServerError::RouteConflict { .. }));
}

#[tokio::test]
async fn wildcard_falls_back_behind_statics() {
    let addr = common::start(|server| {
        server.get("/images/static", |ctx| {
            Box::pin(async move {
                ctx.write_str("static");
                Ok(())
            })
        });
        server.get("/images/*path", |ctx| {
            Box::pin(async move {
                let path = ctx.param("path").to_owned();
                ctx.write_str(&path);
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/images/static").await;
    assert_eq!(response.body_str(), "static");

    let response = common::get(addr, "/images/favicon/256.png").await;
    assert_eq!(response.body_str(), "favicon/256.png");
}

#[tokio::test]
async fn unmatched_paths_answer_404() {
    let addr = common::start(|server| {
        server.get("/known", |ctx| {
            Box::pin(async move {
                ctx.write_str("ok");
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/unknown").await;
    assert_eq!(response.status, 404);
    assert_eq!(response.body_str(), "Not Found");

    // Same path, unregistered method.
    let raw = b"POST /known HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n";
    let response = common::roundtrip(addr, raw).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn query_strings_are_split_off_the_path() {
    let addr = common::start(|server| {
        server.get("/search", |ctx| {
            Box::pin(async move {
                let q = ctx.query_value("q").unwrap_or_default();
                ctx.write_str(&q);
                Ok(())
            })
        });
    })
    .await;

    let response = common::get(addr, "/search?q=rust%20lang&page=1").await;
    assert_eq!(response.body_str(), "rust lang");
}

#[tokio::test]
async fn handler_errors_become_opaque_500s() {
    let addr = common::start(|server| {
        server.get("/boom", |_ctx| {
            Box::pin(async move { Err(anyhow::anyhow!("database exploded")) })
        });
    })
    .await;

    let response = common::get(addr, "/boom").await;
    assert_eq!(response.status, 500);
    let body = response.body_str();
    assert!(body.contains("Reference: "));
    // The underlying error text never leaks to the client.
    assert!(!body.contains("database exploded"));
}
