use std::sync::Arc;

use http::{Method, StatusCode};

use crate::context::Context;
use crate::handler::{handler, Handler, HandlerFuture};
use crate::routing::Router;
use crate::server::Server;

/// Terminal element of the middleware chain: resolves the route table and
/// invokes the matched handler, or emits a 404.
pub(crate) fn dispatch(router: Arc<Router<Handler>>) -> Handler {
    handler(move |ctx| {
        let router = router.clone();
        Box::pin(async move {
            // The path is moved out for the duration of the lookup so the
            // parameter emitter can borrow the context mutably.
            let path = std::mem::take(&mut ctx.path);
            let method = ctx.method.clone();
            let matched = router
                .lookup(&method, &path, &mut |name, value| {
                    ctx.push_param(name, value)
                })
                .cloned();
            ctx.path = path;

            match matched {
                Some(route) => route(ctx).await,
                None => {
                    ctx.set_status(StatusCode::NOT_FOUND);
                    ctx.write_str("Not Found");
                    Ok(())
                }
            }
        })
    })
}

/// Fold `middlewares` around `terminal` right-to-left. Each layer receives a
/// context whose `next` invokes the next wrapped layer.
pub(crate) fn wrap(middlewares: &[Handler], terminal: Handler) -> Handler {
    let mut wrapped = terminal;
    for mw in middlewares.iter().rev() {
        wrapped = layer(mw.clone(), wrapped);
    }
    wrapped
}

fn layer(mw: Handler, inner: Handler) -> Handler {
    handler(move |ctx| {
        let mw = mw.clone();
        let inner = inner.clone();
        Box::pin(async move {
            ctx.layers.push(inner);
            let depth = ctx.layers.len();

            let result = mw(ctx).await;
            let advanced = ctx.layers.len() < depth;

            if let Err(e) = result {
                if !advanced {
                    ctx.layers.pop();
                }
                return Err(e);
            }
            if !advanced {
                // A group middleware that neither errors nor calls `next`
                // still advances to the next layer.
                return ctx.next().await;
            }
            Ok(())
        })
    })
}

/// Route builder bundling a path prefix with a list of group middlewares.
///
/// Routes registered through a group are composed as `prefix + pattern` and
/// their handlers are wrapped in the group middlewares before landing on the
/// parent server. Nested groups concatenate prefixes and extend the
/// middleware list.
pub struct Group<'s> {
    server: &'s mut Server,
    prefix: String,
    middlewares: Vec<Handler>,
}

impl<'s> Group<'s> {
    pub(crate) fn new(server: &'s mut Server, prefix: &str) -> Self {
        Group {
            server,
            prefix: prefix.to_owned(),
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware applied to every route subsequently registered on
    /// this group (and its sub-groups).
    pub fn middleware<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.middlewares.push(handler(f));
        self
    }

    /// Derive a nested group. The child starts with this group's prefix and
    /// middleware list.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            prefix: format!("{}{}", self.prefix, prefix),
            middlewares: self.middlewares.clone(),
            server: &mut *self.server,
        }
    }

    /// Register `h` for `method` under this group's prefix.
    pub fn route(&mut self, method: Method, pattern: &str, h: Handler) {
        let full = format!("{}{}", self.prefix, pattern);
        let wrapped = wrap(&self.middlewares, h);
        self.server.route(method, &full, wrapped);
    }

    pub fn get<F>(&mut self, pattern: &str, f: F)
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::GET, pattern, handler(f));
    }

    pub fn post<F>(&mut self, pattern: &str, f: F)
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::POST, pattern, handler(f));
    }

    pub fn put<F>(&mut self, pattern: &str, f: F)
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::PUT, pattern, handler(f));
    }

    pub fn patch<F>(&mut self, pattern: &str, f: F)
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::PATCH, pattern, handler(f));
    }

    pub fn delete<F>(&mut self, pattern: &str, f: F)
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::DELETE, pattern, handler(f));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerResult;

    fn recording(tag: &'static str, advance: bool) -> Handler {
        handler(move |ctx| {
            Box::pin(async move {
                ctx.write_str(tag);
                if advance {
                    ctx.next().await
                } else {
                    Ok(())
                }
            })
        })
    }

    fn failing(tag: &'static str) -> Handler {
        handler(move |ctx| {
            Box::pin(async move {
                ctx.write_str(tag);
                Err(anyhow::anyhow!("boom"))
            })
        })
    }

    async fn run(h: Handler) -> (Context, HandlerResult) {
        let mut ctx = Context::new();
        let result = h(&mut ctx).await;
        (ctx, result)
    }

    #[tokio::test]
    async fn wrapped_layers_run_in_registration_order() {
        let terminal = recording("t", false);
        let wrapped = wrap(&[recording("a", true), recording("b", true)], terminal);

        let (ctx, result) = run(wrapped).await;
        result.unwrap();
        assert_eq!(ctx.response_body(), b"abt");
    }

    #[tokio::test]
    async fn group_middleware_auto_advances() {
        // "a" never calls next, yet the terminal handler still runs.
        let terminal = recording("t", false);
        let wrapped = wrap(&[recording("a", false)], terminal);

        let (ctx, result) = run(wrapped).await;
        result.unwrap();
        assert_eq!(ctx.response_body(), b"at");
    }

    #[tokio::test]
    async fn erroring_layer_stops_the_composition() {
        let terminal = recording("t", false);
        let wrapped = wrap(&[failing("x"), recording("b", true)], terminal);

        let (ctx, result) = run(wrapped).await;
        assert!(result.is_err());
        assert_eq!(ctx.response_body(), b"x");
        assert!(ctx.layers.is_empty());
    }

    #[tokio::test]
    async fn dispatch_emits_404_for_unknown_paths() {
        let router: Router<Handler> = Router::new();
        let d = dispatch(Arc::new(router));

        let mut ctx = Context::new();
        ctx.path = "/missing".to_owned();
        d(&mut ctx).await.unwrap();

        assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
        assert_eq!(ctx.response_body(), b"Not Found");
    }

    #[tokio::test]
    async fn dispatch_invokes_the_matched_route_with_params() {
        let mut router: Router<Handler> = Router::new();
        router
            .register(
                &Method::GET,
                "/greet/:name",
                handler(|ctx| {
                    Box::pin(async move {
                        let name = ctx.param("name").to_owned();
                        ctx.write_str("Hello ");
                        ctx.write_str(&name);
                        Ok(())
                    })
                }),
            )
            .unwrap();

        let d = dispatch(Arc::new(router));
        let mut ctx = Context::new();
        ctx.path = "/greet/alice".to_owned();
        d(&mut ctx).await.unwrap();

        assert_eq!(ctx.response_body(), b"Hello alice");
    }
}
