use std::collections::HashMap;

use http::Method;

use crate::error::ServerError;
use crate::routing::Tree;

/// The closed set of recognized HTTP methods, in table order.
pub const METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
    Method::CONNECT,
    Method::TRACE,
];

/// O(1) method dispatch. Anything outside the recognized set selects no
/// table at all: lookups miss and registrations abort.
fn method_index(method: &Method) -> Option<usize> {
    match method.as_str() {
        "GET" => Some(0),
        "POST" => Some(1),
        "PUT" => Some(2),
        "PATCH" => Some(3),
        "DELETE" => Some(4),
        "HEAD" => Some(5),
        "OPTIONS" => Some(6),
        "CONNECT" => Some(7),
        "TRACE" => Some(8),
        _ => None,
    }
}

/// Route table: one radix tree plus one exact-match map per method.
///
/// Patterns without `:` or `*` markers live only in the exact-match map,
/// which is consulted before the tree on every lookup; patterned routes go
/// into the tree.
pub struct Router<T> {
    trees: Vec<Tree<T>>,
    exact: Vec<HashMap<String, T>>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Router::new()
    }
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Router {
            trees: (0..METHODS.len()).map(|_| Tree::new()).collect(),
            exact: (0..METHODS.len()).map(|_| HashMap::new()).collect(),
        }
    }

    /// Resolve `path` for `method`, emitting captured parameters in order.
    /// Returns `None` for unrecognized methods and unmatched paths.
    pub fn lookup<'t, 'p>(
        &'t self,
        method: &Method,
        path: &'p str,
        emit: &mut dyn FnMut(&'t str, &'p str),
    ) -> Option<&'t T> {
        let idx = method_index(method)?;
        if let Some(data) = self.exact[idx].get(path) {
            return Some(data);
        }
        self.trees[idx].lookup(path, emit)
    }

    /// Apply `f` to every registered payload across all methods. Used to
    /// wrap handlers uniformly after registration.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut T)) {
        for tree in &mut self.trees {
            tree.visit_mut(f);
        }
        for map in &mut self.exact {
            for data in map.values_mut() {
                f(data);
            }
        }
    }
}

impl<T: Clone> Router<T> {
    /// Register `data` at `pattern` for `method`. Re-registration overwrites.
    pub fn register(&mut self, method: &Method, pattern: &str, data: T) -> Result<(), ServerError> {
        let idx = method_index(method)
            .ok_or_else(|| ServerError::UnknownMethod(method.as_str().to_owned()))?;

        if pattern.contains(':') || pattern.contains('*') {
            self.trees[idx].insert(pattern, data)
        } else {
            self.exact[idx].insert(pattern.to_owned(), data);
            Ok(())
        }
    }
}
