//! Cookie helpers on [`Context`]. Attribute handling (Path, Max-Age, ...)
//! is deliberately out of scope; callers needing attributes append their own
//! `Set-Cookie` header.

use crate::context::Context;

impl Context {
    /// Value of the request cookie `name`, parsed from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let header = self.header("Cookie")?;
        for pair in header.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=') {
                if k == name {
                    return Some(v);
                }
            }
        }
        None
    }

    /// Append a bare `name=value` `Set-Cookie` response header.
    pub fn set_cookie(&mut self, name: &str, value: &str) -> &mut Self {
        self.set_header("Set-Cookie", &format!("{name}={value}"))
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Context;

    #[test]
    fn reads_cookies_from_the_header() {
        let mut ctx = Context::new();
        ctx.request_headers.push("Cookie", "a=1; session=xyz; b=2");

        assert_eq!(ctx.cookie("session"), Some("xyz"));
        assert_eq!(ctx.cookie("a"), Some("1"));
        assert_eq!(ctx.cookie("missing"), None);
    }

    #[test]
    fn tolerates_malformed_pairs() {
        let mut ctx = Context::new();
        ctx.request_headers.push("Cookie", "junk; ok=yes");
        assert_eq!(ctx.cookie("ok"), Some("yes"));
    }

    #[test]
    fn set_cookie_appends_headers() {
        let mut ctx = Context::new();
        ctx.set_cookie("a", "1").set_cookie("b", "2");

        let cookies: Vec<_> = ctx
            .response_headers()
            .iter()
            .filter(|(k, _)| k == "Set-Cookie")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }
}
