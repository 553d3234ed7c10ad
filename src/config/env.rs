//! Environment placeholder substitution.
//!
//! String values in the config may reference environment variables as
//! `${NAME}` or `$NAME` (bare form restricted to `[A-Z_][A-Z0-9_]*`).
//! Unset or empty variables leave the placeholder untouched.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::schema::ProxyConfig;

static BRACED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid braced placeholder regex"));
static BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Z_][A-Z0-9_]*)").expect("valid bare placeholder regex"));

/// Expand placeholders in `input` using `lookup`.
///
/// Braced placeholders are resolved first, then bare ones, so a braced
/// value that itself contains `$NAME` is expanded again.
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let resolve = |caps: &Captures| -> String {
        match lookup(&caps[1]) {
            Some(value) if !value.is_empty() => value,
            _ => caps[0].to_string(),
        }
    };

    let braced = BRACED.replace_all(input, |caps: &Captures| resolve(caps));
    BARE.replace_all(&braced, |caps: &Captures| resolve(caps)).into_owned()
}

/// Expand placeholders from the process environment.
pub fn expand_placeholders(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Apply placeholder expansion to every string value of the config.
pub fn expand_config<F>(config: &mut ProxyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let expand = |s: &mut String| *s = expand_with(s, &lookup);

    expand(&mut config.listener.bind_address);
    expand(&mut config.audit.log_dir);
    expand(&mut config.observability.metrics_address);
    config.all_users.iter_mut().for_each(expand);

    for (_, route) in config.routes.iter_mut() {
        if let Some(path) = route.path.as_mut() {
            expand(path);
        }
        if let Some(upstream) = route.upstream.as_mut() {
            expand(upstream);
        }
        route.permitted_users.iter_mut().for_each(expand);
        route.permitted_methods.iter_mut().for_each(expand);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "API_HOST" => Some("api.internal".to_string()),
            "PORT" => Some("8443".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn expands_braced_and_bare_forms() {
        assert_eq!(
            expand_with("https://${API_HOST}:$PORT/v1", lookup),
            "https://api.internal:8443/v1"
        );
    }

    #[test]
    fn unresolved_placeholders_are_left_verbatim() {
        assert_eq!(expand_with("${MISSING}/$NOPE", lookup), "${MISSING}/$NOPE");
        assert_eq!(expand_with("$EMPTY", lookup), "$EMPTY");
        // lowercase names are not bare placeholders
        assert_eq!(expand_with("$lower", lookup), "$lower");
    }

    #[test]
    fn expands_route_fields() {
        let mut config = ProxyConfig::default();
        config.routes.insert(
            "api",
            RouteConfig {
                path: Some("/api".into()),
                upstream: Some("http://${API_HOST}".into()),
                permitted_users: vec!["$PORT".into()],
                permitted_methods: vec!["GET".into()],
            },
        );
        expand_config(&mut config, lookup);
        let (_, route) = config.routes.iter().next().unwrap();
        assert_eq!(route.upstream.as_deref(), Some("http://api.internal"));
        assert_eq!(route.permitted_users, vec!["8443"]);
    }
}
