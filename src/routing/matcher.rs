//! Route matching and path rewriting.
//!
//! # Responsibilities
//! - Longest-prefix match of a request path against the route table
//! - CONNECT lookup by upstream hostname
//! - Suffix extraction and path joining for the destination URL
//!
//! # Design Decisions
//! - Path matching is case-sensitive and segment-aware: `/api` matches
//!   `/api` and `/api/...` but never `/apiary`
//! - Ties on path length go to the earlier route in the table
//! - Host lookup is first-match in table order; several routes sharing an
//!   upstream host all resolve to the first of them

use crate::routing::table::{Route, RouteTable};

impl RouteTable {
    /// Find the most specific route for a normalised request path.
    pub fn match_path(&self, pathname: &str) -> Option<&Route> {
        let mut best: Option<&Route> = None;
        let mut best_len = 0;

        for route in self.iter() {
            let (Some(path), Some(prefix)) = (route.path.as_deref(), route.prefix.as_deref()) else {
                continue;
            };
            if pathname != path && !pathname.starts_with(prefix) {
                continue;
            }
            if best.is_none() || path.len() > best_len {
                best = Some(route);
                best_len = path.len();
            }
        }

        best
    }

    /// Find the first route whose upstream hostname equals `host`.
    pub fn match_host(&self, host: &str) -> Option<&Route> {
        self.iter().find(|route| {
            route
                .upstream_host()
                .map(|h| h.eq_ignore_ascii_case(host))
                .unwrap_or(false)
        })
    }
}

impl Route {
    /// The part of `pathname` below this route, always starting with `/`.
    ///
    /// `pathname` equal to the route path yields `/`.
    pub fn suffix_for(&self, pathname: &str) -> String {
        let Some(path) = self.path.as_deref() else {
            return "/".to_string();
        };
        if pathname == path {
            return "/".to_string();
        }

        let suffix = pathname.strip_prefix(path).unwrap_or("/");
        if suffix.starts_with('/') {
            suffix.to_string()
        } else {
            format!("/{}", suffix)
        }
    }
}

/// Join a base path and a suffix into a single absolute path.
///
/// The base gets exactly one trailing `/`, one leading `/` is dropped from
/// the suffix, runs of `/` collapse to one and the result always starts
/// with a single `/`. An empty suffix yields the base with a trailing `/`.
pub fn join_paths(base: &str, suffix: &str) -> String {
    let base = if base.is_empty() { "/" } else { base };
    let suffix = suffix.strip_prefix('/').unwrap_or(suffix);

    let mut combined = String::with_capacity(base.len() + suffix.len() + 2);
    combined.push('/');
    for segment in base.split('/').chain(std::iter::once("")) {
        push_segment(&mut combined, segment);
    }
    for segment in suffix.split('/') {
        push_segment(&mut combined, segment);
    }
    combined
}

fn push_segment(out: &mut String, segment: &str) {
    if segment.is_empty() {
        if !out.ends_with('/') {
            out.push('/');
        }
        return;
    }
    if !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(segment);
}
