//! Filter-arn resolution (spec.md §4.9 step 5).

use crate::config::FiltersConfig;

/// Resolves the effective filter arn: a caller-supplied filter name is
/// expanded into an arn using the request's region; absent that, the first
/// namespace-configured filter whose `condition` is empty, or `user-required`
/// and satisfied by the request, is used.
pub fn resolve_filter_arn(
    caller_filter: Option<&str>,
    region: &str,
    configured: Option<&FiltersConfig>,
    has_user: bool,
) -> Option<String> {
    if let Some(name) = caller_filter {
        return Some(expand_filter_arn(name, region));
    }
    let configured = configured?;
    configured
        .iter()
        .find(|f| match f.condition.as_deref() {
            None | Some("") => true,
            Some("user-required") => has_user,
            _ => false,
        })
        .map(|f| f.arn.clone())
}

fn expand_filter_arn(name: &str, region: &str) -> String {
    if name.starts_with("arn:") {
        return name.to_string();
    }
    format!("arn:aws:personalize:{region}:filter/{name}")
}
