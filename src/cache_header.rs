//! CacheHeaderPolicy (spec.md §4.8): tier selection, ETag generation, and
//! conditional-GET short-circuiting.

use crate::config::{CacheControlConfig, CacheControlTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    UserSpecified,
    SyntheticUserSpecified,
    NoUserSpecified,
}

/// Tier choice: no user → noUserSpecified; `syntheticUser=1` →
/// syntheticUserSpecified; else userSpecified.
pub fn choose_tier(has_user: bool, synthetic_user: bool) -> CacheTier {
    if !has_user {
        CacheTier::NoUserSpecified
    } else if synthetic_user {
        CacheTier::SyntheticUserSpecified
    } else {
        CacheTier::UserSpecified
    }
}

fn tier_config<'a>(config: &'a CacheControlConfig, tier: CacheTier) -> Option<&'a CacheControlTier> {
    match tier {
        CacheTier::UserSpecified => config.user_specified.as_ref(),
        CacheTier::SyntheticUserSpecified => config.synthetic_user_specified.as_ref(),
        CacheTier::NoUserSpecified => config.no_user_specified.as_ref(),
    }
}

/// Composed `(ETag, Cache-Control)` header values for a resolved tier, or
/// `None` when neither `maxAge` nor `directives` is set.
pub struct Headers {
    pub etag: Option<String>,
    pub cache_control: Option<String>,
}

pub fn compose_headers(
    config: Option<&CacheControlConfig>,
    tier: CacheTier,
    path_and_query: &str,
    now_ms: i64,
) -> Headers {
    let Some(tier_cfg) = config.and_then(|c| tier_config(c, tier)) else {
        return Headers {
            etag: None,
            cache_control: None,
        };
    };

    match tier_cfg.max_age {
        Some(max_age) => {
            let checksum = checksum_for(path_and_query);
            let etag = format!("{checksum}-{now_ms}-{max_age}");
            let cache_control = match &tier_cfg.directives {
                Some(directives) if !directives.contains("max-age=") => {
                    format!("{directives},max-age={max_age}")
                }
                Some(directives) => directives.clone(),
                None => format!("max-age={max_age}"),
            };
            Headers {
                etag: Some(etag),
                cache_control: Some(cache_control),
            }
        }
        None => Headers {
            etag: None,
            cache_control: tier_cfg.directives.clone(),
        },
    }
}

/// 32-bit rolling checksum of `path?canonicalQueryString`.
pub fn checksum_for(path_and_query: &str) -> u32 {
    crc32fast::hash(path_and_query.as_bytes())
}

/// Parses `If-None-Match` as `<checksum>-<generatedAtMs>-<maxAgeSeconds>`
/// and reports whether it is still fresh at `now_ms`.
pub fn is_not_modified(if_none_match: &str, now_ms: i64) -> bool {
    let parts: Vec<&str> = if_none_match.rsplitn(3, '-').collect();
    if parts.len() < 3 {
        return false;
    }
    let max_age: i64 = match parts[0].parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    let generated_at: i64 = match parts[1].parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    generated_at + max_age * 1000 > now_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_selection() {
        assert_eq!(choose_tier(false, false), CacheTier::NoUserSpecified);
        assert_eq!(choose_tier(true, true), CacheTier::SyntheticUserSpecified);
        assert_eq!(choose_tier(true, false), CacheTier::UserSpecified);
    }

    #[test]
    fn compose_headers_with_max_age_only() {
        let config = CacheControlConfig {
            user_specified: Some(CacheControlTier {
                max_age: Some(60),
                directives: None,
            }),
            synthetic_user_specified: None,
            no_user_specified: None,
        };
        let headers = compose_headers(Some(&config), CacheTier::UserSpecified, "/p?q=1", 1_000_000);
        assert_eq!(headers.cache_control.unwrap(), "max-age=60");
        assert!(headers.etag.unwrap().ends_with("-1000000-60"));
    }

    #[test]
    fn compose_headers_merges_directives_without_max_age() {
        let config = CacheControlConfig {
            user_specified: Some(CacheControlTier {
                max_age: Some(60),
                directives: Some("private".into()),
            }),
            synthetic_user_specified: None,
            no_user_specified: None,
        };
        let headers = compose_headers(Some(&config), CacheTier::UserSpecified, "/p", 0);
        assert_eq!(headers.cache_control.unwrap(), "private,max-age=60");
    }

    #[test]
    fn compose_headers_directives_only() {
        let config = CacheControlConfig {
            user_specified: Some(CacheControlTier {
                max_age: None,
                directives: Some("no-store".into()),
            }),
            synthetic_user_specified: None,
            no_user_specified: None,
        };
        let headers = compose_headers(Some(&config), CacheTier::UserSpecified, "/p", 0);
        assert_eq!(headers.cache_control.unwrap(), "no-store");
        assert!(headers.etag.is_none());
    }

    #[test]
    fn conditional_get_within_max_age_is_not_modified() {
        let etag = format!("{}-{}-{}", checksum_for("/p"), 1_000_000, 60);
        assert!(is_not_modified(&etag, 1_000_000 + 59_000));
        assert!(!is_not_modified(&etag, 1_000_000 + 61_000));
    }
}
