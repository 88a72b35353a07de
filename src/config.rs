//! Route configuration parsing and merging (§4.7).
//!
//! A route module may export a `config` declaration; Waypoint models the
//! permissive, dynamically-typed source object as a tagged record with one
//! validator per subsection, following the "dynamic typing of config
//! objects" design note: unknown input is accepted, recognized fields are
//! validated, and merging is a shallow parent/child override except for
//! `middleware`, which concatenates.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure parsing a route configuration declaration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("middleware field must be a list of names or handler references")]
    InvalidMiddlewareList,
    #[error("unrecognized render mode {0:?}")]
    InvalidRenderMode(String),
    #[error("prerender paths must be a list of strings or a function returning one")]
    InvalidPrerenderPaths,
    #[error("unrecognized hydration strategy {0:?}")]
    InvalidHydrationStrategy(String),
    #[error("unrecognized prefetch trigger {0:?}")]
    InvalidPrefetchTrigger(String),
    #[error("variant {0:?} is missing a path")]
    VariantMissingPath(String),
}

/// A reference to a middleware, either by registry name or (conceptually)
/// an inline handler. Waypoint's static representation only carries names;
/// inline handler references are resolved by the embedding application
/// before being registered under a name (see `middleware::registry`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiddlewareRef {
    /// A name looked up in the middleware registry at dispatch time.
    Named(String),
}

/// Render mode for a route, `render.mode` in the source configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Ssg,
    Ssr,
    Csr,
    Json,
    Xml,
}

impl RenderMode {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "ssg" => Ok(RenderMode::Ssg),
            "ssr" => Ok(RenderMode::Ssr),
            "csr" => Ok(RenderMode::Csr),
            "json" => Ok(RenderMode::Json),
            "xml" => Ok(RenderMode::Xml),
            other => Err(ConfigError::InvalidRenderMode(other.to_owned())),
        }
    }
}

/// Streaming sub-options under `render`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub enabled: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig { enabled: true }
    }
}

/// Either a fixed path list, or a marker that the embedding application
/// supplies one dynamically (possibly asynchronously). Per Open Question
/// (b), an empty list and "supplies dynamically but returned nothing" are
/// treated identically downstream — both normalize to `None` via
/// `PrerenderPaths::non_empty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrerenderPaths {
    Fixed(Vec<String>),
    Dynamic,
}

impl PrerenderPaths {
    pub fn non_empty(&self) -> Option<&[String]> {
        match self {
            PrerenderPaths::Fixed(paths) if !paths.is_empty() => Some(paths),
            _ => None,
        }
    }
}

/// `render` subsection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub mode: RenderMode,
    pub streaming: StreamingConfig,
    pub prerender_paths: Option<PrerenderPaths>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            mode: RenderMode::Ssr,
            streaming: StreamingConfig::default(),
            prerender_paths: None,
        }
    }
}

/// `auth` subsection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub required: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub redirect: Option<String>,
}

/// `cache` subsection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: Option<u64>,
    pub swr_seconds: Option<u64>,
}

/// `progressive` subsection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveConfig {
    pub enabled: bool,
}

/// A single named hydration island entry under `islands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IslandConfig {
    pub name: String,
    pub strategy: String,
}

/// `dev` subsection: development-only overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevConfig {
    pub overlay: bool,
}

/// A named variant, e.g. an A/B branch with its own path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub name: String,
    pub path: String,
}

/// The full, validated route configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub middleware: Vec<MiddlewareRef>,
    pub render: Option<RenderConfig>,
    pub cache: Option<CacheConfig>,
    pub auth: Option<AuthConfig>,
    pub progressive: Option<ProgressiveConfig>,
    pub islands: Vec<IslandConfig>,
    pub dev: Option<DevConfig>,
    pub variants: Vec<VariantConfig>,
}

/// Raw, loosely-typed input as it might arrive from a dynamically-typed
/// route module export. Waypoint's embedding layer is responsible for
/// projecting its own source representation onto this shape before calling
/// `parse_route_config`.
#[derive(Debug, Clone, Default)]
pub struct RawRouteConfig {
    pub middleware: Option<Vec<String>>,
    pub render_mode: Option<String>,
    pub streaming_enabled: Option<bool>,
    pub prerender_paths: Option<Vec<String>>,
    pub prerender_is_dynamic: bool,
    pub auth_required: Option<bool>,
    pub auth_roles: Vec<String>,
    pub auth_permissions: Vec<String>,
    pub auth_redirect: Option<String>,
    pub cache: Option<CacheConfig>,
    pub progressive_enabled: Option<bool>,
    pub islands: Vec<IslandConfig>,
    pub dev_overlay: Option<bool>,
    pub variants: Vec<VariantConfig>,
}

/// Validates and canonicalizes a raw configuration declaration.
pub fn parse_route_config(raw: &RawRouteConfig) -> Result<RouteConfig, ConfigError> {
    let middleware = match &raw.middleware {
        None => Vec::new(),
        Some(names) => names
            .iter()
            .map(|name| MiddlewareRef::Named(name.clone()))
            .collect(),
    };

    let render = if raw.render_mode.is_some()
        || raw.streaming_enabled.is_some()
        || raw.prerender_paths.is_some()
        || raw.prerender_is_dynamic
    {
        let mut cfg = RenderConfig::default();
        if let Some(mode) = &raw.render_mode {
            cfg.mode = RenderMode::parse(mode)?;
        }
        if let Some(enabled) = raw.streaming_enabled {
            cfg.streaming.enabled = enabled;
        }
        cfg.prerender_paths = if raw.prerender_is_dynamic {
            Some(PrerenderPaths::Dynamic)
        } else {
            raw.prerender_paths
                .clone()
                .map(PrerenderPaths::Fixed)
        };
        Some(cfg)
    } else {
        None
    };

    let auth = if raw.auth_required.is_some()
        || !raw.auth_roles.is_empty()
        || !raw.auth_permissions.is_empty()
        || raw.auth_redirect.is_some()
    {
        Some(AuthConfig {
            required: raw.auth_required.unwrap_or(false),
            roles: raw.auth_roles.clone(),
            permissions: raw.auth_permissions.clone(),
            redirect: raw.auth_redirect.clone(),
        })
    } else {
        None
    };

    for variant in &raw.variants {
        if variant.path.is_empty() {
            return Err(ConfigError::VariantMissingPath(variant.name.clone()));
        }
    }

    Ok(RouteConfig {
        middleware,
        render,
        cache: raw.cache.clone(),
        auth,
        progressive: raw
            .progressive_enabled
            .map(|enabled| ProgressiveConfig { enabled }),
        islands: raw.islands.clone(),
        dev: raw.dev_overlay.map(|overlay| DevConfig { overlay }),
        variants: raw.variants.clone(),
    })
}

/// Merges `child` over `parent`: `middleware` concatenates (parent first),
/// every other field uses `child`'s value if set, else `parent`'s. Nested
/// objects are never deep-merged.
pub fn merge_route_configs(parent: &RouteConfig, child: &RouteConfig) -> RouteConfig {
    RouteConfig {
        middleware: parent
            .middleware
            .iter()
            .cloned()
            .chain(child.middleware.iter().cloned())
            .collect(),
        render: child.render.clone().or_else(|| parent.render.clone()),
        cache: child.cache.clone().or_else(|| parent.cache.clone()),
        auth: child.auth.clone().or_else(|| parent.auth.clone()),
        progressive: child
            .progressive
            .clone()
            .or_else(|| parent.progressive.clone()),
        islands: if child.islands.is_empty() {
            parent.islands.clone()
        } else {
            child.islands.clone()
        },
        dev: child.dev.clone().or_else(|| parent.dev.clone()),
        variants: if child.variants.is_empty() {
            parent.variants.clone()
        } else {
            child.variants.clone()
        },
    }
}

/// Collects every middleware name referenced by `config`, used by the typed
/// chain validator in `middleware::registry`.
pub fn middleware_names(config: &RouteConfig) -> HashSet<String> {
    config
        .middleware
        .iter()
        .map(|m| match m {
            MiddlewareRef::Named(name) => name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_render_is_ssr_with_streaming_enabled() {
        let raw = RawRouteConfig::default();
        let cfg = parse_route_config(&raw).unwrap();
        assert!(cfg.render.is_none());
    }

    #[test]
    fn render_mode_must_be_one_of_five_values() {
        let mut raw = RawRouteConfig::default();
        raw.render_mode = Some("wat".to_owned());
        assert_eq!(
            parse_route_config(&raw),
            Err(ConfigError::InvalidRenderMode("wat".to_owned()))
        );
    }

    #[test]
    fn variant_without_path_fails() {
        let mut raw = RawRouteConfig::default();
        raw.variants.push(VariantConfig {
            name: "b".to_owned(),
            path: String::new(),
        });
        assert!(parse_route_config(&raw).is_err());
    }

    #[test]
    fn merge_concatenates_middleware_parent_first() {
        let parent = RouteConfig {
            middleware: vec![MiddlewareRef::Named("auth".to_owned())],
            ..RouteConfig::default()
        };
        let child = RouteConfig {
            middleware: vec![MiddlewareRef::Named("logging".to_owned())],
            ..RouteConfig::default()
        };
        let merged = merge_route_configs(&parent, &child);
        assert_eq!(
            merged.middleware,
            vec![
                MiddlewareRef::Named("auth".to_owned()),
                MiddlewareRef::Named("logging".to_owned())
            ]
        );
    }

    #[test]
    fn merge_is_shallow_child_override_for_non_middleware_fields() {
        let parent = RouteConfig {
            cache: Some(CacheConfig {
                ttl_seconds: Some(60),
                swr_seconds: None,
            }),
            ..RouteConfig::default()
        };
        let child = RouteConfig {
            cache: Some(CacheConfig {
                ttl_seconds: Some(30),
                swr_seconds: None,
            }),
            ..RouteConfig::default()
        };
        let merged = merge_route_configs(&parent, &child);
        assert_eq!(merged.cache.unwrap().ttl_seconds, Some(30));
    }

    #[test]
    fn merge_falls_back_to_parent_when_child_unset() {
        let parent = RouteConfig {
            auth: Some(AuthConfig {
                required: true,
                roles: vec!["admin".to_owned()],
                permissions: vec![],
                redirect: None,
            }),
            ..RouteConfig::default()
        };
        let child = RouteConfig::default();
        let merged = merge_route_configs(&parent, &child);
        assert!(merged.auth.unwrap().required);
    }

    #[test]
    fn repeated_merge_with_self_is_idempotent() {
        let a = RouteConfig {
            middleware: vec![MiddlewareRef::Named("m".to_owned())],
            ..RouteConfig::default()
        };
        let once = merge_route_configs(&a, &a);
        let twice = merge_route_configs(&once, &a);
        // Middleware grows on each merge (concatenation is not idempotent by
        // construction), but every non-middleware field stabilizes after the
        // first merge.
        assert_eq!(once.cache, twice.cache);
        assert_eq!(once.render, twice.render);
    }
}
