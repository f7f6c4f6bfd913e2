use itertools::Itertools;

pub const DEFAULT_ROUTE_PATTERN: &str = "{language}/catalog/{category}/{id}-{alias}";

/// Everything needed to route to a product page.
#[derive(Debug, Clone, Copy)]
pub struct ProductRoute<'a> {
    pub id: i64,
    pub alias: &'a str,
    pub category: i64,
    pub language: &'a str,
}

/// Builds site-relative product URLs, base path included.
pub trait Router: Send + Sync {
    fn product_route(&self, route: &ProductRoute<'_>) -> String;
}

/// Router driven by a path pattern with `{id}`, `{alias}`, `{category}` and
/// `{language}` placeholders. The `*` language renders as nothing.
pub struct PatternRouter {
    pattern: String,
    base_path: String,
}

impl PatternRouter {
    pub fn new<S: Into<String>>(pattern: S, base_path: &str) -> Self {
        Self {
            pattern: pattern.into(),
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }
}

impl Router for PatternRouter {
    fn product_route(&self, route: &ProductRoute<'_>) -> String {
        let language = match route.language {
            "*" => "",
            l => l,
        };
        let path = self
            .pattern
            .replace("{id}", &route.id.to_string())
            .replace("{alias}", route.alias)
            .replace("{category}", &route.category.to_string())
            .replace("{language}", language);
        let path = path.split('/').filter(|s| !s.is_empty()).join("/");
        format!("{}/{path}", self.base_path)
    }
}

/// Public site address split into the root URL and the base path the
/// site is installed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrl {
    root: String,
    base_path: String,
}

impl SiteUrl {
    pub fn parse(s: &str) -> Result<Self, url::ParseError> {
        let url = url::Url::parse(s)?;
        Ok(Self {
            root: format!("{}/", url.origin().ascii_serialization()),
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    /// Scheme and host with a trailing slash, without the base path.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Install path without trailing slash, empty for sites at the domain root.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Absolute URL for a route that may carry the base path segment.
    pub fn absolute(&self, path: &str) -> String {
        let path = match path.strip_prefix(&self.base_path) {
            Some(rest) if !self.base_path.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
                rest
            }
            _ => path,
        };
        self.resource(path)
    }

    /// Absolute URL for a stored file path, taken as is.
    pub fn resource(&self, path: &str) -> String {
        format!("{}{}", self.root, path.trim_matches('/'))
    }
}
