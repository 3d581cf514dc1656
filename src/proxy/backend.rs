// src/proxy/backend.rs
use std::fmt;
use std::ops::Index;
use std::slice::Iter;
use url::Url;

/// One upstream server, keyed by its base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Base URL without a trailing `/`; also the key in the health registry.
    pub id: String,
    pub url: Url,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        let id = url.as_str().trim_end_matches('/').to_string();
        Self { id, url }
    }

    /// Joins the base URL with an inbound path-and-query by plain concatenation,
    /// so a base path such as `http://host/api` is kept as a prefix.
    pub fn target_url(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.id, path_and_query)
        } else {
            format!("{}/{}", self.id, path_and_query)
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// The configured backends in round-robin order. Fixed for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct BackendSet {
    backends: Vec<Backend>,
}

impl BackendSet {
    pub fn new(urls: impl IntoIterator<Item = Url>) -> Self {
        Self {
            backends: urls.into_iter().map(Backend::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, Backend> {
        self.backends.iter()
    }
}

impl Index<usize> for BackendSet {
    type Output = Backend;

    fn index(&self, index: usize) -> &Backend {
        &self.backends[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> Backend {
        Backend::new(Url::parse(url).unwrap())
    }

    #[test]
    fn test_id_drops_trailing_slash() {
        assert_eq!(backend("http://localhost:8081").id, "http://localhost:8081");
        assert_eq!(backend("http://localhost:8081/").id, "http://localhost:8081");
        assert_eq!(backend("http://svc/api/").id, "http://svc/api");
    }

    #[test]
    fn test_target_url_concatenates() {
        let b = backend("http://localhost:8081");
        assert_eq!(b.target_url("/"), "http://localhost:8081/");
        assert_eq!(
            b.target_url("/users?id=7&sort=asc"),
            "http://localhost:8081/users?id=7&sort=asc"
        );

        let prefixed = backend("http://svc/api");
        assert_eq!(prefixed.target_url("/v1/items"), "http://svc/api/v1/items");
        assert_eq!(prefixed.target_url("x"), "http://svc/api/x");
    }

    #[test]
    fn test_set_keeps_configured_order() {
        let set = BackendSet::new(vec![
            Url::parse("http://b:2").unwrap(),
            Url::parse("http://a:1").unwrap(),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].id, "http://b:2");
        assert_eq!(set[1].id, "http://a:1");
        assert!(BackendSet::default().is_empty());
    }
}
