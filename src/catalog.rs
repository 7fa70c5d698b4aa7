//! Catalog pages and the walker that flattens them into endpoint sets.
//!
//! A catalog page is JSON shaped as `{"head": {"title": ..}, "body": [..]}`.
//! Each body element is parsed into a closed [`CatalogNode`] before any URL
//! is extracted, so a payload that fits none of the known shapes fails the
//! whole page instead of silently scoring a partial one.
//!
//! Per element, the first matching field wins:
//!
//! 1. `URL` or `url`: a leaf
//! 2. `children`: a container
//! 3. `body`: a container
//! 4. `text`: descriptive only, no endpoints
//! 5. anything else: [`CatalogError::SchemaMismatch`]

use anyhow::{Context, Result};
use log::{debug, trace};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::cache::{cache_key, ResponseCache};
use crate::http::{Fetch, FetchError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("catalog response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// True when `err` carries the catalog's quota-exceeded signal.
pub fn is_quota_exceeded(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<FetchError>(), Some(FetchError::QuotaExceeded { .. }))
}

/// One element of a catalog page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogNode {
    /// Directly addressable endpoint (a stream or another category page)
    Leaf(String),
    /// Nested elements, in document order
    Container(Vec<CatalogNode>),
    /// Descriptive text only
    Text,
}

impl CatalogNode {
    /// Parse one JSON element.
    pub fn parse(value: &Value) -> Result<Self, CatalogError> {
        let Value::Object(fields) = value else {
            return Err(mismatch(value));
        };

        for key in ["URL", "url"] {
            if let Some(url) = fields.get(key) {
                return match url {
                    Value::String(url) => Ok(Self::Leaf(url.clone())),
                    other => Err(CatalogError::SchemaMismatch(format!("non-string {key}: {other}"))),
                };
            }
        }
        for key in ["children", "body"] {
            if let Some(nested) = fields.get(key) {
                return parse_nodes(nested).map(Self::Container);
            }
        }
        if fields.contains_key("text") {
            return Ok(Self::Text);
        }
        Err(mismatch(value))
    }

    fn collect_into(&self, urls: &mut BTreeSet<String>) {
        match self {
            Self::Leaf(url) => {
                urls.insert(url.clone());
            }
            Self::Container(children) => {
                for child in children {
                    child.collect_into(urls);
                }
            }
            Self::Text => {}
        }
    }
}

fn mismatch(value: &Value) -> CatalogError {
    CatalogError::SchemaMismatch(format!("unrecognized element: {value}"))
}

/// Parse a `children`/`body` value: a list of elements or a single element.
fn parse_nodes(value: &Value) -> Result<Vec<CatalogNode>, CatalogError> {
    match value {
        Value::Array(items) => items.iter().map(CatalogNode::parse).collect(),
        Value::Object(_) => Ok(vec![CatalogNode::parse(value)?]),
        other => Err(mismatch(other)),
    }
}

/// Union of every leaf URL below `nodes`.
pub fn endpoints_of(nodes: &[CatalogNode]) -> BTreeSet<String> {
    let mut urls = BTreeSet::new();
    for node in nodes {
        node.collect_into(&mut urls);
    }
    urls
}

/// A parsed catalog page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    pub title: String,
    pub body: Vec<CatalogNode>,
}

impl CatalogPage {
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        let document: Value = serde_json::from_str(text)?;
        Self::from_value(&document)
    }

    pub fn from_value(document: &Value) -> Result<Self, CatalogError> {
        let title = match document.get("head") {
            Some(head) => head
                .get("title")
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .unwrap_or_else(|| head.to_string()),
            None => "?".to_string(),
        };
        let body = document
            .get("body")
            .ok_or_else(|| CatalogError::SchemaMismatch("page without body".to_string()))?;
        Ok(Self {
            title,
            body: parse_nodes(body)?,
        })
    }

    pub fn endpoints(&self) -> BTreeSet<String> {
        endpoints_of(&self.body)
    }
}

/// Where a walk starts or continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogTarget {
    /// The catalog's browse root, optionally narrowed to a root category
    /// such as `music` or `local`.
    Root { category: Option<String> },
    /// A category page: either a full URL or a bare id like `r0`.
    Node(String),
}

impl CatalogTarget {
    pub fn root() -> Self {
        Self::Root { category: None }
    }

    /// URL and query parameters identifying this page.
    pub fn request(&self, browse_url: &str) -> (String, Vec<(String, String)>) {
        match self {
            Self::Root { category: None } => (browse_url.to_string(), Vec::new()),
            Self::Root { category: Some(category) } => {
                (browse_url.to_string(), vec![("c".to_string(), category.clone())])
            }
            Self::Node(node) => (node_url(browse_url, node), Vec::new()),
        }
    }
}

/// Bare node ids become `Browse.ashx?id=<id>` URLs; full URLs pass through.
pub fn node_url(browse_url: &str, node: &str) -> String {
    if node.contains("://") {
        node.to_string()
    } else {
        format!("{browse_url}?id={node}")
    }
}

/// Resolves catalog pages into endpoint sets through the response cache.
pub struct CatalogWalker<'a> {
    cache: ResponseCache<'a>,
    source: &'a dyn Fetch,
    browse_url: String,
}

impl<'a> CatalogWalker<'a> {
    pub fn new(cache: ResponseCache<'a>, source: &'a dyn Fetch, browse_url: impl Into<String>) -> Self {
        Self {
            cache,
            source,
            browse_url: browse_url.into(),
        }
    }

    pub fn browse_url(&self) -> &str {
        &self.browse_url
    }

    /// Title and endpoint set of the page at `target`.
    ///
    /// # Errors
    ///
    /// - [`FetchError::QuotaExceeded`] when the catalog refuses more queries
    ///   (check with [`is_quota_exceeded`])
    /// - [`FetchError::Unavailable`] once transient failures exhaust the retries
    /// - [`CatalogError`] for malformed pages
    pub fn resolve(&self, target: &CatalogTarget) -> Result<(String, BTreeSet<String>)> {
        let page = self.page(target)?;
        let urls = page.endpoints();
        debug!("{:?} -> {} endpoints under {:?}", target, urls.len(), page.title);
        Ok((page.title, urls))
    }

    /// Parsed page at `target`, served from the cache when possible.
    pub fn page(&self, target: &CatalogTarget) -> Result<CatalogPage> {
        let (url, params) = self.request(target);
        let params: Vec<(&str, &str)> = params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let key = cache_key(&url, &params);

        if let Some(text) = self.cache.get(&key)? {
            trace!("Cache hit for {key}");
            return CatalogPage::parse(&text).with_context(|| format!("Cached page {key} is malformed"));
        }

        let mut query = params.clone();
        query.push(("render", "json"));
        let text = self.source.fetch(&url, &query)?;
        let page = CatalogPage::parse(&text).with_context(|| format!("Catalog page {key} is malformed"))?;
        self.cache.put(&key, &text)?;
        Ok(page)
    }

    fn request(&self, target: &CatalogTarget) -> (String, Vec<(String, String)>) {
        target.request(&self.browse_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    const BROWSE: &str = "http://opml.radiotime.com/Browse.ashx";

    /// Serves canned pages by URL and counts requests.
    struct CannedCatalog {
        pages: HashMap<String, String>,
        calls: Cell<usize>,
        seen_params: RefCell<Vec<Vec<(String, String)>>>,
        quota_exhausted: bool,
    }

    impl CannedCatalog {
        fn new(pages: &[(&str, Value)]) -> Self {
            Self {
                pages: pages.iter().map(|(url, page)| (url.to_string(), page.to_string())).collect(),
                calls: Cell::new(0),
                seen_params: RefCell::new(Vec::new()),
                quota_exhausted: false,
            }
        }
    }

    impl Fetch for CannedCatalog {
        fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            self.seen_params
                .borrow_mut()
                .push(params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
            if self.quota_exhausted {
                return Err(FetchError::QuotaExceeded { url: url.to_string() }.into());
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no page at {url}"))
        }
    }

    fn set(urls: &[&str]) -> BTreeSet<String> {
        urls.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_nested_children_resolve() -> Result<()> {
        let page = CatalogPage::from_value(&json!({
            "head": {"title": "Music"},
            "body": [{"url": "a"}, {"children": [{"url": "b"}, {"text": "desc"}]}]
        }))?;
        assert_eq!(page.title, "Music");
        assert_eq!(page.endpoints(), set(&["a", "b"]));
        Ok(())
    }

    #[test]
    fn test_url_beats_children() -> Result<()> {
        let node = CatalogNode::parse(&json!({
            "URL": "http://top",
            "children": [{"url": "http://hidden"}],
            "text": "Top"
        }))?;
        assert_eq!(node, CatalogNode::Leaf("http://top".to_string()));
        Ok(())
    }

    #[test]
    fn test_nested_body_and_duplicates() -> Result<()> {
        let page = CatalogPage::from_value(&json!({
            "head": {},
            "body": [
                {"body": [{"URL": "x"}, {"url": "y"}]},
                {"url": "x"},
                {"text": "only words"}
            ]
        }))?;
        assert_eq!(page.endpoints(), set(&["x", "y"]));
        // head without a title falls back to its JSON text
        assert_eq!(page.title, "{}");
        Ok(())
    }

    #[test]
    fn test_unknown_shape_fails_fast() {
        let err = CatalogPage::from_value(&json!({
            "head": {"title": "Broken"},
            "body": [{"url": "a"}, {"element": "outline", "key": "unknown"}]
        }))
        .unwrap_err();
        assert!(matches!(err, CatalogError::SchemaMismatch(_)));

        assert!(CatalogPage::from_value(&json!({"head": {}})).is_err());
        assert!(CatalogPage::from_value(&json!({"body": [42]})).is_err());
        assert!(CatalogNode::parse(&json!({"url": 7})).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(CatalogPage::parse("<html>"), Err(CatalogError::InvalidJson(_))));
    }

    #[test]
    fn test_node_urls() {
        assert_eq!(node_url(BROWSE, "r0"), format!("{BROWSE}?id=r0"));
        assert_eq!(node_url(BROWSE, "http://x/y"), "http://x/y");
        assert_eq!(
            CatalogTarget::Root { category: Some("music".into()) }.request(BROWSE),
            (BROWSE.to_string(), vec![("c".to_string(), "music".to_string())])
        );
    }

    #[test]
    fn test_walker_uses_cache_after_first_fetch() -> Result<()> {
        let conn = db::open_in_memory()?;
        let source = CannedCatalog::new(&[(
            BROWSE,
            json!({"head": {"title": "Browse"}, "body": [{"url": "http://opml.radiotime.com/Browse.ashx?c=music"}]}),
        )]);
        let walker = CatalogWalker::new(ResponseCache::new(&conn), &source, BROWSE);

        let (title, urls) = walker.resolve(&CatalogTarget::root())?;
        assert_eq!(title, "Browse");
        assert_eq!(urls.len(), 1);
        assert_eq!(source.calls.get(), 1);
        assert_eq!(
            source.seen_params.borrow()[0],
            vec![("render".to_string(), "json".to_string())]
        );

        let again = walker.resolve(&CatalogTarget::root())?;
        assert_eq!(again.1, urls);
        assert_eq!(source.calls.get(), 1, "second resolve must be served from cache");
        Ok(())
    }

    #[test]
    fn test_malformed_page_is_not_cached() -> Result<()> {
        let conn = db::open_in_memory()?;
        let source = CannedCatalog::new(&[(BROWSE, json!({"head": {}, "body": [{"mystery": 1}]}))]);
        let cache = ResponseCache::new(&conn);
        let walker = CatalogWalker::new(cache, &source, BROWSE);

        let err = walker.resolve(&CatalogTarget::root()).unwrap_err();
        assert!(matches!(err.downcast_ref::<CatalogError>(), Some(CatalogError::SchemaMismatch(_))));
        assert!(cache.is_empty()?);
        Ok(())
    }

    #[test]
    fn test_quota_surfaces_as_distinct_kind() -> Result<()> {
        let conn = db::open_in_memory()?;
        let mut source = CannedCatalog::new(&[]);
        source.quota_exhausted = true;
        let walker = CatalogWalker::new(ResponseCache::new(&conn), &source, BROWSE);

        let err = walker.resolve(&CatalogTarget::Node("r0".into())).unwrap_err();
        assert!(is_quota_exceeded(&err));

        let other = anyhow::anyhow!("boom");
        assert!(!is_quota_exceeded(&other));
        Ok(())
    }
}
