//! Request classification.
//!
//! Maps an intercepted request to the content class that selects its caching
//! strategy, or to a bypass verdict when the coordinator must not touch it.
//!
//! Rules, first match wins:
//! 1. destination `image` or an image extension -> [`Classification::Image`]
//! 2. a stylesheet, script or font extension -> [`Classification::StaticAsset`]
//! 3. destination `document` or an Accept header asking for HTML -> [`Classification::Document`]
//! 4. anything else -> [`Classification::Other`]
//!
//! Non-GET requests and requests to hosts outside the scope bypass caching.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::request::{Destination, RequestRecord};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg"];

const STATIC_EXTENSIONS: &[&str] = &["css", "js", "woff", "woff2", "eot", "ttf", "otf"];

/// Content class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Image,
    StaticAsset,
    Document,
    Other,
}

impl Classification {
    pub const ALL: [Classification; 4] = [Self::Image, Self::StaticAsset, Self::Document, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::StaticAsset => "static_asset",
            Self::Document => "document",
            Self::Other => "other",
        }
    }
}

/// Why a request passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassReason {
    /// Not a GET.
    Method,
    /// Foreign origin that is not allow-listed.
    CrossOrigin,
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Intercept(Classification),
    Bypass(BypassReason),
}

/// The origin a coordinator serves plus the foreign hosts it may intercept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    origin: Url,
    allowed_hosts: Vec<String>,
}

impl Scope {
    pub fn new(origin: Url, allowed_hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let allowed_hosts = allowed_hosts
            .into_iter()
            .map(|h| h.into().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { origin, allowed_hosts }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// Same scheme, host and port as the coordinator's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Whether the host is allow-listed, directly or as a subdomain.
    pub fn is_allowed_host(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.allowed_hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
    }

    /// Whether requests to this URL may be intercepted at all.
    pub fn admits(&self, url: &Url) -> bool {
        self.is_same_origin(url) || self.is_allowed_host(url)
    }
}

/// Classify a request within a scope.
pub fn classify(request: &RequestRecord, scope: &Scope) -> Verdict {
    if !request.method.is_get() {
        return Verdict::Bypass(BypassReason::Method);
    }
    if !scope.admits(&request.url) {
        return Verdict::Bypass(BypassReason::CrossOrigin);
    }
    Verdict::Intercept(content_class(request))
}

/// Content class of a request, ignoring method and origin.
pub fn content_class(request: &RequestRecord) -> Classification {
    let extension = request.extension();
    let has_extension = |set: &[&str]| extension.as_deref().is_some_and(|ext| set.contains(&ext));

    if request.destination == Destination::Image || has_extension(IMAGE_EXTENSIONS) {
        Classification::Image
    } else if has_extension(STATIC_EXTENSIONS) {
        Classification::StaticAsset
    } else if request.destination == Destination::Document || request.accepts_html() {
        Classification::Document
    } else {
        Classification::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    fn scope() -> Scope {
        Scope::new(Url::parse("https://samma.example").unwrap(), ["fonts.googleapis.com", "fonts.gstatic.com"])
    }

    fn get(path: &str) -> RequestRecord {
        RequestRecord::get(scope().origin().join(path).unwrap())
    }

    #[test]
    fn test_image_by_extension_and_destination() {
        for path in ["/a.png", "/a.JPG", "/b/c.jpeg", "/d.gif", "/e.webp", "/f.svg"] {
            assert_eq!(classify(&get(path), &scope()), Verdict::Intercept(Classification::Image), "{path}");
        }
        let req = get("/avatar").with_destination(Destination::Image);
        assert_eq!(classify(&req, &scope()), Verdict::Intercept(Classification::Image));
    }

    #[test]
    fn test_static_asset_extensions() {
        for path in ["/styles/main.css", "/js/main.js", "/f.woff", "/f.woff2", "/f.eot", "/f.ttf", "/f.otf"] {
            assert_eq!(classify(&get(path), &scope()), Verdict::Intercept(Classification::StaticAsset), "{path}");
        }
    }

    #[test]
    fn test_image_outranks_document_hint() {
        let req = get("/hero.png").with_destination(Destination::Document).with_accept("text/html");
        assert_eq!(classify(&req, &scope()), Verdict::Intercept(Classification::Image));
    }

    #[test]
    fn test_static_outranks_document_hint() {
        let req = get("/app.js").with_accept("text/html");
        assert_eq!(classify(&req, &scope()), Verdict::Intercept(Classification::StaticAsset));
    }

    #[test]
    fn test_document_by_destination_or_accept() {
        let req = get("/about.html").with_destination(Destination::Document);
        assert_eq!(classify(&req, &scope()), Verdict::Intercept(Classification::Document));

        let req = get("/contact").with_accept("text/html,application/xhtml+xml;q=0.9");
        assert_eq!(classify(&req, &scope()), Verdict::Intercept(Classification::Document));
    }

    #[test]
    fn test_other_without_hints() {
        assert_eq!(classify(&get("/manifest.json"), &scope()), Verdict::Intercept(Classification::Other));
        assert_eq!(classify(&get("/about.html"), &scope()), Verdict::Intercept(Classification::Other));
    }

    #[test]
    fn test_bypass_non_get() {
        let req = RequestRecord::new(Method::Post, scope().origin().join("/contact").unwrap());
        assert_eq!(classify(&req, &scope()), Verdict::Bypass(BypassReason::Method));
    }

    #[test]
    fn test_bypass_foreign_origin() {
        let req = RequestRecord::get(Url::parse("https://tracker.example.net/pixel.png").unwrap());
        assert_eq!(classify(&req, &scope()), Verdict::Bypass(BypassReason::CrossOrigin));

        let req = RequestRecord::get(Url::parse("http://samma.example/index.html").unwrap());
        assert_eq!(classify(&req, &scope()), Verdict::Bypass(BypassReason::CrossOrigin));
    }

    #[test]
    fn test_allow_listed_font_hosts() {
        let req = RequestRecord::get(Url::parse("https://fonts.gstatic.com/s/cairo/v1/a.woff2").unwrap());
        assert_eq!(classify(&req, &scope()), Verdict::Intercept(Classification::StaticAsset));

        let req = RequestRecord::get(Url::parse("https://fonts.googleapis.com/css2?family=Cairo").unwrap());
        assert_eq!(classify(&req, &scope()), Verdict::Intercept(Classification::Other));
    }

    #[test]
    fn test_allow_list_does_not_match_lookalike_hosts() {
        let req = RequestRecord::get(Url::parse("https://evilfonts.gstatic.com.attacker.net/a.css").unwrap());
        assert_eq!(classify(&req, &scope()), Verdict::Bypass(BypassReason::CrossOrigin));
    }

    #[test]
    fn test_every_class_reachable() {
        let reached: Vec<_> = [get("/a.png"), get("/a.css"), get("/").with_accept("text/html"), get("/data")]
            .iter()
            .map(content_class)
            .collect();
        assert_eq!(reached, Classification::ALL.to_vec());
    }
}
