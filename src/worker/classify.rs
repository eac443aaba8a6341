//! Resource classification and cache-key normalization.

use mime_guess::mime;
use thiserror::Error;
use url::Url;

use super::variants::case_variants;

/// Coarse content class of an intercepted request.
///
/// Only media, data and markup follow the runtime retrieval mode; everything
/// else is always fetched network-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// Images and audio.
    Media,
    /// Structured data (JSON).
    Data,
    /// HTML documents and navigations.
    Markup,
    Other,
}

impl ResourceClass {
    /// Classify a request by its pathname, treating navigations as markup.
    pub fn classify(path: &str, navigation: bool) -> Self {
        if navigation {
            return Self::Markup;
        }

        let segment = path.rsplit('/').next().unwrap_or_default();
        if segment.is_empty() {
            // Directory index, served as a document.
            return Self::Markup;
        }

        let Some(guess) = mime_guess::from_path(segment).first() else {
            return Self::Other;
        };

        if guess.type_() == mime::IMAGE || guess.type_() == mime::AUDIO {
            Self::Media
        } else if guess.type_() == mime::APPLICATION && guess.subtype() == mime::JSON {
            Self::Data
        } else if guess.type_() == mime::TEXT && guess.subtype() == mime::HTML {
            Self::Markup
        } else {
            Self::Other
        }
    }

    pub fn is_mode_aware(self) -> bool {
        !matches!(self, Self::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Data => "data",
            Self::Markup => "markup",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("resource reference is empty")]
    Empty,
    #[error("invalid resource reference `{reference}`: {reason}")]
    Invalid { reference: String, reason: String },
}

/// A resource reference normalized against the worker's origin.
///
/// Cross-origin resources keep their full URL as cache key. Same-origin
/// resources are keyed by an origin-relative path beginning with `/`, plus the
/// query string when one is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocator {
    Remote(Url),
    Local { path: String, query: Option<String> },
}

impl ResourceLocator {
    /// Normalize a caller-supplied reference: an absolute `http(s)` URL, or a
    /// path with or without its leading `/`.
    pub fn resolve(reference: &str, origin: &Url) -> Result<Self, LocatorError> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(LocatorError::Empty);
        }

        let parsed = if has_http_scheme(trimmed) {
            Url::parse(trimmed)
        } else if trimmed.starts_with('/') {
            origin.join(trimmed)
        } else {
            origin.join(&format!("/{trimmed}"))
        };

        let url = parsed.map_err(|err| LocatorError::Invalid {
            reference: trimmed.to_string(),
            reason: err.to_string(),
        })?;

        Ok(Self::from_url(url, origin))
    }

    /// Classify an already absolute URL as same-origin or remote.
    pub fn from_url(mut url: Url, origin: &Url) -> Self {
        url.set_fragment(None);

        if url.origin() == origin.origin() {
            Self::Local {
                path: url.path().to_string(),
                query: url.query().map(str::to_owned),
            }
        } else {
            Self::Remote(url)
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// The pathname, without query string.
    pub fn path(&self) -> &str {
        match self {
            Self::Remote(url) => url.path(),
            Self::Local { path, .. } => path,
        }
    }

    /// Key under which a resolved response is stored.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::Local { path, query } => with_query(path, query.as_deref()),
        }
    }

    /// Keys probed in the cache, most specific first.
    ///
    /// Markup drops its query string after the exact key so that
    /// `/view.html?id=3` and `/view.html?id=7` share one cached document.
    pub fn cache_candidates(&self, markup: bool) -> Vec<String> {
        match self {
            Self::Remote(url) => vec![url.to_string()],
            Self::Local { path, query } => {
                let mut candidates = Vec::new();
                if markup && query.is_some() {
                    candidates.push(self.cache_key());
                    candidates.extend(case_variants(path));
                } else {
                    candidates.extend(
                        case_variants(path)
                            .into_iter()
                            .map(|variant| with_query(&variant, query.as_deref())),
                    );
                }
                candidates
            }
        }
    }

    /// URLs tried on the network, in order.
    ///
    /// Local resources try every extension casing with the original query;
    /// remote resources are fetched exactly as named.
    pub fn network_candidates(&self, origin: &Url) -> Vec<Url> {
        match self {
            Self::Remote(url) => vec![url.clone()],
            Self::Local { path, query } => case_variants(path)
                .into_iter()
                .filter_map(|variant| {
                    let mut url = origin.join(&variant).ok()?;
                    url.set_query(query.as_deref());
                    Some(url)
                })
                .collect(),
        }
    }
}

fn has_http_scheme(reference: &str) -> bool {
    let lower = reference
        .get(..8)
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| reference.to_ascii_lowercase());
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}
