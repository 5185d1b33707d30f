//! Local file naming for cloned pages and assets.
//!
//! Every remote resource lands in one flat `assets/` directory and every page
//! lands next to `index.html`, so names have to be derived deterministically
//! from the URL alone. The rules here are shared by the rewriter (which
//! decides what a reference points at) and the file manager (which decides
//! where bytes are written), so both always agree.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use url::Url;

/// Names longer than this are replaced by a digest of the URL.
pub const MAX_FILENAME_LEN: usize = 100;

const QUERY_DIGEST_LEN: usize = 8;
const MAX_EXTENSION_LEN: usize = 10;

/// Maps an asset URL to a filesystem-safe file name.
///
/// The last path segment is used as-is (`index` when empty). A query string
/// adds an 8 character digest before the extension so `app.css?v=1` and
/// `app.css?v=2` do not overwrite each other. Names that are too long or
/// contain anything outside `[A-Za-z0-9._-]` fall back to
/// [`hashed_filename`].
pub fn asset_filename(url: &Url) -> String {
    let segment = last_segment(url);
    let mut name = if segment.is_empty() {
        "index".to_string()
    } else {
        segment.to_string()
    };

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        let digest = &sha256_hex(query)[..QUERY_DIGEST_LEN];
        name = match split_extension(&name) {
            (stem, Some(ext)) => format!("{}_{}.{}", stem, digest, ext),
            (stem, None) => format!("{}_{}", stem, digest),
        };
    }

    if name.len() > MAX_FILENAME_LEN || !is_safe_filename(&name) {
        return hashed_filename(url);
    }

    name
}

/// Full SHA-256 of the URL (fragment excluded), keeping the original
/// extension when it is itself safe.
pub fn hashed_filename(url: &Url) -> String {
    let digest = sha256_hex(strip_fragment(url).as_str());
    let extension = split_extension(last_segment(url))
        .1
        .filter(|ext| {
            ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric())
        });

    match extension {
        Some(ext) => format!("{}.{}", digest, ext),
        None => digest,
    }
}

/// Maps a page URL to the HTML file it is saved as.
///
/// * `/about.html` keeps its basename: `about.html`
/// * an empty or root path becomes `index.html`
/// * anything else is flattened: `/blog/post/` becomes `blog_post.html`
///
/// The query string and fragment are ignored.
pub fn page_filename(url: &Url) -> String {
    let path = url.path();

    if path.ends_with(".html") {
        return path.rsplit('/').next().unwrap_or(path).to_string();
    }

    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return "index.html".to_string();
    }

    let flattened = trimmed.replace('/', "_");
    if flattened.ends_with(".html") {
        flattened
    } else {
        format!("{}.html", flattened)
    }
}

/// Copy of `url` without its fragment. Used as the identity of pages in the
/// frontier and of assets in the naming index.
pub fn strip_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// The network authority of a URL (`host` or `host:port`), if it has one.
pub fn authority(url: &Url) -> Option<String> {
    let host = url.host_str().filter(|h| !h.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Per-run record of which URL owns which asset file name.
///
/// Resolving the same URL twice always yields the same name. When a second,
/// different URL would land on a name that is already taken in this run
/// (`/a/logo.png` and `/b/logo.png`), it is given its hashed name instead.
#[derive(Debug, Default)]
pub struct NamingIndex {
    by_url: HashMap<String, String>,
    owners: HashMap<String, String>,
}

impl NamingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, url: &Url) -> String {
        let key = strip_fragment(url);
        if let Some(name) = self.by_url.get(key.as_str()) {
            return name.clone();
        }

        let mut name = asset_filename(&key);
        if self
            .owners
            .get(&name)
            .is_some_and(|owner| owner != key.as_str())
        {
            name = hashed_filename(&key);
        }

        self.owners.insert(name.clone(), key.to_string());
        self.by_url.insert(key.to_string(), name.clone());
        name
    }

    /// Number of distinct URLs named so far.
    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}

fn last_segment(url: &Url) -> &str {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("")
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
