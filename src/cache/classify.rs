//! Request classification.

use crate::config::Config;
use crate::http::HttpRequest;

/// Extensions served cache-first.
const ASSET_EXTENSIONS: &[&str] = &[
  "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "css", "js",
];

/// Which caching strategy a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  Navigation,
  Api,
  Asset,
  Other,
}

#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefixes: Vec<String>,
  api_markers: Vec<String>,
  never_cache_origins: Vec<String>,
  upload_path_fragments: Vec<String>,
  upload_query_keys: Vec<String>,
}

impl Classifier {
  pub fn from_config(config: &Config) -> Self {
    Self {
      api_prefixes: config.api_prefixes.clone(),
      api_markers: config.api_markers.clone(),
      never_cache_origins: config.never_cache_origins.clone(),
      upload_path_fragments: config.upload_markers.path_fragments.clone(),
      upload_query_keys: config.upload_markers.query_keys.clone(),
    }
  }

  fn is_never_cache_origin(&self, request: &HttpRequest) -> bool {
    let host = request.url.host_str().unwrap_or_default();
    self
      .never_cache_origins
      .iter()
      .any(|origin| host.contains(origin.as_str()))
  }

  /// Requests to the binary-storage origin that upload or mutate.
  ///
  /// These must reach the network untouched: no cache, no queue.
  pub fn bypass(&self, request: &HttpRequest) -> bool {
    if !self.is_never_cache_origin(request) {
      return false;
    }

    let path = request.url.path();
    !request.is_read()
      || self
        .upload_path_fragments
        .iter()
        .any(|f| path.contains(f.as_str()))
      || request
        .url
        .query_pairs()
        .any(|(k, _)| self.upload_query_keys.iter().any(|q| k == q.as_str()))
  }

  /// Total: every request lands in exactly one class.
  pub fn classify(&self, request: &HttpRequest) -> ResourceClass {
    let path = request.url.path();

    if request.mode == crate::http::RequestMode::Navigate || has_extension(path, &["html", "htm"])
    {
      return ResourceClass::Navigation;
    }

    if self.api_prefixes.iter().any(|p| path.starts_with(p.as_str()))
      || self.api_markers.iter().any(|m| path.contains(m.as_str()))
    {
      return ResourceClass::Api;
    }

    if has_extension(path, ASSET_EXTENSIONS) && !self.is_never_cache_origin(request) {
      return ResourceClass::Asset;
    }

    ResourceClass::Other
  }
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
  let file = path.rsplit('/').next().unwrap_or_default();
  match file.rsplit_once('.') {
    Some((_, ext)) => extensions
      .iter()
      .any(|candidate| candidate.eq_ignore_ascii_case(ext)),
    None => false,
  }
}
