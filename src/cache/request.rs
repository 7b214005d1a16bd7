//! Request and response values seen by the cache engine, and request classification.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

/// What kind of resource a request is for, as reported by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  /// Plain fetches (XHR, `fetch()` from application code)
  #[default]
  Empty,
}

impl FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "document" => Ok(Self::Document),
      "script" => Ok(Self::Script),
      "style" => Ok(Self::Style),
      "image" => Ok(Self::Image),
      "font" => Ok(Self::Font),
      "manifest" => Ok(Self::Manifest),
      "" | "empty" => Ok(Self::Empty),
      other => Err(eyre!("Unknown request destination: {}", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  Navigate,
  #[default]
  Cors,
  NoCors,
  SameOrigin,
}

/// An outgoing request intercepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_uppercase(),
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  /// A top-level page load.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate || self.destination == Destination::Document
  }

  /// Requests for browser-extension resources never reach the engine.
  pub fn is_extension(&self) -> bool {
    self.url.scheme().ends_with("-extension")
  }

  /// Identity under which the response is stored: method and absolute URL.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

/// A captured HTTP response, stored verbatim in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  /// Whether this response may be admitted to a cache.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Placeholder returned when neither network nor cache can answer.
  pub fn offline(html: bool) -> Self {
    if html {
      Self::new(
        503,
        vec![("Content-Type".into(), "text/html; charset=utf-8".into())],
        OFFLINE_HTML,
      )
    } else {
      Self::new(
        503,
        vec![("Content-Type".into(), "text/plain; charset=utf-8".into())],
        "Offline",
      )
    }
  }
}

const OFFLINE_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>Sem conexão</h1><p>Você está offline e esta página ainda não foi salva.</p></body></html>";

/// Class of a request, which selects the caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  StaticAsset,
  Document,
  ApiOrCrossOrigin,
  Other,
}

/// Classify a request relative to the origin the engine serves.
///
/// Rules are evaluated in order and the first match wins:
/// destination type, then path heuristics, then document / api / other.
pub fn classify(request: &Request, origin: &Url) -> RequestClass {
  if matches!(
    request.destination,
    Destination::Script | Destination::Style | Destination::Image | Destination::Font
  ) {
    return RequestClass::StaticAsset;
  }

  let path = request.url.path();
  if path.contains("/icons/") || path.contains("/assets/") {
    return RequestClass::StaticAsset;
  }

  if request.is_navigation() {
    return RequestClass::Document;
  }

  if path.starts_with("/api/") || request.url.origin() != origin.origin() {
    return RequestClass::ApiOrCrossOrigin;
  }

  RequestClass::Other
}
