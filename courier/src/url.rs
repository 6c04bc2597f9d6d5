use std::{borrow::Cow, fmt, str::FromStr};

use nom::{
    bytes::complete::{tag_no_case, take_while},
    character::complete::char,
    IResult,
};
use url::Url;

use crate::{
    text::{is_blank, is_blank_char, trim_blank},
    DispatchError, DispatchResult,
};

/// A request target that passed normalization.
///
/// `normalized` is exactly the caller's text with blank characters escaped;
/// `url` is the parsed view used to open connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSpec {
    raw: String,
    normalized: String,
    url: Url,
}

impl UrlSpec {
    pub fn parse(raw: &str) -> DispatchResult<Self> {
        normalize(raw)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    pub fn to_strict_uri(&self) -> DispatchResult<http::Uri> {
        to_strict_uri(&self.normalized)
    }
}

impl fmt::Display for UrlSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl FromStr for UrlSpec {
    type Err = DispatchError;

    fn from_str(s: &str) -> DispatchResult<Self> {
        normalize(s)
    }
}

/// Escapes blank characters and checks that the result is an absolute
/// http(s) URL with a host.
pub fn normalize(raw: &str) -> DispatchResult<UrlSpec> {
    if is_blank(raw) {
        return Err(DispatchError::InvalidUrl("url is blank".to_string()));
    }
    let normalized = encode_blank(raw).into_owned();
    let url = Url::parse(&normalized)
        .map_err(|e| DispatchError::InvalidUrl(format!("{} for {}", e, raw)))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(DispatchError::InvalidUrl(format!(
                "unsupported scheme {} in {}",
                scheme, raw
            )))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(DispatchError::InvalidUrl(format!("no host in {}", raw)));
    }
    Ok(UrlSpec {
        raw: raw.to_string(),
        normalized,
        url,
    })
}

/// Replaces every blank character with `%20`. Borrows when there is nothing to do.
pub fn encode_blank(text: &str) -> Cow<'_, str> {
    if !text.chars().any(is_blank_char) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if is_blank_char(c) {
            out.push_str("%20");
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Parses `text` with the RFC 3986 parser after trimming blank characters.
pub fn to_strict_uri(text: &str) -> DispatchResult<http::Uri> {
    let trimmed = trim_blank(text);
    trimmed
        .parse::<http::Uri>()
        .map_err(|e| DispatchError::InvalidUrl(format!("{} for {}", e, trimmed)))
}

fn is_pattern_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\u{b}' | '\u{c}' | '\r')
}

fn is_charset_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

fn parse_charset_param(input: &str) -> IResult<&str, &str> {
    let (input, _) = tag_no_case("charset")(input)?;
    let (input, _) = take_while(is_pattern_space)(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = take_while(is_pattern_space)(input)?;
    take_while(is_charset_char)(input)
}

/// Finds the first `charset=<token>` in a `Content-Type` value.
///
/// Matching is case-insensitive and only the leftmost occurrence counts. The
/// token may be empty (`charset=` yields `Some("")`).
pub fn extract_charset<'a>(content_type: impl Into<Option<&'a str>>) -> Option<&'a str> {
    let content_type = content_type.into()?;
    if is_blank(content_type) {
        return None;
    }
    content_type.char_indices().find_map(|(start, _)| {
        parse_charset_param(&content_type[start..])
            .ok()
            .map(|(_, charset)| charset)
    })
}
