use encoding_rs::{Encoding, UTF_8};
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything except ASCII alphanumerics and the RFC 3986 unreserved marks.
pub(crate) const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Ordered request parameters. Re-adding a name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    entries: Vec<(String, String)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn to_query_string(&self) -> String {
        self.encode_with(UTF_8)
    }

    /// `name=value` pairs joined by `&`, each side encoded to bytes in
    /// `encoding` and then percent-escaped.
    pub fn encode_with(&self, encoding: &'static Encoding) -> String {
        let mut out = String::new();
        for (name, value) in &self.entries {
            if !out.is_empty() {
                out.push('&');
            }
            push_encoded(&mut out, name, encoding);
            out.push('=');
            push_encoded(&mut out, value, encoding);
        }
        out
    }
}

fn push_encoded(out: &mut String, text: &str, encoding: &'static Encoding) {
    let (bytes, _, _) = encoding.encode(text);
    out.extend(percent_encode(&bytes, COMPONENT));
}

impl<N, V> FromIterator<(N, V)> for ParameterSet
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut params = ParameterSet::new();
        params.extend(iter);
        params
    }
}

impl<N, V> Extend<(N, V)> for ParameterSet
where
    N: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (N, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}
