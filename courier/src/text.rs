//! String predicates and small helpers shared by the url and dispatch code.
//!
//! Absence is modelled with `Option`. Functions that treat "missing" and
//! "empty" differently take any [`MaybeText`], so both `&str` and
//! `Option<&str>` can be passed directly.

/// A value that may or may not carry text.
pub trait MaybeText {
    fn as_text(&self) -> Option<&str>;
}

impl MaybeText for str {
    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl MaybeText for String {
    fn as_text(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl<S: AsRef<str>> MaybeText for Option<S> {
    fn as_text(&self) -> Option<&str> {
        self.as_ref().map(AsRef::as_ref)
    }
}

impl<T: MaybeText + ?Sized> MaybeText for &T {
    fn as_text(&self) -> Option<&str> {
        (**self).as_text()
    }
}

/// Which end(s) of the text [`trim`] works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimMode {
    Start,
    End,
    Both,
}

impl TrimMode {
    fn start(self) -> bool {
        matches!(self, TrimMode::Start | TrimMode::Both)
    }

    fn end(self) -> bool {
        matches!(self, TrimMode::End | TrimMode::Both)
    }
}

/// Whitespace, plus the BOM, the LTR embedding mark and NUL.
pub fn is_blank_char(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}' || c == '\u{202a}' || c == '\0'
}

pub fn is_blank<T: MaybeText + ?Sized>(s: &T) -> bool {
    s.as_text().map_or(true, |s| s.chars().all(is_blank_char))
}

pub fn is_not_blank<T: MaybeText + ?Sized>(s: &T) -> bool {
    !is_blank(s)
}

/// Absent or zero-length. The content is not inspected.
pub fn is_empty<T: MaybeText + ?Sized>(s: &T) -> bool {
    s.as_text().map_or(true, str::is_empty)
}

pub fn is_not_empty<T: MaybeText + ?Sized>(s: &T) -> bool {
    !is_empty(s)
}

/// Strips a maximal run of `predicate` characters from the chosen end(s).
///
/// The returned slice borrows from the input, so nothing is allocated; when
/// nothing matched it is the input itself.
pub fn trim<'a>(
    s: Option<&'a str>,
    mode: TrimMode,
    predicate: impl Fn(char) -> bool,
) -> Option<&'a str> {
    let s = s?;
    let mut out = s;
    if mode.start() {
        out = out.trim_start_matches(|c: char| predicate(c));
    }
    if mode.end() {
        out = out.trim_end_matches(|c: char| predicate(c));
    }
    Some(out)
}

pub fn trim_blank(s: &str) -> &str {
    s.trim_matches(is_blank_char)
}

/// Absent equals absent and never equals anything present.
pub fn equals<A, B>(a: &A, b: &B, ignore_case: bool) -> bool
where
    A: MaybeText + ?Sized,
    B: MaybeText + ?Sized,
{
    match (a.as_text(), b.as_text()) {
        (None, None) => true,
        (None, _) | (_, None) => false,
        (Some(a), Some(b)) if ignore_case => chars_eq_ignore_case(a, b),
        (Some(a), Some(b)) => a == b,
    }
}

pub fn equals_ignore_case<A, B>(a: &A, b: &B) -> bool
where
    A: MaybeText + ?Sized,
    B: MaybeText + ?Sized,
{
    equals(a, b, true)
}

fn chars_eq_ignore_case(a: &str, b: &str) -> bool {
    let mut left = a.chars();
    let mut right = b.chars();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) => {
                if x != y
                    && !x.to_uppercase().eq(y.to_uppercase())
                    && !x.to_lowercase().eq(y.to_lowercase())
                {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

pub fn ends_with(s: Option<&str>, suffix: Option<&str>, ignore_case: bool) -> bool {
    match (s, suffix) {
        (Some(s), Some(suffix)) if ignore_case => {
            s.to_lowercase().ends_with(&suffix.to_lowercase())
        }
        (Some(s), Some(suffix)) => s.ends_with(suffix),
        (s, suffix) => s.is_none() && suffix.is_none(),
    }
}

pub fn remove_prefix<'a>(s: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return s;
    }
    s.strip_prefix(prefix).unwrap_or(s)
}

pub fn remove_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    if suffix.is_empty() {
        return s;
    }
    s.strip_suffix(suffix).unwrap_or(s)
}

pub fn default_if_null<T>(value: Option<T>, default: T) -> T {
    value.unwrap_or(default)
}

pub fn empty_to_default<'a>(s: Option<&'a str>, default: &'a str) -> &'a str {
    match s {
        Some(s) if !s.is_empty() => s,
        _ => default,
    }
}

pub fn blank_to_default<'a>(s: Option<&'a str>, default: &'a str) -> &'a str {
    match s {
        Some(s) if is_not_blank(s) => s,
        _ => default,
    }
}

pub fn null_to_empty(s: Option<&str>) -> &str {
    s.unwrap_or("")
}
