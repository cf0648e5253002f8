//! URL templates with `$N` (positional) and `$name` (named) placeholders.
//!
//! A placeholder is `$` followed by a maximal run of `[A-Za-z0-9_]`. An
//! all-digit run is positional and 1-indexed; anything else is named. There
//! is no escaping: a `$` that is not followed by such a run is literal text.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::{CoreError, LinkKey};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z0-9_]+)").expect("placeholder regex is valid"));

/// Characters left untouched by JavaScript's `encodeURIComponent`.
pub(crate) const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Characters left untouched in a path segment value (RFC 3986 `pchar`).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@');

/// Upper bound on positional segments emitted in a share URL pattern.
const MAX_SHARE_SEGMENTS: usize = 64;

/// Distinct placeholders of a template, in order of first occurrence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateParams {
    pub positional: Vec<usize>,
    pub named: Vec<String>,
}

/// Values available to fill a template at request time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateArgs {
    /// Path segments after the key; `$1` is `path[0]`.
    pub path: Vec<String>,
    /// Query parameters of the request.
    pub query: BTreeMap<String, String>,
}

impl TemplateArgs {
    pub fn new(path: Vec<String>, query: BTreeMap<String, String>) -> Self {
        Self { path, query }
    }
}

enum Placeholder<'a> {
    Positional(usize),
    Named(&'a str),
}

fn classify(name: &str) -> Placeholder<'_> {
    if name.bytes().all(|b| b.is_ascii_digit()) {
        // Overflowing indices can never be satisfied nor be sequential.
        Placeholder::Positional(name.parse().unwrap_or(usize::MAX))
    } else {
        Placeholder::Named(name)
    }
}

pub fn parse_params(template: &str) -> TemplateParams {
    let mut seen = HashSet::new();
    let mut params = TemplateParams::default();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = &caps[1];
        if !seen.insert(name.to_string()) {
            continue;
        }
        match classify(name) {
            Placeholder::Positional(n) => params.positional.push(n),
            Placeholder::Named(n) => params.named.push(n.to_string()),
        }
    }
    params
}

/// Fill a template from `args`.
///
/// Every placeholder must be satisfied, otherwise the call fails with
/// `MissingParameter`. Values arrive decoded and are percent-encoded on
/// insertion: path segments as path segments, query values as URI
/// components. Query values consumed by named placeholders are not
/// re-emitted; the remaining pairs are appended as a query string. Replacement
/// is single-pass, so substituted values are never scanned for placeholders.
pub fn substitute(
    template: Option<&str>,
    args: &TemplateArgs,
) -> Result<Option<String>, CoreError> {
    let Some(template) = template else {
        return Ok(None);
    };

    let mut rest = args.query.clone();
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        let value = match classify(name) {
            Placeholder::Positional(n) => n
                .checked_sub(1)
                .and_then(|idx| args.path.get(idx))
                .filter(|v| !v.is_empty())
                .map(|v| utf8_percent_encode(v, PATH_SEGMENT).to_string()),
            Placeholder::Named(n) => {
                rest.remove(n);
                args.query
                    .get(n)
                    .map(|v| utf8_percent_encode(v, URI_COMPONENT).to_string())
            }
        }
        .ok_or_else(|| CoreError::MissingParameter(name.to_string()))?;

        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&template[last..]);

    if rest.is_empty() {
        return Ok(Some(out));
    }
    let query = rest
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, URI_COMPONENT),
                utf8_percent_encode(v, URI_COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    let sep = if out.contains('?') { '&' } else { '?' };
    Ok(Some(format!("{out}{sep}{query}")))
}

/// `s` with the `$` marker of every placeholder removed (`a=$id` → `a=id`).
pub(crate) fn strip_markers(s: &str) -> std::borrow::Cow<'_, str> {
    PLACEHOLDER.replace_all(s, "${1}")
}

/// Public share URL pattern for a link: `origin/key/$1/.../$M?name=$name`.
///
/// Positional segments run up to the highest positional placeholder of the
/// web template; named ones are listed as query parameters.
pub fn share_url(origin: &str, key: &LinkKey, web_url: &str) -> String {
    let params = parse_params(web_url);
    let max = params
        .positional
        .iter()
        .copied()
        .max()
        .unwrap_or(0)
        .min(MAX_SHARE_SEGMENTS);

    let mut url = format!("{}/{}", origin.trim_end_matches('/'), key.as_str());
    for i in 1..=max {
        url.push_str(&format!("/${i}"));
    }
    if !params.named.is_empty() {
        let query = params
            .named
            .iter()
            .map(|n| format!("{n}=${n}"))
            .collect::<Vec<_>>()
            .join("&");
        url.push('?');
        url.push_str(&query);
    }
    url
}
