//! Builds paginated search URLs from the captured request template.
//!
//! The portal's search XHR carries the real query in an inner `url=`
//! parameter that is itself a form-encoded query string:
//!
//! ```text
//! /xhr/query?url=q%3DTI%253Dneural%26num%3D10%26page%3D1&exp=
//! ```
//!
//! Only `q`, `num` and `page` of the inner string are rewritten; every other
//! captured parameter, tokens included, is replayed untouched.

use url::Url;
use url::form_urlencoded;

use crate::session::RequestTemplate;

/// Name of the outer parameter wrapping the inner query string.
const INNER_PARAM: &str = "url";

/// One page of one query, independent of the session that will send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpec {
    /// Query in the portal grammar.
    pub query: String,
    /// Results per page.
    pub page_size: u32,
    /// Zero-based page index.
    pub page_index: u32,
}

impl SearchSpec {
    /// Result offset of the first record on this page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page_index) * u64::from(self.page_size)
    }
}

/// Rewrites the template URL for `spec`.
///
/// # Errors
///
/// Returns the parse error when the template URL is not absolute.
pub fn build_search_url(template: &RequestTemplate, spec: &SearchSpec) -> Result<String, url::ParseError> {
    let mut url = Url::parse(&template.url)?;
    let outer: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let rewritten: Vec<(String, String)> = if outer.iter().any(|(k, _)| k == INNER_PARAM) {
        outer
            .into_iter()
            .map(|(key, value)| {
                if key == INNER_PARAM {
                    let inner: Vec<(String, String)> = form_urlencoded::parse(value.as_bytes())
                        .map(|(k, v)| (k.into_owned(), v.into_owned()))
                        .collect();
                    let inner = rewrite_pairs(inner, spec);
                    (key, encode_pairs(&inner))
                } else {
                    (key, value)
                }
            })
            .collect()
    } else {
        rewrite_pairs(outer, spec)
    };

    url.set_query(Some(&encode_pairs(&rewritten)));
    Ok(url.into())
}

fn rewrite_pairs(pairs: Vec<(String, String)>, spec: &SearchSpec) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::with_capacity(pairs.len() + 3);
    let mut saw_query = false;
    for (key, value) in pairs {
        match key.as_str() {
            "q" if !saw_query => {
                saw_query = true;
                out.push((key, spec.query.clone()));
            }
            "q" | "num" | "page" => {}
            _ => out.push((key, value)),
        }
    }
    if !saw_query {
        out.insert(0, ("q".to_string(), spec.query.clone()));
    }
    out.push(("num".to_string(), spec.page_size.to_string()));
    if spec.page_index > 0 {
        out.push(("page".to_string(), spec.page_index.to_string()));
    }
    out
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}
