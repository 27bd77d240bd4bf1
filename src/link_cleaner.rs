//! Link sanitising: unwraps redirector services and strips tracking artifacts.

use once_cell::sync::Lazy;
use regex::Regex;

/// Number of nested redirectors unwrapped before giving up.
pub const DEFAULT_HOP_LIMIT: i32 = 2;

const REDIRECTOR_HOSTS: &[&str] = &[
    "www.google.com",
    "google.com",
    "www.googleadservices.com",
    "l.facebook.com",
    "lm.facebook.com",
    "l.messenger.com",
    "l.instagram.com",
    "t.co",
    "lnkd.in",
    "link.medium.com",
    "news.ycombinator.com",
    "r.search.yahoo.com",
    "out.reddit.com",
    "urldefense.com",
    "www.urldefense.com",
    "protect-us.mimecast.com",
    "slack-redir.net",
    "away.vk.com",
];

/// Query keys that may carry the wrapped destination, in priority order.
const LINK_KEYS: &[&str] = &[
    "url",
    "u",
    "q",
    "target",
    "dest",
    "destination",
    "to",
    "redirect",
    "redir",
    "r",
    "link",
    "l",
];

// Lowercase; keys are lowercased before lookup.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "gbraid",
    "wbraid",
    "dclid",
    "yclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "igshid",
    "mkt_tok",
    "vero_conv",
    "vero_id",
    "gclsrc",
    "spm",
    "ref",
    "trk",
    "trkcampaign",
    "oly_enc_id",
    "oly_anon_id",
    "_hsmi",
    "_hsenc",
    "si",
];

const TRACKING_PREFIXES: &[&str] = &["utm_", "hsa_"];

const AMP_PARAM: &str = "amp";

// RFC 3986 appendix B, with a mandatory scheme.
static URL_PARTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*):(?://([^/?#]*))?([^?#]*)(?:\?([^#]*))?(?:#(.*))?$")
        .expect("url parts regex")
});

#[derive(Debug)]
struct UrlParts<'a> {
    scheme: &'a str,
    authority: Option<&'a str>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl<'a> UrlParts<'a> {
    fn parse(input: &'a str) -> Option<Self> {
        if input.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return None;
        }
        let caps = URL_PARTS_RE.captures(input)?;
        Some(Self {
            scheme: caps.get(1)?.as_str(),
            authority: caps.get(2).map(|m| m.as_str()),
            path: caps.get(3).map_or_else(String::new, |m| m.as_str().to_string()),
            query: caps.get(4).map(|m| m.as_str().to_string()),
            fragment: caps.get(5).map(|m| m.as_str().to_string()),
        })
    }

    /// Lowercased host without userinfo or port.
    fn host(&self) -> Option<String> {
        let authority = self.authority?;
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, rest)| rest);
        let host = if let Some(bracketed) = host_port.strip_prefix('[') {
            bracketed.split(']').next().unwrap_or(bracketed)
        } else {
            host_port.split(':').next().unwrap_or(host_port)
        };
        Some(host.to_ascii_lowercase())
    }

    fn query_segments(&self) -> Vec<&str> {
        match self.query.as_deref() {
            Some(query) if !query.is_empty() => query.split('&').collect(),
            _ => Vec::new(),
        }
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(self.scheme);
        out.push(':');
        if let Some(authority) = self.authority {
            out.push_str("//");
            out.push_str(authority);
        }
        out.push_str(&self.path);
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
        if let Some(fragment) = &self.fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }
}

/// Cleans `url`, following at most `hop_limit` nested redirectors.
///
/// Input that cannot be split into URL components is returned untouched, as
/// is any URL reached once the hop budget is exhausted (`hop_limit < 0`).
pub fn clean(url: &str, hop_limit: i32) -> String {
    if hop_limit < 0 {
        return url.to_string();
    }
    let Some(mut parts) = UrlParts::parse(url) else {
        return url.to_string();
    };

    if let Some(host) = parts.host() {
        if REDIRECTOR_HOSTS.contains(&host.as_str()) {
            if let Some(target) = wrapped_target(&parts.query_segments()) {
                tracing::debug!(%host, hop_limit, "unwrapping redirector");
                return clean(&target, hop_limit - 1);
            }
        }
    }

    strip_tracking_query(&mut parts);
    strip_amp(&mut parts);
    strip_tracking_fragment(&mut parts);

    parts.render()
}

fn wrapped_target(segments: &[&str]) -> Option<String> {
    LINK_KEYS.iter().find_map(|key| {
        let segment = segments
            .iter()
            .find(|segment| decode(segment_key(segment)).eq_ignore_ascii_case(key))?;
        let (_, raw_value) = segment.split_once('=')?;
        // Decoded twice: once as a query value, once more for wrapped links
        // that were encoded again by the redirector.
        let value = urlencoding::decode(raw_value).ok()?;
        let target = urlencoding::decode(&value).ok()?.into_owned();
        target.starts_with("http").then_some(target)
    })
}

fn strip_tracking_query(parts: &mut UrlParts<'_>) {
    retain_query(parts, |key| !is_tracking_key(key));
}

fn strip_amp(parts: &mut UrlParts<'_>) {
    if parts.path.ends_with("/amp/") {
        parts.path.truncate(parts.path.len() - "amp/".len());
    } else if parts.path.ends_with("/amp") {
        parts.path.truncate(parts.path.len() - AMP_PARAM.len());
    }
    retain_query(parts, |key| !key.eq_ignore_ascii_case(AMP_PARAM));
}

/// Keeps query segments whose decoded key passes `keep`, preserving their
/// original encoding. A query left empty is dropped together with its `?`.
fn retain_query<F>(parts: &mut UrlParts<'_>, keep: F)
where
    F: Fn(&str) -> bool,
{
    let Some(query) = parts.query.take() else {
        return;
    };
    if query.is_empty() {
        parts.query = Some(query);
        return;
    }
    let kept: Vec<&str> = query
        .split('&')
        .filter(|segment| keep(&decode(segment_key(segment))))
        .collect();
    parts.query = (!kept.is_empty()).then(|| kept.join("&"));
}

fn strip_tracking_fragment(parts: &mut UrlParts<'_>) {
    let Some(fragment) = parts.fragment.take() else {
        return;
    };
    if fragment.is_empty() {
        parts.fragment = Some(fragment);
        return;
    }
    let kept: Vec<&str> = fragment
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| !is_tracking_key(&decode(segment_key(segment))))
        .collect();
    parts.fragment = (!kept.is_empty()).then(|| kept.join("&"));
}

fn segment_key(segment: &str) -> &str {
    segment.split_once('=').map_or(segment, |(key, _)| key)
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |decoded| decoded.into_owned())
}

fn is_tracking_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    TRACKING_PARAMS.contains(&lower.as_str())
        || TRACKING_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}
