//! Header parsing: From addresses, dates, and List-Unsubscribe grammar

use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::UnsubscribeInfo;

static ANGLE_ADDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^>]+)>").unwrap());
static MAILTO_TARGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<mailto:([^>]+)>").unwrap());
static HTTP_TARGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(https?://[^>]+)>").unwrap());

/// Parse a From header into (display name, normalized address)
///
/// `"Example News" <News@Example.com>` yields `("Example News", "news@example.com")`.
/// A bare address yields the lowercased address for both, so the name is
/// never empty.
pub fn parse_from_header(from: &str) -> (String, String) {
    let email = match ANGLE_ADDR.captures(from) {
        Some(caps) => caps[1].trim().to_lowercase(),
        None => from.trim().to_lowercase(),
    };

    let name = match from.split('<').next() {
        Some(prefix) if !prefix.trim().is_empty() && from.contains('<') => {
            prefix.trim().replace('"', "")
        }
        _ => email.clone(),
    };

    (name, email)
}

/// Extract unsubscribe targets from List-Unsubscribe / List-Unsubscribe-Post
///
/// Recognizes `<mailto:...>` and `<http(s)://...>` targets anywhere in the
/// header; both may be present. Returns `None` when neither parses, so a
/// present-but-useless header does not mark the sender as unsubscribable.
pub fn parse_unsubscribe(
    list_unsubscribe: Option<&str>,
    list_unsubscribe_post: Option<&str>,
) -> Option<UnsubscribeInfo> {
    let header = list_unsubscribe?;

    let mailto = MAILTO_TARGET
        .captures(header)
        .map(|caps| caps[1].to_string());
    let http_url = HTTP_TARGET.captures(header).map(|caps| caps[1].to_string());

    if mailto.is_none() && http_url.is_none() {
        return None;
    }

    let one_click = list_unsubscribe_post
        .map(|post| post.to_lowercase().contains("list-unsubscribe=one-click"))
        .unwrap_or(false);

    Some(UnsubscribeInfo {
        mailto,
        http_url,
        one_click,
    })
}

/// Parse a Date header into epoch milliseconds
///
/// Tries RFC 2822 first, then RFC 3339. Unparseable dates become 0 rather
/// than an error; a bad Date header should not drop the message from a scan.
pub fn parse_date_millis(date_str: &str) -> i64 {
    DateTime::parse_from_rfc2822(date_str)
        .or_else(|_| DateTime::parse_from_rfc3339(date_str))
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// Split a mailto target into (address, subject, body)
///
/// `unsub@example.com?subject=Remove%20me` yields the address plus the
/// decoded subject. Missing params yield `None`.
pub fn split_mailto(mailto: &str) -> (String, Option<String>, Option<String>) {
    let (addr, params) = match mailto.split_once('?') {
        Some((addr, params)) => (addr, Some(params)),
        None => (mailto, None),
    };

    let mut subject = None;
    let mut body = None;
    if let Some(params) = params {
        for pair in params.split('&') {
            let (key, value) = match pair.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            let decoded = percent_decode(value);
            match key.to_lowercase().as_str() {
                "subject" => subject = Some(decoded),
                "body" => body = Some(decoded),
                _ => {}
            }
        }
    }

    (addr.trim().to_string(), subject, body)
}

/// Minimal percent-decoding for mailto query params ('+' treated as space)
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_from_header_with_name() {
        let (name, email) = parse_from_header("Example News <News@Example.COM>");
        assert_eq!(name, "Example News");
        assert_eq!(email, "news@example.com");
    }

    #[test]
    fn test_parse_from_header_quoted_name() {
        let (name, email) = parse_from_header("\"Jane Smith\" <jane@example.com>");
        assert_eq!(name, "Jane Smith");
        assert_eq!(email, "jane@example.com");
    }

    #[test]
    fn test_parse_from_header_bare_address() {
        let (name, email) = parse_from_header("Plain@Example.com");
        assert_eq!(email, "plain@example.com");
        // Name falls back to the address
        assert_eq!(name, "plain@example.com");
    }

    #[test]
    fn test_parse_unsubscribe_both_targets() {
        let header = "<mailto:unsub@example.com?subject=Unsubscribe>, <https://example.com/u?t=xyz>";
        let info = parse_unsubscribe(Some(header), Some("List-Unsubscribe=One-Click")).unwrap();
        assert_eq!(
            info.mailto.as_deref(),
            Some("unsub@example.com?subject=Unsubscribe")
        );
        assert_eq!(info.http_url.as_deref(), Some("https://example.com/u?t=xyz"));
        assert!(info.one_click);
    }

    #[test]
    fn test_parse_unsubscribe_mailto_only() {
        let info = parse_unsubscribe(Some("<mailto:leave@list.example.org>"), None).unwrap();
        assert!(info.mailto.is_some());
        assert!(info.http_url.is_none());
        assert!(!info.one_click);
    }

    #[test]
    fn test_parse_unsubscribe_unrecognized_header() {
        // Header present but no parseable target
        assert!(parse_unsubscribe(Some("call us to unsubscribe"), None).is_none());
        assert!(parse_unsubscribe(None, Some("List-Unsubscribe=One-Click")).is_none());
    }

    #[test]
    fn test_one_click_requires_exact_token() {
        let info = parse_unsubscribe(
            Some("<https://example.com/u>"),
            Some("some-other-value"),
        )
        .unwrap();
        assert!(!info.one_click);
    }

    #[test]
    fn test_parse_date_millis() {
        let millis = parse_date_millis("Mon, 24 Nov 2025 10:30:00 +0000");
        assert!(millis > 0);

        let rfc3339 = parse_date_millis("2025-11-24T10:30:00Z");
        assert_eq!(millis, rfc3339);

        assert_eq!(parse_date_millis("not a date"), 0);
    }

    #[test]
    fn test_split_mailto_with_params() {
        let (addr, subject, body) =
            split_mailto("unsub@example.com?subject=Remove%20me&body=please+stop");
        assert_eq!(addr, "unsub@example.com");
        assert_eq!(subject.as_deref(), Some("Remove me"));
        assert_eq!(body.as_deref(), Some("please stop"));
    }

    #[test]
    fn test_split_mailto_plain() {
        let (addr, subject, body) = split_mailto("unsub@example.com");
        assert_eq!(addr, "unsub@example.com");
        assert!(subject.is_none());
        assert!(body.is_none());
    }
}
