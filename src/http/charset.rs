//! Content-type charset extraction and normalization.

/// Encoding used when a content type names no charset.
pub const DEFAULT_ENCODING: &str = "UTF-8";

// (canonical name, accepted aliases)
const KNOWN_CHARSETS: &[(&str, &[&str])] = &[
    ("UTF-8", &["utf-8", "utf8", "unicode-1-1-utf-8"]),
    ("UTF-16", &["utf-16", "utf16"]),
    ("UTF-16BE", &["utf-16be", "x-utf-16be"]),
    ("UTF-16LE", &["utf-16le", "x-utf-16le"]),
    ("US-ASCII", &["us-ascii", "ascii", "iso646-us", "ansi_x3.4-1968"]),
    ("ISO-8859-1", &["iso-8859-1", "iso8859-1", "iso_8859-1", "latin1", "l1", "cp819"]),
    ("ISO-8859-2", &["iso-8859-2", "iso8859-2", "latin2"]),
    ("ISO-8859-15", &["iso-8859-15", "iso8859-15", "latin9"]),
    ("windows-1252", &["windows-1252", "cp1252"]),
    ("Shift_JIS", &["shift_jis", "sjis", "shift-jis"]),
    ("EUC-JP", &["euc-jp", "eucjp"]),
    ("GBK", &["gbk", "cp936"]),
    ("Big5", &["big5"]),
];

/// The raw `charset` parameter of a content type, without quotes.
pub fn find_charset(content_type: Option<&str>) -> Option<String> {
    let content_type = content_type?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        } else {
            None
        }
    })
}

/// Canonical name of `charset`, [`DEFAULT_ENCODING`] when absent,
/// or `None` when it cannot be mapped.
pub fn map_charset(charset: Option<&str>) -> Option<String> {
    let Some(charset) = charset else {
        return Some(DEFAULT_ENCODING.to_string());
    };
    let wanted = charset.trim().trim_matches('"').to_ascii_lowercase();
    KNOWN_CHARSETS
        .iter()
        .find(|(_, aliases)| aliases.contains(&wanted.as_str()))
        .map(|(canonical, _)| canonical.to_string())
}

/// Normalized encoding of a content type in one step.
pub fn encoding_of(content_type: Option<&str>) -> Result<String, String> {
    let charset = find_charset(content_type);
    map_charset(charset.as_deref()).ok_or_else(|| charset.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_charset() {
        assert_eq!(
            find_charset(Some("text/xml; charset=\"iso-8859-1\"")),
            Some("iso-8859-1".to_string())
        );
        assert_eq!(find_charset(Some("text/xml")), None);
        assert_eq!(find_charset(None), None);
    }

    #[test]
    fn maps_aliases_and_defaults() {
        assert_eq!(map_charset(Some("utf8")).as_deref(), Some("UTF-8"));
        assert_eq!(map_charset(Some("LATIN1")).as_deref(), Some("ISO-8859-1"));
        assert_eq!(map_charset(None).as_deref(), Some("UTF-8"));
        assert_eq!(map_charset(Some("x-unknown")), None);
    }

    #[test]
    fn encoding_of_reports_bad_charset() {
        assert_eq!(encoding_of(Some("application/json")).unwrap(), "UTF-8");
        assert_eq!(encoding_of(Some("text/plain; charset=bogus")).unwrap_err(), "bogus");
    }
}
