//! Output filename derivation
//!
//! A `Content-Disposition` filename wins; otherwise the last path segment of
//! the URL is used. Either way the result is sanitized against path-unsafe
//! characters and capped in length.

use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// Longest filename produced, in bytes
pub const MAX_FILENAME_LEN: usize = 200;

const UNSAFE_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Picks the on-disk name for a download
///
/// # Arguments
///
/// * `url` - The URL being fetched
/// * `content_disposition` - Raw `Content-Disposition` header, if any
///
/// # Returns
///
/// A sanitized filename. Falls back to `download_<nanos>` when neither the
/// header nor the URL offers a name with an extension.
pub fn derive_filename(url: &Url, content_disposition: Option<&str>) -> String {
    if let Some(name) = content_disposition.and_then(parse_content_disposition) {
        let sanitized = sanitize_filename(&name);
        if !sanitized.is_empty() {
            return sanitized;
        }
    }

    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");

    if segment.is_empty() || !segment.contains('.') {
        return fallback_name();
    }

    let sanitized = sanitize_filename(segment);
    if sanitized.is_empty() {
        fallback_name()
    } else {
        sanitized
    }
}

fn fallback_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("download_{}", nanos)
}

/// Extracts the filename from a `Content-Disposition` value
///
/// `filename*=UTF-8''...` takes precedence over `filename=`.
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for param in value.split(';') {
        let Some((name, v)) = param.trim().split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let v = v.trim();

        if name == "filename*" {
            let encoded = v
                .strip_prefix("UTF-8''")
                .or_else(|| v.strip_prefix("utf-8''"));
            if let Some(encoded) = encoded {
                let decoded = percent_decode(encoded);
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        } else if name == "filename" {
            let unquoted = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(v);
            if !unquoted.is_empty() {
                plain = Some(unquoted.to_string());
            }
        }
    }

    plain
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(b) = hex {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Replaces path-unsafe characters and caps the length
///
/// Leading dots and whitespace are trimmed so the result can never name a
/// parent directory or a hidden file. Truncation keeps the extension.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim().trim_start_matches('.').trim();
    if trimmed.len() <= MAX_FILENAME_LEN {
        return trimmed.to_string();
    }

    let ext = trimmed
        .rfind('.')
        .map(|i| &trimmed[i..])
        .filter(|ext| ext.len() < 16)
        .unwrap_or("");

    let mut take = MAX_FILENAME_LEN - ext.len();
    while !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    format!("{}{}", &trimmed[..take], ext)
}

/// The `n`th alternative for a name already taken on disk
///
/// `n == 0` is the name itself; otherwise `_n` goes before the extension, so
/// `report.pdf` becomes `report_1.pdf`, `report_2.pdf` and so on.
pub fn numbered_filename(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(i) if i > 0 => format!("{}_{}{}", &name[..i], n, &name[i..]),
        _ => format!("{}_{}", name, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_last_path_segment() {
        let name = derive_filename(&url("https://example.com/docs/report.pdf?x=1"), None);
        assert_eq!(name, "report.pdf");
    }

    #[test]
    fn test_content_disposition_wins() {
        let name = derive_filename(
            &url("https://example.com/download?id=4"),
            Some("attachment; filename=\"annual report.pdf\""),
        );
        assert_eq!(name, "annual report.pdf");
    }

    #[test]
    fn test_extended_filename_preferred() {
        let parsed = parse_content_disposition(
            "attachment; filename=\"fallback.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf",
        );
        assert_eq!(parsed.as_deref(), Some("résumé.pdf"));
    }

    #[test]
    fn test_unquoted_filename() {
        let parsed = parse_content_disposition("inline; filename=plain.txt");
        assert_eq!(parsed.as_deref(), Some("plain.txt"));
        assert_eq!(parse_content_disposition("inline"), None);
    }

    #[test]
    fn test_fallback_without_extension() {
        let name = derive_filename(&url("https://example.com/download"), None);
        assert!(name.starts_with("download_"));

        let name = derive_filename(&url("https://example.com/"), None);
        assert!(name.starts_with("download_"));
    }

    #[test]
    fn test_sanitize_unsafe_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?.pdf"), "a_b_c_d_e_.pdf");
        assert_eq!(sanitize_filename("x<y>|\"z\".txt"), "x_y___z_.txt");
        assert_eq!(sanitize_filename("nul\0byte.bin"), "nul_byte.bin");
    }

    #[test]
    fn test_sanitize_blocks_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("..hidden"), "hidden");
    }

    #[test]
    fn test_sanitize_caps_length_keeping_extension() {
        let long = format!("{}.pdf", "a".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized.len(), MAX_FILENAME_LEN);
        assert!(sanitized.ends_with(".pdf"));
    }

    #[test]
    fn test_sanitize_caps_multibyte() {
        let long = "é".repeat(150);
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.len() <= MAX_FILENAME_LEN);
        assert!(sanitized.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_numbered_filename_inserts_before_extension() {
        assert_eq!(numbered_filename("report.pdf", 0), "report.pdf");
        assert_eq!(numbered_filename("report.pdf", 1), "report_1.pdf");
        assert_eq!(numbered_filename("archive.tar.gz", 2), "archive.tar_2.gz");
        assert_eq!(numbered_filename("download_123", 3), "download_123_3");
    }
}
