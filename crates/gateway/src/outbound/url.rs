//! Base URL normalization.
//!
//! Channels configure bare hosts, versioned URLs, or raw URLs; normalization
//! makes them uniform before path segments are appended:
//!
//! - an empty URL stays empty
//! - a trailing `#` marks the URL raw: the marker and any trailing slashes
//!   are stripped and no version is appended
//! - otherwise `/{version}` is appended unless the URL already ends with it
//!   or contains it as a path segment
//! - trailing slashes collapse in every case
//!
//! The operation is idempotent: normalizing an already-normalized URL is a
//! no-op.

pub(crate) fn normalize_base_url(url: &str, version: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    if let Some(raw) = url.strip_suffix('#') {
        return raw.trim_end_matches('/').to_string();
    }

    let trimmed = url.trim_end_matches('/');

    let suffix = format!("/{version}");
    let segment = format!("/{version}/");

    if trimmed.ends_with(&suffix) || trimmed.contains(&segment) {
        return trimmed.to_string();
    }

    format!("{trimmed}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_stays_empty() {
        assert_eq!(normalize_base_url("", "v1"), "");
    }

    #[test]
    fn hash_marks_raw_url() {
        assert_eq!(normalize_base_url("https://api.zai.com/v4#", "v4"), "https://api.zai.com/v4");
        assert_eq!(
            normalize_base_url("https://gateway.internal/custom#", "v1"),
            "https://gateway.internal/custom"
        );
        assert_eq!(
            normalize_base_url("https://gateway.internal/custom/#", "v1"),
            "https://gateway.internal/custom"
        );
    }

    #[test]
    fn version_is_appended_once() {
        assert_eq!(normalize_base_url("https://api.openai.com", "v1"), "https://api.openai.com/v1");
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1", "v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://host.example/v1/extra", "v1"),
            "https://host.example/v1/extra"
        );
    }

    #[test]
    fn trailing_slashes_collapse() {
        assert_eq!(
            normalize_base_url("https://api.example.com///", "v1"),
            "https://api.example.com/v1"
        );
    }

    #[test]
    fn multi_segment_versions_work() {
        assert_eq!(
            normalize_base_url("https://dashscope.aliyuncs.com", "compatible-mode/v1"),
            "https://dashscope.aliyuncs.com/compatible-mode/v1"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let cases = [
            ("", "v1"),
            ("https://api.openai.com", "v1"),
            ("https://api.openai.com/v1", "v1"),
            ("https://generativelanguage.googleapis.com", "v1beta"),
            ("https://api.zai.com/v4#", "v4"),
            ("https://api.example.com///", "v1"),
            ("https://host.example/v1/extra", "v1"),
            ("https://dashscope.aliyuncs.com", "compatible-mode/v1"),
        ];

        for (url, version) in cases {
            let once = normalize_base_url(url, version);
            let twice = normalize_base_url(&once, version);
            assert_eq!(once, twice, "normalize({url:?}, {version:?}) is not idempotent");
        }
    }
}
