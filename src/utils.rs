use regex::Regex;
use std::sync::LazyLock;

/// Extensions an already-downloaded asset may carry
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "webp", "gif"];

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("static regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s").expect("static regex"));

/// Convert a prompt into a filename-safe fragment
pub fn sanitize_prompt(prompt: &str, max_chars: usize) -> String {
    let head: String = prompt.chars().take(max_chars).collect();
    let cleaned = UNSAFE_CHARS.replace_all(&head, "");
    let name = WHITESPACE.replace_all(cleaned.trim(), "_").into_owned();

    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

/// File stem for the record at `index`: zero-padded sequence number plus prompt fragment
pub fn asset_stem(index: usize, prompt: Option<&str>, max_chars: usize) -> String {
    format!(
        "{:04}_{}",
        index,
        sanitize_prompt(prompt.unwrap_or_default(), max_chars)
    )
}

/// Pick a file extension from a response content type
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("jpeg") || content_type.contains("jpg") {
        "jpg"
    } else if content_type.contains("webp") {
        "webp"
    } else if content_type.contains("gif") {
        "gif"
    } else {
        "png"
    }
}

/// Recognize an image format from its leading bytes
pub fn sniff_image_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

/// Extension for a fetched asset, or `None` when it is not an image.
///
/// An `image/*` content type is trusted; anything else (octet-stream, a
/// missing type) is accepted only if the bytes look like an image.
pub fn image_extension(content_type: &str, bytes: &[u8]) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.starts_with("image/") {
        return Some(extension_for_content_type(&essence));
    }
    sniff_image_extension(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_prompt() {
        assert_eq!(sanitize_prompt("A cat, wearing a hat!", 60), "A_cat_wearing_a_hat");
        assert_eq!(sanitize_prompt("  path/to\\file:name?  ", 60), "pathtofilename");
        assert_eq!(sanitize_prompt("line one\nline-two", 60), "line_one_line-two");
        assert_eq!(sanitize_prompt("café au lait", 60), "café_au_lait");
        assert_eq!(sanitize_prompt("!!!", 60), "untitled");
        assert_eq!(sanitize_prompt("", 60), "untitled");
    }

    #[test]
    fn test_sanitize_prompt_truncates_by_chars() {
        let prompt = "é".repeat(100);
        assert_eq!(sanitize_prompt(&prompt, 60).chars().count(), 60);
        assert_eq!(sanitize_prompt("abcdef ghij", 6), "abcdef");
    }

    #[test]
    fn test_asset_stem() {
        assert_eq!(asset_stem(7, Some("a dog"), 60), "0007_a_dog");
        assert_eq!(asset_stem(12345, None, 60), "12345_untitled");
    }

    #[test]
    fn test_image_extension_rejects_pages() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(image_extension("image/jpeg", b"whatever"), Some("jpg"));
        assert_eq!(image_extension("application/octet-stream", png), Some("png"));
        assert_eq!(image_extension("", b"RIFF\0\0\0\0WEBPVP8 "), Some("webp"));
        assert_eq!(image_extension("text/html; charset=utf-8", b"<html>login</html>"), None);
        assert_eq!(image_extension("application/json", b"{\"error\":1}"), None);
        assert_eq!(image_extension("application/octet-stream", b""), None);
    }

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(extension_for_content_type("image/jpeg"), "jpg");
        assert_eq!(extension_for_content_type("image/WEBP"), "webp");
        assert_eq!(extension_for_content_type("image/gif"), "gif");
        assert_eq!(extension_for_content_type("image/png"), "png");
        assert_eq!(extension_for_content_type(""), "png");
    }
}
