//! Attachment text extraction, dispatched on content type.

use thiserror::Error;

/// Size cap for a single downloaded attachment.
pub const MAX_ATTACHMENT_BYTES: usize = 1024 * 1024;
/// Extracted text is truncated to keep one file from eating the prompt.
pub const MAX_EXTRACT_CHARS: usize = 8000;

/// Extensions treated as readable text regardless of reported MIME type.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "log", "csv", "tsv", "json", "yaml", "yml", "toml", "ini",
    "xml", "html", "sh", "py", "rs", "go", "js", "ts", "c", "h", "cpp", "java", "rb", "sql",
];

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("attachment too large: {0} bytes")]
    TooLarge(usize),

    #[error("unsupported content type: {0}")]
    Unsupported(String),
}

/// Extract LLM-consumable text from an attachment.
///
/// `text/*` and recognized code/config types decode as UTF-8 (lossy).
/// PDFs and images are acknowledged with a placeholder — their content is
/// not fed to the provider. Anything else is unsupported; the pipeline
/// records the failure and continues.
pub fn extract_text(filename: &str, content_type: &str, bytes: &[u8]) -> Result<String, AttachError> {
    if bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(AttachError::TooLarge(bytes.len()));
    }

    let content_type = content_type.to_lowercase();

    if content_type.starts_with("image/") {
        return Ok(format!(
            "[Attachment '{filename}' acknowledged — image content not processed]"
        ));
    }
    if content_type == "application/pdf" || has_extension(filename, &["pdf"]) {
        return Ok(format!(
            "[Attachment '{filename}' acknowledged — PDF text extraction not available]"
        ));
    }

    let looks_texty = content_type.starts_with("text/")
        || matches!(
            content_type.as_str(),
            "application/json" | "application/xml" | "application/x-yaml" | "application/toml"
        )
        || has_extension(filename, TEXT_EXTENSIONS);

    if !looks_texty {
        return Err(AttachError::Unsupported(content_type));
    }

    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() > MAX_EXTRACT_CHARS {
        let mut cut = MAX_EXTRACT_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n[... truncated ...]");
    }
    Ok(text)
}

fn has_extension(filename: &str, extensions: &[&str]) -> bool {
    filename
        .rsplit('.')
        .next()
        .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_extracts_verbatim() {
        let text = extract_text("notes.txt", "text/plain", b"line one\nline two").unwrap();
        assert_eq!(text, "line one\nline two");
    }

    #[test]
    fn code_extension_overrides_generic_mime() {
        let text = extract_text("main.rs", "application/octet-stream", b"fn main() {}").unwrap();
        assert_eq!(text, "fn main() {}");
    }

    #[test]
    fn pdf_and_image_get_placeholders() {
        let pdf = extract_text("doc.pdf", "application/pdf", b"%PDF-1.4").unwrap();
        assert!(pdf.contains("PDF text extraction not available"));

        let img = extract_text("photo.png", "image/png", &[0x89, 0x50]).unwrap();
        assert!(img.contains("image content not processed"));
    }

    #[test]
    fn unknown_binary_is_unsupported() {
        let err = extract_text("blob.bin", "application/octet-stream", &[0, 1, 2]).unwrap_err();
        assert!(matches!(err, AttachError::Unsupported(_)));
    }

    #[test]
    fn oversized_attachment_rejected() {
        let big = vec![b'a'; MAX_ATTACHMENT_BYTES + 1];
        let err = extract_text("big.txt", "text/plain", &big).unwrap_err();
        assert!(matches!(err, AttachError::TooLarge(_)));
    }

    #[test]
    fn long_text_is_truncated_with_marker() {
        let long = "x".repeat(MAX_EXTRACT_CHARS + 100);
        let text = extract_text("big.md", "text/markdown", long.as_bytes()).unwrap();
        assert!(text.ends_with("[... truncated ...]"));
        assert!(text.len() < long.len());
    }
}
