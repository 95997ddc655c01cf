use std::path::{Path, PathBuf};

/// File extension used when a MIME type is not in [`MIME_EXTENSIONS`].
pub const FALLBACK_EXTENSION: &str = ".bin";

/// MIME types the assistant service can attach, with the extension to save under.
pub const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("text/x-c", ".c"),
    ("text/x-csharp", ".cs"),
    ("text/x-c++", ".cpp"),
    ("application/msword", ".doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
    ),
    ("text/html", ".html"),
    ("text/x-java", ".java"),
    ("application/json", ".json"),
    ("text/markdown", ".md"),
    ("application/pdf", ".pdf"),
    ("text/x-php", ".php"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".pptx",
    ),
    ("text/x-python", ".py"),
    ("text/x-script.python", ".py"),
    ("text/x-ruby", ".rb"),
    ("text/x-tex", ".tex"),
    ("text/plain", ".txt"),
    ("text/css", ".css"),
    ("text/javascript", ".js"),
    ("application/x-sh", ".sh"),
    ("application/typescript", ".ts"),
    ("application/csv", ".csv"),
    ("image/jpeg", ".jpeg"),
    ("image/gif", ".gif"),
    ("image/png", ".png"),
    ("application/x-tar", ".tar"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xlsx",
    ),
    ("application/xml", ".xml"),
    ("application/zip", ".zip"),
];

pub fn extension_for(mime_type: &str) -> &'static str {
    MIME_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, ext)| *ext)
        .unwrap_or(FALLBACK_EXTENSION)
}

/// `downloaded_file_<id><ext>` inside `dir`.
pub fn attachment_path(dir: &Path, file_id: &str, mime_type: &str) -> PathBuf {
    dir.join(format!(
        "downloaded_file_{}{}",
        file_id,
        extension_for(mime_type)
    ))
}

/// Write an attachment, replacing any earlier download of the same file.
pub async fn save_attachment(
    dir: &Path,
    file_id: &str,
    mime_type: &str,
    content: &[u8],
) -> std::io::Result<PathBuf> {
    let path = attachment_path(dir, file_id, mime_type);
    tokio::fs::write(&path, content).await?;
    tracing::debug!("Saved {} bytes to {}", content.len(), path.display());
    Ok(path)
}
