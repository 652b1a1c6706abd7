use studio_core::{Document, ALLOWED_EXTENSIONS, ALLOWED_MIME_TYPES, MAX_UPLOAD_BYTES};
use studio_error::{Result, StudioError};
use tracing::{debug, warn};

pub fn is_allowed_mime_type(mime_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime_type)
}

/// 扩展名大小写不敏感，只看最后一个点之后的部分
pub fn has_allowed_extension(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed)),
        None => false,
    }
}

/// 上传入口校验：缺失、超限、类型不符依次拒绝，不发起任何远端调用
pub fn validate_upload(document: Option<Document>) -> Result<Document> {
    let document = match document {
        Some(d) if !d.bytes.is_empty() || !d.filename.is_empty() => d,
        _ => {
            warn!("no file provided in the request");
            return Err(StudioError::NoFile);
        }
    };

    if document.bytes.is_empty() {
        warn!(filename = %document.filename, "empty file provided");
        return Err(StudioError::NoFile);
    }

    let size = document.size();
    if size > MAX_UPLOAD_BYTES {
        warn!(filename = %document.filename, size, "file exceeds upload limit");
        return Err(StudioError::TooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }

    let mime_ok = document
        .mime_type
        .as_deref()
        .map(is_allowed_mime_type)
        .unwrap_or(false);
    if !mime_ok && !has_allowed_extension(&document.filename) {
        warn!(
            filename = %document.filename,
            mime_type = ?document.mime_type,
            "invalid file type"
        );
        return Err(StudioError::UnsupportedType {
            filename: document.filename.clone(),
            mime_type: document.effective_mime_type().to_string(),
        });
    }

    debug!(
        filename = %document.filename,
        size,
        mime_type = document.effective_mime_type(),
        "upload accepted"
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(len: usize, name: &str, mime: Option<&str>) -> Document {
        Document::new(vec![b'a'; len], name, mime.map(str::to_string))
    }

    #[test]
    fn test_missing_file_is_rejected() {
        assert!(matches!(validate_upload(None), Err(StudioError::NoFile)));
        assert!(matches!(
            validate_upload(Some(doc(0, "", None))),
            Err(StudioError::NoFile)
        ));
        assert!(matches!(
            validate_upload(Some(doc(0, "empty.txt", Some("text/plain")))),
            Err(StudioError::NoFile)
        ));
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let at_limit = doc(MAX_UPLOAD_BYTES as usize, "big.pdf", Some("application/pdf"));
        assert!(validate_upload(Some(at_limit)).is_ok());

        let over = doc(
            MAX_UPLOAD_BYTES as usize + 1,
            "big.pdf",
            Some("application/pdf"),
        );
        match validate_upload(Some(over)) {
            Err(StudioError::TooLarge { size, limit }) => {
                assert_eq!(size, MAX_UPLOAD_BYTES + 1);
                assert_eq!(limit, MAX_UPLOAD_BYTES);
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_too_large_wins_over_type() {
        let over = doc(MAX_UPLOAD_BYTES as usize + 1, "movie.mp4", Some("video/mp4"));
        assert!(matches!(
            validate_upload(Some(over)),
            Err(StudioError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_mime_or_extension_is_enough() {
        // 类型正确、扩展名不符
        assert!(validate_upload(Some(doc(10, "notes", Some("text/plain")))).is_ok());
        // 类型缺失、扩展名正确（大小写不敏感）
        assert!(validate_upload(Some(doc(10, "Syllabus.DOCX", None))).is_ok());
        assert!(validate_upload(Some(doc(10, "grades.csv", Some("application/octet-stream")))).is_ok());
    }

    #[test]
    fn test_unsupported_type_rejected_within_size() {
        match validate_upload(Some(doc(10, "photo.png", Some("image/png")))) {
            Err(StudioError::UnsupportedType { filename, mime_type }) => {
                assert_eq!(filename, "photo.png");
                assert_eq!(mime_type, "image/png");
            }
            other => panic!("expected UnsupportedType, got {:?}", other),
        }
        assert!(matches!(
            validate_upload(Some(doc(10, "archive.pdf.zip", None))),
            Err(StudioError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_extension_matching() {
        assert!(has_allowed_extension("a.PdF"));
        assert!(has_allowed_extension("report.final.txt"));
        assert!(!has_allowed_extension("pdf"));
        assert!(!has_allowed_extension("a.pdfx"));
        assert!(is_allowed_mime_type("text/csv"));
        assert!(!is_allowed_mime_type("text/html"));
    }
}
