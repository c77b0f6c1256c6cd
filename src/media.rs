//! 媒体文件识别

use std::path::Path;

/// 同步根目录下自动生成的辅助脚本，不参与同步
pub const HELPER_ARTIFACT: &str = "SynctoS3.bat";

/// 参与同步的扩展名（小写，不含点）
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "m4v", "webm", "flv", "mpeg", "mpg", "3gp",
];

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// 扩展名是否属于媒体集合（大小写不敏感）
pub fn is_media_file(path: &str) -> bool {
    extension(path)
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// 根据对象键的扩展名推断 Content-Type
pub fn content_type(key: &str) -> &'static str {
    match extension(key).as_deref() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("wmv") => "video/x-ms-wmv",
        Some("m4v") => "video/x-m4v",
        Some("webm") => "video/webm",
        Some("flv") => "video/x-flv",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("3gp") => "video/3gpp",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_filter_ignores_case() {
        assert!(is_media_file("shows/Episode.MKV"));
        assert!(is_media_file("a/b/c.3gp"));
        assert!(!is_media_file("notes.txt"));
        assert!(!is_media_file("mp4"));
        assert!(!is_media_file(HELPER_ARTIFACT));
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type("x/clip.Mov"), "video/quicktime");
        assert_eq!(content_type("clip.mpg"), "video/mpeg");
        assert_eq!(content_type("readme"), DEFAULT_CONTENT_TYPE);
    }
}
