//! Input checks performed before anything is sent to the relay.

use std::path::Path;

use relaychat_shared::constants::{MAX_UPLOAD_SIZE, MAX_USERNAME_LEN};

use crate::error::{ClientError, Result};

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff", "svg", "ico", "heic",
];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "mov", "avi", "webm", "wmv", "flv", "mpeg", "mpg", "3gp",
];
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "ogg", "oga", "flac", "aac", "m4a", "wma", "opus", "mid", "midi",
];

/// Usernames are not enforced unique by the relay; checking against the
/// roster the client last saw is best effort.
pub fn validate_username(name: &str, current_usernames: &[String]) -> Result<()> {
    if name.is_empty() {
        return Err(ClientError::InvalidUsername("username is empty"));
    }
    if name.chars().count() > MAX_USERNAME_LEN {
        return Err(ClientError::InvalidUsername("username is too long"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ClientError::InvalidUsername("username cannot contain spaces"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ClientError::InvalidUsername(
            "username cannot contain special characters",
        ));
    }
    if current_usernames.iter().any(|taken| taken == name) {
        return Err(ClientError::InvalidUsername("username is already taken"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Audio)
    } else {
        None
    }
}

/// Only media files up to [`MAX_UPLOAD_SIZE`] bytes may be sent.
pub fn validate_upload(path: &Path, size: u64) -> Result<MediaKind> {
    if size > MAX_UPLOAD_SIZE {
        return Err(ClientError::RejectedFile(format!(
            "{size} bytes exceeds the {MAX_UPLOAD_SIZE} byte limit"
        )));
    }
    media_kind(path).ok_or_else(|| {
        ClientError::RejectedFile(format!(
            "{} is not an image, video or audio file",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(result: Result<()>) -> &'static str {
        match result {
            Err(ClientError::InvalidUsername(reason)) => reason,
            other => panic!("expected invalid username, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_usernames() {
        assert!(validate_username("alice", &[]).is_ok());
        assert!(validate_username("Bob_42", &["alice".into()]).is_ok());
        assert!(validate_username(&"a".repeat(15), &[]).is_ok());
    }

    #[test]
    fn test_rejected_usernames() {
        assert_eq!(reason(validate_username("", &[])), "username is empty");
        assert_eq!(reason(validate_username(&"a".repeat(16), &[])), "username is too long");
        assert_eq!(reason(validate_username("user name", &[])), "username cannot contain spaces");
        assert_eq!(
            reason(validate_username("user@name", &[])),
            "username cannot contain special characters"
        );
        assert_eq!(
            reason(validate_username("existing_user", &["existing_user".into()])),
            "username is already taken"
        );
    }

    #[test]
    fn test_upload_size_limit() {
        let path = Path::new("/path/to/large_file.mp4");
        assert!(validate_upload(path, 20_000_000).is_ok());
        assert!(matches!(
            validate_upload(path, 30_000_000),
            Err(ClientError::RejectedFile(_))
        ));
    }

    #[test]
    fn test_upload_media_types() {
        assert_eq!(validate_upload(Path::new("a.PNG"), 1).unwrap(), MediaKind::Image);
        assert_eq!(validate_upload(Path::new("b.webm"), 1).unwrap(), MediaKind::Video);
        assert_eq!(validate_upload(Path::new("c.flac"), 1).unwrap(), MediaKind::Audio);
        assert!(validate_upload(Path::new("/path/to/file.txt"), 10_000_000).is_err());
        assert!(validate_upload(Path::new("no_extension"), 1).is_err());
    }
}
