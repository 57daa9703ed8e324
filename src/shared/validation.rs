use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex for upload session ids chosen by the client
    /// Letters, digits, hyphen and underscore only, 8 to 128 characters
    /// - Valid: "0191b2c4-7d1e-7c3a-9f00-1234567890ab", "session_0001"
    /// - Invalid: "../etc", "short", "a b c d e f g"
    pub static ref UPLOAD_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_-]{8,128}$").unwrap();
}

/// Maximum length of a catalog file name in bytes
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Check an upload session id before it is used as a directory name
pub fn is_valid_upload_id(upload_id: &str) -> bool {
    UPLOAD_ID_REGEX.is_match(upload_id)
}

/// Check a destination file name (a single path component)
pub fn is_valid_file_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && name.len() <= MAX_FILE_NAME_LEN
        && trimmed != "."
        && trimmed != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_id_valid() {
        assert!(is_valid_upload_id("0191b2c4-7d1e-7c3a-9f00-1234567890ab"));
        assert!(is_valid_upload_id("session_0001"));
        assert!(is_valid_upload_id("ABCDEFGH"));
    }

    #[test]
    fn test_upload_id_invalid() {
        assert!(!is_valid_upload_id("../../etc")); // traversal
        assert!(!is_valid_upload_id("short")); // too short
        assert!(!is_valid_upload_id("with space1")); // space
        assert!(!is_valid_upload_id("")); // empty
        assert!(!is_valid_upload_id(&"a".repeat(129))); // too long
    }

    #[test]
    fn test_file_name_valid() {
        assert!(is_valid_file_name("report.pdf"));
        assert!(is_valid_file_name("archive.tar.gz"));
        assert!(is_valid_file_name(".hidden"));
    }

    #[test]
    fn test_file_name_invalid() {
        assert!(!is_valid_file_name(""));
        assert!(!is_valid_file_name("   "));
        assert!(!is_valid_file_name(".."));
        assert!(!is_valid_file_name("dir/file.txt"));
        assert!(!is_valid_file_name("dir\\file.txt"));
        assert!(!is_valid_file_name(&"x".repeat(256)));
    }
}
