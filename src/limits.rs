// limits.rs - Upload acceptance policy

/// Configuration constants for upload acceptance
pub struct Config {
    pub max_upload_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Determines whether an upload is worth decoding at all.
///
/// The declared multipart content type only gates obvious junk;
/// format authority lives with the magic-byte sniff in `decode`.
pub fn should_accept(declared_type: &str, size: u64, config: &Config) -> bool {
    if size == 0 || size > config.max_upload_bytes {
        return false;
    }

    declared_type.is_empty()
        || declared_type.eq_ignore_ascii_case("application/octet-stream")
        || declared_type
            .to_ascii_lowercase()
            .starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_image_upload() {
        let config = Config::default();
        assert!(should_accept("image/jpeg", 5000, &config));
        assert!(should_accept("IMAGE/PNG", 150000, &config));
    }

    #[test]
    fn test_accepts_undeclared_type() {
        let config = Config::default();
        assert!(should_accept("", 5000, &config));
        assert!(should_accept("application/octet-stream", 5000, &config));
    }

    #[test]
    fn test_rejects_empty_upload() {
        let config = Config::default();
        assert!(!should_accept("image/jpeg", 0, &config));
    }

    #[test]
    fn test_rejects_oversized_upload() {
        let config = Config::default();
        assert!(!should_accept("image/jpeg", 26 * 1024 * 1024, &config));
    }

    #[test]
    fn test_rejects_non_image_type() {
        let config = Config::default();
        assert!(!should_accept("text/html", 5000, &config));
        assert!(!should_accept("application/pdf", 5000, &config));
    }
}
