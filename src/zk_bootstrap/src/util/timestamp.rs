//! Timestamp formatting utilities

/// Format the current UTC time for instance tags
///
/// Format: YYYY-MM-DDTHH:MM:SSZ
pub fn format_tag_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_timestamp_shape() {
        let stamp = format_tag_timestamp();
        assert_eq!(stamp.len(), 20);
        assert!(stamp.ends_with('Z'));
        assert_eq!(&stamp[10..11], "T");
    }
}
