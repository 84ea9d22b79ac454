const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '[', ']'];
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL",
    "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9",
    "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// File stem used for a credential entry of `domain`.
///
/// Domains are already normalized hosts, so this only has to guard against
/// IPv6 literals and names Windows refuses to create.
pub fn entry_file_stem(domain: &str) -> String {
    let mut result: String = domain
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let upper = result.to_uppercase();
    let base = upper.split('.').next().unwrap_or("");
    if RESERVED_NAMES.contains(&base) {
        result = format!("_{}", result);
    }

    result = result.trim_end_matches(['.', ' ']).to_string();

    if result.is_empty() {
        result = "_".to_string();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_domain_unchanged() {
        assert_eq!(entry_file_stem("example.com"), "example.com");
        assert_eq!(entry_file_stem("media.example.co.uk"), "media.example.co.uk");
    }

    #[test]
    fn test_ipv6_literal_is_sanitized() {
        assert_eq!(entry_file_stem("[::1]"), "___1_");
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(entry_file_stem("con"), "_con");
        assert_eq!(entry_file_stem("aux.local"), "_aux.local");
    }

    #[test]
    fn test_trailing_dots_removed() {
        assert_eq!(entry_file_stem("example.com."), "example.com");
        assert_eq!(entry_file_stem("..."), "_");
    }
}
