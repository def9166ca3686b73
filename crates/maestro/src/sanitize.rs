//! Redaction of credential-looking material from outgoing error strings.
//!
//! Every error message that leaves the crate (provider failures, tool
//! failures serialized into tool messages, timeout text) passes through
//! [`sanitize_error_message`] so that vendor exceptions carrying API keys
//! or local paths never reach logs or model-visible tool results intact.

use regex::Regex;

/// Redact secrets and user-identifying paths from an error message.
///
/// Applied rules, in order:
/// - `name=value` pairs whose name contains `key`, `token`, `secret`,
///   `password` or `credential` keep the name, the value becomes `***`.
/// - `bearer <token>` becomes `bearer ***` (case-insensitive).
/// - `/home/<user>`, `/Users/<user>` and `C:\Users\<user>` have the user
///   segment replaced with `***`.
pub fn sanitize_error_message(message: &str) -> String {
    let secret_pair =
        Regex::new(r"(?i)([A-Za-z_]*(?:key|token|secret|password|credential)[A-Za-z_]*)=(\S+)")
            .unwrap();
    let bearer = Regex::new(r"(?i)\bbearer\s+\S+").unwrap();
    let unix_home = Regex::new(r"(/home/|/Users/)([^/\s]+)").unwrap();
    let windows_profile = Regex::new(r"(?i)(C:\\Users\\)([^\\\s]+)").unwrap();

    let sanitized = secret_pair.replace_all(message, "$1=***");
    let sanitized = bearer.replace_all(&sanitized, "bearer ***");
    let sanitized = unix_home.replace_all(&sanitized, "$1***");
    let sanitized = windows_profile.replace_all(&sanitized, "$1***");
    sanitized.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_key_value_pairs() {
        assert_eq!(sanitize_error_message("token=abcd"), "token=***");
        assert_eq!(
            sanitize_error_message("failed with api_key=sk-ant-xyz status=401"),
            "failed with api_key=*** status=401"
        );
        assert_eq!(
            sanitize_error_message("MY_SECRET_TOKEN=aaa OTHER_password=bbb"),
            "MY_SECRET_TOKEN=*** OTHER_password=***"
        );
    }

    #[test]
    fn test_keeps_benign_pairs() {
        assert_eq!(
            sanitize_error_message("status=500 model=gpt-4"),
            "status=500 model=gpt-4"
        );
    }

    #[test]
    fn test_redacts_bearer() {
        assert_eq!(
            sanitize_error_message("Authorization: Bearer eyJhbGciOi failed"),
            "Authorization: bearer *** failed"
        );
    }

    #[test]
    fn test_redacts_home_paths() {
        assert_eq!(
            sanitize_error_message("could not read /home/alice/.config/app"),
            "could not read /home/***/.config/app"
        );
        assert_eq!(
            sanitize_error_message("file at /Users/bob/work missing"),
            "file at /Users/***/work missing"
        );
        assert_eq!(
            sanitize_error_message(r"access denied: C:\Users\carol\secrets.txt"),
            r"access denied: C:\Users\***\secrets.txt"
        );
    }

    #[test]
    fn test_redaction_count_matches_occurrences() {
        let input = "token=a token=b /home/alice /home/bob";
        let output = sanitize_error_message(input);
        assert_eq!(output.matches("token=***").count(), 2);
        assert_eq!(output.matches("/home/***").count(), 2);
    }
}
