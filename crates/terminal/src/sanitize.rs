//! Environment and output sanitization for spawned PTYs.

use std::sync::OnceLock;

use regex::Regex;

/// Env var name fragments that must never reach a spawned shell.
const SENSITIVE_FRAGMENTS: &[&str] = &[
    "KEY",
    "SECRET",
    "TOKEN",
    "PASSWORD",
    "CREDENTIAL",
    "PRIVATE",
];

/// True if the variable name contains any sensitive fragment,
/// case-insensitive.
pub fn is_sensitive_env_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| upper.contains(f))
}

/// The current process environment with sensitive entries dropped.
pub fn sanitized_env() -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(name, _)| !is_sensitive_env_name(name))
        .collect()
}

/// Remove ANSI escape sequences (CSI, OSC) and carriage returns.
pub fn strip_ansi(input: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(\x07|\x1b\\)|\x1b[@-_]")
            .expect("ansi regex")
    });
    re.replace_all(input, "").replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_names_by_fragment() {
        assert!(is_sensitive_env_name("API_KEY"));
        assert!(is_sensitive_env_name("aws_secret_access"));
        assert!(is_sensitive_env_name("GithubToken"));
        assert!(is_sensitive_env_name("DB_PASSWORD"));
        assert!(is_sensitive_env_name("GCP_CREDENTIALS"));
        assert!(is_sensitive_env_name("ssh_private_path"));
        assert!(!is_sensitive_env_name("PATH"));
        assert!(!is_sensitive_env_name("HOME"));
        assert!(!is_sensitive_env_name("LANG"));
    }

    #[test]
    fn sanitized_env_drops_sensitive() {
        std::env::set_var("PRIZM_TEST_SECRET_X", "hidden");
        std::env::set_var("PRIZM_TEST_PLAIN_X", "visible");
        let env = sanitized_env();
        assert!(!env.iter().any(|(k, _)| k == "PRIZM_TEST_SECRET_X"));
        assert!(env.iter().any(|(k, _)| k == "PRIZM_TEST_PLAIN_X"));
        std::env::remove_var("PRIZM_TEST_SECRET_X");
        std::env::remove_var("PRIZM_TEST_PLAIN_X");
    }

    #[test]
    fn strips_color_codes() {
        let colored = "\x1b[31mred\x1b[0m plain";
        assert_eq!(strip_ansi(colored), "red plain");
    }

    #[test]
    fn strips_osc_title_and_cr() {
        let input = "\x1b]0;window title\x07hello\r\nworld";
        assert_eq!(strip_ansi(input), "hello\nworld");
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(strip_ansi("just text"), "just text");
    }
}
