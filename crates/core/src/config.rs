use std::env;
use std::str::FromStr;

/// Env var naming the active profile.
pub const PROFILE_ENV: &str = "THREADWORK_PROFILE";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Active profile from `THREADWORK_PROFILE`, upper-cased (empty = default).
pub fn active_profile() -> String {
    env_opt(PROFILE_ENV).unwrap_or_default().to_uppercase()
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
pub fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

pub fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Parse a profiled env var, falling back to `default` when unset or unparsable.
pub fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    match profiled_env_opt(profile, key) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable config value");
                default
            }
        },
        None => default,
    }
}

pub fn profile_label(profile: &str) -> &str {
    if profile.is_empty() { "default" } else { profile }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keys are unique per test so parallel tests never race on the same var.

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        env::set_var("TW_TEST_A_POOL", "4");
        env::set_var("STAGING_TW_TEST_A_POOL", "9");
        assert_eq!(profiled_env_parse("STAGING", "TW_TEST_A_POOL", 1usize), 9);
        assert_eq!(profiled_env_parse("", "TW_TEST_A_POOL", 1usize), 4);
        assert_eq!(profiled_env_parse("OTHER", "TW_TEST_A_POOL", 1usize), 4);
    }

    #[test]
    fn unparsable_value_falls_back_to_default() {
        env::set_var("TW_TEST_B_POOL", "many");
        assert_eq!(profiled_env_parse("", "TW_TEST_B_POOL", 7u64), 7);
    }

    #[test]
    fn empty_value_counts_as_unset() {
        env::set_var("TW_TEST_C_NAME", "");
        assert_eq!(profiled_env_or("", "TW_TEST_C_NAME", "fallback"), "fallback");
        assert_eq!(profiled_env_opt("", "TW_TEST_C_MISSING"), None);
    }

    #[test]
    fn default_profile_label() {
        assert_eq!(profile_label(""), "default");
        assert_eq!(profile_label("PROD"), "PROD");
    }
}
