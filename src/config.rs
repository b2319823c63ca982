//! Configuration (SPEC_FULL.md §4.M, §6).
//!
//! A single `Config` is the source of truth consulted by the sync bridge,
//! the HTTP host, the process manager, the keyboard/terminal surface, and
//! the clock host. It is constructed once per bridge instance and handed by
//! reference; no component reads ambient global state, so two instances in
//! the same process (tests) never interfere with each other.

/// Tunables named in §6, with the documented defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Outbound HTTP proxy used when the target host forbids direct access.
    pub cors_proxy: Option<String>,
    pub terminal_cols: u16,
    pub terminal_rows: u16,
    /// Size in bytes of the shared-memory data area (§4.C).
    pub shared_buffer_size: usize,
    /// How long the calling thread parks waiting for a shared-memory
    /// response before the operation fails with `would-block`.
    pub sync_bridge_timeout_ms: u64,
    pub stdout_chunk: usize,
    pub stderr_chunk: usize,
    /// Interval a timed pollable re-checks readiness at (§4.J).
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cors_proxy: None,
            terminal_cols: 80,
            terminal_rows: 24,
            shared_buffer_size: 64 * 1024,
            sync_bridge_timeout_ms: 30_000,
            stdout_chunk: 8192,
            stderr_chunk: 1024,
            poll_interval_ms: 16,
        }
    }
}

impl Config {
    /// Builds a `Config` from environment-style key/value overrides, for
    /// embedding contexts that configure the bridge outside of source.
    /// Unknown keys are ignored; malformed values keep the default.
    pub fn from_overrides<'a, I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Config::default();
        for (key, value) in overrides {
            match key {
                "CORS_PROXY" => config.cors_proxy = Some(value.to_string()),
                "TERMINAL_COLS" => {
                    if let Ok(v) = value.parse() {
                        config.terminal_cols = v;
                    }
                }
                "TERMINAL_ROWS" => {
                    if let Ok(v) = value.parse() {
                        config.terminal_rows = v;
                    }
                }
                "SHARED_BUFFER_SIZE" => {
                    if let Ok(v) = value.parse() {
                        config.shared_buffer_size = v;
                    }
                }
                "SYNC_BRIDGE_TIMEOUT_MS" => {
                    if let Ok(v) = value.parse() {
                        config.sync_bridge_timeout_ms = v;
                    }
                }
                "STDOUT_CHUNK" => {
                    if let Ok(v) = value.parse() {
                        config.stdout_chunk = v;
                    }
                }
                "STDERR_CHUNK" => {
                    if let Ok(v) = value.parse() {
                        config.stderr_chunk = v;
                    }
                }
                "POLL_INTERVAL_MS" => {
                    if let Ok(v) = value.parse() {
                        config.poll_interval_ms = v;
                    }
                }
                _ => {}
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.terminal_cols, 80);
        assert_eq!(config.terminal_rows, 24);
        assert_eq!(config.shared_buffer_size, 64 * 1024);
        assert_eq!(config.sync_bridge_timeout_ms, 30_000);
        assert_eq!(config.stdout_chunk, 8192);
        assert_eq!(config.stderr_chunk, 1024);
        assert_eq!(config.poll_interval_ms, 16);
        assert_eq!(config.cors_proxy, None);
    }

    #[test]
    fn overrides_replace_only_named_keys() {
        let config = Config::from_overrides([("CORS_PROXY", "https://proxy.example"), ("TERMINAL_COLS", "132")]);
        assert_eq!(config.cors_proxy.as_deref(), Some("https://proxy.example"));
        assert_eq!(config.terminal_cols, 132);
        assert_eq!(config.terminal_rows, 24);
    }

    #[test]
    fn malformed_override_keeps_default() {
        let config = Config::from_overrides([("TERMINAL_COLS", "not-a-number")]);
        assert_eq!(config.terminal_cols, 80);
    }
}
