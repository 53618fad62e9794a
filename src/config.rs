use std::env;

use tracing::warn;

pub const ENV_REAP: &str = "FORKSH_REAP";
pub const ENV_REDIRECT_MODE: &str = "FORKSH_REDIRECT_MODE";
pub const ENV_PROMPT: &str = "FORKSH_PROMPT";
pub const ENV_LOG: &str = "FORKSH_LOG";

/// How terminated background children are reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReapMode {
    /// Tracked pids are swept with non-blocking waits between commands.
    #[default]
    Poll,
    /// SIGCHLD is ignored and the kernel discards children as they exit.
    /// Foreground exit statuses may then be unavailable.
    Kernel,
}

impl ReapMode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => Some(ReapMode::Poll),
            "kernel" => Some(ReapMode::Kernel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub reap: ReapMode,
    /// Permission bits for redirect targets, before the umask.
    pub redirect_mode: u32,
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Config { reap: ReapMode::Poll, redirect_mode: 0o777, prompt: "$ ".to_string() }
    }
}

impl Config {
    /// Defaults overridden by `FORKSH_*` variables. Bad values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Config::default();
        if let Some(v) = lookup(ENV_REAP) {
            match ReapMode::parse(&v) {
                Some(mode) => cfg.reap = mode,
                None => warn!(value = %v, "ignoring {ENV_REAP}: expected poll or kernel"),
            }
        }
        if let Some(v) = lookup(ENV_REDIRECT_MODE) {
            match u32::from_str_radix(v.trim().trim_start_matches("0o"), 8) {
                Ok(mode) if mode <= 0o7777 => cfg.redirect_mode = mode,
                _ => warn!(value = %v, "ignoring {ENV_REDIRECT_MODE}: expected octal permission bits"),
            }
        }
        if let Some(v) = lookup(ENV_PROMPT) {
            cfg.prompt = v;
        }
        cfg
    }
}
