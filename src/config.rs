use std::env;

pub const PROMPT: &str = ": ";
pub const MAX_LINE_LENGTH: usize = 2048;
pub const MAX_ARGUMENTS: usize = 512;
pub const MAX_JOBS: usize = 512;

/// Environment variable holding the `tracing` filter directives.
pub const LOG_ENV: &str = "SMALLSH_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prompt: String,
    /// Limit on a line after `$$` expansion, in bytes.
    pub max_line_length: usize,
    /// Limit on program name plus arguments.
    pub max_arguments: usize,
    /// Limit on tracked background processes.
    pub max_jobs: usize,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prompt: PROMPT.to_owned(),
            max_line_length: MAX_LINE_LENGTH,
            max_arguments: MAX_ARGUMENTS,
            max_jobs: MAX_JOBS,
            log_filter: "off".to_owned(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(filter) = env::var(LOG_ENV) {
            if !filter.trim().is_empty() {
                config.log_filter = filter;
            }
        }
        config
    }
}
