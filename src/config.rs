//! Worker configuration (spec §2, §9 Open Question 2), parsed from the
//! command line the way `rrdpit::options` builds its `Options`.

use clap::Parser;

/// Maximum number of sessions the scheduler will service concurrently
/// (spec §4.5).
pub const DEFAULT_MAX_SESSIONS: usize = 12;
/// Size of the read buffer each session's stream is polled into.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Parser, Clone, Debug)]
#[command(name = "rrdp-worker", about = "RRDP client worker")]
pub struct Config {
    /// Maximum number of sessions serviced concurrently.
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Size, in bytes, of the buffer each session's stream is read into.
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_sessions: DEFAULT_MAX_SESSIONS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_program_name_only() {
        let cfg = Config::parse_from(["rrdp-worker"]);
        assert_eq!(cfg.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(cfg.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }

    #[test]
    fn overrides_are_honored() {
        let cfg = Config::parse_from(["rrdp-worker", "--max-sessions", "4"]);
        assert_eq!(cfg.max_sessions, 4);
    }
}
