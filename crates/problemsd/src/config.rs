use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use libproblems::limits::Limits;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Whether the built-in agent grants authorization requests. A proper
    /// interactive agent would ask the user; the daemon ships a fixed policy.
    #[serde(default)]
    pub grant_authorization: bool,
    #[serde(default = "default_max_open_sessions")]
    pub max_open_sessions: usize,
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
    #[serde(default = "default_max_data_size")]
    pub max_data_size: u64,
    #[serde(default = "default_max_user_problems")]
    pub max_user_problems: usize,
    #[serde(default = "default_max_pending_tasks")]
    pub max_pending_tasks: usize,
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default = "default_rate_burst")]
    pub rate_burst: usize,
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        // Try to load from config file, fall back to defaults
        let config_path = problems_protocol::paths::config_path();
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_open_sessions: self.max_open_sessions,
            max_elements: self.max_elements,
            max_data_size: self.max_data_size,
            max_user_problems: self.max_user_problems,
            max_pending_tasks: self.max_pending_tasks,
            rate_window: Duration::from_secs(self.rate_window_secs),
            rate_burst: self.rate_burst,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: problems_protocol::paths::default_socket_path(),
            grant_authorization: false,
            max_open_sessions: default_max_open_sessions(),
            max_elements: default_max_elements(),
            max_data_size: default_max_data_size(),
            max_user_problems: default_max_user_problems(),
            max_pending_tasks: default_max_pending_tasks(),
            rate_window_secs: default_rate_window_secs(),
            rate_burst: default_rate_burst(),
        }
    }
}

fn default_max_open_sessions() -> usize {
    5
}

fn default_max_elements() -> usize {
    100
}

fn default_max_data_size() -> u64 {
    2 * 1024 * 1024 * 1023
}

fn default_max_user_problems() -> usize {
    1000
}

fn default_max_pending_tasks() -> usize {
    10
}

fn default_rate_window_secs() -> u64 {
    15
}

fn default_rate_burst() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_in_defaults() {
        let config: ServerConfig =
            toml::from_str("socket_path = \"/run/problemsd.sock\"").unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/problemsd.sock"));
        assert!(!config.grant_authorization);
        assert_eq!(config.max_elements, 100);
        assert_eq!(config.rate_burst, 10);
        assert_eq!(config.limits().rate_window, Duration::from_secs(15));
    }

    #[test]
    fn overrides_are_honored() {
        let config: ServerConfig = toml::from_str(
            "socket_path = \"/tmp/p.sock\"\n\
             grant_authorization = true\n\
             max_elements = 7\n\
             max_user_problems = 3\n",
        )
        .unwrap();
        assert!(config.grant_authorization);
        let limits = config.limits();
        assert_eq!(limits.max_elements, 7);
        assert_eq!(limits.max_user_problems, 3);
    }
}
