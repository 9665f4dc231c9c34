use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: IpAddr,
    /// Holds `auth.json` and the `transfers/` checkpoint directory.
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env::var("TERMWEB_PORT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.port),
            bind: env::var("TERMWEB_BIND")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.bind),
            data_dir: env::var("TERMWEB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }

    pub fn transfer_state_dir(&self) -> PathBuf {
        self.data_dir.join("transfers")
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".termweb"))
            .unwrap_or_else(|| PathBuf::from(".termweb"));
        Self {
            port: 8080,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            data_dir,
        }
    }
}
