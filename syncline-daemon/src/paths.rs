use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const CONFIG_FILE: &str = "config.yaml";

pub fn syncline_root(home: &Path) -> PathBuf {
    home.join(".syncline")
}

pub fn socket_path(home: &Path) -> PathBuf {
    syncline_root(home).join(DAEMON_SOCKET)
}

pub fn default_config_path(home: &Path) -> PathBuf {
    syncline_root(home).join(CONFIG_FILE)
}
