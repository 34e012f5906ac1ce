//! System-wide constants and default paths.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Default base directory for Stasis data when running as root.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/stasis";

/// Returns the data directory, preferring `$HOME/.stasis` and falling
/// back to `/var/lib/stasis`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".stasis");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the default agent socket path.
pub fn default_socket_path() -> PathBuf {
    data_dir().join("stasisd.sock")
}

/// Returns the default checkpoint root for a container under `data_dir`.
#[must_use]
pub fn checkpoint_root(data_dir: &Path, container_id: &str) -> PathBuf {
    data_dir
        .join("containers")
        .join(container_id)
        .join("checkpoints")
}

/// Service namespace prefixed to every method name on the wire.
pub const API_SERVICE: &str = "types.API";

/// Protocol version reported by `GetServerVersion`.
pub const API_VERSION_MAJOR: u32 = 0;
/// Protocol minor version.
pub const API_VERSION_MINOR: u32 = 1;
/// Protocol patch version.
pub const API_VERSION_PATCH: u32 = 0;

/// Name of the metadata file stored inside each checkpoint directory.
pub const CHECKPOINT_CONFIG_FILE: &str = "config.json";

/// Prefix of temporary files that are renamed into place once written.
pub const TEMP_FILE_PREFIX: &str = ".tmp-";

/// Process name that designates a container's init process.
pub const INIT_PROCESS: &str = "init";

/// Highest signal number accepted by `Signal`.
pub const MAX_SIGNAL: i32 = 64;

/// Default per-subscriber event queue capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default number of events retained for `since` replay.
pub const DEFAULT_EVENT_HISTORY: usize = 1024;

/// Default deadline for a single unary call, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Default number of retries for idempotent read calls.
pub const DEFAULT_READ_RETRIES: u32 = 2;

/// Default delay between read retries, in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Environment variable naming the daemon's JSON config file.
pub const CONFIG_ENV: &str = "STASIS_CONFIG";

/// Binary name of the agent daemon.
pub const DAEMON_BIN: &str = "stasisd";
