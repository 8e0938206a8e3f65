//! Configuration daemon.
//!
//! Loads a configuration tree with [`confdir`], keeps it live and shuts down
//! cleanly:
//!
//! - file changes in the configuration directories trigger a debounced reload
//! - `SIGHUP` triggers an administrative reload
//! - Ctrl-C stops the daemon and clears all registries
//!
//! ```bash
//! $ confdird --config /etc/confdird.toml
//! $ CONFDIR_PROPDIR=/opt/groupware/etc confdird
//! $ kill -HUP "$(pidof confdird)"
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod daemon;
pub mod error;

pub use daemon::{telemetry_config, Daemon, ReloadTrigger};
pub use error::{DaemonError, DaemonResult};

/// Daemon version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
