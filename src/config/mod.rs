//! Bot configuration model and its supporting machinery.
//!
//! Two kinds of configuration live here:
//! - **Bot configuration** ([`BotConfig`]): the versioned snapshot the service
//!   manages, loaded from the data directory by [`SnapshotLoader`].
//! - **Service settings** ([`ServiceSettings`]): how the service itself runs,
//!   merged field-by-field from tiers by [`SettingsLoader`]:
//!   1. **Defaults** - built in
//!   2. **Project** - `$CWD/config-sentinel/settings.yaml`
//!   3. **User** - `~/.config-sentinel/settings.yaml`
//!   4. **Environment** - `SENTINEL_*` variables
//!
//! ## Environment Variables
//! - `SENTINEL_SETTINGS_PATH` - Explicit settings file (overrides tiers)
//! - `SENTINEL_DATA_DIR` - Data directory
//! - `SENTINEL_DEPLOYMENT` - `production`, `staging` or `development`
//! - `SENTINEL_POLL_INTERVAL_SECS` - Health poll interval
//! - `SENTINEL_WATCH` - Enable or disable file watching
//! - `BOT_*` - Bot configuration overrides, see [`SnapshotLoader`]

mod diff;
mod loader;
mod merge;
mod path;
mod settings;
mod source;
mod types;
pub mod validator;
pub mod watcher;

pub use diff::{BOOKKEEPING_KEYS, ChangeKind, ConfigDiff, PathDiff, diff_configs, diff_values};
pub use loader::{ConfigTier, SETTINGS_FILE, SettingsLoader, SettingsPaths, parse_bool};
pub use merge::{deep_merge, deep_merge_all, partial_at, set_at_path};
pub use path::ConfigPath;
pub use settings::*;
pub use source::{Candidate, CandidateSource, SnapshotLoader};
pub use types::*;
pub use validator::{ValidationReport, validate, validate_config, validate_into};
