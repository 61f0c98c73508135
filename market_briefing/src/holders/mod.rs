pub mod feed;
pub mod preferences;

pub use feed::{FeedHolder, FeedStatus, RefreshState, RequestToken};
pub use preferences::{AdminConfig, PreferenceDefaults, Preferences, PreferencesHolder};
