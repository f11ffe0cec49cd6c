pub mod client_settings;
pub mod client_settings_json_repository;
pub mod client_settings_repository;
pub mod context_selection;
pub mod error;

pub use client_settings::ClientSettings;
pub use client_settings_json_repository::ClientSettingsJsonRepository;
pub use client_settings_repository::ClientSettingsRepository;
pub use context_selection::ContextSelectionStore;
pub use error::{SettingsError, SettingsResult};
