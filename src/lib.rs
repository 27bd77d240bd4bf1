//! Clipboard text masking: replaces personal data in copied text with
//! placeholder tokens and strips tracking artifacts from copied links.
//!
//! The two entry points are [`transform`] and [`clean`]. Both are pure; the
//! clipboard watcher that feeds them lives outside this crate.

pub mod anonymizer;
pub mod config;
pub mod link_cleaner;

pub use anonymizer::{transform, Anonymizer, MaskStats, MaskingResult};
pub use config::{CustomPattern, Settings, SettingsStore};
pub use link_cleaner::{clean, DEFAULT_HOP_LIMIT};
