//! Finds EVE Online client settings across installs and profiles, resolves
//! character ids to names through the public name service, and copies
//! settings files between characters and accounts.

pub mod aggregate;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod copy;
pub mod error;
pub mod esi;
mod fsutil;
pub mod loader;
pub mod logging;
pub mod name_cache;
pub mod notes;
pub mod paths;
pub mod resolver;
pub mod service;

pub use aggregate::{aggregate, FileInstance, ResolvedCharacter, RootCatalog};
pub use catalog::{scan, SettingsFile, SettingsKind};
pub use copy::{CopyEngine, CopyOptions, CopyRequest, CopyResult, SkipReason, TargetOutcome};
pub use error::{BackupError, CopyError, CopyFailure, LoadError, LookupError, NoteError};
pub use loader::{CharacterList, LoadHandle, LoadOutcome, LoadProgress};
pub use name_cache::{InvalidEntry, NameCache, NameCacheEntry};
pub use notes::NoteStore;
pub use paths::{PathDetector, Platform, SettingsRoot};
pub use resolver::{CharacterName, NameLookup, NameResolver, Resolution, ResolutionReport};
pub use service::Podsmith;
