//! Fehlerdefinitionen für das Mapping-Modul

use crate::input::CapabilityError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a capability map
#[derive(Debug, Error)]
pub enum MapError {
    /// The document could not be read from disk
    #[error("Failed to read capability map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or does not follow the schema
    #[error("Failed to parse capability map: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document declares a different `kind`
    #[error("Unsupported document kind '{0}', expected 'CapabilityMap'")]
    WrongKind(String),

    /// A rule without source events
    #[error("Rule '{rule}' has no source events")]
    EmptyTriggerSet { rule: String },

    /// A source or target event that does not name exactly one capability
    #[error("Rule '{rule}' has an invalid capability: {source}")]
    InvalidCapability {
        rule: String,
        #[source]
        source: CapabilityError,
    },

    /// Two rules with the same set of source events
    #[error("Rule '{rule}' duplicates the source events of rule '{existing}'")]
    DuplicateRule { rule: String, existing: String },

    /// A filtered event that does not name exactly one capability
    #[error("Invalid filtered event: {0}")]
    InvalidFiltered(#[source] CapabilityError),
}
