//! Core identifiers for experiment groups and variants
//!
//! A counter record is addressed by `(datafile path, feature key, variant
//! value)`. These types own the storage-key codec so the rest of the crate
//! never concatenates key strings by hand.

use serde::{Deserialize, Serialize};

use crate::constants::store::STATS_PREFIX;

/// One experiment group: all variants of one feature within one datafile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub datafile: String,
    pub feature: String,
}

impl GroupKey {
    #[must_use]
    pub fn new(datafile: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            datafile: datafile.into(),
            feature: feature.into(),
        }
    }

    /// Storage-key prefix matching every variant of this group
    #[must_use]
    pub fn storage_prefix(&self) -> String {
        format!("{}{}:{}:", STATS_PREFIX, self.datafile, self.feature)
    }

    /// Address a variant within this group
    #[must_use]
    pub fn variant(&self, value: impl Into<String>) -> VariantKey {
        VariantKey {
            datafile: self.datafile.clone(),
            feature: self.feature.clone(),
            variant: value.into(),
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.datafile, self.feature)
    }
}

/// Address of one variant's counter record
///
/// Datafile paths may contain `/` and `.`; feature keys and variant values
/// must not contain `:`, so the storage key is parsed from the right.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    pub datafile: String,
    pub feature: String,
    pub variant: String,
}

impl VariantKey {
    #[must_use]
    pub fn new(
        datafile: impl Into<String>,
        feature: impl Into<String>,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            datafile: datafile.into(),
            feature: feature.into(),
            variant: variant.into(),
        }
    }

    /// The durable-store key for this variant's counter record
    ///
    /// Layout `stats:{datafile}:{feature}:{variant}` is a compatibility
    /// contract with operators inspecting the store.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}:{}:{}",
            STATS_PREFIX, self.datafile, self.feature, self.variant
        )
    }

    /// Parse a storage key back into its parts
    ///
    /// Returns `None` for keys outside the `stats:` namespace or with too
    /// few segments. The datafile path absorbs any embedded colons because
    /// feature and variant are split off from the right.
    #[must_use]
    pub fn parse_storage_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(STATS_PREFIX)?;
        let mut parts = rest.rsplitn(3, ':');
        let variant = parts.next()?;
        let feature = parts.next()?;
        let datafile = parts.next()?;
        if datafile.is_empty() || feature.is_empty() || variant.is_empty() {
            return None;
        }
        Some(Self::new(datafile, feature, variant))
    }

    /// The group this variant belongs to
    #[must_use]
    pub fn group(&self) -> GroupKey {
        GroupKey::new(self.datafile.clone(), self.feature.clone())
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.datafile, self.feature, self.variant)
    }
}
