//! Package sets requested for an interpreter session.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Packages to make available before user code runs.
///
/// `platform_provided` packages ship with the interpreter distribution and are
/// loaded in one batch; `externally_fetched` packages are installed from a
/// package index. Both lists are ordered, duplicate-free and disjoint: a name
/// present in both is kept only in `platform_provided`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageSet {
    platform_provided: IndexSet<String>,
    externally_fetched: IndexSet<String>,
}

#[derive(Deserialize)]
struct RawPackageSet {
    #[serde(default)]
    platform_provided: Vec<String>,
    #[serde(default)]
    externally_fetched: Vec<String>,
}

impl<'de> Deserialize<'de> for PackageSet {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = RawPackageSet::deserialize(d)?;
        Ok(Self::new(raw.platform_provided, raw.externally_fetched))
    }
}

impl PackageSet {
    /// Build a package set, normalizing both lists.
    pub fn new<P, E>(platform_provided: P, externally_fetched: E) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        let mut set = Self::default();
        set.extend_platform(platform_provided);
        set.extend_external(externally_fetched);
        set
    }

    /// An empty package set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add platform-provided packages, keeping first-seen order.
    ///
    /// A name moved here from the externally-fetched list loses its place
    /// there.
    pub fn extend_platform<I>(&mut self, names: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for name in names {
            let name = name.into();
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            self.externally_fetched.shift_remove(name);
            self.platform_provided.insert(name.to_owned());
        }
    }

    /// Add externally-fetched packages, skipping names already platform-provided.
    pub fn extend_external<I>(&mut self, names: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for name in names {
            let name = name.into();
            let name = name.trim();
            if name.is_empty() || self.platform_provided.contains(name) {
                continue;
            }
            self.externally_fetched.insert(name.to_owned());
        }
    }

    /// Merge process-wide defaults with a per-runner override set.
    ///
    /// Defaults come first; overrides append names not yet seen.
    #[must_use]
    pub fn merge(defaults: &Self, overrides: &Self) -> Self {
        let mut merged = defaults.clone();
        merged.extend_platform(overrides.platform_provided.iter().cloned());
        merged.extend_external(overrides.externally_fetched.iter().cloned());
        merged
    }

    /// Platform-provided packages in load order.
    pub fn platform_provided(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.platform_provided.iter().map(String::as_str)
    }

    /// Externally-fetched packages in install order.
    pub fn externally_fetched(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.externally_fetched.iter().map(String::as_str)
    }

    /// Platform-provided packages as an owned list.
    #[must_use]
    pub fn platform_list(&self) -> Vec<String> {
        self.platform_provided.iter().cloned().collect()
    }

    /// Externally-fetched packages as an owned list.
    #[must_use]
    pub fn external_list(&self) -> Vec<String> {
        self.externally_fetched.iter().cloned().collect()
    }

    /// Whether both lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.platform_provided.is_empty() && self.externally_fetched.is_empty()
    }
}
