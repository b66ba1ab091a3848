//! Module-level diff between two manifests.

use super::Manifest;

/// How a manifest differs from the one loaded before it.
///
/// Every list is sorted by module id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDelta {
    /// Ids present only in the new manifest.
    pub added: Vec<String>,
    /// Ids whose content hash changed.
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Ids present only in the prior manifest.
    pub removed: Vec<String>,
}

impl ManifestDelta {
    pub(super) fn between(prior: &Manifest, next: &Manifest) -> Self {
        let mut delta = Self::default();
        for (id, module) in next.modules() {
            match prior.module(id) {
                None => delta.added.push(id.clone()),
                Some(old) if old.sha256 != module.sha256 => delta.changed.push(id.clone()),
                Some(_) => delta.unchanged.push(id.clone()),
            }
        }
        delta.removed = prior
            .modules()
            .keys()
            .filter(|id| next.module(id).is_none())
            .cloned()
            .collect();
        delta
    }

    /// Whether the new manifest has any module content the prior one lacked.
    pub fn has_new_content(&self) -> bool {
        !self.added.is_empty() || !self.changed.is_empty()
    }
}
