//! Bundle manifests: the module graph a load works from.
//!
//! A manifest maps module ids to where each module's bytes live and what
//! they hash to. Two wire shapes are accepted:
//!
//! ```text
//! { "modules": { "<id>": { "url": ..., "sha256": ..., ... } } }   // envelope
//! { "<id>": { "url": ..., "sha256": ..., ... } }                  // bare map
//! ```
//!
//! Serialisation always writes the envelope. Parsing validates every
//! reference and computes the load order up front, so a [`Manifest`] value
//! is always loadable.

mod delta;
mod graph;
mod resolver;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Sha256Hash;
use crate::{HotbundleError, Result};

pub use delta::ManifestDelta;
pub use resolver::{ManifestResolver, ResolvedManifest};

/// One module entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Where to fetch the full module body. May be relative to the manifest URL.
    pub url: String,
    pub sha256: Sha256Hash,
    #[serde(default)]
    pub depends_on_ids: Vec<String>,
    /// Id of the module whose previous bytes a patch applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_url: Option<String>,
}

impl Module {
    pub fn new(url: impl Into<String>, sha256: Sha256Hash) -> Self {
        Self {
            url: url.into(),
            sha256,
            depends_on_ids: Vec::new(),
            patch_from: None,
            patch_url: None,
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn patch(mut self, from: impl Into<String>, url: impl Into<String>) -> Self {
        self.patch_from = Some(from.into());
        self.patch_url = Some(url.into());
        self
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    modules: BTreeMap<String, Module>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawManifest {
    Envelope(Envelope),
    Bare(BTreeMap<String, Module>),
}

/// A validated manifest with its load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    modules: BTreeMap<String, Module>,
    order: Vec<String>,
}

impl Manifest {
    /// Validate `modules` and compute the load order.
    pub fn from_modules(modules: BTreeMap<String, Module>) -> Result<Self> {
        validate_references(&modules)?;
        let order = graph::topological_order(&modules)?;
        Ok(Self { modules, order })
    }

    /// Parse a manifest document in either wire shape.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(json)
            .map_err(|e| HotbundleError::ManifestParse(format!("malformed JSON: {e}")))?;
        let modules = match raw {
            RawManifest::Envelope(envelope) => envelope.modules,
            RawManifest::Bare(modules) => modules,
        };
        Self::from_modules(modules)
    }

    /// Serialise in envelope form.
    pub fn to_json(&self) -> Result<String> {
        let envelope = Envelope {
            modules: self.modules.clone(),
        };
        serde_json::to_string_pretty(&envelope)
            .map_err(|e| HotbundleError::ManifestParse(format!("failed to serialise: {e}")))
    }

    pub fn modules(&self) -> &BTreeMap<String, Module> {
        &self.modules
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module ids in dependency order; ties are broken by id.
    pub fn load_order(&self) -> &[String] {
        &self.order
    }

    /// Modules in load order.
    pub fn ordered(&self) -> impl Iterator<Item = (&str, &Module)> {
        self.order
            .iter()
            .filter_map(|id| self.modules.get(id).map(|m| (id.as_str(), m)))
    }

    /// Every module hash in this manifest.
    pub fn hashes(&self) -> impl Iterator<Item = Sha256Hash> + '_ {
        self.modules.values().map(|m| m.sha256)
    }

    /// Compare against a previously loaded manifest.
    pub fn diff(&self, prior: &Manifest) -> ManifestDelta {
        ManifestDelta::between(prior, self)
    }

    /// Resolve relative module and patch URLs against `base`.
    pub(crate) fn with_base_url(mut self, base: &str) -> Result<Self> {
        let base = reqwest::Url::parse(base)
            .map_err(|e| HotbundleError::InvalidInput(format!("invalid manifest URL '{base}': {e}")))?;
        for (id, module) in self.modules.iter_mut() {
            module.url = join_url(&base, id, &module.url)?;
            if let Some(patch_url) = module.patch_url.as_mut() {
                *patch_url = join_url(&base, id, patch_url)?;
            }
        }
        Ok(self)
    }
}

fn join_url(base: &reqwest::Url, id: &str, url: &str) -> Result<String> {
    base.join(url).map(String::from).map_err(|e| {
        HotbundleError::ManifestParse(format!("module '{id}' has invalid url '{url}': {e}"))
    })
}

fn validate_references(modules: &BTreeMap<String, Module>) -> Result<()> {
    for (id, module) in modules {
        if let Some(dep) = module
            .depends_on_ids
            .iter()
            .find(|dep| !modules.contains_key(dep.as_str()))
        {
            return Err(HotbundleError::ManifestParse(format!(
                "module '{id}' depends on unknown module '{dep}'"
            )));
        }
        if let Some(from) = &module.patch_from {
            if !modules.contains_key(from) {
                return Err(HotbundleError::ManifestParse(format!(
                    "module '{id}' patches from unknown module '{from}'"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(s: &str) -> String {
        Sha256Hash::digest(s.as_bytes()).to_hex()
    }

    #[test]
    fn parses_envelope_form() {
        let json = format!(
            r#"{{"modules": {{
                "app": {{"url": "app.js", "sha256": "{}", "dependsOnIds": ["runtime"]}},
                "runtime": {{"url": "runtime.js", "sha256": "{}"}}
            }}}}"#,
            hash_of("app"),
            hash_of("runtime")
        );
        let manifest = Manifest::from_json(&json).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.load_order(), ["runtime", "app"]);
        assert!(manifest.module("runtime").unwrap().depends_on_ids.is_empty());
    }

    #[test]
    fn parses_bare_map_form() {
        let json = format!(
            r#"{{"solo": {{"url": "solo.js", "sha256": "{}", "dependsOnIds": [], "patchFrom": null, "patchUrl": null}}}}"#,
            hash_of("solo")
        );
        let manifest = Manifest::from_json(&json).unwrap();
        assert_eq!(manifest.load_order(), ["solo"]);
        assert_eq!(manifest.module("solo").unwrap().patch_from, None);
    }

    #[test]
    fn modules_key_beside_other_ids_is_rejected() {
        let json = format!(
            r#"{{"modules": {{"core": {{"url": "core.js", "sha256": "{}"}}}},
                "extra": {{"url": "extra.js", "sha256": "{}"}}}}"#,
            hash_of("core"),
            hash_of("extra")
        );
        let err = Manifest::from_json(&json).unwrap_err();
        assert!(matches!(err, HotbundleError::ManifestParse(_)));
    }

    #[test]
    fn bare_map_may_name_a_module_modules() {
        let json = format!(
            r#"{{"modules": {{"url": "modules.js", "sha256": "{}"}},
                "extra": {{"url": "extra.js", "sha256": "{}", "dependsOnIds": ["modules"]}}}}"#,
            hash_of("modules"),
            hash_of("extra")
        );
        let manifest = Manifest::from_json(&json).unwrap();
        assert_eq!(manifest.load_order(), ["modules", "extra"]);
    }

    #[test]
    fn empty_manifest_is_valid() {
        let manifest = Manifest::from_json(r#"{"modules": {}}"#).unwrap();
        assert!(manifest.is_empty());
        assert!(manifest.load_order().is_empty());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let json = format!(
            r#"{{"app": {{"url": "a", "sha256": "{}", "dependsOnIds": ["missing"]}}}}"#,
            hash_of("a")
        );
        let err = Manifest::from_json(&json).unwrap_err();
        assert!(matches!(err, HotbundleError::ManifestParse(ref m) if m.contains("missing")));
    }

    #[test]
    fn rejects_unknown_patch_source() {
        let json = format!(
            r#"{{"app": {{"url": "a", "sha256": "{}", "patchFrom": "ghost", "patchUrl": "p"}}}}"#,
            hash_of("a")
        );
        let err = Manifest::from_json(&json).unwrap_err();
        assert!(matches!(err, HotbundleError::ManifestParse(ref m) if m.contains("ghost")));
    }

    #[test]
    fn rejects_bad_hash() {
        let json = r#"{"app": {"url": "a", "sha256": "not-hex"}}"#;
        let err = Manifest::from_json(json).unwrap_err();
        assert!(matches!(err, HotbundleError::ManifestParse(_)));
    }

    #[test]
    fn rejects_non_object() {
        let err = Manifest::from_json("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, HotbundleError::ManifestParse(_)));
    }

    #[test]
    fn json_roundtrip_writes_envelope() {
        let mut modules = BTreeMap::new();
        modules.insert(
            "app".to_string(),
            Module::new("https://cdn.example/app.js", Sha256Hash::digest(b"app")),
        );
        let manifest = Manifest::from_modules(modules).unwrap();
        let json = manifest.to_json().unwrap();
        let raw: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(raw["modules"]["app"].is_object());
        assert!(raw["modules"]["app"].get("patchFrom").is_none());
        assert_eq!(Manifest::from_json(&json).unwrap(), manifest);
    }

    #[test]
    fn relative_urls_resolve_against_manifest() {
        let mut modules = BTreeMap::new();
        modules.insert(
            "app".to_string(),
            Module::new("app.js", Sha256Hash::digest(b"app")).patch("app", "patches/app.bsdiff"),
        );
        modules.insert(
            "abs".to_string(),
            Module::new("https://other.example/abs.js", Sha256Hash::digest(b"abs")),
        );
        let manifest = Manifest::from_modules(modules)
            .unwrap()
            .with_base_url("https://cdn.example/v2/manifest.json")
            .unwrap();
        let app = manifest.module("app").unwrap();
        assert_eq!(app.url, "https://cdn.example/v2/app.js");
        assert_eq!(
            app.patch_url.as_deref(),
            Some("https://cdn.example/v2/patches/app.bsdiff")
        );
        assert_eq!(
            manifest.module("abs").unwrap().url,
            "https://other.example/abs.js"
        );
    }
}
