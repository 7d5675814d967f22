//! Reference images and their matching parameters.
//!
//! Templates live in a directory as `<id>.png` (or `.jpg`/`.jpeg`) with an
//! optional sidecar `<id>.json`:
//!
//! ```json
//! { "threshold": 0.9, "region": { "x": 0, "y": 0, "width": 800, "height": 120 } }
//! ```
//!
//! Ids may contain `/` to address subdirectories (`chrome/new_tab`). They are
//! loaded lazily on first use and cached for the lifetime of the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::Region;

pub const DEFAULT_THRESHOLD: f64 = 0.8;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// A loaded reference image. Immutable once built.
#[derive(Debug, Clone)]
pub struct Template {
    id: String,
    image: GrayImage,
    threshold: f64,
    region: Option<Region>,
}

impl Template {
    pub fn new(id: impl Into<String>, image: GrayImage) -> Self {
        Self {
            id: id.into(),
            image,
            threshold: DEFAULT_THRESHOLD,
            region: None,
        }
    }

    /// Override the confidence threshold. Must lie in `(0, 1]`.
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        if !valid_threshold(threshold) {
            return Err(Error::template_not_found(
                &self.id,
                format!("threshold {threshold} is outside (0, 1]"),
            ));
        }
        self.threshold = threshold;
        Ok(self)
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }
}

fn valid_threshold(threshold: f64) -> bool {
    threshold > 0.0 && threshold <= 1.0
}

/// Sidecar metadata stored next to a template image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
}

/// Reject ids that could escape the templates directory.
///
/// Valid ids are non-empty, relative, free of `..` segments and made of
/// ASCII alphanumerics plus `_`, `-`, `.` and `/`.
pub fn validate_id(id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        Some("id is empty")
    } else if id.starts_with('/') || id.ends_with('/') {
        Some("id must be a relative path")
    } else if id.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        Some("id contains an empty, '.' or '..' segment")
    } else if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    {
        Some("id may only contain letters, digits, '_', '-', '.' and '/'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::template_not_found(id, reason)),
        None => Ok(()),
    }
}

/// Lazily loading, shareable template cache.
///
/// Wrap in an `Arc` to share across concurrent runs; lookups take a read lock
/// and only the first load of an id takes the write lock.
#[derive(Debug)]
pub struct TemplateStore {
    root: Option<PathBuf>,
    cache: RwLock<HashMap<String, Arc<Template>>>,
}

impl TemplateStore {
    /// A store backed by a directory of template images.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// A store with no directory; only [`TemplateStore::insert`]ed templates resolve.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Register a template directly, replacing any cached one with the same id.
    pub fn insert(&self, template: Template) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(template.id.clone(), Arc::new(template));
    }

    pub fn is_cached(&self, id: &str) -> bool {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.contains_key(id)
    }

    /// Get a template by id, loading it from disk on first use.
    pub fn load(&self, id: &str) -> Result<Arc<Template>> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(template) = cache.get(id) {
                return Ok(Arc::clone(template));
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another run may have loaded it while we waited for the lock.
        if let Some(template) = cache.get(id) {
            return Ok(Arc::clone(template));
        }

        let template = Arc::new(self.read_from_disk(id)?);
        tracing::debug!(
            id,
            width = template.image.width(),
            height = template.image.height(),
            threshold = template.threshold,
            "template loaded"
        );
        cache.insert(id.to_string(), Arc::clone(&template));
        Ok(template)
    }

    fn read_from_disk(&self, id: &str) -> Result<Template> {
        validate_id(id)?;
        let Some(root) = &self.root else {
            return Err(Error::template_not_found(id, "no templates directory configured"));
        };

        let image_path = IMAGE_EXTENSIONS
            .iter()
            .map(|ext| root.join(format!("{id}.{ext}")))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                Error::template_not_found(
                    id,
                    format!("no {id}.png, .jpg or .jpeg in {}", root.display()),
                )
            })?;

        let image = image::open(&image_path)
            .map_err(|e| {
                Error::template_not_found(id, format!("cannot decode {}: {e}", image_path.display()))
            })?
            .to_luma8();
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::template_not_found(id, "image is empty"));
        }

        let meta = read_meta(id, &root.join(format!("{id}.json")))?;
        if let Some(declared) = &meta.id {
            if declared != id {
                return Err(Error::template_not_found(
                    id,
                    format!("metadata declares id '{declared}'"),
                ));
            }
        }

        let mut template = Template::new(id, image);
        if let Some(threshold) = meta.threshold {
            template = template.with_threshold(threshold)?;
        }
        if let Some(region) = meta.region {
            template = template.with_region(region);
        }
        Ok(template)
    }
}

fn read_meta(id: &str, path: &Path) -> Result<TemplateMeta> {
    if !path.is_file() {
        return Ok(TemplateMeta::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::template_not_found(id, format!("cannot read metadata: {e}")))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::template_not_found(id, format!("invalid metadata: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn sample_image() -> GrayImage {
        GrayImage::from_fn(8, 6, |x, y| Luma([(x * 30 + y * 5) as u8]))
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("login_button").is_ok());
        assert!(validate_id("chrome/new-tab.v2").is_ok());
        for bad in ["", "/etc/passwd", "../secret", "a/../b", "a//b", "dir/", "sp ace", "a\\b"] {
            assert!(validate_id(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_threshold_must_be_in_unit_interval() {
        assert!(Template::new("t", sample_image()).with_threshold(1.0).is_ok());
        assert!(Template::new("t", sample_image()).with_threshold(0.0).is_err());
        assert!(Template::new("t", sample_image()).with_threshold(1.2).is_err());
        assert!(Template::new("t", sample_image()).with_threshold(f64::NAN).is_err());
        assert_eq!(Template::new("t", sample_image()).threshold(), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_load_from_directory_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        sample_image().save(dir.path().join("ok.png")).unwrap();
        std::fs::write(
            dir.path().join("ok.json"),
            r#"{"threshold":0.95,"region":{"x":0,"y":0,"width":50,"height":40}}"#,
        )
        .unwrap();

        let store = TemplateStore::new(dir.path());
        assert!(!store.is_cached("ok"));
        let template = store.load("ok").unwrap();
        assert_eq!(template.id(), "ok");
        assert_eq!(template.image().dimensions(), (8, 6));
        assert_eq!(template.threshold(), 0.95);
        assert_eq!(template.region(), Some(Region::new(0, 0, 50, 40)));
        assert!(store.is_cached("ok"));
    }

    #[test]
    fn test_load_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        sample_image().save(dir.path().join("ok.png")).unwrap();
        let store = TemplateStore::new(dir.path());

        let first = store.load("ok").unwrap();
        std::fs::remove_file(dir.path().join("ok.png")).unwrap();
        let second = store.load("ok").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound { ref id, .. } if id == "nope"));
    }

    #[test]
    fn test_corrupt_image() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.png"), b"not a png").unwrap();
        let store = TemplateStore::new(dir.path());
        let err = store.load("bad").unwrap_err();
        assert!(err.to_string().contains("cannot decode"));
    }

    #[test]
    fn test_invalid_metadata() {
        let dir = tempfile::tempdir().unwrap();
        sample_image().save(dir.path().join("ok.png")).unwrap();
        std::fs::write(dir.path().join("ok.json"), r#"{"threshold":2.0}"#).unwrap();
        let store = TemplateStore::new(dir.path());
        assert!(store.load("ok").is_err());

        std::fs::write(dir.path().join("ok.json"), r#"{"id":"other"}"#).unwrap();
        let err = store.load("ok").unwrap_err();
        assert!(err.to_string().contains("declares id 'other'"));
    }

    #[test]
    fn test_in_memory_store() {
        let store = TemplateStore::in_memory();
        assert!(store.load("x").is_err());
        store.insert(Template::new("x", sample_image()));
        assert_eq!(store.load("x").unwrap().id(), "x");
    }
}
