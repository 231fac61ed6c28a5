//! JSON-backed persistence for the expediente registry and section documents.
//!
//! Every write replaces the whole document: the model is serialized to a
//! sibling temp file which is then renamed over the target, so a crash never
//! leaves a half-written document behind.
//!
//! # Layout
//!
//! ```text
//! {base_dir}/{project}/{project}_fetch.json
//! {base_dir}/{project}/{SECTION}/{project}_{SECTION}.json
//! {base_dir}/{project}/{SECTION}/files/{NN}/...
//! {base_dir}/{project}/{SECTION}/conv/...
//! ```

mod error;

pub use error::StoreError;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::model::{Registry, SectionDocument};

/// Data-access contract for project documents.
///
/// The pipeline only talks to this seam; [`JsonStore`] is the on-disk
/// implementation.
pub trait ProjectRepository: Send + Sync {
    /// Root directory of a project.
    fn project_root(&self, project_id: &str) -> PathBuf;

    /// Loads the registry, or `None` when detection has not run yet.
    fn load_registry(&self, project_id: &str) -> Result<Option<Registry>, StoreError>;

    /// Replaces the registry.
    fn save_registry(&self, project_id: &str, registry: &Registry) -> Result<(), StoreError>;

    /// Loads a section document, or `None` when the section was never listed.
    fn load_section(
        &self,
        project_id: &str,
        section: &str,
    ) -> Result<Option<SectionDocument>, StoreError>;

    /// Replaces a section document.
    fn save_section(
        &self,
        project_id: &str,
        section: &str,
        document: &SectionDocument,
    ) -> Result<(), StoreError>;

    /// Applies `update` to the registry entry of `section` and saves.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingRegistry`] when the registry file does not exist.
    fn update_expediente(
        &self,
        project_id: &str,
        section: &str,
        update: &mut dyn FnMut(&mut crate::model::Expediente),
    ) -> Result<(), StoreError> {
        let Some(mut registry) = self.load_registry(project_id)? else {
            return Err(StoreError::MissingRegistry {
                path: self.project_root(project_id),
            });
        };
        if let Some(expediente) = registry.get_mut(section) {
            update(expediente);
            self.save_registry(project_id, &registry)?;
        }
        Ok(())
    }
}

/// File-system store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of `{project}_fetch.json`.
    #[must_use]
    pub fn registry_path(&self, project_id: &str) -> PathBuf {
        self.project_root(project_id)
            .join(format!("{project_id}_fetch.json"))
    }

    /// Path of `{SECTION}/{project}_{SECTION}.json`.
    #[must_use]
    pub fn section_path(&self, project_id: &str, section: &str) -> PathBuf {
        self.project_root(project_id)
            .join(section)
            .join(format!("{project_id}_{section}.json"))
    }
}

impl ProjectRepository for JsonStore {
    fn project_root(&self, project_id: &str) -> PathBuf {
        self.base_dir.join(project_id)
    }

    #[instrument(level = "debug", skip(self))]
    fn load_registry(&self, project_id: &str) -> Result<Option<Registry>, StoreError> {
        validate_project_id(project_id)?;
        read_json(&self.registry_path(project_id))
    }

    #[instrument(level = "debug", skip(self, registry), fields(sections = registry.len()))]
    fn save_registry(&self, project_id: &str, registry: &Registry) -> Result<(), StoreError> {
        validate_project_id(project_id)?;
        write_json_atomic(&self.registry_path(project_id), registry)
    }

    #[instrument(level = "debug", skip(self))]
    fn load_section(
        &self,
        project_id: &str,
        section: &str,
    ) -> Result<Option<SectionDocument>, StoreError> {
        validate_project_id(project_id)?;
        validate_section_code(section)?;
        read_json(&self.section_path(project_id, section))
    }

    #[instrument(
        level = "debug",
        skip(self, document),
        fields(documentos = document.documentos.len())
    )]
    fn save_section(
        &self,
        project_id: &str,
        section: &str,
        document: &SectionDocument,
    ) -> Result<(), StoreError> {
        validate_project_id(project_id)?;
        validate_section_code(section)?;
        write_json_atomic(&self.section_path(project_id, section), document)
    }
}

/// Rejects anything but ASCII digits.
///
/// # Errors
///
/// Returns [`StoreError::InvalidProjectId`].
pub fn validate_project_id(project_id: &str) -> Result<(), StoreError> {
    if project_id.is_empty() || !project_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StoreError::InvalidProjectId(project_id.to_string()));
    }
    Ok(())
}

/// Section codes double as directory names, so only `[A-Z0-9_]` is allowed.
///
/// # Errors
///
/// Returns [`StoreError::InvalidSectionCode`].
pub fn validate_section_code(section: &str) -> Result<(), StoreError> {
    let valid = !section.is_empty()
        && section
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSectionCode(section.to_string()))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(StoreError::io(path, error)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let payload = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let write_result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&payload)?;
        file.sync_all()
    })();
    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(&tmp_path, error));
    }
    fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))?;
    debug!(path = %path.display(), bytes = payload.len(), "document written");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Documento, Expediente, ExpedienteStatus};
    use tempfile::TempDir;

    #[test]
    fn test_registry_round_trip_and_layout() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        assert!(store.load_registry("123").unwrap().is_none());

        let mut registry = Registry::new();
        registry.insert("EXEVA".to_string(), Expediente::base("EXEVA", "Evaluación", "123"));
        store.save_registry("123", &registry).unwrap();

        assert!(dir.path().join("123").join("123_fetch.json").exists());
        assert_eq!(store.load_registry("123").unwrap(), Some(registry));
    }

    #[test]
    fn test_section_saved_under_section_folder() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let doc = SectionDocument::from_documents(vec![Documento {
            n: "0001".to_string(),
            formato: "PDF".to_string(),
            ..Documento::default()
        }]);
        store.save_section("123", "EXEVA", &doc).unwrap();

        let path = dir.path().join("123").join("EXEVA").join("123_EXEVA.json");
        assert!(path.exists());
        assert!(!path.with_file_name("123_EXEVA.json.tmp").exists());
        assert_eq!(store.load_section("123", "EXEVA").unwrap(), Some(doc));
    }

    #[test]
    fn test_rejects_traversal_in_identifiers() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        assert!(matches!(
            store.load_registry("../etc"),
            Err(StoreError::InvalidProjectId(_))
        ));
        assert!(matches!(
            store.load_section("123", "../EXEVA"),
            Err(StoreError::InvalidSectionCode(_))
        ));
    }

    #[test]
    fn test_malformed_json_is_reported_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let path = store.registry_path("123");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(store.load_registry("123"), Err(StoreError::Json { .. })));
        assert_eq!(fs::read(&path).unwrap(), b"{ not json");
    }

    #[test]
    fn test_update_expediente_requires_registry() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let result = store.update_expediente("123", "EXEVA", &mut |e| {
            e.advance_status(ExpedienteStatus::Edicion);
        });
        assert!(matches!(result, Err(StoreError::MissingRegistry { .. })));

        let mut registry = Registry::new();
        registry.insert("EXEVA".to_string(), Expediente::base("EXEVA", "Evaluación", "123"));
        store.save_registry("123", &registry).unwrap();
        store
            .update_expediente("123", "EXEVA", &mut |e| {
                e.advance_status(ExpedienteStatus::Edicion);
            })
            .unwrap();
        let reloaded = store.load_registry("123").unwrap().unwrap();
        assert_eq!(reloaded["EXEVA"].status, ExpedienteStatus::Edicion);
    }
}
