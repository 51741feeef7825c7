//! Form templates listed in a `forms.toml` manifest.
//!
//! ```toml
//! [[form]]
//! id = 12
//! uuid = "c2b8e4a0-0f6e-4bb4-9a65-6d1f3b7f0c11"
//! name = "Adult Return"
//! xslt = "forms/adult-return.xsl"
//! ```
//!
//! Stylesheet paths are relative to the directory holding the manifest and
//! are read on every lookup; wrap the resolver in
//! [`CachingFormResolver`](formentry_core::CachingFormResolver) to avoid that.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use formentry_core::{FormResolver, StoreError};
use formentry_model::{FormDescriptor, FormId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::io::io_error;

pub const FORMS_MANIFEST: &str = "forms.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormManifest {
    #[serde(default, rename = "form")]
    pub forms: Vec<FormRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRecord {
    pub id: FormId,
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    /// Stylesheet path relative to the manifest directory.
    pub xslt: PathBuf,
}

#[derive(Debug)]
pub struct DirectoryForms {
    root: PathBuf,
    forms: HashMap<FormId, FormRecord>,
}

impl DirectoryForms {
    /// Loads `forms.toml` from `root`. A missing manifest means no forms.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let path = root.join(FORMS_MANIFEST);
        let manifest = match fs::read_to_string(&path) {
            Ok(text) => toml::from_str::<FormManifest>(&text).map_err(|source| {
                StoreError::Serialization {
                    operation: "parse",
                    path: path.clone(),
                    source: Box::new(source),
                }
            })?,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No form manifest, no forms registered");
                FormManifest::default()
            }
            Err(error) => return Err(io_error("read", &path)(error)),
        };

        let mut forms = HashMap::new();
        for record in manifest.forms {
            let id = record.id;
            if forms.insert(id, record).is_some() {
                return Err(StoreError::Corrupt {
                    path,
                    reason: format!("form id {id} is listed more than once"),
                });
            }
        }
        info!(forms = forms.len(), "Loaded form manifest");
        Ok(Self {
            root: root.to_path_buf(),
            forms,
        })
    }

    /// Registered forms ordered by id.
    pub fn records(&self) -> Vec<&FormRecord> {
        let mut records: Vec<_> = self.forms.values().collect();
        records.sort_by_key(|record| record.id);
        records
    }
}

impl FormResolver for DirectoryForms {
    fn by_id(&self, id: FormId) -> Result<Option<FormDescriptor>, StoreError> {
        let Some(record) = self.forms.get(&id) else {
            return Ok(None);
        };
        let path = self.root.join(&record.xslt);
        let xslt = fs::read_to_string(&path).map_err(io_error("read stylesheet", &path))?;
        Ok(Some(
            FormDescriptor::new(id, record.uuid.clone(), xslt).with_name(record.name.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"
[[form]]
id = 12
uuid = "uuid-12"
name = "Adult Return"
xslt = "forms/12.xsl"

[[form]]
id = 3
uuid = "uuid-3"
xslt = "missing.xsl"
"#;

    #[test]
    fn test_resolves_forms_from_manifest() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(FORMS_MANIFEST), MANIFEST).unwrap();
        fs::create_dir(dir.path().join("forms")).unwrap();
        fs::write(dir.path().join("forms/12.xsl"), "<xsl/>").unwrap();

        let forms = DirectoryForms::open(dir.path()).unwrap();
        let form = forms.by_id(FormId::new(12)).unwrap().unwrap();
        assert_eq!(form.form_uuid, "uuid-12");
        assert_eq!(form.name, "Adult Return");
        assert_eq!(form.xslt, "<xsl/>");
        assert!(forms.by_id(FormId::new(99)).unwrap().is_none());
        assert_eq!(
            forms.records().iter().map(|r| r.id.get()).collect::<Vec<_>>(),
            vec![3, 12]
        );
    }

    #[test]
    fn test_missing_stylesheet_is_a_store_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(FORMS_MANIFEST), MANIFEST).unwrap();
        let forms = DirectoryForms::open(dir.path()).unwrap();
        assert!(matches!(
            forms.by_id(FormId::new(3)),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn test_missing_manifest_means_no_forms() {
        let dir = tempdir().unwrap();
        let forms = DirectoryForms::open(dir.path()).unwrap();
        assert!(forms.records().is_empty());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let manifest = "[[form]]\nid = 1\nuuid = \"a\"\nxslt = \"a.xsl\"\n\n[[form]]\nid = 1\nuuid = \"b\"\nxslt = \"b.xsl\"\n";
        fs::write(dir.path().join(FORMS_MANIFEST), manifest).unwrap();
        assert!(matches!(
            DirectoryForms::open(dir.path()),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
