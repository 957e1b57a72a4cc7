//! Importing sidecar YAML files as entity metadata attributes
//!
//! A sidecar is a flat YAML mapping next to a registered file; each
//! top-level scalar becomes one attribute of the entity. Attributes that
//! already carry a value are left alone, so re-importing is safe.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::anyhow;
use tracing::info;

use dedu_core::DeduResult;

use crate::store::{check_attr, EntityStore};

fn value_to_lines(value: &serde_yml::Value) -> Option<Vec<String>> {
    match value {
        serde_yml::Value::String(s) => Some(vec![s.trim().to_string()]),
        serde_yml::Value::Number(n) => Some(vec![n.to_string()]),
        serde_yml::Value::Bool(b) => Some(vec![b.to_string()]),
        _ => None,
    }
}

/// Import every top-level scalar of a YAML sidecar as an attribute of
/// `entity_id`. Attribute names must match the store's attribute grammar;
/// non-scalar values are an error; attributes that already exist are
/// skipped.
pub fn import_metadata_file<S: EntityStore>(
    store: &S,
    entity_id: &str,
    metafile: &Path,
) -> DeduResult<()> {
    let data = std::fs::read_to_string(metafile)
        .map_err(|e| anyhow!("error reading {}: {e}", metafile.display()))?;
    let mapping: BTreeMap<String, serde_yml::Value> = serde_yml::from_str(&data)
        .map_err(|e| anyhow!("error parsing {}: {e}", metafile.display()))?;

    for (attr, value) in &mapping {
        check_attr(attr)?;
        let lines = value_to_lines(value).ok_or_else(|| {
            anyhow!("unable to convert value of {attr:?} in {} to text", metafile.display())
        })?;

        if !store.read_lines(entity_id, attr)?.is_empty() {
            info!(entity = %entity_id, attr = %attr, "attribute already set; skipping");
            continue;
        }
        store.create_or_expect(entity_id, attr, &lines)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests_support::MemStore;

    const ENTITY: &str = "1-aaaaaaaaaaaaaaaaaaaa-bbb-cccccccccccccccccccc";

    fn write_sidecar(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("doc.txt.meta.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn imports_scalar_attributes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let sidecar = write_sidecar(
            tmp.path(),
            "title: A Document \nyear: 2014\narchived: true\n",
        );

        import_metadata_file(&store, ENTITY, &sidecar).unwrap();

        assert_eq!(
            store.read_lines(ENTITY, "title").unwrap(),
            vec!["A Document".to_string()]
        );
        assert_eq!(store.read_lines(ENTITY, "year").unwrap(), vec!["2014".to_string()]);
        assert_eq!(
            store.read_lines(ENTITY, "archived").unwrap(),
            vec!["true".to_string()]
        );
    }

    #[test]
    fn existing_attributes_are_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        store
            .create_or_expect(ENTITY, "title", &["Original Title".to_string()])
            .unwrap();
        let sidecar = write_sidecar(tmp.path(), "title: Replacement Title\n");

        import_metadata_file(&store, ENTITY, &sidecar).unwrap();

        assert_eq!(
            store.read_lines(ENTITY, "title").unwrap(),
            vec!["Original Title".to_string()]
        );
    }

    #[test]
    fn rejects_bad_attribute_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let sidecar = write_sidecar(tmp.path(), "Bad Name: value\n");
        assert!(import_metadata_file(&store, ENTITY, &sidecar).is_err());
    }

    #[test]
    fn rejects_non_scalar_values() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::default();
        let sidecar = write_sidecar(tmp.path(), "tags:\n  - one\n  - two\n");
        assert!(import_metadata_file(&store, ENTITY, &sidecar).is_err());
    }

    #[test]
    fn missing_sidecar_is_an_error() {
        let store = MemStore::default();
        assert!(import_metadata_file(&store, ENTITY, Path::new("/no/such/sidecar")).is_err());
    }
}
