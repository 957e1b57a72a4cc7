//! The entity-store contract and its qmfs directory backend

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::anyhow;
use regex::Regex;

use dedu_core::{DeduError, DeduResult};

use crate::lines;

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("attr regex"));

/// An external attribute database of entities keyed by deduhash.
///
/// The protocol layer assumes nothing about the backing shape beyond this
/// contract; the canonical backend is a qmfs directory tree.
pub trait EntityStore {
    /// Entity ids matching an `attr=value` predicate.
    fn query(&self, querystring: &str) -> DeduResult<Vec<String>>;

    /// Lines of an entity's attribute; an absent attribute is empty.
    fn read_lines(&self, entity_id: &str, attr: &str) -> DeduResult<Vec<String>>;

    /// Create the attribute with exactly `expected` lines, or verify that
    /// its current contents equal them. Disagreement is `Conflict`.
    fn create_or_expect(&self, entity_id: &str, attr: &str, expected: &[String]) -> DeduResult<()>;

    /// Append the lines not already present, creating the attribute if
    /// needed.
    fn add_lines(&self, entity_id: &str, attr: &str, new: &[String]) -> DeduResult<()>;

    /// Drop the given lines; removing from an absent attribute is a no-op.
    fn remove_lines(&self, entity_id: &str, attr: &str, gone: &[String]) -> DeduResult<()>;
}

pub(crate) fn check_attr(attr: &str) -> DeduResult<()> {
    if !ATTR_RE.is_match(attr) {
        return Err(anyhow!("unacceptable attribute name: {attr:?}").into());
    }
    Ok(())
}

/// Directory-backed entity store rooted at a qmfs mount.
///
/// Layout: `entities/link/<id>/<attr>` are newline-delimited text files;
/// `query/<attr>=<value>/list` enumerates matching entity directories (the
/// index is maintained by the qmfs service, not by this client).
#[derive(Debug)]
pub struct QmfsStore {
    root: PathBuf,
}

impl QmfsStore {
    /// Open a qmfs root, refusing roots that are not served (no
    /// `service/pid`).
    pub fn open(root: &Path) -> DeduResult<Self> {
        let pidfile = root.join("service/pid");
        match std::fs::read(&pidfile) {
            Ok(_) => Ok(Self {
                root: root.to_path_buf(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DeduError::NotFound(
                format!("invalid qmfs root {:?}: {:?} does not exist", root, pidfile),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub fn entity_path(&self, entity_id: &str) -> PathBuf {
        self.root.join("entities/link").join(entity_id)
    }

    fn attr_path(&self, entity_id: &str, attr: &str) -> PathBuf {
        self.entity_path(entity_id).join(attr)
    }
}

impl EntityStore for QmfsStore {
    fn query(&self, querystring: &str) -> DeduResult<Vec<String>> {
        if querystring.contains('/') {
            return Err(anyhow!("invalid query {querystring:?}: contains /").into());
        }
        if querystring.starts_with('.') {
            return Err(anyhow!("invalid query {querystring:?}: begins with .").into());
        }

        let list = self.root.join("query").join(querystring).join("list");
        let entries = lines::read_file(&list)?;
        // Entries may be full paths; ids are the directory basenames.
        Ok(entries
            .iter()
            .filter_map(|e| {
                Path::new(e)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .collect())
    }

    fn read_lines(&self, entity_id: &str, attr: &str) -> DeduResult<Vec<String>> {
        check_attr(attr)?;
        Ok(lines::read_file(&self.attr_path(entity_id, attr))?)
    }

    fn create_or_expect(&self, entity_id: &str, attr: &str, expected: &[String]) -> DeduResult<()> {
        check_attr(attr)?;
        let path = self.attr_path(entity_id, attr);
        if path.exists() {
            let current = lines::read_file(&path)?;
            if current != expected {
                return Err(DeduError::Conflict {
                    entity: entity_id.to_string(),
                    attr: attr.to_string(),
                });
            }
            return Ok(());
        }
        Ok(lines::write_file(&path, expected)?)
    }

    fn add_lines(&self, entity_id: &str, attr: &str, new: &[String]) -> DeduResult<()> {
        check_attr(attr)?;
        let path = self.attr_path(entity_id, attr);
        let mut current = lines::read_file(&path)?;
        let mut changed = false;
        for line in new {
            if !current.contains(line) {
                current.push(line.clone());
                changed = true;
            }
        }
        if changed {
            lines::write_file(&path, &current)?;
        }
        Ok(())
    }

    fn remove_lines(&self, entity_id: &str, attr: &str, gone: &[String]) -> DeduResult<()> {
        check_attr(attr)?;
        let path = self.attr_path(entity_id, attr);
        if !path.exists() {
            return Ok(());
        }
        let current = lines::read_file(&path)?;
        let kept: Vec<String> = current
            .iter()
            .filter(|l| !gone.contains(l))
            .cloned()
            .collect();
        if kept.len() != current.len() {
            lines::write_file(&path, &kept)?;
        }
        Ok(())
    }
}
