//! Newline-delimited text files, the unit of storage for entity attributes

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Parse non-blank lines from a reader.
pub fn read<R: Read>(r: R) -> std::io::Result<Vec<String>> {
    let mut rv = Vec::new();
    for line in BufReader::new(r).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rv.push(line);
    }
    Ok(rv)
}

/// Parse non-blank lines from a file; a missing file is an empty list.
pub fn read_file(path: &Path) -> std::io::Result<Vec<String>> {
    match std::fs::File::open(path) {
        Ok(f) => read(f),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Write lines atomically (tmp file + rename), one per line, trailing
/// newline included.
pub fn write_file(path: &Path, lines: &[String]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = String::new();
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}
