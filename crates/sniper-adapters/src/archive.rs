//! In-memory DCE archive unpacking.
//!
//! Consultation packages are ZIP bundles. Directories and platform metadata
//! entries are discarded; an archive with zero eligible files is an explicit
//! error, never an empty success.

use std::io::{Cursor, Read};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("response is not a zip archive: {0}")]
    NotAnArchive(String),
    #[error("reading archive entry {name} failed: {source}")]
    Entry {
        name: String,
        source: std::io::Error,
    },
    #[error("archive contains no eligible files")]
    NoEligibleFiles,
}

pub fn unpack(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| ArchiveError::NotAnArchive(err.to_string()))?;

    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|err| ArchiveError::NotAnArchive(err.to_string()))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        if is_platform_metadata(&name) {
            continue;
        }
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|source| ArchiveError::Entry {
                name: name.clone(),
                source,
            })?;
        entries.push(ArchiveEntry { name, bytes });
    }

    if entries.is_empty() {
        return Err(ArchiveError::NoEligibleFiles);
    }
    Ok(entries)
}

/// macOS resource forks and Finder droppings that ship inside most
/// manually-built DCE archives.
fn is_platform_metadata(name: &str) -> bool {
    name.starts_with("__MACOSX")
        || name.ends_with(".DS_Store")
        || name.rsplit('/').next().is_some_and(|f| f == "Thumbs.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])], dirs: &[&str]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for dir in dirs {
            writer.add_directory(*dir, options).expect("add dir");
        }
        for (name, bytes) in entries {
            writer.start_file(*name, options).expect("start file");
            writer.write_all(bytes).expect("write entry");
        }
        writer.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn unpack_keeps_documents_and_drops_metadata() {
        let bytes = build_zip(
            &[
                ("RC.pdf", b"%PDF-rc"),
                ("plans/CCTP.pdf", b"%PDF-cctp"),
                ("__MACOSX/._RC.pdf", b"junk"),
                (".DS_Store", b"junk"),
                ("plans/Thumbs.db", b"junk"),
            ],
            &["plans"],
        );
        let entries = unpack(&bytes).expect("eligible entries");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["RC.pdf", "plans/CCTP.pdf"]);
        assert_eq!(entries[0].bytes, b"%PDF-rc");
    }

    #[test]
    fn archive_with_only_metadata_fails_explicitly() {
        let bytes = build_zip(&[("__MACOSX/._x", b"junk")], &["vide"]);
        assert!(matches!(unpack(&bytes), Err(ArchiveError::NoEligibleFiles)));
    }

    #[test]
    fn html_response_is_not_an_archive() {
        let err = unpack(b"<html>page d'accueil</html>").unwrap_err();
        assert!(matches!(err, ArchiveError::NotAnArchive(_)));
    }
}
