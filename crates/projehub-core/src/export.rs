//! Single-file downloads and whole-project ZIP export.

use std::collections::HashMap;
use std::io::{Cursor, Write};

use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::file::FileRecord;
use crate::project::Project;
use crate::Result;

/// A decoded file ready to hand to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Decode a stored file for download.
///
/// Returns `Ok(None)` when the file has no content (folder entries and files
/// whose read failed at ingestion).
pub fn download(record: &FileRecord) -> Result<Option<Download>> {
    let Some(data) = record.file.decode()? else {
        tracing::warn!(
            file_id = %record.id,
            name = %record.name(),
            "file has no content to download"
        );
        return Ok(None);
    };

    let mime_type = if record.file.mime_type.is_empty() {
        data.mime_type
    } else {
        record.file.mime_type.clone()
    };

    Ok(Some(Download {
        file_name: record.file.base_name().to_string(),
        mime_type,
        bytes: data.bytes,
    }))
}

/// A finished ZIP archive.
#[derive(Debug, Clone)]
pub struct Archive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub entries: usize,
    /// Names of files left out because they had no content.
    pub skipped: Vec<String>,
}

/// Build a ZIP of every project file that has content, keyed by file name.
///
/// Files whose entry names collide share one entry holding the content of the
/// last of them, at the position of the first.
pub fn export_archive(project: &Project) -> Result<Archive> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut skipped = Vec::new();

    for record in &project.files {
        let Some(data) = record.file.decode()? else {
            skipped.push(record.name().to_string());
            continue;
        };

        let entry_name = archive_entry_name(record.name(), &format!("unnamed_{}", record.id));
        match positions.get(&entry_name) {
            Some(&position) => {
                tracing::debug!(entry = %entry_name, "duplicate archive entry, later file wins");
                files[position].1 = data.bytes;
            }
            None => {
                positions.insert(entry_name.clone(), files.len());
                files.push((entry_name, data.bytes));
            }
        }
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (entry_name, bytes) in &files {
        zip.start_file(entry_name.as_str(), options)?;
        zip.write_all(bytes)?;
    }
    let entries = files.len();

    let bytes = zip.finish()?.into_inner();

    tracing::info!(
        project_id = %project.id,
        entries,
        skipped = skipped.len(),
        "exported project archive"
    );

    Ok(Archive {
        file_name: format!("{}.zip", project.name),
        bytes,
        entries,
        skipped,
    })
}

/// Strip absolute prefixes and parent references so entries stay inside the
/// archive root. Relative folder paths are kept.
fn archive_entry_name(name: &str, fallback: &str) -> String {
    let cleaned: Vec<&str> = name
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect();

    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.join("/")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use chrono::Utc;

    use super::*;
    use crate::content::encode_data_uri;
    use crate::file::FileDraft;
    use crate::project::{NewProject, Owner};

    fn record(name: &str, mime: &str, bytes: &[u8]) -> FileRecord {
        FileDraft::file(
            name,
            bytes.len() as u64,
            mime,
            Utc::now(),
            Some(encode_data_uri(mime, bytes)),
        )
        .into_record()
    }

    fn project_with(files: Vec<FileRecord>) -> Project {
        let (mut project, _) = NewProject::new("Demo")
            .into_project(&Owner::Local)
            .unwrap();
        project.files = files;
        project
    }

    #[test]
    fn test_download_decodes_content() {
        let file = record("docs/notes.txt", "text/plain", b"hello");
        let download = download(&file).unwrap().unwrap();

        assert_eq!(download.file_name, "notes.txt");
        assert_eq!(download.mime_type, "text/plain");
        assert_eq!(download.bytes, b"hello");
    }

    #[test]
    fn test_download_without_content() {
        let folder = FileDraft::folder_entry("docs/readme.txt", 4, "text/plain", Utc::now())
            .into_record();
        assert!(download(&folder).unwrap().is_none());

        let failed = FileDraft::file("broken.bin", 4, "", Utc::now(), None).into_record();
        assert!(download(&failed).unwrap().is_none());
    }

    #[test]
    fn test_archive_skips_files_without_content() {
        let project = project_with(vec![
            record("a.txt", "text/plain", b"alpha"),
            FileDraft::folder_entry("docs/readme.txt", 4, "text/plain", Utc::now()).into_record(),
            record("b.bin", "application/octet-stream", &[1, 2, 3]),
        ]);

        let archive = export_archive(&project).unwrap();
        assert_eq!(archive.file_name, "Demo.zip");
        assert_eq!(archive.entries, 2);
        assert_eq!(archive.skipped, vec!["docs/readme.txt"]);

        let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        assert_eq!(zip.len(), 2);

        let mut contents = String::new();
        zip.by_name("a.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "alpha");

        let mut bytes = Vec::new();
        zip.by_name("b.bin").unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_colliding_names_share_one_entry() {
        let project = project_with(vec![
            record("notes.txt", "text/plain", b"first"),
            record("a.txt", "text/plain", b"alpha"),
            record("../notes.txt", "text/plain", b"second"),
            record("notes.txt", "text/plain", b"third"),
        ]);

        let archive = export_archive(&project).unwrap();
        assert_eq!(archive.entries, 2);

        let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        assert_eq!(zip.len(), 2);
        assert_eq!(zip.by_index(0).unwrap().name(), "notes.txt");

        let mut contents = String::new();
        zip.by_name("notes.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "third");
    }

    #[test]
    fn test_empty_project_produces_empty_archive() {
        let archive = export_archive(&project_with(Vec::new())).unwrap();
        assert_eq!(archive.entries, 0);

        let zip = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        assert_eq!(zip.len(), 0);
    }

    #[test]
    fn test_archive_entry_names() {
        assert_eq!(archive_entry_name("a.txt", "x"), "a.txt");
        assert_eq!(archive_entry_name("docs/readme.txt", "x"), "docs/readme.txt");
        assert_eq!(archive_entry_name("/etc/passwd", "x"), "etc/passwd");
        assert_eq!(archive_entry_name("../../evil.sh", "x"), "evil.sh");
        assert_eq!(archive_entry_name("..", "fallback"), "fallback");
    }
}
