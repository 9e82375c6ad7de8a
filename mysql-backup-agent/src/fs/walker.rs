//! Directory traversal for payload sizing, segment enumeration and clearing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Calculate total size of all regular files below `root`.
pub fn calculate_total_size(root: &Path) -> io::Result<u64> {
    let mut total_size = 0u64;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total_size += entry.metadata().map_err(io::Error::from)?.len();
        }
    }

    Ok(total_size)
}

/// Regular files directly inside `dir`, sorted by file name.
///
/// File names listed in `skip` are left out.
pub fn list_files_sorted(dir: &Path, skip: &[&str]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if skip.iter().any(|s| *s == name) || name.ends_with(".tmp") {
            continue;
        }
        files.push(entry.path());
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Remove everything inside `dir`, keeping `dir` itself. Creates it when missing.
pub fn clear_directory(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_calculate_total_size() -> io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"12345")?; // 5 bytes
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"1234567")?; // 7 bytes

        assert_eq!(calculate_total_size(temp_dir.path())?, 12);
        Ok(())
    }

    #[test]
    fn test_list_files_sorted() -> io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("mysql-bin.000010"), b"c")?;
        fs::write(temp_dir.path().join("mysql-bin.000002"), b"a")?;
        fs::write(temp_dir.path().join("mysql-bin.000009"), b"b")?;
        fs::write(temp_dir.path().join(".backup-meta.json"), b"{}")?;
        fs::create_dir(temp_dir.path().join("nested"))?;

        let files = list_files_sorted(temp_dir.path(), &[".backup-meta.json"])?;
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["mysql-bin.000002", "mysql-bin.000009", "mysql-bin.000010"]);
        Ok(())
    }

    #[test]
    fn test_clear_directory_keeps_root() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let data = temp_dir.path().join("data");
        fs::create_dir_all(data.join("schema"))?;
        fs::write(data.join("ibdata1"), b"x")?;
        fs::write(data.join("schema/t.ibd"), b"y")?;

        assert_eq!(clear_directory(&data)?, 2);
        assert!(data.is_dir());
        assert_eq!(fs::read_dir(&data)?.count(), 0);

        let missing = temp_dir.path().join("missing");
        assert_eq!(clear_directory(&missing)?, 0);
        assert!(missing.is_dir());
        Ok(())
    }
}
