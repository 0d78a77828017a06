//! Capability-based file access for scenario inputs and snapshot outputs.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8};

/// Open a UTF-8 file path using ambient authority.
pub(crate) fn open_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Return whether `path` exists and is a regular file.
pub(crate) fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "path has no file name"))?;
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.metadata(name).map(|meta| meta.is_file())
}

/// Create every missing directory above `path`.
pub(crate) fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let (base, relative) = split_root(parent)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    base.create_dir_all(relative)
}

/// Open the directory `parent` is anchored at and return the path below it.
fn split_root(parent: &Utf8Path) -> io::Result<(fs_utf8::Dir, &Utf8Path)> {
    let (anchor, relative) = parent
        .strip_prefix("/")
        .map_or((".", parent), |below| ("/", below));
    let base = fs_utf8::Dir::open_ambient_dir(anchor, ambient_authority())?;
    Ok((base, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Utf8PathBuf) {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8 tempdir");
        (tmp, root)
    }

    #[rstest]
    fn creates_missing_parents_under_absolute_paths() {
        let (_tmp, root) = workspace();
        let target = root.join("state").join("nightly").join("scores.bin");
        ensure_parent_dir(&target).expect("parents created");
        assert!(root.join("state").join("nightly").as_std_path().is_dir());
        ensure_parent_dir(&target).expect("existing parents are fine");
    }

    #[rstest]
    #[case("scores.bin")]
    #[case("/")]
    fn paths_without_parents_need_nothing(#[case] path: &str) {
        ensure_parent_dir(Utf8Path::new(path)).expect("nothing to create");
    }

    #[rstest]
    fn file_checks_distinguish_files_from_directories() {
        let (_tmp, root) = workspace();
        let file = root.join("scenario.json");
        std::fs::write(file.as_std_path(), b"{}").expect("write file");
        assert!(file_is_file(&file).expect("file metadata"));
        assert!(!file_is_file(&root).expect("directory metadata"));
        assert!(file_is_file(&root.join("missing.json")).is_err());
    }
}
