use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use glob::Pattern;
use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::config::defs::{BinaryRegistry, PipelineError, FIND_MAX_DEPTH, GZIP_EXT};
use crate::utils::streams::pipe2;


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    file.read_exact(&mut buffer)?;
    Ok(buffer == [0x1F, 0x8B]) // Gzip magic bytes
}


/// Builds `dir/prefix<delim>stem<delim>suffix` from a base path.
///
/// # Arguments
///
/// * `base` - Path whose file name becomes the stem.
/// * `dir` - Directory to place the result in. Defaults to the parent of `base`.
/// * `prefix` - Optional leading component.
/// * `suffix` - Optional trailing component, e.g. an extension.
/// * `delimiter` - Joins prefix, stem and suffix.
///
/// # Returns
/// PathBuf of the new file name.
pub fn file_path_manipulator(
    base: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let stem = base
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = String::new();
    if let Some(p) = prefix {
        name.push_str(p);
        name.push_str(delimiter);
    }
    name.push_str(&stem);
    if let Some(s) = suffix {
        name.push_str(delimiter);
        name.push_str(s);
    }

    match dir {
        Some(d) => d.join(name),
        None => base.with_file_name(name),
    }
}


/// Checks that a stage produced non-empty output and, if so, marks it complete.
///
/// A missing output is "not complete", not an error. Any other stat
/// failure (permissions, bad path) is returned to the caller.
///
/// # Arguments
///
/// * `test_this_file` - Output the stage was expected to write.
/// * `touch_this_file` - Marker to create on success.
/// * `touch_file` - Whether to create the marker at all.
///
/// # Returns
/// true iff the output is non-empty (and the marker, if requested, now exists).
pub fn try_complete(
    test_this_file: &Path,
    touch_this_file: &Path,
    touch_file: bool,
) -> Result<bool, PipelineError> {
    match fs::metadata(test_this_file) {
        Ok(metadata) if metadata.len() > 0 => {
            if touch_file {
                complete(touch_this_file)
            } else {
                Ok(true)
            }
        }
        Ok(_) => {
            debug!("{} exists but is empty", test_this_file.display());
            Ok(false)
        }
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            debug!("{} does not exist", test_this_file.display());
            Ok(false)
        }
        Err(e) => Err(PipelineError::IOError(format!(
            "Cannot stat {}: {}",
            test_this_file.display(),
            e
        ))),
    }
}


/// Writes a zero-byte completion marker.
pub fn complete(filename: &Path) -> Result<bool, PipelineError> {
    if let Some(parent) = filename.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    File::create(filename)?;
    Ok(filename.is_file())
}


/// Finds entries under `base_dir` whose name matches a glob, like `find -name`.
/// Depth 0 is `base_dir` itself. Symlinks are not followed.
///
/// # Returns
/// Sorted matches; empty when nothing matches or `base_dir` is missing.
pub fn find_files(
    base_dir: &Path,
    name: &str,
    min_depth: usize,
    max_depth: usize,
) -> Result<Vec<PathBuf>, PipelineError> {
    find_entries(base_dir, name, min_depth, max_depth, false)
}

/// [`find_files`] restricted to directories.
pub fn find_dirs(
    base_dir: &Path,
    name: &str,
    min_depth: usize,
    max_depth: usize,
) -> Result<Vec<PathBuf>, PipelineError> {
    find_entries(base_dir, name, min_depth, max_depth, true)
}

fn find_entries(
    base_dir: &Path,
    name: &str,
    min_depth: usize,
    max_depth: usize,
    dirs_only: bool,
) -> Result<Vec<PathBuf>, PipelineError> {
    let pattern = Pattern::new(name)
        .map_err(|e| PipelineError::InvalidConfig(format!("Bad name pattern '{}': {}", name, e)))?;
    let mut found = Vec::new();
    walk(base_dir, 0, &pattern, min_depth, max_depth, dirs_only, &mut found).map_err(|e| {
        PipelineError::IOError(format!("Cannot search {}: {}", base_dir.display(), e))
    })?;
    found.sort();
    Ok(found)
}

fn walk(
    path: &Path,
    depth: usize,
    pattern: &Pattern,
    min_depth: usize,
    max_depth: usize,
    dirs_only: bool,
    found: &mut Vec<PathBuf>,
) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if depth >= min_depth && (!dirs_only || metadata.is_dir()) {
        let entry_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        if pattern.matches(&entry_name) {
            found.push(path.to_path_buf());
        }
    }

    if metadata.is_dir() && depth < max_depth {
        for entry in fs::read_dir(path)? {
            walk(&entry?.path(), depth + 1, pattern, min_depth, max_depth, dirs_only, found)?;
        }
    }
    Ok(())
}


/// Finds entries matching `name` and deletes them. No-op when nothing matches.
pub fn find_and_remove(
    base_dir: &Path,
    name: &str,
    min_depth: usize,
    max_depth: usize,
) -> Result<(), PipelineError> {
    let found = find_files(base_dir, name, min_depth, max_depth)?;
    if !found.is_empty() {
        remove(&found)?;
    }
    Ok(())
}

/// [`find_and_remove`] over the whole tree below `base_dir`.
pub fn find_and_remove_all(base_dir: &Path, name: &str) -> Result<(), PipelineError> {
    find_and_remove(base_dir, name, 0, FIND_MAX_DEPTH)
}


/// Deletes files and directory trees. Paths already gone are skipped.
pub fn remove(paths: &[PathBuf]) -> Result<(), PipelineError> {
    for path in paths {
        let result = match fs::symlink_metadata(path) {
            Ok(m) if m.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PipelineError::IOError(format!(
                    "Cannot remove {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
    Ok(())
}


/// Bundles files into one archive, or gzips each in place.
///
/// # Arguments
///
/// * `bin` - Registry providing tar and gzip.
/// * `output_file` - Archive path, used only when `tarball` is set.
/// * `files` - Inputs; deleted once compressed.
/// * `tarball` - tar+gzip into `output_file` instead of per-file gzip.
///
/// # Returns
/// Whether the archive was written. Inputs are kept when it was not.
pub async fn compress_and_remove(
    bin: &BinaryRegistry,
    output_file: &Path,
    files: &[PathBuf],
    tarball: bool,
) -> Result<bool, PipelineError> {
    if tarball {
        if create_tar_gz(bin, output_file, files).await? {
            remove(files)?;
            Ok(true)
        } else {
            Ok(false)
        }
    } else {
        gzip_files(files)?;
        Ok(true)
    }
}


/// `tar -cf - files | gzip > output_file`.
/// A partial archive from a failed tar is deleted.
pub async fn create_tar_gz(
    bin: &BinaryRegistry,
    output_file: &Path,
    files: &[PathBuf],
) -> Result<bool, PipelineError> {
    if files.is_empty() {
        warn!("Nothing to archive into {}", output_file.display());
        return Ok(false);
    }

    let mut tar_cmd = vec![
        bin.tar.to_string_lossy().into_owned(),
        "-cf".to_string(),
        "-".to_string(),
    ];
    tar_cmd.extend(tar_members(files)?);
    let gzip_cmd = vec![bin.gzip.to_string_lossy().into_owned()];

    let output = match pipe2(tar_cmd, gzip_cmd, Some(output_file), None, true).await {
        Ok(output) => output,
        Err(e) => {
            discard_archive(output_file)?;
            return Err(e);
        }
    };

    let written = output.all_succeeded() && try_complete(output_file, output_file, false)?;
    if !written {
        discard_archive(output_file)?;
    }
    Ok(written)
}

/// `-C <parent> <name>` per file, so members are stored by file name only.
fn tar_members(files: &[PathBuf]) -> Result<Vec<String>, PipelineError> {
    let mut members = Vec::with_capacity(files.len() * 3);
    for file in files {
        let file = std::path::absolute(file)?;
        match (file.parent(), file.file_name()) {
            (Some(parent), Some(name)) => {
                members.push("-C".to_string());
                members.push(parent.to_string_lossy().into_owned());
                members.push(name.to_string_lossy().into_owned());
            }
            _ => members.push(file.to_string_lossy().into_owned()),
        }
    }
    Ok(members)
}

fn discard_archive(output_file: &Path) -> Result<(), PipelineError> {
    if output_file.exists() {
        warn!("Discarding incomplete archive {}", output_file.display());
        fs::remove_file(output_file)?;
    }
    Ok(())
}


/// Gzips each file to `<file>.gz` and removes the original.
/// Directories are skipped.
pub fn gzip_files(files: &[PathBuf]) -> Result<(), PipelineError> {
    for file in files {
        if file.is_dir() {
            warn!("{} is a directory, not compressing", file.display());
            continue;
        }
        let mut gz_name = file.as_os_str().to_owned();
        gz_name.push(format!(".{}", GZIP_EXT));
        let gz_path = PathBuf::from(gz_name);

        let parent = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let tmp = NamedTempFile::new_in(parent)?;
        {
            let mut reader = BufReader::new(File::open(file)?);
            let mut encoder = GzEncoder::new(BufWriter::new(tmp.as_file()), Compression::default());
            io::copy(&mut reader, &mut encoder)?;
            encoder.finish()?.flush()?;
        }
        tmp.persist(&gz_path).map_err(|e| PipelineError::IOError(e.to_string()))?;
        fs::remove_file(file)?;
        debug!("Compressed {} to {}", file.display(), gz_path.display());
    }
    Ok(())
}


/// MD5 hex digest of a file, or None if it does not exist.
pub fn md5sum(file: &Path) -> Result<Option<String>, PipelineError> {
    let handle = match File::open(file) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut context = md5::Context::new();
    io::copy(&mut BufReader::new(handle), &mut context)?;
    Ok(Some(format!("{:x}", context.compute())))
}
