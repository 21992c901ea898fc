//! Archive helpers shared by the pack extractor and the Java runtime manager.
//! All of them are synchronous; call them from `spawn_blocking`.

use crate::error::{Result, SetupError};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

/// Join an untrusted relative path onto `root`, refusing anything that would
/// land outside it. Purely lexical: `..` may only cancel components the path
/// itself introduced.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let normalized = relative.replace('\\', "/");
    let mut clean = PathBuf::new();
    let mut depth = 0usize;

    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                clean.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(SetupError::PathTraversal(relative.to_string()));
                }
                clean.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SetupError::PathTraversal(relative.to_string()));
            }
        }
    }

    // A bare drive letter like "C:" parses as a Normal component on unix.
    if depth == 0 || normalized.contains(':') {
        return Err(SetupError::PathTraversal(relative.to_string()));
    }

    Ok(root.join(clean))
}

/// Extract every entry below `folder/` in the archive onto `destination`,
/// overwriting existing files. Returns the written paths relative to `destination`.
pub fn extract_folder_to_root<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    folder_name: &str,
    destination: &Path,
) -> Result<Vec<PathBuf>> {
    let folder_prefix = format!("{}/", folder_name.trim_end_matches('/'));
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().replace('\\', "/");

        let Some(relative) = name.strip_prefix(&folder_prefix) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }

        let target_path = safe_join(destination, relative)?;
        if file.is_dir() {
            std::fs::create_dir_all(&target_path)?;
            continue;
        }

        if let Some(parent) = target_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&target_path)?;
        std::io::copy(&mut file, &mut outfile)?;
        extracted.push(PathBuf::from(relative));
    }

    Ok(extracted)
}

/// Extract a whole zip archive to a directory
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    log::debug!("Extracting zip {:?} to: {:?}", archive_path, dest_dir);
    std::fs::create_dir_all(dest_dir)?;

    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let outpath = safe_join(dest_dir, file.name())?;

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(p) = outpath.parent() {
                std::fs::create_dir_all(p)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)?;
        }

        // Set permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    log::debug!("Zip extraction complete");
    Ok(())
}

/// Extract a `.tar.gz` archive to a directory
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    log::debug!("Extracting tar.gz {:?} to: {:?}", archive_path, dest_dir);
    std::fs::create_dir_all(dest_dir)?;

    let decoder = flate2::read::GzDecoder::new(File::open(archive_path)?);
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.to_string_lossy().to_string();
        safe_join(dest_dir, &entry_path)?;

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let target = entry
                .link_name()?
                .map(|t| t.to_string_lossy().to_string())
                .unwrap_or_default();
            // Symlinks resolve from their own folder, hard links from the archive root
            let resolved = match Path::new(&entry_path).parent() {
                Some(parent) if kind.is_symlink() => format!("{}/{}", parent.display(), target),
                _ => target.clone(),
            };
            if safe_join(dest_dir, &resolved).is_err() {
                log::warn!("Skipping link {} -> {} outside the archive", entry_path, target);
                continue;
            }
        }

        if !entry.unpack_in(dest_dir)? {
            log::warn!("Skipping entry {} outside the archive", entry_path);
        }
    }

    Ok(())
}

/// Read a single named entry from a zip into memory.
pub fn read_entry(archive_path: &Path, entry_name: &str) -> Result<Option<Vec<u8>>> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    let result = match archive.by_name(entry_name) {
        Ok(mut entry) => {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            Some(buf)
        }
        Err(zip::result::ZipError::FileNotFound) => None,
        Err(e) => return Err(e.into()),
    };
    Ok(result)
}
