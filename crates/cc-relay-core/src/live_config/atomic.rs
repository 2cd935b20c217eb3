use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::AppError;

/// Reads a file, mapping "not found" to `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, AppError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::io(path, e)),
    }
}

/// Writes `bytes` to a temp file next to `path`, fsyncs it and renames it into
/// place. The target is either the old content or the new one, never a mix.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::Config(format!("no parent dir for {}", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| AppError::io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".cc-relay-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| AppError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| AppError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| AppError::io(tmp.path(), e))?;

    // 保留原文件权限（auth.json 通常是 0600）
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())
            .map_err(|e| AppError::io(tmp.path(), e))?;
    }

    tmp.persist(path).map_err(|e| AppError::io(path, e.error))?;
    Ok(())
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<(), AppError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::io(path, e)),
    }
}
