//! File system access for scripts.
//!
//! Every operation that touches the disk runs on the background pool and
//! settles a promise. Relative paths resolve against the process working
//! directory. The string helpers at the bottom never touch the disk and
//! answer synchronously.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::pending::{reject, resolve_value, Resolution};
use super::ScriptHost;
use crate::engine::{PromiseKey, ScriptEngine, ScriptValue};
use crate::error::ScriptError;

/// Platform path separator
pub const SEPARATOR: &str = std::path::MAIN_SEPARATOR_STR;

const CONTENT_REQUIRED: &str = "Error: String, Array or ArrayBufferView argument is required.";

impl<E: ScriptEngine + 'static> ScriptHost<E> {
    /// Run `work` on the pool; `Ok` fulfills, `Err` rejects with its message
    fn post_file_work<F>(&mut self, work: F) -> PromiseKey
    where
        F: FnOnce() -> std::result::Result<ScriptValue, String> + Send + 'static,
    {
        self.post_to_background_and_resolve(move || match work() {
            Ok(value) => resolve_value(value),
            Err(message) => reject(message),
        })
    }

    /// Read a file as text. Invalid UTF-8 is replaced, not rejected.
    pub fn read_text(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || {
            let bytes = read_bytes(&path)?;
            Ok(ScriptValue::String(String::from_utf8_lossy(&bytes).into_owned()))
        })
    }

    /// Read and parse a JSON file.
    ///
    /// Parsing happens on the script thread; a parse failure rejects with a
    /// `SyntaxError`.
    pub fn read_json(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_to_background_and_resolve(move || {
            let text = match read_bytes(&path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(message) => return reject(message),
            };
            let parse: Resolution<E> = Box::new(move |host: &mut ScriptHost<E>, promise: PromiseKey| {
                let value: ScriptValue = serde_json::from_str(&text)
                    .map_err(|e| ScriptError::new(format!("SyntaxError: {}", e)))?;
                host.engine_mut().resolve_promise(promise, value);
                Ok(())
            });
            parse
        })
    }

    /// Read a file as raw bytes, resolved as an array of byte values
    pub fn read_array_buffer(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || {
            let bytes = read_bytes(&path)?;
            Ok(ScriptValue::Array(bytes.into_iter().map(ScriptValue::from).collect()))
        })
    }

    /// Replace the contents of `path`.
    ///
    /// `content` is either a string or an array of byte values. Anything
    /// else throws before any work is scheduled.
    pub fn write_file(&mut self, path: &str, content: &ScriptValue) -> Result<PromiseKey, ScriptError> {
        let bytes = content_bytes(content)?;
        let path = PathBuf::from(path);
        Ok(self.post_file_work(move || {
            fs::write(&path, &bytes)
                .map_err(|e| format!("Failed to open {} for writing: {}", path.display(), e))?;
            Ok(ScriptValue::Null)
        }))
    }

    pub fn is_dir(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || Ok(exists_as(&path, |meta| meta.is_dir())?.into()))
    }

    pub fn is_file(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || Ok(exists_as(&path, |meta| meta.is_file())?.into()))
    }

    /// Size of a regular file in bytes
    pub fn file_size(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || Ok(size(&path).map_err(|e| e.to_string())?.into()))
    }

    /// Names of the entries directly inside a directory, sorted
    pub fn list_dir(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || path_list(list_dir(&path)))
    }

    /// Every path below a directory, relative to it, parents first
    pub fn list_tree(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || path_list(list_tree(&path)))
    }

    /// Copy one file. Fails if `to` already exists.
    pub fn copy_file(&mut self, from: &str, to: &str) -> PromiseKey {
        let (from, to) = (PathBuf::from(from), PathBuf::from(to));
        self.post_file_work(move || unit(copy_file(&from, &to)))
    }

    /// Copy a file or a directory recursively. Symlinks are copied as links.
    pub fn copy_tree(&mut self, from: &str, to: &str) -> PromiseKey {
        let (from, to) = (PathBuf::from(from), PathBuf::from(to));
        self.post_file_work(move || unit(copy_tree(&from, &to)))
    }

    /// Remove a file or an empty directory. A missing path is not an error.
    pub fn remove_path(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || unit(remove(&path)))
    }

    /// Remove a path and everything below it. A missing path is not an error.
    pub fn remove_tree(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || unit(remove_tree(&path)))
    }

    pub fn rename_path(&mut self, from: &str, to: &str) -> PromiseKey {
        let (from, to) = (PathBuf::from(from), PathBuf::from(to));
        self.post_file_work(move || unit(fs::rename(&from, &to)))
    }

    /// Create a directory and any missing parents
    pub fn make_dirs(&mut self, path: &str) -> PromiseKey {
        let path = PathBuf::from(path);
        self.post_file_work(move || unit(fs::create_dir_all(&path)))
    }
}

// ---------------------------------------------------------------------------
// Disk operations
// ---------------------------------------------------------------------------

fn read_bytes(path: &Path) -> std::result::Result<Vec<u8>, String> {
    fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

fn unit(result: io::Result<()>) -> std::result::Result<ScriptValue, String> {
    result.map(|()| ScriptValue::Null).map_err(|e| e.to_string())
}

fn path_list(result: io::Result<Vec<PathBuf>>) -> std::result::Result<ScriptValue, String> {
    let paths = result.map_err(|e| e.to_string())?;
    Ok(ScriptValue::Array(
        paths
            .into_iter()
            .map(|p| ScriptValue::String(p.to_string_lossy().into_owned()))
            .collect(),
    ))
}

fn content_bytes(content: &ScriptValue) -> Result<Vec<u8>, ScriptError> {
    match content {
        ScriptValue::String(text) => Ok(text.as_bytes().to_vec()),
        ScriptValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|byte| u8::try_from(byte).ok())
                    .ok_or_else(|| ScriptError::new(CONTENT_REQUIRED))
            })
            .collect(),
        _ => Err(ScriptError::new(CONTENT_REQUIRED)),
    }
}

/// False for a missing path, otherwise `check` on its metadata
fn exists_as(path: &Path, check: impl FnOnce(&fs::Metadata) -> bool) -> std::result::Result<bool, String> {
    match fs::metadata(path) {
        Ok(meta) => Ok(check(&meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.to_string()),
    }
}

fn size(path: &Path) -> io::Result<u64> {
    let meta = fs::metadata(path)?;
    if meta.is_dir() {
        return Err(io::Error::from_raw_os_error(libc::EISDIR));
    }
    Ok(meta.len())
}

fn list_dir(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut names = fs::read_dir(path)?
        .map(|entry| entry.map(|e| PathBuf::from(e.file_name())))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

fn list_tree(root: &Path) -> io::Result<Vec<PathBuf>> {
    fn walk(root: &Path, relative: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
        for name in list_dir(&root.join(relative))? {
            let child = relative.join(&name);
            let is_dir = fs::symlink_metadata(root.join(&child))?.is_dir();
            out.push(child.clone());
            if is_dir {
                walk(root, &child, out)?;
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(root, Path::new(""), &mut out)?;
    Ok(out)
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::symlink_metadata(to).is_ok() {
        return Err(io::Error::from_raw_os_error(libc::EEXIST));
    }
    fs::copy(from, to).map(|_| ())
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    if meta.file_type().is_symlink() {
        std::os::unix::fs::symlink(fs::read_link(from)?, to)
    } else if meta.is_dir() {
        fs::create_dir_all(to)?;
        for name in list_dir(from)? {
            copy_tree(&from.join(&name), &to.join(&name))?;
        }
        Ok(())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

fn remove(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
        Ok(meta) if meta.is_dir() => fs::remove_dir(path),
        Ok(_) => fs::remove_file(path),
    }
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
    }
}

// ---------------------------------------------------------------------------
// Path strings
// ---------------------------------------------------------------------------

/// Final component of `path`, or "" if it has none
pub fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `path` without its final component
pub fn dirname(path: &str) -> String {
    match Path::new(path).parent() {
        Some(parent) => parent.to_string_lossy().into_owned(),
        None => path.to_string(),
    }
}

pub fn current_dir() -> Result<String, ScriptError> {
    std::env::current_dir()
        .map(|dir| dir.to_string_lossy().into_owned())
        .map_err(|e| ScriptError::new(format!("Error: {}", e)))
}

pub fn home_dir() -> Result<String, ScriptError> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| home.to_string_lossy().into_owned())
        .ok_or_else(|| ScriptError::new("Error: HOME is not set"))
}

pub fn temp_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}
