//! File-backed preference store.
//!
//! Each preference is a single UTF-8 file named after the preference inside a
//! base directory. Writes go through a temporary file:
//!
//! 1. Write the value to `.{name}.tmp` in the same directory
//! 2. `fsync` the temporary file
//! 3. Rename it over the target
//! 4. `fsync` the directory (unix only)
//!
//! Readers therefore see either the old value or the new one, never a torn write.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{KeyError, KeyResult};
use crate::traits::PreferenceStore;

fn io_error(context: impl AsRef<str>, err: &std::io::Error) -> KeyError {
    KeyError::PersistenceFailed(format!("{}: {err}", context.as_ref()))
}

/// [`PreferenceStore`] over a directory of small files.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    directory: PathBuf,
}

impl FilePreferenceStore {
    /// Creates a store rooted at `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::PersistenceFailed`] if the directory cannot be created.
    pub fn new(directory: impl AsRef<Path>) -> KeyResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|err| {
            io_error(
                format!("failed to create preference directory '{}'", directory.display()),
                &err,
            )
        })?;
        Ok(Self { directory })
    }

    /// Directory holding the preference files.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn value_path(&self, name: &str) -> KeyResult<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(KeyError::PersistenceFailed(format!(
                "invalid preference name '{name}'"
            )));
        }
        Ok(self.directory.join(name))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!(".{name}.tmp"))
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> KeyResult<()> {
        File::open(&self.directory)
            .and_then(|dir| dir.sync_all())
            .map_err(|err| {
                io_error(
                    format!("failed to sync directory '{}'", self.directory.display()),
                    &err,
                )
            })
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    fn sync_directory(&self) -> KeyResult<()> {
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn read(&self, name: &str) -> KeyResult<Option<String>> {
        let path = self.value_path(name)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(
                format!("failed to read '{}'", path.display()),
                &err,
            )),
        }
    }

    fn write(&self, name: &str, value: &str) -> KeyResult<()> {
        let final_path = self.value_path(name)?;
        let temp_path = self.temp_path(name);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|err| {
                io_error(format!("failed to create '{}'", temp_path.display()), &err)
            })?;
        file.write_all(value.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                io_error(format!("failed to write '{}'", temp_path.display()), &err)
            })?;
        drop(file);

        fs::rename(&temp_path, &final_path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            io_error(
                format!(
                    "failed to rename '{}' to '{}'",
                    temp_path.display(),
                    final_path.display()
                ),
                &err,
            )
        })?;

        self.sync_directory()
    }
}
