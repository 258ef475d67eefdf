use std::{
    fs::{self, File, Permissions},
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::Path,
};

use anyhow::{Context, Error};

/// Creates a file and all parent directories if they don't exist
pub fn create_file<S>(path: S) -> Result<File, Error>
where
    S: AsRef<Path>,
{
    if let Some(parent) = path.as_ref().parent() {
        create_dirs(parent)?;
    }

    File::create(path.as_ref()).context(format!(
        "Could not create file: {}",
        path.as_ref().display()
    ))
}

/// Creates all directories in a path if they don't exist
pub fn create_dirs<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    fs::create_dir_all(path.as_ref()).context(format!(
        "Could not create path: {}",
        path.as_ref().display()
    ))
}

/// Sets the permission bits of a file or directory, including the sticky
/// bit.
pub fn set_mode<S>(path: S, mode: u32) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    fs::set_permissions(path.as_ref(), Permissions::from_mode(mode)).context(format!(
        "Could not set permissions {:#o} for {}",
        mode,
        path.as_ref().display()
    ))
}

/// Writes to a file, creating it and its parent directories first
pub fn write_file<S>(path: S, mode: u32, contents: &[u8]) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    let mut file = create_file(path.as_ref())?;
    set_mode(path.as_ref(), mode)?;

    file.write_all(contents).context(format!(
        "Could not write to file: {}",
        path.as_ref().display()
    ))?;

    Ok(())
}

/// Recursively removes a directory. Returns `false` if there was nothing to
/// remove.
pub fn remove_dir_all<S>(path: S) -> Result<bool, Error>
where
    S: AsRef<Path>,
{
    match fs::remove_dir_all(path.as_ref()) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::new(e).context(format!(
            "Could not remove directory: {}",
            path.as_ref().display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::fs::MetadataExt;

    use tempfile::TempDir;

    #[test]
    fn test_write_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("etc/hostname");

        write_file(&path, 0o644, b"demo\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "demo\n");
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o7777, 0o644);

        // Overwrites
        write_file(&path, 0o600, b"other\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "other\n");
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o7777, 0o600);
    }

    #[test]
    fn test_set_mode() {
        let temp_dir = TempDir::new().unwrap();
        let tmp = temp_dir.path().join("tmp");
        create_dirs(&tmp).unwrap();

        set_mode(&tmp, 0o1777).unwrap();
        assert_eq!(fs::metadata(&tmp).unwrap().mode() & 0o7777, 0o1777);

        set_mode(temp_dir.path().join("missing"), 0o700).unwrap_err();
    }

    #[test]
    fn test_remove_dir_all() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("zroot");
        create_file(root.join("var/log/syslog")).unwrap();

        assert!(remove_dir_all(&root).unwrap());
        assert!(!root.exists());
        assert!(!remove_dir_all(&root).unwrap());
    }
}
