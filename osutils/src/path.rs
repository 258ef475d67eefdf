use std::path::{Path, PathBuf};

fn strip_root(path: &Path) -> &Path {
    match path.strip_prefix("/") {
        Ok(relative) => relative,
        Err(_) => path,
    }
}

/// Joins an absolute path of the installed system onto the directory its
/// root is mounted at. `/` maps to `root` itself.
pub fn join_relative(root: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let relative = strip_root(path.as_ref());
    if relative.as_os_str().is_empty() {
        root.as_ref().to_owned()
    } else {
        root.as_ref().join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_relative() {
        assert_eq!(
            join_relative("/mnt/zroot", "/etc/fstab"),
            Path::new("/mnt/zroot/etc/fstab")
        );
        assert_eq!(join_relative("/mnt/zroot", "etc"), Path::new("/mnt/zroot/etc"));
        assert_eq!(join_relative("/mnt/zroot", "/"), Path::new("/mnt/zroot"));
        assert_eq!(
            join_relative("/mnt/zroot", "/mnt/zroot/etc"),
            Path::new("/mnt/zroot/mnt/zroot/etc")
        );
    }
}
