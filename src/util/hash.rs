//! Hashing utilities for cache keys and toolchain identity.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA256 hash of a string.
pub fn sha256_str(s: &str) -> String {
    sha256_bytes(s.as_bytes())
}

/// A hasher for building stable hashes from multiple components.
#[derive(Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    /// Create a new fingerprint builder.
    pub fn new() -> Self {
        Fingerprint {
            hasher: Sha256::new(),
        }
    }

    /// Add a string component to the fingerprint.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.hasher.update(s.as_bytes());
        self.hasher.update(b"\0"); // Separator
        self
    }

    /// Add multiple strings to the fingerprint.
    pub fn update_strs<'a>(&mut self, items: impl IntoIterator<Item = &'a str>) -> &mut Self {
        for s in items {
            self.update_str(s);
        }
        self
    }

    /// Add an optional string component.
    pub fn update_opt(&mut self, opt: Option<&str>) -> &mut Self {
        match opt {
            Some(s) => {
                self.hasher.update(b"\x01"); // Present marker
                self.update_str(s);
            }
            None => {
                self.hasher.update(b"\x00"); // Absent marker
            }
        }
        self
    }

    /// Add a boolean component.
    pub fn update_bool(&mut self, b: bool) -> &mut Self {
        self.hasher.update([b as u8]);
        self
    }

    /// Finalize and return the fingerprint as a hex string.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    /// Finalize and return a short fingerprint (first 16 chars).
    pub fn finish_short(self) -> String {
        self.finish()[..16].to_string()
    }
}

/// Stable hash of a command argument vector.
///
/// Arguments that name an existing absolute path are canonicalized first, so
/// two invocations that differ only in how they spell the same file hash
/// identically. Flag-glued paths (`-I/usr/include`, `/Foobj\a.obj`) are left
/// alone; the glue prefix is part of the command's meaning.
pub fn command_hash(args: &[String]) -> String {
    let mut fp = Fingerprint::new();
    for arg in args {
        fp.update_str(&normalize_path_arg(arg));
    }
    fp.finish_short()
}

fn normalize_path_arg(arg: &str) -> String {
    let path = Path::new(arg);
    if path.is_absolute() {
        if let Ok(canonical) = path.canonicalize() {
            return canonical.to_string_lossy().into_owned();
        }
    }
    arg.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_str() {
        let hash = sha256_str("hello");
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_fingerprint_stable() {
        let fp1 = {
            let mut fp = Fingerprint::new();
            fp.update_str("gcc").update_str("12.2.0");
            fp.finish()
        };

        let fp2 = {
            let mut fp = Fingerprint::new();
            fp.update_str("gcc").update_str("12.2.0");
            fp.finish()
        };

        let fp3 = {
            let mut fp = Fingerprint::new();
            fp.update_str("gcc").update_str("13.1.0");
            fp.finish()
        };

        assert_eq!(fp1, fp2);
        assert_ne!(fp1, fp3);
    }

    #[test]
    fn test_fingerprint_separator_is_unambiguous() {
        let a = {
            let mut fp = Fingerprint::new();
            fp.update_str("ab").update_str("c");
            fp.finish()
        };
        let b = {
            let mut fp = Fingerprint::new();
            fp.update_str("a").update_str("bc");
            fp.finish()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn test_command_hash_path_normalization() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("sub");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("main.cpp");
        std::fs::write(&file, "int main() {}").unwrap();

        // Same file through a `..` detour must hash identically.
        let direct = file.display().to_string();
        let detour = dir
            .join("..")
            .join("sub")
            .join("main.cpp")
            .display()
            .to_string();

        let h1 = command_hash(&["-c".to_string(), direct]);
        let h2 = command_hash(&["-c".to_string(), detour]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_command_hash_differs_by_flag() {
        let h1 = command_hash(&["-O2".to_string()]);
        let h2 = command_hash(&["-O3".to_string()]);
        assert_ne!(h1, h2);
    }
}
