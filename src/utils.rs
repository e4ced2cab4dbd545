use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::{fs, io::ErrorKind, path::Path};

/// Create the sentinel file that switches the daemon to manual (hands-off)
/// mode. Overwrites an existing flag.
pub fn write_flag_file(path: &Path) -> Result<()> {
    fs::write(path, b"").context(format!("failed to write flag file {path:?}"))
}

/// Remove the manual-mode sentinel file. Removing an absent flag succeeds.
pub fn remove_flag_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(format!("failed to remove flag file {path:?}")),
    }
}

/// Print a configuration map with stable key ordering.
pub fn print_map_sorted(map: &Map<String, Value>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    for key in keys {
        match &map[key] {
            Value::String(s) => println!("{key}: {s}"),
            other => println!("{key}: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn flag_file_lifecycle() {
        let dir = TempDir::new().unwrap();
        let flag = dir.path().join("manualMode");

        assert!(!flag.exists());

        write_flag_file(&flag).expect("write flag");
        assert!(flag.exists());

        // writing twice overwrites silently
        write_flag_file(&flag).expect("rewrite flag");

        remove_flag_file(&flag).expect("remove flag");
        assert!(!flag.exists());

        // removing an absent flag is not an error
        remove_flag_file(&flag).expect("remove absent flag");
    }
}
