use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

/// Layered key/value lookup: instance-local overrides win over an env
/// file, which wins over the process environment.
#[derive(Debug, Default)]
pub struct EnvLookup {
    overrides: HashMap<String, String>,
    env_file: HashMap<String, String>,
}

impl EnvLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        Self {
            overrides,
            env_file: HashMap::new(),
        }
    }

    /// Load a `KEY=VALUE` env file as the middle layer. Blank lines and
    /// `#` comments are skipped; a missing file is not an error, just an
    /// empty layer.
    pub fn load_env_file(mut self, path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                self.env_file = parse_env_file(&contents);
                debug!(
                    "loaded {} entries from env file {}",
                    self.env_file.len(),
                    path.display()
                );
            }
            Err(e) => {
                debug!("env file {} not readable: {}", path.display(), e);
            }
        }
        self
    }

    pub fn set_override<S: Into<String>>(&mut self, key: S, value: S) {
        self.overrides.insert(key.into(), value.into());
    }

    pub fn lookup(&self, key: &str) -> Option<String> {
        if let Some(v) = self.overrides.get(key) {
            return Some(v.clone());
        }
        if let Some(v) = self.env_file.get(key) {
            return Some(v.clone());
        }
        std::env::var(key).ok()
    }
}

fn parse_env_file(contents: &str) -> HashMap<String, String> {
    let mut entries = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn override_beats_env_file_beats_process_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment line").unwrap();
        writeln!(file, "HIVE_TEST_REGION = us-east-1").unwrap();
        writeln!(file, "HIVE_TEST_DEPTH=3").unwrap();

        std::env::set_var("HIVE_TEST_REGION", "eu-west-1");
        std::env::set_var("HIVE_TEST_PROC_ONLY", "yes");

        let mut lookup = EnvLookup::new().load_env_file(file.path());
        lookup.set_override("HIVE_TEST_DEPTH", "9");

        assert_eq!(lookup.lookup("HIVE_TEST_DEPTH").as_deref(), Some("9"));
        assert_eq!(
            lookup.lookup("HIVE_TEST_REGION").as_deref(),
            Some("us-east-1")
        );
        assert_eq!(lookup.lookup("HIVE_TEST_PROC_ONLY").as_deref(), Some("yes"));
        assert_eq!(lookup.lookup("HIVE_TEST_MISSING"), None);

        std::env::remove_var("HIVE_TEST_REGION");
        std::env::remove_var("HIVE_TEST_PROC_ONLY");
    }

    #[test]
    fn missing_env_file_is_empty_layer() {
        let lookup = EnvLookup::new().load_env_file(Path::new("/nonexistent/hive.env"));
        assert_eq!(lookup.lookup("HIVE_TEST_NOPE"), None);
    }
}
