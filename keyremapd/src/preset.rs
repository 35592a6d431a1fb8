//! Preset (mapping definition) loading and validation.
//!
//! A preset is a JSON file of trigger -> symbol entries:
//!
//! ```json
//! {
//!     "mapping": {
//!         "1,3": "a",
//!         "3,16,-1": "b",
//!         "1,29,1+1,56,1": "space"
//!     }
//! }
//! ```
//!
//! Trigger keys are `type,code[,value]` event triples, chained with `+` for
//! combinations. The value defaults to 1 (key down) when omitted. Broken
//! entries are skipped with a warning; a file that is not valid JSON fails
//! the whole load. Presets are immutable once handed to an injector.

use crate::keycodes::KeycodeMap;
use crate::ServiceError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// One `(type, code, value)` input event spec.
pub type EventSpec = (u32, u32, i32);

/// A trigger: one event or an ordered combination of events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Trigger(pub Vec<EventSpec>);

impl Trigger {
    /// Parse `"type,code[,value]"` parts chained with `+`.
    /// Returns None for anything malformed.
    fn parse(raw: &str) -> Option<Self> {
        let mut specs = Vec::new();
        for part in raw.split('+') {
            let fields: Vec<&str> = part.split(',').collect();
            let spec = match fields.as_slice() {
                [ev_type, code] => (
                    ev_type.trim().parse().ok()?,
                    code.trim().parse().ok()?,
                    1,
                ),
                [ev_type, code, value] => (
                    ev_type.trim().parse().ok()?,
                    code.trim().parse().ok()?,
                    value.trim().parse().ok()?,
                ),
                _ => return None,
            };
            specs.push(spec);
        }
        if specs.is_empty() {
            return None;
        }
        Some(Trigger(specs))
    }
}

#[derive(Deserialize)]
struct PresetFile {
    #[serde(default)]
    mapping: HashMap<String, String>,
}

/// A validated, immutable set of trigger -> symbol remap entries.
#[derive(Debug, Clone, Default)]
pub struct Preset {
    entries: HashMap<Trigger, String>,
}

impl Preset {
    /// Load a preset from an absolute path supplied by the caller.
    ///
    /// A missing file is `PresetNotFound` (a recoverable condition that the
    /// service reports as a boolean failure); unparseable JSON is
    /// `InvalidMapping`. Individually broken entries are dropped with a
    /// warning, matching how hand-edited preset files degrade.
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ServiceError::PresetNotFound(path.to_path_buf())
            } else {
                ServiceError::InvalidMapping(format!("{}: {}", path.display(), e))
            }
        })?;

        let file: PresetFile = serde_json::from_str(&content)
            .map_err(|e| ServiceError::InvalidMapping(format!("{}: {}", path.display(), e)))?;

        let mut entries = HashMap::new();
        for (raw, symbol) in file.mapping {
            match Trigger::parse(&raw) {
                Some(trigger) => {
                    entries.insert(trigger, symbol);
                }
                None => {
                    warn!("Ignoring broken mapping entry \"{}\" in {}", raw, path.display());
                }
            }
        }

        debug!("Loaded {} mapping entries from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, trigger: &Trigger) -> Option<&str> {
        self.entries.get(trigger).map(String::as_str)
    }

    /// Resolve target symbols against the keycode table.
    ///
    /// Symbols the table does not know are dropped with a warning rather
    /// than failing the start; a stale xmodmap dump should degrade a few
    /// keys, not the whole device.
    pub fn resolve(&self, keycodes: &KeycodeMap) -> ResolvedMapping {
        let mut entries = HashMap::new();
        for (trigger, symbol) in &self.entries {
            match keycodes.get(symbol) {
                Some(code) => {
                    entries.insert(trigger.clone(), code);
                }
                None => {
                    warn!("Unknown symbol \"{}\", skipping its mapping", symbol);
                }
            }
        }
        ResolvedMapping { entries }
    }
}

/// A preset with every target symbol resolved to a platform keycode.
/// This is what injectors consume; they never see symbol names.
#[derive(Debug, Clone, Default)]
pub struct ResolvedMapping {
    entries: HashMap<Trigger, i32>,
}

impl ResolvedMapping {
    pub fn target(&self, trigger: &Trigger) -> Option<i32> {
        self.entries.get(trigger).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_preset(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_skips_broken_entries() {
        let dir = TempDir::new().unwrap();
        let path = write_preset(
            &dir,
            "test.json",
            r#"{
                "mapping": {
                    "1,3": "a",
                    "3,16,-1": "b",
                    "3,1,1+3,2,-1+3,3,1": "c",
                    "3,1,1,2": "e",
                    "3": "e",
                    ",,+3,1,2": "g",
                    "": "h"
                }
            }"#,
        );

        let preset = Preset::load(&path).unwrap();
        assert_eq!(preset.len(), 3);
        assert_eq!(preset.get(&Trigger(vec![(1, 3, 1)])), Some("a"));
        assert_eq!(preset.get(&Trigger(vec![(3, 16, -1)])), Some("b"));
        assert_eq!(
            preset.get(&Trigger(vec![(3, 1, 1), (3, 2, -1), (3, 3, 1)])),
            Some("c")
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.json");
        match Preset::load(&path) {
            Err(ServiceError::PresetNotFound(p)) => assert_eq!(p, path),
            other => panic!("expected PresetNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_json_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write_preset(&dir, "bad.json", "not json at all");
        assert!(matches!(
            Preset::load(&path),
            Err(ServiceError::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_empty_mapping_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = write_preset(&dir, "empty.json", r#"{"mapping": {}}"#);
        let preset = Preset::load(&path).unwrap();
        assert!(preset.is_empty());
    }

    #[test]
    fn test_resolve_drops_unknown_symbols() {
        let dir = TempDir::new().unwrap();
        let path = write_preset(
            &dir,
            "r.json",
            r#"{"mapping": {"1,3": "a", "1,4": "no_such_symbol"}}"#,
        );
        let preset = Preset::load(&path).unwrap();

        let keycodes = KeycodeMap::populated();
        let resolved = preset.resolve(&keycodes);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.target(&Trigger(vec![(1, 3, 1)])), Some(30));
    }
}
