//! Process-wide symbolic-name to keycode table.
//!
//! The daemon runs under systemd and cannot shell out to `xmodmap -pke` in
//! the user's session, so callers dump their session's layout to
//! `xmodmap.json` and the daemon merges it into this table. There is one
//! table per process, shared by every injection session; merges from one
//! session are visible to all devices. That sharing is deliberate, the
//! daemon assumes a single active user session at a time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Code assigned to the special `disable` symbol. Mapping a key to it
/// suppresses the key entirely.
pub const DISABLE_CODE: i32 = -1;
pub const DISABLE_NAME: &str = "disable";

/// Shared symbolic-name -> keycode lookup. Clones share the underlying
/// table, so a merge through one handle is visible through every other.
#[derive(Clone)]
pub struct KeycodeMap {
    // keys stored lowercased, lookups are case-insensitive
    table: Arc<RwLock<HashMap<String, i32>>>,
}

impl KeycodeMap {
    /// Create an empty table. Daemon code wants [`KeycodeMap::populated`];
    /// this exists for tests that control the contents exactly.
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a table pre-filled with the default US layout names.
    pub fn populated() -> Self {
        let map = Self::new();
        map.populate();
        map
    }

    /// Fill in the default names. Called once at daemon start; later
    /// xmodmap merges refine these for the user's actual layout.
    pub fn populate(&self) {
        let mut table = self.table.write().unwrap();

        // digits row: KEY_1=2 .. KEY_0=11
        for (i, c) in "1234567890".chars().enumerate() {
            table.insert(c.to_string(), 2 + i as i32);
        }
        for (i, c) in "qwertyuiop".chars().enumerate() {
            table.insert(c.to_string(), 16 + i as i32);
        }
        for (i, c) in "asdfghjkl".chars().enumerate() {
            table.insert(c.to_string(), 30 + i as i32);
        }
        for (i, c) in "zxcvbnm".chars().enumerate() {
            table.insert(c.to_string(), 44 + i as i32);
        }

        let named: &[(&str, i32)] = &[
            ("esc", 1),
            ("minus", 12),
            ("equal", 13),
            ("backspace", 14),
            ("tab", 15),
            ("enter", 28),
            ("control_l", 29),
            ("semicolon", 39),
            ("apostrophe", 40),
            ("grave", 41),
            ("shift_l", 42),
            ("backslash", 43),
            ("comma", 51),
            ("dot", 52),
            ("slash", 53),
            ("shift_r", 54),
            ("alt_l", 56),
            ("space", 57),
            ("caps_lock", 58),
            ("f1", 59),
            ("f2", 60),
            ("f3", 61),
            ("f4", 62),
            ("f5", 63),
            ("f6", 64),
            ("f7", 65),
            ("f8", 66),
            ("f9", 67),
            ("f10", 68),
            ("f11", 87),
            ("f12", 88),
            ("kp_1", 79),
            ("kp_2", 80),
            ("kp_3", 81),
            ("kp_4", 75),
            ("kp_5", 76),
            ("kp_6", 77),
            ("kp_7", 71),
            ("kp_8", 72),
            ("kp_9", 73),
            ("kp_0", 82),
            ("control_r", 97),
            ("alt_r", 100),
            ("home", 102),
            ("up", 103),
            ("left", 105),
            ("right", 106),
            ("end", 107),
            ("down", 108),
            ("insert", 110),
            ("delete", 111),
            ("btn_left", 272),
            ("btn_right", 273),
            ("btn_middle", 274),
        ];
        for (name, code) in named {
            table.insert((*name).to_string(), *code);
        }

        table.insert(DISABLE_NAME.to_string(), DISABLE_CODE);
    }

    /// Merge an override table. Union semantics: overlapping names take the
    /// new value, everything else is retained. Nothing is ever removed.
    pub fn update(&self, overrides: &HashMap<String, i32>) {
        let mut table = self.table.write().unwrap();
        for (name, code) in overrides {
            table.insert(name.to_lowercase(), *code);
        }
        debug!("Merged {} keycode overrides", overrides.len());
    }

    /// Case-insensitive lookup. A `key_` prefix is accepted and ignored, so
    /// `KEY_LEFTSHIFT`-style names and bare xmodmap names both resolve.
    pub fn get(&self, name: &str) -> Option<i32> {
        let table = self.table.read().unwrap();
        let lower = name.to_lowercase();
        if let Some(code) = table.get(&lower) {
            return Some(*code);
        }
        lower.strip_prefix("key_").and_then(|stripped| table.get(stripped).copied())
    }

    /// Number of known names.
    pub fn len(&self) -> usize {
        self.table.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeycodeMap {
    fn default() -> Self {
        Self::populated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populated_defaults() {
        let map = KeycodeMap::populated();
        assert!(map.len() > 80);
        assert_eq!(map.get("1"), Some(2));
        assert_eq!(map.get("a"), Some(30));
        assert_eq!(map.get("space"), Some(57));
        assert_eq!(map.get("btn_left"), Some(272));
        assert_eq!(map.get(DISABLE_NAME), Some(DISABLE_CODE));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let map = KeycodeMap::populated();
        assert_eq!(map.get("AlT_L"), Some(56));
        assert_eq!(map.get("ShiFt_L"), Some(42));
        assert_eq!(map.get("KEY_LEFTSHIFT"), None); // not a default name
        assert_eq!(map.get("KeY_1"), Some(2)); // key_ prefix stripped
        assert_eq!(map.get("BTN_left"), Some(272));
    }

    #[test]
    fn test_update_is_idempotent_and_retains() {
        let map = KeycodeMap::new();
        map.update(&HashMap::from([
            ("foo1".to_string(), 101),
            ("bar1".to_string(), 102),
        ]));
        map.update(&HashMap::from([
            ("foo1".to_string(), 201),
            ("bar2".to_string(), 202),
        ]));
        map.update(&HashMap::from([
            ("foo1".to_string(), 201),
            ("bar2".to_string(), 202),
        ]));

        // override wins for overlapping names, untouched names survive
        assert_eq!(map.get("foo1"), Some(201));
        assert_eq!(map.get("bar1"), Some(102));
        assert_eq!(map.get("bar2"), Some(202));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_clones_share_the_table() {
        let map = KeycodeMap::new();
        let view = map.clone();
        map.update(&HashMap::from([("zeta".to_string(), 7)]));
        assert_eq!(view.get("ZETA"), Some(7));
    }
}
