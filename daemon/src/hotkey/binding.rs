//! Hotkey binding value types
//!
//! A binding is an ordered set of abstract modifiers plus one key drawn
//! from a small fixed set. Bindings are replaced wholesale, never edited
//! while registered.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Abstract modifier names as they appear in settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    /// Command on macOS; `meta` is accepted as an alias
    #[serde(alias = "meta")]
    Cmd,
}

impl Modifier {
    /// Parse a settings name, returning `None` for names this build does not know
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ctrl" => Some(Self::Ctrl),
            "alt" => Some(Self::Alt),
            "shift" => Some(Self::Shift),
            "cmd" | "meta" => Some(Self::Cmd),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ctrl => "ctrl",
            Self::Alt => "alt",
            Self::Shift => "shift",
            Self::Cmd => "cmd",
        }
    }
}

/// Keys a binding may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    L,
    S,
    T,
    N,
    Space,
}

impl Key {
    pub const ALL: [Key; 5] = [Key::L, Key::S, Key::T, Key::N, Key::Space];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "l" => Some(Self::L),
            "s" => Some(Self::S),
            "t" => Some(Self::T),
            "n" => Some(Self::N),
            "space" => Some(Self::Space),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::L => "l",
            Self::S => "s",
            Self::T => "t",
            Self::N => "n",
            Self::Space => "space",
        }
    }
}

impl Default for Key {
    fn default() -> Self {
        Self::L
    }
}

/// A global key combination
///
/// An empty modifier list is allowed. Whether the OS accepts it is up to
/// the platform: Windows and X11 will grab the bare key system-wide, and
/// the macOS event tap will match the key with no modifiers held.
///
/// Deserializing goes through [`HotkeyBinding::from_names`], so unknown
/// modifier names are dropped and repeats collapse, the same as settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawBinding")]
pub struct HotkeyBinding {
    modifiers: Vec<Modifier>,
    key: Key,
}

/// Wire shape of a binding before modifier names are checked
#[derive(Deserialize)]
struct RawBinding {
    #[serde(default)]
    modifiers: Vec<String>,
    key: Key,
}

impl From<RawBinding> for HotkeyBinding {
    fn from(raw: RawBinding) -> Self {
        Self::from_names(&raw.modifiers, raw.key)
    }
}

impl HotkeyBinding {
    /// Build a binding, dropping repeated modifiers while keeping first-seen order
    pub fn new(modifiers: impl IntoIterator<Item = Modifier>, key: Key) -> Self {
        let mut ordered = Vec::new();
        for modifier in modifiers {
            if !ordered.contains(&modifier) {
                ordered.push(modifier);
            }
        }
        Self {
            modifiers: ordered,
            key,
        }
    }

    /// Build a binding from settings names, ignoring unknown modifiers
    pub fn from_names<S: AsRef<str>>(names: &[S], key: Key) -> Self {
        let modifiers = names.iter().filter_map(|name| {
            let parsed = Modifier::from_name(name.as_ref());
            if parsed.is_none() {
                debug!(name = name.as_ref(), "ignoring unknown modifier name");
            }
            parsed
        });
        Self::new(modifiers, key)
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn has_modifiers(&self) -> bool {
        !self.modifiers.is_empty()
    }
}

impl Default for HotkeyBinding {
    fn default() -> Self {
        Self::new([Modifier::Ctrl, Modifier::Shift], Key::L)
    }
}

impl fmt::Display for HotkeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier.name())?;
        }
        write!(f, "{}", self.key.name())
    }
}

impl std::str::FromStr for HotkeyBinding {
    type Err = String;

    /// Parse `ctrl+shift+l` style strings. The last segment is the key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s
            .split('+')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let (key, modifiers) = parts
            .split_last()
            .ok_or_else(|| "hotkey is empty".to_string())?;
        let key = Key::from_name(key).ok_or_else(|| format!("unsupported hotkey key: {key}"))?;
        Ok(Self::from_names(modifiers, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_binding() {
        let binding = HotkeyBinding::default();
        assert_eq!(binding.modifiers(), &[Modifier::Ctrl, Modifier::Shift]);
        assert_eq!(binding.key(), Key::L);
        assert_eq!(binding.to_string(), "ctrl+shift+l");
    }

    #[test]
    fn test_from_names_ignores_unknown() {
        let binding = HotkeyBinding::from_names(&["ctrl", "hyper", "meta"], Key::Space);
        assert_eq!(binding.modifiers(), &[Modifier::Ctrl, Modifier::Cmd]);
    }

    #[test]
    fn test_repeated_modifiers_collapse() {
        let binding = HotkeyBinding::new([Modifier::Shift, Modifier::Alt, Modifier::Shift], Key::N);
        assert_eq!(binding.modifiers(), &[Modifier::Shift, Modifier::Alt]);
    }

    #[test]
    fn test_parse() {
        let binding: HotkeyBinding = "alt + shift + space".parse().unwrap();
        assert_eq!(binding.modifiers(), &[Modifier::Alt, Modifier::Shift]);
        assert_eq!(binding.key(), Key::Space);

        let bare: HotkeyBinding = "t".parse().unwrap();
        assert!(!bare.has_modifiers());

        assert!("ctrl+q".parse::<HotkeyBinding>().is_err());
        assert!("".parse::<HotkeyBinding>().is_err());
    }

    #[test]
    fn test_serde_accepts_meta_alias() {
        let json = r#"{"modifiers":["meta","shift"],"key":"s"}"#;
        let binding: HotkeyBinding = serde_json::from_str(json).unwrap();
        assert_eq!(binding.modifiers(), &[Modifier::Cmd, Modifier::Shift]);
        assert_eq!(binding.key(), Key::S);

        let out = serde_json::to_string(&binding).unwrap();
        assert!(out.contains("\"cmd\""));
    }

    #[test]
    fn test_serde_matches_settings_parsing() {
        let json = r#"{"modifiers":["ctrl","hyper"],"key":"l"}"#;
        let binding: HotkeyBinding = serde_json::from_str(json).unwrap();
        assert_eq!(binding.modifiers(), &[Modifier::Ctrl]);

        let json = r#"{"modifiers":["shift","shift","meta","cmd"],"key":"l"}"#;
        let binding: HotkeyBinding = serde_json::from_str(json).unwrap();
        assert_eq!(binding.to_string(), "shift+cmd+l");
        assert_eq!(
            serde_json::to_string(&binding).unwrap(),
            r#"{"modifiers":["shift","cmd"],"key":"l"}"#
        );

        // The key set stays closed
        let json = r#"{"modifiers":["ctrl"],"key":"q"}"#;
        assert!(serde_json::from_str::<HotkeyBinding>(json).is_err());
    }
}
