//! Abstract modifier to platform modifier translation
//!
//! Settings speak in `ctrl`/`alt`/`shift`/`cmd`. Each platform backend
//! needs its own modifier vocabulary. On macOS the abstract `ctrl` is sent
//! to Command, since that is where conventional shortcuts live there.

use serde::{Deserialize, Serialize};

use super::binding::Modifier;

/// Target platform families with distinct modifier conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// The platform this binary was built for
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

/// Platform-level modifier keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeModifier {
    Control,
    Alt,
    Shift,
    /// macOS Command
    Command,
    /// macOS Option
    Option,
}

/// Ordered, duplicate-free set of native modifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifierSet(Vec<NativeModifier>);

impl ModifierSet {
    fn insert(&mut self, modifier: NativeModifier) {
        if !self.0.contains(&modifier) {
            self.0.push(modifier);
        }
    }

    pub fn contains(&self, modifier: NativeModifier) -> bool {
        self.0.contains(&modifier)
    }

    pub fn as_slice(&self) -> &[NativeModifier] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NativeModifier> + '_ {
        self.0.iter().copied()
    }
}

/// Map abstract modifiers onto the given platform's modifiers
///
/// | abstract | Windows/Linux | macOS   |
/// |----------|---------------|---------|
/// | ctrl     | Control       | Command |
/// | cmd/meta | Control       | Command |
/// | alt      | Alt           | Option  |
/// | shift    | Shift         | Shift   |
pub fn translate(modifiers: &[Modifier], platform: Platform) -> ModifierSet {
    let mut set = ModifierSet::default();
    for modifier in modifiers {
        let native = match (platform, modifier) {
            (Platform::MacOs, Modifier::Ctrl | Modifier::Cmd) => NativeModifier::Command,
            (Platform::MacOs, Modifier::Alt) => NativeModifier::Option,
            (_, Modifier::Ctrl | Modifier::Cmd) => NativeModifier::Control,
            (_, Modifier::Alt) => NativeModifier::Alt,
            (_, Modifier::Shift) => NativeModifier::Shift,
        };
        set.insert(native);
    }
    set
}

/// Translate raw settings names, skipping names that are not modifiers
pub fn translate_names<S: AsRef<str>>(names: &[S], platform: Platform) -> ModifierSet {
    let modifiers: Vec<Modifier> = names
        .iter()
        .filter_map(|name| Modifier::from_name(name.as_ref()))
        .collect();
    translate(&modifiers, platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrl_shift_on_macos() {
        let set = translate(&[Modifier::Ctrl, Modifier::Shift], Platform::MacOs);
        assert_eq!(
            set.as_slice(),
            &[NativeModifier::Command, NativeModifier::Shift]
        );
    }

    #[test]
    fn test_ctrl_shift_on_windows_and_linux() {
        for platform in [Platform::Windows, Platform::Linux] {
            let set = translate(&[Modifier::Ctrl, Modifier::Shift], platform);
            assert_eq!(
                set.as_slice(),
                &[NativeModifier::Control, NativeModifier::Shift]
            );
        }
    }

    #[test]
    fn test_alt_becomes_option_on_macos() {
        let set = translate(&[Modifier::Alt], Platform::MacOs);
        assert_eq!(set.as_slice(), &[NativeModifier::Option]);

        let set = translate(&[Modifier::Alt], Platform::Linux);
        assert_eq!(set.as_slice(), &[NativeModifier::Alt]);
    }

    #[test]
    fn test_cmd_falls_back_to_control() {
        let set = translate(&[Modifier::Ctrl, Modifier::Cmd], Platform::Windows);
        assert_eq!(set.as_slice(), &[NativeModifier::Control]);
    }

    #[test]
    fn test_unknown_names_ignored() {
        let set = translate_names(&["hyper", "shift", "fn"], Platform::Linux);
        assert_eq!(set.as_slice(), &[NativeModifier::Shift]);

        let empty = translate_names::<&str>(&[], Platform::MacOs);
        assert!(empty.is_empty());
    }
}
