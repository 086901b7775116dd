//! Global hotkey registration and listening
//!
//! The binding and translation layers are platform independent. Exactly
//! one native backend is compiled per target:
//!
//! - Windows: `RegisterHotKey` with a `GetMessageW` pump (pull model)
//! - macOS: CGEventTap on a CFRunLoop thread (push model)
//! - other Unix: X11 key grabs with a polling thread (push model)

mod backend;
mod binding;
mod listener;
mod registrar;
mod translate;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(windows)]
mod windows;
#[cfg(all(unix, not(target_os = "macos")))]
mod x11;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{HotkeyBackend, HotkeyError};
pub use binding::{HotkeyBinding, Key, Modifier};
pub use listener::{ListenerHandle, ListenerState, OnFire, STOP_TIMEOUT};
pub use registrar::{RegisteredHotkey, Registrar};
pub use translate::{translate, translate_names, ModifierSet, NativeModifier, Platform};

/// Backend for the platform this binary targets
#[cfg(target_os = "macos")]
pub type NativeBackend = macos::EventTapBackend;

#[cfg(windows)]
pub type NativeBackend = windows::Win32Backend;

#[cfg(all(unix, not(target_os = "macos")))]
pub type NativeBackend = x11::X11Backend;

pub fn native_backend() -> NativeBackend {
    NativeBackend::new()
}
