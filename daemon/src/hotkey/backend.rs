//! Platform backend abstraction
//!
//! One implementation per target is picked at compile time (see
//! `hotkey::NativeBackend`). Tests plug in a fake.

use super::binding::{HotkeyBinding, Modifier};
use super::listener::{ListenerHandle, OnFire};
use super::translate::{translate, ModifierSet, Platform};

/// Native global-hotkey capability set
pub trait HotkeyBackend: Send + 'static {
    /// Live native registration state, owned by the registrar
    type Registration: Send + 'static;

    /// Which modifier conventions this backend follows
    fn platform(&self) -> Platform;

    fn translate(&self, modifiers: &[Modifier]) -> ModifierSet {
        translate(modifiers, self.platform())
    }

    /// Register `binding` with the OS under `id`
    ///
    /// All-or-nothing: on error nothing stays registered.
    fn register(
        &mut self,
        id: u32,
        binding: &HotkeyBinding,
        modifiers: &ModifierSet,
    ) -> Result<Self::Registration, HotkeyError>;

    /// Release the native registration. Never fails; problems are logged.
    fn unregister(&mut self, registration: Self::Registration);

    /// Begin delivering fires for `registration` to `on_fire`
    fn start_listener(
        &mut self,
        registration: &mut Self::Registration,
        on_fire: OnFire,
    ) -> Result<ListenerHandle, HotkeyError>;

    fn stop_listener(&mut self, listener: ListenerHandle) {
        listener.stop();
    }
}

/// Errors raised by hotkey registration and listening
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("the OS refused hotkey {binding}: {reason}")]
    RegistrationDenied { binding: String, reason: String },

    #[error("failed to create hotkey event source: {0}")]
    ListenerStart(String),

    #[error("hotkey {id} is still registered")]
    AlreadyRegistered { id: u32 },

    #[error("failed to spawn hotkey thread: {0}")]
    ThreadSpawn(String),
}

impl HotkeyError {
    pub(crate) fn denied(binding: &HotkeyBinding, reason: impl Into<String>) -> Self {
        Self::RegistrationDenied {
            binding: binding.to_string(),
            reason: reason.into(),
        }
    }

    /// What the user can do about it
    pub fn remedy(&self) -> &'static str {
        match self {
            Self::RegistrationDenied { .. } | Self::ListenerStart(_) => platform_remedy(),
            Self::AlreadyRegistered { .. } => {
                "unregister the current hotkey before registering another"
            }
            Self::ThreadSpawn(_) => "the system is low on resources; restart SnapLog",
        }
    }
}

fn platform_remedy() -> &'static str {
    match Platform::current() {
        Platform::MacOs => {
            "grant SnapLog Accessibility and Input Monitoring access in \
             System Settings > Privacy & Security, then restart SnapLog"
        }
        Platform::Windows => {
            "another application already uses this combination; pick a different hotkey"
        }
        Platform::Linux => {
            "global hotkeys need an X11 session (DISPLAY set) and a combination \
             no other application has grabbed"
        }
    }
}
