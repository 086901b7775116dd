//! Hotkey registrar
//!
//! Wraps a [`HotkeyBackend`] and enforces that at most one hotkey is
//! registered at a time. Changing a binding always means unregister first,
//! then register the replacement.

use tracing::{debug, info, warn};

use super::backend::{HotkeyBackend, HotkeyError};
use super::binding::HotkeyBinding;
use super::listener::{ListenerHandle, OnFire};

/// Win32 reserves ids above 0xBFFF for shared DLLs
const MAX_HOTKEY_ID: u32 = 0xBFFF;

/// A live native registration
pub struct RegisteredHotkey<R> {
    id: u32,
    binding: HotkeyBinding,
    native: R,
}

impl<R> RegisteredHotkey<R> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn binding(&self) -> &HotkeyBinding {
        &self.binding
    }
}

impl<R> std::fmt::Debug for RegisteredHotkey<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHotkey")
            .field("id", &self.id)
            .field("binding", &self.binding)
            .finish()
    }
}

pub struct Registrar<B: HotkeyBackend> {
    backend: B,
    next_id: u32,
    active: Option<u32>,
}

impl<B: HotkeyBackend> Registrar<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            next_id: 1,
            active: None,
        }
    }

    /// Id of the currently registered hotkey, if any
    pub fn active_id(&self) -> Option<u32> {
        self.active
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Register `binding` with the OS
    pub fn register(
        &mut self,
        binding: &HotkeyBinding,
    ) -> Result<RegisteredHotkey<B::Registration>, HotkeyError> {
        if let Some(id) = self.active {
            return Err(HotkeyError::AlreadyRegistered { id });
        }

        if !binding.has_modifiers() {
            warn!(%binding, "hotkey has no modifiers; the bare key will be captured system-wide");
        }

        let modifiers = self.backend.translate(binding.modifiers());
        let id = self.next_id;
        debug!(id, %binding, ?modifiers, "registering hotkey");

        let native = self.backend.register(id, binding, &modifiers)?;

        self.next_id = if id >= MAX_HOTKEY_ID { 1 } else { id + 1 };
        self.active = Some(id);
        info!(id, %binding, "hotkey registered");

        Ok(RegisteredHotkey {
            id,
            binding: binding.clone(),
            native,
        })
    }

    /// Release a registration. `None` is a no-op.
    pub fn unregister(&mut self, hotkey: Option<RegisteredHotkey<B::Registration>>) {
        let Some(hotkey) = hotkey else {
            debug!("no hotkey to unregister");
            return;
        };

        if self.active == Some(hotkey.id) {
            self.active = None;
        } else {
            warn!(id = hotkey.id, active = ?self.active, "unregistering a hotkey that is not the active one");
        }

        self.backend.unregister(hotkey.native);
        info!(id = hotkey.id, binding = %hotkey.binding, "hotkey unregistered");
    }

    pub fn start_listener(
        &mut self,
        hotkey: &mut RegisteredHotkey<B::Registration>,
        on_fire: OnFire,
    ) -> Result<ListenerHandle, HotkeyError> {
        let listener = self.backend.start_listener(&mut hotkey.native, on_fire)?;
        info!(id = hotkey.id, "hotkey listener started");
        Ok(listener)
    }

    /// Stop a listener. `None` is a no-op.
    pub fn stop_listener(&mut self, listener: Option<ListenerHandle>) {
        if let Some(listener) = listener {
            self.backend.stop_listener(listener);
        }
    }
}
