//! In-memory backend for exercising the registrar and controller

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::backend::{HotkeyBackend, HotkeyError};
use super::binding::HotkeyBinding;
use super::listener::{spawn_push, ListenerHandle, OnFire, Signal};
use super::translate::{ModifierSet, Platform};

#[derive(Default)]
struct FakeState {
    active: Vec<(u32, HotkeyBinding, Sender<Signal>)>,
    denied: HashSet<HotkeyBinding>,
    register_calls: usize,
}

/// Cloneable fake; clones share state so tests keep a probe
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<FakeState>>,
}

pub struct FakeRegistration {
    id: u32,
    events: Option<Receiver<Signal>>,
    wake: Sender<Signal>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the OS refuse this binding from now on
    pub fn deny(&self, binding: HotkeyBinding) {
        self.state().denied.insert(binding);
    }

    pub fn allow(&self, binding: &HotkeyBinding) {
        self.state().denied.remove(binding);
    }

    pub fn active_count(&self) -> usize {
        self.state().active.len()
    }

    pub fn active_bindings(&self) -> Vec<HotkeyBinding> {
        self.state()
            .active
            .iter()
            .map(|(_, binding, _)| binding.clone())
            .collect()
    }

    pub fn register_calls(&self) -> usize {
        self.state().register_calls
    }

    /// Simulate a key press on every active registration
    pub fn fire(&self) -> bool {
        self.state()
            .active
            .iter()
            .any(|(_, _, tx)| tx.send(Signal::Fired).is_ok())
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HotkeyBackend for FakeBackend {
    type Registration = FakeRegistration;

    fn platform(&self) -> Platform {
        Platform::current()
    }

    fn register(
        &mut self,
        id: u32,
        binding: &HotkeyBinding,
        _modifiers: &ModifierSet,
    ) -> Result<FakeRegistration, HotkeyError> {
        let mut state = self.state();
        state.register_calls += 1;
        if state.denied.contains(binding) {
            return Err(HotkeyError::denied(binding, "refused by fake backend"));
        }

        let (tx, rx) = mpsc::channel();
        state.active.push((id, binding.clone(), tx.clone()));
        Ok(FakeRegistration {
            id,
            events: Some(rx),
            wake: tx,
        })
    }

    fn unregister(&mut self, registration: FakeRegistration) {
        let mut state = self.state();
        state
            .active
            .retain(|(id, _, _)| *id != registration.id);
    }

    fn start_listener(
        &mut self,
        registration: &mut FakeRegistration,
        on_fire: OnFire,
    ) -> Result<ListenerHandle, HotkeyError> {
        let events = registration
            .events
            .take()
            .ok_or_else(|| HotkeyError::ListenerStart("listener already started".to_string()))?;
        spawn_push(events, registration.wake.clone(), on_fire)
    }
}
