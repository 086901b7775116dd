//! macOS backend using CGEventTap
//!
//! Registration creates a listen-only event tap on a dedicated thread with
//! its own CFRunLoop. Matching key-down events are pushed onto a channel;
//! the listener thread reads that channel. Tap creation fails when the
//! process lacks Accessibility / Input Monitoring permission.
//!
//! The system switches a tap off when a callback is slow or on some user
//! input. The tap thread turns it back on at its next run loop slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
};
use tracing::{debug, error, info, warn};

use super::backend::{HotkeyBackend, HotkeyError};
use super::binding::{HotkeyBinding, Key};
use super::listener::{spawn_push, ListenerHandle, OnFire, Signal};
use super::translate::{ModifierSet, NativeModifier, Platform};

/// How long each run loop slice lasts before the thread rechecks its flag
const RUN_LOOP_SLICE: Duration = Duration::from_millis(100);

/// Virtual key codes from HIToolbox Events.h (ANSI layout)
mod keycode {
    pub const L: i64 = 0x25;
    pub const S: i64 = 0x01;
    pub const T: i64 = 0x11;
    pub const N: i64 = 0x2D;
    pub const SPACE: i64 = 0x31;
}

fn relevant_flags() -> CGEventFlags {
    CGEventFlags::CGEventFlagShift
        | CGEventFlags::CGEventFlagControl
        | CGEventFlags::CGEventFlagAlternate
        | CGEventFlags::CGEventFlagCommand
}

fn key_code(key: Key) -> i64 {
    match key {
        Key::L => keycode::L,
        Key::S => keycode::S,
        Key::T => keycode::T,
        Key::N => keycode::N,
        Key::Space => keycode::SPACE,
    }
}

fn required_flags(modifiers: &ModifierSet) -> CGEventFlags {
    let mut flags = CGEventFlags::empty();
    for modifier in modifiers.iter() {
        flags |= match modifier {
            NativeModifier::Command => CGEventFlags::CGEventFlagCommand,
            NativeModifier::Option | NativeModifier::Alt => CGEventFlags::CGEventFlagAlternate,
            NativeModifier::Shift => CGEventFlags::CGEventFlagShift,
            NativeModifier::Control => CGEventFlags::CGEventFlagControl,
        };
    }
    flags
}

/// What the tap callback does with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TapAction {
    Fire,
    Reenable,
    Ignore,
}

/// Key-down fields the matcher looks at
#[derive(Debug, Clone, Copy)]
struct KeyPress {
    code: i64,
    autorepeat: bool,
    flags: CGEventFlags,
}

impl KeyPress {
    fn from_event(event: &CGEvent) -> Self {
        Self {
            code: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE),
            autorepeat: event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0,
            flags: event.get_flags(),
        }
    }
}

fn key_down_action(press: &KeyPress, key: i64, required: CGEventFlags) -> TapAction {
    if press.code == key && !press.autorepeat && (press.flags & relevant_flags()) == required {
        TapAction::Fire
    } else {
        TapAction::Ignore
    }
}

fn is_tap_disabled(event_type: CGEventType) -> bool {
    matches!(
        event_type,
        CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput
    )
}

#[derive(Debug, Default)]
pub struct EventTapBackend;

impl EventTapBackend {
    pub fn new() -> Self {
        Self
    }
}

pub struct TapRegistration {
    tapping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    events: Option<Receiver<Signal>>,
    wake: Sender<Signal>,
}

/// Create the tap and pump the run loop until `tapping` clears
fn run_event_tap(
    key: i64,
    required: CGEventFlags,
    tx: Sender<Signal>,
    tapping: Arc<AtomicBool>,
    init_tx: Sender<Result<(), String>>,
) {
    let disabled = Arc::new(AtomicBool::new(false));
    let callback_disabled = Arc::clone(&disabled);
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        let action = match event_type {
            CGEventType::KeyDown => key_down_action(&KeyPress::from_event(event), key, required),
            other if is_tap_disabled(other) => TapAction::Reenable,
            _ => TapAction::Ignore,
        };
        match action {
            TapAction::Fire => {
                let _ = tx.send(Signal::Fired);
            }
            TapAction::Reenable => callback_disabled.store(true, Ordering::SeqCst),
            TapAction::Ignore => {}
        }
        Some(event.clone())
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!("failed to create event tap - is Accessibility permission granted?");
            let _ = init_tx.send(Err("event tap creation refused".to_string()));
            return;
        }
    };

    let source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            let _ = init_tx.send(Err("could not create run loop source".to_string()));
            return;
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }
    tap.enable();
    let _ = init_tx.send(Ok(()));
    info!("event tap created and enabled");

    while tapping.load(Ordering::SeqCst) {
        if disabled.swap(false, Ordering::SeqCst) {
            warn!("event tap disabled by the system, re-enabling");
            tap.enable();
        }
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE, true);
        }
    }

    unsafe {
        run_loop.remove_source(&source, kCFRunLoopCommonModes);
    }
    debug!("event tap removed");
}

impl HotkeyBackend for EventTapBackend {
    type Registration = TapRegistration;

    fn platform(&self) -> Platform {
        Platform::MacOs
    }

    fn register(
        &mut self,
        id: u32,
        binding: &HotkeyBinding,
        modifiers: &ModifierSet,
    ) -> Result<TapRegistration, HotkeyError> {
        let key = key_code(binding.key());
        let required = required_flags(modifiers);
        let tapping = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();

        let thread_tx = tx.clone();
        let thread_tapping = Arc::clone(&tapping);
        let thread = thread::Builder::new()
            .name("hotkey-event-tap".to_string())
            .spawn(move || {
                info!(id, "event tap thread started");
                run_event_tap(key, required, thread_tx, thread_tapping, init_tx);
                info!(id, "event tap thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(TapRegistration {
                tapping,
                thread: Some(thread),
                events: Some(rx),
                wake: tx,
            }),
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(HotkeyError::denied(binding, reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(HotkeyError::ListenerStart(
                    "event tap thread exited during registration".to_string(),
                ))
            }
        }
    }

    fn unregister(&mut self, mut registration: TapRegistration) {
        registration.tapping.store(false, Ordering::SeqCst);
        if let Some(thread) = registration.thread.take() {
            if thread.join().is_err() {
                warn!("event tap thread panicked");
            }
        }
    }

    fn start_listener(
        &mut self,
        registration: &mut TapRegistration,
        on_fire: OnFire,
    ) -> Result<ListenerHandle, HotkeyError> {
        let events = registration
            .events
            .take()
            .ok_or_else(|| HotkeyError::ListenerStart("listener already started".to_string()))?;
        spawn_push(events, registration.wake.clone(), on_fire)
    }
}
