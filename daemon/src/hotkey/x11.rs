//! Linux backend using X11 passive key grabs
//!
//! Registration grabs the key on the root window (once per CapsLock /
//! NumLock combination so locks do not break the hotkey). A polling thread
//! owns the connection, turns matching `KeyPress` events into
//! [`Signal::Fired`] on a channel, and releases the grabs when it exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, GrabMode, ModMask, Window};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use super::backend::{HotkeyBackend, HotkeyError};
use super::binding::{HotkeyBinding, Key};
use super::listener::{spawn_push, ListenerHandle, OnFire, Signal};
use super::translate::{ModifierSet, NativeModifier, Platform};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// Values from X11/keysymdef.h
const XK_SPACE: u32 = 0x0020;
const XK_L: u32 = 0x006c;
const XK_N: u32 = 0x006e;
const XK_S: u32 = 0x0073;
const XK_T: u32 = 0x0074;

fn keysym(key: Key) -> u32 {
    match key {
        Key::L => XK_L,
        Key::S => XK_S,
        Key::T => XK_T,
        Key::N => XK_N,
        Key::Space => XK_SPACE,
    }
}

/// Modifier bits that take part in matching; lock bits are ignored
fn relevant_mask() -> u16 {
    u16::from(ModMask::SHIFT | ModMask::CONTROL | ModMask::M1 | ModMask::M4)
}

/// CapsLock and NumLock (usually Mod2) combinations to grab alongside
fn lock_variants() -> [u16; 4] {
    let lock = u16::from(ModMask::LOCK);
    let num = u16::from(ModMask::M2);
    [0, lock, num, lock | num]
}

fn required_mask(modifiers: &ModifierSet) -> u16 {
    modifiers.iter().fold(0u16, |mask, modifier| {
        mask | u16::from(match modifier {
            NativeModifier::Control => ModMask::CONTROL,
            NativeModifier::Alt | NativeModifier::Option => ModMask::M1,
            NativeModifier::Shift => ModMask::SHIFT,
            NativeModifier::Command => ModMask::M4,
        })
    })
}

fn keycode_for_keysym<C: Connection>(conn: &C, keysym: u32) -> Result<Option<u8>, String> {
    let setup = conn.setup();
    let min = setup.min_keycode;
    let max = setup.max_keycode;
    if max < min {
        return Ok(None);
    }

    let count = max - min + 1;
    let reply = conn
        .get_keyboard_mapping(min, count)
        .map_err(|e| e.to_string())?
        .reply()
        .map_err(|e| e.to_string())?;

    let per = reply.keysyms_per_keycode as usize;
    if per == 0 {
        return Ok(None);
    }

    Ok(reply
        .keysyms
        .chunks(per)
        .position(|chunk| chunk.contains(&keysym))
        .map(|i| min + i as u8))
}

fn ungrab_all<C: Connection>(conn: &C, root: Window, keycode: u8, masks: &[u16]) {
    for &mask in masks {
        if let Err(e) = conn.ungrab_key(keycode, root, ModMask::from(mask)) {
            warn!(error = %e, mask, "ungrab_key failed");
        }
    }
    if let Err(e) = conn.flush() {
        warn!(error = %e, "failed to flush X11 connection");
    }
}

struct ActiveGrab {
    root: Window,
    keycode: u8,
    required: u16,
    grabbed: Vec<u16>,
}

fn poll_events(conn: RustConnection, grab: ActiveGrab, polling: Arc<AtomicBool>, tx: Sender<Signal>) {
    let mut pressed = false;
    while polling.load(Ordering::SeqCst) {
        match conn.poll_for_event() {
            Ok(Some(Event::KeyPress(ev))) if ev.detail == grab.keycode => {
                let state: u16 = ev.state.into();
                if state & relevant_mask() == grab.required && !pressed {
                    pressed = true;
                    let _ = tx.send(Signal::Fired);
                }
            }
            Ok(Some(Event::KeyRelease(ev))) if ev.detail == grab.keycode => {
                pressed = false;
            }
            Ok(Some(_)) => {}
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!(error = %e, "X11 connection failed, hotkey polling stopped");
                break;
            }
        }
    }

    ungrab_all(&conn, grab.root, grab.keycode, &grab.grabbed);
    debug!(keycode = grab.keycode, "X11 key grabs released");
}

#[derive(Debug, Default)]
pub struct X11Backend;

impl X11Backend {
    pub fn new() -> Self {
        Self
    }
}

pub struct GrabRegistration {
    polling: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
    events: Option<Receiver<Signal>>,
    wake: Sender<Signal>,
}

impl HotkeyBackend for X11Backend {
    type Registration = GrabRegistration;

    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn register(
        &mut self,
        id: u32,
        binding: &HotkeyBinding,
        modifiers: &ModifierSet,
    ) -> Result<GrabRegistration, HotkeyError> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(|e| HotkeyError::ListenerStart(format!("cannot connect to X11: {e}")))?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| HotkeyError::ListenerStart(format!("X11 screen {screen_num} missing")))?;

        let keycode = keycode_for_keysym(&conn, keysym(binding.key()))
            .map_err(HotkeyError::ListenerStart)?
            .ok_or_else(|| HotkeyError::denied(binding, "key is not on the current keyboard map"))?;
        let required = required_mask(modifiers);

        let mut grabbed = Vec::new();
        for extra in lock_variants() {
            let mask = required | extra;
            let result = conn
                .grab_key(
                    false,
                    root,
                    ModMask::from(mask),
                    keycode,
                    GrabMode::ASYNC,
                    GrabMode::ASYNC,
                )
                .map_err(|e| e.to_string())
                .and_then(|cookie| cookie.check().map_err(|e| e.to_string()));

            if let Err(reason) = result {
                ungrab_all(&conn, root, keycode, &grabbed);
                return Err(HotkeyError::denied(
                    binding,
                    format!("key grab refused, another client may own it: {reason}"),
                ));
            }
            grabbed.push(mask);
        }

        info!(id, keycode, required = format_args!("0x{required:x}"), "X11 key grabs active");

        let polling = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let grab = ActiveGrab {
            root,
            keycode,
            required,
            grabbed,
        };

        let thread_polling = Arc::clone(&polling);
        let thread_tx = tx.clone();
        let poller = thread::Builder::new()
            .name("hotkey-x11-poll".to_string())
            .spawn(move || poll_events(conn, grab, thread_polling, thread_tx))
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        Ok(GrabRegistration {
            polling,
            poller: Some(poller),
            events: Some(rx),
            wake: tx,
        })
    }

    fn unregister(&mut self, mut registration: GrabRegistration) {
        registration.polling.store(false, Ordering::SeqCst);
        if let Some(poller) = registration.poller.take() {
            if poller.join().is_err() {
                warn!("X11 poll thread panicked");
            }
        }
    }

    fn start_listener(
        &mut self,
        registration: &mut GrabRegistration,
        on_fire: OnFire,
    ) -> Result<ListenerHandle, HotkeyError> {
        let events = registration
            .events
            .take()
            .ok_or_else(|| HotkeyError::ListenerStart("listener already started".to_string()))?;
        spawn_push(events, registration.wake.clone(), on_fire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::binding::Modifier;
    use crate::hotkey::translate::translate;

    #[test]
    fn test_required_mask_for_ctrl_shift() {
        let set = translate(&[Modifier::Ctrl, Modifier::Shift], Platform::Linux);
        let mask = required_mask(&set);
        assert_eq!(mask, u16::from(ModMask::CONTROL) | u16::from(ModMask::SHIFT));
    }

    #[test]
    fn test_alt_maps_to_mod1() {
        let set = translate(&[Modifier::Alt], Platform::Linux);
        assert_eq!(required_mask(&set), u16::from(ModMask::M1));
    }

    #[test]
    fn test_lock_bits_are_not_relevant() {
        let relevant = relevant_mask();
        for variant in lock_variants() {
            assert_eq!(variant & relevant, 0);
        }
    }
}
