//! Windows backend using `RegisterHotKey`
//!
//! A hotkey registered without a window is delivered as `WM_HOTKEY` to the
//! message queue of the thread that registered it. Registration therefore
//! happens on a dedicated pump thread, and that same thread is the
//! listener: it blocks in `GetMessageW`, filters for our `WM_HOTKEY`, and
//! dispatches everything else unchanged. Stopping posts `WM_QUIT` to it.
//!
//! Because the registration is owned by the pump thread, stopping the
//! listener also releases the OS registration. Unregistering afterwards
//! only updates bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};
use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    RegisterHotKey, UnregisterHotKey, HOT_KEY_MODIFIERS, MOD_ALT, MOD_CONTROL, MOD_NOREPEAT,
    MOD_SHIFT, MOD_WIN, VK_L, VK_N, VK_S, VK_SPACE, VK_T,
};
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW, TranslateMessage, MSG,
    PM_NOREMOVE, WM_HOTKEY, WM_QUIT, WM_USER,
};

use super::backend::{HotkeyBackend, HotkeyError};
use super::binding::{HotkeyBinding, Key};
use super::listener::{FireGate, ListenerHandle, OnFire, STOP_TIMEOUT};
use super::translate::{ModifierSet, NativeModifier, Platform};

/// Gate installed by `start_listener`; fires before that are suppressed
type GateSlot = Arc<OnceLock<Arc<FireGate>>>;

#[derive(Debug, Default)]
pub struct Win32Backend;

impl Win32Backend {
    pub fn new() -> Self {
        Self
    }
}

struct Pump {
    thread: JoinHandle<()>,
    done: Receiver<()>,
}

pub struct PumpRegistration {
    id: u32,
    thread_id: u32,
    alive: Arc<AtomicBool>,
    slot: GateSlot,
    /// Present until a listener takes ownership of the pump thread
    pump: Option<Pump>,
}

fn virtual_key(key: Key) -> u32 {
    let vk = match key {
        Key::L => VK_L,
        Key::S => VK_S,
        Key::T => VK_T,
        Key::N => VK_N,
        Key::Space => VK_SPACE,
    };
    u32::from(vk.0)
}

fn hotkey_modifiers(modifiers: &ModifierSet) -> HOT_KEY_MODIFIERS {
    let mut mods = MOD_NOREPEAT;
    for modifier in modifiers.iter() {
        mods = mods
            | match modifier {
                NativeModifier::Control => MOD_CONTROL,
                NativeModifier::Alt | NativeModifier::Option => MOD_ALT,
                NativeModifier::Shift => MOD_SHIFT,
                NativeModifier::Command => MOD_WIN,
            };
    }
    mods
}

fn post_quit(thread_id: u32, alive: &AtomicBool) {
    if !alive.load(Ordering::SeqCst) {
        return;
    }
    unsafe {
        if let Err(e) = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) {
            warn!(thread_id, error = %e, "failed to post WM_QUIT to hotkey pump");
        }
    }
}

/// What the pump does with one `GetMessageW` result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpStep {
    Quit,
    Failed,
    Hotkey,
    Dispatch,
}

/// `ret` is the raw `GetMessageW` return: 0 for `WM_QUIT`, -1 on error
fn pump_step(ret: i32, msg: &MSG, id: u32) -> PumpStep {
    match ret {
        0 => PumpStep::Quit,
        -1 => PumpStep::Failed,
        _ if msg.message == WM_HOTKEY && msg.wParam.0 == id as usize => PumpStep::Hotkey,
        _ => PumpStep::Dispatch,
    }
}

/// Body of the pump thread after a successful registration
unsafe fn pump_messages(id: u32, slot: &GateSlot) {
    let mut msg = MSG::default();
    loop {
        let ret = GetMessageW(&mut msg, HWND::default(), 0, 0);
        match pump_step(ret.0, &msg, id) {
            PumpStep::Quit => {
                debug!("hotkey pump received WM_QUIT");
                break;
            }
            PumpStep::Failed => {
                warn!("GetMessageW failed, hotkey pump exiting");
                break;
            }
            PumpStep::Hotkey => match slot.get() {
                Some(gate) => {
                    gate.fire();
                }
                None => debug!(id, "hotkey fired before listener start, suppressed"),
            },
            PumpStep::Dispatch => {
                let _ = TranslateMessage(&msg);
                let _ = DispatchMessageW(&msg);
            }
        }
    }
}

impl HotkeyBackend for Win32Backend {
    type Registration = PumpRegistration;

    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn register(
        &mut self,
        id: u32,
        binding: &HotkeyBinding,
        modifiers: &ModifierSet,
    ) -> Result<PumpRegistration, HotkeyError> {
        let mods = hotkey_modifiers(modifiers);
        let vk = virtual_key(binding.key());
        let slot: GateSlot = Arc::new(OnceLock::new());
        let alive = Arc::new(AtomicBool::new(true));
        let (init_tx, init_rx) = mpsc::channel::<Result<u32, String>>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let thread_slot = Arc::clone(&slot);
        let thread_alive = Arc::clone(&alive);
        let thread = thread::Builder::new()
            .name("hotkey-pump".to_string())
            .spawn(move || {
                let _done = done_tx;
                unsafe {
                    // Make sure this thread owns a message queue before anyone posts to it
                    let mut msg = MSG::default();
                    let _ = PeekMessageW(&mut msg, HWND::default(), WM_USER, WM_USER, PM_NOREMOVE);

                    if let Err(e) = RegisterHotKey(HWND::default(), id as i32, mods, vk) {
                        thread_alive.store(false, Ordering::SeqCst);
                        let _ = init_tx.send(Err(e.to_string()));
                        return;
                    }
                    let _ = init_tx.send(Ok(GetCurrentThreadId()));

                    info!(id, "hotkey pump running");
                    pump_messages(id, &thread_slot);

                    if let Err(e) = UnregisterHotKey(HWND::default(), id as i32) {
                        warn!(id, error = %e, "UnregisterHotKey failed");
                    }
                }
                thread_alive.store(false, Ordering::SeqCst);
                info!(id, "hotkey pump stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        match init_rx.recv() {
            Ok(Ok(thread_id)) => Ok(PumpRegistration {
                id,
                thread_id,
                alive,
                slot,
                pump: Some(Pump {
                    thread,
                    done: done_rx,
                }),
            }),
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(HotkeyError::denied(binding, reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(HotkeyError::ListenerStart(
                    "hotkey pump exited during registration".to_string(),
                ))
            }
        }
    }

    fn unregister(&mut self, mut registration: PumpRegistration) {
        let Some(pump) = registration.pump.take() else {
            // The listener owns the pump thread; make sure it is asked to quit
            post_quit(registration.thread_id, &registration.alive);
            return;
        };

        post_quit(registration.thread_id, &registration.alive);
        match pump.done.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = pump.thread.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(id = registration.id, "hotkey pump did not exit in time, detaching");
            }
        }
    }

    fn start_listener(
        &mut self,
        registration: &mut PumpRegistration,
        on_fire: OnFire,
    ) -> Result<ListenerHandle, HotkeyError> {
        let pump = registration
            .pump
            .take()
            .ok_or_else(|| HotkeyError::ListenerStart("pump already has a listener".to_string()))?;

        let gate = FireGate::new(on_fire);
        gate.arm();
        if registration.slot.set(Arc::clone(&gate)).is_err() {
            registration.pump = Some(pump);
            return Err(HotkeyError::ListenerStart(
                "pump already has a listener".to_string(),
            ));
        }

        let thread_id = registration.thread_id;
        let alive = Arc::clone(&registration.alive);
        Ok(ListenerHandle::new(
            gate,
            Box::new(move || post_quit(thread_id, &alive)),
            pump.done,
            pump.thread,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::binding::Modifier;
    use crate::hotkey::translate::translate;

    #[test]
    fn test_modifier_flags() {
        let set = translate(&[Modifier::Ctrl, Modifier::Shift], Platform::Windows);
        let mods = hotkey_modifiers(&set);
        assert!(mods.contains(MOD_CONTROL));
        assert!(mods.contains(MOD_SHIFT));
        assert!(mods.contains(MOD_NOREPEAT));
        assert!(!mods.contains(MOD_ALT));
        assert!(!mods.contains(MOD_WIN));
    }

    fn message(message: u32, wparam: usize) -> MSG {
        MSG {
            message,
            wParam: WPARAM(wparam),
            ..MSG::default()
        }
    }

    #[test]
    fn test_pump_routes_only_our_hotkey() {
        assert_eq!(pump_step(1, &message(WM_HOTKEY, 7), 7), PumpStep::Hotkey);
        assert_eq!(pump_step(1, &message(WM_HOTKEY, 8), 7), PumpStep::Dispatch);
        assert_eq!(pump_step(1, &message(WM_USER, 7), 7), PumpStep::Dispatch);
    }

    #[test]
    fn test_pump_exits_on_quit_or_error() {
        assert_eq!(pump_step(0, &message(WM_QUIT, 0), 7), PumpStep::Quit);
        assert_eq!(pump_step(-1, &MSG::default(), 7), PumpStep::Failed);
        // A quit result wins even if the buffer still holds an old hotkey
        assert_eq!(pump_step(0, &message(WM_HOTKEY, 7), 7), PumpStep::Quit);
    }

    #[test]
    fn test_virtual_keys() {
        assert_eq!(virtual_key(Key::L), 0x4C);
        assert_eq!(virtual_key(Key::Space), 0x20);
    }
}
