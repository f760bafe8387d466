//! Global fail-safe hotkey. Pressing it raises the shared abort flag, which
//! the executor checks before every primitive.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
#[cfg(any(target_os = "macos", target_os = "windows"))]
use std::sync::atomic::Ordering;

use crate::logger;

#[cfg(target_os = "macos")]
pub const FAILSAFE_HOTKEY: &str = "Cmd+Shift+X";
#[cfg(target_os = "windows")]
pub const FAILSAFE_HOTKEY: &str = "Ctrl+Shift+X";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const FAILSAFE_HOTKEY: &str = "none";

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn trip(abort: &AtomicBool) {
    // only log the edge; holding the keys auto-repeats
    if !abort.swap(true, Ordering::AcqRel) {
        logger::warn(&format!("fail-safe {} pressed, stopping", FAILSAFE_HOTKEY));
    }
}

/// Listen for Cmd+Shift+X on a background thread (needs Accessibility permission).
///
/// macOS disables a tap whose callback is slow or that the user interrupts;
/// the callback turns it back on so the fail-safe stays armed.
#[cfg(target_os = "macos")]
pub fn start_failsafe_listener(abort: Arc<AtomicBool>) {
    use std::ffi::c_void;
    use std::sync::atomic::AtomicPtr;

    type EventRef = *mut c_void;
    type MachPort = *mut c_void;
    type Callback = unsafe extern "C" fn(*mut c_void, u32, EventRef, *mut c_void) -> EventRef;

    const HID_EVENT_TAP: u32 = 0;
    const HEAD_INSERT: u32 = 0;
    const LISTEN_ONLY: u32 = 1;
    const KEY_DOWN: u32 = 10;
    const TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFF_FFFE;
    const TAP_DISABLED_BY_USER_INPUT: u32 = 0xFFFF_FFFF;
    const KEYCODE_FIELD: u32 = 9;
    const KEYCODE_X: i64 = 7;

    const MASK_SHIFT: u64 = 0x0002_0000;
    const MASK_CONTROL: u64 = 0x0004_0000;
    const MASK_ALTERNATE: u64 = 0x0008_0000;
    const MASK_COMMAND: u64 = 0x0010_0000;

    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        fn CGEventTapCreate(tap: u32, place: u32, options: u32, mask: u64, cb: Callback, info: *mut c_void) -> MachPort;
        fn CGEventTapEnable(tap: MachPort, enable: bool);
        fn CGEventGetFlags(event: EventRef) -> u64;
        fn CGEventGetIntegerValueField(event: EventRef, field: u32) -> i64;
    }

    #[link(name = "CoreFoundation", kind = "framework")]
    extern "C" {
        fn CFMachPortCreateRunLoopSource(alloc: *const c_void, port: MachPort, order: i64) -> *mut c_void;
        fn CFRunLoopGetCurrent() -> *mut c_void;
        fn CFRunLoopAddSource(rl: *mut c_void, source: *mut c_void, mode: *const c_void);
        fn CFRunLoopRun();
        static kCFRunLoopCommonModes: *const c_void;
    }

    /// Lives for the rest of the process once the tap is installed.
    struct Listener {
        abort: Arc<AtomicBool>,
        tap: AtomicPtr<c_void>,
    }

    unsafe extern "C" fn on_key(_proxy: *mut c_void, kind: u32, event: EventRef, info: *mut c_void) -> EventRef {
        unsafe {
            let listener = &*(info as *const Listener);
            match kind {
                TAP_DISABLED_BY_TIMEOUT | TAP_DISABLED_BY_USER_INPUT => {
                    let tap = listener.tap.load(Ordering::Acquire);
                    if !tap.is_null() {
                        CGEventTapEnable(tap, true);
                        logger::warn("fail-safe event tap was disabled by the system; re-enabled");
                    }
                }
                KEY_DOWN => {
                    let flags = CGEventGetFlags(event) & (MASK_SHIFT | MASK_CONTROL | MASK_ALTERNATE | MASK_COMMAND);
                    if CGEventGetIntegerValueField(event, KEYCODE_FIELD) == KEYCODE_X && flags == MASK_COMMAND | MASK_SHIFT {
                        trip(&listener.abort);
                    }
                }
                _ => {}
            }
            event
        }
    }

    std::thread::spawn(move || unsafe {
        let info = Box::into_raw(Box::new(Listener { abort, tap: AtomicPtr::new(std::ptr::null_mut()) }));
        let tap = CGEventTapCreate(HID_EVENT_TAP, HEAD_INSERT, LISTEN_ONLY, 1 << KEY_DOWN, on_key, info as *mut c_void);
        if tap.is_null() {
            logger::error("fail-safe hotkey unavailable: grant Accessibility permission to your terminal");
            drop(Box::from_raw(info));
            return;
        }
        (*info).tap.store(tap, Ordering::Release);
        let source = CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
        CFRunLoopAddSource(CFRunLoopGetCurrent(), source, kCFRunLoopCommonModes);
        CGEventTapEnable(tap, true);
        logger::info(&format!("fail-safe hotkey {} armed", FAILSAFE_HOTKEY));
        CFRunLoopRun();
    });
}

/// Listen for Ctrl+Shift+X on a background thread.
#[cfg(target_os = "windows")]
pub fn start_failsafe_listener(abort: Arc<AtomicBool>) {
    use std::ffi::c_void;

    #[repr(C)]
    struct Msg {
        hwnd: *mut c_void,
        message: u32,
        w_param: usize,
        l_param: isize,
        time: u32,
        pt: [i32; 2],
    }

    const MOD_CONTROL: u32 = 0x0002;
    const MOD_SHIFT: u32 = 0x0004;
    const MOD_NOREPEAT: u32 = 0x4000;
    const VK_X: u32 = 0x58;
    const WM_HOTKEY: u32 = 0x0312;
    const HOTKEY_ID: i32 = 0xD5;

    #[link(name = "user32")]
    extern "system" {
        fn RegisterHotKey(hwnd: *mut c_void, id: i32, modifiers: u32, vk: u32) -> i32;
        fn GetMessageW(msg: *mut Msg, hwnd: *mut c_void, min: u32, max: u32) -> i32;
    }

    std::thread::spawn(move || unsafe {
        if RegisterHotKey(std::ptr::null_mut(), HOTKEY_ID, MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT, VK_X) == 0 {
            logger::error("fail-safe hotkey Ctrl+Shift+X is taken by another application");
            return;
        }
        logger::info(&format!("fail-safe hotkey {} armed", FAILSAFE_HOTKEY));

        let mut msg: Msg = std::mem::zeroed();
        while GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) > 0 {
            if msg.message == WM_HOTKEY && msg.w_param == HOTKEY_ID as usize {
                trip(&abort);
            }
        }
    });
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn start_failsafe_listener(_abort: Arc<AtomicBool>) {
    logger::warn("no global fail-safe hotkey on this platform; use the TUI stop key or the (0,0) corner");
}

/// AppleScript that raises the terminal hosting us. Terminals export their
/// bundle id to child processes; otherwise fall back to the parent pid.
#[cfg(target_os = "macos")]
fn raise_terminal_script(bundle_id: Option<&str>, parent_pid: i32) -> String {
    match bundle_id {
        Some(id) if !id.is_empty() => format!("tell application id \"{}\" to activate", id.replace('"', "")),
        _ => format!(
            "tell application \"System Events\" to set frontmost of first process whose unix id is {} to true",
            parent_pid
        ),
    }
}

/// Bring the terminal running us to the front after a fail-safe stop.
#[cfg(target_os = "macos")]
pub fn activate_terminal() {
    let bundle_id = std::env::var("__CFBundleIdentifier").ok();
    let script = raise_terminal_script(bundle_id.as_deref(), unsafe { libc::getppid() });
    let raised = std::process::Command::new("osascript")
        .arg("-e")
        .arg(&script)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    if !matches!(raised, Ok(status) if status.success()) {
        logger::warn("could not bring the terminal to the front");
    }
}

#[cfg(target_os = "windows")]
pub fn activate_terminal() {
    use std::ffi::c_void;

    const SW_RESTORE: i32 = 9;

    extern "system" {
        fn GetConsoleWindow() -> *mut c_void;
        fn SetForegroundWindow(hwnd: *mut c_void) -> i32;
        fn ShowWindow(hwnd: *mut c_void, cmd: i32) -> i32;
    }

    let hwnd = unsafe { GetConsoleWindow() };
    // hosts like Windows Terminal own no console window
    if hwnd.is_null() {
        return;
    }
    if unsafe { ShowWindow(hwnd, SW_RESTORE); SetForegroundWindow(hwnd) } == 0 {
        logger::warn("could not bring the console window to the front");
    }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn activate_terminal() {}
