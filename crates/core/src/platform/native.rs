use enigo::{Axis, Button, Coordinate, Enigo, Keyboard, Mouse, Settings};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use xcap::Monitor;

use crate::error::{CaptureError, ExecutionError};
use crate::keys::Key;
use crate::types::*;
use super::process::SystemProcesses;
use super::{Display, InputDevice, Platform, ProcessControl};

/// Real desktop: `xcap` for capture, `enigo` for input.
pub struct NativePlatform;

impl Platform for NativePlatform {
    fn create_display(&self) -> Result<Box<dyn Display>, CaptureError> {
        primary_monitor()?;
        Ok(Box::new(NativeDisplay))
    }

    fn create_input(&self) -> Result<Box<dyn InputDevice>, ExecutionError> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| ExecutionError::Backend(format!("input init failed: {:?}", e)))?;
        Ok(Box::new(NativeInput { enigo }))
    }

    fn create_processes(&self) -> Box<dyn ProcessControl> {
        Box::new(SystemProcesses::new())
    }
}

fn primary_monitor() -> Result<Monitor, CaptureError> {
    let monitors = Monitor::all().map_err(|e| CaptureError::Backend(format!("list monitors: {}", e)))?;
    let mut fallback = None;
    for m in monitors {
        if m.is_primary() {
            return Ok(m);
        }
        fallback.get_or_insert(m);
    }
    fallback.ok_or(CaptureError::NoDisplay)
}

struct NativeDisplay;

impl Display for NativeDisplay {
    fn bounds(&mut self) -> Result<Rect, CaptureError> {
        let m = primary_monitor()?;
        Ok(Rect::new(m.x(), m.y(), m.width(), m.height()))
    }

    fn grab(&mut self, rect: Rect) -> Result<RgbImage, CaptureError> {
        let m = primary_monitor()?;
        let frame = m
            .capture_image()
            .map_err(|e| CaptureError::AccessDenied(e.to_string()))?;

        // HiDPI: the frame is in physical pixels, `rect` in logical ones.
        let scale = frame.width() as f64 / m.width().max(1) as f64;
        let px = |v: i64| (v as f64 * scale).round().max(0.0) as u32;
        let x = px(rect.left as i64 - m.x() as i64);
        let y = px(rect.top as i64 - m.y() as i64);
        let w = px(rect.width as i64).min(frame.width().saturating_sub(x));
        let h = px(rect.height as i64).min(frame.height().saturating_sub(y));
        if w == 0 || h == 0 {
            return Err(CaptureError::EmptyRegion(rect));
        }

        let cropped = imageops::crop_imm(&frame, x, y, w, h).to_image();
        let rgb = DynamicImage::ImageRgba8(cropped).to_rgb8();
        if rgb.dimensions() == (rect.width, rect.height) {
            return Ok(rgb);
        }
        Ok(imageops::resize(&rgb, rect.width, rect.height, FilterType::Triangle))
    }
}

struct NativeInput {
    enigo: Enigo,
}

fn backend<E: std::fmt::Debug>(what: &str) -> impl FnOnce(E) -> ExecutionError + '_ {
    move |e| ExecutionError::Backend(format!("{} failed: {:?}", what, e))
}

fn enigo_direction(direction: Direction) -> enigo::Direction {
    match direction {
        Direction::Down => enigo::Direction::Press,
        Direction::Up => enigo::Direction::Release,
        Direction::Click => enigo::Direction::Click,
    }
}

fn enigo_key(key: Key) -> Result<enigo::Key, ExecutionError> {
    use enigo::Key as K;
    Ok(match key {
        Key::Char(c) => K::Unicode(c),
        Key::Enter => K::Return,
        Key::Escape => K::Escape,
        Key::Backspace => K::Backspace,
        Key::Delete => K::Delete,
        Key::Tab => K::Tab,
        Key::Space => K::Space,
        Key::Up => K::UpArrow,
        Key::Down => K::DownArrow,
        Key::Left => K::LeftArrow,
        Key::Right => K::RightArrow,
        Key::Home => K::Home,
        Key::End => K::End,
        Key::PageUp => K::PageUp,
        Key::PageDown => K::PageDown,
        Key::CapsLock => K::CapsLock,
        Key::Ctrl => K::Control,
        Key::Alt => K::Alt,
        Key::Shift => K::Shift,
        Key::Meta => K::Meta,
        Key::F(n) => match n {
            1 => K::F1,
            2 => K::F2,
            3 => K::F3,
            4 => K::F4,
            5 => K::F5,
            6 => K::F6,
            7 => K::F7,
            8 => K::F8,
            9 => K::F9,
            10 => K::F10,
            11 => K::F11,
            12 => K::F12,
            13 => K::F13,
            14 => K::F14,
            15 => K::F15,
            16 => K::F16,
            17 => K::F17,
            18 => K::F18,
            19 => K::F19,
            20 => K::F20,
            _ => return Err(ExecutionError::InvalidKey(format!("f{}", n))),
        },
    })
}

impl InputDevice for NativeInput {
    fn cursor(&mut self) -> Result<(i32, i32), ExecutionError> {
        self.enigo.location().map_err(backend("cursor query"))
    }

    fn move_to(&mut self, x: i32, y: i32) -> Result<(), ExecutionError> {
        self.enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(backend("mouse move"))
    }

    fn button(&mut self, button: MouseButton, direction: Direction) -> Result<(), ExecutionError> {
        let btn = match button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
        };
        self.enigo
            .button(btn, enigo_direction(direction))
            .map_err(backend("mouse button"))
    }

    fn scroll(&mut self, amount: i32) -> Result<(), ExecutionError> {
        // enigo scrolls down for positive lengths
        self.enigo
            .scroll(-amount, Axis::Vertical)
            .map_err(backend("scroll"))
    }

    fn key(&mut self, key: Key, direction: Direction) -> Result<(), ExecutionError> {
        let k = enigo_key(key)?;
        self.enigo
            .key(k, enigo_direction(direction))
            .map_err(backend("key"))
    }

    fn text(&mut self, text: &str) -> Result<(), ExecutionError> {
        self.enigo.text(text).map_err(backend("text"))
    }
}
