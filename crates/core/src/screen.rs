use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::error::CaptureError;
use crate::logger;
use crate::platform::Display;
use crate::types::*;

/// Count pixels that differ between two equally sized captures.
///
/// The per-channel absolute difference is reduced to one gray value with the
/// fixed-point ITU-R 601 weights (R 4899, G 9617, B 1868, >>14); a pixel counts
/// when that gray value is non-zero. Returns None when the sizes differ.
pub fn changed_pixels(a: &RgbImage, b: &RgbImage) -> Option<u64> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let count = a
        .as_raw()
        .chunks_exact(3)
        .zip(b.as_raw().chunks_exact(3))
        .filter(|(p, q)| {
            let dr = p[0].abs_diff(q[0]) as u32;
            let dg = p[1].abs_diff(q[1]) as u32;
            let db = p[2].abs_diff(q[2]) as u32;
            (dr * 4899 + dg * 9617 + db * 1868 + (1 << 13)) >> 14 != 0
        })
        .count();
    Some(count as u64)
}

/// Captures display state and detects change between captures.
pub struct ScreenSource {
    display: Box<dyn Display>,
    last: Option<ScreenState>,
    stop: Arc<AtomicBool>,
}

impl ScreenSource {
    pub fn new(display: Box<dyn Display>) -> Self {
        Self {
            display,
            last: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn screen_size(&mut self) -> Result<(u32, u32), CaptureError> {
        let b = self.display.bounds()?;
        Ok((b.width, b.height))
    }

    /// The most recent successful capture.
    pub fn last_capture(&self) -> Option<&ScreenState> {
        self.last.as_ref()
    }

    pub fn capture_full(&mut self) -> Result<ScreenState, CaptureError> {
        let bounds = self.display.bounds()?;
        let image = self.display.grab(bounds)?;
        Ok(self.remember(ScreenState::new(image, None)))
    }

    /// Capture a rectangle. Parts outside the display are clipped off; a
    /// rectangle with nothing left after clipping is an error.
    pub fn capture_region(&mut self, left: i32, top: i32, width: u32, height: u32) -> Result<ScreenState, CaptureError> {
        let wanted = Rect::new(left, top, width, height);
        let bounds = self.display.bounds()?;
        let rect = wanted.clamp_to(&bounds).ok_or(CaptureError::EmptyRegion(wanted))?;
        if rect != wanted {
            logger::warn_p("screen", &format!("region {:?} clipped to {:?}", wanted, rect));
        }
        let image = self.display.grab(rect)?;
        Ok(self.remember(ScreenState::new(image, Some(rect))))
    }

    fn remember(&mut self, state: ScreenState) -> ScreenState {
        self.last = Some(state.clone());
        state
    }

    /// Capture the full display and report whether more than `threshold`
    /// pixels changed since the previous capture. No previous capture, or one
    /// of a different size, counts as a change.
    pub fn try_detect_change(&mut self, threshold: u64) -> Result<bool, CaptureError> {
        let prior = self.last.take();
        let current = match self.capture_full() {
            Ok(s) => s,
            Err(e) => {
                self.last = prior;
                return Err(e);
            }
        };
        let Some(prior) = prior else { return Ok(true) };
        Ok(match changed_pixels(prior.image(), current.image()) {
            Some(n) => n > threshold,
            None => true,
        })
    }

    pub fn detect_change(&mut self, threshold: u64) -> bool {
        self.try_detect_change(threshold).unwrap_or_else(|e| {
            logger::error_p("screen", &format!("change detection failed: {}", e));
            false
        })
    }

    /// Persist `state` as PNG or BMP (by extension). Errors are logged, never raised.
    pub fn save_to_file(&self, state: &ScreenState, path: &Path) -> bool {
        match state.save(path) {
            Ok(()) => true,
            Err(e) => {
                logger::error_p("screen", &format!("saving {} failed: {}", path.display(), e));
                false
            }
        }
    }

    /// Capture (optionally a region) and save in one step.
    pub fn capture_to_file(&mut self, path: &Path, region: Option<Rect>) -> bool {
        let captured = match region {
            Some(r) => self.capture_region(r.left, r.top, r.width, r.height),
            None => self.capture_full(),
        };
        match captured {
            Ok(state) => self.save_to_file(&state, path),
            Err(e) => {
                logger::error_p("screen", &format!("capture failed: {}", e));
                false
            }
        }
    }

    /// Flag that ends a running [`ScreenSource::monitor`] loop when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stop_monitoring(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Blocking sleep-loop: every `interval`, run change detection and hand
    /// changed captures to `on_change`. Returns once the stop flag is set.
    ///
    /// The flag is cleared on exit, so a stop requested before the loop
    /// starts still ends it and the next call runs normally.
    pub fn monitor(&mut self, interval: Duration, threshold: u64, mut on_change: impl FnMut(&ScreenState)) {
        logger::info_p("screen", &format!("monitoring every {:?}", interval));
        while !self.stop.load(Ordering::Acquire) {
            let started = Instant::now();
            if self.detect_change(threshold) {
                if let Some(state) = &self.last {
                    on_change(state);
                }
            }
            // sleep in short slices so a stop request is noticed promptly
            while !self.stop.load(Ordering::Acquire) {
                let left = interval.saturating_sub(started.elapsed());
                if left.is_zero() {
                    break;
                }
                std::thread::sleep(left.min(Duration::from_millis(50)));
            }
        }
        self.stop.store(false, Ordering::Release);
        logger::info_p("screen", "monitoring stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::StubPlatform;
    use crate::platform::Platform;

    fn source(stub: &StubPlatform) -> ScreenSource {
        ScreenSource::new(stub.create_display().unwrap())
    }

    #[test]
    fn test_capture_full_shape() {
        let stub = StubPlatform::with_size(320, 200);
        let mut screen = source(&stub);
        let state = screen.capture_full().unwrap();
        assert_eq!(state.shape(), (200, 320, 3));
        assert_eq!(state.region(), None);
        assert_eq!(screen.screen_size().unwrap(), (320, 200));
        assert!(screen.last_capture().is_some());
    }

    #[test]
    fn test_capture_region_pixels() {
        let stub = StubPlatform::new();
        stub.paint(Rect::new(100, 100, 10, 10), [255, 0, 0]);
        let mut screen = source(&stub);
        let state = screen.capture_region(100, 100, 400, 300).unwrap();
        assert_eq!(state.shape(), (300, 400, 3));
        assert_eq!(state.region(), Some(Rect::new(100, 100, 400, 300)));
        assert_eq!(state.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(state.pixel(9, 9), Some([255, 0, 0]));
        assert_ne!(state.pixel(10, 10), Some([255, 0, 0]));
    }

    #[test]
    fn test_region_is_clipped_to_display() {
        let stub = StubPlatform::with_size(640, 480);
        let mut screen = source(&stub);
        let state = screen.capture_region(600, -20, 100, 100).unwrap();
        assert_eq!(state.region(), Some(Rect::new(600, 0, 40, 80)));
        assert_eq!(state.shape(), (80, 40, 3));
    }

    #[test]
    fn test_region_fully_outside_fails() {
        let stub = StubPlatform::with_size(640, 480);
        let mut screen = source(&stub);
        let err = screen.capture_region(700, 0, 10, 10).unwrap_err();
        assert!(matches!(err, CaptureError::EmptyRegion(_)));
        assert!(matches!(screen.capture_region(0, 0, 0, 10), Err(CaptureError::EmptyRegion(_))));
    }

    #[test]
    fn test_capture_denied() {
        let stub = StubPlatform::new();
        stub.lock().deny_capture = true;
        let mut screen = source(&stub);
        assert_eq!(screen.capture_full().unwrap_err().code(), "access_denied");
        assert!(!screen.detect_change(0));
    }

    #[test]
    fn test_first_detect_change_is_true() {
        let stub = StubPlatform::new();
        let mut screen = source(&stub);
        assert!(screen.detect_change(1_000_000_000));
    }

    #[test]
    fn test_identical_captures_are_unchanged() {
        let stub = StubPlatform::new();
        let mut screen = source(&stub);
        assert!(screen.detect_change(1));
        assert!(!screen.detect_change(1));
        assert!(!screen.detect_change(1));
    }

    #[test]
    fn test_change_above_threshold() {
        let stub = StubPlatform::new();
        stub.paint(Rect::new(0, 0, 60, 60), [0, 0, 0]);
        let mut screen = source(&stub);
        screen.detect_change(0);
        // exactly 2500 changed pixels does not exceed a threshold of 2500
        stub.paint(Rect::new(0, 0, 50, 50), [200, 200, 200]);
        assert!(!screen.detect_change(2500));
        stub.paint(Rect::new(0, 0, 60, 60), [50, 50, 50]);
        assert!(screen.detect_change(2500));
    }

    #[test]
    fn test_prior_region_capture_counts_as_change() {
        let stub = StubPlatform::new();
        let mut screen = source(&stub);
        screen.capture_region(0, 0, 10, 10).unwrap();
        assert!(screen.detect_change(1_000_000));
    }

    #[test]
    fn test_changed_pixels_gray_reduction() {
        let a = RgbImage::from_pixel(2, 1, image::Rgb([10, 10, 10]));
        let mut b = a.clone();
        // a difference of 1 in blue alone rounds to gray 0
        b.put_pixel(0, 0, image::Rgb([10, 10, 11]));
        assert_eq!(changed_pixels(&a, &b), Some(0));
        b.put_pixel(1, 0, image::Rgb([10, 12, 10]));
        assert_eq!(changed_pixels(&a, &b), Some(1));
        assert_eq!(changed_pixels(&a, &RgbImage::new(1, 1)), None);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubPlatform::new();
        let mut screen = source(&stub);
        let state = screen.capture_region(100, 100, 400, 300).unwrap();

        for name in ["region.png", "region.bmp"] {
            let path = dir.path().join(name);
            assert!(screen.save_to_file(&state, &path));
            let loaded = ScreenState::load(&path).unwrap();
            assert_eq!(loaded.shape(), (300, 400, 3));
            assert_eq!(loaded.pixels(), state.pixels());
        }
    }

    #[test]
    fn test_save_fails_softly() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubPlatform::with_size(8, 8);
        let mut screen = source(&stub);
        let state = screen.capture_full().unwrap();
        assert!(!screen.save_to_file(&state, &dir.path().join("shot.jpg")));
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        assert!(!screen.save_to_file(&state, &blocker.join("shot.png")));
    }

    #[test]
    fn test_capture_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubPlatform::with_size(64, 64);
        let mut screen = source(&stub);
        let path = dir.path().join("nested").join("full.png");
        assert!(screen.capture_to_file(&path, None));
        assert_eq!(ScreenState::load(&path).unwrap().shape(), (64, 64, 3));
        assert!(!screen.capture_to_file(&path, Some(Rect::new(100, 100, 5, 5))));
    }

    #[test]
    fn test_monitor_stops_on_flag() {
        let stub = StubPlatform::with_size(16, 16);
        let mut screen = source(&stub);
        let stop = screen.stop_handle();
        let mut seen = 0;
        screen.monitor(Duration::from_millis(1), 0, |_| {
            seen += 1;
            stop.store(true, Ordering::Release);
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_stop_before_monitor_is_kept() {
        let stub = StubPlatform::with_size(16, 16);
        let mut screen = source(&stub);
        screen.stop_monitoring();
        let mut seen = 0;
        screen.monitor(Duration::from_millis(1), 0, |_| seen += 1);
        assert_eq!(seen, 0);

        // the flag was consumed; a later loop runs until stopped again
        let stop = screen.stop_handle();
        screen.monitor(Duration::from_millis(1), 0, |_| {
            seen += 1;
            stop.store(true, Ordering::Release);
        });
        assert_eq!(seen, 1);
    }
}
