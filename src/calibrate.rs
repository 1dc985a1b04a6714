//! Auto-repeat rate calibration
//!
//! Measures the platform's native key repeat interval while a key is held
//! down (by a person or a rig). The first `warmup` presses are skipped so the
//! initial repeat delay does not skew the result; the mean gap over the next
//! `window` presses is the measured interval.

use crate::config::CalibrationConfig;
use crate::keyboard::{InputSource, KeyCode, KeyEvent, KeyEventType, Subscription};
use crate::utils::GapStats;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    /// The sampling window did not complete before the fail-safe deadline
    #[error("calibration timed out after {waited:?}: received {received} of {needed} key repeats")]
    Timeout {
        received: u32,
        needed: u32,
        waited: Duration,
    },
    #[error("invalid calibration config: {0}")]
    InvalidConfig(&'static str),
}

/// A successful measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Mean time between repeats
    pub interval: Duration,
    /// Time from the first to the last sampled press
    pub elapsed: Duration,
    /// Number of repeat intervals averaged
    pub samples: u32,
    pub min_gap: Option<Duration>,
    pub max_gap: Option<Duration>,
    pub jitter: Option<Duration>,
}

impl Calibration {
    pub fn interval_ms(&self) -> f64 {
        self.interval.as_secs_f64() * 1000.0
    }

    /// Interval rounded to whole milliseconds, as stored in the config
    pub fn interval_ms_rounded(&self) -> u64 {
        self.interval_ms().round() as u64
    }
}

#[derive(Debug)]
struct Progress {
    warmup: u32,
    needed: u32,
    count: u32,
    start: Option<Instant>,
    last: Option<Instant>,
    end: Option<Instant>,
    gaps: GapStats,
}

impl Progress {
    fn new(config: &CalibrationConfig) -> Self {
        Self {
            warmup: config.warmup,
            needed: config.needed(),
            count: 0,
            start: None,
            last: None,
            end: None,
            gaps: GapStats::with_capacity(config.window as usize),
        }
    }

    fn record(&mut self, now: Instant) {
        if self.end.is_some() {
            return;
        }
        self.count += 1;
        if self.count == self.warmup {
            self.start = Some(now);
        } else if self.count > self.warmup {
            if let Some(last) = self.last {
                self.gaps.record(now.saturating_duration_since(last));
            }
            if self.count == self.needed {
                self.end = Some(now);
            }
        }
        if self.count >= self.warmup {
            self.last = Some(now);
        }
    }

    fn finish(&self, window: u32) -> Option<Calibration> {
        let (start, end) = (self.start?, self.end?);
        let elapsed = end.saturating_duration_since(start);
        Some(Calibration {
            interval: elapsed / window,
            elapsed,
            samples: window,
            min_gap: self.gaps.min(),
            max_gap: self.gaps.max(),
            jitter: self.gaps.jitter(),
        })
    }
}

/// One-shot repeat interval measurement
#[derive(Debug, Clone)]
pub struct RepeatCalibrator {
    config: CalibrationConfig,
    key: Option<KeyCode>,
}

impl RepeatCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config, key: None }
    }

    /// Only count presses of `key`
    pub fn with_key(mut self, key: KeyCode) -> Self {
        self.key = Some(key);
        self
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    fn validate(&self) -> Result<(), CalibrationError> {
        let c = &self.config;
        if c.warmup == 0 {
            return Err(CalibrationError::InvalidConfig("warmup must be at least 1"));
        }
        if c.window == 0 {
            return Err(CalibrationError::InvalidConfig("window must be at least 1"));
        }
        if c.first_check_ms == 0 || c.poll_interval_ms == 0 {
            return Err(CalibrationError::InvalidConfig("check intervals must be non-zero"));
        }
        Ok(())
    }

    /// Listen to `source` until the window completes or the fail-safe expires.
    ///
    /// The measurement listener is removed on every exit path, including when
    /// the returned future is dropped.
    pub async fn measure<S: InputSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<Calibration, CalibrationError> {
        self.validate()?;

        let progress = Rc::new(RefCell::new(Progress::new(&self.config)));
        let recorder = Rc::clone(&progress);
        let filter = self.key;
        let _subscription = Subscription::new(
            source,
            KeyEventType::Press,
            Rc::new(move |event: &KeyEvent| {
                if filter.map_or(true, |key| key == event.key) {
                    recorder.borrow_mut().record(Instant::now());
                }
            }),
        );

        let window = self.config.window;
        let first_check = self.config.first_check();
        let poll_interval = self.config.poll_interval();
        let fail_safe = self.config.fail_safe();
        log::info!(
            "calibrating: sampling {} repeats after {} warmup presses",
            window,
            self.config.warmup
        );

        let checks = async {
            tokio::time::sleep(first_check).await;
            loop {
                if let Some(calibration) = progress.borrow().finish(window) {
                    return calibration;
                }
                log::debug!("calibration at {} presses", progress.borrow().count);
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(fail_safe, checks).await {
            Ok(calibration) => {
                log::info!(
                    "measured repeat interval {:.3}ms over {} samples",
                    calibration.interval_ms(),
                    calibration.samples
                );
                Ok(calibration)
            }
            Err(_) => {
                let progress = progress.borrow();
                log::warn!(
                    "calibration timed out with {} of {} presses",
                    progress.count,
                    progress.needed
                );
                Err(CalibrationError::Timeout {
                    received: progress.count,
                    needed: progress.needed,
                    waited: fail_safe,
                })
            }
        }
    }
}

/// Measure with the given settings, counting presses of any key
pub async fn measure_repeat_interval<S: InputSource + ?Sized>(
    source: &S,
    config: &CalibrationConfig,
) -> Result<Calibration, CalibrationError> {
    RepeatCalibrator::new(config.clone()).measure(source).await
}
