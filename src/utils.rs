//! Shared utility functions and traits

use std::time::Duration;

/// Extension trait for tracking minimum and maximum values in `Option<T>`.
///
/// ```
/// use keyboard_repeatkit::utils::MinMaxExt;
/// use std::time::Duration;
///
/// let mut shortest: Option<Duration> = None;
/// shortest.update_min(Duration::from_millis(40));
/// shortest.update_min(Duration::from_millis(33));
/// shortest.update_min(Duration::from_millis(35));
/// assert_eq!(shortest, Some(Duration::from_millis(33)));
/// ```
pub trait MinMaxExt<T: Ord + Copy> {
    fn update_min(&mut self, value: T);
    fn update_max(&mut self, value: T);
}

impl<T: Ord + Copy> MinMaxExt<T> for Option<T> {
    fn update_min(&mut self, value: T) {
        *self = Some(self.map_or(value, |m| m.min(value)));
    }

    fn update_max(&mut self, value: T) {
        *self = Some(self.map_or(value, |m| m.max(value)));
    }
}

/// Running statistics over gaps between consecutive events
#[derive(Debug, Clone, Default)]
pub struct GapStats {
    gaps: Vec<Duration>,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl GapStats {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            gaps: Vec::with_capacity(capacity),
            min: None,
            max: None,
        }
    }

    pub fn record(&mut self, gap: Duration) {
        self.gaps.push(gap);
        self.min.update_min(gap);
        self.max.update_max(gap);
    }

    pub fn count(&self) -> usize {
        self.gaps.len()
    }

    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.gaps.is_empty() {
            return None;
        }
        Some(self.gaps.iter().sum::<Duration>() / self.gaps.len() as u32)
    }

    /// Population standard deviation of the gaps; needs two samples
    pub fn jitter(&self) -> Option<Duration> {
        if self.gaps.len() < 2 {
            return None;
        }
        let n = self.gaps.len() as f64;
        let mean = self.gaps.iter().map(Duration::as_secs_f64).sum::<f64>() / n;
        let variance = self
            .gaps
            .iter()
            .map(|g| {
                let diff = g.as_secs_f64() - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        Some(Duration::from_secs_f64(variance.sqrt()))
    }
}
