//! Raw signal scope for turntable setup
//!
//! The decoder plots every input sample as a point (primary, secondary),
//! normalised to the tracked reference level. A clean timecode signal draws
//! a ring; a wrongly wired or noisy input is obvious at a glance. Cells are
//! atomics so the UI thread can read the scope while audio writes it.

use std::sync::atomic::{AtomicU8, Ordering};

/// Default scope width and height in cells
pub const DEFAULT_MONITOR_SIZE: usize = 128;

/// Samples between decay passes
pub(crate) const DECAY_EVERY: u32 = 512;

pub struct MonitorTap {
    size: usize,
    cells: Box<[AtomicU8]>,
}

impl MonitorTap {
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        let cells = (0..size * size).map(|_| AtomicU8::new(0)).collect();
        Self { size, cells }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Plot one sample, coordinates in -1.0..=1.0
    #[inline]
    pub(crate) fn plot(&self, x: f64, y: f64) {
        let half = self.size as f64 / 2.0;
        let col = (half + x * half).clamp(0.0, (self.size - 1) as f64) as usize;
        let row = (half - y * half).clamp(0.0, (self.size - 1) as f64) as usize;
        self.cells[row * self.size + col].store(u8::MAX, Ordering::Relaxed);
    }

    /// Fade every lit cell by 1/8
    pub(crate) fn decay(&self) {
        for cell in self.cells.iter() {
            let value = cell.load(Ordering::Relaxed);
            if value != 0 {
                cell.store(value - value / 8 - 1, Ordering::Relaxed);
            }
        }
    }

    pub fn clear(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Copy the scope into `out`, row-major
    pub fn snapshot(&self, out: &mut Vec<u8>) {
        out.clear();
        out.extend(self.cells.iter().map(|cell| cell.load(Ordering::Relaxed)));
    }

    /// Fraction of cells currently lit
    pub fn coverage(&self) -> f32 {
        let lit = self
            .cells
            .iter()
            .filter(|cell| cell.load(Ordering::Relaxed) != 0)
            .count();
        lit as f32 / self.cells.len() as f32
    }
}

impl Default for MonitorTap {
    fn default() -> Self {
        Self::new(DEFAULT_MONITOR_SIZE)
    }
}

impl std::fmt::Debug for MonitorTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorTap").field("size", &self.size).finish()
    }
}
