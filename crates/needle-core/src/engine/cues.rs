//! Cue points
//!
//! A fixed set of labelled positions per deck, in seconds of track time.
//! Labels usually arrive from remote input, so every operation accepts any
//! label and treats an out-of-range one as a no-op.

/// Number of cue labels per deck
pub const MAX_CUES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CuePoints {
    positions: [Option<f64>; MAX_CUES],
}

impl CuePoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `position` under `label`
    pub fn set(&mut self, label: usize, position: f64) -> bool {
        match self.positions.get_mut(label) {
            Some(slot) if position.is_finite() => {
                *slot = Some(position);
                true
            }
            _ => false,
        }
    }

    pub fn unset(&mut self, label: usize) -> bool {
        match self.positions.get_mut(label) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }

    /// Position stored under `label`
    pub fn get(&self, label: usize) -> Option<f64> {
        self.positions.get(label).copied().flatten()
    }

    pub fn is_set(&self, label: usize) -> bool {
        self.get(label).is_some()
    }

    /// Fill labels 0.. from a list; extra positions are ignored
    pub fn set_many(&mut self, positions: &[f64]) -> usize {
        let mut stored = 0;
        for (label, &position) in positions.iter().take(MAX_CUES).enumerate() {
            if self.set(label, position) {
                stored += 1;
            }
        }
        stored
    }

    pub fn clear(&mut self) {
        self.positions = [None; MAX_CUES];
    }

    /// Iterate over labels that hold a position
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.positions
            .iter()
            .enumerate()
            .filter_map(|(label, position)| position.map(|p| (label, p)))
    }
}
