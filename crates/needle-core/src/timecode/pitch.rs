//! Alpha-beta filter recovering record speed from carrier crossings

const ALPHA: f64 = 1.0 / 512.0;
const BETA: f64 = ALPHA / 256.0;

/// Tracks displacement and velocity of the record
///
/// `observe` is fed once per input sample with the distance (in seconds of
/// record) covered since the previous sample: a quarter cycle on a zero
/// crossing, zero otherwise. The velocity estimate is the playback pitch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchFilter {
    dt: f64,
    x: f64,
    v: f64,
}

impl PitchFilter {
    pub fn new(dt: f64) -> Self {
        Self { dt, x: 0.0, v: 0.0 }
    }

    #[inline]
    pub fn observe(&mut self, dx: f64) {
        let predicted_x = self.x + self.v * self.dt;
        let residual = dx - predicted_x;

        self.x = predicted_x + residual * ALPHA;
        self.v += residual * BETA / self.dt;

        // Displacement is kept relative to the latest observation
        self.x -= dx;
    }

    /// Signed speed, 1.0 being nominal
    #[inline]
    pub fn current(&self) -> f64 {
        self.v
    }
}
