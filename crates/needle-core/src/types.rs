//! Audio primitives shared by the decoder, the player and the device layer

/// Upper bound on decks a rig will host
pub const MAX_DECKS: usize = 8;

/// Processing sample; tracks arrive as 16-bit and are widened on import
pub type Sample = f32;

/// One stereo frame
///
/// `#[repr(C)]` with two `f32`s, so an interleaved `[L, R, L, R, ..]` device
/// buffer can be viewed as `&mut [StereoSample]` through bytemuck.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Widen signed 16-bit PCM to [-1, 1)
    #[inline]
    pub fn from_i16(left: i16, right: i16) -> Self {
        const SCALE: Sample = 1.0 / 32768.0;
        Self::new(left as Sample * SCALE, right as Sample * SCALE)
    }

    /// Larger of the two channel magnitudes
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self::new(self.left + other.left, self.right + other.right)
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

/// Block buffer allocated once, then resized only within its capacity
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    /// Change the working length without allocating
    ///
    /// Frames exposed by growing are silent. Callers keep `new_len` within
    /// [`capacity`](Self::capacity); the audio thread must never reallocate.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        if new_len > self.samples.len() {
            debug_assert!(
                new_len <= self.samples.capacity(),
                "set_len_from_capacity beyond capacity"
            );
            self.samples.resize(new_len, StereoSample::silence());
        } else {
            self.samples.truncate(new_len);
        }
    }

    pub fn fill_silence(&mut self) {
        self.samples.fill(StereoSample::silence());
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_frames() {
        let mut mix = StereoSample::new(1.0, 2.0);
        mix += StereoSample::new(0.5, -0.5);
        assert_eq!(mix, StereoSample::new(1.5, 1.5));
        assert_eq!(StereoSample::new(-0.75, 0.25).peak(), 0.75);
    }

    #[test]
    fn test_from_i16_range() {
        let s = StereoSample::from_i16(i16::MIN, 16384);
        assert_eq!(s.left, -1.0);
        assert_eq!(s.right, 0.5);
    }

    #[test]
    fn test_resize_within_capacity() {
        let mut buffer = StereoBuffer::with_capacity(64);
        let capacity = buffer.capacity();

        buffer.set_len_from_capacity(48);
        assert_eq!(buffer.len(), 48);
        buffer.set_len_from_capacity(16);
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn test_fill_silence_keeps_length() {
        let mut buffer = StereoBuffer::with_capacity(2);
        buffer.set_len_from_capacity(2);
        buffer.as_mut_slice()[1] = StereoSample::new(3.0, 4.0);
        buffer.fill_silence();
        assert_eq!(buffer.len(), 2);
        assert!(buffer.as_slice().iter().all(|s| *s == StereoSample::silence()));
    }
}
