//! Render clock to media time mapping.
//!
//! Processing stages may stretch buffers, so the output graph's render clock no longer
//! counts media time one to one. Each scheduled buffer records how much output it became
//! and how much media it carried; the render clock is mapped back piecewise.

use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Default)]
pub(super) struct Timeline {
    /// Output and media time of segments that finished playing.
    base_output: Duration,
    base_media: Duration,
    /// `(output, media)` lengths of buffers scheduled since the render clock restarted.
    segments: VecDeque<(Duration, Duration)>,
}

impl Timeline {
    /// Forget every segment; the render clock restarted from zero.
    pub(super) fn clear(&mut self) {
        *self = Self::default();
    }

    pub(super) fn push(&mut self, output: Duration, media: Duration) {
        self.segments.push_back((output, media));
    }

    /// Media time played once the render clock reads `rendered`.
    pub(super) fn media_time(&self, rendered: Duration) -> Duration {
        let mut output = self.base_output;
        let mut media = self.base_media;
        for &(output_len, media_len) in &self.segments {
            if !output_len.is_zero() && rendered < output + output_len {
                let into = rendered.saturating_sub(output);
                if output_len == media_len {
                    return media + into;
                }
                let fraction = into.as_secs_f64() / output_len.as_secs_f64();
                return media + media_len.mul_f64(fraction);
            }
            output += output_len;
            media += media_len;
        }
        media + rendered.saturating_sub(output)
    }

    /// Fold segments that finished playing before `rendered` into the base.
    pub(super) fn compact(&mut self, rendered: Duration) {
        while let Some(&(output_len, media_len)) = self.segments.front() {
            if self.base_output + output_len > rendered {
                break;
            }
            self.base_output += output_len;
            self.base_media += media_len;
            self.segments.pop_front();
        }
    }
}
