//! Fade stage
//!
//! Scales frame brightness in place: a ramp up from black over the first
//! `fade_in` of the stream and a ramp down to black over the last `fade_out`
//! before the declared duration. The fade-out can be switched off while the
//! stream plays, e.g. when the next playlist item should cut in.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::assets::DEFAULT_FADE_MICROS;
use crate::decoder::{DecodedFrame, FrameBuffer, PixelFormat};
use crate::error::PipelineResult;
use crate::pipeline::{Stage, Timestamp};

/// Fade configuration carried by a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FadeOptions {
    pub fade_in_micros: i64,
    pub fade_out_micros: i64,
    pub disable_in: bool,
    pub disable_out: bool,
}

impl Default for FadeOptions {
    fn default() -> Self {
        Self {
            fade_in_micros: DEFAULT_FADE_MICROS,
            fade_out_micros: DEFAULT_FADE_MICROS,
            disable_in: false,
            disable_out: false,
        }
    }
}

impl FadeOptions {
    /// No fading at all.
    pub fn none() -> Self {
        Self {
            disable_in: true,
            disable_out: true,
            ..Self::default()
        }
    }
}

/// Shared switch for the fade-out of a running stream.
#[derive(Debug, Clone, Default)]
pub struct FadeControl {
    disable_out: Arc<AtomicBool>,
}

impl FadeControl {
    pub fn new(disabled: bool) -> Self {
        Self {
            disable_out: Arc::new(AtomicBool::new(disabled)),
        }
    }

    pub fn set_fade_out_disabled(&self, disabled: bool) {
        self.disable_out.store(disabled, Ordering::Relaxed);
    }

    pub fn fade_out_disabled(&self) -> bool {
        self.disable_out.load(Ordering::Relaxed)
    }
}

pub struct FadeTransform {
    options: FadeOptions,
    control: FadeControl,
    duration: watch::Receiver<Option<Timestamp>>,
}

impl FadeTransform {
    pub fn new(
        options: FadeOptions,
        control: FadeControl,
        duration: watch::Receiver<Option<Timestamp>>,
    ) -> Self {
        Self {
            options,
            control,
            duration,
        }
    }

    /// Brightness multiplier in [0, 1] for a frame at `ts`.
    pub fn factor(&self, ts: Timestamp) -> f32 {
        let mut factor = 1.0f32;

        let fade_in = self.options.fade_in_micros;
        if !self.options.disable_in && fade_in > 0 {
            factor = factor.min(ts.micros as f32 / fade_in as f32);
        }

        let fade_out = self.options.fade_out_micros;
        let duration = *self.duration.borrow();
        if !self.control.fade_out_disabled()
            && fade_out > 0
            && let Some(end) = duration
        {
            let remaining = end.micros - ts.micros;
            factor = factor.min(remaining as f32 / fade_out as f32);
        }

        factor.clamp(0.0, 1.0)
    }
}

/// Scale pixel values toward black. For I420 the chroma planes move toward
/// the neutral 128 so the picture darkens without a colour cast.
pub fn apply_fade(buffer: &mut FrameBuffer, factor: f32) {
    let scale = |v: u8| (v as f32 * factor).round() as u8;
    match buffer.format {
        PixelFormat::I420 => {
            let Some((luma, chroma)) = buffer.luma_chroma_mut() else {
                return;
            };
            luma.iter_mut().for_each(|y| *y = scale(*y));
            chroma.iter_mut().for_each(|c| {
                *c = (128.0 + (*c as f32 - 128.0) * factor).round() as u8;
            });
        }
        PixelFormat::Rgba => {
            for px in buffer.data.chunks_exact_mut(4) {
                px[0] = scale(px[0]);
                px[1] = scale(px[1]);
                px[2] = scale(px[2]);
            }
        }
    }
}

impl Stage for FadeTransform {
    type In = DecodedFrame;
    type Out = DecodedFrame;

    fn name(&self) -> &'static str {
        "FadeTransform"
    }

    fn push(&mut self, mut frame: DecodedFrame, out: &mut Vec<DecodedFrame>) -> PipelineResult<()> {
        let factor = self.factor(frame.timestamp());
        if factor < 1.0 {
            apply_fade(frame.buffer_mut(), factor);
        }
        out.push(frame);
        Ok(())
    }
}

impl From<Duration> for FadeOptions {
    /// Same ramp length on both ends.
    fn from(length: Duration) -> Self {
        let micros = length.as_micros() as i64;
        Self {
            fade_in_micros: micros,
            fade_out_micros: micros,
            ..Self::default()
        }
    }
}
