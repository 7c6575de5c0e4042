use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::pipeline::Timestamp;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling, planes packed without padding
    I420,
    /// Interleaved 8-bit RGBA
    Rgba,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` image.
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::I420 => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
            PixelFormat::Rgba => w * h * 4,
        }
    }
}

/// Raw image data as produced by a decode engine.
#[derive(Debug)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl FrameBuffer {
    pub fn new(data: Vec<u8>, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            data,
            format,
            width,
            height,
        }
    }

    /// Split an I420 buffer into its Y and combined chroma planes.
    pub fn luma_chroma_mut(&mut self) -> Option<(&mut [u8], &mut [u8])> {
        if self.format != PixelFormat::I420 {
            return None;
        }
        let y_size = self.width as usize * self.height as usize;
        if self.data.len() < y_size {
            return None;
        }
        Some(self.data.split_at_mut(y_size))
    }
}

/// Count of frames that are alive in one pipeline instance.
///
/// Every `DecodedFrame` holds a slot that is returned when the frame is
/// released or dropped, so a zero count after teardown proves nothing leaked.
#[derive(Debug, Clone, Default)]
pub struct FrameLedger {
    outstanding: Arc<AtomicUsize>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A decoded video frame with exactly one owner.
///
/// Frames cannot be cloned; they move from the decoder through the fade and
/// gate stages to the consumer. The buffer is freed by `release()` or when the
/// frame is dropped, whichever happens first.
pub struct DecodedFrame {
    buffer: FrameBuffer,
    timestamp: Timestamp,
    duration: Duration,
    display_width: u32,
    display_height: u32,
    ledger: FrameLedger,
}

impl DecodedFrame {
    pub fn new(
        buffer: FrameBuffer,
        timestamp: Timestamp,
        duration: Duration,
        display_width: u32,
        display_height: u32,
        ledger: &FrameLedger,
    ) -> Self {
        ledger.acquire();
        Self {
            buffer,
            timestamp,
            duration,
            display_width,
            display_height,
            ledger: ledger.clone(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn display_width(&self) -> u32 {
        self.display_width
    }

    pub fn display_height(&self) -> u32 {
        self.display_height
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Mutable access is only reachable through exclusive ownership.
    pub fn buffer_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffer
    }

    /// Free the underlying buffer now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for DecodedFrame {
    fn drop(&mut self) {
        self.ledger.release();
    }
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("format", &self.buffer.format)
            .field("width", &self.buffer.width)
            .field("height", &self.buffer.height)
            .field("display_width", &self.display_width)
            .field("display_height", &self.display_height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ledger: &FrameLedger, ts: i64) -> DecodedFrame {
        let buffer = FrameBuffer::new(vec![0; 24], PixelFormat::I420, 4, 4);
        DecodedFrame::new(buffer, Timestamp::from_micros(ts), Duration::ZERO, 4, 4, ledger)
    }

    #[test]
    fn test_ledger_counts_live_frames() {
        let ledger = FrameLedger::new();
        let a = frame(&ledger, 0);
        let b = frame(&ledger, 1);
        assert_eq!(ledger.outstanding(), 2);

        a.release();
        assert_eq!(ledger.outstanding(), 1);

        drop(b);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(PixelFormat::I420.buffer_size(4, 4), 24);
        assert_eq!(PixelFormat::I420.buffer_size(3, 3), 9 + 2 * 4);
        assert_eq!(PixelFormat::Rgba.buffer_size(2, 2), 16);
    }

    #[test]
    fn test_luma_chroma_split() {
        let mut buffer = FrameBuffer::new(vec![0; 24], PixelFormat::I420, 4, 4);
        let (y, uv) = buffer.luma_chroma_mut().unwrap();
        assert_eq!(y.len(), 16);
        assert_eq!(uv.len(), 8);

        let mut rgba = FrameBuffer::new(vec![0; 16], PixelFormat::Rgba, 2, 2);
        assert!(rgba.luma_chroma_mut().is_none());
    }
}
