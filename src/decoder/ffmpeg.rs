use std::collections::HashMap;
use std::time::Duration;

use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::video::{VideoDecoder, VideoFrame};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp as AvTimestamp};

use super::{DecodeEngine, DecodedImage, FrameBuffer, PixelFormat};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{DecoderConfig, EncodedChunk, Timestamp};

const MICROS: TimeBase = TimeBase::MICROSECONDS;

/// Video decoder using FFmpeg.
///
/// Timestamps are passed through in microseconds, so the frames FFmpeg hands
/// back in presentation order carry the container timestamps unchanged.
/// Output is packed I420 with stride padding stripped.
pub struct FfmpegEngine {
    decoder: Option<VideoDecoder>,
    /// Chunk durations by timestamp; FFmpeg frames do not carry them
    durations: HashMap<i64, Duration>,
    chunk_count: u64,
}

// VideoDecoder wraps a raw AVCodecContext that is only ever touched from the
// task owning this engine.
unsafe impl Send for FfmpegEngine {}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self {
            decoder: None,
            durations: HashMap::new(),
            chunk_count: 0,
        }
    }

    fn decoder(&mut self) -> PipelineResult<&mut VideoDecoder> {
        self.decoder
            .as_mut()
            .ok_or_else(|| PipelineError::decode("decoder used before configure"))
    }

    fn drain(&mut self) -> PipelineResult<Vec<DecodedImage>> {
        let mut images = Vec::new();
        loop {
            let next = self
                .decoder()?
                .take()
                .map_err(|e| PipelineError::decode(e.to_string()))?;
            let Some(frame) = next else {
                break;
            };
            images.push(self.convert(&frame)?);
        }
        Ok(images)
    }

    fn convert(&mut self, frame: &VideoFrame) -> PipelineResult<DecodedImage> {
        check_pixel_format(frame.pixel_format().name())?;
        let micros = frame.pts().as_micros().unwrap_or_default();
        let duration = self.durations.remove(&micros).unwrap_or_default();

        let (w, h) = (frame.width(), frame.height());
        let (uw, uh) = (w.div_ceil(2), h.div_ceil(2));
        let mut packed = vec![0u8; w * h + 2 * uw * uh];

        let planes = frame.planes();
        pack_yuv420(
            &mut packed,
            Plane {
                data: planes[0].data(),
                stride: planes[0].line_size(),
                width: w,
                height: h,
            },
            Plane {
                data: planes[1].data(),
                stride: planes[1].line_size(),
                width: uw,
                height: uh,
            },
            Plane {
                data: planes[2].data(),
                stride: planes[2].line_size(),
                width: uw,
                height: uh,
            },
        );

        Ok(DecodedImage {
            buffer: FrameBuffer::new(packed, PixelFormat::I420, w as u32, h as u32),
            timestamp: Timestamp::from_micros(micros),
            duration,
        })
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeEngine for FfmpegEngine {
    fn configure(&mut self, config: &DecoderConfig) -> PipelineResult<()> {
        let extradata = config.description.as_ref().map(|d| d.to_vec());
        let decoder = VideoDecoder::builder(&config.codec)
            .and_then(|builder| builder.time_base(MICROS).extradata(extradata).build())
            .map_err(|e| PipelineError::decode(format!("{}: {}", config.codec, e)))?;

        log::info!(
            "FfmpegEngine: configured {} ({}x{})",
            config.codec,
            config.coded_width,
            config.coded_height
        );
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, chunk: &EncodedChunk) -> PipelineResult<Vec<DecodedImage>> {
        self.chunk_count += 1;
        let index = self.chunk_count;
        let pts = AvTimestamp::new(chunk.timestamp.micros, MICROS);
        self.durations.insert(chunk.timestamp.micros, chunk.duration);

        let packet = PacketMut::from(chunk.payload.as_ref())
            .with_pts(pts)
            .with_dts(pts)
            .freeze();

        self.decoder()?.push(packet).map_err(|e| {
            PipelineError::decode(format!("chunk {} at {}: {}", index, chunk.timestamp, e))
        })?;
        self.drain()
    }

    fn flush(&mut self) -> PipelineResult<Vec<DecodedImage>> {
        if self.decoder.is_none() {
            return Ok(Vec::new());
        }
        self.decoder()?
            .flush()
            .map_err(|e| PipelineError::decode(e.to_string()))?;
        self.drain()
    }
}

/// Only planar 4:2:0 can be packed as I420; anything else (high bit depth
/// VP9 profiles, 4:4:4) is refused rather than mispacked.
fn check_pixel_format(name: &str) -> PipelineResult<()> {
    match name {
        "yuv420p" | "yuvj420p" => Ok(()),
        other => Err(PipelineError::decode(format!(
            "unsupported pixel format {}; expected yuv420p",
            other
        ))),
    }
}

#[derive(Clone, Copy)]
struct Plane<'a> {
    data: &'a [u8],
    stride: usize,
    width: usize,
    height: usize,
}

fn pack_yuv420(dst: &mut [u8], y: Plane<'_>, u: Plane<'_>, v: Plane<'_>) {
    let y_size = y.width * y.height;
    let u_size = u.width * u.height;
    extract_plane(&mut dst[..y_size], y);
    extract_plane(&mut dst[y_size..y_size + u_size], u);
    extract_plane(&mut dst[y_size + u_size..], v);
}

/// Extract a plane from padded source to contiguous destination.
///
/// # Performance
/// - Fast path: No padding -> single memcpy
/// - Fallback: Row-by-row copy
#[inline]
fn extract_plane(dst: &mut [u8], plane: Plane<'_>) {
    let Plane {
        data: src,
        stride,
        width,
        height,
    } = plane;

    if stride == width && src.len() >= width * height {
        dst.copy_from_slice(&src[..width * height]);
        return;
    }

    for r in 0..height {
        let src_start = r * stride;
        let dst_start = r * width;
        if src_start + width > src.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&src[src_start..src_start + width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_planar_420() {
        assert!(check_pixel_format("yuv420p").is_ok());
        assert!(check_pixel_format("yuvj420p").is_ok());
    }

    #[test]
    fn test_rejects_other_pixel_formats() {
        for name in ["yuv420p10le", "yuv444p", "nv12"] {
            let err = check_pixel_format(name).unwrap_err();
            assert_eq!(
                err,
                PipelineError::decode(format!(
                    "unsupported pixel format {}; expected yuv420p",
                    name
                ))
            );
        }
    }

    #[test]
    fn test_pack_strips_stride_padding() {
        // 2x2 luma with stride 4, 1x1 chroma planes
        let y = [1, 2, 0, 0, 3, 4, 0, 0];
        let mut dst = [0u8; 6];
        pack_yuv420(
            &mut dst,
            Plane { data: &y, stride: 4, width: 2, height: 2 },
            Plane { data: &[5], stride: 1, width: 1, height: 1 },
            Plane { data: &[6], stride: 1, width: 1, height: 1 },
        );
        assert_eq!(dst, [1, 2, 3, 4, 5, 6]);
    }
}
