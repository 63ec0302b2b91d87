use std::fmt::{Display, Formatter};

use bytes::{Bytes, BytesMut};
use ffmpeg_next::format::Pixel;

use crate::error::{Error, Result};

/// Width and height of a planar 4:2:0 picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in one tightly packed YUV420 frame: `ceil(width * height * 12 / 8)`.
    pub fn frame_size(&self) -> usize {
        (self.width as u64 * self.height as u64 * 12).div_ceil(8) as usize
    }

    fn luma_size(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Display for VideoFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One raw YUV420 planar frame. Planes are stored Y, U, V back to back with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Bytes,
}

impl FrameBuffer {
    /// A black frame: every byte zero.
    pub fn new(width: u32, height: u32) -> Self {
        let size = VideoFormat::new(width, height).frame_size();
        Self {
            width,
            height,
            data: BytesMut::zeroed(size).freeze(),
        }
    }

    /// Wraps caller supplied pixel data. Empty data yields a black frame; any other length must
    /// match [`VideoFormat::frame_size`].
    pub fn with_data(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Ok(Self::new(width, height));
        }
        let expected = VideoFormat::new(width, height).frame_size();
        if data.len() != expected {
            return Err(Error::InvalidInput(format!(
                "frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> VideoFormat {
        VideoFormat::new(self.width, self.height)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Returns the (Y, U, V) planes.
    pub fn planes(&self) -> (&[u8], &[u8], &[u8]) {
        split_planes(&self.data, self.format())
    }
}

impl Display for FrameBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FrameBuffer width: {}, height: {}, data_len: {}",
            self.width,
            self.height,
            self.data.len()
        )
    }
}

fn split_planes(data: &[u8], format: VideoFormat) -> (&[u8], &[u8], &[u8]) {
    let u_begin = format.luma_size().min(data.len());
    let v_begin = (u_begin + format.luma_size() / 4).min(data.len());
    (&data[..u_begin], &data[u_begin..v_begin], &data[v_begin..])
}

/// (plane bytes per row, rows) for each of the three planes.
fn plane_geometry(format: VideoFormat) -> [(usize, usize); 3] {
    let (w, h) = (format.width as usize, format.height as usize);
    [(w, h), (w / 2, h / 2), (w / 2, h / 2)]
}

fn check_codec_geometry(format: VideoFormat) -> anyhow::Result<()> {
    if format.width == 0 || format.height == 0 {
        anyhow::bail!("invalid video size {}", format);
    }
    if format.width % 2 != 0 || format.height % 2 != 0 {
        anyhow::bail!("yuv420p codec frames need even dimensions, got {}", format);
    }
    Ok(())
}

/// Copies a packed YUV420 buffer into a codec frame, honouring the frame's line strides.
pub(crate) fn to_video_frame(
    data: &[u8],
    format: VideoFormat,
    pts: i64,
) -> anyhow::Result<ffmpeg_next::frame::Video> {
    check_codec_geometry(format)?;
    if data.len() != format.frame_size() {
        anyhow::bail!(
            "input unit has {} bytes, {} frames need {}",
            data.len(),
            format,
            format.frame_size()
        );
    }

    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, format.width, format.height);
    let (y, u, v) = split_planes(data, format);
    for (index, (plane, (row_len, rows))) in [y, u, v]
        .into_iter()
        .zip(plane_geometry(format))
        .enumerate()
    {
        let stride = frame.stride(index);
        let dst = frame.data_mut(index);
        for row in 0..rows {
            let src = &plane[row * row_len..(row + 1) * row_len];
            dst[row * stride..row * stride + row_len].copy_from_slice(src);
        }
    }
    frame.set_pts(Some(pts));
    Ok(frame)
}

/// Packs a YUV420P codec frame into a contiguous buffer, dropping line padding.
pub(crate) fn pack_video_frame(frame: &ffmpeg_next::frame::Video) -> anyhow::Result<Bytes> {
    if frame.format() != Pixel::YUV420P {
        anyhow::bail!("cannot pack {:?} frame, expected yuv420p", frame.format());
    }
    let format = VideoFormat::new(frame.width(), frame.height());
    check_codec_geometry(format)?;

    let mut out = BytesMut::with_capacity(format.frame_size());
    for (index, (row_len, rows)) in plane_geometry(format).into_iter().enumerate() {
        let stride = frame.stride(index);
        let src = frame.data(index);
        for row in 0..rows {
            out.extend_from_slice(&src[row * stride..row * stride + row_len]);
        }
    }
    Ok(out.freeze())
}
