use bytes::Bytes;
use ffmpeg_next::{Dictionary, format::Pixel};

use crate::{
    config::EncoderSettings,
    frame::{VideoFormat, to_video_frame},
    hw::find_hw_encoder,
    packet::copy_packet_data,
};

/// Codec stage of the encode graph: packed YUV420 units in, H.264 access units out.
pub struct H264Encoder {
    inner: ffmpeg_next::codec::encoder::Video,
    format: VideoFormat,
    frame_index: i64,
}

impl H264Encoder {
    pub fn open(settings: &EncoderSettings, format: VideoFormat) -> anyhow::Result<Self> {
        if settings.hardware {
            if let Some(hw_codec) = find_hw_encoder(&settings.codec) {
                let hw_name = hw_codec.name().to_string();
                log::info!("attempting hardware encoder: {}", hw_name);
                match Self::open_codec(hw_codec, settings, format) {
                    Ok(inner) => return Ok(Self::wrap(inner, hw_name, format)),
                    Err(e) => log::warn!(
                        "hardware encoder {} failed: {:#}, falling back to {}",
                        hw_name,
                        e,
                        settings.codec
                    ),
                }
            }
        }

        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .ok_or_else(|| anyhow::anyhow!("codec not found: {}", settings.codec))?;
        let inner = Self::open_codec(codec, settings, format)?;
        Ok(Self::wrap(inner, settings.codec.clone(), format))
    }

    fn wrap(inner: ffmpeg_next::codec::encoder::Video, codec_name: String, format: VideoFormat) -> Self {
        log::info!("encoder opened: {} {}", codec_name, format);
        Self {
            inner,
            format,
            frame_index: 0,
        }
    }

    fn open_codec(
        codec: ffmpeg_next::Codec,
        settings: &EncoderSettings,
        format: VideoFormat,
    ) -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
        let rate = codec_rate(settings.frame_rate);
        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(format.width);
        encoder.set_height(format.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_frame_rate(Some((rate, 1)));
        encoder.set_time_base((1, rate));
        encoder.set_gop(settings.keyframe_interval.max(1));
        // keep one access unit per input frame, in input order
        encoder.set_max_b_frames(0);
        if let Some(bitrate) = settings.bitrate {
            encoder.set_bit_rate(bitrate as usize);
        }

        let mut opts = Dictionary::new();
        if let Some(preset) = settings.preset.as_deref() {
            opts.set("preset", preset);
        }
        if let Some(tune) = settings.tune.as_deref() {
            opts.set("tune", tune);
        }
        Ok(encoder.open_with(opts)?)
    }

    pub fn send_unit(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let frame = to_video_frame(data, self.format, self.frame_index)?;
        self.inner.send_frame(&frame)?;
        self.frame_index += 1;
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    /// Next finished access unit, copied out of codec memory. `None` when the codec needs more
    /// input or is fully drained.
    pub fn receive_packet(&mut self) -> anyhow::Result<Option<Bytes>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(copy_packet_data(&packet))),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Frame rate as the codec's rational numerator, at least 1.
fn codec_rate(frame_rate: u32) -> i32 {
    i32::try_from(frame_rate.max(1)).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_rate_is_clamped() {
        assert_eq!(codec_rate(0), 1);
        assert_eq!(codec_rate(25), 25);
        assert_eq!(codec_rate(u32::MAX), i32::MAX);
    }
}
