use ffmpeg_next::codec::Id;

use crate::hw::find_hw_decoder;

/// Codec stage of the decode graph: H.264 access units in, decoded pictures out.
///
/// One instance lives for the whole session; [`reset`](Self::reset) returns it to a clean state
/// after a run has been drained.
pub struct H264Decoder {
    inner: ffmpeg_next::codec::decoder::Video,
    packet_index: i64,
}

impl H264Decoder {
    pub fn open(hardware: bool) -> anyhow::Result<Self> {
        if hardware {
            if let Some(hw_codec) = find_hw_decoder() {
                let hw_name = hw_codec.name().to_string();
                match Self::open_codec(hw_codec) {
                    Ok(inner) => return Ok(Self::wrap(inner, hw_name)),
                    Err(e) => log::warn!(
                        "hardware decoder {} failed: {:#}, falling back to software",
                        hw_name,
                        e
                    ),
                }
            }
        }

        let codec = ffmpeg_next::decoder::find(Id::H264)
            .ok_or_else(|| anyhow::anyhow!("h264 decoder not found"))?;
        let name = codec.name().to_string();
        Ok(Self::wrap(Self::open_codec(codec)?, name))
    }

    fn wrap(inner: ffmpeg_next::codec::decoder::Video, codec_name: String) -> Self {
        log::info!("decoder opened: {}", codec_name);
        Self {
            inner,
            packet_index: 0,
        }
    }

    fn open_codec(
        codec: ffmpeg_next::Codec,
    ) -> anyhow::Result<ffmpeg_next::codec::decoder::Video> {
        let decoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .decoder()
            .open_as(codec)?
            .video()?;
        Ok(decoder)
    }

    pub fn send_unit(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(data);
        packet.set_pts(Some(self.packet_index));
        packet.set_dts(Some(self.packet_index));
        self.packet_index += 1;
        self.inner.send_packet(&packet)?;
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    pub fn receive_frame(&mut self) -> anyhow::Result<Option<ffmpeg_next::frame::Video>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drops buffered state so the next run starts from a fresh stream.
    pub fn reset(&mut self) {
        self.inner.flush();
        self.packet_index = 0;
    }
}
