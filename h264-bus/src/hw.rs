//! Hardware-accelerated H.264 codec discovery.
//!
//! Used only when `EncoderSettings::hardware` is set; callers fall back to the software codec
//! when nothing is found or the hardware codec fails to open.

const HW_H264_DECODERS: &[&str] = &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"];

/// Returns the first available hardware H.264 decoder.
pub fn find_hw_decoder() -> Option<ffmpeg_next::Codec> {
    for name in HW_H264_DECODERS {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}

/// Returns the first available hardware encoder standing in for the software `codec_name`.
pub fn find_hw_encoder(codec_name: &str) -> Option<ffmpeg_next::Codec> {
    let hw_names: &[&str] = match codec_name {
        "libx264" | "h264" | "libopenh264" => {
            &["h264_nvenc", "h264_qsv", "h264_vaapi", "h264_v4l2m2m"]
        }
        _ => &[],
    };

    for name in hw_names {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            log::info!("found hardware encoder: {}", name);
            return Some(codec);
        }
    }
    None
}
