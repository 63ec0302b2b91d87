use ffmpeg_next::{
    format::Pixel,
    software::scaling::{Context, flag::Flags},
};

pub struct Scaler {
    context: Context,
}

impl Scaler {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

unsafe impl Send for Scaler {}

/// Format stage on the decode side: brings every decoded frame to YUV420P at its own size.
///
/// The scaling context is rebuilt whenever the incoming pixel format or size changes.
#[derive(Default)]
pub struct Yuv420Converter {
    scaler: Option<(Scaler, (Pixel, u32, u32))>,
}

impl Yuv420Converter {
    pub fn convert(
        &mut self,
        frame: ffmpeg_next::frame::Video,
    ) -> anyhow::Result<ffmpeg_next::frame::Video> {
        if frame.format() == Pixel::YUV420P {
            return Ok(frame);
        }

        let key = (frame.format(), frame.width(), frame.height());
        if !matches!(&self.scaler, Some((_, current)) if *current == key) {
            log::debug!("converting {:?} {}x{} frames to yuv420p", key.0, key.1, key.2);
            let context = Context::get(
                key.0,
                key.1,
                key.2,
                Pixel::YUV420P,
                key.1,
                key.2,
                Flags::BILINEAR,
            )?;
            self.scaler = Some((Scaler::new(context), key));
        }
        let Some((scaler, _)) = self.scaler.as_mut() else {
            anyhow::bail!("scaler not initialised");
        };

        let mut converted = ffmpeg_next::frame::Video::empty();
        scaler.run(&frame, &mut converted)?;
        converted.set_pts(frame.pts());
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv420p_passes_through() {
        crate::init().unwrap();
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 8, 8);
        frame.set_pts(Some(3));

        let out = Yuv420Converter::default().convert(frame).unwrap();
        assert_eq!(out.format(), Pixel::YUV420P);
        assert_eq!(out.pts(), Some(3));
    }

    #[test]
    fn test_nv12_is_converted() {
        crate::init().unwrap();
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::NV12, 16, 8);
        frame.set_pts(Some(11));

        let out = Yuv420Converter::default().convert(frame).unwrap();
        assert_eq!(out.format(), Pixel::YUV420P);
        assert_eq!((out.width(), out.height()), (16, 8));
        assert_eq!(out.pts(), Some(11));
    }
}
