use ffmpeg_next::{
    format::Pixel,
    software::scaling::{Context, Flags},
};

/// Converts RGBA surfaces into the encoder's pixel format.
pub struct Scaler {
    context: Context,
}

impl Scaler {
    pub fn new(width: u32, height: u32, dst_format: Pixel) -> anyhow::Result<Self> {
        let context = Context::get(
            Pixel::RGBA,
            width,
            height,
            dst_format,
            width,
            height,
            Flags::BILINEAR,
        )?;
        Ok(Self { context })
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
