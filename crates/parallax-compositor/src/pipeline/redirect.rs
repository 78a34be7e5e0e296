use crate::device::{GraphicsDevice, TargetBinding};
use crate::error::DeviceError;

/// Binds a render target for the lifetime of the guard and puts the previous
/// binding back when dropped, including on early returns.
pub struct TargetRedirect<'a> {
    device: &'a mut dyn GraphicsDevice,
    restore: TargetBinding,
    restored: bool,
}

impl<'a> TargetRedirect<'a> {
    pub fn bind(device: &'a mut dyn GraphicsDevice, binding: TargetBinding) -> Result<Self, DeviceError> {
        let restore = device.render_target();
        device.set_render_target(binding)?;
        Ok(Self { device, restore, restored: false })
    }

    pub fn device(&mut self) -> &mut (dyn GraphicsDevice + 'a) {
        &mut *self.device
    }

    /// Restores now and reports the result.
    pub fn restore(mut self) -> Result<(), DeviceError> {
        self.restored = true;
        self.device.set_render_target(self.restore)
    }
}

impl Drop for TargetRedirect<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.device.set_render_target(self.restore) {
            log::error!("failed to restore render target {:?}: {e}", self.restore);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, TextureDesc, TextureFormat};

    #[test]
    fn restores_on_drop() {
        let mut device = HeadlessDevice::new("engine", (16, 16));
        let eye = device
            .create_texture(&TextureDesc::color("eye", 8, 8, TextureFormat::Rgba8UnormSrgb))
            .unwrap();

        {
            let mut redirect = TargetRedirect::bind(&mut device, TargetBinding::new(eye, None)).unwrap();
            assert_eq!(redirect.device().render_target().color, Some(eye));
        }
        assert_eq!(device.render_target(), TargetBinding::BACK_BUFFER);
    }

    #[test]
    fn restores_after_a_failed_step() {
        let mut device = HeadlessDevice::new("engine", (16, 16));
        let eye = device
            .create_texture(&TextureDesc::color("eye", 8, 8, TextureFormat::Rgba8UnormSrgb))
            .unwrap();

        let failing = |device: &mut dyn GraphicsDevice| -> Result<(), DeviceError> {
            let mut redirect = TargetRedirect::bind(device, TargetBinding::new(eye, None))?;
            redirect.device().clear([0.0; 4], None)?;
            Err(DeviceError::Unsupported("scripted"))
        };
        assert!(failing(&mut device).is_err());
        assert_eq!(device.render_target(), TargetBinding::BACK_BUFFER);
    }
}
