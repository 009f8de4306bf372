use anyhow::{Context, Result};
use image::RgbImage;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

const MAIN_TITLE: &str = "Face Detection";
/// Roughly a 10 ms key poll per frame.
const TARGET_FPS: usize = 100;

/// The annotated-frame window plus one window per aligned crop.
pub struct Display {
    main: Window,
    crops: Vec<Window>,
    buffer: Vec<u32>,
    quit: bool,
}

impl Display {
    pub fn open(width: u32, height: u32) -> Result<Self> {
        let mut main = Window::new(MAIN_TITLE, width as usize, height as usize, WindowOptions::default())
            .with_context(|| format!("opening {MAIN_TITLE:?} window"))?;
        main.set_target_fps(TARGET_FPS);
        Ok(Self {
            main,
            crops: Vec::new(),
            buffer: Vec::new(),
            quit: false,
        })
    }

    /// Present a frame and poll the keyboard.
    pub fn show_frame(&mut self, image: &RgbImage) -> Result<()> {
        to_argb(image, &mut self.buffer);
        self.main
            .update_with_buffer(&self.buffer, image.width() as usize, image.height() as usize)
            .context("updating main window")?;

        let keys = self.main.get_keys_pressed(KeyRepeat::No);
        if keys.iter().any(|k| matches!(k, Key::Escape | Key::Q)) {
            self.quit = true;
        }
        Ok(())
    }

    /// Show each crop in its own "Cropped Face N" window, opening windows as
    /// more faces appear.
    pub fn show_crops<'a>(&mut self, crops: impl Iterator<Item = &'a RgbImage>) -> Result<()> {
        let mut buffer = Vec::new();
        for (i, crop) in crops.enumerate() {
            let (w, h) = (crop.width() as usize, crop.height() as usize);
            if i == self.crops.len() {
                let title = format!("Cropped Face {i}");
                let window = Window::new(&title, w, h, WindowOptions::default())
                    .with_context(|| format!("opening {title:?} window"))?;
                self.crops.push(window);
            }
            to_argb(crop, &mut buffer);
            self.crops[i]
                .update_with_buffer(&buffer, w, h)
                .with_context(|| format!("updating crop window {i}"))?;
        }
        Ok(())
    }

    /// True once the main window is closed or Esc / q was pressed.
    pub fn should_close(&self) -> bool {
        self.quit || !self.main.is_open()
    }
}

/// Pack RGB pixels into minifb's 0RGB `u32` layout.
fn to_argb(image: &RgbImage, out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        image
            .pixels()
            .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_to_argb_packing() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([0x12, 0x34, 0x56]));
        image.put_pixel(1, 0, Rgb([0, 0, 255]));
        let mut buffer = vec![7; 10];
        to_argb(&image, &mut buffer);
        assert_eq!(buffer, vec![0x0012_3456, 0x0000_00FF]);
    }
}
