use projector_core::{FrameLayout, FrameSize};

/// Synthetic host video: a horizontal gradient with a white bar sweeping
/// across it, one step per frame. BGRA, tightly packed.
pub struct TestPattern {
    layout: FrameLayout,
    pixels: Vec<u8>,
    frame: u64,
}

impl TestPattern {
    const BAR_WIDTH: u32 = 8;

    pub fn new(size: FrameSize) -> Self {
        let layout = FrameLayout::packed(size);
        Self { layout, pixels: vec![0; layout.byte_len()], frame: 0 }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// Renders the next frame and returns its pixels.
    pub fn next_frame(&mut self) -> &[u8] {
        let FrameSize { width, height } = self.layout.size;
        let bar = (self.frame % width.max(1) as u64) as u32;
        self.frame += 1;

        for y in 0..height {
            let row = y as usize * self.layout.stride;
            for x in 0..width {
                let i = row + x as usize * FrameLayout::BYTES_PER_PIXEL;
                let px = if x >= bar && x < bar + Self::BAR_WIDTH {
                    [255, 255, 255, 255]
                } else {
                    let shade = (x * 255 / width.max(1)) as u8;
                    [shade, (y * 255 / height.max(1)) as u8, 255 - shade, 255]
                };
                self.pixels[i..i + 4].copy_from_slice(&px);
            }
        }
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(frame: &[u8], layout: FrameLayout, x: u32, y: u32) -> [u8; 4] {
        let i = y as usize * layout.stride + x as usize * 4;
        [frame[i], frame[i + 1], frame[i + 2], frame[i + 3]]
    }

    #[test]
    fn bar_sweeps_one_column_per_frame() {
        let mut pattern = TestPattern::new(FrameSize::new(32, 4));
        let layout = pattern.layout();

        let first = pattern.next_frame().to_vec();
        assert_eq!(first.len(), layout.byte_len());
        assert_eq!(pixel(&first, layout, 0, 0), [255; 4]);
        assert_eq!(pixel(&first, layout, 7, 3), [255; 4]);
        assert_ne!(pixel(&first, layout, 8, 0), [255; 4]);

        let second = pattern.next_frame().to_vec();
        assert_ne!(pixel(&second, layout, 0, 0), [255; 4]);
        assert_eq!(pixel(&second, layout, 8, 0), [255; 4]);
        assert_eq!(pattern.frames(), 2);
    }

    #[test]
    fn bar_wraps_around() {
        let mut pattern = TestPattern::new(FrameSize::new(16, 1));
        for _ in 0..16 {
            pattern.next_frame();
        }
        let layout = pattern.layout();
        assert_eq!(pixel(pattern.next_frame(), layout, 0, 0), [255; 4]);
    }
}
