use serde::{Deserialize, Serialize};

// MARK: - FrameSize

/// Pixel dimensions of a frame, texture or surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const FHD: Self = Self { width: 1920, height: 1080 };
    pub const SVGA: Self = Self { width: 800, height: 600 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - FrameLayout

/// Memory layout of a packed 4-byte-per-pixel frame.
///
/// `stride` is the byte length of one row and may exceed `width * 4` when the
/// host pads its rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameLayout {
    pub size: FrameSize,
    pub stride: usize,
}

impl FrameLayout {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new(width: u32, height: u32, stride: usize) -> Self {
        Self { size: FrameSize::new(width, height), stride }
    }

    /// Tightly packed layout for `size`.
    pub fn packed(size: FrameSize) -> Self {
        Self { size, stride: size.width as usize * Self::BYTES_PER_PIXEL }
    }

    /// Total bytes occupied by the frame (`height * stride`).
    pub fn byte_len(&self) -> usize {
        self.size.height as usize * self.stride
    }

    /// A layout is usable when it has pixels and each row fits in its stride.
    pub fn is_valid(&self) -> bool {
        !self.size.is_empty() && self.stride >= self.size.width as usize * Self::BYTES_PER_PIXEL
    }
}

impl std::fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} stride={}", self.size, self.stride)
    }
}

// MARK: - Bounds

/// Integer pixel rectangle: window placement or destination box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle of `size` anchored at the origin.
    pub fn from_size(size: FrameSize) -> Self {
        Self { x: 0, y: 0, width: size.width, height: size.height }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }
}

// MARK: - Quad

/// Floating-point rectangle a textured quad is drawn into.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Quad {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Quad {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Fits `source` into `dest` preserving aspect ratio, centred in the box.
///
/// The source is scaled to the destination width first; if the resulting
/// height overflows the box it is scaled to the destination height instead.
/// An empty source or box yields an empty quad at the box origin.
pub fn aspect_fit(source: FrameSize, dest: Bounds) -> Quad {
    if source.is_empty() || dest.is_empty() {
        return Quad::new(dest.x as f64, dest.y as f64, 0.0, 0.0);
    }

    let box_w = dest.width as f64;
    let box_h = dest.height as f64;
    let src_w = source.width as f64;
    let src_h = source.height as f64;

    let height_at_box_width = box_w * (src_h / src_w);
    let (w, h) = if height_at_box_width > box_h {
        (box_h * (src_w / src_h), box_h)
    } else {
        (box_w, height_at_box_width)
    };

    Quad {
        x: dest.x as f64 + (box_w - w) / 2.0,
        y: dest.y as f64 + (box_h - h) / 2.0,
        width: w,
        height: h,
    }
}
