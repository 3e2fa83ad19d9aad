use image::{GrayImage, Luma};

/// Generates a deterministic blocky venue frame with plenty of corners for
/// feature matching.
pub fn venue_frame(width: u32, height: u32) -> GrayImage {
    assert!(width > 0 && height > 0, "image dimensions must be positive");

    let mut img = GrayImage::new(width, height);
    let mut state: u32 = 0x9e37_79b9;
    for y in (0..height).step_by(10) {
        for x in (0..width).step_by(10) {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let v = (state % 256) as u8;
            for dy in 0..10.min(height - y) {
                for dx in 0..10.min(width - x) {
                    img.put_pixel(x + dx, y + dy, Luma([v]));
                }
            }
        }
    }
    img
}

/// Paints a high-contrast checker pattern over one rectangle, simulating an
/// occupant that was not present in the reference.
pub fn occupy_rect(img: &mut GrayImage, x: u32, y: u32, width: u32, height: u32, cell: u32) {
    assert!(cell > 0, "cell size must be positive");
    for dy in 0..height {
        for dx in 0..width {
            let v = if ((dx / cell) + (dy / cell)) % 2 == 0 {
                0u8
            } else {
                255u8
            };
            img.put_pixel(x + dx, y + dy, Luma([v]));
        }
    }
}
