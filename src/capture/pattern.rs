//! Colour bar test pattern written into every produced frame

/// Bar colours in ABGR order, left to right
pub const COLOR_BARS: [u32; 8] = [
    0xFFFF_FFFF, // white
    0xFF00_FFFF, // yellow
    0xFFFF_FF00, // cyan
    0xFF00_FF00, // green
    0xFFFF_00FF, // fuchsia
    0xFF00_00FF, // red
    0xFFFF_0000, // blue
    0xFF00_0000, // black
];

/// Colour of column `col` in a frame `width` pixels wide.
pub fn bar_color(col: u32, width: u32) -> u32 {
    let index = (col as u64 * COLOR_BARS.len() as u64 / width.max(1) as u64) as usize;
    COLOR_BARS[index.min(COLOR_BARS.len() - 1)]
}

/// Fill `pixels` with vertical colour bars.
///
/// `stride` is in pixels. Padding past `width` in each row is left untouched, and rows
/// that don't fit in `pixels` are skipped. Returns the number of rows written.
pub fn fill_color_bars(pixels: &mut [u32], width: u32, height: u32, stride: u32) -> u32 {
    if width == 0 || stride < width {
        return 0;
    }

    let mut written = 0;
    for row in pixels.chunks_mut(stride as usize).take(height as usize) {
        if row.len() < width as usize {
            break;
        }
        for (col, pixel) in row[..width as usize].iter_mut().enumerate() {
            *pixel = bar_color(col as u32, width);
        }
        written += 1;
    }
    written
}
