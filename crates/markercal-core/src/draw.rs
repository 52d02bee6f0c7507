//! Raster helpers for annotating frames.
//!
//! Everything clips silently at the image border.

use image::{Rgb, RgbImage};
use nalgebra::Point2;

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);

const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_W + 1;

#[inline]
fn put(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn stamp(img: &mut RgbImage, x: i32, y: i32, thickness: i32, color: Rgb<u8>) {
    if thickness <= 1 {
        put(img, x, y, color);
        return;
    }
    let r = thickness / 2;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put(img, x + dx, y + dy, color);
            }
        }
    }
}

/// Bresenham line between two pixel positions.
pub fn draw_line(
    img: &mut RgbImage,
    p0: (i32, i32),
    p1: (i32, i32),
    color: Rgb<u8>,
    thickness: i32,
) {
    let (mut x0, mut y0) = p0;
    let (x1, y1) = p1;

    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        stamp(img, x0, y0, thickness, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

pub fn draw_line_f32(
    img: &mut RgbImage,
    p0: Point2<f32>,
    p1: Point2<f32>,
    color: Rgb<u8>,
    thickness: i32,
) {
    draw_line(
        img,
        (p0.x.round() as i32, p0.y.round() as i32),
        (p1.x.round() as i32, p1.y.round() as i32),
        color,
        thickness,
    );
}

/// Closed polygon outline.
pub fn draw_polygon(img: &mut RgbImage, pts: &[Point2<f32>], color: Rgb<u8>, thickness: i32) {
    if pts.len() < 2 {
        return;
    }
    for i in 0..pts.len() {
        draw_line_f32(img, pts[i], pts[(i + 1) % pts.len()], color, thickness);
    }
}

pub fn draw_circle(img: &mut RgbImage, center: (i32, i32), radius: i32, color: Rgb<u8>, filled: bool) {
    let (cx, cy) = center;
    let r2 = radius * radius;
    let inner = (radius - 1).max(0).pow(2);
    for y in (cy - radius)..=(cy + radius) {
        for x in (cx - radius)..=(cx + radius) {
            let d2 = (x - cx).pow(2) + (y - cy).pow(2);
            if d2 <= r2 && (filled || d2 >= inner) {
                put(img, x, y, color);
            }
        }
    }
}

pub fn draw_rect(img: &mut RgbImage, top_left: (i32, i32), size: (i32, i32), color: Rgb<u8>) {
    let (x, y) = top_left;
    let (w, h) = size;
    draw_line(img, (x, y), (x + w - 1, y), color, 1);
    draw_line(img, (x + w - 1, y), (x + w - 1, y + h - 1), color, 1);
    draw_line(img, (x + w - 1, y + h - 1), (x, y + h - 1), color, 1);
    draw_line(img, (x, y + h - 1), (x, y), color, 1);
}

fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '=' => [0x00, 0x00, 0x1F, 0x00, 0x1F, 0x00, 0x00],
        ' ' => [0x00; 7],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

/// Width and height in pixels of `text` rendered at `scale`.
pub fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let n = text.chars().count() as u32;
    let s = scale.max(1);
    let w = if n == 0 {
        0
    } else {
        (n * GLYPH_ADVANCE as u32 - 1) * s
    };
    (w, GLYPH_H as u32 * s)
}

/// Render `text` with its bottom-left corner at `origin`.
pub fn put_text(img: &mut RgbImage, text: &str, origin: (i32, i32), scale: u32, color: Rgb<u8>) {
    let s = scale.max(1) as i32;
    let top = origin.1 - GLYPH_H * s + 1;
    for (k, c) in text.chars().enumerate() {
        let gx = origin.0 + k as i32 * GLYPH_ADVANCE * s;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..s {
                    for dx in 0..s {
                        put(img, gx + col * s + dx, top + row as i32 * s + dy, color);
                    }
                }
            }
        }
    }
}

/// Flip around the horizontal axis.
pub fn flip_vertical(img: &mut RgbImage) {
    image::imageops::flip_vertical_in_place(img);
}

/// Invert all channels.
pub fn bitwise_not(img: &mut RgbImage) {
    image::imageops::invert(img);
}
