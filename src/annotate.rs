//! Box drawing on RGB buffers for the annotated artifacts each stage serves.

use image::{Rgb, RgbImage};

use crate::vision::BoundingBox;

pub const FACE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const REGION_FACE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

fn plot(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Draw a hollow rectangle, clipped to the image bounds.
pub fn draw_box(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: i32) {
    let BoundingBox { x1, y1, x2, y2 } = *bbox;
    if x2 <= x1 || y2 <= y1 {
        return;
    }
    for t in 0..thickness {
        for x in x1..=x2 {
            plot(img, x, y1 + t, color);
            plot(img, x, y2 - t, color);
        }
        for y in y1..=y2 {
            plot(img, x1 + t, y, color);
            plot(img, x2 - t, y, color);
        }
    }
}
