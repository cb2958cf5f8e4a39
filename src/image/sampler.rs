use crate::{geometry::Rect, models::Color};

use super::RawImage;

/// Reduce the pixels of `image` inside `rect` to their mean color
///
/// The rectangle is intersected with the image bounds first. An empty
/// intersection yields black.
pub fn sample(image: &RawImage, rect: &Rect) -> Color {
    let xmin = rect.x.min(image.width());
    let xmax = rect.x.saturating_add(rect.width).min(image.width());
    let ymin = rect.y.min(image.height());
    let ymax = rect.y.saturating_add(rect.height).min(image.height());

    let mut r_acc = 0u64;
    let mut g_acc = 0u64;
    let mut b_acc = 0u64;

    for y in ymin..ymax {
        for x in xmin..xmax {
            // Safety: x (resp. y) are necessarily in 0..width (resp. 0..height)
            let (r, g, b) = unsafe { image.color_at_unchecked(x, y) }.into_components();
            r_acc += r as u64;
            g_acc += g as u64;
            b_acc += b as u64;
        }
    }

    let cnt = (xmax - xmin) as u64 * (ymax - ymin) as u64;
    if cnt == 0 {
        return Color::default();
    }

    // Round to nearest
    Color::new(
        ((r_acc + cnt / 2) / cnt) as u8,
        ((g_acc + cnt / 2) / cnt) as u8,
        ((b_acc + cnt / 2) / cnt) as u8,
    )
}
