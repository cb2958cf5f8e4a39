//! Mapping of LED strands onto display pixels

use thiserror::Error;

use crate::{
    capture::Display,
    models::{DisplayAssignment, Strand},
};

/// Area of a display sampled for one LED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("LED {led} lies outside of the {width}x{height} display")]
    GeometryOutOfBounds { led: usize, width: u32, height: u32 },
    #[error("no connected display #{shown} with resolution {width}x{height}")]
    DisplayUnresolved { width: u32, height: u32, shown: u32 },
}

/// Find the display an assignment refers to
///
/// Candidates are the displays matching the assigned resolution, in
/// enumeration order; `shown` picks among them.
pub fn resolve<'d>(
    assignment: &DisplayAssignment,
    displays: &'d [Display],
) -> Result<&'d Display, GeometryError> {
    displays
        .iter()
        .filter(|display| display.width == assignment.width && display.height == assignment.height)
        .nth(assignment.shown as usize)
        .ok_or(GeometryError::DisplayUnresolved {
            width: assignment.width,
            height: assignment.height,
            shown: assignment.shown,
        })
}

/// Compute the sample rectangle of every LED of `strand` on `display`
///
/// The first rectangle sits at the strand origin, each following one is
/// offset by `size` pixels along the strand direction. Rectangles are never
/// clamped: the first LED which does not fit on the display is reported.
pub fn map_strand(strand: &Strand, display: &Display) -> Result<Vec<Rect>, GeometryError> {
    let (dx, dy) = strand.direction.step();
    let size = strand.size as i64;
    let (width, height) = (display.width as i64, display.height as i64);

    let mut rects = Vec::with_capacity(strand.count as usize);
    for (i, led) in strand.leds().enumerate() {
        let x = strand.start_x as i64 + dx * size * i as i64;
        let y = strand.start_y as i64 + dy * size * i as i64;

        if x < 0 || y < 0 || x + size > width || y + size > height {
            return Err(GeometryError::GeometryOutOfBounds {
                led,
                width: display.width,
                height: display.height,
            });
        }

        rects.push(Rect {
            x: x as u32,
            y: y as u32,
            width: strand.size,
            height: strand.size,
        });
    }

    Ok(rects)
}
