//! The combo: one virtual template covering every public template.

use super::{Cell, Template};
use crate::canvas::{CanvasSnapshot, TRANSPARENT};
use crate::error::Result;

pub const COMBO_NAME: &str = "@combo";

/// Union of the placeable footprints of `members`.
///
/// Cells shared by several members are counted once; when members disagree
/// on the colour, the later member in `members` wins.  The result is cropped
/// to the bounding box of the union.
pub fn build_combo(members: &[Template], canvas: &CanvasSnapshot) -> Result<Template> {
    let cw = canvas.width() as usize;
    let ch = canvas.height() as usize;
    let mut union = vec![TRANSPARENT; cw * ch];
    let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
    let (mut max_x, mut max_y) = (0usize, 0usize);

    for member in members {
        let w = member.width as usize;
        for (i, (&color, &cell)) in member.pixels.iter().zip(member.mask.iter()).enumerate() {
            if cell != Cell::Placeable {
                continue;
            }
            let cx = member.ox as i64 + (i % w) as i64;
            let cy = member.oy as i64 + (i / w) as i64;
            if cx < 0 || cy < 0 || cx as usize >= cw || cy as usize >= ch {
                continue;
            }
            let (cx, cy) = (cx as usize, cy as usize);
            union[cy * cw + cx] = color;
            min_x = min_x.min(cx);
            min_y = min_y.min(cy);
            max_x = max_x.max(cx);
            max_y = max_y.max(cy);
        }
    }

    if min_x == usize::MAX {
        return Ok(Template::from_indexed(Vec::new(), 0, 0, 0, 0, canvas)?.into_combo());
    }

    let bw = max_x - min_x + 1;
    let bh = max_y - min_y + 1;
    let mut cropped = Vec::with_capacity(bw * bh);
    for y in min_y..=max_y {
        cropped.extend_from_slice(&union[y * cw + min_x..=y * cw + max_x]);
    }
    let combo = Template::from_indexed(cropped, bw as u32, bh as u32, min_x as i32, min_y as i32, canvas)?;
    Ok(combo.into_combo())
}
