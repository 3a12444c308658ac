// ============================================================================
// RENDER: progress overlays and before/after diff animations
// ============================================================================

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;

use image::{ImageOutputFormat, Rgba, RgbaImage, imageops};
use rayon::prelude::*;

use crate::canvas::{CanvasSnapshot, VirginRule};
use crate::error::{Result, TrackerError};
use crate::template::{PixelState, Template};

pub const CORRECT_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const WRONG_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const UNTOUCHED_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
/// Backdrop of diff frames.
pub const BACKGROUND: Rgba<u8> = Rgba([0x36, 0x39, 0x3f, 255]);

/// Frame delay of diff animations, in centiseconds.
const DIFF_DELAY_CS: u16 = 100;
/// Diff frames are upscaled until the longer side reaches about this size.
const DIFF_TARGET_SIZE: u32 = 512;
const DIFF_MAX_UPSCALE: u32 = 8;

fn state_color(state: PixelState) -> Rgba<u8> {
    match state {
        PixelState::Correct => CORRECT_COLOR,
        PixelState::Wrong => WRONG_COLOR,
        PixelState::Untouched => UNTOUCHED_COLOR,
        PixelState::Ignored => Rgba([0, 0, 0, 0]),
    }
}

/// Template-sized image: correct cells green, wrong cells red, wrong cells
/// that were never painted blue, everything else transparent.
pub fn progress_image(template: &Template, canvas: &CanvasSnapshot, rule: VirginRule) -> RgbaImage {
    let states = template.pixel_states(canvas, rule);
    let mut img = RgbaImage::new(template.width, template.height);
    img.par_chunks_mut(4)
        .zip(states.par_iter())
        .for_each(|(px, &s)| px.copy_from_slice(&state_color(s).0));
    img
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
    Ok(buf)
}

/// Two-frame GIF of the correctness of `old` then `new` on `canvas`, both
/// drawn in the bounding box of their union.
pub fn make_before_after_gif(
    old: &Template,
    new: &Template,
    canvas: &CanvasSnapshot,
    rule: VirginRule,
) -> Result<Vec<u8>> {
    let min_x = old.ox.min(new.ox) as i64;
    let min_y = old.oy.min(new.oy) as i64;
    let max_x = (old.ox as i64 + old.width as i64).max(new.ox as i64 + new.width as i64);
    let max_y = (old.oy as i64 + old.height as i64).max(new.oy as i64 + new.height as i64);
    let (bw, bh) = ((max_x - min_x) as u32, (max_y - min_y) as u32);
    if bw == 0 || bh == 0 {
        return Err(TrackerError::Render("both templates are empty".into()));
    }

    let factor = (DIFF_TARGET_SIZE / bw.max(bh)).clamp(1, DIFF_MAX_UPSCALE);
    if bw * factor > u16::MAX as u32 || bh * factor > u16::MAX as u32 {
        return Err(TrackerError::Render(format!(
            "diff area too large for a GIF ({}x{})",
            bw, bh
        )));
    }

    let frames: Vec<RgbaImage> = [old, new]
        .par_iter()
        .map(|t| {
            let mut frame = RgbaImage::from_pixel(bw, bh, BACKGROUND);
            let overlay = progress_image(t, canvas, rule);
            imageops::overlay(&mut frame, &overlay, t.ox as i64 - min_x, t.oy as i64 - min_y);
            imageops::resize(&frame, bw * factor, bh * factor, imageops::FilterType::Nearest)
        })
        .collect();

    encode_animated_gif(&frames, DIFF_DELAY_CS)
}

/// Looping GIF with one local palette per frame.
pub fn encode_animated_gif(frames: &[RgbaImage], delay_cs: u16) -> Result<Vec<u8>> {
    let Some(first) = frames.first() else {
        return Err(TrackerError::Render("no frames to encode".into()));
    };
    if first.width() > u16::MAX as u32 || first.height() > u16::MAX as u32 {
        return Err(TrackerError::Render("image dimensions exceed the GIF maximum".into()));
    }
    let (w, h) = (first.width() as u16, first.height() as u16);

    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, w, h, &[])?;
        encoder.set_repeat(gif::Repeat::Infinite)?;
        for img in frames {
            if img.dimensions() != first.dimensions() {
                return Err(TrackerError::Render("frame sizes differ".into()));
            }
            let (palette, indices) = quantize_rgba(img);
            let frame = gif::Frame {
                width: w,
                height: h,
                delay: delay_cs,
                palette: Some(palette),
                buffer: Cow::Owned(indices),
                ..Default::default()
            };
            encoder.write_frame(&frame)?;
        }
    }
    Ok(out)
}

/// Indexed colour for one frame as `(flat RGB palette, indices)`.
///
/// Frames with at most 256 colours map exactly; others go through NeuQuant.
fn quantize_rgba(img: &RgbaImage) -> (Vec<u8>, Vec<u8>) {
    let mut lookup: HashMap<[u8; 3], u8> = HashMap::new();
    let mut palette = Vec::new();
    let mut indices = Vec::with_capacity((img.width() * img.height()) as usize);
    let mut exact = true;
    for p in img.pixels() {
        let rgb = [p[0], p[1], p[2]];
        let next = lookup.len();
        let idx = match lookup.get(&rgb) {
            Some(&i) => i,
            None if next < 256 => {
                lookup.insert(rgb, next as u8);
                palette.extend_from_slice(&rgb);
                next as u8
            }
            None => {
                exact = false;
                break;
            }
        };
        indices.push(idx);
    }
    if exact {
        return (palette, indices);
    }

    let nq = color_quant::NeuQuant::new(10, 256, img.as_raw());
    let palette = nq.color_map_rgb();
    let indices = img.pixels().map(|p| nq.index_of(&p.0) as u8).collect();
    (palette, indices)
}
