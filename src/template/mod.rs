// ============================================================================
// TEMPLATE: palette-indexed target image placed on the canvas
// ============================================================================

pub mod combo;
pub mod source;
pub mod url;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics::{self, Eta};
use crate::canvas::{CanvasSnapshot, Palette, TRANSPARENT, VirginRule};
use crate::error::{Result, TrackerError};
use crate::store::{ProgressRecord, ProgressStore};
use url::TemplateUrl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

/// Per-cell placeability, fixed when the template is positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// Not part of the template.
    Transparent,
    /// Part of the template but outside the canvas or on an unplaceable cell.
    OffCanvas,
    Placeable,
}

/// Live state of one template cell against a canvas snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelState {
    Ignored,
    Correct,
    /// Painted by someone, with the wrong colour.
    Wrong,
    /// Wrong, and nobody ever painted the cell.
    Untouched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Single,
    /// Union of every public template.
    Combo,
}

/// Link generation options for [`Template::generate_url`].
#[derive(Debug, Clone)]
pub struct UrlOptions {
    pub site: String,
    /// Substitute image reference, e.g. a freshly uploaded copy.
    pub image: Option<String>,
    /// Centre the view on the first pixel left to place.
    pub open_on_togo: bool,
    pub default_scale: f64,
    pub togo_scale: f64,
}

impl Default for UrlOptions {
    fn default() -> Self {
        Self {
            site: "https://pxls.space/".to_string(),
            image: None,
            open_on_togo: false,
            default_scale: 4.0,
            togo_scale: 20.0,
        }
    }
}

/// A positioned target image.
///
/// Cloning is cheap: pixel data and mask are shared, so handing templates out
/// by value never exposes registry internals.
#[derive(Debug, Clone)]
pub struct Template {
    /// Progress store key.  Survives renames.
    pub id: Uuid,
    pub name: Option<String>,
    pub owner_id: Option<u64>,
    pub url: String,
    pub title: Option<String>,
    pub ox: i32,
    pub oy: i32,
    pub width: u32,
    pub height: u32,
    /// Block size of the stylized source image.
    pub scale: u32,
    pub visibility: Visibility,
    pub(crate) image_ref: String,
    kind: TemplateKind,
    pixels: Arc<[u8]>,
    mask: Arc<[Cell]>,
    palette: Arc<Palette>,
    total_placeable: u32,
    correct_pixels: Option<u32>,
}

impl Template {
    /// Position palette-indexed `pixels` (row-major, [`TRANSPARENT`] for holes)
    /// at `(ox, oy)` on `canvas`.
    pub fn from_indexed(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        ox: i32,
        oy: i32,
        canvas: &CanvasSnapshot,
    ) -> Result<Self> {
        if pixels.len() != width as usize * height as usize {
            return Err(TrackerError::InvalidFormat(format!(
                "template has {} pixels, expected {}x{}",
                pixels.len(),
                width,
                height
            )));
        }
        let w = width as usize;
        let mask: Vec<Cell> = pixels
            .par_iter()
            .enumerate()
            .map(|(i, &c)| {
                if c == TRANSPARENT {
                    return Cell::Transparent;
                }
                let cx = ox as i64 + (i % w) as i64;
                let cy = oy as i64 + (i / w) as i64;
                if canvas.is_placeable(cx, cy) {
                    Cell::Placeable
                } else {
                    Cell::OffCanvas
                }
            })
            .collect();
        let total_placeable = mask.iter().filter(|c| **c == Cell::Placeable).count() as u32;

        Ok(Self {
            id: Uuid::new_v4(),
            name: None,
            owner_id: None,
            url: String::new(),
            title: None,
            ox,
            oy,
            width,
            height,
            scale: 1,
            visibility: Visibility::Public,
            image_ref: String::new(),
            kind: TemplateKind::Single,
            pixels: pixels.into(),
            mask: mask.into(),
            palette: canvas.palette().clone(),
            total_placeable,
            correct_pixels: None,
        })
    }

    pub(crate) fn into_combo(mut self) -> Self {
        self.kind = TemplateKind::Combo;
        self.id = Uuid::nil();
        self.name = Some(combo::COMBO_NAME.to_string());
        self.title = Some("Combo".to_string());
        self
    }

    pub fn is_combo(&self) -> bool {
        self.kind == TemplateKind::Combo
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn image_ref(&self) -> &str {
        &self.image_ref
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn cell(&self, x: u32, y: u32) -> Option<Cell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.mask[(y * self.width + x) as usize])
    }

    pub fn total_size(&self) -> u32 {
        self.width * self.height
    }

    pub fn total_placeable(&self) -> u32 {
        self.total_placeable
    }

    /// Result of the last [`Template::update_progress`] call.
    pub fn correct_pixels(&self) -> Option<u32> {
        self.correct_pixels
    }

    /// Same origin, size and palette content.
    pub fn same_content(&self, other: &Template) -> bool {
        self.ox == other.ox
            && self.oy == other.oy
            && self.width == other.width
            && self.height == other.height
            && self.pixels == other.pixels
    }

    /// Count placeable cells whose colour matches `canvas`.
    pub fn update_progress(&mut self, canvas: &CanvasSnapshot) -> u32 {
        let w = self.width as usize;
        if w == 0 || self.total_placeable == 0 {
            self.correct_pixels = Some(0);
            return 0;
        }
        let correct: u32 = self
            .pixels
            .par_chunks(w)
            .zip(self.mask.par_chunks(w))
            .enumerate()
            .map(|(row, (pixels, mask))| {
                let cy = self.oy as i64 + row as i64;
                let mut n = 0u32;
                for (col, (&expected, &cell)) in pixels.iter().zip(mask).enumerate() {
                    if cell == Cell::Placeable
                        && canvas.get_pixel(self.ox as i64 + col as i64, cy) == Some(expected)
                    {
                        n += 1;
                    }
                }
                n
            })
            .sum();
        self.correct_pixels = Some(correct);
        correct
    }

    /// Correct cells that nobody ever painted.
    pub fn get_virgin_abuse(&self, canvas: &CanvasSnapshot, rule: VirginRule) -> u32 {
        if self.correct_pixels == Some(0) || rule == VirginRule::Disabled {
            return 0;
        }
        self.pixel_states(canvas, rule)
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                **s == PixelState::Correct && {
                    let (cx, cy) = self.canvas_coords(*i);
                    rule.is_virgin(canvas, cx, cy)
                }
            })
            .count() as u32
    }

    #[inline]
    fn canvas_coords(&self, i: usize) -> (i64, i64) {
        let w = self.width as usize;
        (self.ox as i64 + (i % w) as i64, self.oy as i64 + (i / w) as i64)
    }

    /// Row-major [`PixelState`] of every cell.
    pub fn pixel_states(&self, canvas: &CanvasSnapshot, rule: VirginRule) -> Vec<PixelState> {
        self.pixels
            .par_iter()
            .zip(self.mask.par_iter())
            .enumerate()
            .map(|(i, (&expected, &cell))| {
                if cell != Cell::Placeable {
                    return PixelState::Ignored;
                }
                let (cx, cy) = self.canvas_coords(i);
                match canvas.get_pixel(cx, cy) {
                    Some(actual) if actual == expected => PixelState::Correct,
                    Some(_) if rule.is_virgin(canvas, cx, cy) => PixelState::Untouched,
                    Some(_) => PixelState::Wrong,
                    None => PixelState::Ignored,
                }
            })
            .collect()
    }

    /// Canvas coordinates of the first incorrect cell in row-major order.
    pub fn first_togo(&self, canvas: &CanvasSnapshot) -> Option<(i64, i64)> {
        self.pixels
            .iter()
            .zip(self.mask.iter())
            .enumerate()
            .find(|(i, (expected, cell))| {
                **cell == Cell::Placeable && {
                    let (cx, cy) = self.canvas_coords(*i);
                    canvas.get_pixel(cx, cy) != Some(**expected)
                }
            })
            .map(|(i, _)| self.canvas_coords(i))
    }

    /// The template image in palette colours, transparent where empty.
    pub fn get_array(&self) -> RgbaImage {
        let mut img = RgbaImage::new(self.width, self.height);
        img.par_chunks_mut(4)
            .zip(self.pixels.par_iter())
            .for_each(|(px, &c)| {
                if let Some([r, g, b]) = self.palette.color(c) {
                    px.copy_from_slice(&[r, g, b, 255]);
                }
            });
        img
    }

    /// Correctness overlay, see [`crate::render::progress_image`].
    pub fn get_progress_image(&self, canvas: &CanvasSnapshot, rule: VirginRule) -> RgbaImage {
        crate::render::progress_image(self, canvas, rule)
    }

    /// Nearest record at or before `at`.
    pub fn get_progress_at(&self, store: &ProgressStore, at: DateTime<Utc>) -> Option<ProgressRecord> {
        store.progress_at(self.id, at)
    }

    /// Time to completion at the speed of the trailing `window_days`.
    pub fn get_eta(&self, store: &ProgressStore, now: DateTime<Utc>, window_days: i64) -> Eta {
        analytics::template_eta(self, store, now, window_days)
    }

    /// Link that opens this template on the canvas.
    pub fn generate_url(&self, opts: &UrlOptions, canvas: Option<&CanvasSnapshot>) -> String {
        let centre = (
            self.ox as i64 + (self.width / 2) as i64,
            self.oy as i64 + (self.height / 2) as i64,
        );
        let togo = if opts.open_on_togo {
            canvas.and_then(|c| self.first_togo(c))
        } else {
            None
        };
        let ((x, y), scale) = match togo {
            Some(pos) => (pos, opts.togo_scale),
            None => (centre, opts.default_scale),
        };

        let image = opts.image.clone().unwrap_or_else(|| self.image_ref.clone());
        // A substituted image is one pixel per cell; the original keeps its style.
        let tw = if opts.image.is_some() || self.scale > 1 {
            Some(self.width)
        } else {
            None
        };
        TemplateUrl {
            site: opts.site.clone(),
            image,
            ox: self.ox,
            oy: self.oy,
            tw,
            title: self.title.clone(),
            x: Some(x),
            y: Some(y),
            scale: Some(scale),
        }
        .to_url()
    }
}
