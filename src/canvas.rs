// ============================================================================
// CANVAS: palette, immutable grid snapshots and the live-grid accessor
// ============================================================================

use std::sync::Arc;

use image::{GrayImage, RgbaImage};
use parking_lot::RwLock;

use crate::error::{Result, TrackerError};

/// Palette index used for "no colour": transparent template cells and
/// unplaceable canvas cells.
pub const TRANSPARENT: u8 = 255;

/// Ordered canvas palette.  Index `i` is the colour a board value `i` shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Default for Palette {
    fn default() -> Self {
        const DEFAULT: [[u8; 3]; 16] = [
            [0xFF, 0xFF, 0xFF],
            [0xE4, 0xE4, 0xE4],
            [0x88, 0x88, 0x88],
            [0x22, 0x22, 0x22],
            [0xFF, 0xA7, 0xD1],
            [0xE5, 0x00, 0x00],
            [0xE5, 0x95, 0x00],
            [0xA0, 0x6A, 0x42],
            [0xE5, 0xD9, 0x00],
            [0x94, 0xE0, 0x44],
            [0x02, 0xBE, 0x01],
            [0x00, 0xD3, 0xDD],
            [0x00, 0x83, 0xC7],
            [0x00, 0x00, 0xEA],
            [0xCF, 0x6E, 0xE4],
            [0x82, 0x00, 0x80],
        ];
        Self::new(DEFAULT.to_vec())
    }
}

impl Palette {
    pub fn new(mut colors: Vec<[u8; 3]>) -> Self {
        colors.truncate(TRANSPARENT as usize);
        Self { colors }
    }

    /// Parse `#rrggbb,#rrggbb,...`.  Returns `None` on any malformed entry.
    pub fn from_hex_list(list: &str) -> Option<Self> {
        let colors = list
            .split(',')
            .map(|c| parse_hex_color(c.trim()))
            .collect::<Option<Vec<_>>>()?;
        if colors.is_empty() || colors.len() >= TRANSPARENT as usize {
            return None;
        }
        Some(Self::new(colors))
    }

    pub fn to_hex_list(&self) -> String {
        self.colors
            .iter()
            .map(|c| format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2]))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn color(&self, index: u8) -> Option<[u8; 3]> {
        self.colors.get(index as usize).copied()
    }

    /// Index of the closest palette colour (squared RGB distance).
    pub fn nearest(&self, rgb: [u8; 3]) -> u8 {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, c) in self.colors.iter().enumerate() {
            let dr = c[0] as i32 - rgb[0] as i32;
            let dg = c[1] as i32 - rgb[1] as i32;
            let db = c[2] as i32 - rgb[2] as i32;
            let dist = (dr * dr + dg * dg + db * db) as u32;
            if dist < best_dist {
                best_dist = dist;
                best = i;
                if dist == 0 {
                    break;
                }
            }
        }
        best as u8
    }
}

/// Parse `#rrggbb` (the `#` is optional).
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let s = s.strip_prefix('#').unwrap_or(s);
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&s[0..2], 16).ok()?;
    let g = u8::from_str_radix(&s[2..4], 16).ok()?;
    let b = u8::from_str_radix(&s[4..6], 16).ok()?;
    Some([r, g, b])
}

/// What counts as a cell that was never painted by a user.
///
/// `VirginMap` trusts the canvas virgin map: a cell flagged virgin has only
/// ever shown its initial colour.  Snapshots without a virgin map report no
/// virgin cells.  `Disabled` turns the virgin-abuse metric off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirginRule {
    VirginMap,
    Disabled,
}

impl VirginRule {
    pub fn is_virgin(self, canvas: &CanvasSnapshot, x: i64, y: i64) -> bool {
        match self {
            VirginRule::Disabled => false,
            VirginRule::VirginMap => match (&canvas.virgin, canvas.index_of(x, y)) {
                (Some(map), Some(i)) => map[i],
                _ => false,
            },
        }
    }
}

/// One consistent view of the canvas.  Never mutated once shared.
#[derive(Debug, Clone)]
pub struct CanvasSnapshot {
    width: u32,
    height: u32,
    board: Vec<u8>,
    placeable: Vec<bool>,
    virgin: Option<Vec<bool>>,
    palette: Arc<Palette>,
}

impl CanvasSnapshot {
    /// Board values equal to [`TRANSPARENT`] are unplaceable cells.
    pub fn new(width: u32, height: u32, board: Vec<u8>, palette: Arc<Palette>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if board.len() != expected {
            return Err(TrackerError::InvalidFormat(format!(
                "board has {} cells, expected {}x{} = {}",
                board.len(),
                width,
                height,
                expected
            )));
        }
        let placeable = board.iter().map(|&c| c != TRANSPARENT).collect();
        Ok(Self {
            width,
            height,
            board,
            placeable,
            virgin: None,
            palette,
        })
    }

    /// Further restrict placeability.  `false` cells become unplaceable.
    pub fn with_placemap(mut self, placemap: Vec<bool>) -> Result<Self> {
        self.check_len(placemap.len(), "placemap")?;
        for (p, m) in self.placeable.iter_mut().zip(placemap) {
            *p = *p && m;
        }
        Ok(self)
    }

    /// `true` = the cell was never painted.
    pub fn with_virgin_map(mut self, virgin: Vec<bool>) -> Result<Self> {
        self.check_len(virgin.len(), "virgin map")?;
        self.virgin = Some(virgin);
        Ok(self)
    }

    /// Build a snapshot from a rendered board image.
    ///
    /// Board pixels with zero alpha are unplaceable, the rest snap to the
    /// nearest palette colour.  In the optional masks any non-zero luma means
    /// "placeable" / "never painted".
    pub fn from_images(
        board: &RgbaImage,
        palette: Arc<Palette>,
        placemap: Option<&GrayImage>,
        virgin: Option<&GrayImage>,
    ) -> Result<Self> {
        let (w, h) = board.dimensions();
        let cells = board
            .pixels()
            .map(|p| {
                if p[3] == 0 {
                    TRANSPARENT
                } else {
                    palette.nearest([p[0], p[1], p[2]])
                }
            })
            .collect();
        let mut snap = Self::new(w, h, cells, palette)?;
        if let Some(mask) = placemap {
            if mask.dimensions() != (w, h) {
                return Err(TrackerError::InvalidFormat("placemap size differs from board".into()));
            }
            snap = snap.with_placemap(mask.pixels().map(|p| p[0] != 0).collect())?;
        }
        if let Some(mask) = virgin {
            if mask.dimensions() != (w, h) {
                return Err(TrackerError::InvalidFormat("virgin map size differs from board".into()));
            }
            snap = snap.with_virgin_map(mask.pixels().map(|p| p[0] != 0).collect())?;
        }
        Ok(snap)
    }

    fn check_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.board.len() {
            return Err(TrackerError::InvalidFormat(format!(
                "{} has {} cells, board has {}",
                what,
                len,
                self.board.len()
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn palette(&self) -> &Arc<Palette> {
        &self.palette
    }

    #[inline]
    fn index_of(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Palette index at `(x, y)`; `None` outside the canvas or on an
    /// unplaceable cell.
    #[inline]
    pub fn get_pixel(&self, x: i64, y: i64) -> Option<u8> {
        let i = self.index_of(x, y)?;
        if self.placeable[i] {
            Some(self.board[i])
        } else {
            None
        }
    }

    #[inline]
    pub fn is_placeable(&self, x: i64, y: i64) -> bool {
        self.index_of(x, y).is_some_and(|i| self.placeable[i])
    }

    /// Paint a cell, clearing its virgin flag.  Used to build fixtures and by
    /// pollers that patch a snapshot before publishing it.
    pub fn set_pixel(&mut self, x: i64, y: i64, color: u8) {
        if let Some(i) = self.index_of(x, y)
            && self.placeable[i]
        {
            self.board[i] = color;
            if let Some(v) = self.virgin.as_mut() {
                v[i] = false;
            }
        }
    }
}

/// Read access to the live canvas.  Each call returns one consistent snapshot.
pub trait PixelGrid: Send + Sync {
    fn snapshot(&self) -> Arc<CanvasSnapshot>;
}

/// Grid that an external poller refreshes with [`SharedGrid::replace`].
pub struct SharedGrid {
    current: RwLock<Arc<CanvasSnapshot>>,
}

impl SharedGrid {
    pub fn new(initial: CanvasSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Publish a new snapshot.  Readers holding the previous one keep it.
    pub fn replace(&self, snapshot: CanvasSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }
}

impl PixelGrid for SharedGrid {
    fn snapshot(&self) -> Arc<CanvasSnapshot> {
        self.current.read().clone()
    }
}
