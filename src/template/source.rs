use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::RgbaImage;
use rayon::prelude::*;

use super::url::{TemplateUrl, percent_decode};
use super::Template;
use crate::canvas::{CanvasSnapshot, Palette, TRANSPARENT};
use crate::error::{Result, TrackerError};
use crate::log_info;

/// Largest decoded source image accepted per axis, before stylized reduction.
/// Prevents memory exhaustion from crafted images.
const MAX_SOURCE_DIM: u32 = 32_768;

/// Resolves the image reference of a template link to encoded image bytes.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
}

/// Handles inline `data:` URIs, `file://` URLs and plain paths.
///
/// Remote references are handed to `remote` when one is configured.
#[derive(Default, Clone)]
pub struct LocalImageSource {
    remote: Option<Arc<dyn ImageSource>>,
}

impl LocalImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(remote: Arc<dyn ImageSource>) -> Self {
        Self { remote: Some(remote) }
    }
}

impl ImageSource for LocalImageSource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        if let Some(rest) = reference.strip_prefix("data:") {
            return decode_data_uri(rest);
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return match &self.remote {
                Some(remote) => remote.fetch(reference),
                None => Err(TrackerError::ImageFetch(format!(
                    "no network source configured for `{}`",
                    reference
                ))),
            };
        }
        let path = reference.strip_prefix("file://").unwrap_or(reference);
        std::fs::read(Path::new(path))
            .map_err(|e| TrackerError::ImageFetch(format!("{}: {}", path, e)))
    }
}

/// Fetches `http://` and `https://` references with a blocking client.
///
/// Bodies larger than `max_bytes` are refused, whatever the server claims.
pub struct HttpImageSource {
    client: reqwest::blocking::Client,
    max_bytes: u64,
}

impl HttpImageSource {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pxtrack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::ImageFetch(format!("http client init failed: {}", e)))?;
        Ok(Self::with_client(client, max_bytes))
    }

    pub fn with_client(client: reqwest::blocking::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }
}

impl ImageSource for HttpImageSource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(reference)
            .send()
            .map_err(|e| TrackerError::ImageFetch(format!("{}: {}", reference, e)))?;
        if !response.status().is_success() {
            return Err(TrackerError::ImageFetch(format!(
                "{} returned {}",
                reference,
                response.status()
            )));
        }
        let too_large = || {
            TrackerError::ImageFetch(format!("{} is larger than {} bytes", reference, self.max_bytes))
        };
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        response
            .take(self.max_bytes + 1)
            .read_to_end(&mut body)
            .map_err(|e| TrackerError::ImageFetch(format!("{}: {}", reference, e)))?;
        if body.len() as u64 > self.max_bytes {
            return Err(too_large());
        }
        log_info!("fetched template image {} ({} bytes)", reference, body.len());
        Ok(body)
    }
}

fn decode_data_uri(rest: &str) -> Result<Vec<u8>> {
    let Some((meta, payload)) = rest.split_once(',') else {
        return Err(TrackerError::ImageFetch("malformed data URI".into()));
    };
    if meta.ends_with(";base64") {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| TrackerError::ImageFetch(format!("bad base64 payload: {}", e)))
    } else {
        Ok(percent_decode(payload).into_bytes())
    }
}

/// Encode PNG bytes as a `data:` URI usable as a template image reference.
pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes)?;
    if img.width() > MAX_SOURCE_DIM || img.height() > MAX_SOURCE_DIM {
        return Err(TrackerError::ImageDecode(format!(
            "image too large ({}x{})",
            img.width(),
            img.height()
        )));
    }
    Ok(img.into_rgba8())
}

/// Reduce a stylized template (each canvas pixel drawn as a `k×k` block) to
/// one pixel per canvas cell, keeping the most opaque pixel of every block.
///
/// Returns the reduced image and `k`.
pub fn detemplatize(img: &RgbaImage, tw: u32) -> Result<(RgbaImage, u32)> {
    let (w, h) = img.dimensions();
    if tw == 0 || w < tw || w % tw != 0 {
        return Err(TrackerError::InvalidUrl(format!(
            "the image width ({}) isn't a multiple of the template width ({})",
            w, tw
        )));
    }
    let k = w / tw;
    if k == 1 {
        return Ok((img.clone(), 1));
    }
    let out_h = h / k;
    if out_h == 0 {
        return Err(TrackerError::InvalidUrl("the image is shorter than one template pixel".into()));
    }

    let mut out = RgbaImage::new(tw, out_h);
    out.par_chunks_mut(4).enumerate().for_each(|(idx, px)| {
        let bx = (idx as u32 % tw) * k;
        let by = (idx as u32 / tw) * k;
        let mut best = [0u8; 4];
        for y in by..by + k {
            for x in bx..bx + k {
                let p = img.get_pixel(x, y).0;
                if p[3] > best[3] {
                    best = p;
                    if best[3] == 255 {
                        break;
                    }
                }
            }
            if best[3] == 255 {
                break;
            }
        }
        px.copy_from_slice(&best);
    });
    Ok((out, k))
}

/// Map every pixel to a palette index.  Pixels below `alpha_threshold` become
/// [`TRANSPARENT`].
pub fn reduce_to_palette(img: &RgbaImage, palette: &Palette, alpha_threshold: u8) -> Vec<u8> {
    img.as_raw()
        .par_chunks(4)
        .map(|p| {
            if p[3] < alpha_threshold.max(1) {
                TRANSPARENT
            } else {
                palette.nearest([p[0], p[1], p[2]])
            }
        })
        .collect()
}

/// Builds [`Template`]s from template links.
#[derive(Clone)]
pub struct TemplateLoader {
    source: Arc<dyn ImageSource>,
    alpha_threshold: u8,
    max_dim: u32,
}

impl TemplateLoader {
    pub fn new(source: Arc<dyn ImageSource>, alpha_threshold: u8, max_dim: u32) -> Self {
        Self {
            source,
            alpha_threshold,
            max_dim,
        }
    }

    /// Fetch, decode and reduce the image of `url`, positioned on `canvas`.
    ///
    /// The result is unregistered.  A template entirely outside the canvas is
    /// still returned; callers check `total_placeable()`.
    pub fn load(&self, url: &str, canvas: &CanvasSnapshot) -> Result<Template> {
        let parsed = TemplateUrl::parse(url)?;
        let bytes = self.source.fetch(&parsed.image)?;
        let img = decode_image(&bytes)?;
        let (reduced, scale) = match parsed.tw {
            Some(tw) => detemplatize(&img, tw)?,
            None => (img, 1),
        };
        let (w, h) = reduced.dimensions();
        if w == 0 || h == 0 {
            return Err(TrackerError::ImageDecode("the image is empty".into()));
        }
        if w > self.max_dim || h > self.max_dim {
            return Err(TrackerError::ImageDecode(format!(
                "template too large ({}x{}, max {})",
                w, h, self.max_dim
            )));
        }
        let pixels = reduce_to_palette(&reduced, canvas.palette(), self.alpha_threshold);
        let mut template = Template::from_indexed(pixels, w, h, parsed.ox, parsed.oy, canvas)?;
        template.url = url.trim().to_string();
        template.title = parsed.title;
        template.image_ref = parsed.image;
        template.scale = scale;
        Ok(template)
    }
}
