//! Template links: `<site>#template=<image>&ox=<x>&oy=<y>&tw=<w>&title=<t>&x=<vx>&y=<vy>&scale=<s>`.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::{Result, TrackerError};

/// Decoded template link.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateUrl {
    /// Everything before the fragment, e.g. `https://pxls.space/`.
    pub site: String,
    /// Image reference (remote URL, `data:` URI or path), percent-decoded.
    pub image: String,
    pub ox: i32,
    pub oy: i32,
    /// Template width in canvas pixels; the image may be `tw * k` wide.
    pub tw: Option<u32>,
    pub title: Option<String>,
    /// Viewport centre.
    pub x: Option<i64>,
    pub y: Option<i64>,
    /// Viewport zoom.
    pub scale: Option<f64>,
}

impl TemplateUrl {
    /// Cheap test used to tell links from registry names.
    pub fn looks_like_template_url(input: &str) -> bool {
        match input.split_once(['#', '?']) {
            Some((_, params)) => params
                .split('&')
                .any(|p| p.starts_with("template=")),
            None => false,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let Some((site, params)) = input.split_once(['#', '?']) else {
            return Err(TrackerError::InvalidUrl("missing template parameters".into()));
        };

        let mut image = None;
        let mut ox = None;
        let mut oy = None;
        let mut tw = None;
        let mut title = None;
        let mut x = None;
        let mut y = None;
        let mut scale = None;

        for pair in params.split(['&', '#', '?']) {
            let Some((key, raw)) = pair.split_once('=') else { continue };
            let value = percent_decode(raw);
            match key {
                "template" => image = Some(value),
                "ox" => ox = Some(parse_num::<i32>("ox", &value)?),
                "oy" => oy = Some(parse_num::<i32>("oy", &value)?),
                "tw" => {
                    // Some links carry an empty or negative tw; treat as absent.
                    tw = value.parse::<u32>().ok().filter(|w| *w > 0);
                }
                "title" => title = Some(value).filter(|t| !t.is_empty()),
                "x" => x = value.parse::<f64>().ok().map(|v| v.floor() as i64),
                "y" => y = value.parse::<f64>().ok().map(|v| v.floor() as i64),
                "scale" => scale = value.parse::<f64>().ok().filter(|s| *s > 0.0),
                _ => {}
            }
        }

        let image = image
            .filter(|i| !i.is_empty())
            .ok_or_else(|| TrackerError::InvalidUrl("missing `template` parameter".into()))?;
        let ox = ox.ok_or_else(|| TrackerError::InvalidUrl("missing `ox` parameter".into()))?;
        let oy = oy.ok_or_else(|| TrackerError::InvalidUrl("missing `oy` parameter".into()))?;

        Ok(Self {
            site: site.to_string(),
            image,
            ox,
            oy,
            tw,
            title,
            x,
            y,
            scale,
        })
    }

    pub fn to_url(&self) -> String {
        let mut url = format!(
            "{}#template={}&ox={}&oy={}",
            self.site,
            percent_encode(&self.image),
            self.ox,
            self.oy
        );
        if let Some(tw) = self.tw {
            url.push_str(&format!("&tw={}", tw));
        }
        url.push_str("&oo=1");
        if let Some(title) = &self.title {
            url.push_str(&format!("&title={}", percent_encode(title)));
        }
        if let Some(x) = self.x {
            url.push_str(&format!("&x={}", x));
        }
        if let Some(y) = self.y {
            url.push_str(&format!("&y={}", y));
        }
        if let Some(scale) = self.scale {
            url.push_str(&format!("&scale={}", scale));
        }
        url
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| TrackerError::InvalidUrl(format!("`{}` must be an integer, got `{}`", key, value)))
}

/// Everything but RFC 3986 unreserved characters.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

/// Decode `%XX` sequences.  Malformed escapes are kept verbatim.
pub fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_pxls_link() {
        let u = TemplateUrl::parse(
            "https://pxls.space/#x=512&y=300&scale=4&template=https%3A%2F%2Fi.imgur.com%2Fabc.png&ox=500&oy=290&tw=24&oo=1&title=Cool%20Art",
        )
        .unwrap();
        assert_eq!(u.site, "https://pxls.space/");
        assert_eq!(u.image, "https://i.imgur.com/abc.png");
        assert_eq!((u.ox, u.oy), (500, 290));
        assert_eq!(u.tw, Some(24));
        assert_eq!(u.title.as_deref(), Some("Cool Art"));
        assert_eq!((u.x, u.y), (Some(512), Some(300)));
        assert_eq!(u.scale, Some(4.0));
    }

    #[test]
    fn generated_link_parses_back() {
        let u = TemplateUrl {
            site: "https://pxls.space/".into(),
            image: "data:image/png;base64,iVBOR+/=".into(),
            ox: -3,
            oy: 17,
            tw: Some(10),
            title: Some("a & b".into()),
            x: Some(2),
            y: Some(22),
            scale: Some(0.5),
        };
        assert_eq!(TemplateUrl::parse(&u.to_url()).unwrap(), u);
    }

    #[test]
    fn names_are_not_links() {
        assert!(!TemplateUrl::looks_like_template_url("mytemplate"));
        assert!(TemplateUrl::looks_like_template_url("https://pxls.space/#template=a.png&ox=1&oy=2"));
    }

    #[test]
    fn missing_origin_is_rejected() {
        let err = TemplateUrl::parse("https://pxls.space/#template=a.png&ox=1").unwrap_err();
        assert!(matches!(err, TrackerError::InvalidUrl(_)));
        let err = TemplateUrl::parse("https://pxls.space/#template=a.png&ox=one&oy=2").unwrap_err();
        assert!(matches!(err, TrackerError::InvalidUrl(_)));
    }

    #[test]
    fn malformed_escapes_survive_decoding() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz%41"), "%zzA");
    }

    #[test]
    fn only_unreserved_characters_stay_literal() {
        assert_eq!(percent_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(percent_encode("x y&z=/é"), "x%20y%26z%3D%2F%C3%A9");
        assert_eq!(percent_decode(&percent_encode("titre: été #1")), "titre: été #1");
    }
}
