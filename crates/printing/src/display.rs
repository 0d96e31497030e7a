use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::geometry::PageSpec;

/// Recorded drawing commands for a single page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayList {
    pub commands: Vec<DisplayCommand>,
}

impl DisplayList {
    /// Append a command to the display list.
    pub fn push(&mut self, command: DisplayCommand) {
        self.commands.push(command);
    }

    /// Returns true if the display list is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of commands that actually draw something.
    pub fn drawing_len(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| !matches!(command, DisplayCommand::Transform(_)))
            .count()
    }
}

/// Low-level drawing commands emitted while a view paints itself.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayCommand {
    FillRect(Rectangle),
    Text(GlyphRun),
    Rule {
        start: Point,
        end: Point,
        stroke: Stroke,
    },
    Image(ImageBlit),
    /// Replaces the current page transform for every following command.
    Transform(Transform),
}

/// Describes an individual run of text.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRun {
    pub text: String,
    pub font_size_pt: f32,
    pub position: Point,
    pub color: Color,
}

/// Represents a filled rectangular region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub origin: Point,
    pub size: Size,
    pub color: Color,
}

/// Raster image placed into a rectangle of view coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBlit {
    pub origin: Point,
    pub size: Size,
    pub image: RasterImage,
}

/// 2D size representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

/// 2D coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Uniform scale followed by translation: `p' = p * scale + (tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn apply(&self, point: Point) -> Point {
        Point {
            x: point.x * self.scale + self.tx,
            y: point.y * self.scale + self.ty,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Straight RGBA8 pixel buffer.
#[derive(Clone, PartialEq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

impl RasterImage {
    /// RGB samples with alpha composited over white.
    pub fn rgb_over_white(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.rgba.len() / 4 * 3);
        for pixel in self.rgba.chunks_exact(4) {
            let alpha = pixel[3] as u32;
            for channel in &pixel[..3] {
                let blended = (*channel as u32 * alpha + 255 * (255 - alpha)) / 255;
                out.push(blended as u8);
            }
        }
        out
    }

    /// Single-channel luma samples with alpha composited over white.
    pub fn gray_over_white(&self) -> Vec<u8> {
        self.rgb_over_white()
            .chunks_exact(3)
            .map(|rgb| {
                let luma = 0.2126 * rgb[0] as f32 + 0.7152 * rgb[1] as f32 + 0.0722 * rgb[2] as f32;
                luma.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

/// RGBA color stored in normalized floating-point form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid hex regex"));

static RGB_COLOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*(?:,\s*([0-9]*\.?[0-9]+)\s*)?\)$",
    )
    .expect("valid rgb regex")
});

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, 1.0)
    }

    /// Parses the CSS color forms a view reports: `#rgb`, `#rrggbb`,
    /// `rgb()`, `rgba()` and a handful of keywords.
    pub fn parse_css(input: &str) -> Option<Self> {
        let value = input.trim().to_ascii_lowercase();
        if let Some(caps) = HEX_COLOR.captures(&value) {
            let digits = caps.get(1)?.as_str();
            let expand = |s: &str| u8::from_str_radix(s, 16).ok();
            return if digits.len() == 3 {
                let mut channels = digits.chars().map(|c| expand(&format!("{c}{c}")));
                Some(Self::from_rgb8(
                    channels.next()??,
                    channels.next()??,
                    channels.next()??,
                ))
            } else {
                Some(Self::from_rgb8(
                    expand(&digits[0..2])?,
                    expand(&digits[2..4])?,
                    expand(&digits[4..6])?,
                ))
            };
        }
        if let Some(caps) = RGB_COLOR.captures(&value) {
            let channel = |index: usize| -> Option<u8> {
                caps.get(index)?.as_str().parse::<u16>().ok().map(|v| v.min(255) as u8)
            };
            let mut color = Self::from_rgb8(channel(1)?, channel(2)?, channel(3)?);
            if let Some(alpha) = caps.get(4) {
                color.a = alpha.as_str().parse::<f32>().ok()?.clamp(0.0, 1.0);
            }
            return Some(color);
        }
        let named = match value.as_str() {
            "black" => Self::BLACK,
            "white" => Self::WHITE,
            "gray" | "grey" => Self::from_rgb8(128, 128, 128),
            "darkgray" | "darkgrey" => Self::from_rgb8(169, 169, 169),
            "lightgray" | "lightgrey" => Self::from_rgb8(211, 211, 211),
            "red" => Self::from_rgb8(255, 0, 0),
            "green" => Self::from_rgb8(0, 128, 0),
            "blue" => Self::from_rgb8(0, 0, 255),
            "transparent" => Self::new(0.0, 0.0, 0.0, 0.0),
            _ => return None,
        };
        Some(named)
    }

    /// Relative luminance in `0.0..=1.0` (linear weights, no gamma).
    pub fn luminance(&self) -> f32 {
        0.2126 * self.r + 0.7152 * self.g + 0.0722 * self.b
    }

    pub fn is_transparent(&self) -> bool {
        self.a <= 0.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rgba({:.3}, {:.3}, {:.3}, {:.3})",
            self.r, self.g, self.b, self.a
        )
    }
}

/// Stroke descriptor for simple line drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub width: f32,
    pub color: Color,
}

/// Drawing surface for one page. Views paint in their own pixel
/// coordinates; the current transform maps them onto the page.
#[derive(Debug, Clone)]
pub struct PageSurface {
    page: PageSpec,
    transform: Transform,
    list: DisplayList,
}

impl PageSurface {
    pub fn new(page: PageSpec) -> Self {
        Self {
            page,
            transform: Transform::IDENTITY,
            list: DisplayList::default(),
        }
    }

    pub fn page(&self) -> PageSpec {
        self.page
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Moves the origin by `(dx, dy)` in the current coordinate space.
    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.transform.tx += dx * self.transform.scale;
        self.transform.ty += dy * self.transform.scale;
        self.list.push(DisplayCommand::Transform(self.transform));
    }

    /// Multiplies the current scale.
    pub fn scale(&mut self, factor: f32) {
        self.transform.scale *= factor;
        self.list.push(DisplayCommand::Transform(self.transform));
    }

    pub fn fill_rect(&mut self, origin: Point, size: Size, color: Color) {
        self.list.push(DisplayCommand::FillRect(Rectangle {
            origin,
            size,
            color,
        }));
    }

    pub fn draw_text(&mut self, text: impl Into<String>, position: Point, font_size_pt: f32, color: Color) {
        self.list.push(DisplayCommand::Text(GlyphRun {
            text: text.into(),
            font_size_pt,
            position,
            color,
        }));
    }

    pub fn draw_rule(&mut self, start: Point, end: Point, stroke: Stroke) {
        self.list.push(DisplayCommand::Rule { start, end, stroke });
    }

    pub fn draw_image(&mut self, origin: Point, size: Size, image: RasterImage) {
        self.list.push(DisplayCommand::Image(ImageBlit {
            origin,
            size,
            image,
        }));
    }

    pub fn display_list(&self) -> &DisplayList {
        &self.list
    }

    pub fn into_display_list(self) -> DisplayList {
        self.list
    }
}
