use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::display::Point;
use crate::job::Margin;

/// Width substituted when the view has not been laid out yet.
pub const FALLBACK_VIEW_WIDTH: i32 = 800;
/// Height substituted when the view has not been laid out yet.
pub const FALLBACK_VIEW_HEIGHT: i32 = 1200;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("target area must be strictly positive, got {width}x{height}")]
    NonPositiveArea { width: f32, height: f32 },
}

/// Orientation of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Paper formats offered to callers. Sizes are in points (1/72").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperFormat {
    #[default]
    A4,
    Letter,
    Legal,
}

impl PaperFormat {
    pub const fn portrait_points(self) -> (f32, f32) {
        match self {
            PaperFormat::A4 => (595.0, 842.0),
            PaperFormat::Letter => (612.0, 792.0),
            PaperFormat::Legal => (612.0, 1008.0),
        }
    }
}

/// Fixed page size in units (points).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpec {
    pub width_units: f32,
    pub height_units: f32,
}

impl PageSpec {
    /// ISO A4 at 72 units per inch.
    pub const A4: PageSpec = PageSpec {
        width_units: 595.0,
        height_units: 842.0,
    };

    pub fn new(width_units: f32, height_units: f32) -> Result<Self, GeometryError> {
        if !(width_units > 0.0 && height_units > 0.0)
            || !width_units.is_finite()
            || !height_units.is_finite()
        {
            return Err(GeometryError::NonPositiveArea {
                width: width_units,
                height: height_units,
            });
        }
        Ok(Self {
            width_units,
            height_units,
        })
    }

    pub const fn from_format(format: PaperFormat, orientation: Orientation) -> Self {
        let (width, height) = format.portrait_points();
        match orientation {
            Orientation::Portrait => Self {
                width_units: width,
                height_units: height,
            },
            Orientation::Landscape => Self {
                width_units: height,
                height_units: width,
            },
        }
    }
}

impl Default for PageSpec {
    fn default() -> Self {
        Self::A4
    }
}

/// Rectangle on the page that content may occupy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintableArea {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PrintableArea {
    pub const fn full(page: PageSpec) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: page.width_units,
            height: page.height_units,
        }
    }

    pub fn inset(page: PageSpec, margin: Margin) -> Self {
        Self {
            x: margin.left,
            y: margin.top,
            width: page.width_units - margin.left - margin.right,
            height: page.height_units - margin.top - margin.bottom,
        }
    }
}

/// Where the scaled content sits inside the target area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// Content starts at the area origin.
    #[default]
    Origin,
    /// Content is centered on the axis that has slack.
    Centered,
}

/// Result of fitting a view into a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub scale: f32,
    pub origin: Point,
    pub view_width: f32,
    pub view_height: f32,
    pub used_fallback: bool,
}

impl PageGeometry {
    /// Size the view occupies on the page after scaling.
    pub fn scaled_size(&self) -> (f32, f32) {
        (self.view_width * self.scale, self.view_height * self.scale)
    }
}

/// Fits a view of `view_width`×`view_height` pixels onto the whole page,
/// anchored at the page origin.
pub fn compute(
    view_width: i32,
    view_height: i32,
    page: PageSpec,
) -> Result<PageGeometry, GeometryError> {
    compute_in(
        view_width,
        view_height,
        PrintableArea::full(page),
        Placement::Origin,
    )
}

/// Fits a view into an arbitrary area of the page.
///
/// The scale is uniform (`min` of both axis ratios) so content is neither
/// distorted nor clipped on the binding axis.
pub fn compute_in(
    view_width: i32,
    view_height: i32,
    area: PrintableArea,
    placement: Placement,
) -> Result<PageGeometry, GeometryError> {
    if !(area.width > 0.0 && area.height > 0.0) {
        return Err(GeometryError::NonPositiveArea {
            width: area.width,
            height: area.height,
        });
    }

    let used_fallback = view_width <= 0 || view_height <= 0;
    let (width, height) = if used_fallback {
        (FALLBACK_VIEW_WIDTH, FALLBACK_VIEW_HEIGHT)
    } else {
        (view_width, view_height)
    };
    let view_width = width as f32;
    let view_height = height as f32;

    let scale = (area.width / view_width).min(area.height / view_height);
    if !(scale.is_finite() && scale > 0.0) {
        return Err(GeometryError::NonPositiveArea {
            width: area.width,
            height: area.height,
        });
    }

    let origin = match placement {
        Placement::Origin => Point {
            x: area.x,
            y: area.y,
        },
        Placement::Centered => Point {
            x: area.x + (area.width - view_width * scale) / 2.0,
            y: area.y + (area.height - view_height * scale) / 2.0,
        },
    };

    Ok(PageGeometry {
        scale,
        origin,
        view_width,
        view_height,
        used_fallback,
    })
}
