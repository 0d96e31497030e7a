use thiserror::Error;

use crate::display::{Color, DisplayCommand, DisplayList, PageSurface, Point, RasterImage};
use crate::geometry::PageSpec;
use crate::job::PrintColorMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PdfError {
    #[error("document has no pages")]
    Empty,
}

/// Document-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub title: Option<String>,
    pub producer: String,
    pub color_mode: PrintColorMode,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            title: None,
            producer: format!("rendershare {}", env!("CARGO_PKG_VERSION")),
            color_mode: PrintColorMode::Color,
        }
    }
}

#[derive(Debug, Clone)]
struct PdfPage {
    page: PageSpec,
    list: DisplayList,
}

/// Open document collecting finished pages.
#[derive(Debug, Clone, Default)]
pub struct PdfDocument {
    options: PdfOptions,
    pages: Vec<PdfPage>,
}

impl PdfDocument {
    pub fn new(options: PdfOptions) -> Self {
        Self {
            options,
            pages: Vec::new(),
        }
    }

    /// Closes a page surface into the document.
    pub fn finish_page(&mut self, surface: PageSurface) {
        let page = surface.page();
        self.pages.push(PdfPage {
            page,
            list: surface.into_display_list(),
        });
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serializes the document.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PdfError> {
        if self.pages.is_empty() {
            return Err(PdfError::Empty);
        }
        let gray = self.options.color_mode == PrintColorMode::Grayscale;

        let mut builder = PdfBuilder::default();
        let catalog = builder.reserve();
        let pages_tree = builder.reserve();
        let font = builder.add(
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .as_bytes()
                .to_vec(),
        );

        let mut kids = Vec::with_capacity(self.pages.len());
        for page in &self.pages {
            let mut images = Vec::new();
            let content = render_page_stream(&page.list, page.page, gray, &mut images);

            let mut xobjects = String::new();
            for (index, image) in images.iter().enumerate() {
                let (color_space, samples) = if gray {
                    ("/DeviceGray", image.gray_over_white())
                } else {
                    ("/DeviceRGB", image.rgb_over_white())
                };
                let object = builder.add_stream(
                    &format!(
                        "/Type /XObject /Subtype /Image /Width {} /Height {} \
                         /ColorSpace {color_space} /BitsPerComponent 8",
                        image.width, image.height
                    ),
                    &samples,
                );
                xobjects.push_str(&format!("/Im{} {object} 0 R ", index + 1));
            }

            let contents = builder.add_stream("", content.as_bytes());
            let page_object = builder.add(
                format!(
                    "<< /Type /Page /Parent {pages_tree} 0 R /MediaBox [0 0 {width} {height}] \
                     /Resources << /Font << /F1 {font} 0 R >> /XObject << {xobjects}>> >> \
                     /Contents {contents} 0 R >>",
                    width = fmt_float(page.page.width_units),
                    height = fmt_float(page.page.height_units),
                )
                .into_bytes(),
            );
            kids.push(format!("{page_object} 0 R"));
        }

        builder.set(
            pages_tree,
            format!(
                "<< /Type /Pages /Count {} /Kids [{}] >>",
                kids.len(),
                kids.join(" ")
            )
            .into_bytes(),
        );
        builder.set(
            catalog,
            format!("<< /Type /Catalog /Pages {pages_tree} 0 R >>").into_bytes(),
        );

        let mut info = format!("<< /Producer ({})", pdf_escape_text(&self.options.producer));
        if let Some(title) = &self.options.title {
            info.push_str(&format!(" /Title ({})", pdf_escape_text(title)));
        }
        info.push_str(" >>");
        let info = builder.add(info.into_bytes());

        Ok(builder.finish(catalog, info))
    }
}

fn render_page_stream(
    list: &DisplayList,
    page: PageSpec,
    gray: bool,
    images: &mut Vec<RasterImage>,
) -> String {
    // View coordinates grow downwards; flip once for the whole page.
    let mut stream = format!("1 0 0 -1 0 {} cm\nq\n", fmt_float(page.height_units));
    for command in &list.commands {
        match command {
            DisplayCommand::Transform(transform) => {
                stream.push_str(&format!(
                    "Q\nq\n{s} 0 0 {s} {tx} {ty} cm\n",
                    s = fmt_scale(transform.scale),
                    tx = fmt_float(transform.tx),
                    ty = fmt_float(transform.ty),
                ));
            }
            DisplayCommand::FillRect(rect) => {
                if rect.color.is_transparent() {
                    continue;
                }
                stream.push_str(&format!(
                    "{fill}\n{x} {y} {w} {h} re f\n",
                    fill = fill_color(rect.color, gray),
                    x = fmt_float(rect.origin.x),
                    y = fmt_float(rect.origin.y),
                    w = fmt_float(rect.size.width),
                    h = fmt_float(rect.size.height),
                ));
            }
            DisplayCommand::Text(run) => {
                let baseline = Point {
                    x: run.position.x,
                    y: run.position.y + run.font_size_pt,
                };
                stream.push_str(&format!(
                    "{fill}\nBT\n/F1 {size} Tf\n1 0 0 -1 {x} {y} Tm\n({text}) Tj\nET\n",
                    fill = fill_color(run.color, gray),
                    size = fmt_float(run.font_size_pt),
                    x = fmt_float(baseline.x),
                    y = fmt_float(baseline.y),
                    text = pdf_escape_text(&run.text),
                ));
            }
            DisplayCommand::Rule { start, end, stroke } => {
                stream.push_str(&format!(
                    "{color}\n{width} w\n{x0} {y0} m {x1} {y1} l S\n",
                    color = stroke_color(stroke.color, gray),
                    width = fmt_float(stroke.width),
                    x0 = fmt_float(start.x),
                    y0 = fmt_float(start.y),
                    x1 = fmt_float(end.x),
                    y1 = fmt_float(end.y),
                ));
            }
            DisplayCommand::Image(blit) => {
                if blit.image.width == 0 || blit.image.height == 0 {
                    continue;
                }
                images.push(blit.image.clone());
                stream.push_str(&format!(
                    "q\n{w} 0 0 -{h} {x} {y} cm\n/Im{index} Do\nQ\n",
                    w = fmt_float(blit.size.width),
                    h = fmt_float(blit.size.height),
                    x = fmt_float(blit.origin.x),
                    y = fmt_float(blit.origin.y + blit.size.height),
                    index = images.len(),
                ));
            }
        }
    }
    stream.push_str("Q\n");
    stream
}

fn fmt_float(value: f32) -> String {
    format!("{:.3}", value)
}

/// Rounded down so the scaled content never outgrows the page.
fn fmt_scale(value: f32) -> String {
    let truncated = (f64::from(value) * 1e6).floor() / 1e6;
    format!("{:.6}", truncated)
}

fn gray_level(color: Color) -> f32 {
    color.luminance().clamp(0.0, 1.0)
}

fn fill_color(color: Color, gray: bool) -> String {
    if gray {
        format!("{:.3} g", gray_level(color))
    } else {
        format!("{} rg", rgb_to_pdf(color))
    }
}

fn stroke_color(color: Color, gray: bool) -> String {
    if gray {
        format!("{:.3} G", gray_level(color))
    } else {
        format!("{} RG", rgb_to_pdf(color))
    }
}

fn rgb_to_pdf(color: Color) -> String {
    format!(
        "{:.3} {:.3} {:.3}",
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0)
    )
}

/// Escapes a string literal for WinAnsi-encoded Helvetica.
fn pdf_escape_text(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '(' | ')' | '\\' => {
                output.push('\\');
                output.push(ch);
            }
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            ' '..='~' => output.push(ch),
            '\u{a0}'..='\u{ff}' => output.push_str(&format!("\\{:03o}", ch as u32)),
            _ => output.push('?'),
        }
    }
    output
}

#[derive(Default)]
struct PdfBuilder {
    objects: Vec<Option<Vec<u8>>>,
}

impl PdfBuilder {
    fn reserve(&mut self) -> usize {
        self.objects.push(None);
        self.objects.len()
    }

    fn set(&mut self, number: usize, body: Vec<u8>) {
        self.objects[number - 1] = Some(body);
    }

    fn add(&mut self, body: Vec<u8>) -> usize {
        self.objects.push(Some(body));
        self.objects.len()
    }

    fn add_stream(&mut self, dictionary: &str, data: &[u8]) -> usize {
        let mut body = if dictionary.is_empty() {
            format!("<< /Length {} >>\nstream\n", data.len()).into_bytes()
        } else {
            format!("<< {dictionary} /Length {} >>\nstream\n", data.len()).into_bytes()
        };
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.add(body)
    }

    fn finish(self, root: usize, info: usize) -> Vec<u8> {
        let mut output = Vec::new();
        output.extend_from_slice(b"%PDF-1.4\n%\xFF\xFF\xFF\xFF\n");
        let mut offsets = Vec::with_capacity(self.objects.len());

        for (index, body) in self.objects.iter().enumerate() {
            offsets.push(output.len());
            output.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
            output.extend_from_slice(body.as_deref().unwrap_or(b"null"));
            output.extend_from_slice(b"\nendobj\n");
        }

        let xref_start = output.len();
        output.extend_from_slice(
            format!("xref\n0 {}\n0000000000 65535 f \n", self.objects.len() + 1).as_bytes(),
        );
        for offset in offsets {
            output.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        output.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root {root} 0 R /Info {info} 0 R >>\nstartxref\n{xref_start}\n%%EOF\n",
                self.objects.len() + 1
            )
            .as_bytes(),
        );
        output
    }
}
