//! Headless retained view driven by a JSON scene description.
//! 以 JSON 場景描述驅動的無介面檢視。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::bracket::{is_dark_flagged, ScriptPhase, StyleOp, StyleProperty, StyleScript};
use crate::display::{Color, PageSurface, Point, RasterImage, Size, Stroke};
use crate::geometry::{compute_in, PageGeometry, Placement, PrintableArea};
use crate::job::PageAttributes;
use crate::view::{
    AdapterError, DocumentInfo, PrintDocumentAdapter, ScriptAck, ScriptError, ScriptResponder,
    ViewSurface,
};

const DEFAULT_FONT_SIZE: f32 = 14.0;
const DATA_URI_PREFIX: &str = "data:";

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to read scene {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scene: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to load image `{src}`: {reason}")]
    Image { src: String, reason: String },
}

/// Serialized scene layout.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneDocument {
    pub width: i32,
    pub height: i32,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default = "default_color")]
    pub color: String,
    /// Root is hidden by the page's own stylesheet.
    #[serde(default)]
    pub root_hidden: bool,
    #[serde(default)]
    pub elements: Vec<SceneElement>,
}

fn default_background() -> String {
    "#ffffff".to_string()
}

fn default_color() -> String {
    "#000000".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Box,
    Text,
    Rule,
    Image,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneElement {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub classes: Vec<String>,
    pub kind: ElementKind,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub w: f32,
    #[serde(default)]
    pub h: f32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub font_size: Option<f32>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    /// Hidden by the page's own stylesheet.
    #[serde(default)]
    pub hidden: bool,
}

/// Inline style entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineValue {
    pub value: String,
    pub important: bool,
}

impl InlineValue {
    fn important(value: &str) -> Self {
        Self {
            value: value.to_string(),
            important: true,
        }
    }
}

type InlineStyle = BTreeMap<StyleProperty, InlineValue>;

/// How the view answers script evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckBehavior {
    /// Apply the script and acknowledge at once.
    #[default]
    Immediate,
    /// Reject the script without applying it.
    Fail,
    /// Apply the script but never acknowledge.
    Never,
}

/// Comparable copy of every inline style in the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSnapshot {
    pub root: InlineStyle,
    pub elements: Vec<(String, InlineStyle)>,
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    classes: Vec<String>,
    kind: ElementKind,
    origin: Point,
    size: Size,
    text: Option<String>,
    font_size: f32,
    color: Option<String>,
    background: Option<String>,
    image: Option<RasterImage>,
    sheet_hidden: bool,
    inline: InlineStyle,
}

impl Node {
    fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|candidate| candidate == class)
    }

    fn inline_value(&self, property: StyleProperty) -> Option<&str> {
        self.inline.get(&property).map(|entry| entry.value.as_str())
    }

    fn is_displayed(&self) -> bool {
        let display_none = match self.inline_value(StyleProperty::Display) {
            Some(value) => value == "none",
            None => self.sheet_hidden,
        };
        let invisible = self.inline_value(StyleProperty::Visibility) == Some("hidden");
        !display_none && !invisible
    }

    fn computed_color<'a>(&'a self, inherited: &'a str) -> &'a str {
        self.inline_value(StyleProperty::Color)
            .or(self.color.as_deref())
            .unwrap_or(inherited)
    }

    fn computed_background(&self) -> Option<&str> {
        self.inline_value(StyleProperty::BackgroundColor)
            .or(self.background.as_deref())
    }
}

#[derive(Debug, Clone)]
struct SceneState {
    width: i32,
    height: i32,
    root: Node,
    elements: Vec<Node>,
}

impl SceneState {
    fn apply(&mut self, op: &StyleOp) {
        match op {
            StyleOp::HideMarked { class } => {
                for node in self.elements.iter_mut().filter(|node| node.has_class(class)) {
                    node.inline
                        .insert(StyleProperty::Display, InlineValue::important("none"));
                }
            }
            StyleOp::RevealRoot => {
                if !self.root.is_displayed() {
                    self.root
                        .inline
                        .insert(StyleProperty::Display, InlineValue::important("block"));
                    self.root
                        .inline
                        .insert(StyleProperty::Visibility, InlineValue::important("visible"));
                }
            }
            StyleOp::ForceContrast {
                background,
                foreground,
                heuristic,
            } => {
                self.root
                    .inline
                    .insert(StyleProperty::BackgroundColor, InlineValue::important(background));
                self.root
                    .inline
                    .insert(StyleProperty::Color, InlineValue::important(foreground));
                let inherited = self.root.computed_color("#000000").to_string();
                for node in self.elements.iter_mut() {
                    if !is_dark_flagged(node.classes.iter().map(String::as_str)) {
                        continue;
                    }
                    if heuristic.is_light_text(node.computed_color(&inherited)) {
                        node.inline
                            .insert(StyleProperty::Color, InlineValue::important(foreground));
                    }
                    if node
                        .computed_background()
                        .is_some_and(|value| heuristic.is_dark_background(value))
                    {
                        node.inline.insert(
                            StyleProperty::BackgroundColor,
                            InlineValue::important(background),
                        );
                    }
                }
            }
            StyleOp::UnhideMarked { class } => {
                for node in self.elements.iter_mut().filter(|node| node.has_class(class)) {
                    node.inline.remove(&StyleProperty::Display);
                }
            }
            StyleOp::ClearOverrides => {
                for node in std::iter::once(&mut self.root).chain(self.elements.iter_mut()) {
                    node.inline.retain(|_, entry| !entry.important);
                }
            }
        }
    }

    fn paint(&self, surface: &mut PageSurface) {
        if !self.root.is_displayed() {
            return;
        }
        let root_color = self.root.computed_color("#000000");
        if let Some(background) = self.root.computed_background().and_then(Color::parse_css) {
            surface.fill_rect(
                Point { x: 0.0, y: 0.0 },
                Size {
                    width: self.width.max(0) as f32,
                    height: self.height.max(0) as f32,
                },
                background,
            );
        }

        for node in self.elements.iter().filter(|node| node.is_displayed()) {
            let color = Color::parse_css(node.computed_color(root_color)).unwrap_or(Color::BLACK);
            let background = node
                .computed_background()
                .and_then(Color::parse_css)
                .filter(|color| !color.is_transparent());
            if let Some(background) = background {
                if node.kind != ElementKind::Rule {
                    surface.fill_rect(node.origin, node.size, background);
                }
            }
            match node.kind {
                ElementKind::Box => {}
                ElementKind::Text => {
                    if let Some(text) = node.text.as_deref() {
                        surface.draw_text(text, node.origin, node.font_size, color);
                    }
                }
                ElementKind::Rule => {
                    let end = Point {
                        x: node.origin.x + node.size.width,
                        y: node.origin.y,
                    };
                    let stroke = Stroke {
                        width: node.size.height.max(1.0),
                        color,
                    };
                    surface.draw_rule(node.origin, end, stroke);
                }
                ElementKind::Image => {
                    if let Some(image) = &node.image {
                        let size = if node.size.width > 0.0 && node.size.height > 0.0 {
                            node.size
                        } else {
                            Size {
                                width: image.width as f32,
                                height: image.height as f32,
                            }
                        };
                        surface.draw_image(node.origin, size, image.clone());
                    }
                }
            }
        }
    }

    fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            root: self.root.inline.clone(),
            elements: self
                .elements
                .iter()
                .map(|node| (node.id.clone(), node.inline.clone()))
                .collect(),
        }
    }
}

/// Headless [`ViewSurface`] backed by a scene document.
/// 以場景文件實作的無介面檢視。
#[derive(Debug)]
pub struct SceneView {
    state: Mutex<SceneState>,
    ack: Mutex<AckBehavior>,
    held: Mutex<Vec<ScriptResponder>>,
    evaluated: Mutex<Vec<ScriptPhase>>,
}

impl SceneView {
    /// Loads a scene file. Relative image paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| SceneError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw, path.parent())
    }

    pub fn from_json(raw: &str, base_dir: Option<&Path>) -> Result<Self, SceneError> {
        let document: SceneDocument = serde_json::from_str(raw)?;
        Self::from_document(document, base_dir)
    }

    pub fn from_document(
        document: SceneDocument,
        base_dir: Option<&Path>,
    ) -> Result<Self, SceneError> {
        let root = Node {
            id: String::from("root"),
            classes: Vec::new(),
            kind: ElementKind::Box,
            origin: Point { x: 0.0, y: 0.0 },
            size: Size {
                width: document.width.max(0) as f32,
                height: document.height.max(0) as f32,
            },
            text: None,
            font_size: DEFAULT_FONT_SIZE,
            color: Some(document.color),
            background: Some(document.background),
            image: None,
            sheet_hidden: document.root_hidden,
            inline: InlineStyle::new(),
        };
        let elements = document
            .elements
            .into_iter()
            .map(|element| build_node(element, base_dir))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            width = document.width,
            height = document.height,
            elements = elements.len(),
            "scene loaded"
        );
        Ok(Self {
            state: Mutex::new(SceneState {
                width: document.width,
                height: document.height,
                root,
                elements,
            }),
            ack: Mutex::new(AckBehavior::Immediate),
            held: Mutex::new(Vec::new()),
            evaluated: Mutex::new(Vec::new()),
        })
    }

    pub fn with_ack_behavior(self, behavior: AckBehavior) -> Self {
        self.set_ack_behavior(behavior);
        self
    }

    pub fn set_ack_behavior(&self, behavior: AckBehavior) {
        *lock(&self.ack) = behavior;
    }

    /// Simulates a relayout, e.g. a view that is not measured yet.
    pub fn resize(&self, width: i32, height: i32) {
        let mut state = lock(&self.state);
        state.width = width;
        state.height = height;
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        lock(&self.state).snapshot()
    }

    pub fn inline_style(&self, id: &str, property: StyleProperty) -> Option<InlineValue> {
        let state = lock(&self.state);
        let node = if id == "root" {
            Some(&state.root)
        } else {
            state.elements.iter().find(|node| node.id == id)
        };
        node.and_then(|node| node.inline.get(&property).cloned())
    }

    pub fn is_displayed(&self, id: &str) -> bool {
        let state = lock(&self.state);
        if id == "root" {
            return state.root.is_displayed();
        }
        state
            .elements
            .iter()
            .find(|node| node.id == id)
            .is_some_and(Node::is_displayed)
    }

    /// Phases of every script evaluated so far, in order.
    pub fn evaluated_phases(&self) -> Vec<ScriptPhase> {
        lock(&self.evaluated).clone()
    }

    pub fn restore_count(&self) -> usize {
        lock(&self.evaluated)
            .iter()
            .filter(|phase| **phase == ScriptPhase::Restore)
            .count()
    }
}

impl ViewSurface for SceneView {
    fn width(&self) -> i32 {
        lock(&self.state).width
    }

    fn height(&self) -> i32 {
        lock(&self.state).height
    }

    fn paint_into(&self, surface: &mut PageSurface) {
        lock(&self.state).paint(surface);
    }

    fn evaluate_script(&self, script: &StyleScript) -> ScriptAck {
        lock(&self.evaluated).push(script.phase);
        let behavior = *lock(&self.ack);
        if behavior == AckBehavior::Fail {
            return ScriptAck::ready(Err(ScriptError(format!(
                "{} script rejected by scene",
                script.phase
            ))));
        }

        {
            let mut state = lock(&self.state);
            for op in &script.ops {
                state.apply(op);
            }
        }
        trace!(phase = %script.phase, ops = script.ops.len(), "scene applied style ops");

        match behavior {
            AckBehavior::Never => {
                let (responder, ack) = ScriptAck::pending();
                lock(&self.held).push(responder);
                ack
            }
            _ => ScriptAck::ready(Ok(script.phase.to_string())),
        }
    }

    fn create_print_adapter(&self, job_name: &str) -> Box<dyn PrintDocumentAdapter> {
        Box::new(SceneAdapter {
            name: job_name.to_string(),
            state: lock(&self.state).clone(),
            geometry: None,
        })
    }
}

/// Print adapter producing a single page fitted into the printable area.
/// 產生單一頁面並置中於可列印區域的列印轉接器。
#[derive(Debug)]
pub struct SceneAdapter {
    name: String,
    state: SceneState,
    geometry: Option<PageGeometry>,
}

impl PrintDocumentAdapter for SceneAdapter {
    fn on_layout(&mut self, attributes: &PageAttributes) -> Result<DocumentInfo, AdapterError> {
        let area = PrintableArea::inset(attributes.page_spec(), attributes.margins);
        let geometry = compute_in(
            self.state.width,
            self.state.height,
            area,
            Placement::Centered,
        )
        .map_err(|err| AdapterError::Layout(err.to_string()))?;
        self.geometry = Some(geometry);
        Ok(DocumentInfo {
            name: self.name.clone(),
            page_count: 1,
        })
    }

    fn on_write_page(&mut self, index: u32, surface: &mut PageSurface) -> Result<(), AdapterError> {
        let geometry = self
            .geometry
            .ok_or_else(|| AdapterError::Layout("page written before layout".into()))?;
        if index != 0 {
            return Err(AdapterError::Write {
                page: index,
                reason: "scene documents have a single page".into(),
            });
        }
        surface.translate(geometry.origin.x, geometry.origin.y);
        surface.scale(geometry.scale);
        self.state.paint(surface);
        Ok(())
    }

    fn on_finish(&mut self) {
        debug!(job = %self.name, "scene adapter finished");
    }
}

fn build_node(element: SceneElement, base_dir: Option<&Path>) -> Result<Node, SceneError> {
    let image = match (&element.kind, element.src.as_deref()) {
        (ElementKind::Image, Some(src)) => Some(load_image(src, base_dir)?),
        _ => None,
    };
    Ok(Node {
        id: element.id,
        classes: element.classes,
        kind: element.kind,
        origin: Point {
            x: element.x,
            y: element.y,
        },
        size: Size {
            width: element.w,
            height: element.h,
        },
        text: element.text,
        font_size: element.font_size.unwrap_or(DEFAULT_FONT_SIZE),
        color: element.color,
        background: element.background,
        image,
        sheet_hidden: element.hidden,
        inline: InlineStyle::new(),
    })
}

fn load_image(src: &str, base_dir: Option<&Path>) -> Result<RasterImage, SceneError> {
    let image_error = |reason: String| SceneError::Image {
        src: truncate(src),
        reason,
    };
    let bytes = if let Some(rest) = src.strip_prefix(DATA_URI_PREFIX) {
        let (_, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| image_error("only base64 data URIs are supported".into()))?;
        BASE64
            .decode(payload.trim())
            .map_err(|err| image_error(err.to_string()))?
    } else {
        let path = match base_dir {
            Some(dir) => dir.join(src),
            None => PathBuf::from(src),
        };
        fs::read(&path).map_err(|err| image_error(format!("{}: {err}", path.display())))?
    };
    let decoded = image::load_from_memory(&bytes)
        .map_err(|err| image_error(err.to_string()))?
        .to_rgba8();
    Ok(RasterImage {
        width: decoded.width(),
        height: decoded.height(),
        rgba: decoded.into_raw(),
    })
}

fn truncate(src: &str) -> String {
    const LIMIT: usize = 64;
    if src.len() <= LIMIT {
        return src.to_string();
    }
    let mut end = LIMIT;
    while !src.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &src[..end])
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::{BracketOptions, StyleBracket};
    use crate::display::DisplayCommand;
    use crate::geometry::PageSpec;
    use crate::job::Margin;

    const SCENE: &str = r##"{
        "width": 400,
        "height": 600,
        "background": "#111111",
        "color": "#eeeeee",
        "elements": [
            { "id": "title", "kind": "text", "x": 10, "y": 10, "text": "Dose table" },
            { "id": "toolbar", "kind": "box", "classes": ["hidden-print"], "w": 400, "h": 40, "background": "#333" },
            { "id": "card", "kind": "box", "classes": ["dark:bg-gray-800"], "y": 50, "w": 400, "h": 100,
              "background": "rgb(0, 0, 0)", "color": "white" },
            { "id": "plain", "kind": "box", "classes": ["plain"], "y": 160, "w": 10, "h": 10, "background": "black" },
            { "id": "rule", "kind": "rule", "y": 200, "w": 400, "h": 2 }
        ]
    }"##;

    fn scene() -> SceneView {
        SceneView::from_json(SCENE, None).expect("scene parses")
    }

    fn apply(view: &SceneView, script: &StyleScript) {
        let _ = view.evaluate_script(script);
    }

    #[test]
    fn prepare_hides_marked_and_forces_contrast() {
        let view = scene();
        apply(&view, &StyleBracket::default().prepare_script());

        assert!(!view.is_displayed("toolbar"));
        assert!(view.is_displayed("title"));
        assert_eq!(
            view.inline_style("root", StyleProperty::BackgroundColor),
            Some(InlineValue::important("#ffffff"))
        );
        assert_eq!(
            view.inline_style("card", StyleProperty::Color),
            Some(InlineValue::important("#000000"))
        );
        assert_eq!(
            view.inline_style("card", StyleProperty::BackgroundColor),
            Some(InlineValue::important("#ffffff"))
        );
        assert_eq!(view.inline_style("plain", StyleProperty::BackgroundColor), None);
    }

    #[test]
    fn restore_returns_to_initial_state_and_is_idempotent() {
        let view = scene();
        let bracket = StyleBracket::default();
        let initial = view.snapshot();

        apply(&view, &bracket.restore_script());
        assert_eq!(view.snapshot(), initial, "restore without prepare");

        apply(&view, &bracket.prepare_script());
        assert_ne!(view.snapshot(), initial);
        apply(&view, &bracket.restore_script());
        let once = view.snapshot();
        apply(&view, &bracket.restore_script());
        assert_eq!(view.snapshot(), once);
        assert_eq!(once, initial);
    }

    #[test]
    fn hidden_root_is_revealed_then_restored() {
        let view = SceneView::from_json(
            r#"{ "width": 10, "height": 10, "root_hidden": true }"#,
            None,
        )
        .unwrap();
        assert!(!view.is_displayed("root"));
        let bracket = StyleBracket::new(BracketOptions {
            force_contrast: false,
            ..BracketOptions::default()
        });
        apply(&view, &bracket.prepare_script());
        assert!(view.is_displayed("root"));
        apply(&view, &bracket.restore_script());
        assert!(!view.is_displayed("root"));
    }

    #[test]
    fn failing_view_leaves_styles_untouched() {
        let view = scene().with_ack_behavior(AckBehavior::Fail);
        let initial = view.snapshot();
        apply(&view, &StyleBracket::default().prepare_script());
        assert_eq!(view.snapshot(), initial);
        assert_eq!(view.evaluated_phases(), vec![ScriptPhase::Prepare]);
    }

    #[test]
    fn paint_skips_hidden_elements() {
        let view = scene();
        apply(&view, &StyleBracket::default().prepare_script());
        let mut surface = PageSurface::new(PageSpec::A4);
        view.paint_into(&mut surface);
        let list = surface.into_display_list();
        let texts: Vec<_> = list
            .commands
            .iter()
            .filter_map(|command| match command {
                DisplayCommand::Text(run) => Some(run.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Dose table"]);
        // root background, card and plain; toolbar is hidden
        let fills = list
            .commands
            .iter()
            .filter(|command| matches!(command, DisplayCommand::FillRect(_)))
            .count();
        assert_eq!(fills, 3);
    }

    #[test]
    fn data_uri_images_decode() {
        let mut png = Vec::new();
        let pixels = image::RgbaImage::from_pixel(2, 3, image::Rgba([10, 20, 30, 255]));
        image::DynamicImage::ImageRgba8(pixels)
            .write_to(
                &mut std::io::Cursor::new(&mut png),
                image::ImageOutputFormat::Png,
            )
            .unwrap();
        let raw = format!(
            r#"{{ "width": 10, "height": 10, "elements": [
                {{ "id": "logo", "kind": "image", "src": "data:image/png;base64,{}" }}
            ] }}"#,
            BASE64.encode(&png)
        );
        let view = SceneView::from_json(&raw, None).unwrap();
        let mut surface = PageSurface::new(PageSpec::A4);
        view.paint_into(&mut surface);
        let blit = surface
            .display_list()
            .commands
            .iter()
            .find_map(|command| match command {
                DisplayCommand::Image(blit) => Some(blit.clone()),
                _ => None,
            })
            .expect("image drawn");
        assert_eq!((blit.image.width, blit.image.height), (2, 3));
        assert_eq!(blit.size, Size { width: 2.0, height: 3.0 });
    }

    #[test]
    fn broken_image_source_is_reported() {
        let err = SceneView::from_json(
            r#"{ "width": 1, "height": 1, "elements": [
                { "kind": "image", "src": "data:image/png;base64,@@@" }
            ] }"#,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SceneError::Image { .. }));
    }

    #[test]
    fn adapter_lays_out_one_centered_page() {
        let view = scene();
        let mut adapter = view.create_print_adapter("job");
        let attrs = PageAttributes {
            margins: Margin::uniform(20.0),
            ..PageAttributes::default()
        };
        let info = adapter.on_layout(&attrs).unwrap();
        assert_eq!(info.page_count, 1);

        let mut surface = PageSurface::new(attrs.page_spec());
        adapter.on_write_page(0, &mut surface).unwrap();
        let transform = surface.transform();
        let scale = (555.0f32 / 400.0).min(802.0 / 600.0);
        assert!((transform.scale - scale).abs() < 1e-4);
        assert!(transform.tx > 20.0);
        assert!(matches!(
            adapter.on_write_page(1, &mut surface),
            Err(AdapterError::Write { page: 1, .. })
        ));
    }
}
