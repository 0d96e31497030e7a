use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::display::Color;
use crate::view::{AckStatus, ScriptAck, ViewSurface};

/// Class that marks elements excluded from captures.
/// 擷取時需隱藏之元素所使用的類別。
pub const DEFAULT_MARKER_CLASS: &str = "hidden-print";

const FORCED_BACKGROUND: &str = "#ffffff";
const FORCED_FOREGROUND: &str = "#000000";

/// Upper bound for background observers waiting on an unanswered ack.
const OBSERVER_LIMIT: Duration = Duration::from_secs(30);

/// Inline style properties the bracket may touch.
/// 樣式括號可能修改的行內樣式屬性。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StyleProperty {
    Display,
    Visibility,
    Color,
    BackgroundColor,
}

impl StyleProperty {
    pub const ALL: [StyleProperty; 4] = [
        StyleProperty::Display,
        StyleProperty::Visibility,
        StyleProperty::Color,
        StyleProperty::BackgroundColor,
    ];

    pub const fn css_name(self) -> &'static str {
        match self {
            StyleProperty::Display => "display",
            StyleProperty::Visibility => "visibility",
            StyleProperty::Color => "color",
            StyleProperty::BackgroundColor => "background-color",
        }
    }
}

/// Tunable thresholds deciding which colors count as "dark mode" colors.
/// 判斷深色模式顏色的可調整門檻。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadeHeuristic {
    /// Text at or above this luminance is treated as light text.
    pub light_luminance: f32,
    /// Backgrounds at or below this luminance are treated as dark.
    pub dark_luminance: f32,
    /// Backgrounds whose value names a gray are treated as dark.
    pub gray_counts_as_dark: bool,
}

impl Default for ShadeHeuristic {
    fn default() -> Self {
        Self {
            light_luminance: 0.9,
            dark_luminance: 0.2,
            gray_counts_as_dark: true,
        }
    }
}

impl ShadeHeuristic {
    pub fn is_light_text(&self, value: &str) -> bool {
        match Color::parse_css(value) {
            Some(color) if !color.is_transparent() => color.luminance() >= self.light_luminance,
            _ => false,
        }
    }

    pub fn is_dark_background(&self, value: &str) -> bool {
        let lowered = value.to_ascii_lowercase();
        if self.gray_counts_as_dark && (lowered.contains("gray") || lowered.contains("grey")) {
            return true;
        }
        match Color::parse_css(&lowered) {
            Some(color) if !color.is_transparent() => color.luminance() <= self.dark_luminance,
            _ => false,
        }
    }
}

/// Returns true for elements styled by a dark-mode class.
pub fn is_dark_flagged<'a>(mut classes: impl Iterator<Item = &'a str>) -> bool {
    classes.any(|class| class == "dark" || class.starts_with("dark:"))
}

/// Typed presentation mutation, applied natively by non-web hosts.
/// 樣式變更操作，供非網頁宿主直接套用。
#[derive(Debug, Clone, PartialEq)]
pub enum StyleOp {
    /// `display: none !important` on every element carrying `class`.
    HideMarked { class: String },
    /// Forces the root visible when it is computed hidden.
    RevealRoot,
    /// Light background and dark text on the root and on dark-flagged elements.
    ForceContrast {
        background: String,
        foreground: String,
        heuristic: ShadeHeuristic,
    },
    /// Removes the inline `display` of every element carrying `class`.
    UnhideMarked { class: String },
    /// Removes every `!important` inline entry of the bracket's properties.
    ClearOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    Prepare,
    Restore,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptPhase::Prepare => f.write_str("prepare"),
            ScriptPhase::Restore => f.write_str("restore"),
        }
    }
}

/// Script handed to [`ViewSurface::evaluate_script`].
/// `ops` and `source` describe the same mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleScript {
    pub phase: ScriptPhase,
    pub ops: Vec<StyleOp>,
    pub source: String,
}

/// Bracket configuration.
/// 樣式括號設定。
#[derive(Debug, Clone, PartialEq)]
pub struct BracketOptions {
    pub marker_class: String,
    pub force_contrast: bool,
    pub heuristic: ShadeHeuristic,
    /// When set, each phase waits up to this long for the view's ack.
    /// Otherwise the ack is observed in the background.
    pub ack_wait: Option<Duration>,
}

impl Default for BracketOptions {
    fn default() -> Self {
        Self {
            marker_class: DEFAULT_MARKER_CLASS.to_string(),
            force_contrast: true,
            heuristic: ShadeHeuristic::default(),
            ack_wait: None,
        }
    }
}

/// Paired prepare/restore protocol around a capture.
/// 擷取前後成對執行的準備與還原流程。
#[derive(Debug, Clone, Default)]
pub struct StyleBracket {
    options: BracketOptions,
}

impl StyleBracket {
    pub fn new(options: BracketOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BracketOptions {
        &self.options
    }

    pub fn prepare_script(&self) -> StyleScript {
        let mut ops = vec![
            StyleOp::HideMarked {
                class: self.options.marker_class.clone(),
            },
            StyleOp::RevealRoot,
        ];
        if self.options.force_contrast {
            ops.push(StyleOp::ForceContrast {
                background: FORCED_BACKGROUND.to_string(),
                foreground: FORCED_FOREGROUND.to_string(),
                heuristic: self.options.heuristic,
            });
        }
        StyleScript {
            phase: ScriptPhase::Prepare,
            source: prepare_source(&self.options),
            ops,
        }
    }

    pub fn restore_script(&self) -> StyleScript {
        StyleScript {
            phase: ScriptPhase::Restore,
            ops: vec![
                StyleOp::UnhideMarked {
                    class: self.options.marker_class.clone(),
                },
                StyleOp::ClearOverrides,
            ],
            source: restore_source(&self.options),
        }
    }

    /// Idempotent: restoring an unprepared view changes nothing.
    pub async fn restore(&self, view: &dyn ViewSurface) {
        let script = self.restore_script();
        let ack = view.evaluate_script(&script);
        self.settle(script.phase, ack).await;
    }

    /// Prepares `view` and returns the guard that restores it.
    ///
    /// The guard is armed before the acknowledgement wait, so dropping this
    /// future mid-wait still restores the view. Cancellation cuts the wait short.
    pub async fn enter(
        &self,
        view: Arc<dyn ViewSurface>,
        cancel: &CancellationToken,
    ) -> BracketGuard {
        let script = self.prepare_script();
        let ack = view.evaluate_script(&script);
        let guard = BracketGuard {
            bracket: self.clone(),
            view,
            armed: true,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => debug!("prepare ack wait cancelled"),
            _ = self.settle(script.phase, ack) => {}
        }
        guard
    }

    async fn settle(&self, phase: ScriptPhase, ack: ScriptAck) {
        match self.options.ack_wait {
            Some(limit) => log_ack(phase, ack.wait(limit).await),
            None => observe_in_background(phase, ack),
        }
    }
}

fn observe_in_background(phase: ScriptPhase, ack: ScriptAck) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                log_ack(phase, ack.wait(OBSERVER_LIMIT).await);
            });
        }
        Err(_) => debug!(%phase, "no runtime to observe style script ack"),
    }
}

fn log_ack(phase: ScriptPhase, status: AckStatus) {
    match status {
        AckStatus::Acknowledged(result) => debug!(%phase, %result, "style script applied"),
        AckStatus::Failed(err) => warn!(%phase, error = %err, "style script failed"),
        AckStatus::TimedOut => warn!(%phase, "style script not acknowledged in time"),
        AckStatus::Dropped => warn!(%phase, "view dropped style script ack"),
    }
}

/// Scoped bracket. Restores the view exactly once, either through
/// [`BracketGuard::restore`] or, failing that, when dropped.
/// 範圍樣式括號：無論以何種方式離開都只會還原一次。
pub struct BracketGuard {
    bracket: StyleBracket,
    view: Arc<dyn ViewSurface>,
    armed: bool,
}

impl BracketGuard {
    pub async fn restore(mut self) {
        self.armed = false;
        self.bracket.restore(self.view.as_ref()).await;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl fmt::Debug for BracketGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BracketGuard")
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl Drop for BracketGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        warn!("style bracket left without explicit restore; restoring on drop");
        let script = self.bracket.restore_script();
        let ack = self.view.evaluate_script(&script);
        observe_in_background(script.phase, ack);
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn prepare_source(options: &BracketOptions) -> String {
    let marker = js_string(&options.marker_class);
    let mut source = format!(
        r#"(function () {{
  var marker = {marker};
  var hidden = document.querySelectorAll('.' + CSS.escape(marker));
  hidden.forEach(function (el) {{ el.style.setProperty('display', 'none', 'important'); }});
  var root = document.body;
  var rootStyle = window.getComputedStyle(root);
  if (rootStyle.display === 'none' || rootStyle.visibility === 'hidden') {{
    root.style.setProperty('display', 'block', 'important');
    root.style.setProperty('visibility', 'visible', 'important');
  }}
"#
    );
    if options.force_contrast {
        let heuristic = options.heuristic;
        source.push_str(&format!(
            r#"  try {{
    root.style.setProperty('background-color', '{bg}', 'important');
    root.style.setProperty('color', '{fg}', 'important');
    var luminance = function (value) {{
      var m = /rgba?\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)(?:\s*,\s*([0-9.]+))?/.exec(value);
      if (!m || (m[4] !== undefined && parseFloat(m[4]) === 0)) {{ return null; }}
      return (0.2126 * m[1] + 0.7152 * m[2] + 0.0722 * m[3]) / 255;
    }};
    document.querySelectorAll('[class]').forEach(function (el) {{
      var flagged = Array.prototype.some.call(el.classList, function (c) {{
        return c === 'dark' || c.indexOf('dark:') === 0;
      }});
      if (!flagged) {{ return; }}
      var computed = window.getComputedStyle(el);
      var fg = luminance(computed.color);
      if (fg !== null && fg >= {light}) {{ el.style.setProperty('color', '{fg}', 'important'); }}
      var bg = luminance(computed.backgroundColor);
      if ((bg !== null && bg <= {dark}) || ({gray} && /gr[ae]y/i.test(computed.backgroundColor))) {{
        el.style.setProperty('background-color', '{bg}', 'important');
      }}
    }});
  }} catch (err) {{}}
"#,
            bg = FORCED_BACKGROUND,
            fg = FORCED_FOREGROUND,
            light = heuristic.light_luminance,
            dark = heuristic.dark_luminance,
            gray = heuristic.gray_counts_as_dark,
        ));
    }
    source.push_str("  return hidden.length;\n})();\n");
    source
}

fn restore_source(options: &BracketOptions) -> String {
    let marker = js_string(&options.marker_class);
    format!(
        r#"(function () {{
  var marker = {marker};
  document.querySelectorAll('.' + CSS.escape(marker)).forEach(function (el) {{
    el.style.removeProperty('display');
  }});
  var props = ['display', 'visibility', 'color', 'background-color'];
  document.querySelectorAll('*').forEach(function (el) {{
    props.forEach(function (prop) {{
      if (el.style.getPropertyPriority(prop) === 'important') {{ el.style.removeProperty(prop); }}
    }});
  }});
  return true;
}})();
"#
    )
}
