// ═══════════════════════════════════════════════════════════════════════════
// KEYBINDINGS
// ═══════════════════════════════════════════════════════════════════════════

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::components::tools::Tool;

/// A key plus modifier flags. `ctrl` stands for the platform command key
/// ("mod" in config strings). Keys are stored lowercase.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub key: String,
}

impl KeyCombo {
    pub fn key(k: &str) -> Self {
        Self { ctrl: false, shift: false, alt: false, key: k.to_ascii_lowercase() }
    }

    pub fn ctrl_key(k: &str) -> Self {
        Self { ctrl: true, ..Self::key(k) }
    }

    pub fn ctrl_shift_key(k: &str) -> Self {
        Self { ctrl: true, shift: true, ..Self::key(k) }
    }

    /// Parses `"mod+shift+z"` style strings. `ctrl`, `cmd` and `meta` are
    /// accepted as aliases of `mod`. Returns `None` without a key part.
    pub fn parse(s: &str) -> Option<Self> {
        let mut combo = Self { ctrl: false, shift: false, alt: false, key: String::new() };
        let s = s.trim().to_ascii_lowercase();
        // "mod++" binds the plus key itself
        let (mods, key) = match s.strip_suffix("++") {
            Some(rest) => (rest, "+"),
            None => match s.rsplit_once('+') {
                Some((m, k)) => (m, k),
                None => ("", s.as_str()),
            },
        };
        for part in mods.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            match part {
                "mod" | "ctrl" | "cmd" | "meta" => combo.ctrl = true,
                "shift" => combo.shift = true,
                "alt" | "option" => combo.alt = true,
                _ => return None,
            }
        }
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        combo.key = key.to_string();
        Some(combo)
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("mod+")?;
        }
        if self.shift {
            f.write_str("shift+")?;
        }
        if self.alt {
            f.write_str("alt+")?;
        }
        f.write_str(&self.key)
    }
}

/// Everything a key press can trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HotkeyAction {
    Undo,
    Redo,
    Save,
    Export,
    ToolPencil,
    ToolEraser,
    ToolBucket,
    ToolPicker,
    ToolSelect,
    ToolWand,
    ToolLasso,
    ToolMove,
    ToolTransform,
    ToolHand,
    Copy,
    Paste,
    Cut,
    SelectAll,
    Deselect,
    InvertSelection,
    DeleteSelection,
    ToggleGrid,
    ZoomIn,
    ZoomOut,
}

impl HotkeyAction {
    /// The tool a tool-switch action selects.
    pub fn tool(self) -> Option<Tool> {
        Some(match self {
            Self::ToolPencil => Tool::Pencil,
            Self::ToolEraser => Tool::Eraser,
            Self::ToolBucket => Tool::Bucket,
            Self::ToolPicker => Tool::Picker,
            Self::ToolSelect => Tool::Select,
            Self::ToolWand => Tool::MagicWand,
            Self::ToolLasso => Tool::Lasso,
            Self::ToolMove => Tool::Move,
            Self::ToolTransform => Tool::Transform,
            Self::ToolHand => Tool::Hand,
            _ => return None,
        })
    }
}

/// Combo → action map. Several combos may trigger the same action.
#[derive(Clone, Debug)]
pub struct KeyBindings {
    bindings: HashMap<KeyCombo, HotkeyAction>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        use HotkeyAction::*;
        let mut map = HashMap::new();
        map.insert(KeyCombo::ctrl_key("z"),       Undo);
        map.insert(KeyCombo::ctrl_shift_key("z"), Redo);
        map.insert(KeyCombo::ctrl_key("y"),       Redo);
        map.insert(KeyCombo::ctrl_key("s"),       Save);
        map.insert(KeyCombo::ctrl_key("e"),       Export);
        // Tools
        map.insert(KeyCombo::key("p"),            ToolPencil);
        map.insert(KeyCombo::key("e"),            ToolEraser);
        map.insert(KeyCombo::key("b"),            ToolBucket);
        map.insert(KeyCombo::key("i"),            ToolPicker);
        map.insert(KeyCombo::key("m"),            ToolMove);
        map.insert(KeyCombo::key("t"),            ToolTransform);
        map.insert(KeyCombo::key("h"),            ToolHand);
        map.insert(KeyCombo::key("s"),            ToolSelect);
        map.insert(KeyCombo::key("w"),            ToolWand);
        map.insert(KeyCombo::key("l"),            ToolLasso);
        // Edit
        map.insert(KeyCombo::ctrl_key("c"),       Copy);
        map.insert(KeyCombo::ctrl_key("v"),       Paste);
        map.insert(KeyCombo::ctrl_key("x"),       Cut);
        map.insert(KeyCombo::ctrl_key("a"),       SelectAll);
        map.insert(KeyCombo::ctrl_key("d"),       Deselect);
        map.insert(KeyCombo::ctrl_shift_key("i"), InvertSelection);
        map.insert(KeyCombo::key("delete"),       DeleteSelection);
        map.insert(KeyCombo::key("backspace"),    DeleteSelection);
        // View
        map.insert(KeyCombo::ctrl_key("'"),       ToggleGrid);
        map.insert(KeyCombo::ctrl_key("="),       ZoomIn);
        map.insert(KeyCombo::ctrl_key("-"),       ZoomOut);

        Self { bindings: map }
    }
}

impl KeyBindings {
    pub fn action_for(&self, combo: &KeyCombo) -> Option<HotkeyAction> {
        self.bindings.get(combo).copied()
    }

    /// Looks up a config-style combo string such as `"mod+shift+z"`.
    pub fn action_for_str(&self, combo: &str) -> Option<HotkeyAction> {
        KeyCombo::parse(combo).and_then(|c| self.action_for(&c))
    }

    /// All combos bound to `action`, sorted for stable display.
    pub fn combos_for(&self, action: HotkeyAction) -> Vec<&KeyCombo> {
        let mut combos: Vec<_> = self.bindings.iter().filter(|(_, a)| **a == action).map(|(c, _)| c).collect();
        combos.sort_by_key(|c| c.to_string());
        combos
    }

    pub fn set(&mut self, combo: KeyCombo, action: HotkeyAction) {
        self.bindings.insert(combo, action);
    }

    /// Layers user overrides (combo string → action) over the current map.
    /// Unparseable combos are skipped with a warning.
    pub fn apply_overrides<'a>(&mut self, overrides: impl IntoIterator<Item = (&'a str, HotkeyAction)>) {
        for (combo_str, action) in overrides {
            match KeyCombo::parse(combo_str) {
                Some(combo) => self.set(combo, action),
                None => tracing::warn!("ignoring unparseable hotkey '{}'", combo_str),
            }
        }
    }
}
