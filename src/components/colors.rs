use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::Color;

/// The 16-colour Pico-8 palette, in its canonical order.
pub const PICO8_COLORS: [Color; 16] = [
    Color::rgb(0x00, 0x00, 0x00),
    Color::rgb(0x1d, 0x2b, 0x53),
    Color::rgb(0x7e, 0x25, 0x53),
    Color::rgb(0x00, 0x87, 0x51),
    Color::rgb(0xab, 0x52, 0x36),
    Color::rgb(0x5f, 0x57, 0x4f),
    Color::rgb(0xc2, 0xc3, 0xc7),
    Color::rgb(0xff, 0xf1, 0xe8),
    Color::rgb(0xff, 0x00, 0x4d),
    Color::rgb(0xff, 0xa3, 0x00),
    Color::rgb(0xff, 0xec, 0x27),
    Color::rgb(0x00, 0xe4, 0x36),
    Color::rgb(0x29, 0xad, 0xff),
    Color::rgb(0x83, 0x76, 0x9c),
    Color::rgb(0xff, 0x77, 0xa8),
    Color::rgb(0xff, 0xcc, 0xaa),
];

pub const DEFAULT_PALETTE_ID: &str = "pico8";

// ============================================================================
// Palette
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub id: String,
    pub name: String,
    pub colors: Vec<Color>,
}

impl Palette {
    pub fn new(name: impl Into<String>, colors: Vec<Color>) -> Self {
        Self {
            id: format!("palette-{}", Uuid::new_v4().simple()),
            name: name.into(),
            colors,
        }
    }

    pub fn pico8() -> Self {
        Self {
            id: DEFAULT_PALETTE_ID.to_string(),
            name: "Pico-8".to_string(),
            colors: PICO8_COLORS.to_vec(),
        }
    }
}

// ============================================================================
// PaletteSet — the project's palettes plus the active choice
// ============================================================================

/// Always holds at least one palette, and `active_id` always names one of
/// them. Palette edits are not part of undo history.
#[derive(Clone, Debug, PartialEq)]
pub struct PaletteSet {
    palettes: Vec<Palette>,
    active_id: String,
}

impl Default for PaletteSet {
    fn default() -> Self {
        Self {
            palettes: vec![Palette::pico8()],
            active_id: DEFAULT_PALETTE_ID.to_string(),
        }
    }
}

impl PaletteSet {
    /// Rebuilds a set from persisted parts. An empty list falls back to the
    /// default palette; an unknown active id falls back to the first palette.
    pub fn from_parts(palettes: Vec<Palette>, active_id: Option<String>) -> Self {
        if palettes.is_empty() {
            return Self::default();
        }
        let active_id = active_id
            .filter(|id| palettes.iter().any(|p| &p.id == id))
            .unwrap_or_else(|| palettes[0].id.clone());
        Self { palettes, active_id }
    }

    pub fn palettes(&self) -> &[Palette] {
        &self.palettes
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn active(&self) -> &Palette {
        self.get(&self.active_id).unwrap_or(&self.palettes[0])
    }

    pub fn get(&self, id: &str) -> Option<&Palette> {
        self.palettes.iter().find(|p| p.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Palette> {
        self.palettes.iter_mut().find(|p| p.id == id)
    }

    /// Adds a palette, makes it active and returns its id.
    pub fn create(&mut self, name: impl Into<String>, colors: Vec<Color>) -> String {
        let palette = Palette::new(name, colors);
        let id = palette.id.clone();
        self.palettes.push(palette);
        self.active_id = id.clone();
        id
    }

    /// Removes a palette unless it is the last one.
    pub fn delete(&mut self, id: &str) -> bool {
        if self.palettes.len() <= 1 {
            return false;
        }
        let Some(idx) = self.palettes.iter().position(|p| p.id == id) else {
            return false;
        };
        self.palettes.remove(idx);
        if self.active_id == id {
            self.active_id = self.palettes[0].id.clone();
        }
        true
    }

    pub fn set_active(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active_id = id.to_string();
        true
    }

    pub fn rename(&mut self, id: &str, name: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(p) => {
                p.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn set_colors(&mut self, id: &str, colors: Vec<Color>) -> bool {
        match self.get_mut(id) {
            Some(p) => {
                p.colors = colors;
                true
            }
            None => false,
        }
    }

    /// Appends a colour unless the palette already contains it.
    pub fn add_color(&mut self, id: &str, color: Color) -> bool {
        match self.get_mut(id) {
            Some(p) if !p.colors.contains(&color) => {
                p.colors.push(color);
                true
            }
            _ => false,
        }
    }

    pub fn remove_color(&mut self, id: &str, index: usize) -> bool {
        match self.get_mut(id) {
            Some(p) if index < p.colors.len() => {
                p.colors.remove(index);
                true
            }
            _ => false,
        }
    }
}
