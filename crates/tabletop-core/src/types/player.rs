//! Seated players and partial player updates

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::PlayerId;

/// Smallest and largest permitted view scale
pub const VIEW_SCALE_RANGE: RangeInclusive<f64> = 0.5..=2.0;

/// Who sees the top card of a player's library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LibraryTopReveal {
    /// Only the owner
    #[serde(rename = "self")]
    OwnerOnly,
    /// Everyone at the table
    All,
}

/// A player's public record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub life: i32,
    /// Commander damage received, keyed by the player whose commander dealt it
    #[serde(default)]
    pub commander_damage: BTreeMap<PlayerId, u32>,
    #[serde(default)]
    pub commander_tax: u32,
    #[serde(default)]
    pub deck_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_top_reveal: Option<LibraryTopReveal>,
    #[serde(default = "default_view_scale")]
    pub view_scale: f64,
}

fn default_view_scale() -> f64 {
    1.0
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>, life: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            life,
            commander_damage: BTreeMap::new(),
            commander_tax: 0,
            deck_loaded: false,
            library_top_reveal: None,
            view_scale: default_view_scale(),
        }
    }

    /// Apply a partial update, clamping life into `life_bounds` and the view
    /// scale into [`VIEW_SCALE_RANGE`]
    pub fn apply(&mut self, update: &PlayerUpdate, life_bounds: &RangeInclusive<i32>) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(life) = update.life {
            self.life = life;
        }
        if let Some(delta) = update.life_delta {
            self.life = self.life.saturating_add(delta);
        }
        self.life = self.life.clamp(*life_bounds.start(), *life_bounds.end());
        for (source, amount) in &update.commander_damage {
            if *amount == 0 {
                self.commander_damage.remove(source);
            } else {
                self.commander_damage.insert(source.clone(), *amount);
            }
        }
        if let Some(tax) = update.commander_tax {
            self.commander_tax = tax;
        }
        if let Some(loaded) = update.deck_loaded {
            self.deck_loaded = loaded;
        }
        if let Some(reveal) = update.library_top_reveal {
            self.library_top_reveal = reveal;
        }
        if let Some(scale) = update.view_scale {
            self.view_scale = clamp_view_scale(scale);
        }
    }
}

/// Clamp a requested view scale into [`VIEW_SCALE_RANGE`]
pub fn clamp_view_scale(scale: f64) -> f64 {
    if scale.is_nan() {
        return default_view_scale();
    }
    scale.clamp(*VIEW_SCALE_RANGE.start(), *VIEW_SCALE_RANGE.end())
}

/// Partial update to a [`Player`]; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life_delta: Option<i32>,
    /// Entries to set; an amount of 0 clears the entry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub commander_damage: BTreeMap<PlayerId, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commander_tax: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deck_loaded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_top_reveal: Option<Option<LibraryTopReveal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_scale: Option<f64>,
}

impl PlayerUpdate {
    pub fn life(life: i32) -> Self {
        Self {
            life: Some(life),
            ..Default::default()
        }
    }

    pub fn life_delta(delta: i32) -> Self {
        Self {
            life_delta: Some(delta),
            ..Default::default()
        }
    }

    pub fn commander_damage(source: impl Into<PlayerId>, amount: u32) -> Self {
        let mut update = Self::default();
        update.commander_damage.insert(source.into(), amount);
        update
    }

    /// Whether this update touches anything besides commander damage
    pub fn touches_more_than_commander_damage(&self) -> bool {
        self.name.is_some()
            || self.life.is_some()
            || self.life_delta.is_some()
            || self.commander_tax.is_some()
            || self.deck_loaded.is_some()
            || self.library_top_reveal.is_some()
            || self.view_scale.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_more_than_commander_damage() && self.commander_damage.is_empty()
    }
}
