//! Two-level classification used to index handles

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Coarse namespace a handle belongs to (game mode, screen, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    /// Title screen
    Title,
    /// In-game
    Game,
    /// Exit / shutdown flow
    Exit,
    /// Menus
    Menu,
    /// Anything else
    Other,
}

/// Resource kind within a group
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Instantiable scene templates
    Prefab,
    /// Textures and sprites
    Texture,
    /// Audio clips
    Audio,
    /// UI layouts
    UI,
    /// Anything else
    Other,
}

/// Lifecycle scope a handle can be tied to (a scene build index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope {}", self.0)
    }
}

impl Group {
    /// Every group, in declaration order
    pub const ALL: [Group; 5] = [Group::Title, Group::Game, Group::Exit, Group::Menu, Group::Other];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Title => "Title",
            Group::Game => "Game",
            Group::Exit => "Exit",
            Group::Menu => "Menu",
            Group::Other => "Other",
        }
    }
}

impl Category {
    /// Every category, in declaration order
    pub const ALL: [Category; 5] = [
        Category::Prefab,
        Category::Texture,
        Category::Audio,
        Category::UI,
        Category::Other,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Prefab => "Prefab",
            Category::Texture => "Texture",
            Category::Audio => "Audio",
            Category::UI => "UI",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Names match case-insensitively.
impl FromStr for Group {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Group::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidGroup(s.to_string()))
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidCategory(s.to_string()))
    }
}

impl TryFrom<u8> for Group {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Group::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| Error::InvalidGroup(value.to_string()))
    }
}

impl TryFrom<u8> for Category {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Category::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| Error::InvalidCategory(value.to_string()))
    }
}
