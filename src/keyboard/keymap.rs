//! Key identifiers and the static key catalog
//!
//! Identifiers are Linux evdev scancodes. The catalog only attaches names
//! and groups to them; the session accepts any `KeyCode`, catalogued or not.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Represents a physical key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Catalog name, or `None` for codes the catalog does not know
    pub fn name(&self) -> Option<&'static str> {
        BY_CODE.get(self).map(|info| info.name)
    }
}

impl From<u16> for KeyCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "#{}", self.0),
        }
    }
}

/// Named grouping of related keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyGroup {
    Function,
    Arrows,
    Digits,
    Toggles,
    Navigation,
    Numpad,
    Modifiers,
    Printable,
    Other,
}

impl KeyGroup {
    pub fn all() -> &'static [KeyGroup] {
        &[
            KeyGroup::Function,
            KeyGroup::Arrows,
            KeyGroup::Digits,
            KeyGroup::Toggles,
            KeyGroup::Navigation,
            KeyGroup::Numpad,
            KeyGroup::Modifiers,
            KeyGroup::Printable,
            KeyGroup::Other,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyGroup::Function => "fn",
            KeyGroup::Arrows => "arrows",
            KeyGroup::Digits => "digits",
            KeyGroup::Toggles => "toggles",
            KeyGroup::Navigation => "navigation",
            KeyGroup::Numpad => "numpad",
            KeyGroup::Modifiers => "modifiers",
            KeyGroup::Printable => "printable",
            KeyGroup::Other => "other",
        }
    }

    /// All catalogued keys of this group, in catalog order
    pub fn keys(&self) -> Vec<KeyCode> {
        CATALOG
            .iter()
            .filter(|info| info.group == *self)
            .map(|info| info.code)
            .collect()
    }
}

impl FromStr for KeyGroup {
    type Err = UnknownKeyGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyGroup::all()
            .iter()
            .copied()
            .find(|group| group.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownKeyGroup(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key group `{0}`")]
pub struct UnknownKeyGroup(pub String);

/// Information about a key
#[derive(Debug, Clone, Copy)]
pub struct KeyInfo {
    pub code: KeyCode,
    /// Catalog name, unique and matched case-insensitively by [`key_by_name`]
    pub name: &'static str,
    /// Short label for display
    pub label: &'static str,
    pub group: KeyGroup,
}

impl KeyInfo {
    const fn new(code: u16, name: &'static str, label: &'static str, group: KeyGroup) -> Self {
        Self { code: KeyCode(code), name, label, group }
    }
}

use KeyGroup::*;

/// Key catalog for a standard US layout
pub static CATALOG: &[KeyInfo] = &[
    KeyInfo::new(59, "F1", "F1", Function),
    KeyInfo::new(60, "F2", "F2", Function),
    KeyInfo::new(61, "F3", "F3", Function),
    KeyInfo::new(62, "F4", "F4", Function),
    KeyInfo::new(63, "F5", "F5", Function),
    KeyInfo::new(64, "F6", "F6", Function),
    KeyInfo::new(65, "F7", "F7", Function),
    KeyInfo::new(66, "F8", "F8", Function),
    KeyInfo::new(67, "F9", "F9", Function),
    KeyInfo::new(68, "F10", "F10", Function),
    KeyInfo::new(87, "F11", "F11", Function),
    KeyInfo::new(88, "F12", "F12", Function),
    KeyInfo::new(103, "Up", "↑", Arrows),
    KeyInfo::new(108, "Down", "↓", Arrows),
    KeyInfo::new(105, "Left", "←", Arrows),
    KeyInfo::new(106, "Right", "→", Arrows),
    KeyInfo::new(2, "Digit1", "1", Digits),
    KeyInfo::new(3, "Digit2", "2", Digits),
    KeyInfo::new(4, "Digit3", "3", Digits),
    KeyInfo::new(5, "Digit4", "4", Digits),
    KeyInfo::new(6, "Digit5", "5", Digits),
    KeyInfo::new(7, "Digit6", "6", Digits),
    KeyInfo::new(8, "Digit7", "7", Digits),
    KeyInfo::new(9, "Digit8", "8", Digits),
    KeyInfo::new(10, "Digit9", "9", Digits),
    KeyInfo::new(11, "Digit0", "0", Digits),
    KeyInfo::new(58, "CapsLock", "Caps", Toggles),
    KeyInfo::new(70, "ScrollLock", "ScrLk", Toggles),
    KeyInfo::new(110, "Insert", "Ins", Navigation),
    KeyInfo::new(102, "Home", "Home", Navigation),
    KeyInfo::new(111, "Delete", "Del", Navigation),
    KeyInfo::new(107, "End", "End", Navigation),
    KeyInfo::new(104, "PageUp", "PgUp", Navigation),
    KeyInfo::new(109, "PageDown", "PgDn", Navigation),
    KeyInfo::new(14, "Backspace", "Bksp", Navigation),
    KeyInfo::new(69, "NumLock", "Num", Numpad),
    KeyInfo::new(82, "Numpad0", "0", Numpad),
    KeyInfo::new(79, "Numpad1", "1", Numpad),
    KeyInfo::new(80, "Numpad2", "2", Numpad),
    KeyInfo::new(81, "Numpad3", "3", Numpad),
    KeyInfo::new(75, "Numpad4", "4", Numpad),
    KeyInfo::new(76, "Numpad5", "5", Numpad),
    KeyInfo::new(77, "Numpad6", "6", Numpad),
    KeyInfo::new(71, "Numpad7", "7", Numpad),
    KeyInfo::new(72, "Numpad8", "8", Numpad),
    KeyInfo::new(73, "Numpad9", "9", Numpad),
    KeyInfo::new(98, "NumpadDivide", "/", Numpad),
    KeyInfo::new(55, "NumpadMultiply", "*", Numpad),
    KeyInfo::new(74, "NumpadSubtract", "-", Numpad),
    KeyInfo::new(78, "NumpadAdd", "+", Numpad),
    KeyInfo::new(96, "NumpadEnter", "Ent", Numpad),
    KeyInfo::new(83, "NumpadDecimal", ".", Numpad),
    KeyInfo::new(42, "ShiftLeft", "Shift", Modifiers),
    KeyInfo::new(54, "ShiftRight", "Shift", Modifiers),
    KeyInfo::new(29, "ControlLeft", "Ctrl", Modifiers),
    KeyInfo::new(97, "ControlRight", "Ctrl", Modifiers),
    KeyInfo::new(56, "AltLeft", "Alt", Modifiers),
    KeyInfo::new(100, "AltRight", "Alt", Modifiers),
    KeyInfo::new(125, "MetaLeft", "Win", Modifiers),
    KeyInfo::new(126, "MetaRight", "Win", Modifiers),
    KeyInfo::new(15, "Tab", "Tab", Printable),
    KeyInfo::new(28, "Enter", "Enter", Printable),
    KeyInfo::new(57, "Space", "Space", Printable),
    KeyInfo::new(41, "Backquote", "`", Printable),
    KeyInfo::new(12, "Minus", "-", Printable),
    KeyInfo::new(13, "Equal", "=", Printable),
    KeyInfo::new(26, "BracketLeft", "[", Printable),
    KeyInfo::new(27, "BracketRight", "]", Printable),
    KeyInfo::new(43, "Backslash", "\\", Printable),
    KeyInfo::new(53, "Slash", "/", Printable),
    KeyInfo::new(39, "Semicolon", ";", Printable),
    KeyInfo::new(40, "Quote", "'", Printable),
    KeyInfo::new(51, "Comma", ",", Printable),
    KeyInfo::new(52, "Period", ".", Printable),
    KeyInfo::new(30, "KeyA", "A", Printable),
    KeyInfo::new(48, "KeyB", "B", Printable),
    KeyInfo::new(46, "KeyC", "C", Printable),
    KeyInfo::new(32, "KeyD", "D", Printable),
    KeyInfo::new(18, "KeyE", "E", Printable),
    KeyInfo::new(33, "KeyF", "F", Printable),
    KeyInfo::new(34, "KeyG", "G", Printable),
    KeyInfo::new(35, "KeyH", "H", Printable),
    KeyInfo::new(23, "KeyI", "I", Printable),
    KeyInfo::new(36, "KeyJ", "J", Printable),
    KeyInfo::new(37, "KeyK", "K", Printable),
    KeyInfo::new(38, "KeyL", "L", Printable),
    KeyInfo::new(50, "KeyM", "M", Printable),
    KeyInfo::new(49, "KeyN", "N", Printable),
    KeyInfo::new(24, "KeyO", "O", Printable),
    KeyInfo::new(25, "KeyP", "P", Printable),
    KeyInfo::new(16, "KeyQ", "Q", Printable),
    KeyInfo::new(19, "KeyR", "R", Printable),
    KeyInfo::new(31, "KeyS", "S", Printable),
    KeyInfo::new(20, "KeyT", "T", Printable),
    KeyInfo::new(22, "KeyU", "U", Printable),
    KeyInfo::new(47, "KeyV", "V", Printable),
    KeyInfo::new(17, "KeyW", "W", Printable),
    KeyInfo::new(45, "KeyX", "X", Printable),
    KeyInfo::new(21, "KeyY", "Y", Printable),
    KeyInfo::new(44, "KeyZ", "Z", Printable),
    KeyInfo::new(1, "Escape", "Esc", Other),
    KeyInfo::new(119, "Pause", "Pause", Other),
    KeyInfo::new(127, "ContextMenu", "Menu", Other),
];

static BY_CODE: LazyLock<HashMap<KeyCode, &'static KeyInfo>> =
    LazyLock::new(|| CATALOG.iter().map(|info| (info.code, info)).collect());

static BY_NAME: LazyLock<HashMap<String, &'static KeyInfo>> = LazyLock::new(|| {
    CATALOG
        .iter()
        .map(|info| (info.name.to_ascii_lowercase(), info))
        .collect()
});

/// Look up catalog info for a code
pub fn get_key_info(code: KeyCode) -> Option<&'static KeyInfo> {
    BY_CODE.get(&code).copied()
}

/// Look up a key by catalog name, ignoring ASCII case
pub fn key_by_name(name: &str) -> Option<KeyCode> {
    BY_NAME
        .get(&name.to_ascii_lowercase())
        .map(|info| info.code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_codes_and_names_are_unique() {
        let codes: HashSet<_> = CATALOG.iter().map(|i| i.code).collect();
        let names: HashSet<_> = CATALOG.iter().map(|i| i.name.to_ascii_lowercase()).collect();
        assert_eq!(codes.len(), CATALOG.len());
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn lookup_by_name_ignores_case() {
        assert_eq!(key_by_name("KeyA"), Some(KeyCode(30)));
        assert_eq!(key_by_name("arrowless"), None);
        assert_eq!(key_by_name("up"), Some(KeyCode(103)));
    }

    #[test]
    fn groups_match_layout() {
        assert_eq!(KeyGroup::Function.keys().len(), 12);
        assert_eq!(KeyGroup::Arrows.keys().len(), 4);
        assert_eq!(KeyGroup::Digits.keys().len(), 10);
        assert_eq!("ARROWS".parse::<KeyGroup>(), Ok(KeyGroup::Arrows));
        assert!("bogus".parse::<KeyGroup>().is_err());
    }

    #[test]
    fn display_falls_back_to_raw_code() {
        assert_eq!(KeyCode(1).to_string(), "Escape");
        assert_eq!(KeyCode(999).to_string(), "#999");
        assert!(get_key_info(KeyCode(999)).is_none());
    }
}
