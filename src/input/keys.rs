//! Logical action names -> rdev keys and buttons

use rdev::{Button, Key};

use super::ActionError;

/// A single key or pointer button that can be pressed and released
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputAction {
    Key(Key),
    Click(Button),
}

/// Alternative spellings accepted in bindings and key lists
const KEY_ALIASES: &[(&str, &str)] = &[
    ("spacebar", "space"),
    ("return", "enter"),
    ("control", "ctrl"),
    ("lctrl", "ctrl"),
    ("lshift", "shift"),
    ("escape", "esc"),
    ("del", "delete"),
    ("pgup", "pageup"),
    ("pgdn", "pagedown"),
    ("leftclick", "lmb"),
    ("rightclick", "rmb"),
    ("middleclick", "mmb"),
];

/// Lowercase, trim and resolve aliases
pub fn canonical_name(raw: &str) -> String {
    let name = raw.trim().to_lowercase();
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(name)
}

/// Parse a logical action identifier into something a backend can inject
pub fn parse_action(raw: &str) -> Result<InputAction, ActionError> {
    let name = canonical_name(raw);

    let button = match name.as_str() {
        "lmb" => Some(Button::Left),
        "rmb" => Some(Button::Right),
        "mmb" => Some(Button::Middle),
        _ => None,
    };
    if let Some(button) = button {
        return Ok(InputAction::Click(button));
    }

    key_from_name(&name)
        .map(InputAction::Key)
        .ok_or(ActionError::UnknownKey(name))
}

fn key_from_name(name: &str) -> Option<Key> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return key_from_char(c);
    }

    if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
        return function_key(n);
    }

    let key = match name {
        "space" => Key::Space,
        "enter" => Key::Return,
        "tab" => Key::Tab,
        "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" => Key::Delete,
        "insert" => Key::Insert,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "ctrl" => Key::ControlLeft,
        "rctrl" => Key::ControlRight,
        "shift" => Key::ShiftLeft,
        "rshift" => Key::ShiftRight,
        "alt" => Key::Alt,
        "altgr" => Key::AltGr,
        "capslock" => Key::CapsLock,
        _ => return None,
    };
    Some(key)
}

fn key_from_char(c: char) -> Option<Key> {
    let key = match c {
        'a' => Key::KeyA,
        'b' => Key::KeyB,
        'c' => Key::KeyC,
        'd' => Key::KeyD,
        'e' => Key::KeyE,
        'f' => Key::KeyF,
        'g' => Key::KeyG,
        'h' => Key::KeyH,
        'i' => Key::KeyI,
        'j' => Key::KeyJ,
        'k' => Key::KeyK,
        'l' => Key::KeyL,
        'm' => Key::KeyM,
        'n' => Key::KeyN,
        'o' => Key::KeyO,
        'p' => Key::KeyP,
        'q' => Key::KeyQ,
        'r' => Key::KeyR,
        's' => Key::KeyS,
        't' => Key::KeyT,
        'u' => Key::KeyU,
        'v' => Key::KeyV,
        'w' => Key::KeyW,
        'x' => Key::KeyX,
        'y' => Key::KeyY,
        'z' => Key::KeyZ,
        '0' => Key::Num0,
        '1' => Key::Num1,
        '2' => Key::Num2,
        '3' => Key::Num3,
        '4' => Key::Num4,
        '5' => Key::Num5,
        '6' => Key::Num6,
        '7' => Key::Num7,
        '8' => Key::Num8,
        '9' => Key::Num9,
        '-' => Key::Minus,
        '=' => Key::Equal,
        '`' => Key::BackQuote,
        ',' => Key::Comma,
        '.' => Key::Dot,
        '/' => Key::Slash,
        ';' => Key::SemiColon,
        '\'' => Key::Quote,
        '[' => Key::LeftBracket,
        ']' => Key::RightBracket,
        '\\' => Key::BackSlash,
        ' ' => Key::Space,
        _ => return None,
    };
    Some(key)
}

fn function_key(n: u8) -> Option<Key> {
    let key = match n {
        1 => Key::F1,
        2 => Key::F2,
        3 => Key::F3,
        4 => Key::F4,
        5 => Key::F5,
        6 => Key::F6,
        7 => Key::F7,
        8 => Key::F8,
        9 => Key::F9,
        10 => Key::F10,
        11 => Key::F11,
        12 => Key::F12,
        _ => return None,
    };
    Some(key)
}
