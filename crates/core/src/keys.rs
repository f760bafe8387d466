use crate::error::ExecutionError;

/// Platform-independent key, parsed from pyautogui-style names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Backspace,
    Delete,
    Tab,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    CapsLock,
    Ctrl,
    Alt,
    Shift,
    Meta,
    F(u8),
}

impl Key {
    /// Parse a key name. Single characters keep their case; names are case-insensitive.
    pub fn parse(name: &str) -> Result<Key, ExecutionError> {
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            return Ok(match ch {
                ' ' => Key::Space,
                '\n' | '\r' => Key::Enter,
                '\t' => Key::Tab,
                c => Key::Char(c),
            });
        }

        let lower = name.to_ascii_lowercase();
        let key = match lower.as_str() {
            "enter" | "return" => Key::Enter,
            "esc" | "escape" => Key::Escape,
            "backspace" => Key::Backspace,
            "delete" | "del" => Key::Delete,
            "tab" => Key::Tab,
            "space" => Key::Space,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" | "pgup" => Key::PageUp,
            "pagedown" | "pgdn" => Key::PageDown,
            "capslock" => Key::CapsLock,
            "ctrl" | "control" | "ctrlleft" | "ctrlright" => Key::Ctrl,
            "alt" | "option" | "altleft" | "altright" => Key::Alt,
            "shift" | "shiftleft" | "shiftright" => Key::Shift,
            "win" | "winleft" | "winright" | "cmd" | "command" | "super" | "meta" => Key::Meta,
            f if f.starts_with('f') => match f[1..].parse::<u8>() {
                Ok(n @ 1..=20) => Key::F(n),
                _ => return Err(ExecutionError::InvalidKey(name.to_string())),
            },
            _ => return Err(ExecutionError::InvalidKey(name.to_string())),
        };
        Ok(key)
    }
}

/// Parse a list of names, failing on the first unknown one.
pub fn parse_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<Key>, ExecutionError> {
    names.iter().map(|n| Key::parse(n.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_keys() {
        assert_eq!(Key::parse("Enter").unwrap(), Key::Enter);
        assert_eq!(Key::parse("return").unwrap(), Key::Enter);
        assert_eq!(Key::parse("ctrl").unwrap(), Key::Ctrl);
        assert_eq!(Key::parse("command").unwrap(), Key::Meta);
        assert_eq!(Key::parse("pgdn").unwrap(), Key::PageDown);
        assert_eq!(Key::parse("f12").unwrap(), Key::F(12));
        assert_eq!(Key::parse("F20").unwrap(), Key::F(20));
        assert!(Key::parse("f21").is_err());
        assert!(Key::parse("f0").is_err());
    }

    #[test]
    fn test_single_chars_keep_case() {
        assert_eq!(Key::parse("a").unwrap(), Key::Char('a'));
        assert_eq!(Key::parse("A").unwrap(), Key::Char('A'));
        assert_eq!(Key::parse(" ").unwrap(), Key::Space);
    }

    #[test]
    fn test_unknown_names() {
        assert!(matches!(Key::parse("hyper"), Err(ExecutionError::InvalidKey(_))));
        assert!(matches!(Key::parse("f0"), Err(ExecutionError::InvalidKey(_))));
        assert!(matches!(Key::parse("f99"), Err(ExecutionError::InvalidKey(_))));
        assert!(Key::parse("").is_err());
    }

    #[test]
    fn test_parse_all_stops_on_bad_name() {
        assert_eq!(parse_all(&["ctrl", "c"]).unwrap(), vec![Key::Ctrl, Key::Char('c')]);
        assert!(parse_all(&["ctrl", "nope"]).is_err());
    }
}
