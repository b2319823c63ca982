//! Keyboard Translator (SPEC_FULL.md §4.I): a pure function from an
//! abstract key event to the byte sequence a terminal-backed guest command
//! expects on its stdin.

/// An abstract key event as delivered by the embedder's terminal widget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

/// Translates a key event to the terminal byte sequence it produces, or
/// `None` if the event carries no byte payload. Rules are final authority
/// (§4.I); no other mapping applies.
pub fn key_event_to_bytes(event: &KeyEvent) -> Option<Vec<u8>> {
    if event.meta {
        return None;
    }

    if event.ctrl {
        if let Some(bytes) = ctrl_sequence(&event.key) {
            return Some(bytes);
        }
    }

    match event.key.as_str() {
        "Enter" => return Some(vec![0x0D]),
        "Backspace" => return Some(vec![0x7F]),
        "Tab" => {
            return Some(if event.shift {
                b"\x1b[Z".to_vec()
            } else {
                vec![0x09]
            })
        }
        "Escape" => return Some(vec![0x1B]),
        "Delete" => return Some(b"\x1b[3~".to_vec()),
        "Insert" => return Some(b"\x1b[2~".to_vec()),
        "ArrowUp" => return Some(b"\x1b[A".to_vec()),
        "ArrowDown" => return Some(b"\x1b[B".to_vec()),
        "ArrowRight" => return Some(b"\x1b[C".to_vec()),
        "ArrowLeft" => return Some(b"\x1b[D".to_vec()),
        "Home" => return Some(b"\x1b[H".to_vec()),
        "End" => return Some(b"\x1b[F".to_vec()),
        "PageUp" => return Some(b"\x1b[5~".to_vec()),
        "PageDown" => return Some(b"\x1b[6~".to_vec()),
        "F1" => return Some(b"\x1bOP".to_vec()),
        "F2" => return Some(b"\x1bOQ".to_vec()),
        "F3" => return Some(b"\x1bOR".to_vec()),
        "F4" => return Some(b"\x1bOS".to_vec()),
        "F5" => return Some(b"\x1b[15~".to_vec()),
        "F6" => return Some(b"\x1b[17~".to_vec()),
        "F7" => return Some(b"\x1b[18~".to_vec()),
        "F8" => return Some(b"\x1b[19~".to_vec()),
        "F9" => return Some(b"\x1b[20~".to_vec()),
        "F10" => return Some(b"\x1b[21~".to_vec()),
        "F11" => return Some(b"\x1b[23~".to_vec()),
        "F12" => return Some(b"\x1b[24~".to_vec()),
        _ => {}
    }

    let mut chars = event.key.chars();
    let (Some(ch), None) = (chars.next(), chars.next()) else {
        return None;
    };

    if event.alt {
        let mut bytes = vec![0x1B];
        let mut utf8 = [0u8; 4];
        bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
        return Some(bytes);
    }

    let mut utf8 = [0u8; 4];
    Some(ch.encode_utf8(&mut utf8).as_bytes().to_vec())
}

fn ctrl_sequence(key: &str) -> Option<Vec<u8>> {
    let mut chars = key.chars();
    let (Some(ch), None) = (chars.next(), chars.next()) else {
        return match key {
            "[" => Some(vec![0x1B]),
            "\\" => Some(vec![0x1C]),
            "]" => Some(vec![0x1D]),
            _ => None,
        };
    };
    if ch.is_ascii_alphabetic() {
        Some(vec![ch.to_ascii_uppercase() as u8 - 0x40])
    } else {
        match ch {
            '[' => Some(vec![0x1B]),
            '\\' => Some(vec![0x1C]),
            ']' => Some(vec![0x1D]),
            _ => None,
        }
    }
}
