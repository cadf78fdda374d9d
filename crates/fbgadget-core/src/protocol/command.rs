//! Command matching and argument parsing.
//!
//! Commands arrive as bare ASCII, one per OUT transfer. The top-level table
//! is matched by literal prefix, first entry wins, so `flashing` must sit
//! before `flash`.

/// Top-level command handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Reboot,
    GetVar,
    Download,
    Upload,
    Boot,
    Continue,
    SetActive,
    Flashing,
    Flash,
    Erase,
    Oem,
}

/// Ordered dispatch table.
pub const DISPATCH_TABLE: &[(&str, CommandKind)] = &[
    ("reboot", CommandKind::Reboot),
    ("getvar:", CommandKind::GetVar),
    ("download:", CommandKind::Download),
    ("upload", CommandKind::Upload),
    ("boot", CommandKind::Boot),
    ("continue", CommandKind::Continue),
    ("set_active", CommandKind::SetActive),
    ("flashing", CommandKind::Flashing),
    ("flash", CommandKind::Flash),
    ("erase", CommandKind::Erase),
    ("oem", CommandKind::Oem),
];

/// First entry whose literal is a prefix of `input`.
pub fn lookup_prefix<T: Copy>(table: &[(&str, T)], input: &str) -> Option<T> {
    table
        .iter()
        .find(|(literal, _)| input.starts_with(literal))
        .map(|&(_, value)| value)
}

/// First entry equal to `input` or followed in `input` by a space.
///
/// Used for sub-commands so that `lock` never swallows `lock_critical`.
pub fn lookup_word<T: Copy>(table: &[(&str, T)], input: &str) -> Option<T> {
    table
        .iter()
        .find(|(literal, _)| {
            input
                .strip_prefix(literal)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
        })
        .map(|&(_, value)| value)
}

/// Split `name:arg` at the first colon.
pub fn split_arg(input: &str) -> (&str, Option<&str>) {
    match input.split_once(':') {
        Some((name, arg)) => (name, Some(arg)),
        None => (input, None),
    }
}

/// Parse a hex size the way hosts send it: optional `0x`, leading hex
/// digits, trailing junk ignored. No digits parses as zero.
///
/// Returns `None` only when the value does not fit in 64 bits.
pub fn parse_hex_size(text: &str) -> Option<u64> {
    let text = text.trim_start();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let end = text
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(text.len());
    if end == 0 {
        return Some(0);
    }
    u64::from_str_radix(&text[..end], 16).ok()
}
