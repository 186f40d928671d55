//! X11 keysym names
//!
//! Covers the names people put in a config file: printable Latin-1, function
//! keys, navigation, modifiers, keypad and the usual XF86 media keys. Single
//! characters and `0x` literals are accepted as well.

use x11rb::protocol::xproto::Keysym;

const NAMED: &[(&str, Keysym)] = &[
    // Latin-1 punctuation
    ("space", 0x0020),
    ("exclam", 0x0021),
    ("quotedbl", 0x0022),
    ("numbersign", 0x0023),
    ("dollar", 0x0024),
    ("percent", 0x0025),
    ("ampersand", 0x0026),
    ("apostrophe", 0x0027),
    ("parenleft", 0x0028),
    ("parenright", 0x0029),
    ("asterisk", 0x002a),
    ("plus", 0x002b),
    ("comma", 0x002c),
    ("minus", 0x002d),
    ("period", 0x002e),
    ("slash", 0x002f),
    ("colon", 0x003a),
    ("semicolon", 0x003b),
    ("less", 0x003c),
    ("equal", 0x003d),
    ("greater", 0x003e),
    ("question", 0x003f),
    ("at", 0x0040),
    ("bracketleft", 0x005b),
    ("backslash", 0x005c),
    ("bracketright", 0x005d),
    ("asciicircum", 0x005e),
    ("underscore", 0x005f),
    ("grave", 0x0060),
    ("braceleft", 0x007b),
    ("bar", 0x007c),
    ("braceright", 0x007d),
    ("asciitilde", 0x007e),
    // TTY and navigation
    ("BackSpace", 0xff08),
    ("Tab", 0xff09),
    ("Return", 0xff0d),
    ("Pause", 0xff13),
    ("Scroll_Lock", 0xff14),
    ("Sys_Req", 0xff15),
    ("Escape", 0xff1b),
    ("Delete", 0xffff),
    ("Home", 0xff50),
    ("Left", 0xff51),
    ("Up", 0xff52),
    ("Right", 0xff53),
    ("Down", 0xff54),
    ("Prior", 0xff55),
    ("Page_Up", 0xff55),
    ("Next", 0xff56),
    ("Page_Down", 0xff56),
    ("End", 0xff57),
    ("Print", 0xff61),
    ("Insert", 0xff63),
    ("Menu", 0xff67),
    ("Num_Lock", 0xff7f),
    // Keypad
    ("KP_Enter", 0xff8d),
    ("KP_Multiply", 0xffaa),
    ("KP_Add", 0xffab),
    ("KP_Subtract", 0xffad),
    ("KP_Decimal", 0xffae),
    ("KP_Divide", 0xffaf),
    // Modifiers
    ("Shift_L", 0xffe1),
    ("Shift_R", 0xffe2),
    ("Control_L", 0xffe3),
    ("Control_R", 0xffe4),
    ("Caps_Lock", 0xffe5),
    ("Meta_L", 0xffe7),
    ("Meta_R", 0xffe8),
    ("Alt_L", 0xffe9),
    ("Alt_R", 0xffea),
    ("Super_L", 0xffeb),
    ("Super_R", 0xffec),
    ("Hyper_L", 0xffed),
    ("Hyper_R", 0xffee),
    // Media
    ("XF86AudioLowerVolume", 0x1008_ff11),
    ("XF86AudioMute", 0x1008_ff12),
    ("XF86AudioRaiseVolume", 0x1008_ff13),
    ("XF86AudioPlay", 0x1008_ff14),
    ("XF86AudioStop", 0x1008_ff15),
    ("XF86AudioPrev", 0x1008_ff16),
    ("XF86AudioNext", 0x1008_ff17),
    ("XF86AudioMicMute", 0x1008_ffb2),
];

/// Short modifier names, as xdotool accepts them
const ALIASES: &[(&str, &str)] = &[
    ("ctrl", "Control_L"),
    ("control", "Control_L"),
    ("alt", "Alt_L"),
    ("shift", "Shift_L"),
    ("super", "Super_L"),
    ("meta", "Meta_L"),
    ("enter", "Return"),
    ("esc", "Escape"),
];

const KEYSYM_F1: Keysym = 0xffbe;
const KEYSYM_KP_0: Keysym = 0xffb0;

/// Look up the keysym for a name.
pub fn lookup(name: &str) -> Option<Keysym> {
    let name = ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map_or(name, |&(_, target)| target);

    if let Some(&(_, sym)) = NAMED.iter().find(|(n, _)| *n == name) {
        return Some(sym);
    }

    if let Some(hex) = name.strip_prefix("0x") {
        return Keysym::from_str_radix(hex, 16).ok();
    }

    if let Some(n) = name.strip_prefix('F').and_then(|n| n.parse::<Keysym>().ok()) {
        return (1..=35).contains(&n).then(|| KEYSYM_F1 + n - 1);
    }

    if let Some(n) = name.strip_prefix("KP_").and_then(|n| n.parse::<Keysym>().ok()) {
        return (n <= 9).then(|| KEYSYM_KP_0 + n);
    }

    // Latin-1 keysyms equal their code points.
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if (' '..='~').contains(&c) || ('\u{a0}'..='\u{ff}').contains(&c) => {
            Some(Keysym::from(c))
        }
        _ => None,
    }
}
