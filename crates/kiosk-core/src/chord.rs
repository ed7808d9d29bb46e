use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

/// A modifier key. Declaration order is the canonical display order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    /// Control.
    Ctrl,
    /// Alt / Option.
    Alt,
    /// Shift.
    Shift,
    /// Meta / Command / Super.
    Meta,
}

impl Modifier {
    /// Parse a modifier name or alias, case-insensitively.
    pub fn from_spec(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Self::Ctrl),
            "alt" | "opt" | "option" => Some(Self::Alt),
            "shift" => Some(Self::Shift),
            "meta" | "cmd" | "command" | "super" | "win" => Some(Self::Meta),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn to_spec(self) -> &'static str {
        match self {
            Self::Ctrl => "ctrl",
            Self::Alt => "alt",
            Self::Shift => "shift",
            Self::Meta => "meta",
        }
    }
}

/// Canonical name for a key spec, resolving aliases.
fn canonical_key(raw: &str) -> Option<String> {
    if raw == " " {
        return Some("space".to_string());
    }
    let k = raw.trim().to_ascii_lowercase();
    if k.is_empty() {
        return None;
    }
    let name = match k.as_str() {
        "esc" => "escape",
        "grave" | "backquote" | "backtick" => "`",
        "return" => "enter",
        "spacebar" => "space",
        other => other,
    };
    Some(name.to_string())
}

/// A key chord: a set of modifiers plus a single key.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Chord {
    /// Modifier keys held down for this chord.
    pub modifiers: BTreeSet<Modifier>,
    /// The non-modifier key, by canonical name.
    pub key: String,
}

impl Chord {
    /// Parses a chord specification of the form "shift+`".
    ///
    /// - Case-insensitive for both modifiers and the key.
    /// - Components are separated by "+"; the last component is always the key.
    /// - A trailing "++" names the `+` key itself.
    pub fn parse(s: &str) -> Option<Self> {
        let (head, key_raw) = match s.strip_suffix("++") {
            Some(head) => (head, "+"),
            None => match s.rsplit_once('+') {
                Some((head, key)) => (head, key),
                None => ("", s),
            },
        };
        let key = canonical_key(key_raw)?;
        let mut modifiers = BTreeSet::new();
        if !head.is_empty() {
            for m in head.split('+') {
                let mt = m.trim();
                if mt.is_empty() {
                    return None;
                }
                modifiers.insert(Modifier::from_spec(mt)?);
            }
        }
        Some(Self { modifiers, key })
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modifiers {
            write!(f, "{}+", m.to_spec())?;
        }
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_chord() {
        let c = Chord::parse("shift+`").expect("parse");
        assert!(c.modifiers.contains(&Modifier::Shift));
        assert_eq!(c.key, "`");
        assert_eq!(c.to_string(), "shift+`");
    }

    #[test]
    fn aliases_and_canonical_order() {
        let c = Chord::parse("Shift+Cmd+Opt+Esc").expect("parse");
        assert_eq!(c.to_string(), "alt+shift+meta+escape");
        assert_eq!(
            Chord::parse("shift+grave"),
            Chord::parse("SHIFT+`"),
        );
    }

    #[test]
    fn plus_key_and_bare_keys() {
        let c = Chord::parse("ctrl++").expect("parse");
        assert_eq!(c.key, "+");
        assert!(c.modifiers.contains(&Modifier::Ctrl));

        let bare = Chord::parse("a").expect("parse");
        assert!(bare.modifiers.is_empty());
        assert_eq!(bare.to_string(), "a");
    }

    #[test]
    fn rejects_bad_specs() {
        assert_eq!(Chord::parse(""), None);
        assert_eq!(Chord::parse("hyper+a"), None);
        assert_eq!(Chord::parse("shift++a"), None);
    }

    #[test]
    fn idempotence_roundtrip() {
        for s in ["shift+`", "CTRL+ALT+Space", "shift+escape", "meta+1"] {
            let c = Chord::parse(s).expect("parse");
            let c2 = Chord::parse(&c.to_string()).expect("reparse");
            assert_eq!(c, c2, "idempotent for {s}");
        }
    }
}
