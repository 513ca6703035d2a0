//! Room identifiers are derived, never stored: both participants compute the
//! same id for a conversation, so no room table exists anywhere.

/// Separator between the two escaped participant ids.
const SEPARATOR: char = ':';

/// Derive the canonical room id for a pair of participants.
/// Order-independent: `resolve(a, b) == resolve(b, a)`.
///
/// Participant ids are escaped before joining so an id containing the
/// separator cannot collide with another pair.
pub fn resolve(a: &str, b: &str) -> String {
    let ea = escape(a);
    let eb = escape(b);
    let (first, second) = if ea <= eb { (ea, eb) } else { (eb, ea) };
    format!("{first}{SEPARATOR}{second}")
}

/// Recover the participant pair from a room id.
/// Returns `None` if the id does not contain exactly two escaped parts.
pub fn participants(room_id: &str) -> Option<(String, String)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = room_id.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return None, // dangling escape
            },
            SEPARATOR => {
                parts.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    parts.push(current);

    match <[String; 2]>::try_from(parts) {
        Ok([a, b]) => Some((a, b)),
        Err(_) => None,
    }
}

/// True if `user_id` is one of the two participants encoded in `room_id`.
pub fn is_participant(room_id: &str, user_id: &str) -> bool {
    participants(room_id)
        .map(|(a, b)| a == user_id || b == user_id)
        .unwrap_or(false)
}

fn escape(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        if c == '\\' || c == SEPARATOR {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_symmetric() {
        assert_eq!(resolve("u1", "u2"), resolve("u2", "u1"));
        assert_eq!(resolve("alice", "bob"), resolve("bob", "alice"));
    }

    #[test]
    fn both_clients_agree_on_room_id() {
        // A (id "u1") messages B (id "u2"); B computes the id independently.
        let a_side = resolve("u1", "u2");
        let b_side = resolve("u2", "u1");
        assert_eq!(a_side, b_side);
    }

    #[test]
    fn participants_round_trip() {
        let room = resolve("u1", "u2");
        let (a, b) = participants(&room).unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("u1", "u2"));
    }

    #[test]
    fn ids_containing_separator_do_not_collide() {
        // Without escaping, ("a:b", "c") and ("a", "b:c") would both yield "a:b:c".
        let first = resolve("a:b", "c");
        let second = resolve("a", "b:c");
        assert_ne!(first, second);

        let (a, b) = participants(&first).unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("a:b", "c"));
    }

    #[test]
    fn ids_containing_backslash_round_trip() {
        let room = resolve("a\\x", "b");
        let (a, b) = participants(&room).unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("a\\x", "b"));
    }

    #[test]
    fn is_participant_checks_membership() {
        let room = resolve("u1", "u2");
        assert!(is_participant(&room, "u1"));
        assert!(is_participant(&room, "u2"));
        assert!(!is_participant(&room, "u3"));
        assert!(!is_participant("not-a-room", "u1"));
    }
}
