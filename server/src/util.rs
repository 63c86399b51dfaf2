//! Random Code Generation
//!
//! Invite codes and username collision suffixes.

use rand::Rng;

pub const INVITE_CODE_LENGTH: usize = 6;
pub const USERNAME_SUFFIX_LENGTH: usize = 4;

// lowercase because usernames are lowercased on lookup
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A suffix appended to every username, making collisions between people who
/// pick the same name vanishingly unlikely for a small user base.
#[must_use]
pub fn username_suffix() -> String {
    format!("#{}", random_string(USERNAME_SUFFIX_LENGTH))
}

/// A single-use registration code.
#[must_use]
pub fn invite_code() -> String {
    random_string(INVITE_CODE_LENGTH)
}

fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_shape() {
        let s = username_suffix();
        assert_eq!(s.len(), USERNAME_SUFFIX_LENGTH + 1);
        assert!(s.starts_with('#'));
        assert!(s[1..].chars().all(|c| CHARSET.contains(&(c as u8))));
    }

    #[test]
    fn invite_code_shape() {
        let c = invite_code();
        assert_eq!(c.len(), INVITE_CODE_LENGTH);
        assert!(c.chars().all(|ch| CHARSET.contains(&(ch as u8))));
    }
}
