//! Project naming and credential generation helpers.

use rand::seq::SliceRandom;

/// Alphabet for generated passwords. Excludes `I`, `O`, `l`, `o`, `0` and `1`.
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

pub const DEFAULT_PASSWORD_LENGTH: usize = 16;

const CONTAINER_PREFIX: &str = "opencode-project-";

/// Normalize a user-supplied project name: lowercase, every character outside
/// `[a-z0-9-]` replaced by `-`, leading and trailing hyphens removed.
///
/// The result may be empty; callers treat that as an invalid name.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    replaced.trim_matches('-').to_string()
}

/// True when `name` is non-empty and already in sanitized form.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && sanitize_name(name) == name
}

pub fn container_name(project: &str) -> String {
    format!("{}{}", CONTAINER_PREFIX, project)
}

pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .filter_map(|_| PASSWORD_ALPHABET.choose(&mut rng))
        .map(|&b| b as char)
        .collect()
}
