//! Password hashing, generation and strength rules.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::seq::SliceRandom;
use rand::Rng;

use super::{AccessError, AccessResult};

const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
/// Characters accepted as "special".
pub const SPECIALS: &str = "!@#$%&*";

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Argon2id PHC string for a password.
pub fn hash_password(password: &str) -> AccessResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AccessError::Hashing(e.to_string()))
}

/// Check a password against a stored hash. Unparseable hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Random password with at least one character of every class, shuffled.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let specials = SPECIALS.as_bytes();
    let all: Vec<u8> = [UPPERCASE, LOWERCASE, DIGITS, specials].concat();

    let mut chars: Vec<u8> = [UPPERCASE, LOWERCASE, DIGITS, specials]
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while chars.len() < length {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

/// First strength rule the password breaks, if any.
pub fn strength_error(password: &str) -> Option<&'static str> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Some("La contraseña debe tener al menos 8 caracteres.");
    }
    if !password.chars().any(char::is_uppercase) {
        return Some("La contraseña debe contener al menos una letra mayúscula.");
    }
    if !password.chars().any(char::is_lowercase) {
        return Some("La contraseña debe contener al menos una letra minúscula.");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Some("La contraseña debe contener al menos un número.");
    }
    if !password.chars().any(|c| SPECIALS.contains(c)) {
        return Some("La contraseña debe contener al menos un carácter especial (!@#$%&*).");
    }
    None
}

pub fn validate_strength(password: &str) -> AccessResult<()> {
    match strength_error(password) {
        Some(msg) => Err(AccessError::Validation(msg.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("Sonrisa#2031").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Sonrisa#2031", &hash));
        assert!(!verify_password("sonrisa#2031", &hash));
        assert!(!verify_password("Sonrisa#2031", "not-a-hash"));
    }

    #[test]
    fn test_strength_messages() {
        assert_eq!(strength_error("Ab1!"), Some("La contraseña debe tener al menos 8 caracteres."));
        assert_eq!(
            strength_error("abcdefg1!"),
            Some("La contraseña debe contener al menos una letra mayúscula.")
        );
        assert_eq!(
            strength_error("ABCDEFG1!"),
            Some("La contraseña debe contener al menos una letra minúscula.")
        );
        assert_eq!(strength_error("Abcdefgh!"), Some("La contraseña debe contener al menos un número."));
        assert_eq!(
            strength_error("Abcdefg12"),
            Some("La contraseña debe contener al menos un carácter especial (!@#$%&*).")
        );
        assert_eq!(strength_error("Abcdefg1*"), None);
    }

    proptest! {
        #[test]
        fn generated_passwords_are_strong(length in 8usize..32) {
            let password = generate_password(length);
            prop_assert_eq!(password.len(), length);
            prop_assert_eq!(strength_error(&password), None);
        }
    }
}
