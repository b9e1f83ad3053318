//! Passwords for generated SQL users.
//!
//! Every password is 12 characters long and holds at least one digit and one
//! symbol. All draws come from the operating system's CSPRNG.

use rand::{rngs::OsRng, seq::SliceRandom, Rng};

pub const PASSWORD_LENGTH: usize = 12;

pub const DIGITS: &[u8] = b"0123456789";
pub const SYMBOLS: &[u8] = b"~=+%^*/()[]{}!@#$?|";
const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn pick<R: Rng + ?Sized>(rng: &mut R, alphabet: &[u8]) -> u8 {
    // gen_range samples uniformly, without modulo bias
    alphabet[rng.gen_range(0..alphabet.len())]
}

pub fn generate() -> String {
    let mut rng = OsRng;
    let all: Vec<u8> = [LETTERS, DIGITS, SYMBOLS].concat();

    let mut buf = Vec::with_capacity(PASSWORD_LENGTH);
    buf.push(pick(&mut rng, DIGITS));
    buf.push(pick(&mut rng, SYMBOLS));
    while buf.len() < PASSWORD_LENGTH {
        buf.push(pick(&mut rng, &all));
    }
    buf.shuffle(&mut rng);

    buf.into_iter().map(char::from).collect()
}
