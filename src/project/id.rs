use std::collections::HashSet;

use rand::{Rng, SeedableRng, rngs::StdRng};

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
pub const ID_LEN: usize = 4;

/// Hands out node/object identifiers, unique within one export.
pub trait IdSource {
    fn next_id(&mut self) -> String;
}

/// Random 4-character base-36 ids. Reserved ids are never handed out.
pub struct RandomIds {
    rng: StdRng,
    used: HashSet<String>,
}

impl RandomIds {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            used: HashSet::new(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            used: HashSet::new(),
        }
    }

    pub fn reserve<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.used.extend(ids.into_iter().map(str::to_string));
        self
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for RandomIds {
    fn next_id(&mut self) -> String {
        loop {
            let id: String = (0..ID_LEN)
                .map(|_| ALPHABET[self.rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            if self.used.insert(id.clone()) {
                return id;
            }
        }
    }
}

/// `0000`, `0001`, ... in base 36; deterministic output for tests and diffs.
///
/// Reserved ids are skipped. Past `zzzz` ids grow a digit instead of
/// wrapping, so they stay unique.
#[derive(Default)]
pub struct SequentialIds {
    next: u64,
    reserved: HashSet<String>,
}

impl SequentialIds {
    pub fn reserve<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.reserved.extend(ids.into_iter().map(str::to_string));
        self
    }
}

impl IdSource for SequentialIds {
    fn next_id(&mut self) -> String {
        loop {
            let id = base36(self.next);
            self.next += 1;
            if !self.reserved.contains(&id) {
                return id;
            }
        }
    }
}

/// `n` in base 36, zero padded to at least `ID_LEN` digits.
fn base36(mut n: u64) -> String {
    let mut digits = Vec::with_capacity(ID_LEN);
    while n > 0 || digits.len() < ID_LEN {
        digits.push(ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    digits.iter().rev().map(|b| *b as char).collect()
}

#[cfg(test)]
#[path = "id_test.rs"]
mod id_test;
