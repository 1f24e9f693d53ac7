//! `[from N to M]` and `[random]` placeholders inside template and generated phrases.

use std::collections::HashSet;
use std::sync::LazyLock;

use rand::Rng;
use rand::seq::IndexedRandom;
use regex::{Captures, Regex};

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*(?:from|от)\s+(-?\d+)\s+(?:to|до)\s+(-?\d+)\s*\]")
        .unwrap_or_else(|e| unreachable!("range placeholder regex: {e}"))
});

static RANDOM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*(?:random|рандом)\s*\]")
        .unwrap_or_else(|e| unreachable!("random placeholder regex: {e}"))
});

/// Substituted when every participant has already been used in the message.
pub const NOBODY: &str = "кто-то";

/// Resolves placeholders across every phrase of one message, so random participants stay
/// distinct between phrases.
pub struct Resolver<'a> {
    participants: &'a [String],
    used: HashSet<&'a str>,
}

impl<'a> Resolver<'a> {
    pub fn new(participants: &'a [String]) -> Self {
        Self {
            participants,
            used: HashSet::new(),
        }
    }

    pub fn resolve<R: Rng>(&mut self, text: &str, rng: &mut R) -> String {
        let ranged = RANGE.replace_all(text, |caps: &Captures| {
            let bounds = (caps[1].parse::<i64>(), caps[2].parse::<i64>());
            match bounds {
                (Ok(a), Ok(b)) => rng.random_range(a.min(b)..=a.max(b)).to_string(),
                _ => caps[0].to_string(),
            }
        });

        RANDOM
            .replace_all(&ranged, |_: &Captures| self.next_participant(rng))
            .into_owned()
    }

    fn next_participant<R: Rng>(&mut self, rng: &mut R) -> String {
        let free: Vec<&'a String> = self
            .participants
            .iter()
            .filter(|name| !self.used.contains(name.as_str()))
            .collect();

        match free.choose(rng) {
            Some(&name) => {
                self.used.insert(name.as_str());
                format!("@{name}")
            }
            None => NOBODY.to_string(),
        }
    }
}
