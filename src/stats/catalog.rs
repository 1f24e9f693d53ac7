//! Declarative achievement catalog.
//!
//! Base families carry their own ascending threshold lists; the paired-command vocabulary is
//! generated from `family × key list × [5]` once at startup.

use std::collections::HashMap;

use crate::db::repositories::AchievementSeed;
use crate::stats::keys::{PairedFamily, family_keys};

pub const TOTAL_STREAMS_WATCHED: &str = "total_streams_watched";
pub const TOTAL_MESSAGES: &str = "total_messages";
pub const CLIPS_CREATED: &str = "clips_created";
pub const FIRST_MESSAGE: &str = "first_message";
pub const COMBO_COMMANDS: &str = "combo_commands";
pub const WATCH_TIME: &str = "watch_time";

struct BaseFamily {
    key: &'static str,
    title: &'static str,
    thresholds: &'static [i64],
}

const BASE_FAMILIES: &[BaseFamily] = &[
    BaseFamily {
        key: TOTAL_STREAMS_WATCHED,
        title: "Стримов посмотрено",
        thresholds: &[1, 10, 50, 100, 250],
    },
    BaseFamily {
        key: TOTAL_MESSAGES,
        title: "Сообщений в чате",
        thresholds: &[100, 500, 1000, 2000, 5000, 10000],
    },
    BaseFamily {
        key: CLIPS_CREATED,
        title: "Клипов создано",
        thresholds: &[1, 10, 50],
    },
    BaseFamily {
        key: FIRST_MESSAGE,
        title: "Первый в чате",
        thresholds: &[1, 5, 25],
    },
    BaseFamily {
        key: COMBO_COMMANDS,
        title: "Комбо",
        thresholds: &[1, 10, 50],
    },
    BaseFamily {
        key: WATCH_TIME,
        title: "Минут на стриме",
        thresholds: &[60, 600, 3000, 6000],
    },
];

const GENERATED_THRESHOLDS: &[i64] = &[5];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    title: String,
    thresholds: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<String, Entry>,
}

impl Catalog {
    /// The production catalog: base families plus generated paired-command entries.
    pub fn standard() -> Self {
        let base = BASE_FAMILIES
            .iter()
            .map(|f| (f.key.to_string(), f.title.to_string(), f.thresholds.to_vec()));

        let generated = PairedFamily::ALL.into_iter().flat_map(|family| {
            family_keys(family)
                .into_iter()
                .map(|key| (key.clone(), key, GENERATED_THRESHOLDS.to_vec()))
        });

        Self::from_entries(base.chain(generated))
    }

    /// Builds a catalog from `(stat_key, title, thresholds)`; thresholds are sorted ascending.
    pub fn from_entries<I, K, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T, Vec<i64>)>,
        K: Into<String>,
        T: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, title, mut thresholds)| {
                thresholds.sort_unstable();
                thresholds.dedup();
                (
                    key.into(),
                    Entry {
                        title: title.into(),
                        thresholds,
                    },
                )
            })
            .collect();

        Self { entries }
    }

    /// Ascending thresholds for `key`; empty for keys outside the catalog.
    pub fn thresholds(&self, key: &str) -> &[i64] {
        self.entries
            .get(key)
            .map(|entry| entry.thresholds.as_slice())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// One achievement row per `(stat_key, threshold)`.
    pub fn seeds(&self) -> Vec<AchievementSeed> {
        let mut seeds: Vec<AchievementSeed> = self
            .entries
            .iter()
            .flat_map(|(key, entry)| {
                entry.thresholds.iter().map(move |threshold| AchievementSeed {
                    stat_key: key.clone(),
                    threshold: *threshold,
                    title: format!("{}: {}", entry.title, threshold),
                })
            })
            .collect();

        seeds.sort_by(|a, b| (&a.stat_key, a.threshold).cmp(&(&b.stat_key, b.threshold)));
        seeds
    }
}
