//! Stat-key vocabulary for the paired social commands.
//!
//! For a family `f` and tag state `t` the keys are `f_t`, `f_self_t`, `f_tagged_equals_partner`,
//! `f_tag_match_success`, and for each special percent `p` the variants `f_t_p`, `f_self_t_p` and
//! `f_tagged_equals_partner_p`.

use core::fmt;

/// Outcome rolls that trigger the percent-suffixed counters.
pub const SPECIAL_PERCENTS: [u8; 3] = [0, 69, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairedFamily {
    Intim,
    Poceluy,
}

impl PairedFamily {
    pub const ALL: [PairedFamily; 2] = [PairedFamily::Intim, PairedFamily::Poceluy];

    pub fn as_str(&self) -> &'static str {
        match self {
            PairedFamily::Intim => "intim",
            PairedFamily::Poceluy => "poceluy",
        }
    }

    /// The family whose recent use counts towards a combo.
    pub fn other(&self) -> PairedFamily {
        match self {
            PairedFamily::Intim => PairedFamily::Poceluy,
            PairedFamily::Poceluy => PairedFamily::Intim,
        }
    }
}

impl fmt::Display for PairedFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    WithTag,
    NoTag,
}

impl TagState {
    pub const ALL: [TagState; 2] = [TagState::WithTag, TagState::NoTag];

    pub fn from_present(present: bool) -> Self {
        if present {
            TagState::WithTag
        } else {
            TagState::NoTag
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagState::WithTag => "with_tag",
            TagState::NoTag => "no_tag",
        }
    }
}

pub fn is_special(percent: u8) -> bool {
    SPECIAL_PERCENTS.contains(&percent)
}

fn base(family: PairedFamily, tag: TagState) -> String {
    format!("{}_{}", family, tag.as_str())
}

fn self_key(family: PairedFamily, tag: TagState) -> String {
    format!("{}_self_{}", family, tag.as_str())
}

fn tagged_equals_partner(family: PairedFamily) -> String {
    format!("{family}_tagged_equals_partner")
}

fn tag_match_success(family: PairedFamily) -> String {
    format!("{family}_tag_match_success")
}

fn with_percent(key: &str, percent: u8) -> String {
    format!("{key}_{percent}")
}

/// Every key a family can ever produce, in a stable order.
pub fn family_keys(family: PairedFamily) -> Vec<String> {
    let mut keys = Vec::new();
    let mut suffixable = Vec::new();

    for tag in TagState::ALL {
        suffixable.push(base(family, tag));
        suffixable.push(self_key(family, tag));
    }
    suffixable.push(tagged_equals_partner(family));

    keys.extend(suffixable.iter().cloned());
    keys.push(tag_match_success(family));

    for percent in SPECIAL_PERCENTS {
        keys.extend(suffixable.iter().map(|key| with_percent(key, percent)));
    }

    keys
}

/// The independent booleans computed for one paired invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub has_tag: bool,
    pub is_self: bool,
    pub tag_matches_partner: bool,
    pub percent: u8,
}

impl Classification {
    pub fn is_special(&self) -> bool {
        is_special(self.percent)
    }

    fn tag(&self) -> TagState {
        TagState::from_present(self.has_tag)
    }

    /// Stat keys to increment for this outcome.
    pub fn keys(&self, family: PairedFamily) -> Vec<String> {
        let tag = self.tag();
        let mut keys = vec![base(family, tag)];

        if self.is_self {
            keys.push(self_key(family, tag));
        }

        if self.tag_matches_partner {
            keys.push(tagged_equals_partner(family));
        }

        if self.is_special() {
            let variants: Vec<String> = keys
                .iter()
                .map(|key| with_percent(key, self.percent))
                .collect();
            keys.extend(variants);
        }

        if self.tag_matches_partner {
            keys.push(tag_match_success(family));
        }

        keys
    }

    /// The most specific key produced, used to pick the event log and overlay trigger.
    pub fn dominant(&self, family: PairedFamily) -> Option<String> {
        let tag = self.tag();
        let special = self.is_special();

        if special && self.is_self {
            return Some(with_percent(&self_key(family, tag), self.percent));
        }
        if special && self.tag_matches_partner {
            return Some(with_percent(&tagged_equals_partner(family), self.percent));
        }
        if special {
            return Some(with_percent(&base(family, tag), self.percent));
        }
        if self.tag_matches_partner {
            return Some(tagged_equals_partner(family));
        }
        if self.is_self {
            return Some(self_key(family, tag));
        }

        None
    }
}
