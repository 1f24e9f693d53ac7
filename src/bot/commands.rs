//! Chat command surface, prefix-matched against an alias table (case-insensitive).

use crate::composer::SingleFamily;
use crate::stats::keys::PairedFamily;
use crate::votes::command::VoteArg;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Paired { family: PairedFamily, rest: String },
    Single { family: SingleFamily, rest: String },
    Who { rest: String },
    Clip,
    Vote(VoteArg),
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Paired(PairedFamily),
    Single(SingleFamily),
    Who,
    Clip,
    Vote,
}

const ALIASES: &[(&str, Verb)] = &[
    ("!интим", Verb::Paired(PairedFamily::Intim)),
    ("!intim", Verb::Paired(PairedFamily::Intim)),
    ("!поцелуй", Verb::Paired(PairedFamily::Poceluy)),
    ("!poceluy", Verb::Paired(PairedFamily::Poceluy)),
    ("!kiss", Verb::Paired(PairedFamily::Poceluy)),
    ("!где", Verb::Single(SingleFamily::Location)),
    ("!where", Verb::Single(SingleFamily::Location)),
    ("!когда", Verb::Single(SingleFamily::Time)),
    ("!when", Verb::Single(SingleFamily::Time)),
    ("!чтоделать", Verb::Single(SingleFamily::Action)),
    ("!what", Verb::Single(SingleFamily::Action)),
    ("!куда", Verb::Single(SingleFamily::Destination)),
    ("!whereto", Verb::Single(SingleFamily::Destination)),
    ("!кто", Verb::Who),
    ("!who", Verb::Who),
    ("!клип", Verb::Clip),
    ("!clip", Verb::Clip),
    ("!голос", Verb::Vote),
    ("!vote", Verb::Vote),
];

/// Zero-width and tag characters some chat clients append to dodge duplicate-message filters.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{034F}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
            | '\u{E0000}'..='\u{E007F}'
    )
}

/// Case-insensitive `strip_prefix` for a lower-case alias.
fn strip_alias<'a>(text: &'a str, alias: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    for expected in alias.chars() {
        let (_, c) = chars.next()?;
        if !c.to_lowercase().eq(std::iter::once(expected)) {
            return None;
        }
    }

    let end = chars.next().map_or(text.len(), |(i, _)| i);
    Some(&text[end..])
}

impl Command {
    /// Longest alias that prefixes the message and is not followed by a letter or digit, so
    /// `!whereto` wins over `!where` and `!интимный` is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text: String = text.chars().filter(|c| !is_invisible(*c)).collect();
        let text = text.trim();

        let (verb, rest) = ALIASES
            .iter()
            .filter_map(|(alias, verb)| {
                let rest = strip_alias(text, alias)?;
                let bounded = rest.chars().next().is_none_or(|c| !c.is_alphanumeric());
                bounded.then_some((alias.chars().count(), *verb, rest))
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, verb, rest)| (verb, rest))?;

        // punctuation glued to the command (`!где?`, `!кто,`) is not part of the arguments
        let rest = rest
            .trim_start_matches(|c: char| !c.is_whitespace() && !c.is_alphanumeric() && c != '@')
            .trim()
            .to_string();

        let command = match verb {
            Verb::Paired(family) => Command::Paired { family, rest },
            Verb::Single(family) => Command::Single { family, rest },
            Verb::Who => Command::Who { rest },
            Verb::Clip => Command::Clip,
            Verb::Vote => Command::Vote(VoteArg::parse(&rest)),
        };

        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Paired { family, .. } => family.as_str(),
            Command::Single { family, .. } => family.as_str(),
            Command::Who { .. } => "who",
            Command::Clip => "clip",
            Command::Vote(_) => "vote",
        }
    }
}
