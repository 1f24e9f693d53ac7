use futures::future::join_all;
use rand::Rng;
use rand::seq::IndexedRandom;
use tokio::time::Instant;
use tracing::instrument;

use crate::composer::placeholder::Resolver;
use crate::composer::{EventComposer, collapse_whitespace};
use crate::db::models::{PairedTemplate, User, UserId};
use crate::generator::{ChatMessage, GenerationRequest};
use crate::stats::catalog::COMBO_COMMANDS;
use crate::stats::keys::{Classification, PairedFamily};

const MAX_PROMPT_CANDIDATES: usize = 3;

const GENERATOR_INSTRUCTION: &str = "Ты дописываешь концовку шуточной фразы для чата стримера. \
    Ответь одной короткой фразой в нижнем регистре, без кавычек и без знаков препинания в конце. \
    Можно упомянуть одного из предложенных зрителей через @.";

fn fallback_templates(family: PairedFamily) -> &'static [(&'static str, &'static str)] {
    match family {
        PairedFamily::Intim => &[
            ("[from 1 to 10] раз за вечер", "прямо под носом у [random]"),
            ("нежно", "пока никто не видит"),
            ("страстно", "на глазах у [random] и [random]"),
        ],
        PairedFamily::Poceluy => &[
            ("внезапно", "в щёчку"),
            ("[from 2 to 15] раз подряд", "пока [random] отвернулся"),
            ("робко", "в макушку"),
        ],
    }
}

/// Result of one paired invocation. `dominant` is set when the outcome is specific enough to be
/// logged and shown on the overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct PairedOutcome {
    pub family: PairedFamily,
    pub reply: String,
    pub classification: Option<Classification>,
    pub dominant: Option<String>,
}

impl PairedOutcome {
    fn diagnostic(family: PairedFamily, reply: String) -> Self {
        Self {
            family,
            reply,
            classification: None,
            dominant: None,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PairedArgs {
    /// Lower-cased login of the first `@mention`.
    tag: Option<String>,
    suffix: String,
}

fn parse_args(rest: &str) -> PairedArgs {
    let mut args = PairedArgs::default();
    let mut suffix = Vec::new();

    for word in rest.split_whitespace() {
        let mention = word
            .strip_prefix('@')
            .map(|login| login.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_'))
            .filter(|login| !login.is_empty());

        match mention {
            Some(login) if args.tag.is_none() => args.tag = Some(login.to_lowercase()),
            _ => suffix.push(word),
        }
    }

    args.suffix = suffix.join(" ");
    args
}

#[derive(Debug, Clone)]
struct Tagged {
    login: String,
    display_name: String,
    user: Option<User>,
}

struct Frame<'a> {
    author: &'a str,
    partner: &'a str,
    tag: Option<&'a str>,
    one: &'a str,
    two: &'a str,
    percent: u8,
}

fn assemble(family: PairedFamily, f: Frame<'_>) -> String {
    let Frame {
        author,
        partner,
        tag,
        one,
        two,
        percent,
    } = f;

    let text = match (family, tag) {
        (PairedFamily::Intim, None) => {
            format!("{percent}% что @{author} {one} уединяется с @{partner} {two}")
        }
        (PairedFamily::Intim, Some(tag)) => format!(
            "@{author} хотел(а) интим с @{tag}, но с шансом {percent}% {one} уединяется с @{partner} {two}"
        ),
        (PairedFamily::Poceluy, None) => {
            format!("@{author} {one} целует @{partner} {two} ({percent}%)")
        }
        (PairedFamily::Poceluy, Some(tag)) => format!(
            "@{author} тянется к @{tag}, но {one} целует @{partner} {two} ({percent}%)"
        ),
    };

    collapse_whitespace(&text)
}

impl EventComposer {
    #[instrument(skip(self, author), fields(family = %family, login = %author.login))]
    pub async fn paired(&self, family: PairedFamily, author: &User, rest: &str) -> PairedOutcome {
        let args = parse_args(rest);

        let Some(roster) = self.roster().await else {
            return PairedOutcome::diagnostic(
                family,
                format!("@{}, не получилось, попробуй позже.", author.display_name),
            );
        };

        let Some(partner) = self.rng(|rng| roster.choose(rng).cloned()) else {
            tracing::debug!("no active participants");
            return PairedOutcome::diagnostic(
                family,
                format!("@{}, в чате пока никого нет.", author.display_name),
            );
        };

        let tagged = match &args.tag {
            Some(login) => self.resolve_tag(login).await,
            None => None,
        };

        let template = self.template(family).await;

        let is_self = partner.login == author.login;
        let tag_matches_partner = tagged.as_ref().is_some_and(|t| t.login == partner.login);
        let object = match (is_self, tag_matches_partner) {
            (true, _) => "сам автор",
            (false, true) => "тот, кого автор отметил",
            (false, false) => "случайный зритель",
        };

        let participants: Vec<String> = roster.iter().map(|c| c.display_name.clone()).collect();
        let candidates: Vec<&str> = self.rng(|rng| {
            roster
                .iter()
                .filter(|c| c.login != author.login && c.login != partner.login)
                .map(|c| c.display_name.as_str())
                .collect::<Vec<_>>()
                .choose_multiple(rng, MAX_PROMPT_CANDIDATES)
                .copied()
                .collect()
        });

        let request = GenerationRequest::new(vec![
            ChatMessage::system(GENERATOR_INSTRUCTION),
            ChatMessage::user(format!(
                "Команда: {family}. Автор: {}. Партнёр: {}. Объект: {object}. \
                 Начало фразы: «{}». Пример концовки: «{}». Пожелание автора: «{}». \
                 Зрители для упоминания: {}.",
                author.display_name,
                partner.display_name,
                template.phrase_one,
                template.phrase_two,
                args.suffix,
                candidates.join(", "),
            )),
        ]);
        let phrase_two = self
            .generate(&request)
            .await
            .unwrap_or_else(|| template.phrase_two.clone());

        let (one, two, percent) = self.rng(|rng| {
            let mut resolver = Resolver::new(&participants);
            let one = resolver.resolve(&template.phrase_one, rng);
            let two = resolver.resolve(&phrase_two, rng);
            (one, two, rng.random_range(0..=100u8))
        });

        let classification = Classification {
            has_tag: args.tag.is_some(),
            is_self,
            tag_matches_partner,
            percent,
        };
        let keys = classification.keys(family);
        let dominant = classification.dominant(family);
        tracing::debug!(percent, ?keys, ?dominant, "classified outcome");

        let mut increments: Vec<(UserId, &str)> = keys.iter().map(|k| (author.id, k.as_str())).collect();
        if tag_matches_partner
            && let Some(tagged_user) = tagged.as_ref().and_then(|t| t.user.as_ref())
            && tagged_user.id != author.id
        {
            increments.extend(keys.iter().map(|k| (tagged_user.id, k.as_str())));
        }
        if self.state.record_paired(author.id, family, Instant::now()) {
            tracing::info!("combo");
            increments.push((author.id, COMBO_COMMANDS));
        }

        join_all(
            increments
                .iter()
                .map(|(user_id, key)| self.stats.increment_stat(*user_id, key, 1)),
        )
        .await;

        let tag_name = tagged
            .as_ref()
            .map(|t| t.display_name.clone())
            .or_else(|| args.tag.clone());

        let reply = assemble(
            family,
            Frame {
                author: &author.display_name,
                partner: &partner.display_name,
                tag: tag_name.as_deref(),
                one: &one,
                two: &two,
                percent,
            },
        );

        PairedOutcome {
            family,
            reply,
            classification: Some(classification),
            dominant,
        }
    }

    /// Resolves a mention to a known user, falling back to a platform lookup.
    async fn resolve_tag(&self, login: &str) -> Option<Tagged> {
        match self.users.by_login(login).await {
            Ok(Some(user)) => {
                return Some(Tagged {
                    login: user.login.clone(),
                    display_name: user.display_name.clone(),
                    user: Some(user),
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, login, "tag lookup failed"),
        }

        let helix = self.helix.as_ref()?;
        match helix.user_by_login(login).await {
            Ok(found) => found.map(|u| {
                tracing::debug!(platform_id = %u.id, "tag resolved on the platform only");
                Tagged {
                    login: u.login,
                    display_name: u.display_name,
                    user: None,
                }
            }),
            Err(e) => {
                tracing::warn!(error = %e, login, "platform tag lookup failed");
                None
            }
        }
    }

    async fn template(&self, family: PairedFamily) -> PairedTemplate {
        let stored = match self.templates.paired(family.as_str()).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load templates, using built-ins");
                Vec::new()
            }
        };

        if let Some(row) = self.rng(|rng| stored.choose(rng).cloned()) {
            return row;
        }

        let builtin = fallback_templates(family);
        let (one, two) = self
            .rng(|rng| builtin.choose(rng).copied())
            .unwrap_or(("", ""));

        PairedTemplate {
            id: 0,
            phrase_one: one.to_string(),
            phrase_two: two.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::{Provider, TokenVault};
    use crate::composer::testing::composer;
    use crate::generator::Unavailable;
    use crate::generator::scripted::ScriptedGenerator;
    use crate::stats::keys::is_special;
    use crate::util::helix::Helix;

    #[test]
    fn parses_tag_and_suffix() {
        assert_eq!(
            parse_args("@Milia, в лифте"),
            PairedArgs {
                tag: Some("milia".into()),
                suffix: "в лифте".into()
            }
        );
        assert_eq!(
            parse_args("в лифте @a @b"),
            PairedArgs {
                tag: Some("a".into()),
                suffix: "в лифте @b".into()
            }
        );
        assert_eq!(parse_args("@ "), PairedArgs {
            tag: None,
            suffix: "@".into()
        });
    }

    #[tokio::test]
    async fn empty_roster_short_circuits() {
        let generator = Arc::new(ScriptedGenerator::new([Some("не должно")]));
        let (composer, mem) = composer(generator.clone()).await;
        let author = mem.add_user("milia");

        let outcome = composer.paired(PairedFamily::Intim, &author, "").await;

        assert!(outcome.reply.contains("никого нет"));
        assert_eq!(outcome.classification, None);
        assert!(mem.stat_keys(author.id).is_empty());
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn self_case_without_tag() {
        let (composer, mem) = composer(Arc::new(Unavailable)).await;
        let author = mem.add_user("milia");
        mem.add_chatter("milia");
        mem.add_template("intim", "[from 7 to 7] раз", "под столом");

        let outcome = composer.paired(PairedFamily::Intim, &author, "").await;
        let c = outcome.classification.unwrap();

        assert!(c.is_self && !c.has_tag && !c.tag_matches_partner);
        assert!(outcome.reply.contains("7 раз"), "{}", outcome.reply);
        assert!(outcome.reply.contains("под столом"), "{}", outcome.reply);
        assert_eq!(mem.stat(author.id, "intim_no_tag"), 1);
        assert_eq!(mem.stat(author.id, "intim_self_no_tag"), 1);

        let p = c.percent;
        let special = i64::from(is_special(p));
        assert_eq!(mem.stat(author.id, &format!("intim_no_tag_{p}")), special);
        assert_eq!(mem.stat(author.id, &format!("intim_self_no_tag_{p}")), special);

        let expected = if is_special(p) {
            format!("intim_self_no_tag_{p}")
        } else {
            "intim_self_no_tag".to_string()
        };
        assert_eq!(outcome.dominant, Some(expected));
    }

    #[tokio::test]
    async fn tag_matching_partner_credits_both() {
        let (composer, mem) = composer(Arc::new(Unavailable)).await;
        let author = mem.add_user("milia");
        let partner = mem.add_user("myramors");
        mem.add_chatter("myramors");

        let outcome = composer
            .paired(PairedFamily::Poceluy, &author, "@MyraMors")
            .await;
        let c = outcome.classification.unwrap();

        assert!(c.has_tag && c.tag_matches_partner && !c.is_self);
        for user in [author.id, partner.id] {
            assert_eq!(mem.stat(user, "poceluy_with_tag"), 1);
            assert_eq!(mem.stat(user, "poceluy_tagged_equals_partner"), 1);
            assert_eq!(mem.stat(user, "poceluy_tag_match_success"), 1);
        }
        assert!(outcome.reply.starts_with("@milia тянется к @myramors"), "{}", outcome.reply);
    }

    #[tokio::test]
    async fn unknown_tag_is_not_a_match() {
        let (composer, mem) = composer(Arc::new(Unavailable)).await;
        let author = mem.add_user("milia");
        mem.add_chatter("myramors");

        let outcome = composer.paired(PairedFamily::Intim, &author, "@ghost").await;
        let c = outcome.classification.unwrap();

        assert!(c.has_tag && !c.tag_matches_partner);
        assert_eq!(mem.stat(author.id, "intim_with_tag"), 1);
        assert!(outcome.reply.contains("@ghost"));
    }

    #[tokio::test]
    async fn platform_only_tag_matches_without_crediting_tagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("login", "myramors"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "777", "login": "myramors", "display_name": "MyraMors"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (composer, mem) = composer(Arc::new(Unavailable)).await;
        let vault = Arc::new(TokenVault::fixed(&[(Provider::App, "app")]));
        let composer =
            composer.with_helix(Helix::new(reqwest::Client::new(), server.uri(), "id", vault));
        let author = mem.add_user("milia");
        mem.add_chatter("myramors");

        let outcome = composer
            .paired(PairedFamily::Intim, &author, "@myramors")
            .await;
        let c = outcome.classification.unwrap();

        assert!(c.has_tag && c.tag_matches_partner);
        assert!(outcome.reply.contains("интим с @MyraMors"), "{}", outcome.reply);
        assert_eq!(mem.stat(author.id, "intim_tag_match_success"), 1);
        assert!(mem.user("myramors").is_none());
    }

    #[tokio::test]
    async fn generated_phrase_replaces_template() {
        let generator = Arc::new(ScriptedGenerator::new([Some("В ЛИФТЕ!")]));
        let (composer, mem) = composer(generator.clone()).await;
        let author = mem.add_user("milia");
        mem.add_chatter("myramors");
        mem.add_template("poceluy", "внезапно", "в щёчку");

        let outcome = composer
            .paired(PairedFamily::Poceluy, &author, "хочу в лифте")
            .await;

        assert!(outcome.reply.contains("в лифте"), "{}", outcome.reply);
        assert!(!outcome.reply.contains("в щёчку"));

        let prompt = &generator.requests()[0].messages[1].content;
        assert!(prompt.contains("хочу в лифте"));
        assert!(prompt.contains("случайный зритель"));
    }

    #[tokio::test]
    async fn stat_failures_do_not_block_reply() {
        let (composer, mem) = composer(Arc::new(Unavailable)).await;
        let author = mem.add_user("milia");
        mem.add_chatter("myramors");
        mem.set_fail_writes(true);

        let outcome = composer.paired(PairedFamily::Intim, &author, "").await;

        assert!(outcome.reply.contains("@myramors"));
        assert!(mem.stat_keys(author.id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn other_family_within_window_is_a_combo() {
        let (composer, mem) = composer(Arc::new(Unavailable)).await;
        let author = mem.add_user("milia");
        mem.add_chatter("myramors");

        composer.paired(PairedFamily::Intim, &author, "").await;
        composer.paired(PairedFamily::Intim, &author, "").await;
        assert_eq!(mem.stat(author.id, COMBO_COMMANDS), 0);

        tokio::time::advance(Duration::from_secs(59)).await;
        composer.paired(PairedFamily::Poceluy, &author, "").await;
        assert_eq!(mem.stat(author.id, COMBO_COMMANDS), 1);

        tokio::time::advance(Duration::from_secs(120)).await;
        composer.paired(PairedFamily::Intim, &author, "").await;
        assert_eq!(mem.stat(author.id, COMBO_COMMANDS), 1);
    }
}
