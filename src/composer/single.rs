use core::fmt;

use rand::seq::IndexedRandom;
use tracing::instrument;

use crate::composer::{EventComposer, collapse_whitespace, normalize};
use crate::db::models::User;
use crate::generator::{ChatMessage, GenerationRequest};

const FORMAT_RULES: &str = "Ответь одной короткой фразой в нижнем регистре, без кавычек и без \
                            знаков препинания в конце.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SingleFamily {
    Location,
    Time,
    Action,
    Destination,
}

impl SingleFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            SingleFamily::Location => "location",
            SingleFamily::Time => "time",
            SingleFamily::Action => "action",
            SingleFamily::Destination => "destination",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            SingleFamily::Location => {
                "Придумай, где сейчас находится тот, о ком спрашивают. Пример: «в очереди за шаурмой»."
            }
            SingleFamily::Time => {
                "Придумай, когда это случится. Пример: «через пять минут после конца стрима»."
            }
            SingleFamily::Action => {
                "Придумай, что этому человеку стоит сделать прямо сейчас. Пример: «выпить чаю и лечь спать»."
            }
            SingleFamily::Destination => {
                "Придумай, куда этому человеку стоит отправиться. Пример: «на дачу к бабушке»."
            }
        }
    }

    pub fn fallback_pool(&self) -> &'static [&'static str] {
        match self {
            SingleFamily::Location => &[
                "в очереди за шаурмой",
                "под столом у стримера",
                "в соседнем чате",
                "на балконе с котом",
                "в бане",
                "в пробке на мкаде",
                "за холодильником",
                "на пятом круге ада",
            ],
            SingleFamily::Time => &[
                "через пять минут",
                "после дождичка в четверг",
                "никогда",
                "завтра утром",
                "когда стример выиграет",
                "в следующей жизни",
                "прямо сейчас",
                "на следующем стриме",
            ],
            SingleFamily::Action => &[
                "выпить чаю",
                "лечь спать",
                "потрогать траву",
                "задонатить",
                "написать маме",
                "покормить кота",
                "сделать зарядку",
                "пойти на работу",
            ],
            SingleFamily::Destination => &[
                "на дачу к бабушке",
                "в магазин за хлебом",
                "в баню",
                "на море",
                "спать",
                "в качалку",
                "к психологу",
                "в другой чат",
            ],
        }
    }
}

impl fmt::Display for SingleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn subject(author: &User, rest: &str) -> String {
    let rest = collapse_whitespace(rest);
    if rest.is_empty() {
        format!("@{}", author.display_name)
    } else {
        rest
    }
}

impl EventComposer {
    /// Location, time, action and destination commands: `"{subject} {value}"`.
    #[instrument(skip(self, author), fields(family = %family, login = %author.login))]
    pub async fn single(&self, family: SingleFamily, author: &User, rest: &str) -> String {
        let subject = subject(author, rest);

        let request = GenerationRequest::new(vec![
            ChatMessage::system(format!("{} {}", family.instruction(), FORMAT_RULES)),
            ChatMessage::user(subject.clone()),
        ]);
        let candidate = self.generate(&request).await;
        let value = self.accept_value(family, candidate, family.fallback_pool());

        format!("{subject} {value}")
    }

    /// Accepts the candidate unless it repeats the previous answer (or is missing), in which case
    /// a pool entry other than the previous answer is drawn instead.
    fn accept_value(
        &self,
        family: SingleFamily,
        candidate: Option<String>,
        pool: &[&str],
    ) -> String {
        let previous = self.state.previous(family);

        let value = match candidate {
            Some(candidate) if previous.as_deref() != Some(candidate.as_str()) => candidate,
            repeated => {
                if repeated.is_some() {
                    tracing::debug!("generator repeated previous value, resampling");
                }

                let options: Vec<String> = pool
                    .iter()
                    .map(|v| normalize(v))
                    .filter(|v| previous.as_deref() != Some(v.as_str()))
                    .collect();

                // a single-entry pool may have to repeat itself
                self.rng(|rng| options.choose(rng).cloned())
                    .or_else(|| pool.first().map(|v| normalize(v)))
                    .or(previous)
                    .unwrap_or_default()
            }
        };

        self.state.accept(family, &value);
        value
    }

    /// Picks a random active chatter, or the author when nobody else is around.
    #[instrument(skip(self, author), fields(login = %author.login))]
    pub async fn who(&self, author: &User, rest: &str) -> String {
        let roster = self.roster().await.unwrap_or_default();
        let picked = self
            .rng(|rng| roster.choose(rng).map(|c| c.display_name.clone()))
            .unwrap_or_else(|| author.display_name.clone());

        let rest = collapse_whitespace(rest);
        if rest.is_empty() {
            format!("@{picked}")
        } else {
            format!("{rest} @{picked}")
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::composer::testing::composer;
    use crate::generator::Unavailable;
    use crate::generator::scripted::ScriptedGenerator;

    #[tokio::test]
    async fn uses_generated_value_with_subject() {
        let generator = Arc::new(ScriptedGenerator::new([Some("В Лифте.")]));
        let (composer, mem) = composer(generator.clone()).await;
        let author = mem.add_user("milia");

        let reply = composer.single(SingleFamily::Location, &author, "").await;
        assert_eq!(reply, "@milia в лифте");

        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[1].content, "@milia");
    }

    #[tokio::test]
    async fn trailing_text_is_the_subject() {
        let generator = Arc::new(ScriptedGenerator::new([Some("завтра")]));
        let (composer, mem) = composer(generator).await;
        let author = mem.add_user("milia");

        let reply = composer.single(SingleFamily::Time, &author, "  стрим  по хк ").await;
        assert_eq!(reply, "стрим по хк завтра");
    }

    #[tokio::test]
    async fn repeated_generation_is_resampled() {
        let generator = Arc::new(ScriptedGenerator::new([Some("в бане"), Some("В бане!")]));
        let (composer, mem) = composer(generator).await;
        let author = mem.add_user("milia");

        let first = composer.single(SingleFamily::Location, &author, "").await;
        let second = composer.single(SingleFamily::Location, &author, "").await;

        assert_eq!(first, "@milia в бане");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn fallback_never_repeats_consecutively() {
        let (composer, mem) = composer(Arc::new(Unavailable)).await;
        let author = mem.add_user("milia");

        for family in [
            SingleFamily::Location,
            SingleFamily::Time,
            SingleFamily::Action,
            SingleFamily::Destination,
        ] {
            let mut previous = String::new();
            for _ in 0..40 {
                let reply = composer.single(family, &author, "").await;
                assert_ne!(reply, previous);
                assert!(
                    family
                        .fallback_pool()
                        .iter()
                        .any(|v| reply == format!("@milia {v}"))
                );
                previous = reply;
            }
        }
    }

    #[tokio::test]
    async fn anti_repeat_is_per_family() {
        let (composer, _mem) = composer(Arc::new(Unavailable)).await;

        composer.state.accept(SingleFamily::Time, "никогда");
        let value = composer.accept_value(SingleFamily::Action, Some("никогда".into()), &[]);

        assert_eq!(value, "никогда");
    }

    #[tokio::test]
    async fn single_entry_pool_may_repeat() {
        let (composer, _mem) = composer(Arc::new(Unavailable)).await;
        let pool = ["в бане"];

        let first = composer.accept_value(SingleFamily::Location, None, &pool);
        let second = composer.accept_value(SingleFamily::Location, None, &pool);
        let third = composer.accept_value(SingleFamily::Location, Some("в бане".into()), &pool);

        assert_eq!(first, "в бане");
        assert_eq!(second, "в бане");
        assert_eq!(third, "в бане");
    }

    #[tokio::test]
    async fn who_picks_from_roster() {
        let (composer, mem) = composer(Arc::new(Unavailable)).await;
        let author = mem.add_user("milia");

        assert_eq!(composer.who(&author, "").await, "@milia");

        mem.add_chatter("myramors");
        assert_eq!(
            composer.who(&author, "самый милый").await,
            "самый милый @myramors"
        );
    }
}
