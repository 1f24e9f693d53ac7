//! Turns chat commands into composed replies.
//!
//! Paired social commands sample a partner from the active roster, resolve an optional tag,
//! fill a template (optionally rewritten by the text generator), roll a percent and drive the
//! stat counters from the resulting classification. Single-value commands ask the generator for
//! one short phrase and never repeat their previous answer while an alternative exists.

use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::db::Store;
use crate::db::models::StreamChatter;
use crate::db::repositories::{ChatterRepository, TemplateRepository, UserRepository};
use crate::generator::{GenerationRequest, TextGenerator};
use crate::stats::StatCounter;
use crate::util::helix::Helix;

pub mod paired;
pub mod placeholder;
pub mod single;
pub mod state;

pub use paired::PairedOutcome;
pub use single::SingleFamily;
pub use state::EngineState;

/// Trims, lower-cases and strips trailing sentence punctuation.
pub fn normalize(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| matches!(c, '"' | '«' | '»' | '“' | '”'))
        .to_lowercase()
        .trim_end_matches(|c: char| {
            c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '…')
        })
        .trim()
        .to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug)]
pub struct EventComposer {
    users: Arc<dyn UserRepository>,
    chatters: Arc<dyn ChatterRepository>,
    templates: Arc<dyn TemplateRepository>,
    stats: StatCounter,
    generator: Arc<dyn TextGenerator>,
    helix: Option<Helix>,
    state: Arc<EngineState>,
    rng: Mutex<StdRng>,
}

impl EventComposer {
    pub fn new(
        store: &Store,
        stats: StatCounter,
        generator: Arc<dyn TextGenerator>,
        state: Arc<EngineState>,
    ) -> Self {
        Self {
            users: store.users.clone(),
            chatters: store.chatters.clone(),
            templates: store.templates.clone(),
            stats,
            generator,
            helix: None,
            state,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Tags that are not known chatters are looked up on the platform.
    pub fn with_helix(mut self, helix: Helix) -> Self {
        self.helix = Some(helix);
        self
    }

    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    fn rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    async fn roster(&self) -> Option<Vec<StreamChatter>> {
        match self.chatters.all().await {
            Ok(roster) => Some(roster),
            Err(e) => {
                tracing::error!(error = %e, "failed to read active chatters");
                None
            }
        }
    }

    /// Normalized generator output, or `None` when the generator fails or returns nothing usable.
    async fn generate(&self, request: &GenerationRequest) -> Option<String> {
        match self.generator.generate(request).await {
            Ok(text) => {
                let text = normalize(&text);
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                tracing::warn!(error = %e, "generator failed, using fallback");
                None
            }
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_strips_case_and_punctuation() {
        assert_eq!(normalize("  В Лифте!!! "), "в лифте");
        assert_eq!(normalize("«На кухне.»"), "на кухне");
        assert_eq!(normalize("завтра..."), "завтра");
        assert_eq!(normalize("под [random]"), "под [random]");
        assert_eq!(normalize(" ?! "), "");
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(collapse_whitespace(" a  b \n c "), "a b c");
    }
}
