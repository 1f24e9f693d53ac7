//! Process-local engine state: anti-repeat memory and paired-command timestamps.
//!
//! Constructed once at startup and reset whenever the chat connection is re-established.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::time::Instant;

use crate::composer::single::SingleFamily;
use crate::constants::COMBO_WINDOW;
use crate::db::models::UserId;
use crate::stats::keys::PairedFamily;

#[derive(Debug, Default)]
struct Inner {
    previous: HashMap<SingleFamily, String>,
    paired_uses: HashMap<(UserId, PairedFamily), Instant>,
}

#[derive(Debug, Default)]
pub struct EngineState {
    inner: Mutex<Inner>,
}

impl EngineState {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last accepted value for a single-value family.
    pub fn previous(&self, family: SingleFamily) -> Option<String> {
        self.lock().previous.get(&family).cloned()
    }

    pub fn accept(&self, family: SingleFamily, value: &str) {
        self.lock().previous.insert(family, value.to_string());
    }

    /// Records a paired invocation and reports whether the same user invoked the other family
    /// within the combo window.
    pub fn record_paired(&self, user_id: UserId, family: PairedFamily, now: Instant) -> bool {
        let mut inner = self.lock();
        let combo = inner
            .paired_uses
            .get(&(user_id, family.other()))
            .is_some_and(|at| now.saturating_duration_since(*at) <= COMBO_WINDOW);

        inner
            .paired_uses
            .retain(|_, at| now.saturating_duration_since(*at) <= COMBO_WINDOW);
        inner.paired_uses.insert((user_id, family), now);
        combo
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.previous.clear();
        inner.paired_uses.clear();

        tracing::debug!("engine state reset");
    }
}
