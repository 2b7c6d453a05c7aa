#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    Serving,
    AwaitingUpgrade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Proceed,
    Outdated { tag_name: String },
}

/// Per-session self-update state. The session is pinned to the frontend tag
/// it was last given; once the running service carries a different tag the
/// session must go through an explicit upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfUpdateGuard {
    delivered_tag: String,
    mode: GuardMode,
}

impl SelfUpdateGuard {
    pub fn new(delivered_tag: impl Into<String>) -> Self {
        Self {
            delivered_tag: delivered_tag.into(),
            mode: GuardMode::Serving,
        }
    }

    pub fn mode(&self) -> GuardMode {
        self.mode
    }

    pub fn delivered_tag(&self) -> &str {
        &self.delivered_tag
    }

    /// Evaluated before every update request.
    pub fn on_update_request(&mut self, current_tag: &str) -> GuardVerdict {
        if self.delivered_tag == current_tag {
            self.mode = GuardMode::Serving;
            return GuardVerdict::Proceed;
        }
        self.mode = GuardMode::AwaitingUpgrade;
        GuardVerdict::Outdated {
            tag_name: current_tag.to_string(),
        }
    }

    /// Returns whether the upgrade is accepted; only valid while awaiting one.
    pub fn on_upgrade_request(&mut self, current_tag: &str) -> bool {
        if self.mode != GuardMode::AwaitingUpgrade {
            return false;
        }
        self.delivered_tag = current_tag.to_string();
        self.mode = GuardMode::Serving;
        true
    }
}
