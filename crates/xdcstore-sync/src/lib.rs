mod frontend;
mod guard;
mod ledger;
mod service;
mod session;

pub use frontend::FrontendPackage;
pub use guard::{GuardMode, GuardVerdict, SelfUpdateGuard};
pub use ledger::{SessionLedger, SessionRecord};
pub use service::{SessionState, StoreService, VERSION_COMMAND};
pub use session::{run_session, ArtifactPush, ChannelOutbox, Inbound, Outbound, Outbox};

#[cfg(test)]
mod tests;
