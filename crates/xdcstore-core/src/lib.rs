mod app_info;
mod frontend;
mod lock;
mod payload;

pub use app_info::{validate_app_id, AppInfo};
pub use frontend::FrontendManifest;
pub use lock::{LockEntry, LockManifest};
pub use payload::{ProtocolError, StatusUpdate, StorePayload};
