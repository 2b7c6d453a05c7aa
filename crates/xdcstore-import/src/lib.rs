mod frontend;
mod pipeline;
mod progress;

pub use frontend::install_frontend;
pub use pipeline::{import_manifest, ImportOptions, ImportReport, IngestionError};
pub use progress::{ImportProgress, NoProgress};
