pub mod local;
pub mod remote;

/// One file slated for publishing: its on-disk source and its destination
/// path relative to the publish root (local mirror root, or repo root for
/// remote publish).
#[derive(Debug, Clone)]
pub struct PublishItem {
    pub local_path: std::path::PathBuf,
    pub dest_rel: String,
}
