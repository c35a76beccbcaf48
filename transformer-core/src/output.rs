use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// Where the muxer writes the output. Only used here to report the size of
/// the finished file.
#[derive(Debug, Clone)]
pub enum OutputDestination {
    Path(PathBuf),
    File(Arc<File>),
}

impl OutputDestination {
    /// Current size of the output, `None` if it cannot be read or is empty.
    pub fn current_size_bytes(&self) -> Option<u64> {
        let len = match self {
            OutputDestination::Path(path) => std::fs::metadata(path).ok()?.len(),
            OutputDestination::File(file) => file.metadata().ok()?.len(),
        };
        (len > 0).then_some(len)
    }
}

impl From<PathBuf> for OutputDestination {
    fn from(path: PathBuf) -> Self {
        OutputDestination::Path(path)
    }
}
