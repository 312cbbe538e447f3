/// One URL retrieval request and its retry metadata
///
/// A task is moved, never shared: whichever queue or worker currently holds
/// it owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Normalized URL; also the tracker key
    pub url: String,

    /// Depth at which the producer discovered the URL
    pub depth: u32,

    /// Failed attempts so far
    pub attempt: u32,

    /// Set once the task has been retried or escalated
    pub priority: bool,

    /// Index of the resource it was assigned to
    pub resource: usize,
}

impl DownloadTask {
    pub fn new(url: String, depth: u32, resource: usize) -> Self {
        Self {
            url,
            depth,
            attempt: 0,
            priority: false,
            resource,
        }
    }

    /// Consumes the task and returns its next attempt
    pub fn into_retry(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            priority: true,
            ..self
        }
    }
}
