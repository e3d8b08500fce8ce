use crate::error::{Error, Result};
use crate::message::DownloadOptions;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Active,
    Complete,
}

/// One bulk-download request. Progress only moves forward, one image at a time.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    id: TaskId,
    images_to_download: Vec<String>,
    number_of_processed_images: usize,
    options: DownloadOptions,
}

impl DownloadTask {
    pub fn new(id: TaskId, images_to_download: Vec<String>, options: DownloadOptions) -> Self {
        Self {
            id,
            images_to_download,
            number_of_processed_images: 0,
            options,
        }
    }

    pub fn images(&self) -> &[String] {
        &self.images_to_download
    }

    pub fn total(&self) -> usize {
        self.images_to_download.len()
    }

    pub fn processed(&self) -> usize {
        self.number_of_processed_images
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    pub fn state(&self) -> TaskState {
        if self.number_of_processed_images == self.total() {
            TaskState::Complete
        } else {
            TaskState::Active
        }
    }

    /// Counts one more image as processed. Advancing a complete task is an error.
    pub fn advance(&mut self) -> Result<TaskState> {
        if self.state() == TaskState::Complete {
            return Err(Error::TaskOverrun {
                task: self.id,
                total: self.total(),
            });
        }
        self.number_of_processed_images += 1;
        Ok(self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(n: usize) -> DownloadTask {
        let images = (0..n).map(|i| format!("https://a.test/{i}.jpg")).collect();
        DownloadTask::new(7, images, DownloadOptions::default())
    }

    #[test]
    fn completes_after_exactly_total_advances() {
        let mut t = task(3);
        assert_eq!(t.state(), TaskState::Active);
        assert_eq!(t.advance().unwrap(), TaskState::Active);
        assert_eq!(t.advance().unwrap(), TaskState::Active);
        assert_eq!(t.processed(), 2);
        assert_eq!(t.advance().unwrap(), TaskState::Complete);
        assert_eq!(t.processed(), 3);
    }

    #[test]
    fn advancing_past_total_is_an_error() {
        let mut t = task(1);
        t.advance().unwrap();
        let err = t.advance().unwrap_err();
        assert!(matches!(err, Error::TaskOverrun { task: 7, total: 1 }));
        assert_eq!(t.processed(), 1);
    }
}
