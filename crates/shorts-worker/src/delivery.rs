//! Delivery of finished clips.
//!
//! The pipeline hands over clips in ascending index order and learns per
//! clip whether the transfer went through. Clips stay in scratch until
//! their transfer is confirmed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use shorts_media::fs_utils::copy_file;
use shorts_models::{JobId, ReadyClip};

use crate::error::{WorkerError, WorkerResult};

/// Outcome of handing one clip over.
#[derive(Debug)]
pub struct ClipTransfer {
    pub index: usize,
    /// Where the clip ended up, or why it did not get there
    pub result: WorkerResult<PathBuf>,
}

/// Per-clip delivery outcomes, in the order the clips were given.
#[derive(Debug, Default)]
pub struct DeliveryReceipt {
    pub transfers: Vec<ClipTransfer>,
}

impl DeliveryReceipt {
    /// Every clip was transferred.
    pub fn is_complete(&self) -> bool {
        self.transfers.iter().all(|t| t.result.is_ok())
    }

    pub fn delivered(&self) -> impl Iterator<Item = (usize, &Path)> {
        self.transfers
            .iter()
            .filter_map(|t| t.result.as_ref().ok().map(|p| (t.index, p.as_path())))
    }

    pub fn failed(&self) -> impl Iterator<Item = (usize, &WorkerError)> {
        self.transfers
            .iter()
            .filter_map(|t| t.result.as_ref().err().map(|e| (t.index, e)))
    }
}

/// Hands finished clips to whoever asked for them.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver `clips` (ascending index order).
    ///
    /// An `Err` means nothing could be delivered; otherwise the receipt
    /// reports each clip separately.
    async fn deliver(&self, job_id: &JobId, clips: &[ReadyClip]) -> WorkerResult<DeliveryReceipt>;
}

/// Copies clips to `<output_dir>/<job_id>/<file name>`.
#[derive(Debug, Clone)]
pub struct DirectoryDelivery {
    output_dir: PathBuf,
}

impl DirectoryDelivery {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.output_dir.join(job_id.as_str())
    }
}

#[async_trait]
impl Delivery for DirectoryDelivery {
    async fn deliver(&self, job_id: &JobId, clips: &[ReadyClip]) -> WorkerResult<DeliveryReceipt> {
        let job_dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&job_dir).await.map_err(|e| {
            WorkerError::transfer_failed(format!("cannot create {}: {}", job_dir.display(), e))
        })?;

        let mut receipt = DeliveryReceipt::default();
        for clip in clips {
            let result = match clip.path.file_name() {
                Some(name) => {
                    let dest = job_dir.join(name);
                    copy_file(&clip.path, &dest)
                        .await
                        .map(|_| dest)
                        .map_err(|e| WorkerError::transfer_failed(format!("part {:02}: {}", clip.index + 1, e)))
                }
                None => Err(WorkerError::transfer_failed(format!(
                    "part {:02}: clip path has no file name",
                    clip.index + 1
                ))),
            };
            if let Err(e) = &result {
                warn!(job_id = %job_id, clip_index = clip.index, "Clip delivery failed: {}", e);
            }
            receipt.transfers.push(ClipTransfer {
                index: clip.index,
                result,
            });
        }

        info!(
            job_id = %job_id,
            delivered = receipt.delivered().count(),
            total = clips.len(),
            dest = %job_dir.display(),
            "Delivered clips"
        );
        Ok(receipt)
    }
}
