//! Fake collaborators for driving the controller without ffmpeg or yt-dlp.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use shorts_media::{ClipRenderer, MediaError, MediaProbe, MediaResult, RenderRequest, SourceFetcher, VideoInfo};
use shorts_models::{Clip, JobId, ReadyClip};
use shorts_worker::{
    Delivery, DeliveryReceipt, DirectoryDelivery, JobController, SourceResolver, WorkerConfig,
    WorkerError, WorkerResult,
};

/// Writes a small placeholder file as the downloaded source.
pub struct FakeFetcher {
    pub fail_with: Option<&'static str>,
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str, dest_dir: &Path) -> MediaResult<PathBuf> {
        if let Some(msg) = self.fail_with {
            return Err(MediaError::SourceUnreachable(msg.to_string()));
        }
        let path = dest_dir.join("talk.mp4");
        tokio::fs::write(&path, b"source").await?;
        Ok(path)
    }
}

/// Reports fixed source metadata.
pub struct FakeProbe {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        if !path.exists() {
            return Err(MediaError::unreadable(path, "missing"));
        }
        Ok(VideoInfo {
            duration: self.duration,
            width: self.width,
            height: self.height,
            fps: 30.0,
            codec: "h264".to_string(),
            size: 6,
            bitrate: 0,
        })
    }
}

/// What one render call does.
pub enum Outcome {
    Succeed,
    Fail(MediaError),
    /// Run until cancelled
    Hang,
}

type Script = Box<dyn Fn(usize, u32) -> Outcome + Send + Sync>;

/// Scripted renderer. The script sees the clip index and the 1-based call
/// number for that clip.
pub struct FakeRenderer {
    script: Script,
    delay: Box<dyn Fn(usize) -> Duration + Send + Sync>,
    calls: Mutex<HashMap<usize, u32>>,
    graphs: Mutex<HashMap<usize, Vec<String>>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeRenderer {
    pub fn new(script: impl Fn(usize, u32) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            delay: Box::new(|_| Duration::from_millis(5)),
            calls: Mutex::new(HashMap::new()),
            graphs: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|_, _| Outcome::Succeed)
    }

    pub fn with_delay(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn calls(&self, index: usize) -> u32 {
        self.calls.lock().unwrap().get(&index).copied().unwrap_or(0)
    }

    /// Filter graphs the clip was rendered with, in call order.
    pub fn graphs(&self, index: usize) -> Vec<String> {
        self.graphs.lock().unwrap().get(&index).cloned().unwrap_or_default()
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipRenderer for FakeRenderer {
    async fn render(&self, request: &RenderRequest, cancel_rx: watch::Receiver<bool>) -> MediaResult<Clip> {
        let index = request.spec.index;
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(index).or_insert(0);
            *count += 1;
            *count
        };
        self.graphs
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .push(request.transform.filter_graph());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match (self.script)(index, call) {
            Outcome::Succeed => {
                tokio::select! {
                    _ = tokio::time::sleep((self.delay)(index)) => {
                        tokio::fs::write(&request.output, b"clip").await?;
                        Ok(Clip::ready(request.spec.clone(), &request.output, request.spec.span()))
                    }
                    _ = cancelled(cancel_rx) => Err(MediaError::Cancelled),
                }
            }
            Outcome::Fail(e) => Err(e),
            Outcome::Hang => {
                cancelled(cancel_rx).await;
                Err(MediaError::Cancelled)
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

async fn cancelled(mut cancel_rx: watch::Receiver<bool>) {
    if cancel_rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Delivery that refuses one clip index and forwards the rest.
pub struct FlakyDelivery {
    pub inner: DirectoryDelivery,
    pub refuse_index: usize,
}

#[async_trait]
impl Delivery for FlakyDelivery {
    async fn deliver(&self, job_id: &JobId, clips: &[ReadyClip]) -> WorkerResult<DeliveryReceipt> {
        let accepted: Vec<ReadyClip> = clips
            .iter()
            .filter(|c| c.index != self.refuse_index)
            .cloned()
            .collect();
        let mut receipt = self.inner.deliver(job_id, &accepted).await?;
        receipt.transfers.push(shorts_worker::ClipTransfer {
            index: self.refuse_index,
            result: Err(WorkerError::transfer_failed("remote closed the connection")),
        });
        receipt.transfers.sort_by_key(|t| t.index);
        Ok(receipt)
    }
}

pub fn test_config(work_dir: &Path) -> WorkerConfig {
    WorkerConfig {
        work_dir: work_dir.to_path_buf(),
        max_concurrent_encodes: 4,
        max_encodes_per_job: 2,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

pub fn resolver(duration: f64, width: u32, height: u32) -> SourceResolver {
    SourceResolver::new(
        Arc::new(FakeFetcher { fail_with: None }),
        Arc::new(FakeProbe {
            duration,
            width,
            height,
        }),
    )
}

pub fn controller(
    config: WorkerConfig,
    resolver: SourceResolver,
    renderer: Arc<FakeRenderer>,
    output_dir: &Path,
) -> JobController {
    JobController::new(
        config,
        resolver,
        renderer,
        Arc::new(DirectoryDelivery::new(output_dir)),
    )
}
