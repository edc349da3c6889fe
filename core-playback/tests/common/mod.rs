//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_playback::wav::{encode_header, FormatTag};
use core_playback::{ClipReader, FillOutcome, StreamConfig, StreamController};
use parking_lot::Mutex;

pub const URL: &str = "https://cdn.example.com/audio/forest.wav?sig=secret";

/// Deterministic 16-bit test signal.
pub fn sample_value(index: usize) -> i16 {
    ((index * 37) % 20_000) as i16 - 10_000
}

/// 16-bit PCM WAV holding `samples` interleaved samples.
pub fn pcm16_wav(channels: u16, sample_rate: u32, samples: usize) -> Vec<u8> {
    let mut bytes = encode_header(
        FormatTag::Pcm,
        channels,
        sample_rate,
        16,
        (samples * 2) as u32,
    );
    for index in 0..samples {
        bytes.extend_from_slice(&sample_value(index).to_le_bytes());
    }
    bytes
}

/// Expected decoded values for [`pcm16_wav`].
pub fn pcm16_expected(samples: usize) -> Vec<f32> {
    (0..samples)
        .map(|index| f32::from(sample_value(index)) / 32767.0)
        .collect()
}

/// Serves byte ranges of an in-memory file.
pub struct RangeServer {
    data: Bytes,
    requests: Mutex<Vec<(u64, u64)>>,
    fail_statuses: Mutex<HashMap<usize, u16>>,
    ignore_range: bool,
    served: AtomicUsize,
}

impl RangeServer {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self::build(data, false))
    }

    /// Answers every request with `200` and the whole body.
    pub fn ignoring_range(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self::build(data, true))
    }

    fn build(data: Vec<u8>, ignore_range: bool) -> Self {
        Self {
            data: Bytes::from(data),
            requests: Mutex::new(Vec::new()),
            fail_statuses: Mutex::new(HashMap::new()),
            ignore_range,
            served: AtomicUsize::new(0),
        }
    }

    /// Answer the `nth` request (0-based) with `status` and an empty body.
    pub fn fail_request(&self, nth: usize, status: u16) {
        self.fail_statuses.lock().insert(nth, status);
    }

    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

#[async_trait]
impl HttpClient for RangeServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let nth = self.served.fetch_add(1, Ordering::SeqCst);
        let (start, end) = request
            .requested_range()
            .ok_or_else(|| BridgeError::OperationFailed("missing Range header".to_string()))?;
        self.requests.lock().push((start, end));

        if let Some(status) = self.fail_statuses.lock().remove(&nth) {
            return Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: Bytes::new(),
            });
        }

        if self.ignore_range {
            return Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: self.data.clone(),
            });
        }

        let len = self.data.len() as u64;
        let from = start.min(len) as usize;
        let to = end.min(len) as usize;
        Ok(HttpResponse {
            status: 206,
            headers: HashMap::new(),
            body: self.data.slice(from..to),
        })
    }
}

/// Fresh data directory under the system temp dir.
pub struct TempDir {
    pub path: PathBuf,
}

impl TempDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("wavstream-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn file_system(&self) -> Arc<TokioFileSystem> {
        Arc::new(TokioFileSystem::with_data_directory(self.path.clone()))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.path.join("stream_cache")
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Small chunks so a short file takes several requests.
pub fn test_config() -> StreamConfig {
    StreamConfig {
        chunk_seconds: 1,
        min_buffer_seconds: 60.0,
        retry: core_playback::RetrySettings {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 1,
        },
        ..StreamConfig::default()
    }
}

/// Wait for the in-flight fetch (if any) to finish.
pub async fn settle(controller: &StreamController) {
    for _ in 0..1000 {
        if !controller.is_downloading() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("fetch did not finish");
}

/// Tick until the whole file has been requested and ingested.
pub async fn download_all(controller: &StreamController) {
    for _ in 0..1000 {
        controller.tick().await.unwrap();
        settle(controller).await;
        if controller.download_position() >= controller.file_length() {
            return;
        }
    }
    panic!("download did not complete");
}

/// Drain `reader` in blocks until end of stream, keeping `total` samples.
pub fn drain(reader: &ClipReader, block: usize, total: usize) -> Vec<f32> {
    let mut collected = Vec::new();
    let mut out = vec![0.0f32; block];
    loop {
        let outcome = reader.fill(&mut out);
        match outcome {
            FillOutcome::Filled => collected.extend_from_slice(&out),
            FillOutcome::EndOfStream => {
                let remaining = total.saturating_sub(collected.len()).min(block);
                collected.extend_from_slice(&out[..remaining]);
                assert!(out[remaining..].iter().all(|v| *v == 0.0));
                return collected;
            }
            other => panic!("unexpected fill outcome {:?}", other),
        }
    }
}

pub fn assert_samples_eq(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "sample count mismatch");
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < 1e-6, "sample {} differs: {} vs {}", index, a, e);
    }
}
