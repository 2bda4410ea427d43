// SPDX-License-Identifier: GPL-3.0-only

//! Preview stream reader
//!
//! Consumes the MJPEG byte stream of a preview process, cuts it into JPEG
//! images and hands decoded frames to the [`FrameSink`].
//!
//! Two tasks run per attachment:
//! - the pump reads the pipe and publishes each complete JPEG into a
//!   single-slot `watch` channel, overwriting a frame the sink has not taken
//!   yet (at most one frame is ever buffered ahead of the sink)
//! - the delivery task picks up the newest frame, decodes it on the blocking
//!   pool and calls [`FrameSink::present`]
//!
//! A missing sink (pre-warming) keeps the pipe drained without decoding.

use super::FrameSink;
use super::types::{CameraProcessHandle, Frame, ProcessId, ProcessKind};
use crate::constants::{jpeg, preview, timing};
use crate::errors::AttachError;
use image::ImageFormat;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type SharedSink = Arc<Mutex<Option<Arc<dyn FrameSink>>>>;

/// Splits a byte stream into JPEG images (SOI through the next EOI)
#[derive(Debug)]
pub struct MjpegFramer {
    buffer: Vec<u8>,
    max_pending: usize,
}

impl MjpegFramer {
    pub fn new(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_pending,
        }
    }

    /// Append `bytes` and return every JPEG completed by them, in order
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Arc<[u8]>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buffer, &jpeg::SOI) else {
                // A trailing 0xFF may be the first half of the next SOI
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let discard = self.buffer.len() - keep;
                self.buffer.drain(..discard);
                break;
            };
            self.buffer.drain(..start);

            match find_marker(&self.buffer[jpeg::SOI.len()..], &jpeg::EOI) {
                Some(offset) => {
                    let end = jpeg::SOI.len() + offset + jpeg::EOI.len();
                    frames.push(Arc::from(&self.buffer[..end]));
                    self.buffer.drain(..end);
                }
                None => break,
            }
        }

        if self.buffer.len() > self.max_pending {
            warn!(
                pending = self.buffer.len(),
                "No end of image within the pending limit, discarding buffer"
            );
            self.buffer.clear();
        }

        frames
    }

    /// True while a started JPEG is waiting for its end marker
    pub fn has_partial_frame(&self) -> bool {
        self.buffer.starts_with(&jpeg::SOI)
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

/// Counters shared by the reader tasks
#[derive(Debug, Default)]
pub struct ReaderStats {
    framed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ReaderStats {
    /// JPEG images cut from the stream
    pub fn framed(&self) -> u64 {
        self.framed.load(Ordering::Relaxed)
    }

    /// Frames handed to the sink
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames superseded by a newer one before the sink could take them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Frame numbering that carries over from one preview process to the next
#[derive(Debug, Default)]
struct Sequencer {
    /// Last number handed out by a pump
    issued: AtomicU64,
    /// Last number the delivery side has consumed, shown or drained
    consumed: AtomicU64,
}

impl Sequencer {
    fn next(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Complete JPEG waiting for delivery
#[derive(Clone)]
struct EncodedFrame {
    sequence: u64,
    captured_at: Instant,
    data: Arc<[u8]>,
}

enum PumpControl {
    /// Stop reading once no partial frame is buffered, then acknowledge
    PauseAtBoundary(oneshot::Sender<()>),
    Resume,
}

struct Attachment {
    process: ProcessId,
    control: mpsc::UnboundedSender<PumpControl>,
    pump: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

/// Reader for one preview process at a time
pub struct PreviewStreamReader {
    attached: Option<Attachment>,
    sink: SharedSink,
    stats: Arc<ReaderStats>,
    sequencer: Arc<Sequencer>,
    mirror: bool,
}

impl PreviewStreamReader {
    /// `mirror` flips every decoded frame horizontally
    pub fn new(mirror: bool) -> Self {
        Self {
            attached: None,
            sink: Arc::new(Mutex::new(None)),
            stats: Arc::new(ReaderStats::default()),
            sequencer: Arc::new(Sequencer::default()),
            mirror,
        }
    }

    /// Start consuming `stream`, the stdout of the preview process `handle`
    ///
    /// With `sink` set to `None` frames are drained and discarded.
    pub fn attach<R>(
        &mut self,
        handle: &CameraProcessHandle,
        stream: R,
        sink: Option<Arc<dyn FrameSink>>,
    ) -> Result<(), AttachError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if handle.kind != ProcessKind::Preview {
            return Err(AttachError::NotPreview(handle.kind));
        }
        if self.attached.is_some() {
            return Err(AttachError::AlreadyAttached);
        }

        self.set_sink(sink);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (slot_tx, slot_rx) = watch::channel(None);

        let pump = tokio::spawn(pump(
            stream,
            MjpegFramer::new(preview::MAX_PENDING_BYTES),
            slot_tx,
            control_rx,
            Arc::clone(&self.stats),
            Arc::clone(&self.sequencer),
            handle.id,
        ));
        let delivery = tokio::spawn(deliver(
            slot_rx,
            Arc::clone(&self.sink),
            self.mirror,
            Arc::clone(&self.stats),
            Arc::clone(&self.sequencer),
        ));

        info!(id = %handle.id, "Preview reader attached");
        self.attached = Some(Attachment {
            process: handle.id,
            control: control_tx,
            pump,
            delivery,
        });
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Replace the frame sink without interrupting the stream
    pub fn set_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    /// Ask the pump to stop at the next frame boundary
    ///
    /// The returned receiver resolves once no partial frame is buffered and
    /// reading has paused, or with an error if the stream ended first.
    pub fn pause_at_boundary(&self) -> Option<oneshot::Receiver<()>> {
        let attachment = self.attached.as_ref()?;
        let (ack_tx, ack_rx) = oneshot::channel();
        // A closed channel drops ack_tx, which the caller sees as "ended"
        let _ = attachment
            .control
            .send(PumpControl::PauseAtBoundary(ack_tx));
        Some(ack_rx)
    }

    /// Continue reading after [`pause_at_boundary`](Self::pause_at_boundary)
    pub fn resume(&self) {
        if let Some(attachment) = &self.attached {
            let _ = attachment.control.send(PumpControl::Resume);
        }
    }

    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    /// Stop consuming and release the stream. Idempotent.
    pub async fn detach(&mut self) {
        let Some(attachment) = self.attached.take() else {
            return;
        };
        drop(attachment.control);

        if let Err(e) = attachment.pump.await {
            warn!(id = %attachment.process, error = %e, "Preview pump task failed");
        }
        if let Err(e) = attachment.delivery.await {
            warn!(id = %attachment.process, error = %e, "Preview delivery task failed");
        }
        info!(
            id = %attachment.process,
            framed = self.stats.framed(),
            delivered = self.stats.delivered(),
            dropped = self.stats.dropped(),
            "Preview reader detached"
        );
    }
}

async fn pump<R>(
    mut stream: R,
    mut framer: MjpegFramer,
    slot: watch::Sender<Option<EncodedFrame>>,
    mut control: mpsc::UnboundedReceiver<PumpControl>,
    stats: Arc<ReaderStats>,
    sequencer: Arc<Sequencer>,
    process: ProcessId,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; preview::READ_CHUNK_SIZE];
    let mut pause: Option<oneshot::Sender<()>> = None;
    let mut paused = false;

    loop {
        tokio::select! {
            biased;

            message = control.recv() => match message {
                Some(PumpControl::PauseAtBoundary(ack)) => {
                    if framer.has_partial_frame() {
                        pause = Some(ack);
                    } else {
                        let _ = ack.send(());
                        paused = true;
                    }
                }
                Some(PumpControl::Resume) => {
                    pause = None;
                    paused = false;
                }
                None => break,
            },

            read = stream.read(&mut chunk), if !paused => match read {
                Ok(0) => {
                    debug!(id = %process, "Preview stream closed");
                    break;
                }
                Ok(n) => {
                    for data in framer.push(&chunk[..n]) {
                        stats.framed.fetch_add(1, Ordering::Relaxed);
                        slot.send_replace(Some(EncodedFrame {
                            sequence: sequencer.next(),
                            captured_at: Instant::now(),
                            data,
                        }));
                    }
                    if !framer.has_partial_frame() && let Some(ack) = pause.take() {
                        let _ = ack.send(());
                        paused = true;
                    }
                }
                Err(e) => {
                    warn!(id = %process, error = %e, "Preview stream read failed");
                    break;
                }
            },
        }
    }
}

async fn deliver(
    mut slot: watch::Receiver<Option<EncodedFrame>>,
    sink: SharedSink,
    mirror: bool,
    stats: Arc<ReaderStats>,
    sequencer: Arc<Sequencer>,
) {
    let mut last_sequence = sequencer.consumed.load(Ordering::Relaxed);

    while slot.changed().await.is_ok() {
        let Some(encoded) = slot.borrow_and_update().clone() else {
            continue;
        };
        if encoded.sequence <= last_sequence {
            continue;
        }

        let target = sink.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(target) = target else {
            // Hidden while pre-warming: drain only
            last_sequence = encoded.sequence;
            sequencer.consumed.store(last_sequence, Ordering::Relaxed);
            continue;
        };

        let superseded = encoded.sequence - last_sequence - 1;
        if superseded > 0 {
            stats.dropped.fetch_add(superseded, Ordering::Relaxed);
        }
        last_sequence = encoded.sequence;
        sequencer.consumed.store(last_sequence, Ordering::Relaxed);

        let sequence = encoded.sequence;
        let presented = tokio::task::spawn_blocking(move || {
            decode_frame(&encoded, mirror).map(|frame| target.present(frame))
        })
        .await;

        match presented {
            Ok(Ok(())) => {
                let delivered = stats.delivered.fetch_add(1, Ordering::Relaxed) + 1;
                if delivered % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(
                        sequence,
                        delivered,
                        dropped = stats.dropped(),
                        "Preview frames delivered"
                    );
                }
            }
            Ok(Err(e)) => debug!(sequence, error = %e, "Skipping undecodable preview frame"),
            Err(e) => warn!(sequence, error = %e, "Preview frame task failed"),
        }
    }
}

fn decode_frame(encoded: &EncodedFrame, mirror: bool) -> Result<Frame, image::ImageError> {
    let mut image =
        image::load_from_memory_with_format(&encoded.data, ImageFormat::Jpeg)?.to_rgba8();
    if mirror {
        image::imageops::flip_horizontal_in_place(&mut image);
    }
    Ok(Frame {
        sequence: encoded.sequence,
        captured_at: encoded.captured_at,
        image,
    })
}
