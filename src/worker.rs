//! Background scan worker.
//!
//! Runs the pipeline on a dedicated thread fed by an mpsc channel, so the
//! caller's event loop never blocks on decoding or recognition. Only one
//! scan may be in flight: a second submission is refused with
//! [`ScanError::Busy`] until the first has finished.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::ScanError;
use crate::geometry::PixelRect;
use crate::log;
use crate::ocr::{MeasurementReading, Pipeline, TextRecognizer};

type ScanOutcome = Result<MeasurementReading, ScanError>;

/// Which part of the image a scan reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanArea {
    /// The configured centered region of interest
    Center,
    Full,
    Rect(PixelRect),
}

struct ScanJob {
    image_path: String,
    area: ScanArea,
    reply: Sender<ScanOutcome>,
}

/// Clears the busy flag when the job that set it is done.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to one submitted scan.
///
/// Dropping it abandons the result; the worker then discards it.
pub struct ScanTicket {
    receiver: Receiver<ScanOutcome>,
}

impl ScanTicket {
    /// Blocks until the scan finishes.
    pub fn wait(self) -> ScanOutcome {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(anyhow!("Scan worker stopped before replying").into()))
    }

    /// Returns the result if the scan has finished.
    pub fn try_take(&self) -> Option<ScanOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(Err(anyhow!("Scan worker stopped before replying").into()))
            }
        }
    }
}

pub struct ScanWorker {
    sender: Option<Sender<ScanJob>>,
    handle: Option<JoinHandle<()>>,
    busy: Arc<AtomicBool>,
}

impl ScanWorker {
    /// Starts the worker thread, which owns the pipeline.
    pub fn spawn<R>(pipeline: Pipeline<R>) -> Result<Self>
    where
        R: TextRecognizer + Send + 'static,
    {
        let (sender, receiver) = channel::<ScanJob>();
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = Arc::clone(&busy);

        let handle = thread::Builder::new()
            .name("scan-worker".to_string())
            .spawn(move || run_scan_worker(receiver, pipeline, worker_busy))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            busy,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Queues a scan unless one is already in flight.
    pub fn submit(&self, image_path: &str, area: ScanArea) -> Result<ScanTicket, ScanError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(ScanError::Busy);
        }

        let (reply, receiver) = channel();
        let job = ScanJob {
            image_path: image_path.to_string(),
            area,
            reply,
        };

        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(job).is_ok())
            .unwrap_or(false);
        if !sent {
            self.busy.store(false, Ordering::SeqCst);
            return Err(anyhow!("Scan worker has stopped").into());
        }

        Ok(ScanTicket { receiver })
    }
}

impl Drop for ScanWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log("Scan worker thread panicked");
            }
        }
    }
}

/// Processes jobs until the channel closes.
fn run_scan_worker<R: TextRecognizer>(
    receiver: Receiver<ScanJob>,
    pipeline: Pipeline<R>,
    busy: Arc<AtomicBool>,
) {
    log("Scan worker started");

    while let Ok(job) = receiver.recv() {
        log(&format!(
            "Scan worker: processing {} ({:?})",
            job.image_path, job.area
        ));

        let guard = BusyGuard(Arc::clone(&busy));
        let outcome = match job.area {
            ScanArea::Center => pipeline.scan_measurement(&job.image_path),
            ScanArea::Full => pipeline.scan_measurement_region(&job.image_path, None),
            ScanArea::Rect(rect) => pipeline.scan_measurement_region(&job.image_path, Some(rect)),
        };
        drop(guard);

        if let Err(e) = &outcome {
            log(&format!("Scan worker: scan failed: {} ({})", e, e.kind()));
        }
        if job.reply.send(outcome).is_err() {
            log("Scan worker: caller went away, result discarded");
        }
    }

    log("Scan worker: channel closed, exiting");
}
