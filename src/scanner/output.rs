// SPDX-License-Identifier: GPL-3.0-only

//! Metadata output
//!
//! Consumes frames from the capture session, runs the decoder on the current
//! region of interest and queues the objects it finds for the controller.
//! Decoding runs on the blocking pool; while it is busy the session keeps
//! dropping frames on the bounded channel, so at most one frame is in flight.
//! Frames still queued from an earlier run are dropped by capture time.

use super::decoder::MetadataDecoder;
use super::types::{MetadataBatch, MetadataObject, RegionOfInterest, ScanEvent, Symbology};
use crate::backends::camera::types::{CameraFrame, FrameReceiver};
use crate::errors::ScanError;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Run a frame belongs to
#[derive(Debug, Clone, Copy)]
struct RunStamp {
    generation: u64,
    started_at: Instant,
}

/// Decoder configuration shared with the frame worker
pub struct MetadataOutput<D: MetadataDecoder> {
    decoder: Arc<D>,
    symbologies: Arc<[Symbology]>,
    roi: Arc<Mutex<RegionOfInterest>>,
    run: Arc<Mutex<RunStamp>>,
}

impl<D: MetadataDecoder> Clone for MetadataOutput<D> {
    fn clone(&self) -> Self {
        Self {
            decoder: Arc::clone(&self.decoder),
            symbologies: Arc::clone(&self.symbologies),
            roi: Arc::clone(&self.roi),
            run: Arc::clone(&self.run),
        }
    }
}

impl<D: MetadataDecoder> MetadataOutput<D> {
    /// Configure an output for the requested symbologies
    ///
    /// Requested symbologies the decoder cannot read are ignored; if none is
    /// left the configuration fails.
    pub fn new(decoder: Arc<D>, requested: &[Symbology]) -> Result<Self, ScanError> {
        let supported = decoder.supported_symbologies();
        let (usable, unsupported): (Vec<Symbology>, Vec<Symbology>) =
            requested.iter().copied().partition(|s| supported.contains(s));

        if !unsupported.is_empty() {
            debug!(?unsupported, "Decoder ignores unsupported symbologies");
        }
        if usable.is_empty() {
            return Err(ScanError::DecoderConfigError(format!(
                "none of {:?} is supported (decoder reads {:?})",
                requested, supported
            )));
        }

        info!(symbologies = ?usable, "Metadata output configured");
        Ok(Self {
            decoder,
            symbologies: usable.into(),
            roi: Arc::new(Mutex::new(RegionOfInterest::FULL)),
            run: Arc::new(Mutex::new(RunStamp {
                generation: 0,
                started_at: Instant::now(),
            })),
        })
    }

    /// Symbologies this output reports
    pub fn symbologies(&self) -> &[Symbology] {
        &self.symbologies
    }

    /// Restrict decoding to `roi`, clamped into the frame
    pub fn set_region_of_interest(&self, roi: RegionOfInterest) {
        let clamped = roi.clamped();
        debug!(
            x = clamped.x,
            y = clamped.y,
            width = clamped.width,
            height = clamped.height,
            "Region of interest updated"
        );
        *self.roi.lock().unwrap() = clamped;
    }

    pub fn region_of_interest(&self) -> RegionOfInterest {
        *self.roi.lock().unwrap()
    }

    /// Begin run `generation`
    ///
    /// Batches are tagged with it from now on; frames captured before this
    /// call are never decoded.
    pub fn set_generation(&self, generation: u64) {
        *self.run.lock().unwrap() = RunStamp {
            generation,
            started_at: Instant::now(),
        };
    }

    /// Generation of the run `frame` was captured in, `None` if that run ended
    fn generation_for(&self, frame: &CameraFrame) -> Option<u64> {
        let run = *self.run.lock().unwrap();
        (frame.captured_at >= run.started_at).then_some(run.generation)
    }

    /// Decode one frame, keeping only the configured symbologies
    pub fn process_frame(&self, frame: &CameraFrame) -> Vec<MetadataObject> {
        let roi = self.region_of_interest();
        let mut objects = self.decoder.decode(frame, &roi);
        objects.retain(|o| self.symbologies.contains(&o.symbology));
        objects
    }

    /// Run the frame worker on `handle`
    ///
    /// The worker ends when the session drops its sender or the event queue
    /// is closed.
    pub fn spawn(
        &self,
        handle: &Handle,
        mut frames: FrameReceiver,
        events: UnboundedSender<ScanEvent>,
    ) -> JoinHandle<()> {
        let output = self.clone();
        let blocking = handle.clone();

        handle.spawn(async move {
            while let Some(frame) = frames.next().await {
                let Some(generation) = output.generation_for(&frame) else {
                    trace!("Dropping frame captured before the current run");
                    continue;
                };
                let worker = output.clone();
                let objects = match blocking
                    .spawn_blocking(move || worker.process_frame(&frame))
                    .await
                {
                    Ok(objects) => objects,
                    Err(e) => {
                        warn!(error = %e, "Decoder task panicked");
                        continue;
                    }
                };

                if objects.is_empty() {
                    continue;
                }

                let batch = MetadataBatch {
                    generation,
                    objects,
                };
                if events.send(ScanEvent::Metadata(batch)).is_err() {
                    debug!("Event queue closed, stopping metadata output");
                    break;
                }
            }
            debug!("Metadata output finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;

    /// Reports one readable QR and one readable EAN-13 per frame
    struct MixedDecoder;

    impl MetadataDecoder for MixedDecoder {
        fn supported_symbologies(&self) -> &[Symbology] {
            &[Symbology::Qr, Symbology::Ean13]
        }

        fn decode(&self, _frame: &CameraFrame, roi: &RegionOfInterest) -> Vec<MetadataObject> {
            let mut qr = MetadataObject::readable("qr", Symbology::Qr);
            qr.bounds = *roi;
            vec![MetadataObject::readable("ean", Symbology::Ean13), qr]
        }
    }

    #[test]
    fn test_unsupported_set_is_rejected() {
        let result = MetadataOutput::new(Arc::new(MixedDecoder), &[Symbology::Aztec]);
        assert!(matches!(result, Err(ScanError::DecoderConfigError(_))));
    }

    #[test]
    fn test_filters_to_requested_symbologies() {
        let output =
            MetadataOutput::new(Arc::new(MixedDecoder), &[Symbology::Qr, Symbology::Aztec])
                .unwrap();
        assert_eq!(output.symbologies(), &[Symbology::Qr]);

        let frame = CameraFrame::from_rgba(1, 1, vec![0; 4]);
        let objects = output.process_frame(&frame);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].payload.as_deref(), Some("qr"));
    }

    #[test]
    fn test_region_is_clamped_before_decoding() {
        let output = MetadataOutput::new(Arc::new(MixedDecoder), &[Symbology::Qr]).unwrap();
        output.set_region_of_interest(RegionOfInterest::new(0.2, 0.2, 0.0, 0.0));
        assert!(output.region_of_interest().is_full());

        let frame = CameraFrame::from_rgba(1, 1, vec![0; 4]);
        assert!(output.process_frame(&frame)[0].bounds.is_full());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_tags_batches_with_generation() {
        let output = MetadataOutput::new(Arc::new(MixedDecoder), &Symbology::ALL).unwrap();
        output.set_generation(7);

        let (mut sender, receiver) = futures::channel::mpsc::channel(2);
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = output.spawn(&Handle::current(), receiver, events_tx);

        sender
            .send(CameraFrame::from_rgba(1, 1, vec![0; 4]))
            .await
            .unwrap();
        drop(sender);

        match events_rx.recv().await {
            Some(ScanEvent::Metadata(batch)) => {
                assert_eq!(batch.generation, 7);
                assert_eq!(batch.objects.len(), 2);
                assert_eq!(batch.objects[0].symbology, Symbology::Ean13);
            }
            other => panic!("Expected metadata batch, got {:?}", other),
        }
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_drops_frames_from_earlier_run() {
        let output = MetadataOutput::new(Arc::new(MixedDecoder), &[Symbology::Qr]).unwrap();
        output.set_generation(1);
        let queued = CameraFrame::from_rgba(1, 1, vec![0; 4]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        output.set_generation(2);

        let (mut sender, receiver) = futures::channel::mpsc::channel(2);
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = output.spawn(&Handle::current(), receiver, events_tx);

        sender.send(queued).await.unwrap();
        sender
            .send(CameraFrame::from_rgba(2, 1, vec![0; 8]))
            .await
            .unwrap();
        drop(sender);
        worker.await.unwrap();

        // Only the frame captured in run 2 was decoded
        let mut batches = Vec::new();
        while let Ok(ScanEvent::Metadata(batch)) = events_rx.try_recv() {
            batches.push(batch);
        }
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].generation, 2);
    }
}
