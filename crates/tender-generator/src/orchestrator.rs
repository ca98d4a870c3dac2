/// Drives generation of a full tender document.
///
/// Sections run through an ordered buffer: with a concurrency of 1 they are generated strictly
/// one after another, with a higher value several run at once but results and progress events
/// are still yielded in canonical order.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::stream::BoxStream;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::error::ValidationError;
use crate::model::{
    ProjectBrief, SectionId, SectionResult, SectionStatus, TenderDocument, SECTIONS,
};
use crate::section::SectionGenerator;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

pub const SECTION_COUNT: usize = 6;

/// Reported once per section, after it completes, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub section: SectionId,
    pub status: SectionStatus,
}

pub trait ProgressObserver: Send + Sync {
    fn on_section(&self, event: ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_section(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Observer that ignores every event.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_section(&self, _event: ProgressEvent) {}
}

pub struct TenderOrchestrator {
    sections: Arc<SectionGenerator>,
    concurrency: usize,
}

impl TenderOrchestrator {
    /// `concurrency` is clamped to `1..=6`.
    pub fn new(sections: Arc<SectionGenerator>, concurrency: usize) -> Self {
        Self {
            sections,
            concurrency: concurrency.clamp(1, SECTION_COUNT),
        }
    }

    /// Generate every section for `brief`.
    ///
    /// Only an invalid brief is an error. Provider failures become failed sections; once
    /// `cancel` fires, sections not yet started are recorded as failed without being attempted.
    pub async fn generate(
        &self,
        brief: &ProjectBrief,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<TenderDocument, ValidationError> {
        brief.validate()?;

        let run_id = new_run_id();
        let span = tracing::info_span!("tender", run_id = %run_id);
        async move {
            info!(title = %brief.title, concurrency = self.concurrency, "tender generation started");

            let mut results = Vec::with_capacity(SECTION_COUNT);
            let mut stream = self.section_stream(brief, cancel);

            while let Some(result) = stream.next().await {
                observer.on_section(ProgressEvent {
                    completed: results.len() + 1,
                    total: SECTION_COUNT,
                    section: result.section(),
                    status: result.status(),
                });
                results.push(result);
            }

            let document = TenderDocument::assemble(brief.clone(), results);
            info!(
                status = ?document.overall_status(),
                failed = document.failed_sections().count(),
                "tender generation finished"
            );
            Ok(document)
        }
        .instrument(span)
        .await
    }

    /// Section results in `SECTIONS` order, at most `concurrency` in flight.
    ///
    /// Built in a plain fn and boxed so the stream's `Send` bound is proven with named
    /// lifetimes (works around rust-lang/rust#110338 in `generate`'s future).
    fn section_stream<'a>(
        &'a self,
        brief: &'a ProjectBrief,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, SectionResult> {
        futures::stream::iter(SECTIONS.iter())
            .map(move |spec| async move {
                if cancel.is_cancelled() {
                    warn!(section = %spec.id, "cancelled before start");
                    return SectionResult::failed(
                        spec.id,
                        "generation cancelled before this section started",
                        0,
                    );
                }
                self.sections.generate(spec, brief).await
            })
            .buffered(self.concurrency)
            .boxed()
    }
}

/// Short hex id used to correlate the log lines of one run.
fn new_run_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let counter = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();

    let mut h = Sha256::new();
    h.update(now.as_nanos().to_le_bytes());
    h.update(pid.to_le_bytes());
    h.update(counter.to_le_bytes());
    let digest = h.finalize();
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}
