//! Stream ingestion.
//!
//! Accumulates arriving fragments into one growing buffer so the extractor
//! always sees a stable, totally ordered view of the response.

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::domain::GenerationError;
use crate::extract::{Extraction, Extractor};

/// Final text of a closed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalText {
    pub text: String,
    /// The stream was closed by cancellation rather than completion.
    pub aborted: bool,
}

/// Append-only response buffer.
#[derive(Debug, Default)]
pub struct StreamIngester {
    buffer: String,
    fragments: usize,
}

impl StreamIngester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next fragment in arrival order.
    pub fn append(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
        self.fragments += 1;
    }

    pub fn current_text(&self) -> &str {
        &self.buffer
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    /// Live-preview extraction of the text received so far.
    pub fn preview(&self, extractor: &Extractor) -> Extraction {
        extractor.extract(&self.buffer)
    }

    /// Close the stream.
    pub fn finalize(self, aborted: bool) -> FinalText {
        FinalText {
            text: self.buffer,
            aborted,
        }
    }
}

/// Outcome of draining a fragment stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub final_text: FinalText,
    pub fragments: usize,
    /// The stream broke before completing; `final_text` holds what arrived.
    pub interrupted: Option<GenerationError>,
}

/// Drain `stream` into a [`StreamIngester`], checking `cancel` between
/// fragments.
pub async fn ingest_stream<S>(stream: S, cancel: &CancelFlag) -> Ingested
where
    S: Stream<Item = Result<String, GenerationError>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut ingester = StreamIngester::new();
    let mut interrupted = None;
    let mut aborted = false;

    loop {
        if cancel.is_cancelled() {
            aborted = true;
            break;
        }
        match stream.next().await {
            Some(Ok(fragment)) => ingester.append(&fragment),
            Some(Err(err)) => {
                warn!(event = "ingest.interrupted", error = %err);
                interrupted = Some(err);
                break;
            }
            None => break,
        }
    }

    let fragments = ingester.fragment_count();
    debug!(event = "ingest.finished", fragments = fragments, aborted = aborted);
    Ingested {
        final_text: ingester.finalize(aborted),
        fragments,
        interrupted,
    }
}
