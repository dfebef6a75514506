//! Transcript assembly from interim and final fragments
//!
//! Interim fragments are display-only and may be revised by the service
//! before an utterance stabilizes; final fragments are stable and
//! accumulate into the transcript that gets persisted at session close.

use std::io::Write;

/// Whether a fragment can still be revised by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finality {
    Interim,
    Final,
}

/// A transcript segment received from the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TranscriptFragment {
    pub text: String,
    pub finality: Finality,
}

/// What the live display should do for a processed fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DisplayUpdate {
    /// Overwrite the current line in place
    Interim(String),
    /// Commit the line with a durable line break
    Final(String),
}

/// Accumulates final fragments in arrival order
///
/// The buffer is append-only: interim fragments never touch it, and
/// nothing is reordered or deduplicated. It is read once, at close time,
/// by session persistence.
#[derive(Debug, Default)]
pub(crate) struct TranscriptAssembler {
    lines: Vec<String>,
}

impl TranscriptAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Process one fragment
    ///
    /// Fragments with empty text are dropped without touching the buffer
    /// or the display. Final fragments are appended to the buffer;
    /// interim fragments only produce a display update.
    pub(crate) fn on_fragment(&mut self, fragment: TranscriptFragment) -> Option<DisplayUpdate> {
        if fragment.text.is_empty() {
            return None;
        }
        match fragment.finality {
            Finality::Final => {
                self.lines.push(fragment.text.clone());
                Some(DisplayUpdate::Final(fragment.text))
            }
            Finality::Interim => Some(DisplayUpdate::Interim(fragment.text)),
        }
    }

    /// Final fragments accumulated so far, in arrival order
    pub(crate) fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Render a display update to `out`
///
/// Interim text ends with a bare carriage return so the next interim
/// overwrites it in place; final text ends with a line break so
/// consecutive finals stay visible.
pub(crate) fn render_update<W: Write>(out: &mut W, update: &DisplayUpdate) -> std::io::Result<()> {
    match update {
        DisplayUpdate::Interim(text) => write!(out, "{}\r", text)?,
        DisplayUpdate::Final(text) => write!(out, "{}\r\n", text)?,
    }
    out.flush()
}
