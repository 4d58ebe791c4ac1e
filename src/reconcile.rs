//! Edit reconciliation: turn edit-mode markup into a validated replacement
//! patch for a contiguous run of slides, and apply it to a deck.
//!
//! `reconcile` is a pure function of (response, indices). Structural problems
//! (gaps in the index run, no slides, repeated canvas IDs) are errors so the
//! caller can retry generation with the error text as feedback.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::deck::parse::parse_markup;
use crate::deck::scripts::{mentions_canvas, redeclared_bindings, remove_statements};
use crate::deck::{DeckError, Slide, SlideDeck};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("no slide indices were selected for editing")]
    EmptyIndices,
    #[error("slide indices {indices:?} are not strictly increasing and contiguous")]
    NonContiguous { indices: Vec<usize> },
    #[error("edit response contains no slide containers")]
    NoSlides,
    #[error("canvas id `{0}` appears more than once in the replacement slides")]
    DuplicateCanvasId(String),
    #[error("canvas ids {0:?} are already used by slides outside the edited range")]
    CanvasCollision(Vec<String>),
    #[error("slide index {index} out of range (deck has {len} slides)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("edit response could not be parsed: {0}")]
    Parse(#[from] DeckError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementPatch {
    pub original_indices: Vec<usize>,
    pub replacement_slides: Vec<Slide>,
    /// Chart-init code for the replacement slides.
    pub replacement_scripts: String,
    pub replacement_css: String,
    pub canvas_ids: BTreeSet<String>,
    /// `replacement_slides.len() - original_indices.len()`
    pub net_change: isize,
}

/// Check that `indices` is a non-empty run like `[3, 4, 5]`; return it as a range.
pub fn validate_indices(indices: &[usize]) -> Result<Range<usize>, ReconciliationError> {
    let (Some(&first), Some(&last)) = (indices.first(), indices.last()) else {
        return Err(ReconciliationError::EmptyIndices);
    };
    let contiguous = indices
        .windows(2)
        .all(|w| w[0].checked_add(1) == Some(w[1]));
    if !contiguous {
        return Err(ReconciliationError::NonContiguous {
            indices: indices.to_vec(),
        });
    }
    let end = last
        .checked_add(1)
        .ok_or(ReconciliationError::IndexOutOfRange {
            index: last,
            len: usize::MAX,
        })?;
    Ok(first..end)
}

pub fn reconcile(
    response: &str,
    original_indices: &[usize],
) -> Result<ReplacementPatch, ReconciliationError> {
    validate_indices(original_indices)?;

    let parsed = parse_markup(response)?;
    if parsed.slides.is_empty() {
        return Err(ReconciliationError::NoSlides);
    }

    let mut canvas_ids = BTreeSet::new();
    for slide in &parsed.slides {
        for id in slide.canvas_ids() {
            if !canvas_ids.insert(id.clone()) {
                return Err(ReconciliationError::DuplicateCanvasId(id));
            }
        }
    }

    let marked = parsed.joined_scripts(|s| s.slide_scoped);
    let replacement_scripts = if !marked.is_empty() {
        marked
    } else {
        let unmarked = parsed.joined_scripts(|s| !s.slide_scoped);
        if !unmarked.is_empty() {
            tracing::warn!(
                chars = unmarked.len(),
                "edit response has no slide-scripts block; using unmarked inline scripts"
            );
        }
        unmarked
    };

    let replacement_css = parsed.joined_css();
    let replacement_slides = parsed.slides;
    let net_change = replacement_slides.len() as isize - original_indices.len() as isize;

    tracing::debug!(
        replaced = original_indices.len(),
        replacement = replacement_slides.len(),
        net_change,
        canvases = canvas_ids.len(),
        "reconciled edit response"
    );

    Ok(ReplacementPatch {
        original_indices: original_indices.to_vec(),
        replacement_slides,
        replacement_scripts,
        replacement_css,
        canvas_ids,
        net_change,
    })
}

impl ReplacementPatch {
    pub fn range(&self) -> Result<Range<usize>, ReconciliationError> {
        validate_indices(&self.original_indices)
    }

    /// Fail if the edited range does not fit `deck` or a replacement canvas
    /// ID is already used by an untouched slide.
    pub fn check_collisions(&self, deck: &SlideDeck) -> Result<(), ReconciliationError> {
        let range = self.range()?;
        if range.end > deck.len() {
            return Err(ReconciliationError::IndexOutOfRange {
                index: range.end - 1,
                len: deck.len(),
            });
        }

        let untouched = deck.canvas_ids_outside(range);
        let collisions: Vec<String> = self.canvas_ids.intersection(&untouched).cloned().collect();
        if collisions.is_empty() {
            Ok(())
        } else {
            Err(ReconciliationError::CanvasCollision(collisions))
        }
    }

    /// Canvases of the replaced slides whose old chart code must go: those
    /// that disappear, and those the replacement script initializes again.
    /// A kept canvas the replacement script never touches keeps its old code.
    pub fn stale_canvas_ids(&self, deck: &SlideDeck) -> Result<BTreeSet<String>, ReconciliationError> {
        let range = self.range()?;
        Ok(deck
            .canvas_ids_within(range)
            .into_iter()
            .filter(|id| {
                !self.canvas_ids.contains(id) || mentions_canvas(&self.replacement_scripts, id)
            })
            .collect())
    }

    /// Splice the replacement into `deck`. On error the deck is unchanged.
    ///
    /// Chart code for stale canvases, and top-level bindings the replacement
    /// script declares again, are removed from the deck script before the
    /// replacement script is appended. CSS blocks the deck already has are
    /// not appended twice.
    pub fn apply(&self, deck: &mut SlideDeck) -> Result<(), ReconciliationError> {
        self.check_collisions(deck)?;
        let range = self.range()?;
        let stale = self.stale_canvas_ids(deck)?;
        let redeclared = redeclared_bindings(&deck.scripts, &self.replacement_scripts);

        deck.slides
            .splice(range, self.replacement_slides.iter().cloned())
            .for_each(drop);
        deck.scripts = remove_statements(&deck.scripts, &stale, &redeclared);
        append_block(&mut deck.css, &self.replacement_css);
        append_block(&mut deck.scripts, &self.replacement_scripts);
        deck.assign_missing_ids();
        Ok(())
    }
}

/// Append `block` on its own line unless it is blank or `target` already
/// contains it.
fn append_block(target: &mut String, block: &str) {
    let block = block.trim();
    if block.is_empty() || target.contains(block) {
        return;
    }
    if !target.trim().is_empty() {
        target.push('\n');
    }
    target.push_str(block);
}
