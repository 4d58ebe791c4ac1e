//! Slide deck model: parse a flat HTML document into slides plus shared
//! head/style/script content, mutate it in order, and knit it back.
//!
//! A `SlideDeck` is a plain owned value. One session owns one deck; callers
//! that need concurrent sessions use independent decks.

mod knit;
pub(crate) mod parse;
pub mod scripts;
mod slide;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Range;

use serde::{Deserialize, Serialize};

pub use parse::{SLIDE_CLASS, SLIDE_SCRIPTS_MARKER};
pub use slide::{canvas_ids_in, Slide};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeckError {
    #[error("unparseable markup: {0}")]
    Parse(String),
    #[error("slide index {index} out of range (deck has {len} slides)")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideDeck {
    pub title: Option<String>,
    pub css: String,
    pub scripts: String,
    pub external_scripts: Vec<String>,
    pub head_meta: BTreeMap<String, String>,
    pub slides: Vec<Slide>,
}

/// Structured, HTML-free view of a deck for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckView {
    pub title: Option<String>,
    pub slide_count: usize,
    pub css: String,
    pub scripts: String,
    pub external_scripts: Vec<String>,
    pub slides: Vec<SlideView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideView {
    pub index: usize,
    pub html: String,
    pub slide_id: Option<String>,
}

impl SlideDeck {
    /// Parse a full HTML document.
    ///
    /// Slides without an `id` attribute get `slide_<index>`.
    pub fn parse(html: &str) -> Result<Self, DeckError> {
        let parsed = parse::parse_markup(html)?;
        let css = parsed.joined_css();
        let scripts = parsed.joined_scripts(|_| true);

        let slides = parsed
            .slides
            .into_iter()
            .enumerate()
            .map(|(index, mut slide)| {
                if slide.slide_id.is_none() {
                    slide.slide_id = Some(format!("slide_{index}"));
                }
                slide
            })
            .collect();

        Ok(Self {
            title: parsed.title,
            css,
            scripts,
            external_scripts: parsed.external_scripts,
            head_meta: parsed.head_meta,
            slides,
        })
    }

    pub fn knit(&self) -> String {
        knit::render_document(self, &self.slides)
    }

    /// Standalone document containing only the slide at `index`.
    pub fn render_slide(&self, index: usize) -> Result<String, DeckError> {
        let slide = self.get(index)?;
        Ok(knit::render_document(self, std::iter::once(slide)))
    }

    pub fn view(&self) -> DeckView {
        DeckView {
            title: self.title.clone(),
            slide_count: self.slides.len(),
            css: self.css.clone(),
            scripts: self.scripts.clone(),
            external_scripts: self.external_scripts.clone(),
            slides: self
                .slides
                .iter()
                .enumerate()
                .map(|(index, slide)| SlideView {
                    index,
                    html: slide.html.clone(),
                    slide_id: slide.slide_id.clone(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Slide, DeckError> {
        let len = self.slides.len();
        self.slides
            .get(index)
            .ok_or(DeckError::IndexOutOfRange { index, len })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Slide, DeckError> {
        let len = self.slides.len();
        self.slides
            .get_mut(index)
            .ok_or(DeckError::IndexOutOfRange { index, len })
    }

    /// Insert before `position`; positions past the end append.
    pub fn insert(&mut self, position: usize, slide: Slide) {
        let position = position.min(self.slides.len());
        self.slides.insert(position, slide);
    }

    pub fn append(&mut self, slide: Slide) {
        self.slides.push(slide);
    }

    pub fn remove(&mut self, index: usize) -> Result<Slide, DeckError> {
        self.check_index(index)?;
        Ok(self.slides.remove(index))
    }

    /// Move the slide at `from` so that it ends up at index `to`.
    pub fn move_slide(&mut self, from: usize, to: usize) -> Result<(), DeckError> {
        self.check_index(from)?;
        self.check_index(to)?;
        let slide = self.slides.remove(from);
        self.slides.insert(to, slide);
        Ok(())
    }

    pub fn swap(&mut self, i: usize, j: usize) -> Result<(), DeckError> {
        self.check_index(i)?;
        self.check_index(j)?;
        self.slides.swap(i, j);
        Ok(())
    }

    /// Every canvas ID in the deck, in slide order. Repeats are kept.
    pub fn canvas_ids(&self) -> Vec<String> {
        self.slides.iter().flat_map(|s| s.canvas_ids()).collect()
    }

    /// Canvas IDs of every slide whose index falls outside `range`.
    pub fn canvas_ids_outside(&self, range: Range<usize>) -> BTreeSet<String> {
        self.slides
            .iter()
            .enumerate()
            .filter(|(index, _)| !range.contains(index))
            .flat_map(|(_, slide)| slide.canvas_ids())
            .collect()
    }

    /// Canvas IDs of the slides in `range`.
    pub fn canvas_ids_within(&self, range: Range<usize>) -> BTreeSet<String> {
        self.slides
            .get(range)
            .unwrap_or_default()
            .iter()
            .flat_map(|slide| slide.canvas_ids())
            .collect()
    }

    /// Deck-script statements that set up the charts of the slides in
    /// `range`, with the declarations they read.
    pub fn chart_scripts_for(&self, range: Range<usize>) -> Vec<String> {
        scripts::canvas_statements(&self.scripts, &self.canvas_ids_within(range))
    }

    /// Keep the first `len` slides. Chart code for canvases that no longer
    /// exist is removed from the deck script.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.slides.len() {
            return;
        }
        let dropped = self.canvas_ids_within(len..self.slides.len());
        self.slides.truncate(len);
        let kept = self.canvas_ids_within(0..len);
        let gone: BTreeSet<String> = dropped.difference(&kept).cloned().collect();
        self.scripts = scripts::remove_canvas_statements(&self.scripts, &gone);
    }

    /// Give every slide without an ID a `slide_<n>` that no other slide uses.
    pub fn assign_missing_ids(&mut self) {
        let mut taken: HashSet<String> = self
            .slides
            .iter()
            .filter_map(|s| s.slide_id.clone())
            .collect();

        for index in 0..self.slides.len() {
            if self.slides[index].slide_id.is_some() {
                continue;
            }
            let mut n = index;
            let id = loop {
                let candidate = format!("slide_{n}");
                if !taken.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            taken.insert(id.clone());
            self.slides[index].slide_id = Some(id);
        }
    }

    pub(crate) fn check_index(&self, index: usize) -> Result<(), DeckError> {
        if index < self.slides.len() {
            Ok(())
        } else {
            Err(DeckError::IndexOutOfRange {
                index,
                len: self.slides.len(),
            })
        }
    }
}
