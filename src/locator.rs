//! Finding the content block under a click.
//!
//! The locator is pure and synchronous: it asks a [`PageDocument`] for the
//! element at a point and walks up to the nearest ancestor matching the
//! configured [`ContentRule`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::prompts::NOT_FOUND_TEXT;
use crate::types::ContentPoint;

/// Minimal view of a rendered document needed to locate content.
pub trait PageDocument {
    type Element: Clone + PartialEq + fmt::Debug;

    /// Current scroll offset `(x, y)` in CSS pixels.
    fn scroll_offset(&self) -> (f64, f64);

    /// Topmost element at a viewport position.
    fn element_from_point(&self, x: f64, y: f64) -> Option<Self::Element>;

    fn parent(&self, element: &Self::Element) -> Option<Self::Element>;

    /// Whether `element` is the document-root boundary the ancestor walk
    /// stops at (the `<body>` element). The boundary itself never matches.
    fn is_root_boundary(&self, element: &Self::Element) -> bool;

    fn tag_name(&self, element: &Self::Element) -> Option<&str>;

    fn has_class(&self, element: &Self::Element, class: &str) -> bool;

    /// Flattened text of `element` and its descendants, in document order.
    fn text_content(&self, element: &Self::Element) -> String;

    fn clear_highlights(&mut self);

    fn highlight(&mut self, element: &Self::Element);
}

/// Tag plus class identifying a content block, written `tag.class`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentRule {
    /// Lowercase tag name, or `*` for any tag.
    pub tag: String,
    pub class: String,
}

impl Default for ContentRule {
    fn default() -> Self {
        Self::new("div", "content")
    }
}

impl ContentRule {
    pub fn new(tag: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            class: class.into(),
        }
    }

    /// Parse `tag.class` or `.class`.
    pub fn parse(selector: &str) -> Option<Self> {
        let (tag, class) = selector.trim().split_once('.')?;
        let class = class.trim();
        if class.is_empty() || class.contains(['.', ' ']) {
            return None;
        }
        let tag = match tag.trim() {
            "" => "*",
            other => other,
        };
        Some(Self::new(tag, class))
    }

    pub fn matches<D: PageDocument + ?Sized>(&self, doc: &D, element: &D::Element) -> bool {
        let tag_ok = self.tag == "*"
            || doc
                .tag_name(element)
                .is_some_and(|tag| tag.eq_ignore_ascii_case(&self.tag));
        tag_ok && doc.has_class(element, &self.class)
    }
}

impl fmt::Display for ContentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag == "*" {
            write!(f, ".{}", self.class)
        } else {
            write!(f, "{}.{}", self.tag, self.class)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    NonFinitePoint,
    NothingAtPoint,
    NoContentAncestor,
    EmptyText,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotFoundReason::NonFinitePoint => "point is not finite",
            NotFoundReason::NothingAtPoint => "no element at point",
            NotFoundReason::NoContentAncestor => "no content block encloses the point",
            NotFoundReason::EmptyText => "content block has no text",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum LocateError {
    #[error("no content found: {0}")]
    NotFound(NotFoundReason),
}

impl LocateError {
    /// Instructive message shown to the user.
    pub fn user_message(&self) -> &'static str {
        NOT_FOUND_TEXT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocatedContent<E> {
    pub element: E,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContentLocator {
    rule: ContentRule,
}

impl ContentLocator {
    pub fn new(rule: ContentRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &ContentRule {
        &self.rule
    }

    /// Nearest content block enclosing the page-coordinate `point`.
    ///
    /// Clears existing highlights first; at most one element is highlighted
    /// afterwards.
    pub fn locate<D: PageDocument>(
        &self,
        doc: &mut D,
        point: ContentPoint,
    ) -> Result<D::Element, LocateError> {
        doc.clear_highlights();

        let (scroll_x, scroll_y) = doc.scroll_offset();
        let viewport = point.to_viewport(scroll_x, scroll_y);
        if !viewport.is_finite() {
            return Err(LocateError::NotFound(NotFoundReason::NonFinitePoint));
        }

        let mut current = doc
            .element_from_point(viewport.x, viewport.y)
            .ok_or(LocateError::NotFound(NotFoundReason::NothingAtPoint))?;

        loop {
            if doc.is_root_boundary(&current) {
                return Err(LocateError::NotFound(NotFoundReason::NoContentAncestor));
            }
            if self.rule.matches(doc, &current) {
                doc.highlight(&current);
                return Ok(current);
            }
            current = doc
                .parent(&current)
                .ok_or(LocateError::NotFound(NotFoundReason::NoContentAncestor))?;
        }
    }

    /// [`locate`](Self::locate) plus whitespace-normalised text extraction.
    pub fn extract<D: PageDocument>(
        &self,
        doc: &mut D,
        point: ContentPoint,
    ) -> Result<LocatedContent<D::Element>, LocateError> {
        let element = self.locate(doc, point)?;
        let text = normalize_text(&doc.text_content(&element));
        if text.is_empty() {
            return Err(LocateError::NotFound(NotFoundReason::EmptyText));
        }
        Ok(LocatedContent { element, text })
    }
}

/// Collapse whitespace runs to one space and trim the ends.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
