//! In-memory element tree implementing [`PageDocument`].
//!
//! A snapshot is either built directly (tests, fixtures) or captured from a
//! live page by the browser runtime. Node ids are indexes into the node list;
//! ids captured from a page match the `data-zsxq-node` attribute the capture
//! script stamps on each element.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::locator::PageDocument;
use crate::types::{ContentPoint, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// A text run or a child element, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Text(String),
    Child(NodeId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub tag: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub content: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSnapshot {
    nodes: Vec<SnapshotNode>,
    root: NodeId,
    #[serde(default)]
    scroll_x: f64,
    #[serde(default)]
    scroll_y: f64,
    #[serde(skip)]
    highlighted: BTreeSet<NodeId>,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot payload is not valid: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("snapshot references missing node {0}")]
    DanglingNode(usize),
    #[error("snapshot has no nodes")]
    Empty,
}

impl DomSnapshot {
    /// Snapshot containing only a `<body>` root covering `viewport`.
    pub fn new(viewport: Rect) -> Self {
        Self {
            nodes: vec![SnapshotNode {
                tag: "body".into(),
                classes: Vec::new(),
                rect: Some(viewport),
                parent: None,
                content: Vec::new(),
            }],
            root: NodeId(0),
            scroll_x: 0.0,
            scroll_y: 0.0,
            highlighted: BTreeSet::new(),
        }
    }

    /// Decode a payload produced by the capture script and check its links.
    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        let snapshot: DomSnapshot = serde_json::from_value(value)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        if self.nodes.is_empty() {
            return Err(SnapshotError::Empty);
        }
        let check = |id: NodeId| {
            if id.0 < self.nodes.len() {
                Ok(())
            } else {
                Err(SnapshotError::DanglingNode(id.0))
            }
        };
        check(self.root)?;
        for node in &self.nodes {
            if let Some(parent) = node.parent {
                check(parent)?;
            }
            for segment in &node.content {
                if let Segment::Child(child) = segment {
                    check(*child)?;
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&SnapshotNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_element(
        &mut self,
        parent: NodeId,
        tag: &str,
        classes: &[&str],
        rect: Rect,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SnapshotNode {
            tag: tag.to_ascii_lowercase(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            rect: Some(rect),
            parent: Some(parent),
            content: Vec::new(),
        });
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.content.push(Segment::Child(id));
        }
        id
    }

    pub fn add_text(&mut self, parent: NodeId, text: &str) {
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.content.push(Segment::Text(text.to_string()));
        }
    }

    pub fn set_scroll(&mut self, x: f64, y: f64) {
        self.scroll_x = x;
        self.scroll_y = y;
    }

    pub fn highlighted(&self) -> Vec<NodeId> {
        self.highlighted.iter().copied().collect()
    }

    /// Elements reachable from the root, in document (pre-)order.
    pub fn document_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(node) = self.node(id) {
                for segment in node.content.iter().rev() {
                    if let Segment::Child(child) = segment {
                        stack.push(*child);
                    }
                }
            }
        }
        order
    }

    /// Every element carrying `class`, in document order.
    pub fn elements_with_class(&self, class: &str) -> Vec<NodeId> {
        self.document_order()
            .into_iter()
            .filter(|id| self.has_class(id, class))
            .collect()
    }

    fn collect_text(&self, id: NodeId, out: &mut String, seen: &mut BTreeSet<NodeId>) {
        if !seen.insert(id) {
            return;
        }
        let Some(node) = self.node(id) else {
            return;
        };
        for segment in &node.content {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Child(child) => self.collect_text(*child, out, seen),
            }
        }
    }
}

impl PageDocument for DomSnapshot {
    type Element = NodeId;

    fn scroll_offset(&self) -> (f64, f64) {
        (self.scroll_x, self.scroll_y)
    }

    /// Last element in document order whose box contains the point.
    fn element_from_point(&self, x: f64, y: f64) -> Option<NodeId> {
        let point = ContentPoint::new(x, y);
        self.document_order().into_iter().rev().find(|id| {
            self.node(*id)
                .and_then(|node| node.rect)
                .is_some_and(|rect| rect.contains(point))
        })
    }

    fn parent(&self, element: &NodeId) -> Option<NodeId> {
        self.node(*element).and_then(|node| node.parent)
    }

    fn is_root_boundary(&self, element: &NodeId) -> bool {
        *element == self.root
    }

    fn tag_name(&self, element: &NodeId) -> Option<&str> {
        self.node(*element).map(|node| node.tag.as_str())
    }

    fn has_class(&self, element: &NodeId, class: &str) -> bool {
        self.node(*element)
            .is_some_and(|node| node.classes.iter().any(|c| c == class))
    }

    fn text_content(&self, element: &NodeId) -> String {
        let mut out = String::new();
        self.collect_text(*element, &mut out, &mut BTreeSet::new());
        out
    }

    fn clear_highlights(&mut self) {
        self.highlighted.clear();
    }

    fn highlight(&mut self, element: &NodeId) {
        self.highlighted.insert(*element);
    }
}
