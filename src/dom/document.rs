//! Arena-backed live document
//!
//! Holds the element tree plus the per-element state a rendered page keeps
//! outside its markup: form values, checked/selected flags, layout
//! rectangles, style overrides, scroll metrics and media playback state.
//! Node handles are indices into the arena and are never reused; removing
//! a node only detaches it.

use std::collections::HashMap;

use url::Url;

use crate::core::{Point, PilotError, Rect, Result, Viewport};
use crate::dom::selector::SelectorList;
use crate::dom::style::{self, ComputedStyle};
use crate::dom::xpath::XPath;

/// Handle to a node in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Raw arena index
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// Scroll extents and offsets of a scroll container
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_left: f64,
    /// Total scrollable content width; 0 means "same as client width"
    pub scroll_width: f64,
    /// Total scrollable content height; 0 means "same as client height"
    pub scroll_height: f64,
}

/// Playback state of a media element
#[derive(Debug, Clone, PartialEq)]
pub struct MediaState {
    pub paused: bool,
    pub ended: bool,
    pub current_time: f64,
    /// NaN until metadata is known
    pub duration: f64,
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    pub buffered: Vec<(f64, f64)>,
    /// HTMLMediaElement readyState (0..=4)
    pub ready_state: u8,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            paused: true,
            ended: false,
            current_time: 0.0,
            duration: f64::NAN,
            volume: 1.0,
            muted: false,
            playback_rate: 1.0,
            buffered: Vec::new(),
            ready_state: 0,
        }
    }
}

/// Mutable state of one element
#[derive(Debug, Clone, Default)]
pub struct ElementState {
    pub value: String,
    pub checked: bool,
    pub selected: bool,
    pub rect: Rect,
    pub style: HashMap<String, String>,
    pub scroll: ScrollMetrics,
    pub media: Option<MediaState>,
}

/// An element node
#[derive(Debug, Clone)]
pub struct Element {
    pub tag_name: String,
    attrs: Vec<(String, String)>,
    pub state: ElementState,
}

impl Element {
    fn new(tag_name: &str, attrs: Vec<(String, String)>) -> Self {
        let tag_name = tag_name.to_ascii_lowercase();
        let mut state = ElementState {
            value: attr_in(&attrs, "value").unwrap_or_default().to_string(),
            checked: attr_in(&attrs, "checked").is_some(),
            selected: attr_in(&attrs, "selected").is_some(),
            style: style::parse_declarations(attr_in(&attrs, "style").unwrap_or_default()),
            ..Default::default()
        };
        if tag_name == "video" || tag_name == "audio" {
            state.media = Some(MediaState {
                muted: attr_in(&attrs, "muted").is_some(),
                ..Default::default()
            });
        }
        Self {
            tag_name,
            attrs,
            state,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        attr_in(&self.attrs, name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.attrs.push((name.clone(), value.to_string())),
        }
        if name == "style" {
            self.state.style = style::parse_declarations(value);
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_ascii_whitespace()
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.classes().any(|c| c == class_name)
    }

    /// Lowercased `type` attribute for inputs, with the HTML default
    pub fn input_type(&self) -> Option<String> {
        match self.tag_name.as_str() {
            "input" => Some(
                self.attr("type")
                    .map(|t| t.to_ascii_lowercase())
                    .unwrap_or_else(|| "text".to_string()),
            ),
            _ => None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.has_attr("disabled")
    }

    pub fn is_checkable(&self) -> bool {
        matches!(self.input_type().as_deref(), Some("checkbox") | Some("radio"))
    }

    /// Elements whose value is edited by typing
    pub fn is_text_entry(&self) -> bool {
        match self.tag_name.as_str() {
            "textarea" => true,
            "input" => !matches!(
                self.input_type().as_deref(),
                Some("checkbox")
                    | Some("radio")
                    | Some("submit")
                    | Some("button")
                    | Some("reset")
                    | Some("image")
                    | Some("file")
                    | Some("hidden")
            ),
            _ => self
                .attr("contenteditable")
                .map(|v| v.is_empty() || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    pub fn is_form_control(&self) -> bool {
        matches!(
            self.tag_name.as_str(),
            "input" | "textarea" | "select" | "button" | "option"
        )
    }
}

fn attr_in<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// The live document tree
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    id_index: HashMap<String, Vec<NodeId>>,
    /// `<label for>` value -> labels
    label_index: HashMap<String, Vec<NodeId>>,
    focused: Option<NodeId>,
    viewport: Viewport,
    location: String,
    mutations: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document containing only the root node
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
            root: NodeId(0),
            id_index: HashMap::new(),
            label_index: HashMap::new(),
            focused: None,
            viewport: Viewport::default(),
            location: "about:blank".to_string(),
            mutations: 0,
        }
    }

    /// Create a document with an `html > (head, body)` skeleton
    pub fn with_body() -> Self {
        let mut doc = Self::new();
        let html = doc.create_element(doc.root, "html", Vec::new());
        doc.create_element(html, "head", Vec::new());
        doc.create_element(html, "body", Vec::new());
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The `<html>` element
    pub fn document_element(&self) -> Option<NodeId> {
        self.element_children(self.root).into_iter().next()
    }

    /// The `<body>` element
    pub fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .into_iter()
            .find(|c| self.tag_name(*c) == Some("body"))
    }

    /// Number of mutations applied since creation
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    // ---- Construction ----

    fn push_node(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            kind,
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        self.mutations += 1;
        id
    }

    /// Append a new element to `parent`
    pub fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: &str,
        attrs: Vec<(String, String)>,
    ) -> NodeId {
        let element = Element::new(tag_name, attrs);
        let html_id = element.id().map(str::to_string);
        let label_for = (element.tag_name == "label")
            .then(|| element.attr("for").map(str::to_string))
            .flatten();
        let id = self.push_node(Some(parent), NodeKind::Element(element));
        if let Some(html_id) = html_id {
            self.id_index.entry(html_id).or_default().push(id);
        }
        if let Some(target) = label_for {
            self.label_index.entry(target).or_default().push(id);
        }
        id
    }

    /// Convenience wrapper taking `&str` attribute pairs
    pub fn append_element(&mut self, parent: NodeId, tag_name: &str, attrs: &[(&str, &str)]) -> NodeId {
        let attrs = attrs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        self.create_element(parent, tag_name, attrs)
    }

    /// Append a text node to `parent`
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.push_node(Some(parent), NodeKind::Text(text.to_string()))
    }

    /// Detach a node (and its subtree) from the tree
    pub fn remove(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).and_then(|n| n.parent) else {
            return;
        };
        self.nodes[parent.0].children.retain(|c| *c != id);
        self.nodes[id.0].parent = None;
        if self.focused.is_some_and(|f| f == id || self.is_descendant_of(f, id)) {
            self.focused = None;
        }
        self.rebuild_attr_indexes();
        self.mutations += 1;
    }

    /// Recompute the id and label lookups from the connected tree
    fn rebuild_attr_indexes(&mut self) {
        let mut ids: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut labels: HashMap<String, Vec<NodeId>> = HashMap::new();
        for node in self.elements() {
            let Some(element) = self.element(node) else {
                continue;
            };
            if let Some(html_id) = element.id() {
                ids.entry(html_id.to_string()).or_default().push(node);
            }
            if element.tag_name == "label" {
                if let Some(target) = element.attr("for") {
                    labels.entry(target.to_string()).or_default().push(node);
                }
            }
        }
        self.id_index = ids;
        self.label_index = labels;
    }

    fn is_indexed_attr(name: &str) -> bool {
        name.eq_ignore_ascii_case("id") || name.eq_ignore_ascii_case("for")
    }

    // ---- Element access ----

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.node(id)?.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(id.0)?.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Like [`Document::element`] but an error for non-elements
    pub fn require_element(&self, id: NodeId) -> Result<&Element> {
        self.element(id).ok_or(PilotError::NotAnElement(id.0))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.tag_name.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|e| e.attr(name))
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(element) = self.element_mut(id) {
            element.set_attr(name, value);
        }
        if Self::is_indexed_attr(name) {
            self.rebuild_attr_indexes();
        }
        self.mutations += 1;
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(element) = self.element_mut(id) {
            element.remove_attr(name);
        }
        if Self::is_indexed_attr(name) {
            self.rebuild_attr_indexes();
        }
        self.mutations += 1;
    }

    pub fn by_id(&self, html_id: &str) -> Option<NodeId> {
        self.id_index.get(html_id).and_then(|ids| ids.first().copied())
    }

    /// How many elements carry `html_id`
    pub fn ids_count(&self, html_id: &str) -> usize {
        self.id_index.get(html_id).map_or(0, Vec::len)
    }

    /// `<label>` elements whose `for` names `html_id`
    pub fn labels_for(&self, html_id: &str) -> &[NodeId] {
        self.label_index.get(html_id).map_or(&[], Vec::as_slice)
    }

    // ---- Tree navigation ----

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Parent if it is an element
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|p| self.is_element(*p))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    pub fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.element_children(parent);
        let pos = siblings.iter().position(|s| *s == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Whether the node is still attached to the document root
    pub fn is_connected(&self, id: NodeId) -> bool {
        id == self.root || self.is_descendant_of(id, self.root)
    }

    /// Ancestor elements from nearest to farthest
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.parent_element(id);
        while let Some(current) = cursor {
            out.push(current);
            cursor = self.parent_element(current);
        }
        out
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors(id).len()
    }

    /// Next node after `id` in document (pre-)order, or `None` at the end
    pub fn next_in_order(&self, id: NodeId) -> Option<NodeId> {
        if let Some(first) = self.children(id).first() {
            return Some(*first);
        }
        let mut current = id;
        loop {
            let parent = self.parent(current)?;
            let siblings = self.children(parent);
            let pos = siblings.iter().position(|s| *s == current)?;
            if let Some(next) = siblings.get(pos + 1) {
                return Some(*next);
            }
            current = parent;
        }
    }

    /// Next element after `id` in document order
    pub fn next_element_in_order(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = self.next_in_order(id);
        while let Some(current) = cursor {
            if self.is_element(current) {
                return Some(current);
            }
            cursor = self.next_in_order(current);
        }
        None
    }

    /// All connected elements in document order
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendant_elements(self.root)
    }

    /// Connected descendant elements of `id` in document order
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if self.is_element(node) {
                out.push(node);
            }
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    // ---- Text ----

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(element)
                if matches!(element.tag_name.as_str(), "script" | "style" | "template") => {}
            _ => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Direct text node children, in order
    pub fn own_text_nodes(&self, id: NodeId) -> Vec<&str> {
        self.children(id)
            .iter()
            .filter_map(|c| match &self.node(*c)?.kind {
                NodeKind::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace all children with a single text node
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        let old = std::mem::take(&mut self.nodes[id.0].children);
        for child in old {
            self.nodes[child.0].parent = None;
        }
        if !text.is_empty() {
            self.append_text(id, text);
        }
        self.rebuild_attr_indexes();
    }

    // ---- Layout & style ----

    pub fn rect(&self, id: NodeId) -> Rect {
        self.element(id).map(|e| e.state.rect).unwrap_or_default()
    }

    pub fn set_rect(&mut self, id: NodeId, rect: Rect) {
        if let Some(element) = self.element_mut(id) {
            element.state.rect = rect;
        }
    }

    /// Rectangle in client (viewport) coordinates
    pub fn client_rect(&self, id: NodeId) -> Rect {
        let rect = self.rect(id);
        Rect::new(
            rect.x - self.viewport.scroll_x,
            rect.y - self.viewport.scroll_y,
            rect.width,
            rect.height,
        )
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) {
        if let Some(element) = self.element_mut(id) {
            element
                .state
                .style
                .insert(property.to_ascii_lowercase(), value.to_string());
        }
        self.mutations += 1;
    }

    pub fn computed_style(&self, id: NodeId) -> ComputedStyle {
        match self.element(id) {
            Some(element) => ComputedStyle::for_element(element),
            None => ComputedStyle::default(),
        }
    }

    /// Not removed from rendering by `display: none` or `hidden` on itself
    /// or any ancestor
    pub fn is_displayed(&self, id: NodeId) -> bool {
        if !self.is_connected(id) {
            return false;
        }
        std::iter::once(id)
            .chain(self.ancestors(id))
            .all(|node| self.computed_style(node).display != "none")
    }

    /// Rendered, not visibility-hidden, not transparent and with area
    pub fn is_visible(&self, id: NodeId) -> bool {
        if !self.is_displayed(id) {
            return false;
        }
        let style = self.computed_style(id);
        if style.visibility == "hidden" || style.visibility == "collapse" || style.opacity <= 0.0 {
            return false;
        }
        self.rect(id).has_area()
    }

    // ---- Form state ----

    /// Current value of a form control
    pub fn value(&self, id: NodeId) -> Option<String> {
        let element = self.element(id)?;
        match element.tag_name.as_str() {
            "select" => {
                let index = self.selected_index(id)?;
                let option = *self.options(id).get(index)?;
                Some(self.option_value(option))
            }
            "option" => Some(self.option_value(id)),
            "input" | "textarea" | "button" => Some(element.state.value.clone()),
            _ if element.is_text_entry() => Some(self.text_content(id)),
            _ => None,
        }
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) -> Result<()> {
        let is_editable = {
            let element = self.require_element(id)?;
            !element.is_form_control() && element.is_text_entry()
        };
        if is_editable {
            self.set_text(id, value);
        } else if let Some(element) = self.element_mut(id) {
            element.state.value = value.to_string();
        }
        self.mutations += 1;
        Ok(())
    }

    pub fn checked(&self, id: NodeId) -> bool {
        self.element(id).map(|e| e.state.checked).unwrap_or(false)
    }

    /// Set the checked flag; checking a radio unchecks its named group
    pub fn set_checked(&mut self, id: NodeId, checked: bool) -> Result<()> {
        let element = self.require_element(id)?;
        if !element.is_checkable() {
            return Err(PilotError::action("Element is not a checkbox or radio button"));
        }
        let radio_group = (element.input_type().as_deref() == Some("radio") && checked)
            .then(|| element.attr("name").map(str::to_string))
            .flatten();
        if let Some(group) = radio_group {
            for other in self.elements() {
                let same_group = self.element(other).is_some_and(|e| {
                    e.input_type().as_deref() == Some("radio") && e.attr("name") == Some(group.as_str())
                });
                if same_group && other != id {
                    if let Some(e) = self.element_mut(other) {
                        e.state.checked = false;
                    }
                }
            }
        }
        if let Some(element) = self.element_mut(id) {
            element.state.checked = checked;
        }
        self.mutations += 1;
        Ok(())
    }

    /// `<option>` elements of a select (including inside optgroups)
    pub fn options(&self, select: NodeId) -> Vec<NodeId> {
        self.descendant_elements(select)
            .into_iter()
            .filter(|n| self.tag_name(*n) == Some("option"))
            .collect()
    }

    /// Value of an option: its `value` attribute, else its text
    pub fn option_value(&self, option: NodeId) -> String {
        match self.attr(option, "value") {
            Some(value) => value.to_string(),
            None => collapse_whitespace(&self.text_content(option)),
        }
    }

    pub fn selected_index(&self, select: NodeId) -> Option<usize> {
        let options = self.options(select);
        if options.is_empty() {
            return None;
        }
        let explicit = options
            .iter()
            .position(|o| self.element(*o).is_some_and(|e| e.state.selected));
        Some(explicit.unwrap_or(0))
    }

    /// Select the option at `index`, clearing the others
    pub fn select_index(&mut self, select: NodeId, index: usize) -> Result<()> {
        let options = self.options(select);
        if index >= options.len() {
            return Err(PilotError::action(format!(
                "Option index {} out of range ({} options)",
                index,
                options.len()
            )));
        }
        for (i, option) in options.iter().enumerate() {
            if let Some(e) = self.element_mut(*option) {
                e.state.selected = i == index;
            }
        }
        let value = self.option_value(options[index]);
        if let Some(e) = self.element_mut(select) {
            e.state.value = value;
        }
        self.mutations += 1;
        Ok(())
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    pub fn set_focused(&mut self, id: Option<NodeId>) {
        self.focused = id;
    }

    // ---- Viewport & scrolling ----

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport_size(&mut self, width: f64, height: f64) {
        self.viewport.width = width;
        self.viewport.height = height;
    }

    /// Total document extents: the viewport or the farthest element edge
    pub fn document_size(&self) -> (f64, f64) {
        self.elements().iter().fold(
            (self.viewport.width, self.viewport.height),
            |(w, h), node| {
                let rect = self.rect(*node);
                (w.max(rect.right()), h.max(rect.bottom()))
            },
        )
    }

    /// Scroll the window to an absolute position, clamped to the document
    pub fn scroll_window_to(&mut self, x: f64, y: f64) {
        let (width, height) = self.document_size();
        self.viewport.scroll_x = x.clamp(0.0, (width - self.viewport.width).max(0.0));
        self.viewport.scroll_y = y.clamp(0.0, (height - self.viewport.height).max(0.0));
    }

    pub fn scroll_metrics(&self, id: NodeId) -> ScrollMetrics {
        let Some(element) = self.element(id) else {
            return ScrollMetrics::default();
        };
        let rect = element.state.rect;
        let mut metrics = element.state.scroll;
        if metrics.scroll_width <= 0.0 {
            metrics.scroll_width = rect.width;
        }
        if metrics.scroll_height <= 0.0 {
            metrics.scroll_height = rect.height;
        }
        metrics
    }

    /// Set the scrollable content size of an element
    pub fn set_scroll_extents(&mut self, id: NodeId, scroll_width: f64, scroll_height: f64) {
        if let Some(element) = self.element_mut(id) {
            element.state.scroll.scroll_width = scroll_width;
            element.state.scroll.scroll_height = scroll_height;
        }
    }

    /// Scroll an element's content, clamped to its extents
    pub fn set_scroll_position(&mut self, id: NodeId, top: f64, left: f64) {
        let metrics = self.scroll_metrics(id);
        let rect = self.rect(id);
        if let Some(element) = self.element_mut(id) {
            element.state.scroll.scroll_top =
                top.clamp(0.0, (metrics.scroll_height - rect.height).max(0.0));
            element.state.scroll.scroll_left =
                left.clamp(0.0, (metrics.scroll_width - rect.width).max(0.0));
        }
    }

    /// Whether the element scrolls its own overflow on some axis
    pub fn is_scroll_container(&self, id: NodeId) -> bool {
        let style = self.computed_style(id);
        let metrics = self.scroll_metrics(id);
        let rect = self.rect(id);
        (style.scrolls_y() && metrics.scroll_height > rect.height)
            || (style.scrolls_x() && metrics.scroll_width > rect.width)
    }

    /// Nearest ancestor that is a scroll container
    pub fn scroll_container(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .into_iter()
            .find(|a| self.is_scroll_container(*a))
    }

    /// Scroll every enclosing container, then the window, so the element is
    /// centred. Returns the scrolled nodes (the root stands for the window).
    pub fn scroll_into_view(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut scrolled = Vec::new();
        let mut target = id;
        while let Some(container) = self.scroll_container(target) {
            let c = self.rect(container);
            let t = self.rect(target);
            let before = self.scroll_metrics(container);
            let top = (t.y - c.y) - (c.height - t.height).max(0.0) / 2.0;
            let left = (t.x - c.x) - (c.width - t.width).max(0.0) / 2.0;
            self.set_scroll_position(container, top, left);
            if self.scroll_metrics(container) != before {
                scrolled.push(container);
            }
            target = container;
        }

        let r = self.rect(target);
        let before = self.viewport;
        let y = r.y - (before.height - r.height).max(0.0) / 2.0;
        let x = r.x - (before.width - r.width).max(0.0) / 2.0;
        self.scroll_window_to(x, y);
        if self.viewport != before {
            scrolled.push(self.root);
        }
        scrolled
    }

    // ---- Media ----

    pub fn media(&self, id: NodeId) -> Option<&MediaState> {
        self.element(id).and_then(|e| e.state.media.as_ref())
    }

    pub fn media_mut(&mut self, id: NodeId) -> Option<&mut MediaState> {
        self.element_mut(id).and_then(|e| e.state.media.as_mut())
    }

    // ---- Location ----

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Navigate to `target`, resolved against the current location
    pub fn navigate(&mut self, target: &str) -> Result<String> {
        let resolved = match Url::parse(&self.location) {
            Ok(base) if base.scheme() != "about" => base.join(target),
            _ => Url::parse(target),
        }
        .map_err(|e| PilotError::action(format!("Invalid URL '{}': {}", target, e)))?;
        self.location = resolved.to_string();
        self.mutations += 1;
        Ok(self.location.clone())
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    // ---- Queries ----

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let list = SelectorList::parse(selector)?;
        Ok(self.elements().into_iter().find(|n| list.matches(self, *n)))
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .elements()
            .into_iter()
            .filter(|n| list.matches(self, *n))
            .collect())
    }

    /// Matching descendants of `scope`
    pub fn query_selector_all_within(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .descendant_elements(scope)
            .into_iter()
            .filter(|n| list.matches(self, *n))
            .collect())
    }

    pub fn matches(&self, id: NodeId, selector: &str) -> Result<bool> {
        Ok(SelectorList::parse(selector)?.matches(self, id))
    }

    /// Nearest inclusive ancestor matching `selector`
    pub fn closest(&self, id: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let list = SelectorList::parse(selector)?;
        Ok(std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|n| list.matches(self, *n)))
    }

    /// Evaluate an XPath expression, returning elements in document order
    pub fn evaluate_xpath(&self, expression: &str) -> Result<Vec<NodeId>> {
        XPath::parse(expression)?.evaluate(self)
    }

    /// Topmost visible element at a client-space point
    pub fn element_from_point(&self, point: Point) -> Option<NodeId> {
        let page_point = self.viewport.to_page(point);
        self.elements()
            .into_iter()
            .enumerate()
            .filter(|(_, n)| self.rect(*n).contains(page_point) && self.is_visible(*n))
            .max_by_key(|(order, n)| (self.depth(*n), *order))
            .map(|(_, n)| n)
    }

    /// Positional absolute XPath such as `/html/body/div[2]/button`
    pub fn xpath_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        for node in std::iter::once(id).chain(self.ancestors(id)) {
            let Some(tag) = self.tag_name(node) else {
                continue;
            };
            let same_tag: Vec<NodeId> = match self.parent(node) {
                Some(parent) => self
                    .element_children(parent)
                    .into_iter()
                    .filter(|s| self.tag_name(*s) == Some(tag))
                    .collect(),
                None => vec![node],
            };
            if same_tag.len() > 1 {
                let pos = same_tag.iter().position(|s| *s == node).unwrap_or(0) + 1;
                segments.push(format!("{}[{}]", tag, pos));
            } else {
                segments.push(tag.to_string());
            }
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let form = doc.append_element(body, "form", &[("id", "login")]);
        let input = doc.append_element(form, "input", &[("id", "q"), ("value", "start")]);
        let button = doc.append_element(form, "button", &[("class", "btn primary")]);
        doc.append_text(button, "  Sign   in ");
        (doc, form, input, button)
    }

    #[test]
    fn test_document_order_traversal() {
        let (doc, form, input, button) = sample();
        let order = doc.elements();
        let pos = |n| order.iter().position(|x| *x == n).unwrap();
        assert!(pos(form) < pos(input));
        assert!(pos(input) < pos(button));
        assert_eq!(doc.next_element_in_order(input), Some(button));
    }

    #[test]
    fn test_values_and_text() {
        let (mut doc, _, input, button) = sample();
        assert_eq!(doc.value(input).as_deref(), Some("start"));
        doc.set_value(input, "hello").unwrap();
        assert_eq!(doc.value(input).as_deref(), Some("hello"));
        assert_eq!(collapse_whitespace(&doc.text_content(button)), "Sign in");
    }

    #[test]
    fn test_remove_detaches() {
        let (mut doc, form, input, _) = sample();
        assert_eq!(doc.by_id("q"), Some(input));
        doc.remove(form);
        assert!(!doc.is_connected(input));
        assert_eq!(doc.by_id("q"), None);
    }

    #[test]
    fn test_id_and_label_lookups_follow_mutations() {
        let (mut doc, form, input, button) = sample();
        let label = doc.append_element(form, "label", &[("for", "q")]);
        assert_eq!(doc.ids_count("q"), 1);
        assert_eq!(doc.labels_for("q"), &[label]);

        doc.set_attr(button, "id", "q");
        assert_eq!(doc.ids_count("q"), 2);
        doc.set_attr(label, "for", "other");
        assert!(doc.labels_for("q").is_empty());
        assert_eq!(doc.labels_for("other"), &[label]);

        doc.remove(input);
        assert_eq!(doc.ids_count("q"), 1);
        doc.remove(form);
        assert_eq!(doc.ids_count("q"), 0);
        assert!(doc.labels_for("other").is_empty());
    }

    #[test]
    fn test_set_checked_rejects_non_checkbox() {
        let (mut doc, _, input, _) = sample();
        assert!(doc.set_checked(input, true).is_err());
    }

    #[test]
    fn test_radio_group_exclusive() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let a = doc.append_element(body, "input", &[("type", "radio"), ("name", "g")]);
        let b = doc.append_element(body, "input", &[("type", "radio"), ("name", "g")]);
        doc.set_checked(a, true).unwrap();
        doc.set_checked(b, true).unwrap();
        assert!(!doc.checked(a));
        assert!(doc.checked(b));
    }

    #[test]
    fn test_element_from_point_prefers_deepest() {
        let (mut doc, form, _, button) = sample();
        doc.set_rect(form, Rect::new(0.0, 0.0, 400.0, 200.0));
        doc.set_rect(button, Rect::new(10.0, 10.0, 80.0, 30.0));
        assert_eq!(doc.element_from_point(Point::new(20.0, 20.0)), Some(button));
        assert_eq!(doc.element_from_point(Point::new(300.0, 150.0)), Some(form));
    }

    #[test]
    fn test_xpath_of() {
        let (doc, _, _, button) = sample();
        assert_eq!(doc.xpath_of(button), "/html/body/form/button");
    }

    #[test]
    fn test_navigate_resolves_relative() {
        let mut doc = Document::with_body();
        doc.set_location("https://example.com/a/b");
        assert_eq!(doc.navigate("c").unwrap(), "https://example.com/a/c");
        assert_eq!(
            doc.navigate("https://other.org/").unwrap(),
            "https://other.org/"
        );
    }
}
