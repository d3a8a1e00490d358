//! Hierarchical, lazily materialized collectors for errors and warnings.
//!
//! A collector handle is cheap: `at` only extends the handle's path, the
//! backing tree allocates a node the first time a message lands on it. The
//! same shape serves both errors and warnings, distinguished by header.
use crate::paths::{write_pointer, PathChunk};
use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

#[derive(Clone, Debug, Default)]
struct ExceptionNode {
    messages: Vec<String>,
    children: BTreeMap<PathChunk, ExceptionNode>,
}

impl ExceptionNode {
    fn descend(&self, path: &[PathChunk]) -> Option<&ExceptionNode> {
        let mut node = self;
        for chunk in path {
            node = node.children.get(chunk)?;
        }
        Some(node)
    }

    fn descend_mut(&mut self, path: &[PathChunk]) -> &mut ExceptionNode {
        let mut node = self;
        for chunk in path {
            node = node.children.entry(chunk.clone()).or_default();
        }
        node
    }

    fn has_messages(&self) -> bool {
        !self.messages.is_empty() || self.children.values().any(ExceptionNode::has_messages)
    }

    fn merge(&mut self, other: &ExceptionNode) {
        self.messages.extend(other.messages.iter().cloned());
        for (key, child) in &other.children {
            self.children.entry(key.clone()).or_default().merge(child);
        }
    }

    fn collect(&self, path: &mut Vec<PathChunk>, out: &mut Vec<(String, String)>) {
        for message in &self.messages {
            let mut rendered = String::new();
            write_pointer(&mut rendered, path).expect("writing to a String never fails");
            out.push((rendered, message.clone()));
        }
        for (key, child) in &self.children {
            path.push(key.clone());
            child.collect(path, out);
            path.pop();
        }
    }
}

/// A scoped handle into a shared exception tree.
#[derive(Clone, Debug)]
pub struct Exception {
    header: Rc<str>,
    shared: Rc<RefCell<ExceptionNode>>,
    path: Vec<PathChunk>,
}

impl Exception {
    /// Create a fresh collector with the given header line.
    pub fn new(header: &str) -> Exception {
        Exception {
            header: header.into(),
            shared: Rc::new(RefCell::new(ExceptionNode::default())),
            path: Vec::new(),
        }
    }

    /// A child collector scoped under `key`. Nothing is allocated in the
    /// backing tree until a message is recorded through the child.
    #[must_use]
    pub fn at(&self, key: impl Into<PathChunk>) -> Exception {
        let mut path = self.path.clone();
        path.push(key.into());
        Exception {
            header: Rc::clone(&self.header),
            shared: Rc::clone(&self.shared),
            path,
        }
    }

    /// Append a message at this level.
    pub fn message(&self, text: impl Into<String>) {
        self.shared
            .borrow_mut()
            .descend_mut(&self.path)
            .messages
            .push(text.into());
    }

    /// Attach an already built sub-tree under this level.
    pub fn push(&self, child: &Exception) {
        // Clone the subtree before touching our own tree: the child handle
        // may be scoped into the same backing storage.
        let subtree = {
            let child_tree = child.shared.borrow();
            match child_tree.descend(&child.path) {
                Some(node) if node.has_messages() => Some(node.clone()),
                _ => None,
            }
        };
        if let Some(node) = subtree {
            self.shared
                .borrow_mut()
                .descend_mut(&self.path)
                .merge(&node);
        }
    }

    /// True iff any descendant of this level carries a message.
    pub fn has_exception(&self) -> bool {
        self.shared
            .borrow()
            .descend(&self.path)
            .map_or(false, ExceptionNode::has_messages)
    }

    /// All `(path, message)` pairs below this level, in path order. The path
    /// is rendered relative to the collector root.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(node) = self.shared.borrow().descend(&self.path) {
            node.collect(&mut self.path.clone(), &mut out);
        }
        out
    }

    /// The pointer of this handle within the tree, e.g. `/components/schemas`.
    pub fn pointer(&self) -> String {
        let mut rendered = String::new();
        write_pointer(&mut rendered, &self.path).expect("writing to a String never fails");
        rendered
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.header)?;
        for (path, message) in self.entries() {
            if path.is_empty() {
                writeln!(f, "  {}", message)?;
            } else {
                writeln!(f, "  at {}: {}", path, message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Exception;

    #[test]
    fn at_is_lazy() {
        let exception = Exception::new("One or more errors exist");
        let _child = exception.at("paths").at("users").at("get");
        assert!(!exception.has_exception());
        assert!(exception.entries().is_empty());
    }

    #[test]
    fn message_materializes_path() {
        let exception = Exception::new("One or more errors exist");
        exception
            .at("paths")
            .at("users")
            .at("get")
            .message("Missing required property: responses");
        assert!(exception.has_exception());
        let entries = exception.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "/paths/users/get");
        assert_eq!(entries[0].1, "Missing required property: responses");
    }

    #[test]
    fn scoped_has_exception() {
        let exception = Exception::new("errors");
        exception.at("a").message("boom");
        assert!(exception.at("a").has_exception());
        assert!(!exception.at("b").has_exception());
    }

    #[test]
    fn push_grafts_subtree() {
        let standalone = Exception::new("child");
        standalone.at("name").message("Value must be a string");
        let exception = Exception::new("errors");
        exception.at("schema").at("properties").push(&standalone);
        let entries = exception.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "/schema/properties/name");
    }

    #[test]
    fn push_without_messages_allocates_nothing() {
        let standalone = Exception::new("child");
        let exception = Exception::new("errors");
        exception.at("schema").push(&standalone);
        assert!(!exception.has_exception());
    }

    #[test]
    fn indexes_render_in_paths() {
        let exception = Exception::new("errors");
        exception.at("items").at(3usize).message("bad");
        assert_eq!(exception.entries()[0].0, "/items/3");
    }
}
