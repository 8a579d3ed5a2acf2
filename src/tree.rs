//! The flat syntax tree produced by a match.
//!
//! Nodes live in one vector and reference each other through 32-bit
//! [NodeId]s; the children of a sequence are stored as a range into one shared
//! child array. Once a match returns the tree is immutable and its node ids
//! are stable.

use crate::{Code, ParsingError};
use ptree::TreeItem;
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// Index of a node in the [Tree]'s node store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the syntax tree.
///
/// Every node carries the byte span `[start, end)` of the input fragment it
/// covers. Name, label and message fields are ids into the tree's string
/// table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    /// A literal fragment of the input.
    String { start: usize, end: usize },
    /// An ordered list of child nodes, stored as a range into the shared
    /// child array.
    Sequence {
        start: usize,
        end: usize,
        children: (u32, u32),
    },
    /// A single child wrapped with the name of the rule or capture that
    /// produced it.
    Named {
        name: usize,
        child: NodeId,
        start: usize,
        end: usize,
    },
    /// The result of a recovery rule: the failed label, an optional bound
    /// message and the subtree parsed by the recovery expression.
    Error {
        label: usize,
        message: usize,
        child: Option<NodeId>,
        start: usize,
        end: usize,
    },
}

/// A flat node store with a shared child array.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    children: Vec<NodeId>,
    root: Option<NodeId>,
    strings: Rc<Vec<String>>,
}

impl Tree {
    pub(crate) fn new(strings: Rc<Vec<String>>) -> Self {
        Self {
            nodes: Vec::new(),
            children: Vec::new(),
            root: None,
            strings,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.nodes.clear();
        self.children.clear();
        self.root = None;
    }

    pub(crate) fn set_strings(&mut self, strings: Rc<Vec<String>>) {
        self.strings = strings;
    }

    pub(crate) fn push_string(&mut self, start: usize, end: usize) -> NodeId {
        self.push(TreeNode::String { start, end })
    }

    pub(crate) fn push_sequence(&mut self, start: usize, end: usize, kids: &[NodeId]) -> NodeId {
        let first = self.children.len() as u32;
        self.children.extend_from_slice(kids);
        let last = self.children.len() as u32;
        self.push(TreeNode::Sequence {
            start,
            end,
            children: (first, last),
        })
    }

    pub(crate) fn push_named(
        &mut self,
        name: usize,
        child: NodeId,
        start: usize,
        end: usize,
    ) -> NodeId {
        self.push(TreeNode::Named {
            name,
            child,
            start,
            end,
        })
    }

    pub(crate) fn push_error(
        &mut self,
        label: usize,
        message: usize,
        child: Option<NodeId>,
        start: usize,
        end: usize,
    ) -> NodeId {
        self.push(TreeNode::Error {
            label,
            message,
            child,
            start,
            end,
        })
    }

    pub(crate) fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    fn push(&mut self, node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn get(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.index()]
    }

    /// Byte span `[start, end)` covered by a node.
    pub fn span(&self, id: NodeId) -> (usize, usize) {
        match *self.get(id) {
            TreeNode::String { start, end }
            | TreeNode::Sequence { start, end, .. }
            | TreeNode::Named { start, end, .. }
            | TreeNode::Error { start, end, .. } => (start, end),
        }
    }

    /// Direct children of a node, in input order.
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        match *self.get(id) {
            TreeNode::String { .. } => Vec::new(),
            TreeNode::Sequence {
                children: (first, last),
                ..
            } => self.children[first as usize..last as usize].to_vec(),
            TreeNode::Named { child, .. } => vec![child],
            TreeNode::Error { child, .. } => child.into_iter().collect(),
        }
    }

    /// Name of a named node, or the label of an error node.
    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        match *self.get(id) {
            TreeNode::Named { name, .. } => Some(&self.strings[name]),
            TreeNode::Error { label, .. } => Some(&self.strings[label]),
            _ => None,
        }
    }

    /// The input fragment covered by a node.
    pub fn text<'c>(&self, code: &Code<'c>, id: NodeId) -> Cow<'c, str> {
        let (start, end) = self.span(id);
        String::from_utf8_lossy(&code.value[start..end])
    }

    /// Find the first node below `id` (inclusive, pre-order) accepted by the
    /// predicate.
    pub fn find<P: Fn(&TreeNode) -> bool>(&self, id: NodeId, accept: &P) -> Option<NodeId> {
        if accept(self.get(id)) {
            return Some(id);
        }
        self.children_of(id)
            .into_iter()
            .find_map(|child| self.find(child, accept))
    }

    /// Find the first named node carrying the given name, searching from the
    /// root through all nested children.
    pub fn find_named(&self, name: &str) -> Option<NodeId> {
        let root = self.root?;
        self.find(root, &|node| match node {
            TreeNode::Named { name: id, .. } => self.strings[*id] == name,
            _ => false,
        })
    }

    /// All error nodes reachable from the root, in input order.
    pub fn errors(&self) -> Vec<NodeId> {
        let mut found = Vec::new();
        if let Some(root) = self.root {
            self.walk(root, &mut |tree, id| {
                if matches!(tree.get(id), TreeNode::Error { .. }) {
                    found.push(id);
                }
            });
        }
        found
    }

    /// Render every recovered error node as a diagnostic.
    pub fn diagnostics(&self) -> Vec<ParsingError> {
        self.errors()
            .iter()
            .map(|&id| match *self.get(id) {
                TreeNode::Error {
                    label,
                    message,
                    start,
                    end,
                    ..
                } => {
                    let label = self.strings[label].clone();
                    let message = if message == 0 {
                        format!("Unexpected input for '{}'.", label)
                    } else {
                        self.strings[message].clone()
                    };
                    ParsingError::new(label, message, start, end)
                }
                _ => unreachable!("errors() only returns error nodes"),
            })
            .collect()
    }

    fn walk<F: FnMut(&Self, NodeId)>(&self, id: NodeId, visit: &mut F) {
        visit(self, id);
        for child in self.children_of(id) {
            self.walk(child, visit);
        }
    }

    /// Print the tree to stdout.
    pub fn print(&self) -> Result<(), std::io::Error> {
        match self.root {
            Some(root) => ptree::print_tree(&TreeView { tree: self, id: root }),
            None => Ok(()),
        }
    }
}

/// A borrowed view of one node, used for pretty printing.
#[derive(Clone)]
pub struct TreeView<'t> {
    tree: &'t Tree,
    id: NodeId,
}

impl<'t> TreeItem for TreeView<'t> {
    type Child = Self;

    fn write_self<W: std::io::Write>(&self, f: &mut W, _: &ptree::Style) -> std::io::Result<()> {
        let (start, end) = self.tree.span(self.id);
        match self.tree.get(self.id) {
            TreeNode::String { .. } => write!(f, "\"\" # {}-{}", start, end),
            TreeNode::Sequence { .. } => write!(f, "() # {}-{}", start, end),
            TreeNode::Named { name, .. } => {
                write!(f, "{} # {}-{}", self.tree.strings[*name], start, end)
            }
            TreeNode::Error { label, .. } => {
                write!(f, "error[{}] # {}-{}", self.tree.strings[*label], start, end)
            }
        }
    }

    fn children(&self) -> Cow<[Self::Child]> {
        // Named nodes print their span on the name line, so a plain string
        // child adds nothing and an intermediate sequence is flattened away.
        let direct = match *self.tree.get(self.id) {
            TreeNode::Named { child, .. } => match *self.tree.get(child) {
                TreeNode::Sequence { .. } => self.tree.children_of(child),
                TreeNode::String { .. } => Vec::new(),
                _ => vec![child],
            },
            _ => self.tree.children_of(self.id),
        };
        Cow::from(
            direct
                .into_iter()
                .map(|id| TreeView {
                    tree: self.tree,
                    id,
                })
                .collect::<Vec<_>>(),
        )
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.root {
            Some(root) => self.fmt_node(f, root),
            None => Ok(()),
        }
    }
}

impl Tree {
    fn fmt_node(&self, f: &mut Formatter<'_>, id: NodeId) -> std::fmt::Result {
        let (start, end) = self.span(id);
        match self.get(id) {
            TreeNode::String { .. } => write!(f, "\"{}-{}\"", start, end),
            TreeNode::Sequence { .. } => {
                write!(f, "(")?;
                for (index, child) in self.children_of(id).into_iter().enumerate() {
                    if index > 0 {
                        write!(f, " ")?;
                    }
                    self.fmt_node(f, child)?;
                }
                write!(f, ")")
            }
            TreeNode::Named { name, child, .. } => {
                write!(f, "{}{{", self.strings[*name])?;
                self.fmt_node(f, *child)?;
                write!(f, "}}")
            }
            TreeNode::Error { label, child, .. } => {
                write!(f, "error[{}]{{", self.strings[*label])?;
                if let Some(child) = child {
                    self.fmt_node(f, *child)?;
                }
                write!(f, "}}")
            }
        }
    }
}
