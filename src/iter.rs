use crate::ast::{FieldMatch, Node};

/// A cursor over an ordered sequence of sibling nodes.
///
/// The cursor starts *before* the first element, so the first call to
/// [`NodeIterator::advance`] lands on index 0.
///
/// ```
/// use macrojsp::{Node, NodeIterator};
///
/// let nodes = vec![Node::path("a"), Node::operand("=="), Node::null()];
/// let mut it = NodeIterator::new(&nodes);
/// assert!(it.advance(1));
/// assert!(it.find(Some("Literal"), None, Some(2)).is_none());
/// assert!(it.find(Some("Literal"), None, None).is_some());
/// ```
#[derive(Debug, Clone)]
pub struct NodeIterator<'a> {
    nodes: &'a [Node],
    index: isize,
}

impl<'a> NodeIterator<'a> {
    pub fn new(nodes: &'a [Node]) -> Self {
        Self { nodes, index: -1 }
    }

    /// Iterates the children of a container node.
    pub fn over(node: &'a Node) -> Self {
        Self::new(node.children())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub const fn index(&self) -> isize {
        self.index
    }

    fn valid(&self, index: isize) -> bool {
        usize::try_from(index).is_ok_and(|index| index < self.nodes.len())
    }

    fn at(&self, index: Option<isize>) -> Option<&'a Node> {
        index
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| self.nodes.get(index))
    }

    /// Moves to `index`, returning whether it names an element.
    pub fn seek(&mut self, index: isize) -> bool {
        self.index = index;
        self.valid(index)
    }

    /// Moves forward by `step` (which may be negative). An overflowing step
    /// leaves the cursor where it was.
    pub fn advance(&mut self, step: isize) -> bool {
        match self.index.checked_add(step) {
            Some(index) => self.seek(index),
            None => false,
        }
    }

    pub fn current(&self) -> Option<&'a Node> {
        self.at(Some(self.index))
    }

    pub fn previous(&self) -> Option<&'a Node> {
        self.at(self.index.checked_sub(1))
    }

    pub fn next_node(&self) -> Option<&'a Node> {
        self.at(self.index.checked_add(1))
    }

    pub fn peek(&self, offset: isize) -> Option<&'a Node> {
        self.at(self.index.checked_add(offset))
    }

    /// Linear forward scan starting at the current element (inclusive).
    ///
    /// `max_steps` bounds how many elements are visited, `None` scans to the
    /// end. The cursor itself does not move.
    pub fn find_index(
        &self,
        type_name: Option<&str>,
        fields: Option<&FieldMatch>,
        max_steps: Option<usize>,
    ) -> Option<usize> {
        let start = usize::try_from(self.index).unwrap_or(0);
        let budget = max_steps.unwrap_or(usize::MAX);
        self.nodes
            .iter()
            .enumerate()
            .skip(start)
            .take(budget)
            .find(|(_, node)| node.is(type_name, fields))
            .map(|(index, _)| index)
    }

    pub fn find(
        &self,
        type_name: Option<&str>,
        fields: Option<&FieldMatch>,
        max_steps: Option<usize>,
    ) -> Option<&'a Node> {
        self.find_index(type_name, fields, max_steps)
            .and_then(|index| self.nodes.get(index))
    }
}
