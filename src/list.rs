//! Doubly linked lists over a side table.
//!
//! Allocators usually thread their free lists through the free memory itself:
//! every free chunk starts with pointers to the previous and next free chunk.
//! We keep the same shape but move the links out of the managed memory and
//! into a table (`&mut [N]`) owned by the allocator, so links are indices
//! instead of raw pointers. Link and unlink are still O(1), and the memory we
//! hand out is never read or written by the allocator.
//!
//! ```text
//!            +------+------+------+------+------+
//!   nodes:   |  N0  |  N1  |  N2  |  N3  |  N4  |
//!            +------+------+------+------+------+
//!
//!   list:    head = 0, tail = 3, len = 3
//!
//!            head -> N0 <-> N2 <-> N3 <- tail
//!
//!   N1 and N4 are free to belong to some other list.
//! ```
//!
//! One table can host several lists (free and used, for instance) as long as
//! every node belongs to at most one of them at a time.

/// Index of a node in the side table.
pub(crate) type NodeId = usize;

/// Previous and next node of the list a node currently belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Links {
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

/// Anything stored in a side table that can be linked into a [`LinkedList`].
pub(crate) trait Linked {
    fn links(&self) -> &Links;
    fn links_mut(&mut self) -> &mut Links;
}

/// List head. Doesn't own the nodes, every operation borrows the side table
/// where the nodes live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct LinkedList {
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl LinkedList {
    /// Creates an empty linked list.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn first(&self) -> Option<NodeId> {
        self.head
    }

    #[inline]
    pub fn last(&self) -> Option<NodeId> {
        self.tail
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Links `id` as the new head.
    pub fn push_front<N: Linked>(&mut self, nodes: &mut [N], id: NodeId) {
        *nodes[id].links_mut() = Links {
            prev: None,
            next: self.head,
        };

        match self.head {
            Some(head) => nodes[head].links_mut().prev = Some(id),
            None => self.tail = Some(id),
        }

        self.head = Some(id);
        self.len += 1;
    }

    /// Links `id` as the new tail.
    pub fn push_back<N: Linked>(&mut self, nodes: &mut [N], id: NodeId) {
        *nodes[id].links_mut() = Links {
            prev: self.tail,
            next: None,
        };

        match self.tail {
            Some(tail) => nodes[tail].links_mut().next = Some(id),
            None => self.head = Some(id),
        }

        self.tail = Some(id);
        self.len += 1;
    }

    /// Links `id` right after `node`, which must already be in this list.
    pub fn insert_after<N: Linked>(&mut self, nodes: &mut [N], node: NodeId, id: NodeId) {
        let next = nodes[node].links().next;

        *nodes[id].links_mut() = Links {
            prev: Some(node),
            next,
        };
        nodes[node].links_mut().next = Some(id);

        match next {
            Some(next) => nodes[next].links_mut().prev = Some(id),
            None => self.tail = Some(id),
        }

        self.len += 1;
    }

    /// Links `id` right before `node`, which must already be in this list.
    pub fn insert_before<N: Linked>(&mut self, nodes: &mut [N], node: NodeId, id: NodeId) {
        match nodes[node].links().prev {
            Some(prev) => self.insert_after(nodes, prev, id),
            None => self.push_front(nodes, id),
        }
    }

    /// Unlinks `id`, which must be in this list. Its links are cleared.
    pub fn remove<N: Linked>(&mut self, nodes: &mut [N], id: NodeId) {
        let Links { prev, next } = *nodes[id].links();

        match prev {
            Some(prev) => nodes[prev].links_mut().next = next,
            None => {
                debug_assert_eq!(self.head, Some(id), "node {id} is not linked here");
                self.head = next;
            }
        }

        match next {
            Some(next) => nodes[next].links_mut().prev = prev,
            None => {
                debug_assert_eq!(self.tail, Some(id), "node {id} is not linked here");
                self.tail = prev;
            }
        }

        *nodes[id].links_mut() = Links::default();
        self.len -= 1;
    }

    /// Unlinks and returns the head, if any.
    pub fn pop_front<N: Linked>(&mut self, nodes: &mut [N]) -> Option<NodeId> {
        let head = self.head?;
        self.remove(nodes, head);
        Some(head)
    }

    /// Iterates node ids from head to tail.
    pub fn iter<'a, N: Linked>(&self, nodes: &'a [N]) -> Iter<'a, N> {
        Iter {
            current: self.head,
            nodes,
        }
    }
}

/// See [`LinkedList::iter`].
pub(crate) struct Iter<'a, N> {
    current: Option<NodeId>,
    nodes: &'a [N],
}

impl<'a, N: Linked> Iterator for Iter<'a, N> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.nodes[current].links().next;
        Some(current)
    }
}
