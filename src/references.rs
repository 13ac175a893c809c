//! Reverse reference index.
//!
//! Answering "who references this object" requires looking at every object on the heap. The
//! [`ReferenceIndex`] does that once and keeps, for every referenced address, a singly linked
//! list of the objects pointing at it. Lists live in one arena; each node points at a parent
//! record and the next node of the same list, so building the index allocates three flat
//! vectors and a map of list heads.
//!
//! The index is a snapshot. It is not updated when the target changes; rebuild it through
//! [`HeapSession::build_reference_index`](crate::session::HeapSession::build_reference_index).

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{runtime::RuntimeTypeRc, session::HeapSession, Error, Result};

/// An object holding at least one reference to an indexed address.
#[derive(Clone, Debug)]
pub struct Parent {
    /// Address of the referencing object
    pub address: u64,
    /// Runtime type of the referencing object
    pub ty: RuntimeTypeRc,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    parent: usize,
    next: Option<usize>,
}

/// Map from child address to the objects referencing it.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    heads: HashMap<u64, usize>,
    nodes: Vec<Node>,
    parents: Vec<Parent>,
}

impl ReferenceIndex {
    /// Scan every object of the session's heap.
    ///
    /// ## Arguments
    /// * 'session' - Session whose heap is scanned
    /// * 'cancel'  - Checked before every object; when set the scan stops
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if `cancel` was set, or the first read error raised while
    /// enumerating an object's references.
    pub fn build(session: &HeapSession, cancel: Option<&AtomicBool>) -> Result<Self> {
        let mut index = ReferenceIndex::default();

        for object in session.objects() {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(Error::Cancelled);
            }

            let mut children = object.reference_addresses()?;
            if children.is_empty() {
                continue;
            }
            children.sort_unstable();
            children.dedup();

            let parent = index.parents.len();
            index.parents.push(Parent {
                address: object.address(),
                ty: object.runtime_type().clone(),
            });

            for child in children {
                index.link(child, parent);
            }
        }

        log::debug!(
            "Reference index built: {} parents, {} edges, {} referenced objects",
            index.parents.len(),
            index.nodes.len(),
            index.heads.len()
        );

        Ok(index)
    }

    fn link(&mut self, child: u64, parent: usize) {
        let node = self.nodes.len();
        let next = self.heads.insert(child, node);
        self.nodes.push(Node { parent, next });
    }

    /// Objects referencing `address`, most recently scanned first
    pub fn parents_of(&self, address: u64) -> Parents<'_> {
        Parents {
            index: self,
            cursor: self.heads.get(&address).copied(),
        }
    }

    /// Returns true if at least one object references `address`
    #[must_use]
    pub fn is_referenced(&self, address: u64) -> bool {
        self.heads.contains_key(&address)
    }

    /// Number of distinct referenced addresses
    #[must_use]
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    /// Returns true if no references were found
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Total number of parent-child edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Iterator over the parents of one address.
///
/// Created by [`ReferenceIndex::parents_of`].
pub struct Parents<'a> {
    index: &'a ReferenceIndex,
    cursor: Option<usize>,
}

impl<'a> Iterator for Parents<'a> {
    type Item = &'a Parent;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.index.nodes.get(self.cursor?)?;
        self.cursor = node.next;
        self.index.parents.get(node.parent)
    }
}
