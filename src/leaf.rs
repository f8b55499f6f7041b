//! Leaf-level primitives: run shifts inside a single leaf, and the
//! merge / balance / underflow surgery between sibling leaves.

use std::ptr::NonNull;

use crate::alloc::NodeAlloc;
use crate::policy::MovePolicy;
use crate::{Branch, Leaf, NodePtr, SeqTreeRaw};

impl<T, const L: usize, const M: usize> Leaf<T, L, M> {
    pub(crate) fn parent(&self) -> Option<NonNull<Branch<T, L, M>>> {
        self.hdr.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NonNull<Branch<T, L, M>>>) {
        self.hdr.parent = parent;
    }

    pub(crate) fn elems_ptr(&self) -> *const T {
        self.elems.as_ptr() as *const T
    }

    pub(crate) fn elems_mut_ptr(&mut self) -> *mut T {
        self.elems.as_mut_ptr() as *mut T
    }
}

impl<T, P: MovePolicy<T>, A: NodeAlloc, const L: usize, const M: usize> SeqTreeRaw<T, P, A, L, M> {
    /// Merge leaf `idx+1` of `b` into leaf `idx` if both fit in one leaf.
    /// On success the right leaf is gone and the parent may have underflowed.
    pub(crate) unsafe fn try_merge_leaves(&mut self, b: NonNull<Branch<T, L, M>>, idx: usize) -> bool {
        let l = (*b.as_ptr()).nums[idx];
        let r = (*b.as_ptr()).nums[idx + 1];
        if l + r > M {
            return false;
        }
        let left = (*b.as_ptr()).child(idx).as_leaf();
        let right = (*b.as_ptr()).child(idx + 1).as_leaf();
        P::move_down(
            (*left.as_ptr()).elems_mut_ptr().add(l),
            (*right.as_ptr()).elems_mut_ptr(),
            r,
        );
        (*left.as_ptr()).fill = l + r;
        (*b.as_ptr()).nums[idx] = l + r;
        self.delete_leaf(right);
        true
    }

    /// Even out two sibling leaves by moving elements left-to-right.
    pub(crate) unsafe fn balance_leaves_lr(&mut self, b: NonNull<Branch<T, L, M>>, idx: usize) {
        let left = (*b.as_ptr()).child(idx).as_leaf();
        let right = (*b.as_ptr()).child(idx + 1).as_leaf();
        let l = (*b.as_ptr()).nums[idx];
        let r = (*b.as_ptr()).nums[idx + 1];
        let moves = l - (r + l) / 2;
        let rp = (*right.as_ptr()).elems_mut_ptr();
        P::move_up(rp.add(moves), rp, r);
        P::move_down(rp, (*left.as_ptr()).elems_mut_ptr().add(l - moves), moves);
        (*left.as_ptr()).fill -= moves;
        (*right.as_ptr()).fill += moves;
        (*b.as_ptr()).nums[idx] -= moves;
        (*b.as_ptr()).nums[idx + 1] += moves;
    }

    /// Even out two sibling leaves by moving elements right-to-left.
    pub(crate) unsafe fn balance_leaves_rl(&mut self, b: NonNull<Branch<T, L, M>>, idx: usize) {
        let left = (*b.as_ptr()).child(idx).as_leaf();
        let right = (*b.as_ptr()).child(idx + 1).as_leaf();
        let l = (*b.as_ptr()).nums[idx];
        let r = (*b.as_ptr()).nums[idx + 1];
        let moves = r - (r + l) / 2;
        let rp = (*right.as_ptr()).elems_mut_ptr();
        P::move_down((*left.as_ptr()).elems_mut_ptr().add(l), rp, moves);
        P::move_down(rp, rp.add(moves), r - moves);
        (*left.as_ptr()).fill += moves;
        (*right.as_ptr()).fill -= moves;
        (*b.as_ptr()).nums[idx] += moves;
        (*b.as_ptr()).nums[idx + 1] -= moves;
    }

    /// Remove an (empty) leaf from the tree and free it. Underflows the
    /// parent, which may ripple all the way up.
    pub(crate) unsafe fn delete_leaf(&mut self, l: NonNull<Leaf<T, L, M>>) {
        match (*l.as_ptr()).parent() {
            Some(parent) => {
                let idx = (*parent.as_ptr()).find_child(NodePtr::from_leaf(l));
                (*parent.as_ptr()).delete_children(idx, 1);
                self.free_leaf(l);
                self.underflow_branch(parent);
            }
            None => {
                // The root leaf. Dropping it empties the whole tree.
                debug_assert_eq!(self.root, Some(NodePtr::from_leaf(l)));
                self.root = None;
                self.free_leaf(l);
            }
        }
    }

    /// Repair a leaf that may have fallen under the minimum fill. A root
    /// leaf is allowed any non-zero fill; an empty leaf is removed outright.
    pub(crate) unsafe fn underflow_leaf(&mut self, l: NonNull<Leaf<T, L, M>>) {
        if (*l.as_ptr()).fill >= M / 2 {
            return;
        }
        let parent = (*l.as_ptr()).parent();
        if (*l.as_ptr()).fill == 0 {
            self.delete_leaf(l);
        } else if let Some(parent) = parent {
            let idx = (*parent.as_ptr()).find_child(NodePtr::from_leaf(l));
            // Merging is preferred, and the left sibling is tried first.
            if idx > 0 && self.try_merge_leaves(parent, idx - 1) {
                return;
            }
            if idx < (*parent.as_ptr()).fill - 1 && self.try_merge_leaves(parent, idx) {
                return;
            }
            // Every sibling is too fat to merge with, so balancing is safe.
            if idx > 0 {
                self.balance_leaves_lr(parent, idx - 1);
            } else {
                self.balance_leaves_rl(parent, idx);
            }
        }
        // A root leaf with elements left may hold any count from 1 to M.
    }
}
