//! Whole-tree surgery: concatenating one sequence onto another and splitting
//! a sequence in two, both in O(log n) by grafting or detaching entire
//! subtrees at the level where the depths line up.

use std::ptr::NonNull;

use crate::alloc::NodeAlloc;
use crate::branch::move_children;
use crate::policy::MovePolicy;
use crate::{Branch, NodePtr, SeqTreeRaw, TreeError};

impl<T, P: MovePolicy<T>, A: NodeAlloc, const L: usize, const M: usize> SeqTreeRaw<T, P, A, L, M> {
    /// Exchange the contents of two sequences. Cost: O(1).
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Graft `that` (the strictly shallower tree) into this one as a single
    /// child, at the rightmost (`last`) or leftmost edge. `that` is left
    /// empty. The graft goes through the same reserve-then-split protocol as
    /// any other child insertion.
    unsafe fn insert_tree(&mut self, that: &mut Self, last: bool) -> Result<(), TreeError> {
        debug_assert!(that.depth < self.depth);
        let pos = if last { self.count - 1 } else { 0 };
        let (node, _) = self.find_node_biased(pos, that.count as isize, that.depth);
        let parent = node.parent().unwrap();
        let mut bundle = match self.reserve_branches(node) {
            Ok(b) => b,
            Err(e) => {
                self.find_node_biased(pos, -(that.count as isize), that.depth);
                return Err(e);
            }
        };
        let idx = if last { (*parent.as_ptr()).fill - 1 } else { 0 };
        let that_root = that.root.take().unwrap();
        self.add_child(parent, that_root, that.count, idx, usize::from(last), &mut bundle);
        debug_assert!(bundle.is_empty());
        that.depth = 0;
        that.count = 0;
        Ok(())
    }

    /// Append the contents of `that`, leaving `that` empty.
    ///
    /// Cost: O(log(n + m)). On failure both sequences keep their contents.
    pub fn concatenate_right(&mut self, that: &mut Self) -> Result<(), TreeError> {
        if self.count == 0 {
            self.swap(that);
            return Ok(());
        }
        if that.count == 0 {
            return Ok(());
        }
        let pos = self.count;
        // Equal depths: grow a level first so one side is strictly taller.
        // The allocation happens before anything is mutated.
        let grew = that.depth == self.depth;
        if grew {
            let nb = self.alloc_branch()?;
            unsafe {
                self.increase_depth(nb);
            }
        }
        unsafe {
            let res = if that.depth < self.depth {
                self.insert_tree(that, true)
            } else {
                // This tree is the shallower one; graft it into that from
                // the left and take the result over.
                let r = that.insert_tree(self, false);
                if r.is_ok() {
                    self.swap(that);
                }
                r
            };
            if let Err(e) = res {
                if grew {
                    // Give back the transient root level.
                    let b = self.root.unwrap().as_branch();
                    self.underflow_branch(b);
                }
                return Err(e);
            }
            // The junction may have left a thin node on either side.
            self.my_deep_sew(pos);
        }
        Ok(())
    }

    /// Prepend the contents of `that`, leaving `that` empty.
    pub fn concatenate_left(&mut self, that: &mut Self) -> Result<(), TreeError> {
        that.concatenate_right(self)?;
        self.swap(that);
        Ok(())
    }

    /// Detach child 0 (or the last child) of `b` into `that` as a whole
    /// tree of depth `dep`, unhooking its element count from every ancestor.
    unsafe fn detach_some(&mut self, that: &mut Self, b: NonNull<Branch<T, L, M>>, dep: usize, last: bool) {
        let idx = if last { (*b.as_ptr()).fill - 1 } else { 0 };
        let pos = if last { self.count - 1 } else { 0 };
        that.clear();
        let child = (*b.as_ptr()).child(idx);
        let moved = (*b.as_ptr()).nums[idx];
        self.find_node_biased(pos, -(moved as isize), dep);
        child.set_parent(None);
        that.root = Some(child);
        that.depth = dep;
        that.count = moved;
        (*b.as_ptr()).delete_children(idx, 1);
    }

    /// Move the suffix `[pos, len)` into `that` (whose old contents are
    /// cleared), keeping `[0, pos)` here.
    ///
    /// Cost: O(log n). Panics if `pos > len()`. On failure both sequences
    /// keep their contents (this one possibly restructured, never reordered).
    pub fn split_right(&mut self, that: &mut Self, pos: usize) -> Result<(), TreeError> {
        assert!(pos <= self.count, "split position out of range");
        if pos == self.count {
            that.clear();
            return Ok(());
        }
        if pos == 0 {
            that.clear();
            self.swap(that);
            return Ok(());
        }
        unsafe {
            if let Err(e) = self.split_right_inner(that, pos) {
                self.my_deep_sew(pos);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Walk from the leaf holding `pos - 1` upward, splitting every branch
    /// whose child array straddles the cut, until the cut falls on a child
    /// boundary where one side can be detached whole.
    unsafe fn split_right_inner(&mut self, that: &mut Self, pos: usize) -> Result<(), TreeError> {
        let (l, off) = self.find_leaf(pos - 1);
        let found = off + 1;
        if found != (*l.as_ptr()).fill {
            // The cut is interior to this leaf; split it first.
            let (new_leaf, mut bundle) = self.prepare_split_leaf(l)?;
            let fill = (*l.as_ptr()).fill;
            P::move_down(
                (*new_leaf.as_ptr()).elems_mut_ptr(),
                (*l.as_ptr()).elems_mut_ptr().add(found),
                fill - found,
            );
            (*new_leaf.as_ptr()).fill = fill - found;
            (*l.as_ptr()).fill = found;
            self.split(
                NodePtr::from_leaf(l),
                NodePtr::from_leaf(new_leaf),
                fill - found,
                &mut bundle,
            );
            debug_assert!(bundle.is_empty());
        }
        let mut n = NodePtr::from_leaf(l);
        let mut dep = 0;
        loop {
            // Invariant: the subtree under n ends exactly at the cut.
            let parent = n.parent().expect("split walk escaped the root");
            let idx = (*parent.as_ptr()).find_child(n);
            if idx == 0 && (*parent.as_ptr()).nums[0] == pos {
                // Child 0 is exactly the left part.
                self.detach_some(that, parent, dep, false);
                self.swap(that);
                break;
            }
            let fill = (*parent.as_ptr()).fill;
            if idx + 2 == fill && (*parent.as_ptr()).nums[fill - 1] == self.count - pos {
                // The last child is exactly the right part.
                self.detach_some(that, parent, dep, true);
                break;
            }
            if idx != fill - 1 {
                // Move everything right of n into a fresh sibling branch.
                let (new_branch, mut bundle) = self.prepare_split_branch(parent)?;
                let moved = fill - idx - 1;
                (*new_branch.as_ptr()).fill = moved;
                let num = move_children(new_branch, 0, parent, idx + 1, moved);
                (*parent.as_ptr()).fill = fill - moved;
                self.split(
                    NodePtr::from_branch(parent),
                    NodePtr::from_branch(new_branch),
                    num,
                    &mut bundle,
                );
                debug_assert!(bundle.is_empty());
            }
            n = NodePtr::from_branch(parent);
            dep += 1;
        }
        self.deep_sew(pos - 1);
        that.deep_sew(0);
        Ok(())
    }

    /// Move the prefix `[0, pos)` into `that` (whose old contents are
    /// cleared), keeping `[pos, len)` here.
    pub fn split_left(&mut self, that: &mut Self, pos: usize) -> Result<(), TreeError> {
        self.swap(that);
        let r = that.split_right(self, pos);
        if r.is_err() {
            self.swap(that);
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use crate::{Heap, SafeMoves, SeqTreeRaw};

    type SmallTree<T> = SeqTreeRaw<T, SafeMoves, Heap, 4, 4>;

    #[test]
    fn concatenate_then_split_back() {
        let mut a: SmallTree<usize> = (0..50).collect();
        let mut b: SmallTree<usize> = (50..100).collect();

        a.concatenate_right(&mut b).unwrap();
        a.check();
        b.check();
        assert!(b.is_empty());
        assert!(a.iter().copied().eq(0..100));

        a.split_right(&mut b, 50).unwrap();
        a.check();
        b.check();
        assert!(a.iter().copied().eq(0..50));
        assert!(b.iter().copied().eq(50..100));
    }

    #[test]
    fn split_at_every_position_round_trips() {
        for k in 0..=40 {
            let mut a: SmallTree<usize> = (0..40).collect();
            let mut b: SmallTree<usize> = SmallTree::new();
            a.split_right(&mut b, k).unwrap();
            a.check();
            b.check();
            assert!(a.iter().copied().eq(0..k));
            assert!(b.iter().copied().eq(k..40));

            a.concatenate_right(&mut b).unwrap();
            a.check();
            b.check();
            assert!(a.iter().copied().eq(0..40));
            assert!(b.is_empty());
        }
    }

    #[test]
    fn concatenate_left_prepends() {
        let mut a: SmallTree<u32> = (10..30).collect();
        let mut b: SmallTree<u32> = (0..10).collect();
        a.concatenate_left(&mut b).unwrap();
        a.check();
        assert!(b.is_empty());
        assert!(a.iter().copied().eq(0..30));
    }

    #[test]
    fn split_left_keeps_the_tail() {
        let mut a: SmallTree<u32> = (0..30).collect();
        let mut b: SmallTree<u32> = (90..95).collect();
        a.split_left(&mut b, 12).unwrap();
        a.check();
        b.check();
        assert!(a.iter().copied().eq(12..30));
        assert!(b.iter().copied().eq(0..12));
    }

    #[test]
    fn concatenate_mismatched_depths() {
        // A tall tree absorbing a tiny one, both ways around.
        let mut tall: SmallTree<usize> = (0..200).collect();
        let mut tiny: SmallTree<usize> = (200..203).collect();
        tall.concatenate_right(&mut tiny).unwrap();
        tall.check();
        assert!(tall.iter().copied().eq(0..203));

        let mut tiny: SmallTree<usize> = (0..3).collect();
        let mut tall2: SmallTree<usize> = (3..203).collect();
        tiny.concatenate_right(&mut tall2).unwrap();
        tiny.check();
        assert!(tiny.iter().copied().eq(0..203));
    }

    #[test]
    fn concatenate_with_empty_sides() {
        let mut a: SmallTree<u8> = SmallTree::new();
        let mut b: SmallTree<u8> = (0..20).collect();
        a.concatenate_right(&mut b).unwrap();
        assert!(a.iter().copied().eq(0..20));
        assert!(b.is_empty());

        let mut c: SmallTree<u8> = SmallTree::new();
        a.concatenate_right(&mut c).unwrap();
        assert!(a.iter().copied().eq(0..20));
    }
}
