//! The mutation engine: positional descent, the reserve-then-split protocol,
//! the underflow repair passes, and the single / short-run insert and erase
//! paths. Bulk operations live in `range.rs` and build on these.

use std::ptr::NonNull;

use crate::alloc::NodeAlloc;
use crate::policy::{fill_elements, MovePolicy};
use crate::{Branch, Leaf, NodePtr, SeqTreeRaw, TreeError};

/// Fresh branches reserved up front for a split chain, threaded into a list
/// through their (otherwise unused) parent slots. A split consumes exactly
/// the branches that were reserved for it.
pub(crate) struct BranchBundle<T, const L: usize, const M: usize> {
    head: Option<NonNull<Branch<T, L, M>>>,
}

impl<T, const L: usize, const M: usize> BranchBundle<T, L, M> {
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) unsafe fn pop(&mut self) -> NonNull<Branch<T, L, M>> {
        let b = self.head.expect("split consumed more branches than were reserved");
        self.head = (*b.as_ptr()).parent();
        (*b.as_ptr()).set_parent(None);
        b
    }
}

impl<T, P: MovePolicy<T>, A: NodeAlloc, const L: usize, const M: usize> SeqTreeRaw<T, P, A, L, M> {
    /// Locate the leaf holding position `pos` and the offset inside it.
    /// Requires a non-empty tree and `pos < count` (`pos == count` resolves
    /// to one past the last leaf's run only when the last leaf has room, so
    /// callers use `pos - 1` tricks instead).
    pub(crate) unsafe fn find_leaf(&self, mut pos: usize) -> (NonNull<Leaf<T, L, M>>, usize) {
        let mut node = self.root.expect("descent into an empty tree");
        for _ in 0..self.depth {
            let b = node.as_branch().as_ptr();
            let mut k = 0;
            while pos >= (*b).nums[k] {
                pos -= (*b).nums[k];
                k += 1;
            }
            node = (*b).child(k);
        }
        (node.as_leaf(), pos)
    }

    /// Like [`find_leaf`](Self::find_leaf), but adds `delta` to every subtree
    /// count on the way down (and to the tree count), folding the counter
    /// update into the locate pass. A failed operation undoes the bias by
    /// descending again with `-delta`.
    ///
    /// With `depth_lim > 0` the descent stops that many levels above the
    /// leaves and returns the node reached there; this is how whole subtrees
    /// are attached and detached.
    pub(crate) unsafe fn find_node_biased(
        &mut self,
        mut pos: usize,
        delta: isize,
        depth_lim: usize,
    ) -> (NodePtr<T, L, M>, usize) {
        let mut node = self.root.expect("descent into an empty tree");
        for _ in 0..self.depth - depth_lim {
            let b = node.as_branch().as_ptr();
            let mut k = 0;
            while pos >= (*b).nums[k] {
                pos -= (*b).nums[k];
                k += 1;
            }
            (*b).nums[k] = (*b).nums[k].wrapping_add_signed(delta);
            node = (*b).child(k);
        }
        self.count = self.count.wrapping_add_signed(delta);
        (node, pos)
    }

    /// Give an empty tree its first (empty) leaf.
    pub(crate) fn init_tree(&mut self) -> Result<NonNull<Leaf<T, L, M>>, TreeError> {
        debug_assert!(self.root.is_none() && self.count == 0);
        let l = self.alloc_leaf()?;
        self.root = Some(NodePtr::from_leaf(l));
        self.depth = 0;
        Ok(l)
    }

    /// Put a fresh branch above the current root, holding it as the single
    /// child. The caller is about to add a second child.
    pub(crate) unsafe fn increase_depth(&mut self, new_branch: NonNull<Branch<T, L, M>>) {
        let root = self.root.expect("cannot grow an empty tree");
        (*new_branch.as_ptr()).fill = 1;
        (*new_branch.as_ptr()).set_child(0, root, self.count);
        root.set_parent(Some(new_branch));
        self.root = Some(NodePtr::from_branch(new_branch));
        self.depth += 1;
    }

    /// Reserve every branch a split starting at `existing` could need: one
    /// per full ancestor, plus one for a new root if the chain reaches the
    /// top. Nothing in the tree is touched; if an allocation fails the
    /// already-reserved branches are returned and the error propagates.
    pub(crate) unsafe fn reserve_branches(
        &mut self,
        existing: NodePtr<T, L, M>,
    ) -> Result<BranchBundle<T, L, M>, TreeError> {
        let mut bundle = BranchBundle { head: None };
        let mut parent = existing.parent();
        loop {
            let needs_one = match parent {
                None => true,
                Some(p) => (*p.as_ptr()).fill == L,
            };
            if needs_one {
                match self.alloc_branch() {
                    Ok(nb) => {
                        (*nb.as_ptr()).set_parent(bundle.head);
                        bundle.head = Some(nb);
                    }
                    Err(e) => {
                        self.free_bundle(bundle);
                        return Err(e);
                    }
                }
            }
            match parent {
                None => break,
                Some(p) if (*p.as_ptr()).fill < L => break,
                Some(p) => parent = (*p.as_ptr()).parent(),
            }
        }
        Ok(bundle)
    }

    pub(crate) unsafe fn free_bundle(&mut self, mut bundle: BranchBundle<T, L, M>) {
        while !bundle.is_empty() {
            let b = bundle.pop();
            self.free_branch(b);
        }
    }

    /// Allocate a fresh right-sibling leaf plus the whole branch chain its
    /// split might need, before anything is mutated.
    pub(crate) unsafe fn prepare_split_leaf(
        &mut self,
        existing: NonNull<Leaf<T, L, M>>,
    ) -> Result<(NonNull<Leaf<T, L, M>>, BranchBundle<T, L, M>), TreeError> {
        let result = self.alloc_leaf()?;
        match self.reserve_branches(NodePtr::from_leaf(existing)) {
            Ok(bundle) => Ok((result, bundle)),
            Err(e) => {
                self.free_leaf(result);
                Err(e)
            }
        }
    }

    /// As [`prepare_split_leaf`](Self::prepare_split_leaf), for a branch.
    pub(crate) unsafe fn prepare_split_branch(
        &mut self,
        existing: NonNull<Branch<T, L, M>>,
    ) -> Result<(NonNull<Branch<T, L, M>>, BranchBundle<T, L, M>), TreeError> {
        let result = self.alloc_branch()?;
        match self.reserve_branches(NodePtr::from_branch(existing)) {
            Ok(bundle) => Ok((result, bundle)),
            Err(e) => {
                self.free_branch(result);
                Err(e)
            }
        }
    }

    /// Hang `right` (holding `right_count` elements) next to `existing` in
    /// the parent, growing a new root first if `existing` is the root. All
    /// branches the chain needs must already sit in `bundle`.
    pub(crate) unsafe fn split(
        &mut self,
        existing: NodePtr<T, L, M>,
        right: NodePtr<T, L, M>,
        right_count: usize,
        bundle: &mut BranchBundle<T, L, M>,
    ) {
        let parent = match existing.parent() {
            Some(p) => p,
            None => {
                let nb = bundle.pop();
                self.increase_depth(nb);
                existing.parent().unwrap()
            }
        };
        let k = (*parent.as_ptr()).find_child(existing);
        self.add_child(parent, right, right_count, k, 1, bundle);
    }

    /// Insert `inserted` next to the child at slot `pos` of `parent` - after
    /// it when `rl == 1`, before it when `rl == 0` - crediting `count`
    /// elements to the new slot and debiting them from the existing child's
    /// slot. If the parent is full it is split ⌈L/2⌉:⌊L/2⌋ first and the
    /// insertion is redirected into whichever half now owns the slot; the
    /// split then propagates upward through the same path.
    pub(crate) unsafe fn add_child(
        &mut self,
        parent: NonNull<Branch<T, L, M>>,
        inserted: NodePtr<T, L, M>,
        count: usize,
        mut pos: usize,
        rl: usize,
        bundle: &mut BranchBundle<T, L, M>,
    ) {
        let mut new_branch = None;
        let mut num = 0;
        let mut branch_to_insert = parent;
        if (*parent.as_ptr()).fill == L {
            let nb = bundle.pop();
            num = crate::branch::move_children(nb, 0, parent, L - L / 2, L / 2);
            (*parent.as_ptr()).fill = L - L / 2;
            (*nb.as_ptr()).fill = L / 2;
            if pos >= L - L / 2 {
                branch_to_insert = nb;
                pos -= L - L / 2;
            }
            new_branch = Some(nb);
        }
        inserted.set_parent(Some(branch_to_insert));
        (*branch_to_insert.as_ptr()).insert_children(pos + rl, 1);
        (*branch_to_insert.as_ptr()).set_child(pos + rl, inserted, count);
        (*branch_to_insert.as_ptr()).nums[pos + 1 - rl] -= count;
        if let Some(nb) = new_branch {
            self.split(NodePtr::from_branch(parent), NodePtr::from_branch(nb), num, bundle);
        }
    }

    /// Underflow every thin node on the path to `pos`, restarting from the
    /// root whenever a repair changes the tree depth. Used after bulk
    /// mutations, which can leave thin nodes anywhere along a seam.
    pub(crate) unsafe fn deep_sew(&mut self, pos: usize) {
        let mut node = self.root.expect("sewing an empty tree");
        let mut dep = self.depth;
        let mut cur = pos;
        loop {
            if dep == 0 {
                let l = node.as_leaf();
                if self.depth > 0 && (*l.as_ptr()).fill < M / 2 {
                    self.underflow_leaf(l);
                }
                return;
            }
            let b = node.as_branch();
            if (*b.as_ptr()).fill == 1 {
                // Repairing this may reduce the depth; re-run from the top.
                self.underflow_branch(b);
                node = self.root.unwrap();
                dep = self.depth;
                cur = pos;
            } else {
                let bp = b.as_ptr();
                let mut j = 0;
                while cur >= (*bp).nums[j] {
                    cur -= (*bp).nums[j];
                    j += 1;
                }
                node = (*bp).child(j);
                dep -= 1;
                if (*bp).parent().is_some() && (*bp).fill < L / 2 {
                    self.underflow_branch(b);
                }
            }
        }
    }

    /// Sew on both sides of a seam at `pos`.
    pub(crate) unsafe fn my_deep_sew(&mut self, pos: usize) {
        if pos != 0 {
            self.deep_sew(pos - 1);
        }
        if pos != self.count {
            self.deep_sew(pos);
        }
    }

    /// Repair the seam after a bulk insert: `last_leaf` is the leaf ending
    /// the inserted run, `pos` the first position after it. Narrow cases are
    /// handled with local merges; the general case falls back to deep sewing.
    pub(crate) unsafe fn advanced_sew_together(&mut self, last_leaf: NonNull<Leaf<T, L, M>>, pos: usize) {
        let parent = (*last_leaf.as_ptr()).parent();
        if pos == self.count {
            self.underflow_leaf(last_leaf);
            return;
        }
        if let Some(p) = parent {
            let j = (*p.as_ptr()).find_child(NodePtr::from_leaf(last_leaf));
            if j != (*p.as_ptr()).fill - 1 {
                if self.try_merge_leaves(p, j) {
                    // Both seam leaves were small; the merged one may still be.
                    self.underflow_leaf(last_leaf);
                } else if (*last_leaf.as_ptr()).fill < M / 2 {
                    self.underflow_leaf(last_leaf);
                } else {
                    let right = (*p.as_ptr()).child(j + 1).as_leaf();
                    self.underflow_leaf(right);
                }
                return;
            }
        }
        self.my_deep_sew(pos);
    }

    /// Insert a run of at most M/2 elements at `pos`: bias the counts on the
    /// way down, pre-split the target leaf once if it cannot take the run,
    /// shift, then construct the elements into the hole. Any failure rolls
    /// all of it back.
    pub(crate) unsafe fn insert_small<S>(
        &mut self,
        pos: usize,
        src: &mut S,
        num: usize,
    ) -> Result<(), TreeError>
    where
        S: Iterator<Item = Result<T, TreeError>>,
    {
        debug_assert!(num >= 1 && num <= M / 2);
        if self.count == 0 {
            self.init_tree()?;
        }
        // Stick left: target the leaf owning pos-1, so appends land in the
        // leaf that already holds the preceding element.
        let delta = usize::from(pos != 0);
        let (node, found) = self.find_node_biased(pos - delta, num as isize, 0);
        let mut found = found + delta;
        let mut l = node.as_leaf();
        let fill = (*l.as_ptr()).fill;
        let mut other_half = None;
        let mut place_of_splitting = pos;
        let mut inserted_right = false;
        if fill + num > M {
            let old_leaf = fill - fill / 2;
            place_of_splitting = pos - found + old_leaf;
            let (new_leaf, mut bundle) = match self.prepare_split_leaf(l) {
                Ok(x) => x,
                Err(e) => {
                    self.find_node_biased(pos - delta, -(num as isize), 0);
                    return Err(e);
                }
            };
            let mut leaf_to_ins = l;
            let mut addition = 0;
            other_half = Some(new_leaf);
            (*new_leaf.as_ptr()).fill = fill - old_leaf;
            if found > old_leaf {
                // The hole lands in the right half; credit the pending run
                // to that side of the split.
                leaf_to_ins = new_leaf;
                found -= old_leaf;
                addition = num;
                other_half = Some(l);
                inserted_right = true;
            }
            let right_count = (*new_leaf.as_ptr()).fill + addition;
            self.split(NodePtr::from_leaf(l), NodePtr::from_leaf(new_leaf), right_count, &mut bundle);
            debug_assert!(bundle.is_empty());
            P::move_down(
                (*new_leaf.as_ptr()).elems_mut_ptr(),
                (*l.as_ptr()).elems_mut_ptr().add(old_leaf),
                fill - old_leaf,
            );
            (*l.as_ptr()).fill = old_leaf;
            l = leaf_to_ins;
        }
        let elems = (*l.as_ptr()).elems_mut_ptr();
        let lfill = (*l.as_ptr()).fill;
        P::move_up(elems.add(found + num), elems.add(found), lfill - found);
        // While the hole is open the fill stops at its left edge, so an
        // unwinding element constructor can at worst leak the shifted tail.
        (*l.as_ptr()).fill = found;
        match fill_elements::<T, P, S>(elems.add(found), num, src) {
            Ok(k) if k == num => {
                (*l.as_ptr()).fill = lfill + num;
            }
            Ok(k) => {
                // The source advertised more than it delivered. Keep the k
                // elements we got, close the gap, give back the unused bias.
                P::move_down(elems.add(found + k), elems.add(found + num), lfill - found);
                (*l.as_ptr()).fill = lfill + k;
                self.find_node_biased(pos - delta, -((num - k) as isize), 0);
                if self.count == 0 {
                    self.underflow_leaf(l);
                } else {
                    // Sew at the seam between the leaves the run touched; a
                    // split boundary left of the run has shifted by k.
                    let seam = match other_half {
                        None => pos + k,
                        Some(_) if inserted_right => place_of_splitting,
                        Some(_) => place_of_splitting + k,
                    };
                    self.my_deep_sew(seam);
                }
                return Ok(());
            }
            Err(e) => {
                P::move_down(elems.add(found), elems.add(found + num), lfill - found);
                (*l.as_ptr()).fill = lfill;
                self.find_node_biased(pos - delta, -(num as isize), 0);
                self.underflow_leaf(l);
                self.my_deep_sew(place_of_splitting);
                return Err(e);
            }
        }
        if let Some(other) = other_half {
            self.underflow_leaf(other);
        }
        Ok(())
    }

    /// Insert one element at `pos`.
    ///
    /// Cost: O(log n). Fails only if the node allocator does; the sequence
    /// is unchanged on failure.
    ///
    /// Panics if `pos > len()`.
    pub fn insert(&mut self, pos: usize, value: T) -> Result<(), TreeError> {
        assert!(pos <= self.count, "insert position out of range");
        unsafe { self.insert_small(pos, &mut std::iter::once(Ok(value)), 1) }
    }

    /// Remove and return the element at `pos`.
    ///
    /// Cost: O(log n). Panics if `pos >= len()`.
    pub fn remove(&mut self, pos: usize) -> T {
        assert!(pos < self.count, "remove position out of range");
        unsafe {
            let (node, off) = self.find_node_biased(pos, -1, 0);
            let l = node.as_leaf();
            let elems = (*l.as_ptr()).elems_mut_ptr();
            let value = elems.add(off).read();
            let fill = (*l.as_ptr()).fill;
            P::move_down(elems.add(off), elems.add(off + 1), fill - off - 1);
            (*l.as_ptr()).fill = fill - 1;
            self.underflow_leaf(l);
            value
        }
    }

    /// Append an element. Cost: O(log n).
    pub fn push_back(&mut self, value: T) -> Result<(), TreeError> {
        self.insert(self.count, value)
    }

    /// Prepend an element. Cost: O(log n).
    pub fn push_front(&mut self, value: T) -> Result<(), TreeError> {
        self.insert(0, value)
    }

    /// Remove and return the last element. Cost: O(log n).
    pub fn pop_back(&mut self) -> Option<T> {
        if self.count == 0 {
            None
        } else {
            Some(self.remove(self.count - 1))
        }
    }

    /// Remove and return the first element. Cost: O(log n).
    pub fn pop_front(&mut self) -> Option<T> {
        if self.count == 0 {
            None
        } else {
            Some(self.remove(0))
        }
    }
}
