//! Branch-level primitives: slot shifts in the child arrays, moving children
//! between branches, and the merge / balance / underflow surgery for sibling
//! branches. These mirror the leaf primitives one level up, with child
//! references and subtree counts in place of elements.

use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::alloc::NodeAlloc;
use crate::policy::MovePolicy;
use crate::{Branch, Leaf, NodePtr, SeqTreeRaw};

impl<T, const L: usize, const M: usize> Branch<T, L, M> {
    pub(crate) fn parent(&self) -> Option<NonNull<Branch<T, L, M>>> {
        self.hdr.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NonNull<Branch<T, L, M>>>) {
        self.hdr.parent = parent;
    }

    pub(crate) fn child(&self, i: usize) -> NodePtr<T, L, M> {
        debug_assert!(i < self.fill);
        unsafe { self.children[i].assume_init() }
    }

    pub(crate) fn set_child(&mut self, i: usize, child: NodePtr<T, L, M>, num: usize) {
        self.children[i] = MaybeUninit::new(child);
        self.nums[i] = num;
    }

    /// Open a gap of `num` slots at `idx` by shifting the tail right.
    pub(crate) fn insert_children(&mut self, idx: usize, num: usize) {
        let mut j = self.fill;
        while j != idx {
            j -= 1;
            self.children[j + num] = self.children[j];
            self.nums[j + num] = self.nums[j];
        }
        self.fill += num;
    }

    /// Close `num` slots at `idx` by shifting the tail left. The removed
    /// child references are simply forgotten; callers own their cleanup.
    pub(crate) fn delete_children(&mut self, idx: usize, num: usize) {
        for j in idx..self.fill - num {
            self.children[j] = self.children[j + num];
            self.nums[j] = self.nums[j + num];
        }
        self.fill -= num;
    }

    /// The slot holding `child`. The child must be present.
    pub(crate) fn find_child(&self, child: NodePtr<T, L, M>) -> usize {
        (0..self.fill)
            .find(|&j| self.child(j) == child)
            .expect("node is not a child of its recorded parent")
    }
}

/// Move `num` child slots from `src[isrc..]` to `dst[idst..]`, rebinding each
/// moved child's parent pointer. Returns the total element count moved.
/// Walks forward, so compacting within one branch (`dst == src`, `idst <
/// isrc`) is fine. Neither fill counter is touched.
pub(crate) unsafe fn move_children<T, const L: usize, const M: usize>(
    dst: NonNull<Branch<T, L, M>>,
    idst: usize,
    src: NonNull<Branch<T, L, M>>,
    isrc: usize,
    num: usize,
) -> usize {
    let mut total = 0;
    for j in 0..num {
        let child = (*src.as_ptr()).children[isrc + j].assume_init();
        let cnt = (*src.as_ptr()).nums[isrc + j];
        (*dst.as_ptr()).children[idst + j] = MaybeUninit::new(child);
        (*dst.as_ptr()).nums[idst + j] = cnt;
        child.set_parent(Some(dst));
        total += cnt;
    }
    total
}

/// Hang a run of leaves under `b` starting at slot `place`, adopting each.
/// Returns the total element count taken on. Does not touch `b.fill`.
pub(crate) unsafe fn fill_leaves<T, const L: usize, const M: usize>(
    b: NonNull<Branch<T, L, M>>,
    place: usize,
    leaves: &[NonNull<Leaf<T, L, M>>],
) -> usize {
    let mut total = 0;
    for (j, &leaf) in leaves.iter().enumerate() {
        let fill = (*leaf.as_ptr()).fill;
        (*b.as_ptr()).children[place + j] = MaybeUninit::new(NodePtr::from_leaf(leaf));
        (*b.as_ptr()).nums[place + j] = fill;
        (*leaf.as_ptr()).set_parent(Some(b));
        total += fill;
    }
    total
}

impl<T, P: MovePolicy<T>, A: NodeAlloc, const L: usize, const M: usize> SeqTreeRaw<T, P, A, L, M> {
    /// Merge branch `idx+1` of `b` into branch `idx` if their children fit
    /// in one node.
    pub(crate) unsafe fn try_merge_branches(&mut self, b: NonNull<Branch<T, L, M>>, idx: usize) -> bool {
        let left = (*b.as_ptr()).child(idx).as_branch();
        let right = (*b.as_ptr()).child(idx + 1).as_branch();
        let l = (*left.as_ptr()).fill;
        let r = (*right.as_ptr()).fill;
        if l + r > L {
            return false;
        }
        move_children(left, l, right, 0, r);
        (*left.as_ptr()).fill = l + r;
        (*b.as_ptr()).nums[idx] += (*b.as_ptr()).nums[idx + 1];
        self.free_branch(right);
        (*b.as_ptr()).delete_children(idx + 1, 1);
        true
    }

    /// Even out two sibling branches by moving children left-to-right.
    pub(crate) unsafe fn balance_branch_lr(&mut self, b: NonNull<Branch<T, L, M>>, idx: usize) {
        let left = (*b.as_ptr()).child(idx).as_branch();
        let right = (*b.as_ptr()).child(idx + 1).as_branch();
        let l = (*left.as_ptr()).fill;
        let r = (*right.as_ptr()).fill;
        let moves = l - (l + r) / 2;
        (*right.as_ptr()).insert_children(0, moves);
        let num = move_children(right, 0, left, l - moves, moves);
        (*left.as_ptr()).fill -= moves;
        (*b.as_ptr()).nums[idx] -= num;
        (*b.as_ptr()).nums[idx + 1] += num;
    }

    /// Even out two sibling branches by moving children right-to-left.
    pub(crate) unsafe fn balance_branch_rl(&mut self, b: NonNull<Branch<T, L, M>>, idx: usize) {
        let left = (*b.as_ptr()).child(idx).as_branch();
        let right = (*b.as_ptr()).child(idx + 1).as_branch();
        let l = (*left.as_ptr()).fill;
        let r = (*right.as_ptr()).fill;
        let moves = r - (l + r) / 2;
        let num = move_children(left, l, right, 0, moves);
        (*right.as_ptr()).delete_children(0, moves);
        (*left.as_ptr()).fill += moves;
        (*b.as_ptr()).nums[idx] += num;
        (*b.as_ptr()).nums[idx + 1] -= num;
    }

    /// Repair a branch that may have fallen under the minimum fill, walking
    /// up as merges thin out the ancestors. A root branch holding a single
    /// child is replaced by that child, shrinking the tree by one level.
    pub(crate) unsafe fn underflow_branch(&mut self, node: NonNull<Branch<T, L, M>>) {
        let mut parent = node;
        while (*parent.as_ptr()).fill < L / 2 {
            let node = parent;
            match (*node.as_ptr()).parent() {
                None => {
                    // The root may keep as few as 2 children.
                    if (*node.as_ptr()).fill == 1 {
                        let child = (*node.as_ptr()).child(0);
                        child.set_parent(None);
                        self.root = Some(child);
                        self.depth -= 1;
                        self.free_branch(node);
                    }
                    break;
                }
                Some(p) => {
                    let idx = (*p.as_ptr()).find_child(NodePtr::from_branch(node));
                    if idx > 0 && self.try_merge_branches(p, idx - 1) {
                        parent = p;
                        continue;
                    }
                    if idx < (*p.as_ptr()).fill - 1 && self.try_merge_branches(p, idx) {
                        parent = p;
                        continue;
                    }
                    if idx > 0 {
                        self.balance_branch_lr(p, idx - 1);
                    } else {
                        self.balance_branch_rl(p, idx);
                    }
                    parent = p;
                }
            }
        }
    }
}
