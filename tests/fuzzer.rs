//! Randomized model-equivalence and failure-injection tests. The tree runs
//! the same operation stream as a plain Vec and must agree with it
//! element-for-element after every step, with the structural audit passing
//! throughout.

use rand::prelude::*;

use seq_tree::testutil::{clone_fuse, FailingAlloc, FailingClone};
use seq_tree::{SafeMoves, SeqTreeRaw, TreeError};

// Tiny fanout so a few hundred elements already make a deep tree.
type FuzzTree = SeqTreeRaw<u32, SafeMoves, FailingAlloc, 4, 4>;

fn assert_matches(tree: &FuzzTree, model: &[u32]) {
    tree.check();
    assert_eq!(tree.len(), model.len());
    assert!(tree.iter().copied().eq(model.iter().copied()), "tree diverged from the model");
}

#[test]
fn random_edits_match_a_vec() {
    let mut rng = SmallRng::seed_from_u64(20);
    let alloc = FailingAlloc::new(usize::MAX);

    for _i in 0..40 {
        let mut tree = FuzzTree::with_alloc(alloc.clone());
        let mut model: Vec<u32> = Vec::new();
        let mut next_val = 0u32;

        for _j in 0..150 {
            match rng.gen_range(0..6) {
                0 => {
                    let pos = rng.gen_range(0..=model.len());
                    tree.insert(pos, next_val).unwrap();
                    model.insert(pos, next_val);
                    next_val += 1;
                }
                1 => {
                    let pos = rng.gen_range(0..=model.len());
                    let n = rng.gen_range(0..30);
                    let batch: Vec<u32> = (next_val..next_val + n).collect();
                    tree.insert_iter(pos, batch.iter().copied()).unwrap();
                    model.splice(pos..pos, batch);
                    next_val += n;
                }
                2 if !model.is_empty() => {
                    let pos = rng.gen_range(0..model.len());
                    assert_eq!(tree.remove(pos), model.remove(pos));
                }
                3 if !model.is_empty() => {
                    let a = rng.gen_range(0..=model.len());
                    let b = rng.gen_range(0..=model.len());
                    let (first, last) = (a.min(b), a.max(b));
                    tree.erase(first, last);
                    model.drain(first..last);
                }
                4 => {
                    let pos = rng.gen_range(0..=model.len());
                    let n = rng.gen_range(0..12);
                    tree.fill(pos, n, &next_val).unwrap();
                    model.splice(pos..pos, std::iter::repeat(next_val).take(n));
                    next_val += 1;
                }
                _ => {
                    // Split at a random point and immediately concatenate
                    // back; the sequence must be unchanged.
                    let pos = rng.gen_range(0..=model.len());
                    let mut right = FuzzTree::with_alloc(alloc.clone());
                    tree.split_right(&mut right, pos).unwrap();
                    tree.check();
                    right.check();
                    assert_eq!(tree.len(), pos);
                    tree.concatenate_right(&mut right).unwrap();
                    assert!(right.is_empty());
                }
            }
            assert_matches(&tree, &model);
        }

        drop(tree);
        assert_eq!(alloc.live_nodes(), 0, "nodes leaked");
    }
}

#[test]
fn random_concat_and_split_match_a_vec() {
    let mut rng = SmallRng::seed_from_u64(33);
    let alloc = FailingAlloc::new(usize::MAX);

    for _i in 0..60 {
        let left_len = rng.gen_range(0..250);
        let right_len = rng.gen_range(0..250);
        let mut a = FuzzTree::with_alloc(alloc.clone());
        let mut b = FuzzTree::with_alloc(alloc.clone());
        a.insert_iter(0, 0..left_len).unwrap();
        b.insert_iter(0, left_len..left_len + right_len).unwrap();

        a.concatenate_right(&mut b).unwrap();
        let model: Vec<u32> = (0..left_len + right_len).collect();
        assert_matches(&a, &model);
        assert!(b.is_empty());

        let cut = rng.gen_range(0..=model.len());
        a.split_right(&mut b, cut).unwrap();
        assert_matches(&a, &model[..cut]);
        assert_matches(&b, &model[cut..]);

        // And the left-handed variants restore the original split.
        a.concatenate_left(&mut b).unwrap();
        let swapped: Vec<u32> = model[cut..].iter().chain(&model[..cut]).copied().collect();
        assert_matches(&a, &swapped);
    }
}

/// Run `op` against trees whose allocator fails on the k-th allocation, for
/// every k until the operation finally succeeds. A failed attempt must leave
/// the tree exactly as it was; the successful one must match `expect`.
fn sweep_alloc_failures(
    base: &[u32],
    expect: &[u32],
    op: impl Fn(&mut FuzzTree, &FailingAlloc) -> Result<(), TreeError>,
) {
    for k in 0.. {
        let alloc = FailingAlloc::new(usize::MAX);
        let budget = alloc.budget();
        let mut tree = FuzzTree::with_alloc(alloc.clone());
        tree.insert_iter(0, base.iter().copied()).unwrap();

        budget.set(k);
        let res = op(&mut tree, &alloc);
        budget.set(usize::MAX);

        match res {
            Err(TreeError::AllocFailed) => {
                assert_matches(&tree, base);
                drop(tree);
                assert_eq!(alloc.live_nodes(), 0, "nodes leaked on the failure path");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(()) => {
                assert_matches(&tree, expect);
                drop(tree);
                assert_eq!(alloc.live_nodes(), 0);
                return;
            }
        }
        assert!(k < 10_000, "operation never succeeded");
    }
}

#[test]
fn failing_allocator_never_tears_an_insert() {
    let base: Vec<u32> = (0..90).collect();

    let mut with_single = base.clone();
    with_single.insert(41, 500);
    sweep_alloc_failures(&base, &with_single, |tree, _| tree.insert(41, 500));

    let batch: Vec<u32> = (500..560).collect();
    let mut with_batch = base.clone();
    with_batch.splice(13..13, batch.iter().copied());
    sweep_alloc_failures(&base, &with_batch, |tree, _| {
        tree.insert_iter(13, batch.iter().copied())
    });
}

#[test]
fn failing_allocator_never_tears_concat_or_split() {
    let base: Vec<u32> = (0..70).collect();
    let expect: Vec<u32> = (0..140).collect();
    sweep_alloc_failures(&base, &expect, |tree, alloc| {
        let mut other = FuzzTree::with_alloc(alloc.clone());
        // The extension is built with the budget already throttled, so build
        // failures count as (clean) operation failures too.
        other.insert_iter(0, 70..140)?;
        tree.concatenate_right(&mut other)
    });

    let left: Vec<u32> = (0..45).collect();
    sweep_alloc_failures(&base, &left, |tree, alloc| {
        let mut other = FuzzTree::with_alloc(alloc.clone());
        tree.split_right(&mut other, 45)?;
        // Success: drop the detached tail and keep the prefix.
        Ok(())
    });
}

#[test]
fn failing_clones_never_tear_the_tree() {
    type CloneTree = SeqTreeRaw<FailingClone, SafeMoves, FailingAlloc, 4, 4>;

    for k in 0.. {
        let alloc = FailingAlloc::new(usize::MAX);
        let fuse = clone_fuse(usize::MAX);
        let mut tree: CloneTree = SeqTreeRaw::with_alloc(alloc.clone());
        for v in 0..40 {
            tree.push_back(FailingClone::new(v, &fuse)).unwrap();
        }
        let batch: Vec<FailingClone> =
            (100..130).map(|v| FailingClone::new(v, &fuse)).collect();

        fuse.set(k);
        let res = tree.insert_from_slice(17, &batch);
        fuse.set(usize::MAX);

        tree.check();
        match res {
            Err(TreeError::CloneFailed) => {
                assert!(tree.iter().map(|e| e.value).eq(0..40), "failed insert left residue");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(()) => {
                let want: Vec<u32> = (0..17).chain(100..130).chain(17..40).collect();
                assert!(tree.iter().map(|e| e.value).eq(want.into_iter()));
                drop(tree);
                assert_eq!(alloc.live_nodes(), 0);
                return;
            }
        }
        drop(tree);
        assert_eq!(alloc.live_nodes(), 0, "nodes leaked on the failure path");
        assert!(k < 10_000, "operation never succeeded");
    }
}

#[test]
fn visit_agrees_with_linear_search() {
    let mut rng = SmallRng::seed_from_u64(7);
    let alloc = FailingAlloc::new(usize::MAX);
    let mut tree = FuzzTree::with_alloc(alloc.clone());
    let model: Vec<u32> = (0..500).map(|_| rng.gen_range(0..50)).collect();
    tree.insert_iter(0, model.iter().copied()).unwrap();

    for _ in 0..200 {
        let a = rng.gen_range(0..=model.len());
        let b = rng.gen_range(0..=model.len());
        let (start, end) = (a.min(b), a.max(b));
        let needle = rng.gen_range(0..60);
        let want = model[start..end]
            .iter()
            .position(|&v| v == needle)
            .map_or(end, |off| start + off);
        assert_eq!(tree.visit(start, end, |&v| v == needle), want);
    }
}
