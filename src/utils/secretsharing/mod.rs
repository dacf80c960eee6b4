//! Linear secret sharing over policy trees.
//!
//! At every `Threshold { k, children }` node a fresh degree-`(k - 1)`
//! polynomial with the node's value at zero is sampled; child `j` receives
//! its evaluation at `j + 1`. Any `k` child shares recover the node value
//! through Lagrange interpolation at zero. Shares land on the leaves in
//! pre-order, which is also the order key material is stored in.
use std::collections::HashSet;

use rabe_bn::Fr;
use rand::Rng;

use crate::error::AbeError;
use crate::utils::policy::{PolicyLeaf, PolicyNode};
use crate::utils::tools::usize_to_fr;

/// Polynomial coefficients `a_0 .. a_{k-1}` with `a_0 = secret`.
pub fn gen_polynomial<R: Rng>(rng: &mut R, secret: Fr, k: usize) -> Vec<Fr> {
    let mut coeff = vec![secret];
    for _ in 1..k {
        coeff.push(rng.gen());
    }
    coeff
}

pub fn eval_polynomial(coeff: &[Fr], x: Fr) -> Fr {
    let mut share = Fr::zero();
    for c in coeff.iter().rev() {
        share = share * x + *c;
    }
    share
}

/// `n` shares of `secret` at the points `1..=n`; any `k` of them recover
/// the secret.
pub fn gen_shares<R: Rng>(rng: &mut R, secret: Fr, k: usize, n: usize) -> Vec<Fr> {
    let coeff = gen_polynomial(rng, secret, k);
    (1..=n).map(|i| eval_polynomial(&coeff, usize_to_fr(i))).collect()
}

/// Lagrange coefficients at zero for the given evaluation points.
pub fn recover_coefficients(points: &[Fr]) -> Result<Vec<Fr>, AbeError> {
    let mut coeffs = Vec::with_capacity(points.len());
    for i in points {
        let mut result = Fr::one();
        for j in points {
            if i != j {
                let inv = (*i - *j)
                    .inverse()
                    .ok_or_else(|| AbeError::invariant("interpolation points collide"))?;
                result = result * ((Fr::zero() - *j) * inv);
            }
        }
        coeffs.push(result);
    }
    Ok(coeffs)
}

/// Shares `secret` over a normalized policy tree, returning one
/// `(attribute name, share)` pair per leaf in pre-order.
pub fn gen_shares_node<R: Rng>(
    rng: &mut R,
    secret: Fr,
    node: &PolicyNode,
) -> Result<Vec<(String, Fr)>, AbeError> {
    let mut result = Vec::new();
    share_node(rng, secret, node, &mut result)?;
    Ok(result)
}

fn share_node<R: Rng>(
    rng: &mut R,
    secret: Fr,
    node: &PolicyNode,
    out: &mut Vec<(String, Fr)>,
) -> Result<(), AbeError> {
    match node {
        PolicyNode::Leaf(PolicyLeaf::Attr(name)) => {
            out.push((name.clone(), secret));
            Ok(())
        }
        PolicyNode::Leaf(PolicyLeaf::Compare { .. }) => {
            Err(AbeError::invariant("comparison leaf in a normalized policy"))
        }
        PolicyNode::Threshold { k, children } => {
            let shares = gen_shares(rng, secret, *k, children.len());
            for (child, share) in children.iter().zip(shares) {
                share_node(rng, share, child, out)?;
            }
            Ok(())
        }
    }
}

/// A minimal satisfying assignment: for every visited threshold node the
/// `k` satisfied children actually used, each tagged with its position
/// among its siblings (the share evaluation point minus one); leaves carry
/// their pre-order index into the key's share vector.
#[derive(Debug, Clone, PartialEq)]
pub enum PrunedNode {
    Leaf { index: usize, name: String },
    Threshold { children: Vec<(usize, PrunedNode)> },
}

/// Prunes a normalized policy tree against a set of internal attribute
/// names. Returns `Ok(None)` when the policy is not satisfied; selection
/// among satisfied children is deterministic, lowest index first.
pub fn calc_pruned(
    node: &PolicyNode,
    names: &HashSet<String>,
) -> Result<Option<PrunedNode>, AbeError> {
    let mut next_leaf = 0usize;
    prune_node(node, names, &mut next_leaf)
}

fn prune_node(
    node: &PolicyNode,
    names: &HashSet<String>,
    next_leaf: &mut usize,
) -> Result<Option<PrunedNode>, AbeError> {
    match node {
        PolicyNode::Leaf(PolicyLeaf::Attr(name)) => {
            let index = *next_leaf;
            *next_leaf += 1;
            if names.contains(name) {
                Ok(Some(PrunedNode::Leaf { index, name: name.clone() }))
            } else {
                Ok(None)
            }
        }
        PolicyNode::Leaf(PolicyLeaf::Compare { .. }) => {
            Err(AbeError::invariant("comparison leaf in a normalized policy"))
        }
        PolicyNode::Threshold { k, children } => {
            let mut selected = Vec::with_capacity(*k);
            // every child is traversed so leaf indices stay aligned with
            // the pre-order share layout
            for (pos, child) in children.iter().enumerate() {
                let pruned = prune_node(child, names, next_leaf)?;
                if let Some(pruned) = pruned {
                    if selected.len() < *k {
                        selected.push((pos, pruned));
                    }
                }
            }
            if selected.len() == *k {
                Ok(Some(PrunedNode::Threshold { children: selected }))
            } else {
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::policy::Attribute;

    fn recover(shares: &[(usize, Fr)]) -> Fr {
        let points: Vec<Fr> = shares.iter().map(|(pos, _)| usize_to_fr(pos + 1)).collect();
        let coeffs = recover_coefficients(&points).unwrap();
        let mut secret = Fr::zero();
        for ((_, share), coeff) in shares.iter().zip(coeffs) {
            secret = secret + (*share * coeff);
        }
        secret
    }

    #[test]
    fn test_secret_sharing_or() {
        let mut rng = rand::thread_rng();
        let secret: Fr = rng.gen();
        let shares = gen_shares(&mut rng, secret, 1, 2);
        assert_eq!(shares.len(), 2);
        assert!(recover(&[(0, shares[0])]) == secret);
        assert!(recover(&[(1, shares[1])]) == secret);
    }

    #[test]
    fn test_secret_sharing_and() {
        let mut rng = rand::thread_rng();
        let secret: Fr = rng.gen();
        let shares = gen_shares(&mut rng, secret, 2, 2);
        assert!(recover(&[(0, shares[0]), (1, shares[1])]) == secret);
    }

    #[test]
    fn test_secret_sharing_two_of_three() {
        let mut rng = rand::thread_rng();
        let secret: Fr = rng.gen();
        let shares = gen_shares(&mut rng, secret, 2, 3);
        assert!(recover(&[(0, shares[0]), (2, shares[2])]) == secret);
        assert!(recover(&[(1, shares[1]), (2, shares[2])]) == secret);
        // a single share is not enough
        assert!(recover(&[(1, shares[1])]) != secret);
    }

    #[test]
    fn test_gen_shares_node_order() {
        let mut rng = rand::thread_rng();
        let secret: Fr = rng.gen();
        let policy = PolicyNode::and(vec![
            PolicyNode::attr("A"),
            PolicyNode::or(vec![PolicyNode::attr("B"), PolicyNode::attr("C")]),
        ]);
        let shares = gen_shares_node(&mut rng, secret, &policy).unwrap();
        let names: Vec<&str> = shares.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_share_and_recover_over_tree() {
        let mut rng = rand::thread_rng();
        let secret: Fr = rng.gen();
        let policy = PolicyNode::and(vec![PolicyNode::attr("A"), PolicyNode::attr("B")]);
        let shares = gen_shares_node(&mut rng, secret, &policy).unwrap();
        assert!(recover(&[(0, shares[0].1), (1, shares[1].1)]) == secret);
    }

    #[test]
    fn test_pruning_selects_lowest_index_first() {
        let policy = PolicyNode::threshold(2, vec![
            PolicyNode::attr("A"),
            PolicyNode::attr("B"),
            PolicyNode::attr("C"),
        ]);
        let names: HashSet<String> =
            ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        match calc_pruned(&policy, &names).unwrap().unwrap() {
            PrunedNode::Threshold { children } => {
                let picked: Vec<usize> = children.iter().map(|(pos, _)| *pos).collect();
                assert_eq!(picked, vec![0, 1]);
            }
            other => panic!("expected threshold node, got {:?}", other),
        }
    }

    #[test]
    fn test_pruning_unsatisfied() {
        let policy = PolicyNode::and(vec![PolicyNode::attr("A"), PolicyNode::attr("B")]);
        let names: HashSet<String> = ["A"].iter().map(|s| s.to_string()).collect();
        assert_eq!(calc_pruned(&policy, &names).unwrap(), None);
    }

    #[test]
    fn test_pruning_leaf_indices_are_preorder() {
        // B is missing; the OR must select C, whose pre-order index is 2
        let policy = PolicyNode::and(vec![
            PolicyNode::attr("A"),
            PolicyNode::or(vec![PolicyNode::attr("B"), PolicyNode::attr("C")]),
        ]);
        let names: HashSet<String> =
            ["A", "C"].iter().map(|s| s.to_string()).collect();
        let pruned = calc_pruned(&policy, &names).unwrap().unwrap();
        match pruned {
            PrunedNode::Threshold { ref children } => {
                assert_eq!(children.len(), 2);
                match &children[1].1 {
                    PrunedNode::Threshold { children: inner } => {
                        assert_eq!(inner.len(), 1);
                        assert_eq!(inner[0].0, 1);
                        assert_eq!(
                            inner[0].1,
                            PrunedNode::Leaf { index: 2, name: "C".to_string() }
                        );
                    }
                    other => panic!("expected inner threshold, got {:?}", other),
                }
            }
            other => panic!("expected threshold node, got {:?}", other),
        }
    }

    #[test]
    fn test_pruning_normalized_numeric_policy() {
        let policy =
            PolicyNode::compare("level", crate::utils::policy::CompareOp::Gt, 5, 8).normalize();
        let names: HashSet<String> =
            Attribute::numeric("level", 9, 8).expand().into_iter().collect();
        assert!(calc_pruned(&policy, &names).unwrap().is_some());
        let low: HashSet<String> =
            Attribute::numeric("level", 3, 8).expand().into_iter().collect();
        assert!(calc_pruned(&policy, &low).unwrap().is_none());
    }
}
