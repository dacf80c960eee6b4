//! Attributes and access-policy trees.
//!
//! A policy is a recursive threshold formula over attributes. The only
//! primitive leaf the secret-sharing layer ever sees is "named attribute
//! present"; numeric comparisons are compiled into small threshold
//! subtrees over per-bit attributes before any cryptographic operation
//! touches the tree ([`PolicyNode::normalize`]).
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::AbeError;

/// Largest supported bit-width of a numeric attribute.
pub const MAX_BITS: u8 = 64;
/// Longest accepted attribute name.
pub const MAX_NAME_LEN: usize = 255;

/// An attribute held by a ciphertext: a bare name, or a numeric value of a
/// fixed bit-width. Values of differing bit-widths never compare equal and
/// never satisfy each other's comparisons.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    Bare(String),
    Numeric { name: String, value: u64, bits: u8 },
}

impl Attribute {
    pub fn bare(name: &str) -> Attribute {
        Attribute::Bare(name.to_string())
    }

    pub fn numeric(name: &str, value: u64, bits: u8) -> Attribute {
        Attribute::Numeric { name: name.to_string(), value, bits }
    }

    pub fn name(&self) -> &str {
        match self {
            Attribute::Bare(name) => name,
            Attribute::Numeric { name, .. } => name,
        }
    }

    pub fn validate(&self) -> Result<(), AbeError> {
        check_name(self.name()).map_err(AbeError::malformed)?;
        if let Attribute::Numeric { value, bits, .. } = self {
            check_numeric(*value, *bits).map_err(AbeError::malformed)?;
        }
        Ok(())
    }

    /// The internal attribute names this attribute provides: its own name
    /// for a bare attribute, one bit-flag name per bit position for a
    /// numeric one.
    pub fn expand(&self) -> Vec<String> {
        match self {
            Attribute::Bare(name) => vec![name.clone()],
            Attribute::Numeric { name, value, bits } => (0..*bits)
                .map(|pos| bit_name(name, *bits, pos, (value >> u32::from(pos)) & 1 == 1))
                .collect(),
        }
    }
}

/// An attribute declared at setup time. A numeric declaration contributes
/// bases for both values of every bit position, so any value of that
/// bit-width can later be encrypted under.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum UniverseAttribute {
    Bare(String),
    Numeric { name: String, bits: u8 },
}

impl UniverseAttribute {
    pub fn bare(name: &str) -> UniverseAttribute {
        UniverseAttribute::Bare(name.to_string())
    }

    pub fn numeric(name: &str, bits: u8) -> UniverseAttribute {
        UniverseAttribute::Numeric { name: name.to_string(), bits }
    }

    pub fn name(&self) -> &str {
        match self {
            UniverseAttribute::Bare(name) => name,
            UniverseAttribute::Numeric { name, .. } => name,
        }
    }

    pub fn validate(&self) -> Result<(), AbeError> {
        check_name(self.name()).map_err(AbeError::malformed)?;
        if let UniverseAttribute::Numeric { bits, .. } = self {
            check_bits(*bits).map_err(AbeError::malformed)?;
        }
        Ok(())
    }

    /// All internal attribute names this declaration adds to the universe.
    pub fn expand(&self) -> Vec<String> {
        match self {
            UniverseAttribute::Bare(name) => vec![name.clone()],
            UniverseAttribute::Numeric { name, bits } => (0..*bits)
                .flat_map(|pos| {
                    vec![bit_name(name, *bits, pos, false), bit_name(name, *bits, pos, true)]
                })
                .collect(),
        }
    }
}

/// A numeric comparison operator usable in a policy leaf.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}

/// A policy leaf: a named attribute, or a numeric comparison against a
/// constant of a fixed bit-width.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PolicyLeaf {
    Attr(String),
    Compare { name: String, op: CompareOp, value: u64, bits: u8 },
}

/// An access-policy tree. `Threshold { k, children }` is satisfied when at
/// least `k` of its children are, with `1 <= k <= children.len()`; AND is
/// `k == len`, OR is `k == 1`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PolicyNode {
    Leaf(PolicyLeaf),
    Threshold { k: usize, children: Vec<PolicyNode> },
}

impl PolicyNode {
    pub fn attr(name: &str) -> PolicyNode {
        PolicyNode::Leaf(PolicyLeaf::Attr(name.to_string()))
    }

    pub fn compare(name: &str, op: CompareOp, value: u64, bits: u8) -> PolicyNode {
        PolicyNode::Leaf(PolicyLeaf::Compare { name: name.to_string(), op, value, bits })
    }

    pub fn and(children: Vec<PolicyNode>) -> PolicyNode {
        PolicyNode::Threshold { k: children.len(), children }
    }

    pub fn or(children: Vec<PolicyNode>) -> PolicyNode {
        PolicyNode::Threshold { k: 1, children }
    }

    pub fn threshold(k: usize, children: Vec<PolicyNode>) -> PolicyNode {
        PolicyNode::Threshold { k, children }
    }

    /// Checks the structural invariants: thresholds within `[1, children]`,
    /// non-empty child lists, well-formed names, comparison values that fit
    /// their bit-width.
    pub fn validate(&self) -> Result<(), AbeError> {
        match self {
            PolicyNode::Leaf(PolicyLeaf::Attr(name)) => {
                check_name(name).map_err(AbeError::policy)
            }
            PolicyNode::Leaf(PolicyLeaf::Compare { name, value, bits, .. }) => {
                check_name(name).map_err(AbeError::policy)?;
                check_numeric(*value, *bits).map_err(AbeError::policy)
            }
            PolicyNode::Threshold { k, children } => {
                if children.is_empty() {
                    return Err(AbeError::policy("threshold node without children"));
                }
                if *k < 1 || *k > children.len() {
                    return Err(AbeError::policy(format!(
                        "threshold {} out of range for {} children",
                        k,
                        children.len()
                    )));
                }
                children.iter().try_for_each(|child| child.validate())
            }
        }
    }

    /// Rewrites every comparison leaf into its bit-threshold subtree. The
    /// result contains only named-attribute leaves; normalization is
    /// deterministic, so key material indexed by normalized leaf order
    /// stays aligned across calls.
    pub fn normalize(&self) -> PolicyNode {
        match self {
            PolicyNode::Leaf(PolicyLeaf::Attr(_)) => self.clone(),
            PolicyNode::Leaf(PolicyLeaf::Compare { name, op, value, bits }) => {
                compare_subtree(name, *op, *value, *bits)
            }
            PolicyNode::Threshold { k, children } => PolicyNode::Threshold {
                k: *k,
                children: children.iter().map(|child| child.normalize()).collect(),
            },
        }
    }

    /// Number of leaves of this tree (without normalizing).
    pub fn leaf_count(&self) -> usize {
        match self {
            PolicyNode::Leaf(_) => 1,
            PolicyNode::Threshold { children, .. } => {
                children.iter().map(|child| child.leaf_count()).sum()
            }
        }
    }

    /// Whether the given attribute set satisfies this policy.
    pub fn satisfies(&self, attributes: &[Attribute]) -> bool {
        let names: HashSet<String> =
            attributes.iter().flat_map(|attribute| attribute.expand()).collect();
        self.eval(&names)
    }

    pub(crate) fn eval(&self, names: &HashSet<String>) -> bool {
        match self {
            PolicyNode::Leaf(PolicyLeaf::Attr(name)) => names.contains(name),
            PolicyNode::Leaf(PolicyLeaf::Compare { name, op, value, bits }) => {
                compare_subtree(name, *op, *value, *bits).eval(names)
            }
            PolicyNode::Threshold { k, children } => {
                children.iter().filter(|child| child.eval(names)).count() >= *k
            }
        }
    }
}

/// The internal bit-flag attribute name recording that bit `pos` of the
/// `bits`-wide numeric attribute `name` has the given value. The `#` and
/// `:` separators cannot occur in user attribute names, so bit-flag names
/// never collide with bare attributes, and differing bit-widths produce
/// disjoint name sets.
pub(crate) fn bit_name(name: &str, bits: u8, pos: u8, set: bool) -> String {
    format!("{}#{}:{}={}", name, bits, pos, set as u8)
}

/// Ordered internal names for a ciphertext attribute set, rejecting empty
/// sets and duplicate attribute names.
pub(crate) fn expand_attribute_set(attributes: &[Attribute]) -> Result<Vec<String>, AbeError> {
    if attributes.is_empty() {
        return Err(AbeError::malformed("empty attribute set"));
    }
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for attribute in attributes {
        attribute.validate()?;
        if !seen.insert(attribute.name().to_string()) {
            return Err(AbeError::malformed(format!(
                "duplicate attribute `{}`",
                attribute.name()
            )));
        }
        names.extend(attribute.expand());
    }
    Ok(names)
}

/// Validates a setup universe: non-empty, well-formed, no duplicate names.
/// A name declared both bare and numeric is reported as its own case.
pub(crate) fn validate_universe(universe: &[UniverseAttribute]) -> Result<(), AbeError> {
    if universe.is_empty() {
        return Err(AbeError::malformed("empty attribute universe"));
    }
    let mut kinds: HashMap<&str, bool> = HashMap::new();
    for decl in universe {
        decl.validate()?;
        let numeric = matches!(decl, UniverseAttribute::Numeric { .. });
        match kinds.insert(decl.name(), numeric) {
            None => {}
            Some(prev) if prev != numeric => {
                return Err(AbeError::malformed(format!(
                    "attribute `{}` declared both bare and numeric",
                    decl.name()
                )))
            }
            Some(_) => {
                return Err(AbeError::malformed(format!(
                    "duplicate attribute `{}` in universe",
                    decl.name()
                )))
            }
        }
    }
    Ok(())
}

pub(crate) fn check_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid || name.len() > MAX_NAME_LEN {
        return Err(format!("invalid attribute name `{}`", name));
    }
    Ok(())
}

fn check_bits(bits: u8) -> Result<(), String> {
    if bits == 0 || bits > MAX_BITS {
        return Err(format!("bit-width {} out of range", bits));
    }
    Ok(())
}

pub(crate) fn check_numeric(value: u64, bits: u8) -> Result<(), String> {
    check_bits(bits)?;
    if bits < MAX_BITS && value >> u32::from(bits) != 0 {
        return Err(format!("value {} does not fit in {} bits", value, bits));
    }
    Ok(())
}

fn max_value(bits: u8) -> u64 {
    if bits == MAX_BITS {
        u64::MAX
    } else {
        (1u64 << u32::from(bits)) - 1
    }
}

fn bit_leaf(name: &str, bits: u8, pos: u8, set: bool) -> PolicyNode {
    PolicyNode::Leaf(PolicyLeaf::Attr(bit_name(name, bits, pos, set)))
}

/// A subtree that every value of the attribute satisfies. The ciphertext
/// provides exactly one flag for bit 0, so one branch always matches.
fn always(name: &str, bits: u8) -> PolicyNode {
    PolicyNode::or(vec![bit_leaf(name, bits, 0, false), bit_leaf(name, bits, 0, true)])
}

/// A subtree no value of the attribute satisfies.
fn never(name: &str, bits: u8) -> PolicyNode {
    PolicyNode::and(vec![bit_leaf(name, bits, 0, false), bit_leaf(name, bits, 0, true)])
}

/// `x >= n`, folded LSB to MSB: at a set bit of `n` the value's bit must
/// also be set and the lower bits must still reach the remainder; at an
/// unset bit a set value bit wins outright.
fn ge_subtree(name: &str, bits: u8, n: u64) -> PolicyNode {
    let mut node = None;
    for pos in 0..bits {
        let set = (n >> u32::from(pos)) & 1 == 1;
        let leaf = bit_leaf(name, bits, pos, true);
        node = match (set, node) {
            (true, None) => Some(leaf),
            (true, Some(rest)) => Some(PolicyNode::and(vec![leaf, rest])),
            (false, None) => None,
            (false, Some(rest)) => Some(PolicyNode::or(vec![leaf, rest])),
        };
    }
    node.unwrap_or_else(|| always(name, bits))
}

/// `x <= n`, the dual of [`ge_subtree`] over cleared bits.
fn le_subtree(name: &str, bits: u8, n: u64) -> PolicyNode {
    let mut node = None;
    for pos in 0..bits {
        let set = (n >> u32::from(pos)) & 1 == 1;
        let leaf = bit_leaf(name, bits, pos, false);
        node = match (set, node) {
            (false, None) => Some(leaf),
            (false, Some(rest)) => Some(PolicyNode::and(vec![leaf, rest])),
            (true, None) => None,
            (true, Some(rest)) => Some(PolicyNode::or(vec![leaf, rest])),
        };
    }
    node.unwrap_or_else(|| always(name, bits))
}

fn eq_subtree(name: &str, bits: u8, n: u64) -> PolicyNode {
    let children = (0..bits)
        .map(|pos| bit_leaf(name, bits, pos, (n >> u32::from(pos)) & 1 == 1))
        .collect();
    PolicyNode::and(children)
}

fn compare_subtree(name: &str, op: CompareOp, value: u64, bits: u8) -> PolicyNode {
    match op {
        CompareOp::Eq => eq_subtree(name, bits, value),
        CompareOp::Ge => ge_subtree(name, bits, value),
        CompareOp::Le => le_subtree(name, bits, value),
        CompareOp::Gt => {
            if value == max_value(bits) {
                never(name, bits)
            } else {
                ge_subtree(name, bits, value + 1)
            }
        }
        CompareOp::Lt => {
            if value == 0 {
                never(name, bits)
            } else {
                le_subtree(name, bits, value - 1)
            }
        }
    }
}
