//! This is the documentation for the `GPSW` scheme:
//!
//! * Developped by: Vipul Goyal, Omkant Pandey, Amit Sahai, Brent Waters,
//!   "Attribute-Based Encryption for Fine-Grained Access Control of Encrypted Data"
//! * Published in: ACM CCS 2006
//! * Available from: <https://eprint.iacr.org/2006/309.pdf>
//! * Type: encryption (key-policy attribute-based)
//! * Setting: bilinear groups (asymmetric)
//!
//! # Examples
//!
//! ```
//! use kpabe::schemes::gpsw::*;
//! use kpabe::utils::policy::{Attribute, PolicyNode, UniverseAttribute};
//! let mut rng = rand::thread_rng();
//! let universe = vec![UniverseAttribute::bare("A"), UniverseAttribute::bare("B")];
//! let (pk, msk) = setup(&mut rng, &universe).unwrap();
//! let policy = PolicyNode::or(vec![PolicyNode::attr("A"), PolicyNode::attr("B")]);
//! let sk = keygen(&mut rng, &pk, &msk, &policy).unwrap();
//! let ct = encrypt(&mut rng, &pk, &[Attribute::bare("B")], b"our plaintext!").unwrap();
//! assert_eq!(decrypt(&sk, &ct).unwrap(), b"our plaintext!");
//! ```
use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;

use rabe_bn::{pairing, Fr, G1, G2, Gt};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AbeError;
use crate::utils::aes::{decrypt_symmetric, derive_key_iv, encrypt_symmetric};
use crate::utils::policy::{
    expand_attribute_set, validate_universe, Attribute, PolicyNode, UniverseAttribute,
};
use crate::utils::secretsharing::{
    calc_pruned, gen_shares_node, recover_coefficients, PrunedNode,
};
use crate::utils::serialize::{
    parse_container, put_attribute, put_policy, put_universe_attribute, take_attribute,
    take_policy, take_universe_attribute, write_container, AsBytes, Reader, Writer,
    KIND_CIPHERTEXT, KIND_MASTER_KEY, KIND_PUBLIC_KEY, KIND_SECRET_KEY, MAX_ATTRIBUTES,
};
use crate::utils::tools::usize_to_fr;

/// A GPSW Public Key (PK)
#[derive(Serialize, Deserialize, PartialEq, Clone)]
pub struct KpAbePublicKey {
    g1: G1,
    g2: G2,
    e_gg_y: Gt,
    universe: Vec<UniverseAttribute>,
    attributes: Vec<(String, G1)>,
}

impl KpAbePublicKey {
    /// The declared attribute universe.
    pub fn universe(&self) -> &[UniverseAttribute] {
        &self.universe
    }

    fn base(&self, name: &str) -> Option<&G1> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, base)| base)
    }
}

/// A GPSW Master Key (MSK)
#[derive(Serialize, Deserialize, PartialEq, Clone)]
pub struct KpAbeMasterKey {
    y: Fr,
    universe: Vec<UniverseAttribute>,
    t: Vec<(String, Fr)>,
}

impl KpAbeMasterKey {
    fn secret(&self, name: &str) -> Option<&Fr> {
        self.t
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, secret)| secret)
    }
}

/// A GPSW Secret User Key (SK), issued under an access policy. The share
/// elements sit in the pre-order of the normalized policy's leaves.
#[derive(Serialize, Deserialize, PartialEq, Clone)]
pub struct KpAbeSecretKey {
    policy: PolicyNode,
    d: Vec<G2>,
}

impl KpAbeSecretKey {
    /// The access policy this key was issued under.
    pub fn policy(&self) -> &PolicyNode {
        &self.policy
    }
}

/// A GPSW Ciphertext (CT), carrying one commitment per expanded attribute
/// name. Possession does not imply the ability to decrypt.
#[derive(Serialize, Deserialize, PartialEq, Clone)]
pub struct KpAbeCiphertext {
    attributes: Vec<Attribute>,
    e: Vec<(String, G1)>,
}

impl KpAbeCiphertext {
    /// The attribute set this ciphertext was produced under.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }
}

fn nonzero_fr<R: Rng>(rng: &mut R) -> Fr {
    loop {
        let value: Fr = rng.gen();
        if value != Fr::zero() {
            return value;
        }
    }
}

/// The setup algorithm of GPSW KP-ABE. Generates a new KpAbePublicKey and
/// a new KpAbeMasterKey over the given attribute universe.
///
/// # Arguments
///
///	* `rng` - the randomness source for all sampled scalars
///	* `universe` - the attribute universe, bare names and numeric declarations
pub fn setup<R: Rng>(
    rng: &mut R,
    universe: &[UniverseAttribute],
) -> Result<(KpAbePublicKey, KpAbeMasterKey), AbeError> {
    validate_universe(universe)?;
    let g1: G1 = rng.gen();
    let g2: G2 = rng.gen();
    let y = nonzero_fr(rng);
    let e_gg_y = pairing(g1, g2).pow(y);
    let mut bases: Vec<(String, G1)> = Vec::new();
    let mut secrets: Vec<(String, Fr)> = Vec::new();
    for decl in universe {
        for name in decl.expand() {
            let t = nonzero_fr(rng);
            bases.push((name.clone(), g1 * t));
            secrets.push((name, t));
        }
    }
    Ok((
        KpAbePublicKey {
            g1,
            g2,
            e_gg_y,
            universe: universe.to_vec(),
            attributes: bases,
        },
        KpAbeMasterKey { y, universe: universe.to_vec(), t: secrets },
    ))
}

/// The key generation algorithm of GPSW KP-ABE. Shares the master scalar
/// over the policy tree and blinds every leaf share with the attribute's
/// secret. Every call uses fresh sharing randomness, so no two keys reveal
/// shared secret material.
///
/// # Arguments
///
///	* `rng` - the randomness source for the sharing polynomials
///	* `pk` - a Public Key (PK), generated by the function setup()
///	* `msk` - a Master Key (MSK), generated by the function setup()
///	* `policy` - the access policy the key is issued under
pub fn keygen<R: Rng>(
    rng: &mut R,
    pk: &KpAbePublicKey,
    msk: &KpAbeMasterKey,
    policy: &PolicyNode,
) -> Result<KpAbeSecretKey, AbeError> {
    policy.validate()?;
    let normalized = policy.normalize();
    let shares = gen_shares_node(rng, msk.y, &normalized)?;
    let mut d = Vec::with_capacity(shares.len());
    for (name, share) in shares {
        let t = msk.secret(&name).ok_or_else(|| {
            AbeError::policy(format!("attribute `{}` is not in the universe", name))
        })?;
        let t_inv = t
            .inverse()
            .ok_or_else(|| AbeError::invariant("attribute secret is not invertible"))?;
        d.push(pk.g2 * (share * t_inv));
    }
    Ok(KpAbeSecretKey { policy: policy.clone(), d })
}

/// The encapsulation algorithm of GPSW KP-ABE. Produces a ciphertext over
/// the given attribute set together with the encapsulated symmetric key
/// element `e(g1,g2)^(y*s)`; the fresh scalar `s` itself never leaves this
/// function.
///
/// # Arguments
///
///	* `rng` - the randomness source for the encapsulation scalar
///	* `pk` - a Public Key (PK), generated by the function setup()
///	* `attributes` - the attribute set the ciphertext is produced under
pub fn encapsulate<R: Rng>(
    rng: &mut R,
    pk: &KpAbePublicKey,
    attributes: &[Attribute],
) -> Result<(KpAbeCiphertext, Gt), AbeError> {
    let names = expand_attribute_set(attributes)?;
    let s = nonzero_fr(rng);
    let mut e = Vec::with_capacity(names.len());
    for name in names {
        let base = pk.base(&name).ok_or_else(|| {
            AbeError::malformed(format!("attribute `{}` is not in the universe", name))
        })?;
        e.push((name, *base * s));
    }
    Ok((
        KpAbeCiphertext { attributes: attributes.to_vec(), e },
        pk.e_gg_y.pow(s),
    ))
}

/// The decapsulation algorithm of GPSW KP-ABE. Recovers the encapsulated
/// symmetric key element when the key's policy is satisfied by the
/// ciphertext's attribute set; otherwise fails with
/// [`AbeError::AccessDenied`] before any pairing is evaluated. Key and
/// ciphertext leaves are matched by attribute name only, so the two need
/// not share any structure.
///
/// # Arguments
///
///	* `sk` - a Secret Key (SK), generated by the function keygen()
///	* `ct` - a Ciphertext, generated by the function encapsulate()
pub fn decapsulate(sk: &KpAbeSecretKey, ct: &KpAbeCiphertext) -> Result<Gt, AbeError> {
    let normalized = sk.policy.normalize();
    if sk.d.len() != normalized.leaf_count() {
        return Err(AbeError::invariant("share count does not match the key policy"));
    }
    let names: HashSet<String> = ct.e.iter().map(|(name, _)| name.clone()).collect();
    let pruned = calc_pruned(&normalized, &names)?.ok_or(AbeError::AccessDenied)?;
    let commitments: HashMap<&str, &G1> =
        ct.e.iter().map(|(name, element)| (name.as_str(), element)).collect();
    recover_node(&pruned, &sk.d, &commitments)
}

fn recover_node(
    node: &PrunedNode,
    d: &[G2],
    commitments: &HashMap<&str, &G1>,
) -> Result<Gt, AbeError> {
    match node {
        PrunedNode::Leaf { index, name } => {
            let share = d
                .get(*index)
                .ok_or_else(|| AbeError::invariant("pruned leaf outside the share tree"))?;
            let commitment = commitments
                .get(name.as_str())
                .ok_or_else(|| AbeError::invariant("pruned leaf lost its commitment"))?;
            Ok(pairing(**commitment, *share))
        }
        PrunedNode::Threshold { children } => {
            let points: Vec<Fr> =
                children.iter().map(|(pos, _)| usize_to_fr(pos + 1)).collect();
            let coefficients = recover_coefficients(&points)?;
            let mut result = Gt::one();
            for ((_, child), coefficient) in children.iter().zip(coefficients) {
                result = result * recover_node(child, d, commitments)?.pow(coefficient);
            }
            Ok(result)
        }
    }
}

/// Hybrid encryption: encapsulates a symmetric key element under the
/// attribute set and encrypts `plaintext` with AES-256-CBC keyed from it.
/// Returns the self-contained container format.
///
/// # Arguments
///
///	* `rng` - the randomness source for the encapsulation
///	* `pk` - a Public Key (PK), generated by the function setup()
///	* `attributes` - the attribute set the data is encrypted under
///	* `plaintext` - plaintext data given as a slice of u8
pub fn encrypt<R: Rng>(
    rng: &mut R,
    pk: &KpAbePublicKey,
    attributes: &[Attribute],
    plaintext: &[u8],
) -> Result<Vec<u8>, AbeError> {
    let (ct, element) = encapsulate(rng, pk, attributes)?;
    let header = ct.as_bytes()?;
    let (payload, iv) = encrypt_symmetric(&element, plaintext)?;
    write_container(&header, plaintext.len() as u64, &iv, &payload)
}

/// Hybrid decryption, the inverse of [`encrypt`]. An unsatisfied policy
/// surfaces as [`AbeError::AccessDenied`]; a damaged container as
/// [`AbeError::MalformedInput`].
///
/// # Arguments
///
///	* `sk` - a Secret Key (SK), generated by the function keygen()
///	* `data` - a hybrid ciphertext container produced by encrypt()
pub fn decrypt(sk: &KpAbeSecretKey, data: &[u8]) -> Result<Vec<u8>, AbeError> {
    let container = parse_container(data)?;
    let ct = KpAbeCiphertext::from_bytes(container.ciphertext)?;
    let element = decapsulate(sk, &ct)?;
    let (_, iv) = derive_key_iv(&element)?;
    if iv != container.iv {
        return Err(AbeError::malformed(
            "initialization vector does not match the encapsulated key",
        ));
    }
    let plaintext_len = usize::try_from(container.plaintext_len)
        .map_err(|_| AbeError::malformed("recorded plaintext length out of range"))?;
    decrypt_symmetric(&element, container.payload, plaintext_len)
}

impl AsBytes for KpAbePublicKey {
    fn as_bytes(&self) -> Result<Vec<u8>, AbeError> {
        if self.universe.len() > MAX_ATTRIBUTES {
            return Err(AbeError::invariant("attribute universe too large to encode"));
        }
        let mut writer = Writer::new(KIND_PUBLIC_KEY);
        writer.put_u32(self.universe.len() as u32);
        for decl in &self.universe {
            put_universe_attribute(&mut writer, decl)?;
        }
        writer.put_element(&self.g1)?;
        writer.put_element(&self.g2)?;
        writer.put_element(&self.e_gg_y)?;
        for (_, base) in &self.attributes {
            writer.put_element(base)?;
        }
        Ok(writer.into_bytes())
    }

    fn from_bytes(data: &[u8]) -> Result<Self, AbeError> {
        let mut reader = Reader::new(data, KIND_PUBLIC_KEY)?;
        let count = reader.take_u32()? as usize;
        if count == 0 || count > MAX_ATTRIBUTES {
            return Err(AbeError::malformed("attribute count out of range"));
        }
        let mut universe = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            universe.push(take_universe_attribute(&mut reader)?);
        }
        validate_universe(&universe)?;
        let g1: G1 = reader.take_element()?;
        let g2: G2 = reader.take_element()?;
        let e_gg_y: Gt = reader.take_element()?;
        let mut attributes = Vec::new();
        for decl in &universe {
            for name in decl.expand() {
                attributes.push((name, reader.take_element::<G1>()?));
            }
        }
        reader.finish()?;
        Ok(KpAbePublicKey { g1, g2, e_gg_y, universe, attributes })
    }
}

impl AsBytes for KpAbeMasterKey {
    fn as_bytes(&self) -> Result<Vec<u8>, AbeError> {
        if self.universe.len() > MAX_ATTRIBUTES {
            return Err(AbeError::invariant("attribute universe too large to encode"));
        }
        let mut writer = Writer::new(KIND_MASTER_KEY);
        writer.put_u32(self.universe.len() as u32);
        for decl in &self.universe {
            put_universe_attribute(&mut writer, decl)?;
        }
        writer.put_element(&self.y)?;
        for (_, secret) in &self.t {
            writer.put_element(secret)?;
        }
        Ok(writer.into_bytes())
    }

    fn from_bytes(data: &[u8]) -> Result<Self, AbeError> {
        let mut reader = Reader::new(data, KIND_MASTER_KEY)?;
        let count = reader.take_u32()? as usize;
        if count == 0 || count > MAX_ATTRIBUTES {
            return Err(AbeError::malformed("attribute count out of range"));
        }
        let mut universe = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            universe.push(take_universe_attribute(&mut reader)?);
        }
        validate_universe(&universe)?;
        let y: Fr = reader.take_element()?;
        let mut t = Vec::new();
        for decl in &universe {
            for name in decl.expand() {
                t.push((name, reader.take_element::<Fr>()?));
            }
        }
        reader.finish()?;
        Ok(KpAbeMasterKey { y, universe, t })
    }
}

impl AsBytes for KpAbeSecretKey {
    fn as_bytes(&self) -> Result<Vec<u8>, AbeError> {
        let mut writer = Writer::new(KIND_SECRET_KEY);
        put_policy(&mut writer, &self.policy)?;
        writer.put_u32(self.d.len() as u32);
        for share in &self.d {
            writer.put_element(share)?;
        }
        Ok(writer.into_bytes())
    }

    fn from_bytes(data: &[u8]) -> Result<Self, AbeError> {
        let mut reader = Reader::new(data, KIND_SECRET_KEY)?;
        let policy = take_policy(&mut reader)?;
        let count = reader.take_u32()? as usize;
        if count != policy.normalize().leaf_count() {
            return Err(AbeError::malformed("share count does not match the policy"));
        }
        let mut d = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            d.push(reader.take_element::<G2>()?);
        }
        reader.finish()?;
        Ok(KpAbeSecretKey { policy, d })
    }
}

impl AsBytes for KpAbeCiphertext {
    fn as_bytes(&self) -> Result<Vec<u8>, AbeError> {
        if self.attributes.len() > MAX_ATTRIBUTES {
            return Err(AbeError::invariant("attribute set too large to encode"));
        }
        let mut writer = Writer::new(KIND_CIPHERTEXT);
        writer.put_u32(self.attributes.len() as u32);
        for attribute in &self.attributes {
            put_attribute(&mut writer, attribute)?;
        }
        for (_, element) in &self.e {
            writer.put_element(element)?;
        }
        Ok(writer.into_bytes())
    }

    fn from_bytes(data: &[u8]) -> Result<Self, AbeError> {
        let mut reader = Reader::new(data, KIND_CIPHERTEXT)?;
        let count = reader.take_u32()? as usize;
        if count == 0 || count > MAX_ATTRIBUTES {
            return Err(AbeError::malformed("attribute count out of range"));
        }
        let mut attributes = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            attributes.push(take_attribute(&mut reader)?);
        }
        let names = expand_attribute_set(&attributes)?;
        let mut e = Vec::with_capacity(names.len());
        for name in names {
            e.push((name, reader.take_element::<G1>()?));
        }
        reader.finish()?;
        Ok(KpAbeCiphertext { attributes, e })
    }
}
