//! Canonical byte encodings.
//!
//! Every persisted object is a kind tag, a format version, structural
//! metadata (counts, thresholds, attribute descriptors) and finally the
//! group elements in pre-order. All integers are big-endian; every length
//! field is bound-checked before it is used; structural validation happens
//! before the first group element is decoded. Any violation surfaces as
//! [`AbeError::MalformedInput`], never as a default value.
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::AbeError;
use crate::utils::aes::IV_LEN;
use crate::utils::policy::{
    check_name, check_numeric, Attribute, CompareOp, PolicyLeaf, PolicyNode, UniverseAttribute,
    MAX_NAME_LEN,
};

pub(crate) const FORMAT_VERSION: u8 = 1;

pub(crate) const KIND_PUBLIC_KEY: u8 = 1;
pub(crate) const KIND_MASTER_KEY: u8 = 2;
pub(crate) const KIND_SECRET_KEY: u8 = 3;
pub(crate) const KIND_CIPHERTEXT: u8 = 4;

pub(crate) const MAX_ATTRIBUTES: usize = 1 << 16;
pub(crate) const MAX_CHILDREN: usize = 1 << 16;
pub(crate) const MAX_DEPTH: usize = 512;
pub(crate) const MAX_ELEMENT_LEN: usize = 4096;

const NODE_ATTR: u8 = 0;
const NODE_COMPARE: u8 = 1;
const NODE_THRESHOLD: u8 = 2;

const ATTR_BARE: u8 = 0;
const ATTR_NUMERIC: u8 = 1;

/// Canonical serialization of the persisted object kinds.
pub trait AsBytes: Sized {
    fn as_bytes(&self) -> Result<Vec<u8>, AbeError>;
    fn from_bytes(data: &[u8]) -> Result<Self, AbeError>;
}

pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new(kind: u8) -> Writer {
        Writer { buf: vec![kind, FORMAT_VERSION] }
    }

    pub fn raw() -> Writer {
        Writer { buf: Vec::new() }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, s: &str) -> Result<(), AbeError> {
        if s.len() > MAX_NAME_LEN {
            return Err(AbeError::invariant("attribute name too long to encode"));
        }
        self.put_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    pub fn put_element<T: Serialize>(&mut self, element: &T) -> Result<(), AbeError> {
        let encoded = bincode::serialize(element)
            .map_err(|_| AbeError::invariant("group element encoding failed"))?;
        if encoded.is_empty() || encoded.len() > MAX_ELEMENT_LEN {
            return Err(AbeError::invariant("group element encoding has an unusable length"));
        }
        self.put_u32(encoded.len() as u32);
        self.buf.extend_from_slice(&encoded);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], kind: u8) -> Result<Reader<'a>, AbeError> {
        let mut reader = Reader::raw(data);
        let tag = reader.take_u8()?;
        if tag != kind {
            return Err(AbeError::malformed("unexpected object kind"));
        }
        let version = reader.take_u8()?;
        if version != FORMAT_VERSION {
            return Err(AbeError::malformed(format!("unsupported format version {}", version)));
        }
        Ok(reader)
    }

    pub fn raw(data: &'a [u8]) -> Reader<'a> {
        Reader { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AbeError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or_else(|| AbeError::malformed("length field overflows"))?;
        if end > self.data.len() {
            return Err(AbeError::malformed("truncated input"));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn take_u8(&mut self) -> Result<u8, AbeError> {
        Ok(self.take(1)?[0])
    }

    pub fn take_u16(&mut self) -> Result<u16, AbeError> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(raw))
    }

    pub fn take_u32(&mut self) -> Result<u32, AbeError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    pub fn take_u64(&mut self) -> Result<u64, AbeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn take_str(&mut self) -> Result<String, AbeError> {
        let len = self.take_u16()? as usize;
        if len > MAX_NAME_LEN {
            return Err(AbeError::malformed("attribute name too long"));
        }
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn take_element<T: DeserializeOwned>(&mut self) -> Result<T, AbeError> {
        let len = self.take_u32()? as usize;
        if len == 0 || len > MAX_ELEMENT_LEN {
            return Err(AbeError::malformed("group element length out of range"));
        }
        let bytes = self.take(len)?;
        bincode::deserialize(bytes).map_err(|_| AbeError::malformed("group element decoding failed"))
    }

    pub fn take_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    pub fn finish(self) -> Result<(), AbeError> {
        if self.pos != self.data.len() {
            return Err(AbeError::malformed("trailing bytes after object"));
        }
        Ok(())
    }
}

fn op_tag(op: CompareOp) -> u8 {
    match op {
        CompareOp::Lt => 0,
        CompareOp::Gt => 1,
        CompareOp::Le => 2,
        CompareOp::Ge => 3,
        CompareOp::Eq => 4,
    }
}

fn op_from_tag(tag: u8) -> Result<CompareOp, AbeError> {
    match tag {
        0 => Ok(CompareOp::Lt),
        1 => Ok(CompareOp::Gt),
        2 => Ok(CompareOp::Le),
        3 => Ok(CompareOp::Ge),
        4 => Ok(CompareOp::Eq),
        _ => Err(AbeError::malformed("unknown comparison operator tag")),
    }
}

pub(crate) fn put_policy(writer: &mut Writer, node: &PolicyNode) -> Result<(), AbeError> {
    put_policy_node(writer, node, 0)
}

fn put_policy_node(writer: &mut Writer, node: &PolicyNode, depth: usize) -> Result<(), AbeError> {
    if depth > MAX_DEPTH {
        return Err(AbeError::invariant("policy tree too deep to encode"));
    }
    match node {
        PolicyNode::Leaf(PolicyLeaf::Attr(name)) => {
            writer.put_u8(NODE_ATTR);
            writer.put_str(name)
        }
        PolicyNode::Leaf(PolicyLeaf::Compare { name, op, value, bits }) => {
            writer.put_u8(NODE_COMPARE);
            writer.put_str(name)?;
            writer.put_u8(op_tag(*op));
            writer.put_u64(*value);
            writer.put_u8(*bits);
            Ok(())
        }
        PolicyNode::Threshold { k, children } => {
            if children.len() > MAX_CHILDREN {
                return Err(AbeError::invariant("threshold node too wide to encode"));
            }
            writer.put_u8(NODE_THRESHOLD);
            writer.put_u32(*k as u32);
            writer.put_u32(children.len() as u32);
            for child in children {
                put_policy_node(writer, child, depth + 1)?;
            }
            Ok(())
        }
    }
}

pub(crate) fn take_policy(reader: &mut Reader) -> Result<PolicyNode, AbeError> {
    take_policy_node(reader, 0)
}

fn take_policy_node(reader: &mut Reader, depth: usize) -> Result<PolicyNode, AbeError> {
    if depth > MAX_DEPTH {
        return Err(AbeError::malformed("policy tree too deep"));
    }
    match reader.take_u8()? {
        NODE_ATTR => {
            let name = reader.take_str()?;
            check_name(&name).map_err(AbeError::malformed)?;
            Ok(PolicyNode::Leaf(PolicyLeaf::Attr(name)))
        }
        NODE_COMPARE => {
            let name = reader.take_str()?;
            check_name(&name).map_err(AbeError::malformed)?;
            let op = op_from_tag(reader.take_u8()?)?;
            let value = reader.take_u64()?;
            let bits = reader.take_u8()?;
            check_numeric(value, bits).map_err(AbeError::malformed)?;
            Ok(PolicyNode::Leaf(PolicyLeaf::Compare { name, op, value, bits }))
        }
        NODE_THRESHOLD => {
            let k = reader.take_u32()? as usize;
            let len = reader.take_u32()? as usize;
            if len == 0 || len > MAX_CHILDREN {
                return Err(AbeError::malformed("threshold child count out of range"));
            }
            if k < 1 || k > len {
                return Err(AbeError::malformed(format!(
                    "threshold {} out of range for {} children",
                    k, len
                )));
            }
            let mut children = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                children.push(take_policy_node(reader, depth + 1)?);
            }
            Ok(PolicyNode::Threshold { k, children })
        }
        _ => Err(AbeError::malformed("unknown policy node tag")),
    }
}

pub(crate) fn put_attribute(writer: &mut Writer, attribute: &Attribute) -> Result<(), AbeError> {
    match attribute {
        Attribute::Bare(name) => {
            writer.put_u8(ATTR_BARE);
            writer.put_str(name)
        }
        Attribute::Numeric { name, value, bits } => {
            writer.put_u8(ATTR_NUMERIC);
            writer.put_str(name)?;
            writer.put_u64(*value);
            writer.put_u8(*bits);
            Ok(())
        }
    }
}

pub(crate) fn take_attribute(reader: &mut Reader) -> Result<Attribute, AbeError> {
    let attribute = match reader.take_u8()? {
        ATTR_BARE => Attribute::Bare(reader.take_str()?),
        ATTR_NUMERIC => {
            let name = reader.take_str()?;
            let value = reader.take_u64()?;
            let bits = reader.take_u8()?;
            Attribute::Numeric { name, value, bits }
        }
        _ => return Err(AbeError::malformed("unknown attribute descriptor tag")),
    };
    attribute.validate()?;
    Ok(attribute)
}

pub(crate) fn put_universe_attribute(
    writer: &mut Writer,
    decl: &UniverseAttribute,
) -> Result<(), AbeError> {
    match decl {
        UniverseAttribute::Bare(name) => {
            writer.put_u8(ATTR_BARE);
            writer.put_str(name)
        }
        UniverseAttribute::Numeric { name, bits } => {
            writer.put_u8(ATTR_NUMERIC);
            writer.put_str(name)?;
            writer.put_u8(*bits);
            Ok(())
        }
    }
}

pub(crate) fn take_universe_attribute(reader: &mut Reader) -> Result<UniverseAttribute, AbeError> {
    let decl = match reader.take_u8()? {
        ATTR_BARE => UniverseAttribute::Bare(reader.take_str()?),
        ATTR_NUMERIC => {
            let name = reader.take_str()?;
            let bits = reader.take_u8()?;
            UniverseAttribute::Numeric { name, bits }
        }
        _ => return Err(AbeError::malformed("unknown attribute descriptor tag")),
    };
    decl.validate()?;
    Ok(decl)
}

/// The hybrid ciphertext container of the file-encryption wrapper:
/// `[u32 ciphertext length][ciphertext][u64 plaintext length][iv][payload]`.
pub(crate) struct HybridContainer<'a> {
    pub ciphertext: &'a [u8],
    pub plaintext_len: u64,
    pub iv: [u8; IV_LEN],
    pub payload: &'a [u8],
}

pub(crate) fn write_container(
    ciphertext: &[u8],
    plaintext_len: u64,
    iv: &[u8; IV_LEN],
    payload: &[u8],
) -> Result<Vec<u8>, AbeError> {
    if ciphertext.len() > u32::MAX as usize {
        return Err(AbeError::invariant("ciphertext too large for the container"));
    }
    let mut writer = Writer::raw();
    writer.put_u32(ciphertext.len() as u32);
    writer.put_bytes(ciphertext);
    writer.put_u64(plaintext_len);
    writer.put_bytes(iv);
    writer.put_bytes(payload);
    Ok(writer.into_bytes())
}

pub(crate) fn parse_container(data: &[u8]) -> Result<HybridContainer, AbeError> {
    let mut reader = Reader::raw(data);
    let ciphertext_len = reader.take_u32()? as usize;
    let ciphertext = reader.take(ciphertext_len)?;
    let plaintext_len = reader.take_u64()?;
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(reader.take(IV_LEN)?);
    let payload = reader.take_rest();
    Ok(HybridContainer { ciphertext, plaintext_len, iv, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut writer = Writer::new(KIND_CIPHERTEXT);
        writer.put_u8(7);
        writer.put_u32(1 << 20);
        writer.put_u64(u64::MAX - 1);
        writer.put_str("attr_name").unwrap();
        let bytes = writer.into_bytes();

        let mut reader = Reader::new(&bytes, KIND_CIPHERTEXT).unwrap();
        assert_eq!(reader.take_u8().unwrap(), 7);
        assert_eq!(reader.take_u32().unwrap(), 1 << 20);
        assert_eq!(reader.take_u64().unwrap(), u64::MAX - 1);
        assert_eq!(reader.take_str().unwrap(), "attr_name");
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_kind_and_version_checks() {
        let bytes = Writer::new(KIND_PUBLIC_KEY).into_bytes();
        assert!(matches!(
            Reader::new(&bytes, KIND_MASTER_KEY),
            Err(AbeError::MalformedInput(_))
        ));
        let bad_version = vec![KIND_PUBLIC_KEY, FORMAT_VERSION + 1];
        assert!(Reader::new(&bad_version, KIND_PUBLIC_KEY).is_err());
        assert!(Reader::new(&[], KIND_PUBLIC_KEY).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Writer::new(KIND_PUBLIC_KEY).into_bytes();
        bytes.push(0);
        let reader = Reader::new(&bytes, KIND_PUBLIC_KEY).unwrap();
        assert!(matches!(reader.finish(), Err(AbeError::MalformedInput(_))));
    }

    #[test]
    fn test_policy_roundtrip() {
        let policy = PolicyNode::threshold(2, vec![
            PolicyNode::attr("dept_eng"),
            PolicyNode::attr("dept_ops"),
            PolicyNode::compare("level", CompareOp::Gt, 5, 8),
        ]);
        let mut writer = Writer::raw();
        put_policy(&mut writer, &policy).unwrap();
        let bytes = writer.into_bytes();
        let mut reader = Reader::raw(&bytes);
        let decoded = take_policy(&mut reader).unwrap();
        assert!(reader.finish().is_ok());
        assert_eq!(decoded, policy);
    }

    #[test]
    fn test_policy_rejects_bad_threshold() {
        // threshold node claiming k = 0 over one leaf
        let mut writer = Writer::raw();
        writer.put_u8(2); // NODE_THRESHOLD
        writer.put_u32(0);
        writer.put_u32(1);
        writer.put_u8(0); // NODE_ATTR
        writer.put_str("a").unwrap();
        let bytes = writer.into_bytes();
        let mut reader = Reader::raw(&bytes);
        assert!(matches!(take_policy(&mut reader), Err(AbeError::MalformedInput(_))));

        // and k larger than the child count
        let mut writer = Writer::raw();
        writer.put_u8(2);
        writer.put_u32(3);
        writer.put_u32(1);
        writer.put_u8(0);
        writer.put_str("a").unwrap();
        let bytes = writer.into_bytes();
        let mut reader = Reader::raw(&bytes);
        assert!(matches!(take_policy(&mut reader), Err(AbeError::MalformedInput(_))));
    }

    #[test]
    fn test_policy_rejects_unknown_tag() {
        let bytes = [9u8];
        let mut reader = Reader::raw(&bytes);
        assert!(matches!(take_policy(&mut reader), Err(AbeError::MalformedInput(_))));
    }

    #[test]
    fn test_policy_rejects_depth_bomb() {
        // a chain of single-child thresholds deeper than the decoder allows
        let mut writer = Writer::raw();
        for _ in 0..(MAX_DEPTH + 2) {
            writer.put_u8(2);
            writer.put_u32(1);
            writer.put_u32(1);
        }
        writer.put_u8(0);
        writer.put_str("a").unwrap();
        let bytes = writer.into_bytes();
        let mut reader = Reader::raw(&bytes);
        assert!(matches!(take_policy(&mut reader), Err(AbeError::MalformedInput(_))));
    }

    #[test]
    fn test_attribute_roundtrip() {
        for attribute in [
            Attribute::bare("sysadmin"),
            Attribute::numeric("level", 9, 8),
            Attribute::numeric("stamp", u64::MAX, 64),
        ] {
            let mut writer = Writer::raw();
            put_attribute(&mut writer, &attribute).unwrap();
            let bytes = writer.into_bytes();
            let mut reader = Reader::raw(&bytes);
            assert_eq!(take_attribute(&mut reader).unwrap(), attribute);
            assert!(reader.finish().is_ok());
        }
    }

    #[test]
    fn test_attribute_rejects_bad_width() {
        // numeric attribute whose value does not fit its bit-width
        let mut writer = Writer::raw();
        writer.put_u8(1); // ATTR_NUMERIC
        writer.put_str("level").unwrap();
        writer.put_u64(300);
        writer.put_u8(8);
        let bytes = writer.into_bytes();
        let mut reader = Reader::raw(&bytes);
        assert!(matches!(take_attribute(&mut reader), Err(AbeError::MalformedInput(_))));
    }

    #[test]
    fn test_container_roundtrip() {
        let iv = [3u8; IV_LEN];
        let bytes = write_container(b"ciphertext", 42, &iv, b"payload").unwrap();
        let container = parse_container(&bytes).unwrap();
        assert_eq!(container.ciphertext, b"ciphertext");
        assert_eq!(container.plaintext_len, 42);
        assert_eq!(container.iv, iv);
        assert_eq!(container.payload, b"payload");
    }

    #[test]
    fn test_container_truncation() {
        let iv = [0u8; IV_LEN];
        let bytes = write_container(b"ciphertext", 7, &iv, b"p").unwrap();
        // the header itself must never be readable from a short prefix
        for cut in 0..(4 + b"ciphertext".len() + 8 + IV_LEN) {
            assert!(matches!(
                parse_container(&bytes[..cut]),
                Err(AbeError::MalformedInput(_))
            ));
        }
        // an oversized inner length must not read out of bounds
        let mut oversized = bytes.clone();
        oversized[..4].copy_from_slice(&(u32::MAX).to_be_bytes());
        assert!(parse_container(&oversized).is_err());
    }
}
