//! Data model for the elaborated register-map tree.
//!
//! The tree arrives address-resolved: every node carries the `c_*`
//! back-references computed by the layout pass (absolute addresses, sizes,
//! selector/block bit counts). The generators consume those verbatim.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RmError;

pub const BYTE_SIZE: u32 = 8;

/// Position of the least significant set bit, which for the power-of-two
/// sizes the layout pass produces is the log2 of the value.
pub fn ilog2(v: u64) -> u32 {
    assert!(v > 0);
    v.trailing_zeros()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Rw,
    Ro,
    Wo,
    Cst,
}

impl Access {
    pub fn is_writable(self) -> bool {
        matches!(self, Access::Rw | Access::Wo)
    }

    pub fn is_readable(self) -> bool {
        matches!(self, Access::Rw | Access::Ro | Access::Cst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HdlType {
    #[default]
    Reg,
    Wire,
}

/// A per-node extension namespace (`x_hdl` or `x_driver_edge`): a
/// string-keyed map of scalars or nested maps. The set of recognized keys
/// is closed; unknown keys are ignored silently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extensions(pub serde_json::Map<String, Value>);

impl Extensions {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            _ => default,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub lo: u32,
    /// None for a one-bit field.
    #[serde(default)]
    pub hi: Option<u32>,
    #[serde(default)]
    pub hdl_type: HdlType,
    #[serde(default)]
    pub preset: Option<u64>,
    #[serde(default)]
    pub hdl_write_strobe: bool,
    #[serde(default)]
    pub c_rwidth: Option<u32>,
    #[serde(default)]
    pub c_iowidth: Option<u32>,
    #[serde(default)]
    pub c_name: Option<String>,
    #[serde(default)]
    pub x_hdl: Extensions,
    #[serde(default)]
    pub x_driver_edge: Extensions,
    #[serde(skip)]
    pub uid: u32,
}

impl Field {
    /// Width of the field in register bits.
    pub fn width(&self) -> u32 {
        match self.c_rwidth {
            Some(w) => w,
            None => match self.hi {
                Some(hi) => hi - self.lo + 1,
                None => 1,
            },
        }
    }

    /// Name used for HDL ports and signals (the layout pass may supply a
    /// disambiguated `c_name`).
    pub fn hdl_name(&self) -> &str {
        self.c_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reg {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub access: Access,
    /// Word-aligned address relative to the enclosing block.
    pub c_address: u64,
    /// Size in bytes; a power of two and a multiple of the word size.
    pub c_size: u64,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub preset: Option<u64>,
    #[serde(default)]
    pub children: Vec<Field>,
    #[serde(default)]
    pub x_hdl: Extensions,
    #[serde(default)]
    pub x_driver_edge: Extensions,
    #[serde(skip)]
    pub uid: u32,
}

impl Reg {
    pub fn has_fields(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width.unwrap_or(self.c_size as u32 * BYTE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub c_address: u64,
    pub c_size: u64,
    #[serde(default)]
    pub c_sel_bits: u32,
    #[serde(default)]
    pub c_blk_bits: u32,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default)]
    pub x_hdl: Extensions,
    #[serde(default)]
    pub x_driver_edge: Extensions,
    #[serde(skip)]
    pub uid: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submap {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub c_address: u64,
    pub c_size: u64,
    /// Bus protocol spoken by the sub-map, or "include" to inline it.
    pub interface: String,
    /// The referenced root, elaborated in place by the front-end. None for
    /// a generic sub-map declared by interface only.
    #[serde(default)]
    pub submap: Option<Box<Root>>,
    #[serde(default)]
    pub x_hdl: Extensions,
    #[serde(default)]
    pub x_driver_edge: Extensions,
    #[serde(skip)]
    pub uid: u32,
}

impl Submap {
    pub fn is_include(&self) -> bool {
        self.interface == "include"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeat {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub c_address: u64,
    pub c_size: u64,
    pub count: u64,
    pub c_elsize: u64,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default)]
    pub x_hdl: Extensions,
    #[serde(default)]
    pub x_driver_edge: Extensions,
    #[serde(skip)]
    pub uid: u32,
}

impl Repeat {
    /// A repeat over a single register is RAM-backed.
    pub fn as_reg_array(&self) -> Option<&Reg> {
        match self.children.as_slice() {
            [Node::Reg(r)] => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub c_address: u64,
    pub c_size: u64,
    pub c_depth: u64,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default)]
    pub x_hdl: Extensions,
    #[serde(default)]
    pub x_driver_edge: Extensions,
    #[serde(skip)]
    pub uid: u32,
}

impl Memory {
    /// The single inner register describing one memory word.
    pub fn word_reg(&self) -> Option<&Reg> {
        match self.children.as_slice() {
            [Node::Reg(r)] => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum Node {
    Reg(Reg),
    Block(Block),
    Submap(Submap),
    Repeat(Repeat),
    Memory(Memory),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Reg(n) => &n.name,
            Node::Block(n) => &n.name,
            Node::Submap(n) => &n.name,
            Node::Repeat(n) => &n.name,
            Node::Memory(n) => &n.name,
        }
    }

    pub fn c_address(&self) -> u64 {
        match self {
            Node::Reg(n) => n.c_address,
            Node::Block(n) => n.c_address,
            Node::Submap(n) => n.c_address,
            Node::Repeat(n) => n.c_address,
            Node::Memory(n) => n.c_address,
        }
    }

    pub fn c_size(&self) -> u64 {
        match self {
            Node::Reg(n) => n.c_size,
            Node::Block(n) => n.c_size,
            Node::Submap(n) => n.c_size,
            Node::Repeat(n) => n.c_size,
            Node::Memory(n) => n.c_size,
        }
    }

    pub fn x_driver_edge(&self) -> &Extensions {
        match self {
            Node::Reg(n) => &n.x_driver_edge,
            Node::Block(n) => &n.x_driver_edge,
            Node::Submap(n) => &n.x_driver_edge,
            Node::Repeat(n) => &n.x_driver_edge,
            Node::Memory(n) => &n.x_driver_edge,
        }
    }
}

/// Top of an elaborated map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub bus: String,
    /// Bytes per bus word.
    pub c_word_size: u32,
    #[serde(default)]
    pub c_word_bits: u32,
    #[serde(default)]
    pub c_addr_bits: u32,
    pub c_sel_bits: u32,
    pub c_blk_bits: u32,
    #[serde(default)]
    pub c_addr_word_bits: u32,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default)]
    pub x_hdl: Extensions,
    #[serde(default)]
    pub x_driver_edge: Extensions,
    #[serde(skip)]
    pub uid: u32,
}

impl Root {
    /// Fill the fields derivable from `c_word_size` when the producer left
    /// them at zero, and give every node a uid. Uids key the side tables
    /// the HDL generator decorates the tree with, so `prepare` must run
    /// before generation. Numbering is deterministic (pre-order), which
    /// keeps repeated generation on the same tree byte-identical.
    pub fn prepare(&mut self) {
        let mut next = 1u32;
        prepare_root(self, &mut next);
    }
}

fn prepare_root(root: &mut Root, next: &mut u32) {
    if root.c_addr_word_bits == 0 {
        root.c_addr_word_bits = ilog2(root.c_word_size as u64);
    }
    if root.c_word_bits == 0 {
        root.c_word_bits = root.c_word_size * BYTE_SIZE;
    }
    if root.c_addr_bits == 0 {
        root.c_addr_bits = root.c_sel_bits + root.c_blk_bits;
    }
    root.uid = take_uid(next);
    for child in &mut root.children {
        prepare_node(child, next);
    }
}

fn prepare_node(node: &mut Node, next: &mut u32) {
    match node {
        Node::Reg(r) => {
            r.uid = take_uid(next);
            for f in &mut r.children {
                f.uid = take_uid(next);
            }
        }
        Node::Block(b) => {
            b.uid = take_uid(next);
            for child in &mut b.children {
                prepare_node(child, next);
            }
        }
        Node::Submap(s) => {
            s.uid = take_uid(next);
            if let Some(sub) = &mut s.submap {
                prepare_root(sub, next);
            }
        }
        Node::Repeat(r) => {
            r.uid = take_uid(next);
            for child in &mut r.children {
                prepare_node(child, next);
            }
        }
        Node::Memory(m) => {
            m.uid = take_uid(next);
            for child in &mut m.children {
                prepare_node(child, next);
            }
        }
    }
}

fn take_uid(next: &mut u32) -> u32 {
    let uid = *next;
    *next += 1;
    uid
}

/// Parse an elaborated map from its JSON form.
pub fn root_from_json(src: &str) -> Result<Root, RmError> {
    let mut root: Root =
        serde_json::from_str(src).map_err(|e| RmError::from(format!("bad map: {}", e)))?;
    root.prepare();
    Ok(root)
}

/// Load an elaborated map from a JSON file.
pub fn load_root(path: &Path) -> Result<Root, RmError> {
    let src = fs::read_to_string(path)?;
    root_from_json(&src)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_simple_map() {
        let src = r#"{
            "name": "m1",
            "bus": "wb-32-be",
            "c_word_size": 4,
            "c_sel_bits": 0,
            "c_blk_bits": 3,
            "children": [
                {"node": "reg", "name": "a", "access": "rw",
                 "c_address": 0, "c_size": 4,
                 "children": [{"name": "f", "lo": 0, "hi": 31}]},
                {"node": "reg", "name": "b", "access": "ro",
                 "c_address": 4, "c_size": 4}
            ]
        }"#;
        let root = root_from_json(src).unwrap();
        assert_eq!(root.c_word_bits, 32);
        assert_eq!(root.c_addr_word_bits, 2);
        assert_eq!(root.c_addr_bits, 3);
        assert_eq!(root.children.len(), 2);
        match &root.children[0] {
            Node::Reg(r) => {
                assert_eq!(r.access, Access::Rw);
                assert_eq!(r.children[0].width(), 32);
                assert_ne!(r.uid, 0);
                assert_ne!(r.children[0].uid, 0);
            }
            _ => panic!("expected a reg"),
        }
    }

    #[test]
    fn extensions_defaults() {
        let src = r#"{
            "name": "m1",
            "bus": "wb-32-be",
            "c_word_size": 4,
            "c_sel_bits": 0,
            "c_blk_bits": 2,
            "children": [
                {"node": "reg", "name": "a", "access": "rw",
                 "c_address": 0, "c_size": 4,
                 "x_driver_edge": {"generate": false}}
            ]
        }"#;
        let root = root_from_json(src).unwrap();
        let ext = root.children[0].x_driver_edge();
        assert!(!ext.get_bool("generate", true));
        assert!(ext.get_bool("block-prefix", true));
        assert!(root.x_hdl.is_empty());
    }

    #[test]
    fn field_width_rules() {
        let one_bit = Field {
            name: String::from("en"),
            description: None,
            lo: 3,
            hi: None,
            hdl_type: HdlType::Reg,
            preset: None,
            hdl_write_strobe: false,
            c_rwidth: None,
            c_iowidth: None,
            c_name: None,
            x_hdl: Extensions::default(),
            x_driver_edge: Extensions::default(),
            uid: 0,
        };
        assert_eq!(one_bit.width(), 1);
        let mut ranged = one_bit.clone();
        ranged.hi = Some(10);
        assert_eq!(ranged.width(), 8);
        ranged.c_rwidth = Some(6);
        assert_eq!(ranged.width(), 6);
    }

    #[test]
    fn ilog2_powers() {
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(4), 2);
        assert_eq!(ilog2(1024), 10);
    }
}
