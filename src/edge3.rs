//! Edge3 driver table generation.
//!
//! A second walk of the elaborated tree materializes block, block-instance,
//! interrupt-controller and register-role tables, rendered as aligned CSV.
//! Every table is built in memory first; nothing is written to the output
//! stream until the whole description has been accepted, so a rejected map
//! produces no partial file.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write;

use serde_json::Value;

use crate::error::RmError;
use crate::tree::{Access, Node, Reg, Root, BYTE_SIZE};

const BLOCK_TITLES: [&str; 10] = [
    "block_def_name",
    "type",
    "name",
    "offset",
    "rwmode",
    "dwidth",
    "depth",
    "mask",
    "flags",
    "description",
];

fn access_mode(access: Access) -> &'static str {
    match access {
        Access::Rw => "rw",
        Access::Ro | Access::Cst => "r",
        Access::Wo => "w",
    }
}

/// Clean a description string so that it is OK for a CSV field: keep only
/// the first line and replace commas with spaces.
fn clean_string(desc: Option<&str>) -> String {
    match desc {
        None => String::new(),
        Some(d) => d
            .lines()
            .next()
            .unwrap_or("")
            .replace(',', " "),
    }
}

/// Render the recognized argument keys of an extension map as
/// `key=0x..` pairs, dashes turned into underscores.
fn clean_args(args: Option<&Value>, keys: &[&str]) -> String {
    let args = match args {
        Some(a) => a,
        None => return String::new(),
    };
    let mut parts = Vec::new();
    for key in keys {
        if let Some(v) = args.get(key).and_then(Value::as_u64) {
            parts.push(format!("{}={:#x}", key.replace('-', "_"), v));
        }
    }
    parts.join(" ")
}

// ========= CSV RENDERING ========== //

/// One cell per title; the terminal cell is written bare with a leading
/// space (an empty value still leaves the lone space behind), the others
/// are right-padded to the column width and comma-terminated.
fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    for (i, (cell, width)) in cells.iter().zip(widths.iter()).enumerate() {
        if i + 1 == cells.len() {
            let _ = write!(out, " {}", cell);
        } else {
            let _ = write!(out, " {:>w$},", cell, w = *width);
        }
    }
    out.push('\n');
}

struct CsvTable {
    header: &'static str,
    titles: &'static [&'static str],
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    fn new(header: &'static str, titles: &'static [&'static str]) -> Self {
        CsvTable {
            header,
            titles,
            rows: Vec::new(),
        }
    }

    fn append(&mut self, row: Vec<String>) {
        assert_eq!(row.len(), self.titles.len());
        self.rows.push(row);
    }

    fn count(&self) -> usize {
        self.rows.len()
    }

    fn write(&self, out: &mut String) {
        let mut widths: Vec<usize> = self.titles.iter().map(|t| t.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }
        out.push_str(self.header);
        out.push('\n');
        let titles: Vec<String> = self.titles.iter().map(|t| String::from(*t)).collect();
        write_row(out, &titles, &widths);
        for row in &self.rows {
            write_row(out, row, &widths);
        }
        out.push('\n');
    }

    fn write_if_needed(&self, out: &mut String) {
        if self.count() != 0 {
            self.write(out);
        }
    }
}

// ========= BLOCK TABLE ROWS ========== //

#[derive(Debug, Clone)]
struct IntcSpec {
    name: String,
    typ: String,
    chained_name: String,
    chained_mask: String,
    args: String,
    description: String,
}

#[derive(Debug, Clone)]
struct RoleSpec {
    role: String,
    args: String,
}

#[derive(Debug, Clone)]
struct EdgeReg {
    block_def_name: String,
    name: String,
    offset: String,
    rwmode: String,
    dwidth: String,
    depth: String,
    mask: String,
    flags: String,
    description: String,
    intcs: Vec<IntcSpec>,
    role: Option<RoleSpec>,
}

#[derive(Debug, Clone)]
struct EdgeBlockInst {
    block_def_name: String,
    typ: String,
    name: String,
    offset: String,
    description: String,
}

#[derive(Debug, Clone)]
enum EdgeRow {
    Reg(EdgeReg),
    BlockInst(EdgeBlockInst),
}

impl EdgeRow {
    fn col(&self, title: &str) -> &str {
        match self {
            EdgeRow::Reg(r) => match title {
                "block_def_name" => &r.block_def_name,
                "type" => "REG",
                "name" => &r.name,
                "offset" => &r.offset,
                "rwmode" => &r.rwmode,
                "dwidth" => &r.dwidth,
                "depth" => &r.depth,
                "mask" => &r.mask,
                "flags" => &r.flags,
                "description" => &r.description,
                _ => "",
            },
            EdgeRow::BlockInst(b) => match title {
                "block_def_name" => &b.block_def_name,
                "type" => &b.typ,
                "name" => &b.name,
                "offset" => &b.offset,
                "description" => &b.description,
                _ => "",
            },
        }
    }
}

fn parse_intcs(reg: &Reg) -> Result<Vec<IntcSpec>, RmError> {
    let list = match reg.x_driver_edge.get("interrupt-controllers") {
        Some(Value::Array(list)) => list,
        _ => return Ok(Vec::new()),
    };
    let mut out = Vec::new();
    for item in list {
        let ic = match item.get("interrupt-controller") {
            Some(ic) => ic,
            None => continue,
        };
        let typ = ic.get("type").and_then(Value::as_str).unwrap_or("");
        if typ != "INTC_SR" && typ != "INTC_CR" {
            return Err(RmError::unsupported(&format!(
                "unknown interrupt-controller type {}",
                typ
            )));
        }
        let (chained_name, chained_mask) = match ic.get("chained") {
            Some(ch) => (
                String::from(ch.get("name").and_then(Value::as_str).unwrap_or("")),
                match ch.get("mask").and_then(Value::as_u64) {
                    Some(m) => format!("{:#x}", m),
                    None => String::new(),
                },
            ),
            None => (String::new(), String::new()),
        };
        out.push(IntcSpec {
            name: String::from(ic.get("name").and_then(Value::as_str).unwrap_or("")),
            typ: String::from(typ),
            chained_name,
            chained_mask,
            args: clean_args(ic.get("args"), &["enable-mask", "ack-mask"]),
            description: clean_string(ic.get("description").and_then(Value::as_str)),
        });
    }
    Ok(out)
}

fn parse_role(reg: &Reg) -> Result<Option<RoleSpec>, RmError> {
    let role = match reg.x_driver_edge.get("reg-role") {
        Some(r) => r,
        None => return Ok(None),
    };
    let typ = role.get("type").and_then(Value::as_str).unwrap_or("");
    let args = match typ {
        "IRQ_V" | "IRQ_L" => String::new(),
        "ASSERT" => clean_args(role.get("args"), &["min-val", "max-val"]),
        _ => {
            return Err(RmError::unsupported(&format!(
                "unknown reg-role {}",
                typ
            )))
        }
    };
    Ok(Some(RoleSpec {
        role: String::from(typ),
        args,
    }))
}

// ========= ENCORE ========== //

struct EncoreBlock {
    block_name: String,
    rows: Vec<EdgeRow>,
}

struct Encore {
    blocks: Vec<EncoreBlock>,
    /// Indices of blocks registered under a fresh name; a duplicate block
    /// definition is built but never written.
    order: Vec<usize>,
    names: HashSet<String>,
    top: usize,
}

impl Encore {
    fn new() -> Self {
        Encore {
            blocks: Vec::new(),
            order: Vec::new(),
            names: HashSet::new(),
            top: 0,
        }
    }

    fn new_block(&mut self, name: &str) -> usize {
        let idx = self.blocks.len();
        self.blocks.push(EncoreBlock {
            block_name: String::from(name),
            rows: Vec::new(),
        });
        if self.names.insert(String::from(name)) {
            self.order.push(idx);
        }
        idx
    }

    /// One REG row for the register itself, plus one row per field with
    /// the field mask.
    #[allow(clippy::too_many_arguments)]
    fn append_reg(
        &mut self,
        blk: usize,
        reg: &Reg,
        name: &str,
        offset: u64,
        flags: &str,
        depth: u64,
        desc: Option<&str>,
    ) -> Result<(), RmError> {
        let block_def_name = self.blocks[blk].block_name.clone();
        let rwmode = String::from(access_mode(reg.access));
        let dwidth = (BYTE_SIZE as u64 * reg.c_size).to_string();
        let depth_str = format!("{:#x}", depth);
        let row = EdgeReg {
            block_def_name: block_def_name.clone(),
            name: String::from(name),
            offset: format!("{:#x}", reg.c_address + offset),
            rwmode: rwmode.clone(),
            dwidth: dwidth.clone(),
            depth: depth_str.clone(),
            mask: String::new(),
            flags: String::from(flags),
            description: clean_string(desc.or(reg.description.as_deref())),
            intcs: parse_intcs(reg)?,
            role: parse_role(reg)?,
        };
        self.blocks[blk].rows.push(EdgeRow::Reg(row));

        for f in &reg.children {
            if !f.x_driver_edge.get_bool("generate", true) {
                continue;
            }
            let mask: u128 = match f.hi {
                None => 1,
                Some(hi) => (2u128 << (hi - f.lo)) - 1,
            };
            let mask = mask << f.lo;
            self.blocks[blk].rows.push(EdgeRow::Reg(EdgeReg {
                block_def_name: block_def_name.clone(),
                name: format!("{}_{}", name, f.name),
                offset: format!("{:#x}", reg.c_address + offset),
                rwmode: rwmode.clone(),
                dwidth: dwidth.clone(),
                depth: depth_str.clone(),
                mask: format!("{:#x}", mask),
                flags: String::from(flags),
                description: clean_string(f.description.as_deref()),
                intcs: Vec::new(),
                role: None,
            }));
        }
        Ok(())
    }

    fn append_block(&mut self, blk: usize, def: usize, name: &str, offset: u64, desc: Option<&str>) {
        let row = EdgeBlockInst {
            block_def_name: self.blocks[blk].block_name.clone(),
            typ: self.blocks[def].block_name.clone(),
            name: String::from(name),
            offset: format!("{:#x}", offset),
            description: clean_string(desc),
        };
        self.blocks[blk].rows.push(EdgeRow::BlockInst(row));
    }

    fn write(&self, out: &mut String) {
        let top = &self.blocks[self.top];
        let top_needed = top.rows.iter().any(|r| matches!(r, EdgeRow::Reg(_)));

        // Maximum width of each column across all block tables.
        let mut widths: Vec<usize> = BLOCK_TITLES.iter().map(|t| t.len()).collect();
        for idx in &self.order {
            for row in &self.blocks[*idx].rows {
                for (i, title) in BLOCK_TITLES.iter().enumerate() {
                    widths[i] = widths[i].max(row.col(title).len());
                }
            }
        }

        let write_block = |out: &mut String, b: &EncoreBlock| {
            out.push_str("#Block table definition\n");
            let titles: Vec<String> = BLOCK_TITLES.iter().map(|t| String::from(*t)).collect();
            write_row(out, &titles, &widths);
            for row in &b.rows {
                let cells: Vec<String> =
                    BLOCK_TITLES.iter().map(|t| String::from(row.col(t))).collect();
                write_row(out, &cells, &widths);
            }
            out.push('\n');
        };

        for idx in &self.order {
            if *idx == self.top {
                continue;
            }
            write_block(out, &self.blocks[*idx]);
        }
        if top_needed {
            write_block(out, top);
        }

        let mut binst = CsvTable::new(
            "#Block instances table definition",
            &[
                "block_inst_name",
                "block_def_name",
                "res_def_name",
                "offset",
                "description",
            ],
        );
        if top_needed {
            binst.append(vec![
                top.block_name.clone(),
                top.block_name.clone(),
                String::from("Registers"),
                String::from("0"),
                String::from("Top level"),
            ]);
        } else {
            for row in &top.rows {
                if let EdgeRow::BlockInst(b) = row {
                    binst.append(vec![
                        b.name.clone(),
                        b.typ.clone(),
                        String::from("Registers"),
                        b.offset.clone(),
                        b.description.clone(),
                    ]);
                }
            }
        }
        binst.write(out);

        let mut intc = CsvTable::new(
            "#Interrupt Controller (INTC) table definition",
            &[
                "intc_name",
                "type",
                "reg_name",
                "block_def_name",
                "chained_intc_name",
                "chained_intc_mask",
                "args",
                "description",
            ],
        );
        let mut roles = CsvTable::new(
            "#Register Roles table definition",
            &["reg_role", "reg_name", "block_def_name", "args"],
        );
        for idx in &self.order {
            for row in &self.blocks[*idx].rows {
                let r = match row {
                    EdgeRow::Reg(r) => r,
                    EdgeRow::BlockInst(_) => continue,
                };
                for ic in &r.intcs {
                    intc.append(vec![
                        ic.name.clone(),
                        ic.typ.clone(),
                        r.name.clone(),
                        r.block_def_name.clone(),
                        ic.chained_name.clone(),
                        ic.chained_mask.clone(),
                        ic.args.clone(),
                        ic.description.clone(),
                    ]);
                }
                if let Some(role) = &r.role {
                    roles.append(vec![
                        role.role.clone(),
                        r.name.clone(),
                        r.block_def_name.clone(),
                        role.args.clone(),
                    ]);
                }
            }
        }
        intc.write_if_needed(out);
        roles.write_if_needed(out);
    }
}

// ========= TREE WALK ========== //

fn process_body(
    enc: &mut Encore,
    blk: usize,
    children: &[Node],
    offset: u64,
    name_prefix: &[String],
) -> Result<(), RmError> {
    for el in children {
        if !el.x_driver_edge().get_bool("generate", true) {
            continue;
        }

        let mut el_name_prefix: Vec<String> = name_prefix.to_vec();
        el_name_prefix.push(String::from(el.name()));
        let el_name = el_name_prefix.join("_");
        let el_addr = offset + el.c_address();

        match el {
            Node::Reg(r) => {
                enc.append_reg(blk, r, &el_name, offset, "", 1, None)?;
            }
            Node::Memory(m) => {
                let flags = if m.x_driver_edge.get_bool("fifo", false) {
                    "FIFO"
                } else {
                    ""
                };
                let inner = m.word_reg().ok_or_else(|| {
                    RmError::unhandled_node(&format!(
                        "memory {} without a word register",
                        m.name
                    ))
                })?;
                enc.append_reg(
                    blk,
                    inner,
                    &el_name,
                    el_addr,
                    flags,
                    m.c_depth,
                    m.description.as_deref(),
                )?;
            }
            Node::Repeat(rp) => {
                if let Some(inner) = rp.as_reg_array() {
                    enc.append_reg(
                        blk,
                        inner,
                        &el_name,
                        el_addr,
                        "",
                        rp.count,
                        rp.description.as_deref(),
                    )?;
                } else {
                    let b2 = enc.new_block(&el_name);
                    process_body(enc, b2, &rp.children, 0, &[])?;
                    for i in 0..rp.count {
                        enc.append_block(
                            blk,
                            b2,
                            &format!("{}_{}", el_name, i),
                            el_addr + i * rp.c_elsize,
                            rp.description.as_deref(),
                        );
                    }
                }
            }
            Node::Block(b) => {
                let include = b.x_driver_edge.get_bool("include", false);
                let block_prefix = b.x_driver_edge.get_bool("block-prefix", true);
                if include {
                    let prefix = if block_prefix {
                        &el_name_prefix
                    } else {
                        name_prefix
                    };
                    process_body(enc, blk, &b.children, el_addr, prefix)?;
                } else {
                    let b2 = enc.new_block(&b.name);
                    enc.append_block(blk, b2, &el_name, el_addr, b.description.as_deref());
                    process_body(enc, b2, &b.children, 0, &[])?;
                }
            }
            Node::Submap(s) => {
                let sub = match &s.submap {
                    Some(sub) => sub,
                    None => continue,
                };
                let include = s.x_driver_edge.get_bool("include", s.is_include());
                let block_prefix = s.x_driver_edge.get_bool("block-prefix", true);
                if include {
                    let prefix = if block_prefix {
                        &el_name_prefix
                    } else {
                        name_prefix
                    };
                    process_body(enc, blk, &sub.children, el_addr, prefix)?;
                } else {
                    let b2 = enc.new_block(&sub.name);
                    enc.append_block(blk, b2, &el_name, el_addr, s.description.as_deref());
                    process_body(enc, b2, &sub.children, 0, &[])?;
                }
            }
        }
    }
    Ok(())
}

/// Generate the Edge3 CSV for an elaborated map.
pub fn generate_edge3<W: Write>(out: &mut W, root: &Root) -> Result<(), RmError> {
    let mut enc = Encore::new();
    let top = enc.new_block("Top");
    enc.top = top;
    process_body(&mut enc, top, &root.children, 0, &[])?;

    // Everything was accepted: render and write in one go.
    let mut text = String::new();
    text.push_str("#Encore Driver GEnerator version: 3.0\n\n");

    let mut lif = CsvTable::new(
        "#LIF (Logical Interface) table definition",
        &[
            "hw_mod_name",
            "hw_lif_name",
            "hw_lif_vers",
            "edge_vers",
            "bus",
            "endian",
            "description",
        ],
    );
    lif.append(vec![
        root.name.clone(),
        root.name.to_lowercase(),
        String::from("3.0.1"),
        String::from("3.0"),
        String::from("VME"),
        String::from("BE"),
        clean_string(root.description.as_deref()),
    ]);
    lif.write(&mut text);

    let mut rsrc = CsvTable::new(
        "#Resources (Memory(BARs) - DMA - IRQ) table definition",
        &["res_def_name", "type", "res_no", "args", "description"],
    );
    rsrc.append(vec![
        String::from("Registers"),
        String::from("MEM"),
        String::from("0"),
        String::new(),
        String::new(),
    ]);
    rsrc.write(&mut text);

    enc.write(&mut text);

    out.write_all(text.as_bytes())?;
    Ok(())
}
