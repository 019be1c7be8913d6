//! HDL generation for an elaborated register map.
//!
//! Handling of names: a user name (one that comes from the map
//! description) always gets a suffix, so that it cannot collide with the
//! bus ports or with HDL reserved words. The suffixes are `_i`/`_o` for
//! ports, `_reg` for backing registers, `_wr` for write strobes. Names of
//! nested nodes are joined with `_`.
//!
//! The walk decorates the tree through side tables keyed by node uid
//! (ports and backing registers per field, slave handles per sub-map, RAM
//! handles per array), then the decoder is synthesized twice over the same
//! flattened address list: once inside the write process and once for the
//! read path.

use std::collections::HashMap;

use log::debug;

use crate::bus::{
    name_to_busgen, BusAccess, BusGen, Isigs, SlaveDecor, RD_ACK1_INT,
};
use crate::error::RmError;
use crate::hdltree::{
    HdlChoice, HdlComb, HdlExpr, HdlIfElse, HdlModule, HdlPort, HdlRecord, HdlStmt, HdlSwitch,
    HdlSync, PortDir,
};
use crate::tree::{ilog2, Access, Field, HdlType, Memory, Node, Reg, Repeat, Root, Submap};

fn lname(s: &str) -> String {
    s.to_lowercase()
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Address bits needed to index `depth` elements.
fn depth_bits(depth: u64) -> u32 {
    std::cmp::max(1, 64 - (depth - 1).leading_zeros())
}

// ========= DECORATIONS (C3) ========== //

/// Where a field's read data comes from.
#[derive(Debug, Clone)]
enum ReadSrc {
    Sig(String),
    Cst(u64),
}

#[derive(Debug, Clone)]
struct FieldDecor {
    oport: Option<String>,
    reg: Option<String>,
    strobe: Option<String>,
    /// Assignment target during writes (backing register, or the output
    /// port itself for a writable wire field).
    write_target: Option<String>,
    read_src: ReadSrc,
    lo: u32,
    width: u32,
    preset: u64,
}

#[derive(Debug, Clone)]
struct RamDecor {
    rdat: String,
    wr_int: Option<String>,
    wr_dly: Option<String>,
}

struct SubDecor {
    busgen: Box<dyn BusGen>,
    slave: SlaveDecor,
}

#[derive(Default)]
struct Decor {
    fields: HashMap<u32, Vec<FieldDecor>>,
    rams: HashMap<u32, RamDecor>,
    subs: HashMap<u32, SubDecor>,
    // Tree-order uid lists, so emission order is deterministic.
    reg_order: Vec<u32>,
    ram_order: Vec<u32>,
    sub_order: Vec<u32>,
}

/// Destination for user-facing ports: either the module's flat port list,
/// or a pair of records when `x_hdl.iogroup` is set on the root.
struct PortSink {
    group: Option<String>,
    in_fields: Vec<(String, Option<u32>)>,
    out_fields: Vec<(String, Option<u32>)>,
}

impl PortSink {
    fn new(group: Option<&str>) -> Self {
        PortSink {
            group: group.map(String::from),
            in_fields: Vec::new(),
            out_fields: Vec::new(),
        }
    }

    fn add(
        &mut self,
        module: &mut HdlModule,
        name: &str,
        width: Option<u32>,
        dir: PortDir,
        comment: Option<&str>,
    ) -> String {
        match &self.group {
            None => {
                let mut p = HdlPort::new(name, width, dir);
                p.comment = comment.map(String::from);
                module.ports.push(p);
                String::from(name)
            }
            Some(g) => {
                let fields = match dir {
                    PortDir::In => &mut self.in_fields,
                    PortDir::Out => &mut self.out_fields,
                };
                fields.push((String::from(name), width));
                match dir {
                    PortDir::In => format!("{}_i.{}", g, name),
                    PortDir::Out => format!("{}_o.{}", g, name),
                }
            }
        }
    }

    fn finish(self, module: &mut HdlModule) {
        let g = match self.group {
            Some(g) => g,
            None => return,
        };
        if !self.in_fields.is_empty() {
            module.records.push(HdlRecord {
                name: format!("t_{}_in", g),
                fields: self.in_fields,
            });
            module.ports.push(HdlPort::record(
                &format!("{}_i", g),
                &format!("t_{}_in", g),
                PortDir::In,
            ));
        }
        if !self.out_fields.is_empty() {
            module.records.push(HdlRecord {
                name: format!("t_{}_out", g),
                fields: self.out_fields,
            });
            module.ports.push(HdlPort::record(
                &format!("{}_o", g),
                &format!("t_{}_out", g),
                PortDir::Out,
            ));
        }
    }
}

fn field_decor(
    reg: &Reg,
    f: &Field,
    prefix: &str,
    module: &mut HdlModule,
    sink: &mut PortSink,
) -> FieldDecor {
    let name = lname(&format!("{}{}", prefix, f.hdl_name()));
    let w = f.width();
    let wopt = if w == 1 { None } else { Some(w) };
    let preset = f.preset.unwrap_or(0);
    let mut fd = FieldDecor {
        oport: None,
        reg: None,
        strobe: None,
        write_target: None,
        read_src: ReadSrc::Cst(0),
        lo: f.lo,
        width: w,
        preset,
    };

    if reg.access.is_writable() {
        let oport = sink.add(
            module,
            &format!("{}_o", name),
            wopt,
            PortDir::Out,
            f.description.as_deref(),
        );
        if f.hdl_type == HdlType::Reg {
            fd.reg = Some(module.add_signal(&format!("{}_reg", name), wopt));
            fd.write_target = fd.reg.clone();
        } else {
            // A writable wire field is registered in the port itself.
            fd.write_target = Some(oport.clone());
        }
        fd.oport = Some(oport);
    }

    let iport = if reg.access.is_readable()
        && reg.access != Access::Cst
        && (f.hdl_type == HdlType::Wire || reg.access == Access::Rw)
    {
        Some(sink.add(
            module,
            &format!("{}_i", name),
            wopt,
            PortDir::In,
            f.description.as_deref(),
        ))
    } else {
        None
    };

    fd.read_src = match reg.access {
        Access::Cst => ReadSrc::Cst(preset),
        Access::Ro => match &iport {
            Some(p) => ReadSrc::Sig(p.clone()),
            None => ReadSrc::Cst(0),
        },
        Access::Rw | Access::Wo => match (&fd.reg, &iport) {
            (Some(r), _) if f.hdl_type == HdlType::Reg => ReadSrc::Sig(r.clone()),
            (_, Some(p)) => ReadSrc::Sig(p.clone()),
            _ => ReadSrc::Cst(0),
        },
    };

    if f.hdl_write_strobe {
        fd.strobe = Some(sink.add(module, &format!("{}_wr", name), None, PortDir::Out, None));
    }
    fd
}

/// A field-less register behaves as one anonymous field covering the
/// whole register.
fn pseudo_field(reg: &Reg) -> Field {
    Field {
        name: reg.name.clone(),
        description: reg.description.clone(),
        lo: 0,
        hi: Some(reg.width() - 1),
        hdl_type: HdlType::Reg,
        preset: reg.preset,
        hdl_write_strobe: false,
        c_rwidth: Some(reg.width()),
        c_iowidth: None,
        c_name: None,
        x_hdl: Default::default(),
        x_driver_edge: Default::default(),
        uid: reg.uid,
    }
}

fn reg_ports(
    reg: &Reg,
    prefix: &str,
    module: &mut HdlModule,
    sink: &mut PortSink,
    decor: &mut Decor,
) {
    let mut fds = Vec::new();
    if reg.has_fields() {
        for f in &reg.children {
            fds.push(field_decor(reg, f, prefix, module, sink));
        }
    } else {
        let f = pseudo_field(reg);
        fds.push(field_decor(reg, &f, prefix, module, sink));
    }
    decor.fields.insert(reg.uid, fds);
    decor.reg_order.push(reg.uid);
}

#[allow(clippy::too_many_arguments)]
fn ram_ports(
    uid: u32,
    name: &str,
    reg: &Reg,
    depth: u64,
    module: &mut HdlModule,
    sink: &mut PortSink,
    decor: &mut Decor,
    insts: &mut Vec<HdlStmt>,
    bus: &BusAccess,
    isigs: &Isigs,
    adr: &str,
) {
    let aw = depth_bits(depth);
    let word = bus.word_bits;
    let writable = reg.access.is_writable();

    let adr_port = sink.add(module, &format!("{}_adr_i", name), Some(aw), PortDir::In, None);
    let (user_rd, user_dat_o, user_we, user_dat_i);
    if writable {
        // The bus writes; the user side reads.
        user_rd = Some(sink.add(module, &format!("{}_rd_i", name), None, PortDir::In, None));
        user_dat_o = Some(sink.add(
            module,
            &format!("{}_dat_o", name),
            Some(word),
            PortDir::Out,
            None,
        ));
        user_we = None;
        user_dat_i = None;
    } else {
        // The bus reads; the user side writes.
        user_rd = None;
        user_dat_o = None;
        user_we = Some(sink.add(module, &format!("{}_we_i", name), None, PortDir::In, None));
        user_dat_i = Some(sink.add(
            module,
            &format!("{}_dat_i", name),
            Some(word),
            PortDir::In,
            None,
        ));
    }

    let rdat = module.add_signal(&format!("{}_rdat_int", name), Some(word));
    let (wr_int, wr_dly) = if writable {
        (
            Some(module.add_signal(&format!("{}_wr_int", name), None)),
            Some(module.add_signal(&format!("{}_wr_dly", name), None)),
        )
    } else {
        (None, None)
    };

    let conns: Vec<(String, HdlExpr)> = vec![
        (String::from("clk_a_i"), HdlExpr::name(&bus.clk)),
        (String::from("clk_b_i"), HdlExpr::name(&bus.clk)),
        (String::from("addr_a_i"), HdlExpr::slice(adr, 0, aw)),
        (String::from("data_a_i"), HdlExpr::name(&bus.dati)),
        (String::from("data_a_o"), HdlExpr::name(&rdat)),
        (String::from("rd_a_i"), HdlExpr::name(&isigs.rd_int)),
        (
            String::from("wr_a_i"),
            match &wr_int {
                Some(w) => HdlExpr::name(w),
                None => HdlExpr::Bit0,
            },
        ),
        (String::from("addr_b_i"), HdlExpr::name(&adr_port)),
        (
            String::from("data_b_i"),
            match &user_dat_i {
                Some(p) => HdlExpr::name(p),
                None => HdlExpr::replicate(HdlExpr::Bit0, word),
            },
        ),
        (
            String::from("data_b_o"),
            match &user_dat_o {
                Some(p) => HdlExpr::name(p),
                None => HdlExpr::name("open"),
            },
        ),
        (
            String::from("rd_b_i"),
            match &user_rd {
                Some(p) => HdlExpr::name(p),
                None => HdlExpr::Bit0,
            },
        ),
        (
            String::from("wr_b_i"),
            match &user_we {
                Some(p) => HdlExpr::name(p),
                None => HdlExpr::Bit0,
            },
        ),
    ];
    insts.push(HdlStmt::Instance(crate::hdltree::HdlInstance {
        name: format!("{}_ram", name),
        unit: String::from("dpssram"),
        generics: vec![
            (String::from("g_data_width"), word.to_string()),
            (String::from("g_size"), depth.to_string()),
            (String::from("g_addr_width"), aw.to_string()),
        ],
        conns,
    }));

    decor.rams.insert(uid, RamDecor { rdat, wr_int, wr_dly });
    decor.ram_order.push(uid);
}

fn repeat_ram<'a>(root: &Root, rep: &'a Repeat) -> Result<&'a Reg, RmError> {
    let reg = rep.as_reg_array().ok_or_else(|| {
        RmError::unsupported(&format!("repeat {} over a non-register body", rep.name))
    })?;
    if rep.c_elsize != root.c_word_size as u64 {
        return Err(RmError::unsupported(&format!(
            "array {} with element size {} (bus word is {})",
            rep.name, rep.c_elsize, root.c_word_size
        )));
    }
    Ok(reg)
}

fn memory_reg<'a>(root: &Root, mem: &'a Memory) -> Result<&'a Reg, RmError> {
    let reg = mem
        .word_reg()
        .ok_or_else(|| RmError::unhandled_node(&format!("memory {} without a word register", mem.name)))?;
    if reg.c_size != root.c_word_size as u64 {
        return Err(RmError::unsupported(&format!(
            "memory {} with word size {} (bus word is {})",
            mem.name, reg.c_size, root.c_word_size
        )));
    }
    Ok(reg)
}

fn include_children<'a>(s: &'a Submap) -> Result<&'a [Node], RmError> {
    match &s.submap {
        Some(sub) => Ok(&sub.children),
        None => Err(RmError::unhandled_node(&format!(
            "include sub-map {} without an elaborated body",
            s.name
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_ports(
    root: &Root,
    children: &[Node],
    prefix: &str,
    module: &mut HdlModule,
    sink: &mut PortSink,
    decor: &mut Decor,
    insts: &mut Vec<HdlStmt>,
    bus: &BusAccess,
    isigs: &Isigs,
    adr: &str,
) -> Result<(), RmError> {
    for el in children {
        match el {
            Node::Reg(r) => reg_ports(r, prefix, module, sink, decor),
            Node::Block(b) => {
                let p = format!("{}{}_", prefix, lname(&b.name));
                walk_ports(root, &b.children, &p, module, sink, decor, insts, bus, isigs, adr)?;
            }
            Node::Submap(s) if s.is_include() => {
                let p = format!("{}{}_", prefix, lname(&s.name));
                walk_ports(
                    root,
                    include_children(s)?,
                    &p,
                    module,
                    sink,
                    decor,
                    insts,
                    bus,
                    isigs,
                    adr,
                )?;
            }
            Node::Submap(s) => {
                let sgen = name_to_busgen(&s.interface)?;
                let busgroup = s.x_hdl.get_bool("busgroup", false);
                let p = format!("{}{}_", prefix, lname(&s.name));
                let slave = sgen.gen_bus_slave(root, module, &p, s, busgroup)?;
                decor.subs.insert(s.uid, SubDecor { busgen: sgen, slave });
                decor.sub_order.push(s.uid);
            }
            Node::Repeat(r) => {
                let reg = repeat_ram(root, r)?;
                let name = lname(&format!("{}{}", prefix, r.name));
                ram_ports(
                    r.uid, &name, reg, r.count, module, sink, decor, insts, bus, isigs, adr,
                );
            }
            Node::Memory(m) => {
                let reg = memory_reg(root, m)?;
                let name = lname(&format!("{}{}", prefix, m.name));
                ram_ports(
                    m.uid, &name, reg, m.c_depth, module, sink, decor, insts, bus, isigs, adr,
                );
            }
        }
    }
    Ok(())
}

// ========= ADDRESS DECODER (C4) ========== //

#[derive(Debug, Clone, Copy)]
enum RKind<'a> {
    Reg(&'a Reg),
    Ram(u32),
    Sub(u32),
}

#[derive(Debug, Clone, Copy)]
struct Region<'a> {
    abs: u64,
    size: u64,
    kind: RKind<'a>,
}

fn gather_regions<'a>(
    children: &'a [Node],
    base: u64,
    out: &mut Vec<Region<'a>>,
) -> Result<(), RmError> {
    for el in children {
        match el {
            Node::Reg(r) => out.push(Region {
                abs: base + r.c_address,
                size: r.c_size,
                kind: RKind::Reg(r),
            }),
            Node::Block(b) => gather_regions(&b.children, base + b.c_address, out)?,
            Node::Submap(s) if s.is_include() => {
                gather_regions(include_children(s)?, base + s.c_address, out)?
            }
            Node::Submap(s) => out.push(Region {
                abs: base + s.c_address,
                size: s.c_size,
                kind: RKind::Sub(s.uid),
            }),
            Node::Repeat(r) => out.push(Region {
                abs: base + r.c_address,
                size: r.c_size,
                kind: RKind::Ram(r.uid),
            }),
            Node::Memory(m) => out.push(Region {
                abs: base + m.c_address,
                size: m.c_size,
                kind: RKind::Ram(m.uid),
            }),
        }
    }
    Ok(())
}

/// Nested structural switch over the address bits. `hi` is the number of
/// byte-address bits still to decode; groups of children sharing the same
/// prefix above the largest child size recurse with a reduced `hi`.
fn add_block_decoder<'a, F>(
    root: &Root,
    stmts: &mut Vec<HdlStmt>,
    adr: &str,
    regions: &[Region<'a>],
    hi: u32,
    func: &mut F,
) -> Result<(), RmError>
where
    F: FnMut(&mut Vec<HdlStmt>, Option<(Region<'a>, u32)>) -> Result<(), RmError>,
{
    if regions.is_empty() {
        return func(stmts, None);
    }
    if regions.len() == 1 {
        let r = regions[0];
        match r.kind {
            RKind::Reg(_) => return add_reg_decoder(root, stmts, adr, regions, hi, func),
            _ => return func(stmts, Some((r, 0))),
        }
    }

    let maxsz = regions.iter().map(|r| r.size).max().unwrap();
    if !maxsz.is_power_of_two() {
        return Err(RmError::invariant(&format!(
            "block child size {} is not a power of two",
            maxsz
        )));
    }
    let maxszl2 = ilog2(maxsz);
    if maxszl2 >= hi || maxszl2 < root.c_addr_word_bits {
        return Err(RmError::invariant(&format!(
            "block child size 2^{} does not fit in 2^{} bytes",
            maxszl2, hi
        )));
    }
    let sw_width = hi - maxszl2;
    debug!(
        "block decoder: {} children, addr[{}:{}]",
        regions.len(),
        maxszl2,
        hi - 1
    );

    let mut sw = HdlSwitch::new(HdlExpr::slice(
        adr,
        maxszl2 - root.c_addr_word_bits,
        sw_width,
    ));
    let mut i = 0;
    while i < regions.len() {
        let pfx = regions[i].abs >> maxszl2;
        let mut j = i;
        while j < regions.len() && (regions[j].abs >> maxszl2) == pfx {
            j += 1;
        }
        let mut ch = HdlChoice {
            value: Some(HdlExpr::cst(pfx & mask(sw_width), sw_width)),
            stmts: Vec::new(),
        };
        add_block_decoder(root, &mut ch.stmts, adr, &regions[i..j], maxszl2, func)?;
        sw.choices.push(ch);
        i = j;
    }
    let mut def = HdlChoice {
        value: None,
        stmts: Vec::new(),
    };
    func(&mut def.stmts, None)?;
    sw.choices.push(def);
    stmts.push(HdlStmt::Switch(sw));
    Ok(())
}

/// Word-level decode of registers within a block of `hi` byte-address
/// bits. A register wider than the bus word gets one choice per word, in
/// big-endian order: the lowest address carries the most significant bits.
fn add_reg_decoder<'a, F>(
    root: &Root,
    stmts: &mut Vec<HdlStmt>,
    adr: &str,
    regions: &[Region<'a>],
    hi: u32,
    func: &mut F,
) -> Result<(), RmError>
where
    F: FnMut(&mut Vec<HdlStmt>, Option<(Region<'a>, u32)>) -> Result<(), RmError>,
{
    let width = hi - root.c_addr_word_bits;
    if width == 0 {
        if regions.len() > 1 {
            return Err(RmError::invariant(
                "several registers in a single-word block",
            ));
        }
        for r in regions {
            let foff = (r.size - root.c_word_size as u64) * 8;
            func(stmts, Some((*r, foff as u32)))?;
        }
        return Ok(());
    }

    let mut sw = HdlSwitch::new(HdlExpr::slice(adr, 0, width));
    for r in regions {
        if r.size % root.c_word_size as u64 != 0 {
            return Err(RmError::invariant(&format!(
                "register size {} is not a multiple of the word size",
                r.size
            )));
        }
        let mut suboff = 0u64;
        while suboff < r.size {
            let foff = (r.size - root.c_word_size as u64 - suboff) * 8;
            let val = ((r.abs + suboff) >> root.c_addr_word_bits) & mask(width);
            let mut ch = HdlChoice {
                value: Some(HdlExpr::cst(val, width)),
                stmts: Vec::new(),
            };
            func(&mut ch.stmts, Some((*r, foff as u32)))?;
            sw.choices.push(ch);
            suboff += root.c_word_size as u64;
        }
    }
    let mut def = HdlChoice {
        value: None,
        stmts: Vec::new(),
    };
    func(&mut def.stmts, None)?;
    sw.choices.push(def);
    stmts.push(HdlStmt::Switch(sw));
    Ok(())
}

fn add_decoder<'a, F>(
    root: &Root,
    stmts: &mut Vec<HdlStmt>,
    adr: &str,
    regions: &[Region<'a>],
    func: &mut F,
) -> Result<(), RmError>
where
    F: FnMut(&mut Vec<HdlStmt>, Option<(Region<'a>, u32)>) -> Result<(), RmError>,
{
    let hi = root.c_sel_bits + root.c_blk_bits;
    add_block_decoder(root, stmts, adr, regions, hi, func)
}

// ========= FIELD SLICING ========== //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSlice {
    d_lo: u32,
    v_lo: u32,
    width: u32,
}

/// Intersection of a field (at bit `lo`, `width` wide within its register)
/// with the bus word at register bit offset `off`. None when the field is
/// not touched by that word.
fn field_decode(lo: u32, width: u32, off: u32, word_bits: u32) -> Option<FieldSlice> {
    if lo + width <= off || lo >= off + word_bits {
        return None;
    }
    let d_lo = lo.max(off) - off;
    let d_hi = (lo + width - 1).min(off + word_bits - 1) - off;
    let v_lo = lo.max(off) - lo;
    Some(FieldSlice {
        d_lo,
        v_lo,
        width: d_hi - d_lo + 1,
    })
}

fn maybe_slice(name: &str, lo: u32, width: u32, full: u32) -> HdlExpr {
    if lo == 0 && width == full {
        HdlExpr::name(name)
    } else {
        HdlExpr::slice(name, lo, width)
    }
}

fn read_src_expr(src: &ReadSrc, fs: &FieldSlice, full: u32) -> HdlExpr {
    match src {
        ReadSrc::Sig(n) => maybe_slice(n, fs.v_lo, fs.width, full),
        ReadSrc::Cst(v) => HdlExpr::cst((v >> fs.v_lo) & mask(fs.width), fs.width),
    }
}

// ========= PROCESSES ========== //

fn ack_write(stmts: &mut Vec<HdlStmt>, isigs: &Isigs) {
    stmts.push(HdlStmt::assign(HdlExpr::name(&isigs.wr_ack), HdlExpr::Bit1));
    stmts.push(HdlStmt::assign(
        HdlExpr::name(&isigs.wr_ack_done),
        HdlExpr::Bit1,
    ));
}

fn write_reg_leaf(
    stmts: &mut Vec<HdlStmt>,
    fds: &[FieldDecor],
    foff: u32,
    word_bits: u32,
    dati: &str,
) {
    for fd in fds {
        if let Some(fs) = field_decode(fd.lo, fd.width, foff, word_bits) {
            if let Some(target) = &fd.write_target {
                stmts.push(HdlStmt::assign(
                    maybe_slice(target, fs.v_lo, fs.width, fd.width),
                    maybe_slice(dati, fs.d_lo, fs.width, word_bits),
                ));
            }
            if let Some(strobe) = &fd.strobe {
                stmts.push(HdlStmt::assign(HdlExpr::name(strobe), HdlExpr::Bit1));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn add_write_process(
    root: &Root,
    module: &mut HdlModule,
    decor: &Decor,
    regions: &[Region<'_>],
    bus: &BusAccess,
    isigs: &Isigs,
    adr: &str,
) -> Result<(), RmError> {
    let word_bits = root.c_word_bits;
    let mut proc_ = HdlSync::new(&bus.clk, &bus.rst);
    proc_
        .rst_stmts
        .push(HdlStmt::assign(HdlExpr::name(&isigs.wr_ack), HdlExpr::Bit0));
    proc_.rst_stmts.push(HdlStmt::assign(
        HdlExpr::name(&isigs.wr_ack_done),
        HdlExpr::Bit0,
    ));

    // Reset every register to its preset, strobes and RAM requests to zero.
    for uid in &decor.reg_order {
        for fd in &decor.fields[uid] {
            if let Some(target) = &fd.write_target {
                proc_.rst_stmts.push(HdlStmt::assign(
                    HdlExpr::name(target),
                    HdlExpr::cst(fd.preset, fd.width),
                ));
            }
            if let Some(strobe) = &fd.strobe {
                proc_
                    .rst_stmts
                    .push(HdlStmt::assign(HdlExpr::name(strobe), HdlExpr::Bit0));
            }
        }
    }
    for uid in &decor.ram_order {
        let ram = &decor.rams[uid];
        if let (Some(wr), Some(dly)) = (&ram.wr_int, &ram.wr_dly) {
            proc_
                .rst_stmts
                .push(HdlStmt::assign(HdlExpr::name(wr), HdlExpr::Bit0));
            proc_
                .rst_stmts
                .push(HdlStmt::assign(HdlExpr::name(dly), HdlExpr::Bit0));
        }
    }

    // Per-cycle defaults: the ack and the strobes are pulses.
    let mut top: Vec<HdlStmt> = Vec::new();
    top.push(HdlStmt::assign(HdlExpr::name(&isigs.wr_ack), HdlExpr::Bit0));
    for uid in &decor.reg_order {
        for fd in &decor.fields[uid] {
            if let Some(strobe) = &fd.strobe {
                top.push(HdlStmt::assign(HdlExpr::name(strobe), HdlExpr::Bit0));
            }
        }
    }
    for sd in decor.sub_order.iter().map(|u| &decor.subs[u]) {
        top.extend(sd.slave.write_sync_defaults());
    }
    // A deferred RAM write fires one cycle after the colliding read.
    for uid in &decor.ram_order {
        let ram = &decor.rams[uid];
        if let (Some(wr), Some(dly)) = (&ram.wr_int, &ram.wr_dly) {
            top.push(HdlStmt::assign(HdlExpr::name(wr), HdlExpr::Bit0));
            let mut fire = HdlIfElse::new(HdlExpr::is_set(dly));
            fire.then_stmts
                .push(HdlStmt::assign(HdlExpr::name(wr), HdlExpr::Bit1));
            fire.then_stmts
                .push(HdlStmt::assign(HdlExpr::name(dly), HdlExpr::Bit0));
            ack_write(&mut fire.then_stmts, isigs);
            top.push(HdlStmt::If(fire));
        }
    }

    let mut gate = HdlIfElse::new(HdlExpr::and(
        HdlExpr::is_set(&isigs.wr_int),
        HdlExpr::is_clear(&isigs.wr_ack_done),
    ));
    let mut slave_rst: Vec<HdlStmt> = Vec::new();
    {
        let mut leaf = |stmts: &mut Vec<HdlStmt>, hit: Option<(Region, u32)>| {
            match hit {
                None => ack_write(stmts, isigs),
                Some((r, foff)) => match r.kind {
                    RKind::Reg(reg) => {
                        write_reg_leaf(stmts, &decor.fields[&reg.uid], foff, word_bits, &bus.dati);
                        ack_write(stmts, isigs);
                    }
                    RKind::Ram(uid) => {
                        let ram = &decor.rams[&uid];
                        match (&ram.wr_int, &ram.wr_dly) {
                            (Some(wr), Some(dly)) => {
                                let mut busy = HdlIfElse::new(HdlExpr::is_set(&isigs.rd_int));
                                busy.then_stmts
                                    .push(HdlStmt::assign(HdlExpr::name(dly), HdlExpr::Bit1));
                                busy.else_stmts
                                    .push(HdlStmt::assign(HdlExpr::name(wr), HdlExpr::Bit1));
                                ack_write(&mut busy.else_stmts, isigs);
                                stmts.push(HdlStmt::If(busy));
                            }
                            _ => ack_write(stmts, isigs),
                        }
                    }
                    RKind::Sub(uid) => {
                        let sd = &decor.subs[&uid];
                        sd.busgen
                            .write_bus_slave(stmts, &mut slave_rst, &sd.slave, isigs);
                    }
                },
            }
            Ok(())
        };
        add_decoder(root, &mut gate.then_stmts, adr, regions, &mut leaf)?;
    }
    proc_.rst_stmts.extend(slave_rst);

    let mut idle = HdlIfElse::new(HdlExpr::is_clear(&isigs.wr_int));
    idle.then_stmts.push(HdlStmt::assign(
        HdlExpr::name(&isigs.wr_ack_done),
        HdlExpr::Bit0,
    ));
    gate.else_stmts.push(HdlStmt::If(idle));

    proc_.sync_stmts = top;
    proc_.sync_stmts.push(HdlStmt::If(gate));
    module.stmts.push(HdlStmt::Sync(proc_));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn add_read_processes(
    root: &Root,
    module: &mut HdlModule,
    decor: &Decor,
    regions: &[Region<'_>],
    bus: &BusAccess,
    isigs: &Isigs,
    adr: &str,
) -> Result<(), RmError> {
    let word_bits = root.c_word_bits;
    let has_reg = regions.iter().any(|r| matches!(r.kind, RKind::Reg(_)));
    let needs_stage = regions.iter().any(|r| match r.kind {
        RKind::Reg(_) | RKind::Ram(_) => true,
        RKind::Sub(uid) => matches!(
            decor.subs[&uid].slave,
            SlaveDecor::Axi(_) | SlaveDecor::Sram(_)
        ),
    });

    let mut rd_ack1 = String::new();
    let mut reg_rdat = String::new();
    if needs_stage {
        rd_ack1 = module.add_signal(RD_ACK1_INT, None);
        if has_reg {
            reg_rdat = module.add_signal("reg_rdat_int", Some(word_bits));
        }

        // Stage 1: latch register read data and a one-cycle ack.
        let mut proc_ = HdlSync::new(&bus.clk, &bus.rst);
        proc_
            .rst_stmts
            .push(HdlStmt::assign(HdlExpr::name(&rd_ack1), HdlExpr::Bit0));
        if has_reg {
            proc_.rst_stmts.push(HdlStmt::assign(
                HdlExpr::name(&reg_rdat),
                HdlExpr::replicate(HdlExpr::Bit0, word_bits),
            ));
        }
        for sd in decor.sub_order.iter().map(|u| &decor.subs[u]) {
            proc_.rst_stmts.extend(sd.slave.read_sync_rst());
        }

        let mut gate = HdlIfElse::new(HdlExpr::and(
            HdlExpr::is_set(&isigs.rd_int),
            HdlExpr::is_clear(&isigs.rd_ack),
        ));
        if has_reg {
            gate.then_stmts.push(HdlStmt::assign(
                HdlExpr::name(&reg_rdat),
                HdlExpr::replicate(HdlExpr::Bit0, word_bits),
            ));
        }
        {
            let mut leaf = |stmts: &mut Vec<HdlStmt>, hit: Option<(Region, u32)>| {
                match hit {
                    None => {}
                    Some((r, foff)) => match r.kind {
                        RKind::Reg(reg) => {
                            for fd in &decor.fields[&reg.uid] {
                                if let Some(fs) =
                                    field_decode(fd.lo, fd.width, foff, word_bits)
                                {
                                    stmts.push(HdlStmt::assign(
                                        maybe_slice(&reg_rdat, fs.d_lo, fs.width, word_bits),
                                        read_src_expr(&fd.read_src, &fs, fd.width),
                                    ));
                                }
                            }
                        }
                        RKind::Ram(_) => {}
                        RKind::Sub(uid) => {
                            stmts.extend(decor.subs[&uid].slave.read_sync_stmts());
                        }
                    },
                }
                Ok(())
            };
            add_decoder(root, &mut gate.then_stmts, adr, regions, &mut leaf)?;
        }
        gate.then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&rd_ack1), HdlExpr::Bit1));
        gate.else_stmts
            .push(HdlStmt::assign(HdlExpr::name(&rd_ack1), HdlExpr::Bit0));
        for sd in decor.sub_order.iter().map(|u| &decor.subs[u]) {
            gate.else_stmts.extend(sd.slave.read_sync_idle());
        }
        proc_.sync_stmts.push(HdlStmt::If(gate));
        module.stmts.push(HdlStmt::Sync(proc_));
    }

    // Stage 2: combinational mux of latched data, RAM and sub-map data.
    let mut comb = HdlComb::new();
    comb.sense(adr);
    let mut stmts: Vec<HdlStmt> = Vec::new();
    stmts.push(HdlStmt::assign(
        HdlExpr::name(&bus.dato),
        HdlExpr::replicate(HdlExpr::Bit0, word_bits),
    ));
    stmts.push(HdlStmt::assign(HdlExpr::name(&isigs.rd_ack), HdlExpr::Bit0));
    for sd in decor.sub_order.iter().map(|u| &decor.subs[u]) {
        stmts.extend(sd.slave.read_mux_defaults());
    }

    let mut mux_stmts: Vec<HdlStmt> = Vec::new();
    {
        let rd_ack1 = rd_ack1.clone();
        let reg_rdat = reg_rdat.clone();
        let mut leaf = |stmts: &mut Vec<HdlStmt>, hit: Option<(Region, u32)>| {
            match hit {
                None => {
                    // Reads of unmapped addresses still complete.
                    stmts.push(HdlStmt::assign(
                        HdlExpr::name(&bus.dato),
                        HdlExpr::replicate(HdlExpr::Bit0, word_bits),
                    ));
                    stmts.push(HdlStmt::assign(
                        HdlExpr::name(&isigs.rd_ack),
                        HdlExpr::Bit1,
                    ));
                }
                Some((r, _foff)) => match r.kind {
                    RKind::Reg(_) => {
                        stmts.push(HdlStmt::assign(
                            HdlExpr::name(&bus.dato),
                            HdlExpr::name(&reg_rdat),
                        ));
                        stmts.push(HdlStmt::assign(
                            HdlExpr::name(&isigs.rd_ack),
                            HdlExpr::name(&rd_ack1),
                        ));
                        comb.sense(&reg_rdat);
                        comb.sense(&rd_ack1);
                    }
                    RKind::Ram(uid) => {
                        let ram = &decor.rams[&uid];
                        stmts.push(HdlStmt::assign(
                            HdlExpr::name(&bus.dato),
                            HdlExpr::name(&ram.rdat),
                        ));
                        stmts.push(HdlStmt::assign(
                            HdlExpr::name(&isigs.rd_ack),
                            HdlExpr::name(&rd_ack1),
                        ));
                        comb.sense(&ram.rdat);
                        comb.sense(&rd_ack1);
                    }
                    RKind::Sub(uid) => {
                        let sd = &decor.subs[&uid];
                        sd.busgen
                            .read_bus_slave(stmts, &mut comb, &sd.slave, isigs, &bus.dato);
                    }
                },
            }
            Ok(())
        };
        add_decoder(root, &mut mux_stmts, adr, regions, &mut leaf)?;
    }
    stmts.extend(mux_stmts);
    comb.stmts = stmts;
    module.stmts.push(HdlStmt::Comb(comb));
    Ok(())
}

// ========= TOP LEVEL ========== //

/// Generate the HDL module for an elaborated map.
pub fn generate_hdl(root: &mut Root) -> Result<HdlModule, RmError> {
    if root.uid == 0 {
        root.prepare();
    }
    let root: &Root = root;
    let busgen = name_to_busgen(&root.bus)?;
    let mut module = HdlModule::new(&root.name, root.description.as_deref());
    let mut isigs = Isigs::default();

    module.stmts.push(HdlStmt::comment("Bus decode signals"));
    let bus = busgen.expand_bus(root, &mut module, &mut isigs)?;
    isigs.wr_ack_done = module.add_signal("wr_ack_done_int", None);

    // Unified address: the bus wire itself, or a mux over the split
    // read/write address channels.
    let adr = if bus.split {
        module.add_signal("adr_int", Some(bus.adr_bits))
    } else {
        bus.adrr.clone()
    };

    let mut decor = Decor::default();
    let mut insts: Vec<HdlStmt> = Vec::new();
    let group = root.x_hdl.get_str("iogroup").map(String::from);
    let mut sink = PortSink::new(group.as_deref());
    walk_ports(
        root,
        &root.children,
        "",
        &mut module,
        &mut sink,
        &mut decor,
        &mut insts,
        &bus,
        &isigs,
        &adr,
    )?;
    sink.finish(&mut module);

    let mut regions: Vec<Region> = Vec::new();
    gather_regions(&root.children, 0, &mut regions)?;
    regions.sort_by_key(|r| r.abs);

    module.stmts.push(HdlStmt::comment("Assign outputs"));
    for uid in &decor.reg_order {
        for fd in &decor.fields[uid] {
            if let (Some(oport), Some(reg)) = (&fd.oport, &fd.reg) {
                module
                    .stmts
                    .push(HdlStmt::assign(HdlExpr::name(oport), HdlExpr::name(reg)));
            }
        }
    }
    for uid in &decor.sub_order {
        let sd = &decor.subs[uid];
        sd.busgen
            .wire_bus_slave(&bus, &adr, &mut module.stmts, &sd.slave);
    }

    if !insts.is_empty() {
        module.stmts.push(HdlStmt::comment("Memories"));
        module.stmts.extend(insts);
    }

    module
        .stmts
        .push(HdlStmt::comment("Process to write registers."));
    add_write_process(root, &mut module, &decor, &regions, &bus, &isigs, &adr)?;

    module
        .stmts
        .push(HdlStmt::comment("Process to read registers."));
    add_read_processes(root, &mut module, &decor, &regions, &bus, &isigs, &adr)?;

    if bus.split {
        module.stmts.push(HdlStmt::comment("Unified address"));
        let mut mux = HdlComb::new();
        mux.sense(&bus.adrr);
        mux.sense(&bus.adrw);
        mux.sense(&isigs.rd_int);
        let mut sel = HdlIfElse::new(HdlExpr::is_set(&isigs.rd_int));
        sel.then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&adr), HdlExpr::name(&bus.adrr)));
        sel.else_stmts
            .push(HdlStmt::assign(HdlExpr::name(&adr), HdlExpr::name(&bus.adrw)));
        mux.stmts.push(HdlStmt::If(sel));
        module.stmts.push(HdlStmt::Comb(mux));
    }

    Ok(module)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tree::root_from_json;
    use more_asserts::assert_gt;

    fn wb_map(blk_bits: u32, children: &str) -> Root {
        let src = format!(
            r#"{{
                "name": "m1",
                "bus": "wb-32-be",
                "c_word_size": 4,
                "c_sel_bits": 0,
                "c_blk_bits": {},
                "children": [{}]
            }}"#,
            blk_bits, children
        );
        root_from_json(&src).unwrap()
    }

    const REG_R: &str = r#"{"node": "reg", "name": "r", "access": "rw",
        "c_address": 0, "c_size": 4,
        "children": [{"name": "f", "lo": 0, "hi": 31}]}"#;

    #[test]
    fn simple_rw_reg_ports_and_signals() {
        // One rw register with a single 32-bit field behind wishbone.
        let mut root = wb_map(2, REG_R);
        let module = generate_hdl(&mut root).unwrap();
        for p in [
            "clk_i", "rst_n_i", "wb_adr_i", "wb_dat_i", "wb_dat_o", "wb_cyc_i", "wb_stb_i",
            "wb_sel_i", "wb_we_i", "wb_ack_o", "wb_stall_o", "f_i", "f_o",
        ] {
            assert!(module.has_port(p), "missing port {}", p);
        }
        assert!(module.has_signal("f_reg"));

        let text = module.to_string();
        assert!(text.contains("f_o <= f_reg;"));
        assert!(text.contains("f_reg <= wb_dat_i;"));
        assert!(text.contains("reg_rdat_int <= f_reg;"));
        // Preset 0 on reset.
        assert!(text.contains("f_reg <= \"00000000000000000000000000000000\";"));
        // Single word, so no address switch at all.
        assert!(!text.contains("case"));
    }

    #[test]
    fn two_regs_decode_on_word_address() {
        let mut root = wb_map(
            3,
            r#"{"node": "reg", "name": "a", "access": "rw", "c_address": 0, "c_size": 4},
               {"node": "reg", "name": "b", "access": "rw", "c_address": 4, "c_size": 4}"#,
        );
        let module = generate_hdl(&mut root).unwrap();
        let text = module.to_string();
        assert!(text.contains("case wb_adr_i(0) is"));
        assert!(text.contains("when '0' =>"));
        assert!(text.contains("when '1' =>"));
        assert!(text.contains("a_reg <= wb_dat_i;"));
        assert!(text.contains("b_reg <= wb_dat_i;"));
    }

    #[test]
    fn wide_reg_slices_big_endian() {
        // A 64-bit read-only register on a 32-bit bus: word 0 carries the
        // upper half, word 1 the lower half.
        let mut root = wb_map(
            3,
            r#"{"node": "reg", "name": "r", "access": "ro", "c_address": 0, "c_size": 8,
                "children": [{"name": "f", "lo": 0, "hi": 63, "hdl_type": "wire"}]}"#,
        );
        let module = generate_hdl(&mut root).unwrap();
        let text = module.to_string();
        assert!(text.contains("case wb_adr_i(0) is"));
        assert!(text.contains("reg_rdat_int <= f_i(63 downto 32);"));
        assert!(text.contains("reg_rdat_int <= f_i(31 downto 0);"));
    }

    #[test]
    fn narrow_field_is_sliced_on_both_sides() {
        let mut root = wb_map(
            2,
            r#"{"node": "reg", "name": "r", "access": "rw", "c_address": 0, "c_size": 4,
                "children": [{"name": "en", "lo": 3},
                             {"name": "val", "lo": 8, "hi": 15, "preset": 5}]}"#,
        );
        let module = generate_hdl(&mut root).unwrap();
        let text = module.to_string();
        // One-bit field: scalar on the register side, indexed on the bus.
        assert!(text.contains("en_reg <= wb_dat_i(3);"));
        // Ranged field.
        assert!(text.contains("val_reg <= wb_dat_i(15 downto 8);"));
        assert!(text.contains("val_reg <= \"00000101\";"));
        assert!(text.contains("reg_rdat_int(3) <= en_reg;"));
        assert!(text.contains("reg_rdat_int(15 downto 8) <= val_reg;"));
    }

    #[test]
    fn write_strobe_pulses() {
        let mut root = wb_map(
            2,
            r#"{"node": "reg", "name": "r", "access": "wo", "c_address": 0, "c_size": 4,
                "children": [{"name": "cmd", "lo": 0, "hi": 7, "hdl_write_strobe": true}]}"#,
        );
        let module = generate_hdl(&mut root).unwrap();
        assert!(module.has_port("cmd_wr"));
        let text = module.to_string();
        assert!(text.contains("cmd_wr <= '0';"));
        assert!(text.contains("cmd_wr <= '1';"));
    }

    #[test]
    fn empty_map_still_acks() {
        let mut root = wb_map(2, "");
        let module = generate_hdl(&mut root).unwrap();
        let text = module.to_string();
        assert!(text.contains("wr_ack_int <= '1';"));
        assert!(text.contains("rd_ack_int <= '1';"));
        assert!(!text.contains("reg_rdat_int"));
    }

    #[test]
    fn axi_submap_under_wishbone() {
        let mut root = wb_map(
            9,
            r#"{"node": "reg", "name": "r", "access": "rw", "c_address": 0, "c_size": 4},
               {"node": "submap", "name": "s", "interface": "axi4-lite-32",
                "c_address": 256, "c_size": 256}"#,
        );
        let module = generate_hdl(&mut root).unwrap();
        for p in [
            "s_awvalid_o",
            "s_awready_i",
            "s_awaddr_o",
            "s_wvalid_o",
            "s_bvalid_i",
            "s_arvalid_o",
            "s_rdata_i",
            "s_rresp_i",
        ] {
            assert!(module.has_port(p), "missing port {}", p);
        }
        let text = module.to_string();
        assert!(text.contains("s_aw_val <= not s_aw_done;"));
        assert!(text.contains("s_awvalid_o <= s_aw_val;"));
        assert!(text.contains("if (s_bvalid_i = '1') then"));
        assert!(text.contains("s_ar_val <= (rd_int and not s_ar_done);"));
    }

    #[test]
    fn reg_array_becomes_ram() {
        let mut root = wb_map(
            6,
            r#"{"node": "repeat", "name": "tbl", "c_address": 0, "c_size": 64,
                "count": 16, "c_elsize": 4,
                "children": [{"node": "reg", "name": "v", "access": "rw",
                              "c_address": 0, "c_size": 4}]}"#,
        );
        let module = generate_hdl(&mut root).unwrap();
        assert!(module.has_port("tbl_adr_i"));
        assert!(module.has_port("tbl_rd_i"));
        assert!(module.has_port("tbl_dat_o"));
        let text = module.to_string();
        assert!(text.contains("tbl_ram : dpssram"));
        assert!(text.contains("g_addr_width => 4"));
        assert!(text.contains("tbl_wr_dly <= '1';"));
        assert!(text.contains("if (tbl_wr_dly = '1') then"));
    }

    #[test]
    fn split_bus_gets_address_mux() {
        let src = r#"{
            "name": "m1",
            "bus": "axi4-lite-32",
            "c_word_size": 4,
            "c_sel_bits": 0,
            "c_blk_bits": 3,
            "children": [
                {"node": "reg", "name": "a", "access": "rw", "c_address": 0, "c_size": 4}
            ]
        }"#;
        let mut root = root_from_json(src).unwrap();
        let module = generate_hdl(&mut root).unwrap();
        assert!(module.has_signal("adr_int"));
        let text = module.to_string();
        assert!(text.contains("adr_int <= adrr_int;"));
        assert!(text.contains("adr_int <= adrw_int;"));
        assert!(text.contains("case adr_int(0) is"));
    }

    #[test]
    fn wishbone_has_no_address_mux() {
        let mut root = wb_map(2, REG_R);
        let module = generate_hdl(&mut root).unwrap();
        assert!(!module.has_signal("adr_int"));
    }

    #[test]
    fn block_wrapper_is_transparent() {
        let mut bare = wb_map(2, REG_R);
        let bare_mod = generate_hdl(&mut bare).unwrap();
        let mut wrapped = wb_map(
            2,
            r#"{"node": "block", "name": "blk", "c_address": 0, "c_size": 4,
                "children": [{"node": "reg", "name": "r", "access": "rw",
                              "c_address": 0, "c_size": 4,
                              "children": [{"name": "f", "lo": 0, "hi": 31}]}]}"#,
        );
        let wrapped_mod = generate_hdl(&mut wrapped).unwrap();
        // Same decoder shape (no switch at all), same write behavior
        // modulo the name prefix.
        let bare_text = bare_mod.to_string();
        let wrapped_text = wrapped_mod.to_string();
        assert!(!bare_text.contains("case"));
        assert!(!wrapped_text.contains("case"));
        assert!(bare_text.contains("f_reg <= wb_dat_i;"));
        assert!(wrapped_text.contains("blk_f_reg <= wb_dat_i;"));
    }

    #[test]
    fn generation_is_idempotent() {
        let mut a = wb_map(3, REG_R);
        let mut b = wb_map(3, REG_R);
        let m1 = generate_hdl(&mut a).unwrap();
        let m2 = generate_hdl(&mut b).unwrap();
        assert_eq!(m1, m2);
        // And re-running on the same prepared tree is stable too.
        let m3 = generate_hdl(&mut a).unwrap();
        assert_eq!(m1, m3);
    }

    #[test]
    fn unknown_bus_is_rejected() {
        let src = r#"{
            "name": "m1", "bus": "avalon-mm", "c_word_size": 4,
            "c_sel_bits": 0, "c_blk_bits": 2, "children": []
        }"#;
        let mut root = root_from_json(src).unwrap();
        let err = generate_hdl(&mut root).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedBus(_)));
    }

    #[test]
    fn repeat_of_block_is_unsupported_in_hdl() {
        let mut root = wb_map(
            6,
            r#"{"node": "repeat", "name": "rp", "c_address": 0, "c_size": 64,
                "count": 4, "c_elsize": 16,
                "children": [{"node": "block", "name": "b", "c_address": 0, "c_size": 16,
                              "children": []}]}"#,
        );
        let err = generate_hdl(&mut root).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedFeature(_)));
    }

    #[test]
    fn include_submap_is_inlined() {
        let mut root = wb_map(
            3,
            r#"{"node": "submap", "name": "inner", "interface": "include",
                "c_address": 0, "c_size": 8,
                "submap": {
                    "name": "sub", "bus": "wb-32-be", "c_word_size": 4,
                    "c_sel_bits": 0, "c_blk_bits": 3,
                    "children": [
                        {"node": "reg", "name": "x", "access": "rw",
                         "c_address": 0, "c_size": 4}
                    ]
                }}"#,
        );
        let module = generate_hdl(&mut root).unwrap();
        // No bus slave ports: the child is flattened into the parent.
        assert!(module.has_port("inner_x_o"));
        assert!(!module.has_port("inner_cyc_o"));
    }

    #[test]
    fn busgroup_bus_is_a_record_pair() {
        let src = r#"{
            "name": "m1",
            "bus": "wb-32-be",
            "c_word_size": 4,
            "c_sel_bits": 0,
            "c_blk_bits": 3,
            "x_hdl": {"busgroup": true},
            "children": [
                {"node": "reg", "name": "a", "access": "rw", "c_address": 0, "c_size": 4},
                {"node": "reg", "name": "b", "access": "rw", "c_address": 4, "c_size": 4}
            ]
        }"#;
        let mut root = root_from_json(src).unwrap();
        let module = generate_hdl(&mut root).unwrap();
        assert!(module.has_port("wb_i"));
        assert!(module.has_port("wb_o"));
        assert!(!module.has_port("wb_adr_i"));
        assert!(!module.has_port("wb_ack_o"));
        let text = module.to_string();
        assert!(text.contains("wb_i : in t_wishbone_slave_in"));
        assert!(text.contains("wb_o : out t_wishbone_slave_out"));
        assert!(text.contains("use work.wishbone_pkg.all;"));
        // The decoder and the handshake run on the record members.
        assert!(text.contains("case wb_i.adr(0) is"));
        assert!(text.contains("wb_o.ack <= ack_int;"));
        assert!(text.contains("wb_o.err <= '0';"));
        assert!(text.contains("a_reg <= wb_i.dat;"));
    }

    #[test]
    fn iogroup_collects_user_ports_into_records() {
        let src = r#"{
            "name": "m1",
            "bus": "wb-32-be",
            "c_word_size": 4,
            "c_sel_bits": 0,
            "c_blk_bits": 2,
            "x_hdl": {"iogroup": "io"},
            "children": [
                {"node": "reg", "name": "r", "access": "rw", "c_address": 0, "c_size": 4,
                 "children": [{"name": "f", "lo": 0, "hi": 31}]}
            ]
        }"#;
        let mut root = root_from_json(src).unwrap();
        let module = generate_hdl(&mut root).unwrap();
        // User ports are grouped; the bus stays flat.
        assert!(module.has_port("io_i"));
        assert!(module.has_port("io_o"));
        assert!(!module.has_port("f_i"));
        assert!(!module.has_port("f_o"));
        assert!(module.has_port("wb_adr_i"));
        let text = module.to_string();
        assert!(text.contains("package m1_pkg is"));
        assert!(text.contains("type t_io_in is record"));
        assert!(text.contains("type t_io_out is record"));
        assert!(text.contains("f_i : std_logic_vector(31 downto 0);"));
        assert!(text.contains("use work.m1_pkg.all;"));
        assert!(text.contains("io_i : in t_io_in"));
        assert!(text.contains("io_o : out t_io_out"));
        assert!(text.contains("io_o.f_o <= f_reg;"));
        // The backing register stays a plain signal and feeds the readback.
        assert!(module.has_signal("f_reg"));
        assert!(text.contains("reg_rdat_int <= f_reg;"));
    }

    #[test]
    fn field_decode_intersections() {
        // Fully below and fully above the word.
        assert_eq!(field_decode(0, 8, 32, 32), None);
        assert_eq!(field_decode(40, 8, 0, 32), None);
        // Fully inside.
        let fs = field_decode(8, 8, 0, 32).unwrap();
        assert_eq!((fs.d_lo, fs.v_lo, fs.width), (8, 0, 8));
        // Straddling the word boundary.
        let fs = field_decode(24, 16, 0, 32).unwrap();
        assert_eq!((fs.d_lo, fs.v_lo, fs.width), (24, 0, 8));
        let fs = field_decode(24, 16, 32, 32).unwrap();
        assert_eq!((fs.d_lo, fs.v_lo, fs.width), (0, 8, 8));
    }

    #[test]
    fn decoder_covers_every_choice_once() {
        // Registers at 0 and 4 plus a 16-byte block at 16: the decoder
        // must give each mapped word exactly one arm.
        let mut root = wb_map(
            5,
            r#"{"node": "reg", "name": "a", "access": "rw", "c_address": 0, "c_size": 4},
               {"node": "reg", "name": "b", "access": "rw", "c_address": 4, "c_size": 4},
               {"node": "block", "name": "blk", "c_address": 16, "c_size": 16,
                "children": [{"node": "reg", "name": "c", "access": "rw",
                              "c_address": 4, "c_size": 4}]}"#,
        );
        let module = generate_hdl(&mut root).unwrap();
        let text = module.to_string();
        assert!(text.contains("a_o"));
        assert!(text.contains("blk_c_o"));
        assert_gt!(text.matches("case").count(), 1);
        assert!(text.contains("blk_c_reg <= wb_dat_i;"));
    }
}
