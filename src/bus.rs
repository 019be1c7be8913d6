//! Bus-protocol strategies.
//!
//! Each supported protocol is a capability with five operations: expand the
//! top-level bus (ports + read/write-detect + ack combining), and the four
//! slave-side hooks used when a sub-map speaks this protocol (ports,
//! continuous wiring, write-process logic, read-mux logic). Downstream code
//! only ever talks through the `BusGen` trait; instantiation happens once,
//! by name, in `name_to_busgen`.

use log::debug;

use crate::error::RmError;
use crate::hdltree::{HdlComb, HdlExpr, HdlIfElse, HdlModule, HdlPort, HdlStmt, HdlSync, PortDir};
use crate::tree::{ilog2, Root, Submap};

/// Internal signals shared between the bus decode logic and the
/// read/write processes. All are signal names in the emitted module.
#[derive(Debug, Clone, Default)]
pub struct Isigs {
    pub rd_int: String,
    pub wr_int: String,
    pub rd_ack: String,
    pub wr_ack: String,
    pub wr_ack_done: String,
}

/// Name of the one-cycle delayed ack produced by the synchronous read
/// stage; shared with the strategies that piggyback on its latency.
pub const RD_ACK1_INT: &str = "rd_ack1_int";

/// Handle on the expanded top-level bus: names of the clock/reset, the
/// address and data wires, and whether the address channels are split.
#[derive(Debug, Clone)]
pub struct BusAccess {
    pub clk: String,
    pub rst: String,
    pub adrr: String,
    pub adrw: String,
    pub dati: String,
    pub dato: String,
    /// Word-addressed width of the address wires (at least 1).
    pub adr_bits: u32,
    pub word_bits: u32,
    pub word_size: u32,
    pub split: bool,
}

/// Names attached to a sub-map slave on the parent module.
#[derive(Debug, Clone)]
pub enum SlaveDecor {
    Wb(WbSlave),
    Axi(AxiSlave),
    Sram(SramSlave),
}

#[derive(Debug, Clone)]
pub struct WbSlave {
    pub cyc: String,
    pub stb: String,
    pub adr: String,
    pub sel: String,
    pub we: String,
    pub dato: String,
    pub ack: String,
    pub dati: String,
    /// Registered write request, driven by the write process.
    pub wr: String,
    /// Combinational read request, driven by the read mux.
    pub rd: String,
    pub adr_bits: u32,
}

#[derive(Debug, Clone)]
pub struct AxiSlave {
    pub awvalid: String,
    pub awready: String,
    pub awaddr: String,
    pub awprot: String,
    pub wvalid: String,
    pub wready: String,
    pub wdata: String,
    pub wstrb: String,
    pub bvalid: String,
    pub bready: String,
    pub arvalid: String,
    pub arready: String,
    pub araddr: String,
    pub arprot: String,
    pub rvalid: String,
    pub rready: String,
    pub rdata: String,
    pub aw_val: String,
    pub w_val: String,
    pub aw_done: String,
    pub w_done: String,
    pub ar_val: String,
    pub ar_done: String,
    pub adr_bits: u32,
}

#[derive(Debug, Clone)]
pub struct SramSlave {
    pub addr: String,
    pub dati: String,
    pub dato: String,
    pub wr: String,
    pub adr_bits: u32,
}

impl SlaveDecor {
    /// Statements for this slave inside the synchronous read stage's
    /// decoder arm (AXI needs its AR handshake registered there).
    pub fn read_sync_stmts(&self) -> Vec<HdlStmt> {
        match self {
            SlaveDecor::Axi(s) => {
                let mut got = HdlIfElse::new(HdlExpr::and(
                    HdlExpr::is_set(&s.ar_val),
                    HdlExpr::is_set(&s.arready),
                ));
                got.then_stmts
                    .push(HdlStmt::assign(HdlExpr::name(&s.ar_done), HdlExpr::Bit1));
                vec![HdlStmt::If(got)]
            }
            _ => Vec::new(),
        }
    }

    /// Reset-time statements for the synchronous read stage.
    pub fn read_sync_rst(&self) -> Vec<HdlStmt> {
        match self {
            SlaveDecor::Axi(s) => {
                vec![HdlStmt::assign(HdlExpr::name(&s.ar_done), HdlExpr::Bit0)]
            }
            _ => Vec::new(),
        }
    }

    /// Statements run while no read is pending (read stage else-branch).
    pub fn read_sync_idle(&self) -> Vec<HdlStmt> {
        match self {
            SlaveDecor::Axi(s) => {
                vec![HdlStmt::assign(HdlExpr::name(&s.ar_done), HdlExpr::Bit0)]
            }
            _ => Vec::new(),
        }
    }

    /// Per-cycle defaults at the top of the write process.
    pub fn write_sync_defaults(&self) -> Vec<HdlStmt> {
        match self {
            SlaveDecor::Sram(s) => {
                vec![HdlStmt::assign(HdlExpr::name(&s.wr), HdlExpr::Bit0)]
            }
            _ => Vec::new(),
        }
    }

    /// Combinational defaults for the read mux process.
    pub fn read_mux_defaults(&self) -> Vec<HdlStmt> {
        match self {
            SlaveDecor::Wb(s) => {
                vec![HdlStmt::assign(HdlExpr::name(&s.rd), HdlExpr::Bit0)]
            }
            SlaveDecor::Axi(s) => {
                vec![HdlStmt::assign(HdlExpr::name(&s.ar_val), HdlExpr::Bit0)]
            }
            SlaveDecor::Sram(_) => Vec::new(),
        }
    }
}

pub trait BusGen: std::fmt::Debug {
    /// Add the top-level bus ports and the internal read/write-detect and
    /// ack-combining logic. Fills `isigs` and returns the bus handle.
    fn expand_bus(
        &self,
        root: &Root,
        module: &mut HdlModule,
        isigs: &mut Isigs,
    ) -> Result<BusAccess, RmError>;

    /// Add master-side ports and signals on the parent module for a
    /// sub-map speaking this protocol.
    fn gen_bus_slave(
        &self,
        root: &Root,
        module: &mut HdlModule,
        prefix: &str,
        submap: &Submap,
        busgroup: bool,
    ) -> Result<SlaveDecor, RmError>;

    /// Continuous assignments tying the parent's address/data into the
    /// slave port group. `adr` is the unified (possibly muxed) address.
    fn wire_bus_slave(
        &self,
        bus: &BusAccess,
        adr: &str,
        stmts: &mut Vec<HdlStmt>,
        slave: &SlaveDecor,
    );

    /// Inside the write process: drive the slave's write handshake and map
    /// its write-ack back into the parent ack line. `stmts` is the decoder
    /// arm for the slave; `rst_stmts` the process reset list.
    fn write_bus_slave(
        &self,
        stmts: &mut Vec<HdlStmt>,
        rst_stmts: &mut Vec<HdlStmt>,
        slave: &SlaveDecor,
        isigs: &Isigs,
    );

    /// Inside the read mux: drive the slave's read handshake and feed its
    /// read data into the parent data mux, extending the sensitivity list.
    fn read_bus_slave(
        &self,
        stmts: &mut Vec<HdlStmt>,
        comb: &mut HdlComb,
        slave: &SlaveDecor,
        isigs: &Isigs,
        rd_data: &str,
    );
}

fn use_wishbone_pkg(module: &mut HdlModule) {
    let lib = String::from("use work.wishbone_pkg.all;");
    if !module.libraries.contains(&lib) {
        module.libraries.push(lib);
    }
}

/// Word-addressed width of the top-level address bus.
fn bus_addr_bits(root: &Root) -> u32 {
    let aw = root.c_sel_bits + root.c_blk_bits;
    std::cmp::max(1, aw.saturating_sub(root.c_addr_word_bits))
}

/// Word-addressed width of a sub-map's address bus.
fn slave_addr_bits(root: &Root, submap: &Submap) -> Result<u32, RmError> {
    if !submap.c_size.is_power_of_two() {
        return Err(RmError::invariant(&format!(
            "sub-map {} size {} is not a power of two",
            submap.name, submap.c_size
        )));
    }
    let aw = ilog2(submap.c_size);
    Ok(std::cmp::max(
        1,
        aw.saturating_sub(root.c_addr_word_bits),
    ))
}

// ========= WISHBONE ========== //

#[derive(Debug)]
pub struct Wishbone;

impl BusGen for Wishbone {
    fn expand_bus(
        &self,
        root: &Root,
        module: &mut HdlModule,
        isigs: &mut Isigs,
    ) -> Result<BusAccess, RmError> {
        let aw = bus_addr_bits(root);
        let word = root.c_word_bits;
        let busgroup = root.x_hdl.get_bool("busgroup", false);

        module.ports.push(HdlPort::new("clk_i", None, PortDir::In));
        module.ports.push(HdlPort::new("rst_n_i", None, PortDir::In));

        let (adr, dati, dato, cyc, stb, we, ack, stall);
        if busgroup {
            use_wishbone_pkg(module);
            module.ports.push(HdlPort::record(
                "wb_i",
                "t_wishbone_slave_in",
                PortDir::In,
            ));
            module.ports.push(HdlPort::record(
                "wb_o",
                "t_wishbone_slave_out",
                PortDir::Out,
            ));
            adr = String::from("wb_i.adr");
            dati = String::from("wb_i.dat");
            dato = String::from("wb_o.dat");
            cyc = String::from("wb_i.cyc");
            stb = String::from("wb_i.stb");
            we = String::from("wb_i.we");
            ack = String::from("wb_o.ack");
            stall = String::from("wb_o.stall");
            module.stmts.push(HdlStmt::assign(
                HdlExpr::name("wb_o.err"),
                HdlExpr::Bit0,
            ));
            module.stmts.push(HdlStmt::assign(
                HdlExpr::name("wb_o.rty"),
                HdlExpr::Bit0,
            ));
        } else {
            module
                .ports
                .push(HdlPort::new("wb_adr_i", Some(aw), PortDir::In));
            module
                .ports
                .push(HdlPort::new("wb_dat_i", Some(word), PortDir::In));
            module
                .ports
                .push(HdlPort::new("wb_dat_o", Some(word), PortDir::Out));
            module.ports.push(HdlPort::new("wb_cyc_i", None, PortDir::In));
            module.ports.push(HdlPort::new("wb_stb_i", None, PortDir::In));
            module.ports.push(HdlPort::new(
                "wb_sel_i",
                Some(root.c_word_size),
                PortDir::In,
            ));
            module.ports.push(HdlPort::new("wb_we_i", None, PortDir::In));
            module
                .ports
                .push(HdlPort::new("wb_ack_o", None, PortDir::Out));
            module
                .ports
                .push(HdlPort::new("wb_stall_o", None, PortDir::Out));
            adr = String::from("wb_adr_i");
            dati = String::from("wb_dat_i");
            dato = String::from("wb_dat_o");
            cyc = String::from("wb_cyc_i");
            stb = String::from("wb_stb_i");
            we = String::from("wb_we_i");
            ack = String::from("wb_ack_o");
            stall = String::from("wb_stall_o");
        }

        let wb_en = module.add_signal("wb_en", None);
        isigs.rd_int = module.add_signal("rd_int", None);
        isigs.wr_int = module.add_signal("wr_int", None);
        let ack_int = module.add_signal("ack_int", None);
        isigs.rd_ack = module.add_signal("rd_ack_int", None);
        isigs.wr_ack = module.add_signal("wr_ack_int", None);

        module.stmts.push(HdlStmt::assign(
            HdlExpr::name(&wb_en),
            HdlExpr::and(HdlExpr::name(&cyc), HdlExpr::name(&stb)),
        ));
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.rd_int),
            HdlExpr::and(HdlExpr::name(&wb_en), HdlExpr::not(HdlExpr::name(&we))),
        ));
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.wr_int),
            HdlExpr::and(HdlExpr::name(&wb_en), HdlExpr::name(&we)),
        ));
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name(&ack_int),
            HdlExpr::or(
                HdlExpr::name(&isigs.rd_ack),
                HdlExpr::name(&isigs.wr_ack),
            ),
        ));
        module
            .stmts
            .push(HdlStmt::assign(HdlExpr::name(&ack), HdlExpr::name(&ack_int)));
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name(&stall),
            HdlExpr::and(
                HdlExpr::not(HdlExpr::name(&ack_int)),
                HdlExpr::name(&wb_en),
            ),
        ));

        Ok(BusAccess {
            clk: String::from("clk_i"),
            rst: String::from("rst_n_i"),
            adrr: adr.clone(),
            adrw: adr,
            dati,
            dato,
            adr_bits: aw,
            word_bits: word,
            word_size: root.c_word_size,
            split: false,
        })
    }

    fn gen_bus_slave(
        &self,
        root: &Root,
        module: &mut HdlModule,
        prefix: &str,
        submap: &Submap,
        busgroup: bool,
    ) -> Result<SlaveDecor, RmError> {
        let aw = slave_addr_bits(root, submap)?;
        let word = root.c_word_bits;
        debug!("wishbone slave {} ({} address bits)", submap.name, aw);

        let mk = |suffix: &str| format!("{}{}", prefix, suffix);
        let decor = if busgroup {
            use_wishbone_pkg(module);
            module.ports.push(HdlPort::record(
                &mk("wb_o"),
                "t_wishbone_master_out",
                PortDir::Out,
            ));
            module.ports.push(HdlPort::record(
                &mk("wb_i"),
                "t_wishbone_master_in",
                PortDir::In,
            ));
            WbSlave {
                cyc: format!("{}.cyc", mk("wb_o")),
                stb: format!("{}.stb", mk("wb_o")),
                adr: format!("{}.adr", mk("wb_o")),
                sel: format!("{}.sel", mk("wb_o")),
                we: format!("{}.we", mk("wb_o")),
                dato: format!("{}.dat", mk("wb_o")),
                ack: format!("{}.ack", mk("wb_i")),
                dati: format!("{}.dat", mk("wb_i")),
                wr: module.add_signal(&mk("wr"), None),
                rd: module.add_signal(&mk("rd"), None),
                adr_bits: aw,
            }
        } else {
            module
                .ports
                .push(HdlPort::new(&mk("cyc_o"), None, PortDir::Out));
            module
                .ports
                .push(HdlPort::new(&mk("stb_o"), None, PortDir::Out));
            module
                .ports
                .push(HdlPort::new(&mk("adr_o"), Some(aw), PortDir::Out));
            module.ports.push(HdlPort::new(
                &mk("sel_o"),
                Some(root.c_word_size),
                PortDir::Out,
            ));
            module
                .ports
                .push(HdlPort::new(&mk("we_o"), None, PortDir::Out));
            module
                .ports
                .push(HdlPort::new(&mk("dat_o"), Some(word), PortDir::Out));
            module
                .ports
                .push(HdlPort::new(&mk("ack_i"), None, PortDir::In));
            module
                .ports
                .push(HdlPort::new(&mk("stall_i"), None, PortDir::In));
            module
                .ports
                .push(HdlPort::new(&mk("dat_i"), Some(word), PortDir::In));
            WbSlave {
                cyc: mk("cyc_o"),
                stb: mk("stb_o"),
                adr: mk("adr_o"),
                sel: mk("sel_o"),
                we: mk("we_o"),
                dato: mk("dat_o"),
                ack: mk("ack_i"),
                dati: mk("dat_i"),
                wr: module.add_signal(&mk("wr"), None),
                rd: module.add_signal(&mk("rd"), None),
                adr_bits: aw,
            }
        };
        Ok(SlaveDecor::Wb(decor))
    }

    fn wire_bus_slave(
        &self,
        bus: &BusAccess,
        adr: &str,
        stmts: &mut Vec<HdlStmt>,
        slave: &SlaveDecor,
    ) {
        let s = match slave {
            SlaveDecor::Wb(s) => s,
            _ => unreachable!(),
        };
        let req = HdlExpr::or(HdlExpr::name(&s.wr), HdlExpr::name(&s.rd));
        stmts.push(HdlStmt::assign(HdlExpr::name(&s.cyc), req.clone()));
        stmts.push(HdlStmt::assign(HdlExpr::name(&s.stb), req));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.adr),
            HdlExpr::slice(adr, 0, s.adr_bits),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.sel),
            HdlExpr::replicate(HdlExpr::Bit1, bus.word_size),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.we),
            HdlExpr::name(&s.wr),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.dato),
            HdlExpr::name(&bus.dati),
        ));
    }

    fn write_bus_slave(
        &self,
        stmts: &mut Vec<HdlStmt>,
        rst_stmts: &mut Vec<HdlStmt>,
        slave: &SlaveDecor,
        isigs: &Isigs,
    ) {
        let s = match slave {
            SlaveDecor::Wb(s) => s,
            _ => unreachable!(),
        };
        rst_stmts.push(HdlStmt::assign(HdlExpr::name(&s.wr), HdlExpr::Bit0));
        stmts.push(HdlStmt::assign(HdlExpr::name(&s.wr), HdlExpr::Bit1));
        let mut acked = HdlIfElse::new(HdlExpr::is_set(&s.ack));
        acked
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&s.wr), HdlExpr::Bit0));
        acked
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&isigs.wr_ack), HdlExpr::Bit1));
        acked.then_stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.wr_ack_done),
            HdlExpr::Bit1,
        ));
        stmts.push(HdlStmt::If(acked));
    }

    fn read_bus_slave(
        &self,
        stmts: &mut Vec<HdlStmt>,
        comb: &mut HdlComb,
        slave: &SlaveDecor,
        isigs: &Isigs,
        rd_data: &str,
    ) {
        let s = match slave {
            SlaveDecor::Wb(s) => s,
            _ => unreachable!(),
        };
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.rd),
            HdlExpr::name(&isigs.rd_int),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(rd_data),
            HdlExpr::name(&s.dati),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.rd_ack),
            HdlExpr::name(&s.ack),
        ));
        comb.sense(&isigs.rd_int);
        comb.sense(&s.dati);
        comb.sense(&s.ack);
    }
}

// ========= AXI4-LITE ========== //

#[derive(Debug)]
pub struct Axi4Lite;

impl BusGen for Axi4Lite {
    fn expand_bus(
        &self,
        root: &Root,
        module: &mut HdlModule,
        isigs: &mut Isigs,
    ) -> Result<BusAccess, RmError> {
        let aw = bus_addr_bits(root);
        let word = root.c_word_bits;

        module.ports.push(HdlPort::new("clk_i", None, PortDir::In));
        module.ports.push(HdlPort::new("rst_n_i", None, PortDir::In));

        for (name, width, dir) in [
            ("awvalid_i", None, PortDir::In),
            ("awready_o", None, PortDir::Out),
            ("awaddr_i", Some(aw), PortDir::In),
            ("awprot_i", Some(3), PortDir::In),
            ("wvalid_i", None, PortDir::In),
            ("wready_o", None, PortDir::Out),
            ("wdata_i", Some(word), PortDir::In),
            ("wstrb_i", Some(root.c_word_size), PortDir::In),
            ("bvalid_o", None, PortDir::Out),
            ("bready_i", None, PortDir::In),
            ("bresp_o", Some(2), PortDir::Out),
            ("arvalid_i", None, PortDir::In),
            ("arready_o", None, PortDir::Out),
            ("araddr_i", Some(aw), PortDir::In),
            ("arprot_i", Some(3), PortDir::In),
            ("rvalid_o", None, PortDir::Out),
            ("rready_i", None, PortDir::In),
            ("rdata_o", Some(word), PortDir::Out),
            ("rresp_o", Some(2), PortDir::Out),
        ] {
            module.ports.push(HdlPort::new(name, width, dir));
        }

        let awready = module.add_signal("awready_r", None);
        let wready = module.add_signal("wready_r", None);
        let arready = module.add_signal("arready_r", None);
        let bvalid = module.add_signal("bvalid_r", None);
        let rvalid = module.add_signal("rvalid_r", None);
        let adrw = module.add_signal("adrw_int", Some(aw));
        let adrr = module.add_signal("adrr_int", Some(aw));
        let wdata = module.add_signal("wdata_int", Some(word));
        let rdata = module.add_signal("rdata_int", Some(word));
        let rd_dat = module.add_signal("rd_dat_int", Some(word));
        isigs.rd_int = module.add_signal("rd_int", None);
        isigs.wr_int = module.add_signal("wr_int", None);
        isigs.rd_ack = module.add_signal("rd_ack_int", None);
        isigs.wr_ack = module.add_signal("wr_ack_int", None);

        for (port, sig) in [
            ("awready_o", &awready),
            ("wready_o", &wready),
            ("arready_o", &arready),
            ("bvalid_o", &bvalid),
            ("rvalid_o", &rvalid),
            ("rdata_o", &rdata),
        ] {
            module
                .stmts
                .push(HdlStmt::assign(HdlExpr::name(port), HdlExpr::name(sig)));
        }
        // OKAY responses only.
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name("bresp_o"),
            HdlExpr::cst(0, 2),
        ));
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name("rresp_o"),
            HdlExpr::cst(0, 2),
        ));

        // A write is pending once both AW and W have been accepted and the
        // response has not been issued yet; a read likewise for AR/R.
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.wr_int),
            HdlExpr::and(
                HdlExpr::and(
                    HdlExpr::not(HdlExpr::name(&awready)),
                    HdlExpr::not(HdlExpr::name(&wready)),
                ),
                HdlExpr::not(HdlExpr::name(&bvalid)),
            ),
        ));
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.rd_int),
            HdlExpr::and(
                HdlExpr::not(HdlExpr::name(&arready)),
                HdlExpr::not(HdlExpr::name(&rvalid)),
            ),
        ));

        // Write-channel machine.
        let mut wrproc = HdlSync::new("clk_i", "rst_n_i");
        wrproc
            .rst_stmts
            .push(HdlStmt::assign(HdlExpr::name(&awready), HdlExpr::Bit1));
        wrproc
            .rst_stmts
            .push(HdlStmt::assign(HdlExpr::name(&wready), HdlExpr::Bit1));
        wrproc
            .rst_stmts
            .push(HdlStmt::assign(HdlExpr::name(&bvalid), HdlExpr::Bit0));
        wrproc.rst_stmts.push(HdlStmt::assign(
            HdlExpr::name(&adrw),
            HdlExpr::replicate(HdlExpr::Bit0, aw),
        ));
        wrproc.rst_stmts.push(HdlStmt::assign(
            HdlExpr::name(&wdata),
            HdlExpr::replicate(HdlExpr::Bit0, word),
        ));
        let mut aw_beat = HdlIfElse::new(HdlExpr::and(
            HdlExpr::is_set("awvalid_i"),
            HdlExpr::is_set(&awready),
        ));
        aw_beat.then_stmts.push(HdlStmt::assign(
            HdlExpr::name(&adrw),
            HdlExpr::name("awaddr_i"),
        ));
        aw_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&awready), HdlExpr::Bit0));
        wrproc.sync_stmts.push(HdlStmt::If(aw_beat));
        let mut w_beat = HdlIfElse::new(HdlExpr::and(
            HdlExpr::is_set("wvalid_i"),
            HdlExpr::is_set(&wready),
        ));
        w_beat.then_stmts.push(HdlStmt::assign(
            HdlExpr::name(&wdata),
            HdlExpr::name("wdata_i"),
        ));
        w_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&wready), HdlExpr::Bit0));
        wrproc.sync_stmts.push(HdlStmt::If(w_beat));
        let mut wr_done = HdlIfElse::new(HdlExpr::is_set(&isigs.wr_ack));
        wr_done
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&bvalid), HdlExpr::Bit1));
        wr_done
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&awready), HdlExpr::Bit1));
        wr_done
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&wready), HdlExpr::Bit1));
        wrproc.sync_stmts.push(HdlStmt::If(wr_done));
        let mut b_beat = HdlIfElse::new(HdlExpr::and(
            HdlExpr::is_set(&bvalid),
            HdlExpr::is_set("bready_i"),
        ));
        b_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&bvalid), HdlExpr::Bit0));
        wrproc.sync_stmts.push(HdlStmt::If(b_beat));
        module.stmts.push(HdlStmt::Sync(wrproc));

        // Read-channel machine.
        let mut rdproc = HdlSync::new("clk_i", "rst_n_i");
        rdproc
            .rst_stmts
            .push(HdlStmt::assign(HdlExpr::name(&arready), HdlExpr::Bit1));
        rdproc
            .rst_stmts
            .push(HdlStmt::assign(HdlExpr::name(&rvalid), HdlExpr::Bit0));
        rdproc.rst_stmts.push(HdlStmt::assign(
            HdlExpr::name(&adrr),
            HdlExpr::replicate(HdlExpr::Bit0, aw),
        ));
        rdproc.rst_stmts.push(HdlStmt::assign(
            HdlExpr::name(&rdata),
            HdlExpr::replicate(HdlExpr::Bit0, word),
        ));
        let mut ar_beat = HdlIfElse::new(HdlExpr::and(
            HdlExpr::is_set("arvalid_i"),
            HdlExpr::is_set(&arready),
        ));
        ar_beat.then_stmts.push(HdlStmt::assign(
            HdlExpr::name(&adrr),
            HdlExpr::name("araddr_i"),
        ));
        ar_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&arready), HdlExpr::Bit0));
        rdproc.sync_stmts.push(HdlStmt::If(ar_beat));
        let mut rd_done = HdlIfElse::new(HdlExpr::is_set(&isigs.rd_ack));
        rd_done.then_stmts.push(HdlStmt::assign(
            HdlExpr::name(&rdata),
            HdlExpr::name(&rd_dat),
        ));
        rd_done
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&rvalid), HdlExpr::Bit1));
        rd_done
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&arready), HdlExpr::Bit1));
        rdproc.sync_stmts.push(HdlStmt::If(rd_done));
        let mut r_beat = HdlIfElse::new(HdlExpr::and(
            HdlExpr::is_set(&rvalid),
            HdlExpr::is_set("rready_i"),
        ));
        r_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&rvalid), HdlExpr::Bit0));
        rdproc.sync_stmts.push(HdlStmt::If(r_beat));
        module.stmts.push(HdlStmt::Sync(rdproc));

        Ok(BusAccess {
            clk: String::from("clk_i"),
            rst: String::from("rst_n_i"),
            adrr,
            adrw,
            dati: wdata,
            dato: rd_dat,
            adr_bits: aw,
            word_bits: word,
            word_size: root.c_word_size,
            split: true,
        })
    }

    fn gen_bus_slave(
        &self,
        root: &Root,
        module: &mut HdlModule,
        prefix: &str,
        submap: &Submap,
        _busgroup: bool,
    ) -> Result<SlaveDecor, RmError> {
        let aw = slave_addr_bits(root, submap)?;
        let word = root.c_word_bits;
        debug!("axi4-lite slave {} ({} address bits)", submap.name, aw);

        let mk = |suffix: &str| format!("{}{}", prefix, suffix);
        for (name, width, dir) in [
            ("awvalid_o", None, PortDir::Out),
            ("awready_i", None, PortDir::In),
            ("awaddr_o", Some(aw), PortDir::Out),
            ("awprot_o", Some(3), PortDir::Out),
            ("wvalid_o", None, PortDir::Out),
            ("wready_i", None, PortDir::In),
            ("wdata_o", Some(word), PortDir::Out),
            ("wstrb_o", Some(root.c_word_size), PortDir::Out),
            ("bvalid_i", None, PortDir::In),
            ("bready_o", None, PortDir::Out),
            ("bresp_i", Some(2), PortDir::In),
            ("arvalid_o", None, PortDir::Out),
            ("arready_i", None, PortDir::In),
            ("araddr_o", Some(aw), PortDir::Out),
            ("arprot_o", Some(3), PortDir::Out),
            ("rvalid_i", None, PortDir::In),
            ("rready_o", None, PortDir::Out),
            ("rdata_i", Some(word), PortDir::In),
            ("rresp_i", Some(2), PortDir::In),
        ] {
            module.ports.push(HdlPort::new(&mk(name), width, dir));
        }

        Ok(SlaveDecor::Axi(AxiSlave {
            awvalid: mk("awvalid_o"),
            awready: mk("awready_i"),
            awaddr: mk("awaddr_o"),
            awprot: mk("awprot_o"),
            wvalid: mk("wvalid_o"),
            wready: mk("wready_i"),
            wdata: mk("wdata_o"),
            wstrb: mk("wstrb_o"),
            bvalid: mk("bvalid_i"),
            bready: mk("bready_o"),
            arvalid: mk("arvalid_o"),
            arready: mk("arready_i"),
            araddr: mk("araddr_o"),
            arprot: mk("arprot_o"),
            rvalid: mk("rvalid_i"),
            rready: mk("rready_o"),
            rdata: mk("rdata_i"),
            aw_val: module.add_signal(&mk("aw_val"), None),
            w_val: module.add_signal(&mk("w_val"), None),
            aw_done: module.add_signal(&mk("aw_done"), None),
            w_done: module.add_signal(&mk("w_done"), None),
            ar_val: module.add_signal(&mk("ar_val"), None),
            ar_done: module.add_signal(&mk("ar_done"), None),
            adr_bits: aw,
        }))
    }

    fn wire_bus_slave(
        &self,
        bus: &BusAccess,
        _adr: &str,
        stmts: &mut Vec<HdlStmt>,
        slave: &SlaveDecor,
    ) {
        let s = match slave {
            SlaveDecor::Axi(s) => s,
            _ => unreachable!(),
        };
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.awvalid),
            HdlExpr::name(&s.aw_val),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.awaddr),
            HdlExpr::slice(&bus.adrw, 0, s.adr_bits),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.awprot),
            HdlExpr::cst(0, 3),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.wvalid),
            HdlExpr::name(&s.w_val),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.wdata),
            HdlExpr::name(&bus.dati),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.wstrb),
            HdlExpr::replicate(HdlExpr::Bit1, bus.word_size),
        ));
        stmts.push(HdlStmt::assign(HdlExpr::name(&s.bready), HdlExpr::Bit1));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.arvalid),
            HdlExpr::name(&s.ar_val),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.araddr),
            HdlExpr::slice(&bus.adrr, 0, s.adr_bits),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.arprot),
            HdlExpr::cst(0, 3),
        ));
        stmts.push(HdlStmt::assign(HdlExpr::name(&s.rready), HdlExpr::Bit1));
    }

    fn write_bus_slave(
        &self,
        stmts: &mut Vec<HdlStmt>,
        rst_stmts: &mut Vec<HdlStmt>,
        slave: &SlaveDecor,
        isigs: &Isigs,
    ) {
        let s = match slave {
            SlaveDecor::Axi(s) => s,
            _ => unreachable!(),
        };
        for sig in [&s.aw_val, &s.w_val, &s.aw_done, &s.w_done] {
            rst_stmts.push(HdlStmt::assign(HdlExpr::name(sig), HdlExpr::Bit0));
        }

        // Each address/data channel handshakes once; the *_done latch keeps
        // the valid from re-asserting while the response is pending.
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.aw_val),
            HdlExpr::not(HdlExpr::name(&s.aw_done)),
        ));
        let mut aw_beat = HdlIfElse::new(HdlExpr::and(
            HdlExpr::is_set(&s.aw_val),
            HdlExpr::is_set(&s.awready),
        ));
        aw_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&s.aw_val), HdlExpr::Bit0));
        aw_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&s.aw_done), HdlExpr::Bit1));
        stmts.push(HdlStmt::If(aw_beat));

        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.w_val),
            HdlExpr::not(HdlExpr::name(&s.w_done)),
        ));
        let mut w_beat = HdlIfElse::new(HdlExpr::and(
            HdlExpr::is_set(&s.w_val),
            HdlExpr::is_set(&s.wready),
        ));
        w_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&s.w_val), HdlExpr::Bit0));
        w_beat
            .then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&s.w_done), HdlExpr::Bit1));
        stmts.push(HdlStmt::If(w_beat));

        let mut resp = HdlIfElse::new(HdlExpr::is_set(&s.bvalid));
        resp.then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&isigs.wr_ack), HdlExpr::Bit1));
        resp.then_stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.wr_ack_done),
            HdlExpr::Bit1,
        ));
        resp.then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&s.aw_done), HdlExpr::Bit0));
        resp.then_stmts
            .push(HdlStmt::assign(HdlExpr::name(&s.w_done), HdlExpr::Bit0));
        stmts.push(HdlStmt::If(resp));
    }

    fn read_bus_slave(
        &self,
        stmts: &mut Vec<HdlStmt>,
        comb: &mut HdlComb,
        slave: &SlaveDecor,
        isigs: &Isigs,
        rd_data: &str,
    ) {
        let s = match slave {
            SlaveDecor::Axi(s) => s,
            _ => unreachable!(),
        };
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.ar_val),
            HdlExpr::and(
                HdlExpr::name(&isigs.rd_int),
                HdlExpr::not(HdlExpr::name(&s.ar_done)),
            ),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(rd_data),
            HdlExpr::name(&s.rdata),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.rd_ack),
            HdlExpr::name(&s.rvalid),
        ));
        comb.sense(&isigs.rd_int);
        comb.sense(&s.rdata);
        comb.sense(&s.rvalid);
        comb.sense(&s.ar_done);
    }
}

// ========= CERN-BE-VME ========== //

#[derive(Debug)]
pub struct CernBeVme {
    pub buserr: bool,
    pub split: bool,
}

impl BusGen for CernBeVme {
    fn expand_bus(
        &self,
        root: &Root,
        module: &mut HdlModule,
        isigs: &mut Isigs,
    ) -> Result<BusAccess, RmError> {
        let aw = bus_addr_bits(root);
        let word = root.c_word_bits;

        module.ports.push(HdlPort::new("clk_i", None, PortDir::In));
        module.ports.push(HdlPort::new("rst_n_i", None, PortDir::In));

        let (adrr, adrw);
        if self.split {
            module
                .ports
                .push(HdlPort::new("VMERdAddr", Some(aw), PortDir::In));
            module
                .ports
                .push(HdlPort::new("VMEWrAddr", Some(aw), PortDir::In));
            adrr = String::from("VMERdAddr");
            adrw = String::from("VMEWrAddr");
        } else {
            module
                .ports
                .push(HdlPort::new("VMEAddr", Some(aw), PortDir::In));
            adrr = String::from("VMEAddr");
            adrw = String::from("VMEAddr");
        }
        module
            .ports
            .push(HdlPort::new("VMERdData", Some(word), PortDir::Out));
        module
            .ports
            .push(HdlPort::new("VMEWrData", Some(word), PortDir::In));
        module.ports.push(HdlPort::new("VMERdMem", None, PortDir::In));
        module.ports.push(HdlPort::new("VMEWrMem", None, PortDir::In));
        module
            .ports
            .push(HdlPort::new("VMERdDone", None, PortDir::Out));
        module
            .ports
            .push(HdlPort::new("VMEWrDone", None, PortDir::Out));
        if self.buserr {
            module
                .ports
                .push(HdlPort::new("VMERdError", None, PortDir::Out));
            module
                .ports
                .push(HdlPort::new("VMEWrError", None, PortDir::Out));
        }

        // rd/wr strobes come straight off the bus; done lines are the acks.
        isigs.rd_int = String::from("VMERdMem");
        isigs.wr_int = String::from("VMEWrMem");
        isigs.rd_ack = module.add_signal("rd_ack_int", None);
        isigs.wr_ack = module.add_signal("wr_ack_int", None);
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name("VMERdDone"),
            HdlExpr::name(&isigs.rd_ack),
        ));
        module.stmts.push(HdlStmt::assign(
            HdlExpr::name("VMEWrDone"),
            HdlExpr::name(&isigs.wr_ack),
        ));
        if self.buserr {
            module.stmts.push(HdlStmt::assign(
                HdlExpr::name("VMERdError"),
                HdlExpr::Bit0,
            ));
            module.stmts.push(HdlStmt::assign(
                HdlExpr::name("VMEWrError"),
                HdlExpr::Bit0,
            ));
        }

        Ok(BusAccess {
            clk: String::from("clk_i"),
            rst: String::from("rst_n_i"),
            adrr,
            adrw,
            dati: String::from("VMEWrData"),
            dato: String::from("VMERdData"),
            adr_bits: aw,
            word_bits: word,
            word_size: root.c_word_size,
            split: self.split,
        })
    }

    fn gen_bus_slave(
        &self,
        _root: &Root,
        _module: &mut HdlModule,
        _prefix: &str,
        submap: &Submap,
        _busgroup: bool,
    ) -> Result<SlaveDecor, RmError> {
        Err(RmError::unsupported(&format!(
            "cern-be-vme sub-map slave (for {})",
            submap.name
        )))
    }

    fn wire_bus_slave(
        &self,
        _bus: &BusAccess,
        _adr: &str,
        _stmts: &mut Vec<HdlStmt>,
        _slave: &SlaveDecor,
    ) {
        unreachable!("cern-be-vme has no slave support")
    }

    fn write_bus_slave(
        &self,
        _stmts: &mut Vec<HdlStmt>,
        _rst_stmts: &mut Vec<HdlStmt>,
        _slave: &SlaveDecor,
        _isigs: &Isigs,
    ) {
        unreachable!("cern-be-vme has no slave support")
    }

    fn read_bus_slave(
        &self,
        _stmts: &mut Vec<HdlStmt>,
        _comb: &mut HdlComb,
        _slave: &SlaveDecor,
        _isigs: &Isigs,
        _rd_data: &str,
    ) {
        unreachable!("cern-be-vme has no slave support")
    }
}

// ========= SRAM ========== //

#[derive(Debug)]
pub struct Sram;

impl BusGen for Sram {
    fn expand_bus(
        &self,
        _root: &Root,
        _module: &mut HdlModule,
        _isigs: &mut Isigs,
    ) -> Result<BusAccess, RmError> {
        Err(RmError::unsupported("sram as a top-level bus"))
    }

    fn gen_bus_slave(
        &self,
        root: &Root,
        module: &mut HdlModule,
        prefix: &str,
        submap: &Submap,
        _busgroup: bool,
    ) -> Result<SlaveDecor, RmError> {
        let aw = slave_addr_bits(root, submap)?;
        let word = root.c_word_bits;
        let mk = |suffix: &str| format!("{}{}", prefix, suffix);
        module
            .ports
            .push(HdlPort::new(&mk("addr_o"), Some(aw), PortDir::Out));
        module
            .ports
            .push(HdlPort::new(&mk("data_i"), Some(word), PortDir::In));
        module
            .ports
            .push(HdlPort::new(&mk("data_o"), Some(word), PortDir::Out));
        module
            .ports
            .push(HdlPort::new(&mk("wr_o"), None, PortDir::Out));
        Ok(SlaveDecor::Sram(SramSlave {
            addr: mk("addr_o"),
            dati: mk("data_i"),
            dato: mk("data_o"),
            wr: mk("wr_o"),
            adr_bits: aw,
        }))
    }

    fn wire_bus_slave(
        &self,
        bus: &BusAccess,
        adr: &str,
        stmts: &mut Vec<HdlStmt>,
        slave: &SlaveDecor,
    ) {
        let s = match slave {
            SlaveDecor::Sram(s) => s,
            _ => unreachable!(),
        };
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.addr),
            HdlExpr::slice(adr, 0, s.adr_bits),
        ));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&s.dato),
            HdlExpr::name(&bus.dati),
        ));
    }

    fn write_bus_slave(
        &self,
        stmts: &mut Vec<HdlStmt>,
        rst_stmts: &mut Vec<HdlStmt>,
        slave: &SlaveDecor,
        isigs: &Isigs,
    ) {
        let s = match slave {
            SlaveDecor::Sram(s) => s,
            _ => unreachable!(),
        };
        rst_stmts.push(HdlStmt::assign(HdlExpr::name(&s.wr), HdlExpr::Bit0));
        stmts.push(HdlStmt::assign(HdlExpr::name(&s.wr), HdlExpr::Bit1));
        stmts.push(HdlStmt::assign(HdlExpr::name(&isigs.wr_ack), HdlExpr::Bit1));
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.wr_ack_done),
            HdlExpr::Bit1,
        ));
    }

    fn read_bus_slave(
        &self,
        stmts: &mut Vec<HdlStmt>,
        comb: &mut HdlComb,
        slave: &SlaveDecor,
        isigs: &Isigs,
        rd_data: &str,
    ) {
        let s = match slave {
            SlaveDecor::Sram(s) => s,
            _ => unreachable!(),
        };
        stmts.push(HdlStmt::assign(
            HdlExpr::name(rd_data),
            HdlExpr::name(&s.dati),
        ));
        // The external SRAM has one cycle of read latency; reuse the
        // delayed ack from the register read stage.
        stmts.push(HdlStmt::assign(
            HdlExpr::name(&isigs.rd_ack),
            HdlExpr::name(RD_ACK1_INT),
        ));
        comb.sense(&s.dati);
        comb.sense(RD_ACK1_INT);
    }
}

// ========= DISPATCH ========== //

/// Map a bus protocol identifier to its strategy.
pub fn name_to_busgen(name: &str) -> Result<Box<dyn BusGen>, RmError> {
    if name == "wb-32-be" {
        return Ok(Box::new(Wishbone));
    }
    if name == "axi4-lite-32" {
        return Ok(Box::new(Axi4Lite));
    }
    if name == "sram" {
        return Ok(Box::new(Sram));
    }
    if let Some(rest) = name.strip_prefix("cern-be-vme-") {
        let (buserr, rest) = match rest.strip_prefix("err-") {
            Some(r) => (true, r),
            None => (false, rest),
        };
        let (split, rest) = match rest.strip_prefix("split-") {
            Some(r) => (true, r),
            None => (false, rest),
        };
        if rest.is_empty() {
            return Err(RmError::unsupported_bus(name));
        }
        return Ok(Box::new(CernBeVme { buserr, split }));
    }
    Err(RmError::unsupported_bus(name))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tree::Root;

    fn test_root(bus: &str) -> Root {
        let src = format!(
            r#"{{
                "name": "m1",
                "bus": "{}",
                "c_word_size": 4,
                "c_sel_bits": 0,
                "c_blk_bits": 3,
                "children": []
            }}"#,
            bus
        );
        crate::tree::root_from_json(&src).unwrap()
    }

    #[test]
    fn dispatch_known_names() {
        assert!(name_to_busgen("wb-32-be").is_ok());
        assert!(name_to_busgen("axi4-lite-32").is_ok());
        assert!(name_to_busgen("sram").is_ok());
        assert!(name_to_busgen("cern-be-vme-32").is_ok());
        assert!(name_to_busgen("cern-be-vme-err-32").is_ok());
        assert!(name_to_busgen("cern-be-vme-split-32").is_ok());
        assert!(name_to_busgen("cern-be-vme-err-split-32").is_ok());
    }

    #[test]
    fn dispatch_unknown_name() {
        let err = name_to_busgen("apb3").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedBus(String::from("apb3")));
        let err = name_to_busgen("cern-be-vme-").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedBus(_)));
    }

    #[test]
    fn wishbone_expand_ports_and_equations() {
        let root = test_root("wb-32-be");
        let mut module = HdlModule::new("m1", None);
        let mut isigs = Isigs::default();
        let bus = Wishbone.expand_bus(&root, &mut module, &mut isigs).unwrap();
        for p in [
            "wb_adr_i", "wb_dat_i", "wb_dat_o", "wb_cyc_i", "wb_stb_i", "wb_sel_i", "wb_we_i",
            "wb_ack_o", "wb_stall_o",
        ] {
            assert!(module.has_port(p), "missing port {}", p);
        }
        assert!(!bus.split);
        assert_eq!(bus.adrr, bus.adrw);
        assert_eq!(bus.adr_bits, 1);
        assert_eq!(isigs.rd_int, "rd_int");
        let text: Vec<String> = module.stmts.iter().map(|s| format!("{:?}", s)).collect();
        let all = text.join("\n");
        assert!(all.contains("wb_en"));
        assert!(all.contains("wb_stall_o"));
    }

    #[test]
    fn axi_expand_is_split() {
        let root = test_root("axi4-lite-32");
        let mut module = HdlModule::new("m1", None);
        let mut isigs = Isigs::default();
        let bus = Axi4Lite.expand_bus(&root, &mut module, &mut isigs).unwrap();
        assert!(bus.split);
        assert_ne!(bus.adrr, bus.adrw);
        for p in ["awvalid_i", "wready_o", "bresp_o", "araddr_i", "rdata_o"] {
            assert!(module.has_port(p), "missing port {}", p);
        }
        for s in ["awready_r", "wready_r", "arready_r", "bvalid_r", "rvalid_r"] {
            assert!(module.has_signal(s), "missing signal {}", s);
        }
    }

    #[test]
    fn cern_flags_from_name() {
        let root = test_root("cern-be-vme-err-split-32");
        let mut module = HdlModule::new("m1", None);
        let mut isigs = Isigs::default();
        let gen = name_to_busgen("cern-be-vme-err-split-32").unwrap();
        let bus = gen.expand_bus(&root, &mut module, &mut isigs).unwrap();
        assert!(bus.split);
        assert!(module.has_port("VMERdAddr"));
        assert!(module.has_port("VMEWrAddr"));
        assert!(module.has_port("VMERdError"));
        assert_eq!(isigs.rd_int, "VMERdMem");
    }

    #[test]
    fn cern_unsplit_aliases_address() {
        let root = test_root("cern-be-vme-32");
        let mut module = HdlModule::new("m1", None);
        let mut isigs = Isigs::default();
        let gen = name_to_busgen("cern-be-vme-32").unwrap();
        let bus = gen.expand_bus(&root, &mut module, &mut isigs).unwrap();
        assert!(!bus.split);
        assert_eq!(bus.adrr, "VMEAddr");
        assert_eq!(bus.adrw, "VMEAddr");
        assert!(!module.has_port("VMERdError"));
    }

    #[test]
    fn wishbone_busgroup_uses_record_ports() {
        let src = r#"{
            "name": "m1",
            "bus": "wb-32-be",
            "c_word_size": 4,
            "c_sel_bits": 0,
            "c_blk_bits": 3,
            "x_hdl": {"busgroup": true},
            "children": []
        }"#;
        let root = crate::tree::root_from_json(src).unwrap();
        let mut module = HdlModule::new("m1", None);
        let mut isigs = Isigs::default();
        let bus = Wishbone.expand_bus(&root, &mut module, &mut isigs).unwrap();
        assert!(module.has_port("wb_i"));
        assert!(module.has_port("wb_o"));
        assert!(!module.has_port("wb_adr_i"));
        assert!(!module.has_port("wb_cyc_i"));
        assert_eq!(bus.adrr, "wb_i.adr");
        assert_eq!(bus.dato, "wb_o.dat");
        assert!(module
            .libraries
            .contains(&String::from("use work.wishbone_pkg.all;")));
        let text = module
            .stmts
            .iter()
            .map(|s| format!("{:?}", s))
            .collect::<Vec<String>>()
            .join("\n");
        // The unused error/retry lines of the record are tied low.
        assert!(text.contains("wb_o.err"));
        assert!(text.contains("wb_o.rty"));
    }

    #[test]
    fn wishbone_slave_busgroup_uses_record_ports() {
        let root = test_root("wb-32-be");
        let mut module = HdlModule::new("m1", None);
        let submap: Submap = serde_json::from_str(
            r#"{"name": "s", "c_address": 256, "c_size": 256, "interface": "wb-32-be"}"#,
        )
        .unwrap();
        let slave = Wishbone
            .gen_bus_slave(&root, &mut module, "s_", &submap, true)
            .unwrap();
        assert!(module.has_port("s_wb_o"));
        assert!(module.has_port("s_wb_i"));
        assert!(!module.has_port("s_cyc_o"));
        assert!(module
            .libraries
            .contains(&String::from("use work.wishbone_pkg.all;")));
        match slave {
            SlaveDecor::Wb(s) => {
                assert_eq!(s.cyc, "s_wb_o.cyc");
                assert_eq!(s.ack, "s_wb_i.ack");
                assert_eq!(s.adr_bits, 6);
            }
            _ => panic!("expected a wishbone slave"),
        }
    }

    #[test]
    fn sram_top_level_is_rejected() {
        let root = test_root("sram");
        let mut module = HdlModule::new("m1", None);
        let mut isigs = Isigs::default();
        let err = Sram.expand_bus(&root, &mut module, &mut isigs).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedFeature(_)));
    }
}
