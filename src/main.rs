use clap::Parser as ArgParser;
use clap::Subcommand;
use log::info;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use rmgen::{generate_edge3, generate_hdl, load_root};

#[derive(ArgParser)]
#[clap(version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generates VHDL for an elaborated register map.
    GenHdl {
        /// Output file; stdout when omitted.
        #[clap(short, long)]
        output: Option<PathBuf>,
        input: PathBuf,
    },

    /// Generates the Edge3 driver table CSV.
    GenEdge3 {
        /// Output file; stdout when omitted.
        #[clap(short, long)]
        output: Option<PathBuf>,
        input: PathBuf,
    },
}

fn write_out(output: &Option<PathBuf>, data: &[u8]) {
    match output {
        Some(path) => {
            let mut file = File::create(path).expect("Unable to create output file.");
            file.write_all(data).expect("Unable to write output file.");
        }
        None => {
            std::io::stdout()
                .write_all(data)
                .expect("Unable to write to stdout.");
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::GenHdl { output, input } => {
            let mut root = load_root(input).expect("Unable to load map");
            info!("generating HDL for {}", root.name);
            let module = generate_hdl(&mut root).expect("Generation error");
            write_out(output, module.to_string().as_bytes());
        }
        Commands::GenEdge3 { output, input } => {
            let root = load_root(input).expect("Unable to load map");
            info!("generating Edge3 tables for {}", root.name);
            let mut data: Vec<u8> = Vec::new();
            generate_edge3(&mut data, &root).expect("Generation error");
            write_out(output, &data);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    const MAP: &str = r#"{
        "name": "m1",
        "bus": "wb-32-be",
        "c_word_size": 4,
        "c_sel_bits": 0,
        "c_blk_bits": 2,
        "children": [
            {"node": "reg", "name": "r", "access": "rw", "c_address": 0, "c_size": 4}
        ]
    }"#;

    #[test]
    fn write_out_creates_the_file() {
        let dir = tempfile::tempdir().expect("Unable to create temp directory for test.");
        let path = dir.path().join("out.vhdl");
        write_out(&Some(path.clone()), b"entity m1 is\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "entity m1 is\n");
    }

    #[test]
    fn write_out_replaces_an_existing_file() {
        let dir = tempfile::tempdir().expect("Unable to create temp directory for test.");
        let path = dir.path().join("out.csv");
        fs::write(&path, "stale").unwrap();
        write_out(&Some(path.clone()), b"fresh");
        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh");
    }

    #[test]
    fn hdl_generation_from_a_map_file() {
        // The gen-hdl command body: load from disk, generate, write out.
        let dir = tempfile::tempdir().expect("Unable to create temp directory for test.");
        let map_path = dir.path().join("m1.json");
        fs::write(&map_path, MAP).unwrap();
        let mut root = load_root(&map_path).unwrap();
        let module = generate_hdl(&mut root).unwrap();
        let out_path = dir.path().join("m1.vhdl");
        write_out(&Some(out_path.clone()), module.to_string().as_bytes());
        let text = fs::read_to_string(&out_path).unwrap();
        assert!(text.contains("entity m1 is"));
        assert!(text.contains("end syn;"));
    }

    #[test]
    fn edge3_generation_from_a_map_file() {
        let dir = tempfile::tempdir().expect("Unable to create temp directory for test.");
        let map_path = dir.path().join("m1.json");
        fs::write(&map_path, MAP).unwrap();
        let root = load_root(&map_path).unwrap();
        let mut data: Vec<u8> = Vec::new();
        generate_edge3(&mut data, &root).unwrap();
        let out_path = dir.path().join("m1.csv");
        write_out(&Some(out_path.clone()), &data);
        let text = fs::read_to_string(&out_path).unwrap();
        assert!(text.starts_with("#Encore Driver GEnerator version: 3.0\n"));
    }
}
