pub mod bus;
pub mod edge3;
pub mod error;
pub mod genhdl;
pub mod hdltree;
pub mod tree;

pub use crate::edge3::generate_edge3;
pub use crate::error::{ErrorKind, RmError};
pub use crate::genhdl::generate_hdl;
pub use crate::tree::{load_root, root_from_json, Root};
