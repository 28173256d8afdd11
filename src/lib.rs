//! DXIL (shader model 6) bitcode parser.
//!
//! [`parse_dxil`] decodes a DXIL program, either a raw `DXIL` chunk or a
//! DXBC container holding one, into a [`Program`] of vector shader IR
//! instructions. Problems are reported to a [`MessageContext`].

pub mod bitcode;
mod bits;
pub mod bitstream;
pub mod config;
pub mod diagnostics;
pub mod dxbc;
pub mod read;
pub mod sm6;
pub mod visitor;
pub mod vsir;

pub mod schema {
    pub mod blocks;
    pub mod enums;
}

pub use self::bitcode::Bitcode;
pub use self::config::{CompileInfo, SourceType};
pub use self::diagnostics::{Error, MessageContext};
pub use self::read::BitStreamReader;
pub use self::sm6::parse_dxil;
pub use self::visitor::BitStreamVisitor;
pub use self::vsir::Program;
