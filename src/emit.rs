//! Hand-off of generated blocks to a backend: a binary encoding of the full
//! emission contract (CBOR or MessagePack), or a plain-text listing for
//! inspection.

use core::fmt;
use core::str::FromStr;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use log::info;
use serde::Serialize;
use crate::block::Block;
use crate::error::{Error, Result};




/**
 * The document written for one problem.
 */
#[derive(Serialize)]
pub struct Program<'a> {
    pub problem: &'a str,
    pub blocks: &'a [Block],
}




#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Cbor,
    Msgpack,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Cbor => "cbor",
            Format::Msgpack => "msgpack",
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cbor" => Ok(Format::Cbor),
            "msgpack" | "mpk" => Ok(Format::Msgpack),
            _ => Err(format!("unknown format '{}' (expected cbor or msgpack)", s)),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}




pub fn write_cbor<W: Write>(program: &Program, writer: W) -> Result<()> {
    ciborium::ser::into_writer(program, writer).map_err(|e| Error::Encode(e.to_string()))
}

pub fn write_msgpack<W: Write>(program: &Program, mut writer: W) -> Result<()> {
    rmp_serde::encode::write_named(&mut writer, program).map_err(|e| Error::Encode(e.to_string()))
}

pub fn write<W: Write>(program: &Program, format: Format, writer: W) -> Result<()> {
    match format {
        Format::Cbor => write_cbor(program, writer),
        Format::Msgpack => write_msgpack(program, writer),
    }
}




/**
 * Write a problem's blocks to `<directory>/<problem>.<extension>` and return
 * the path written.
 */
pub fn write_file(program: &Program, format: Format, directory: &Path) -> Result<PathBuf> {
    let path = directory.join(format!("{}.{}", program.problem, format.extension()));
    let mut buffer = BufWriter::new(File::create(&path)?);
    write(program, format, &mut buffer)?;
    buffer.flush()?;
    info!("wrote {}", path.display());
    Ok(path)
}




/**
 * Return a backend-neutral listing of every block and its kernels, in
 * execution order.
 */
pub fn listing(program: &Program) -> String {
    let mut text = format!("problem '{}'\n", program.problem);

    for block in program.blocks {
        let grid = &block.grid;
        text += &format!(
            "block {}: points {:?}, spacing {:?}, ghost {:?}\n",
            block.index, grid.points, grid.spacing, grid.ghost
        );
        for kernel in &block.kernels {
            text += &kernel.to_string();
        }
    }
    text
}
