//! Machine-readable copy of the report model

use super::ReportModel;
use std::io::{self, Write};

pub fn write<W: Write>(writer: W, model: &ReportModel) -> io::Result<()> {
    serde_json::to_writer_pretty(writer, model).map_err(io::Error::from)
}
