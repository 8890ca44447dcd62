//! Printers: relayed child output and the runtime info block.

use std::io::{self, Write};

use owo_colors::OwoColorize;

/// Values shown by `--info` after the diagnostic script ran.
#[derive(Debug, Clone)]
pub struct Summary<'a> {
    pub environment: &'a str,
    pub runner: &'a str,
    pub implementation: &'a str,
    pub version: &'a str,
    pub process_count: usize,
}

pub struct TextPrinter {
    pub color: bool,
}

impl TextPrinter {
    /// Child stdout in full, then child stderr in full.
    pub fn relay<W: Write>(&self, w: &mut W, stdout: &str, stderr: &str) -> io::Result<()> {
        w.write_all(stdout.as_bytes())?;
        w.write_all(stderr.as_bytes())?;
        w.flush()
    }

    pub fn summary<W: Write>(&self, w: &mut W, s: &Summary<'_>) -> io::Result<()> {
        let title = "\u{1f50e} fenicsx runtime info";
        writeln!(w)?;
        if self.color {
            writeln!(w, "{}", title.cyan().bold())?;
        } else {
            writeln!(w, "{}", title)?;
        }
        writeln!(w, "-----------------------")?;
        writeln!(w, "Environment        : {}", s.environment)?;
        writeln!(w, "micromamba         : {}", s.runner)?;
        writeln!(w, "MPI implementation : {}", s.implementation.to_uppercase())?;
        writeln!(w, "MPI version        : {}", s.version)?;
        writeln!(w, "MPI ranks (-np)    : {}", s.process_count)?;
        w.flush()
    }
}
