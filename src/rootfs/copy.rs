//! Escalating byte-for-byte copy strategies for disk images.
//!
//! Different hosts restrict different mechanisms (permissions, sparse-file
//! handling), so the provisioner tries each strategy in order until one
//! succeeds rather than asking the caller to diagnose the environment.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::Command;

/// One whole-file copy mechanism.
pub(crate) trait CopyStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn copy(&self, src: &Path, dest: &Path) -> io::Result<()>;
}

/// Buffered in-process stream copy with an explicit sync of the destination.
pub(crate) struct StreamCopy;

impl CopyStrategy for StreamCopy {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn copy(&self, src: &Path, dest: &Path) -> io::Result<()> {
        let mut reader = BufReader::new(File::open(src)?);
        let dest_file = File::create(dest)?;
        let mut writer = BufWriter::new(dest_file);
        let written = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        tracing::debug!(bytes = written, "stream copy complete");
        Ok(())
    }
}

/// External `cp(1)` copy.
pub(crate) struct CpCopy;

impl CopyStrategy for CpCopy {
    fn name(&self) -> &'static str {
        "cp"
    }

    fn copy(&self, src: &Path, dest: &Path) -> io::Result<()> {
        run_tool(Command::new("cp").arg(src).arg(dest))
    }
}

/// Block-oriented `dd(1)` copy, the most permissive for raw disk images.
pub(crate) struct DdCopy;

impl CopyStrategy for DdCopy {
    fn name(&self) -> &'static str {
        "dd"
    }

    fn copy(&self, src: &Path, dest: &Path) -> io::Result<()> {
        run_tool(Command::new("dd").args([
            format!("if={}", src.display()),
            format!("of={}", dest.display()),
            "bs=1M".to_string(),
        ]))
    }
}

fn run_tool(cmd: &mut Command) -> io::Result<()> {
    let output = cmd.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(io::Error::other(format!(
            "exit code {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }
    Ok(())
}

/// Default strategy order: in-process first, then external tools.
pub(crate) fn default_strategies() -> Vec<Box<dyn CopyStrategy>> {
    vec![Box::new(StreamCopy), Box::new(CpCopy), Box::new(DdCopy)]
}
