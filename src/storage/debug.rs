//! Plain-text dump of the in-memory tree, for SIGUSR1 and the debug
//! endpoint.

use crate::core::{Result, StoreError};
use crate::storage::level::Level;
use crate::storage::store::MemoryStore;
use std::io::Write;
use std::sync::Arc;

impl MemoryStore {
    /// Write a human-readable dump of the subtree at `selector`.
    pub fn debug_dump<W: Write>(&self, w: &mut W, selector: &[&str]) -> Result<()> {
        let level = self.root.find_level(selector).ok_or(StoreError::NoData)?;
        writeln!(w, "MemoryStore ({} MB):", self.size_in_bytes() / 1024 / 1024)?;
        self.dump_level(&level, w, "  ")
    }

    fn dump_level<W: Write>(&self, level: &Arc<Level>, w: &mut W, indent: &str) -> Result<()> {
        let inner = level.inner.read();

        let mut names: Vec<&String> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            let config = &self.metrics[name];
            if let Some(chain) = inner.metrics[config.offset].as_ref() {
                write!(w, "{indent}metric '{name}': ")?;
                for (i, seg) in chain.segments().iter().enumerate() {
                    if i > 0 {
                        write!(w, " -> ")?;
                    }
                    write!(
                        w,
                        "buffer(from={}, len={}, to={}, archived={})",
                        seg.first_write(),
                        seg.data.len(),
                        seg.end(),
                        seg.archived
                    )?;
                }
                writeln!(w)?;
            }
        }

        if !inner.children.is_empty() {
            let mut names: Vec<&String> = inner.children.keys().collect();
            names.sort();
            writeln!(w, "{indent}children:")?;
            for name in names {
                writeln!(w, "{indent}'{name}':")?;
                self.dump_level(&inner.children[name], w, &format!("\t{indent}"))?;
            }
        }
        Ok(())
    }
}
