//! `dgit version`.

use anyhow::Result;

pub fn run() -> Result<()> {
    println!("dgit {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
