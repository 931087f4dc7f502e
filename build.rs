//! Build script that renders the `devserver` manual pages.
//!
//! One page is written for the top-level command and one per subcommand
//! (`devserver-provision.1` and so on) into the build output directory.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(command: Command, title: &str, out_dir: &Path) -> io::Result<()> {
    let mut page = Vec::new();
    Man::new(command).title(title).render(&mut page)?;
    fs::write(out_dir.join(format!("{title}.1")), page)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let root = Cli::command();
    for sub in root.get_subcommands() {
        let title = format!("devserver-{}", sub.get_name());
        render(sub.clone(), &title, &out_dir)?;
    }
    render(root, "devserver", &out_dir)?;

    Ok(())
}
