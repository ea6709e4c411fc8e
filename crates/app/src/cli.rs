use anyhow::Result;

use crate::scan;

pub const USAGE: &str = "Usage: burrowscan <command>\n\nCommands:\n  scan    \
Distribute a video stream across four quadrant analyzers\n  help    Show this message\n\nRun \
`burrowscan scan --help` for the scan options.";

pub fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(|s| s.as_str()) {
        Some("scan") => {
            scan::run_from_args(args)?;
            Ok(true)
        }
        Some("help") | Some("--help") | Some("-h") => {
            println!("{USAGE}");
            Ok(true)
        }
        _ => Ok(false),
    }
}
