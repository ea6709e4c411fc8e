use anyhow::{Context, Result, anyhow, bail};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Deterministic generated frames, no external process.
    Synthetic,
    /// Anything ffmpeg can decode: files, RTSP, UDP.
    Stream,
}

impl SourceKind {
    pub(crate) fn from_uri(uri: &str) -> Self {
        if uri.starts_with("synthetic:") || uri == "synthetic" {
            SourceKind::Synthetic
        } else {
            SourceKind::Stream
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub source: String,
    pub source_kind: SourceKind,
    pub width: u32,
    pub height: u32,
    /// Stream length for the synthetic source; ignored for real streams.
    pub frames: u64,
    pub capacity: usize,
    pub synchronized: bool,
    pub grace_ms: u64,
    pub verbose: bool,
}

pub(crate) const SCAN_USAGE: &str = "Usage: burrowscan scan [--source <uri>] \
[--width <px>] [--height <px>] [--frames <n>] [--capacity <frames>] \
[--unsynchronized] [--grace-ms <ms>] [--verbose]\n\nUse `--source synthetic:` for a \
generated test stream; any other uri is handed to ffmpeg.\n\nPositional form is also \
supported: scan <uri> [<width> <height>]";

impl ScanConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut source: Option<String> = None;
        let mut width: Option<u32> = None;
        let mut height: Option<u32> = None;
        let mut frames: Option<u64> = None;
        let mut capacity: Option<usize> = None;
        let mut synchronized = true;
        let mut grace_ms: Option<u64> = None;
        let mut verbose = false;
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--source" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--source requires a value"))?
                        .clone();
                    source = Some(value);
                    idx += 1;
                }
                "--width" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--width requires a value"))?
                        .parse::<u32>()
                        .with_context(|| "--width must be a positive integer".to_string())?;
                    width = Some(value);
                    idx += 1;
                }
                "--height" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--height requires a value"))?
                        .parse::<u32>()
                        .with_context(|| "--height must be a positive integer".to_string())?;
                    height = Some(value);
                    idx += 1;
                }
                "--frames" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--frames requires a value"))?
                        .parse::<u64>()
                        .with_context(|| "--frames must be an integer".to_string())?;
                    frames = Some(value);
                    idx += 1;
                }
                "--capacity" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--capacity requires a value"))?
                        .parse::<usize>()
                        .with_context(|| "--capacity must be a positive integer".to_string())?;
                    if value == 0 {
                        bail!("--capacity must be at least 1");
                    }
                    capacity = Some(value);
                    idx += 1;
                }
                "--unsynchronized" => {
                    synchronized = false;
                    idx += 1;
                }
                "--grace-ms" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--grace-ms requires a value"))?
                        .parse::<u64>()
                        .with_context(|| "--grace-ms must be an integer".to_string())?;
                    grace_ms = Some(value);
                    idx += 1;
                }
                "--verbose" => {
                    verbose = true;
                    idx += 1;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}\n\n{SCAN_USAGE}");
                }
                other => {
                    positional.push(other.to_string());
                    idx += 1;
                }
            }
        }

        let mut positional = positional.into_iter();
        if source.is_none() {
            source = positional.next();
        }
        if width.is_none() {
            if let Some(value) = positional.next() {
                width = Some(
                    value
                        .parse::<u32>()
                        .with_context(|| "width must be a positive integer".to_string())?,
                );
            }
        }
        if height.is_none() {
            if let Some(value) = positional.next() {
                height = Some(
                    value
                        .parse::<u32>()
                        .with_context(|| "height must be a positive integer".to_string())?,
                );
            }
        }

        let source = source.ok_or_else(|| {
            anyhow!("Missing source. Provide --source <uri> or positional <uri>.\n\n{SCAN_USAGE}")
        })?;
        let width = width.unwrap_or(640);
        let height = height.unwrap_or(480);
        if width == 0 || height == 0 {
            bail!("frame dimensions must be non-zero");
        }

        let source_kind = SourceKind::from_uri(&source);

        Ok(Self {
            source,
            source_kind,
            width,
            height,
            frames: frames.unwrap_or(300),
            capacity: capacity.unwrap_or(1),
            synchronized,
            grace_ms: grace_ms.unwrap_or(5_000),
            verbose,
        })
    }
}
