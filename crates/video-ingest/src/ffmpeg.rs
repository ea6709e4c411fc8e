//! FFmpeg-backed frame source.
//!
//! Spawns an `ffmpeg` child decoding whatever container/codec the input
//! carries into rawvideo BGR24 on stdout, and pulls it one frame at a time.

use std::{
    io::{self, Read},
    process::{Child, ChildStdout, Command, Stdio},
};

use anyhow::anyhow;
use chrono::Utc;
use tracing::debug;

use crate::{
    source::FrameSource,
    types::{Frame, FrameFormat, SourceError},
};

/// Frame source reading raw BGR24 frames from an `ffmpeg` child process.
///
/// The child is killed and reaped when the source is dropped. Seeking is not
/// available through the pipe.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    position: u64,
    exhausted: bool,
}

impl FfmpegSource {
    /// Launch ffmpeg against `uri`, scaling output to `target_size`.
    pub fn open(uri: &str, target_size: (u32, u32)) -> Result<Self, SourceError> {
        let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(uri)
            .arg("-vf")
            .arg(&scale_arg)
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|err| SourceError::Other(err.into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

        debug!("ffmpeg decoding {uri} at {}x{}", target_size.0, target_size.1);

        Ok(Self {
            child,
            stdout,
            width: target_size.0,
            height: target_size.1,
            position: 0,
            exhausted: false,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let frame_bytes = self.width as usize * self.height as usize * 3;
        let mut buffer = vec![0u8; frame_bytes];
        match read_frame_block(&mut self.stdout, &mut buffer) {
            Ok(true) => {
                let frame = Frame {
                    sequence_id: self.position,
                    data: buffer,
                    width: self.width,
                    height: self.height,
                    timestamp_ms: Utc::now().timestamp_millis(),
                    format: FrameFormat::Bgr8,
                };
                self.position += 1;
                Ok(Some(frame))
            }
            Ok(false) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(err) => Err(SourceError::Read {
                position: self.position,
                source: err,
            }),
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, _position: u64) -> Result<(), SourceError> {
        Err(SourceError::SeekUnsupported)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Fill `buffer` from `reader`. `Ok(false)` means the stream ended cleanly
/// before the first byte; ending inside a frame is a read error.
fn read_frame_block(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "stream ended {filled} bytes into a {} byte frame",
                        buffer.len()
                    ),
                ));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Reader that hands out one byte per call, to exercise the fill loop.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    #[test]
    fn reads_whole_frames_until_boundary_eof() {
        let mut reader = Cursor::new(vec![7u8; 12]);
        let mut buffer = [0u8; 6];

        assert!(read_frame_block(&mut reader, &mut buffer).unwrap());
        assert!(read_frame_block(&mut reader, &mut buffer).unwrap());
        assert_eq!(buffer, [7u8; 6]);
        assert!(!read_frame_block(&mut reader, &mut buffer).unwrap());
    }

    #[test]
    fn partial_frame_is_a_read_error() {
        let mut reader = Cursor::new(vec![7u8; 9]);
        let mut buffer = [0u8; 6];

        assert!(read_frame_block(&mut reader, &mut buffer).unwrap());
        let err = read_frame_block(&mut reader, &mut buffer).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn assembles_frames_from_short_reads() {
        let mut reader = Trickle(Cursor::new((0u8..6).collect()));
        let mut buffer = [0u8; 6];

        assert!(read_frame_block(&mut reader, &mut buffer).unwrap());
        assert_eq!(buffer, [0, 1, 2, 3, 4, 5]);
        assert!(!read_frame_block(&mut reader, &mut buffer).unwrap());
    }
}
