use std::{
    fs,
    io::{BufReader, ErrorKind},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use log::info;

use crate::{Error, Result, header::HeaderDescriptor};

/// The three operations the copy pipeline needs from an acquisition
/// file reader. Richer bindings adapt behind this.
pub trait FrameSource {
    /// Path of the raw frame-stack file.
    fn raw_stack_path(&self) -> &Path;

    /// Current authoritative frame count.
    fn frame_count(&self) -> u64;

    /// Re-synchronize with on-disk growth before the next
    /// [FrameSource::frame_count] call.
    fn refresh(&mut self) -> Result<()>;
}

/// Filesystem-backed source over a single raw stack file.
///
/// The frame count is the number of complete frames currently on disk,
/// capped at the extent the header declares, so it grows as an external
/// writer appends frame data.
#[derive(Debug)]
pub struct RawStackSource {
    path: PathBuf,
    header: HeaderDescriptor,
    frame_count: u64,
}

impl RawStackSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::SourceNotFound { path });
            }
            Err(e) => return Err(e.into()),
        };
        let header = HeaderDescriptor::parse(&mut BufReader::new(file))?;
        let mut source = Self {
            path,
            header,
            frame_count: 0,
        };
        source.refresh()?;
        Ok(source)
    }

    /// Open, retrying at a fixed interval while the file does not exist
    /// yet. Attempts are bounded; the last failure is returned.
    pub fn open_with_retry(
        path: impl AsRef<Path>,
        attempts: u32,
        interval: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();
        for attempt in 0..attempts {
            match Self::open(path) {
                Err(Error::SourceNotFound { .. }) if attempt + 1 < attempts => {
                    if attempt == 0 {
                        info!(
                            "source {} not present yet, retrying up to {attempts} times",
                            path.display()
                        );
                    }
                    thread::sleep(interval);
                }
                other => return other,
            }
        }
        Err(Error::SourceNotFound {
            path: path.to_owned(),
        })
    }

    pub fn header(&self) -> &HeaderDescriptor {
        &self.header
    }
}

impl FrameSource for RawStackSource {
    fn raw_stack_path(&self) -> &Path {
        &self.path
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn refresh(&mut self) -> Result<()> {
        let file_len = fs::metadata(&self.path)?.len();
        let data_len = file_len.saturating_sub(self.header.header_size);
        self.frame_count =
            (data_len / self.header.plane_size() as u64).min(self.header.frame_count());
        Ok(())
    }
}
