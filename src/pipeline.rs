use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read, Seek, SeekFrom},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    Error, Result,
    header::HeaderDescriptor,
    pacing::PacedScheduler,
    sink::{ChunkedSink, SinkOptions},
    source::FrameSource,
    storage::Store,
};

/// How the total frame count is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Count known up front; a short read is fatal.
    Fixed { total_frames: u64 },
    /// The source is still being appended to: poll its reported count,
    /// grow the sink as it rises, and drain once it stalls.
    Live,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Frames per scheduler range, and the axis-0 chunk extent unless
    /// `chunk_shape` overrides it.
    pub chunk_size: u64,
    /// Target emission rate in frames per second (derated 2% internally).
    pub rate: f64,
    /// Acquisition start-up delay emulated before the first range.
    pub initial_latency: Duration,
    /// Sink chunk shape; defaults to one scheduler range of whole planes.
    pub chunk_shape: Option<[u64; 3]>,
    pub fill_value: i64,
    pub skip_fill_chunks: bool,
    /// Live mode: drain after this long without source growth.
    pub max_wait: Duration,
    /// Sleep between refresh polls.
    pub poll_interval: Duration,
    /// Live mode: bounded retry while waiting for the source file.
    pub open_retries: u32,
    pub open_retry_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 128,
            rate: 20.0,
            initial_latency: Duration::from_secs(10),
            chunk_shape: None,
            fill_value: 0,
            skip_fill_chunks: true,
            max_wait: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            open_retries: 500,
            open_retry_interval: Duration::from_secs(1),
        }
    }
}

/// Terminal state of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub frames_copied: u64,
    /// Final axis-0 extent of the sink.
    pub final_len: u64,
    pub elapsed: Duration,
}

/// Binds parser, scheduler and sink into one streaming copy.
///
/// Runs on a single thread; the scheduler's sleeps and the live-mode
/// refresh polls are the only suspension points. Peak buffering is one
/// chunk of frames regardless of the total frame count.
pub struct CopyPipeline<Src: FrameSource> {
    source: Src,
    mode: CopyMode,
    options: PipelineOptions,
}

impl<Src: FrameSource> CopyPipeline<Src> {
    pub fn new(source: Src, mode: CopyMode, options: PipelineOptions) -> Self {
        Self {
            source,
            mode,
            options,
        }
    }

    fn is_live(&self) -> bool {
        self.mode == CopyMode::Live
    }

    fn validate(&self) -> Result<()> {
        if self.options.rate <= 0.0 {
            return Err(Error::sink_create(format!(
                "rate must be positive, got {}",
                self.options.rate
            )));
        }
        if self.options.chunk_size == 0 {
            return Err(Error::sink_create("chunk size must be positive"));
        }
        Ok(())
    }

    /// Run the copy to completion, writing into `store`.
    pub fn run<S: Store>(mut self, store: S) -> Result<CopyReport> {
        let run_start = Instant::now();
        self.validate()?;
        let opts = self.options.clone();

        debug!("opening {}", self.source.raw_stack_path().display());
        let mut stream = BufReader::new(self.open_stream()?);

        debug!("parsing stack header");
        let header = HeaderDescriptor::parse(&mut stream)?;
        if header.shape.len() != 3 {
            return Err(Error::malformed(format!(
                "expected a 3-D stack, got shape {:?}",
                header.shape
            )));
        }
        stream.seek(SeekFrom::Start(header.header_size))?;
        let [rows, cols] = [header.shape[1], header.shape[2]];
        let plane_size = header.plane_size();
        info!(
            "stack: {:?} {} planes of {} bytes, data at offset {}",
            header.shape,
            header.element.name(),
            plane_size,
            header.header_size
        );

        let mut total = match self.mode {
            CopyMode::Fixed { total_frames } => total_frames,
            CopyMode::Live => {
                self.source.refresh()?;
                self.source.frame_count()
            }
        };
        let chunk_shape = opts
            .chunk_shape
            .unwrap_or([opts.chunk_size, rows, cols]);
        debug!("creating sink: shape ({total}, {rows}, {cols}), chunks {chunk_shape:?}");
        let mut sink = ChunkedSink::create(
            store,
            vec![total, rows, cols],
            chunk_shape.to_vec(),
            header.element,
            header.byte_order,
            opts.fill_value,
            SinkOptions {
                skip_fill_chunks: opts.skip_fill_chunks,
            },
        )?;

        // One chunk of frames, reused for every cycle.
        let mut chunk_buf = vec![0u8; opts.chunk_size as usize * plane_size];
        let mut copied: u64 = 0;
        let mut scheduler = self.scheduler(total, opts.initial_latency, 0);

        let copied = loop {
            match scheduler.next() {
                Some(range) => {
                    let nbytes = (range.end - range.start) as usize * plane_size;
                    let buf = &mut chunk_buf[..nbytes];
                    match read_full(&mut stream, buf) {
                        Ok(()) => {
                            sink.write_range(range.clone(), buf)?;
                            copied = range.end;
                            info!("copied frames [{}, {})", range.start, range.end);
                        }
                        Err(Error::TruncatedStream { expected, actual })
                            if self.is_live() =>
                        {
                            debug!(
                                "short read at frame {copied} ({actual}/{expected} bytes), \
                                 waiting for the producer"
                            );
                            stream.seek(SeekFrom::Start(
                                header.header_size + copied * plane_size as u64,
                            ))?;
                            match self.wait_for_growth(total)? {
                                Some(new_total) => {
                                    sink.grow(new_total)?;
                                    total = new_total;
                                    scheduler = self.scheduler(total, Duration::ZERO, copied);
                                }
                                None => break self.drain(&mut stream, &mut sink, copied, total, &mut chunk_buf, plane_size)?,
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }
                None if self.is_live() => {
                    debug!("refreshing source at frame {copied}");
                    match self.wait_for_growth(total)? {
                        Some(new_total) => {
                            sink.grow(new_total)?;
                            total = new_total;
                            scheduler = self.scheduler(total, Duration::ZERO, copied);
                        }
                        None => break self.drain(&mut stream, &mut sink, copied, total, &mut chunk_buf, plane_size)?,
                    }
                }
                None => break copied,
            }
        };

        if let CopyMode::Fixed { total_frames } = self.mode
            && copied != total_frames
        {
            return Err(Error::FrameCountMismatch {
                expected: total_frames,
                copied,
            });
        }

        debug!("closing sink");
        sink.close()?;
        let report = CopyReport {
            frames_copied: copied,
            final_len: sink.len(),
            elapsed: run_start.elapsed(),
        };
        info!(
            "closed: {} frames copied, sink length {}, {:.1?} elapsed",
            report.frames_copied, report.final_len, report.elapsed
        );
        Ok(report)
    }

    fn scheduler(&self, total: u64, latency: Duration, first_frame: u64) -> PacedScheduler {
        PacedScheduler::new(latency, total, self.options.chunk_size, self.options.rate)
            .starting_at(first_frame)
    }

    fn open_stream(&self) -> Result<File> {
        let path = self.source.raw_stack_path();
        let mut attempt = 0u32;
        loop {
            match File::open(path) {
                Ok(f) => return Ok(f),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if !self.is_live() || attempt + 1 >= self.options.open_retries {
                        return Err(Error::SourceNotFound {
                            path: path.to_owned(),
                        });
                    }
                    if attempt == 0 {
                        info!(
                            "raw stack {} not present yet, retrying up to {} times",
                            path.display(),
                            self.options.open_retries
                        );
                    }
                    attempt += 1;
                    thread::sleep(self.options.open_retry_interval);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Poll the source until its count rises above `current` or
    /// `max_wait` passes with no progress.
    fn wait_for_growth(&mut self, current: u64) -> Result<Option<u64>> {
        let wait_start = Instant::now();
        loop {
            self.source.refresh()?;
            let count = self.source.frame_count();
            if count > current {
                info!("source grew: {current} -> {count} frames");
                return Ok(Some(count));
            }
            if wait_start.elapsed() >= self.options.max_wait {
                info!("no source growth within {:?}, draining", self.options.max_wait);
                return Ok(None);
            }
            thread::sleep(self.options.poll_interval);
        }
    }

    /// Write whatever complete frames are still readable between the
    /// confirmed offset and the final reported count.
    fn drain<S: Store>(
        &mut self,
        stream: &mut BufReader<File>,
        sink: &mut ChunkedSink<S>,
        copied: u64,
        total: u64,
        chunk_buf: &mut [u8],
        plane_size: usize,
    ) -> Result<u64> {
        let mut copied = copied;
        while copied < total {
            let want = (total - copied).min(self.options.chunk_size);
            let buf = &mut chunk_buf[..want as usize * plane_size];
            let got_frames = match read_full(stream, buf) {
                Ok(()) => want,
                Err(Error::TruncatedStream { actual, .. }) => (actual / plane_size) as u64,
                Err(e) => return Err(e),
            };
            if got_frames == 0 {
                break;
            }
            sink.write_range(copied..copied + got_frames, &buf[..got_frames as usize * plane_size])?;
            info!("drained frames [{copied}, {})", copied + got_frames);
            copied += got_frames;
            if got_frames < want {
                break;
            }
        }
        if copied < total {
            warn!("{} reported frames never materialized", total - copied);
        }
        Ok(copied)
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::TruncatedStream {
                    expected: buf.len(),
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
