use std::ops::Range;

use bytes::Bytes;
use log::debug;

use crate::{
    Error, Result,
    chunk_key_encoding::{chunk_key, metadata_key},
    element::{ByteOrder, ElementType},
    metadata::ArrayMetadata,
    storage::Store,
};

/// Options applied at [ChunkedSink::create] time.
#[derive(Debug, Clone, Copy)]
pub struct SinkOptions {
    /// Do not persist chunks wholly equal to the fill value.
    pub skip_fill_chunks: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            skip_fill_chunks: true,
        }
    }
}

/// A 3-D logical array backed by fixed-size chunks in a [Store].
///
/// The logical shape is `(frames, rows, columns)` and may grow along
/// axis 0 only. Writes may span chunk boundaries on any axis; the sink
/// splits them and merges into partially covered chunks. Positions never
/// written read back as the fill value. Single writer per store.
pub struct ChunkedSink<S: Store> {
    store: S,
    meta: ArrayMetadata,
    element_size: usize,
    /// One chunk's worth of fill bytes; template for partial chunks and
    /// the comparand for `skip_fill_chunks`.
    fill_chunk: Vec<u8>,
    skip_fill_chunks: bool,
    closed: bool,
}

impl<S: Store> ChunkedSink<S> {
    pub fn create(
        store: S,
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        element: ElementType,
        byte_order: ByteOrder,
        fill_value: i64,
        options: SinkOptions,
    ) -> Result<Self> {
        if shape.len() != 3 || chunk_shape.len() != 3 {
            return Err(Error::sink_create(format!(
                "expected 3-D shape and chunk shape, got {shape:?} / {chunk_shape:?}"
            )));
        }
        if chunk_shape.contains(&0) {
            return Err(Error::sink_create(format!(
                "zero extent in chunk shape {chunk_shape:?}"
            )));
        }
        if shape[1] == 0 || shape[2] == 0 {
            return Err(Error::sink_create(format!(
                "zero plane extent in shape {shape:?}"
            )));
        }

        let meta = ArrayMetadata::new(shape, chunk_shape, element, byte_order, fill_value);
        let fill_pattern = meta.fill_pattern()?;
        let chunk_len: u64 = meta.chunk_shape.iter().product();
        let fill_chunk: Vec<u8> = fill_pattern
            .iter()
            .copied()
            .cycle()
            .take(chunk_len as usize * element.size_in_bytes())
            .collect();

        // Truncate whatever a previous run left behind.
        for key in store
            .list()
            .map_err(|e| Error::sink_create(e.to_string()))?
        {
            store
                .erase(&key)
                .map_err(|e| Error::sink_create(e.to_string()))?;
        }
        store
            .set(&metadata_key(), meta.to_bytes()?)
            .map_err(|e| Error::sink_create(e.to_string()))?;

        Ok(Self {
            store,
            element_size: element.size_in_bytes(),
            fill_chunk,
            skip_fill_chunks: options.skip_fill_chunks,
            closed: false,
            meta,
        })
    }

    /// Open an existing store for reading it back.
    pub fn open(store: S) -> Result<Self> {
        let bytes = store
            .get(&metadata_key())?
            .ok_or_else(|| Error::sink_create("store has no array metadata".to_owned()))?;
        let meta = ArrayMetadata::from_bytes(&bytes)?;
        let element = meta.element()?;
        let fill_pattern = meta.fill_pattern()?;
        let chunk_len: u64 = meta.chunk_shape.iter().product();
        let fill_chunk: Vec<u8> = fill_pattern
            .iter()
            .copied()
            .cycle()
            .take(chunk_len as usize * element.size_in_bytes())
            .collect();
        Ok(Self {
            store,
            element_size: element.size_in_bytes(),
            fill_chunk,
            skip_fill_chunks: false,
            closed: false,
            meta,
        })
    }

    /// Current logical shape, `(frames, rows, columns)`.
    pub fn shape(&self) -> &[u64] {
        &self.meta.shape
    }

    pub fn chunk_shape(&self) -> &[u64] {
        &self.meta.chunk_shape
    }

    /// Current axis-0 extent.
    pub fn len(&self) -> u64 {
        self.meta.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes in one full plane.
    pub fn plane_size(&self) -> usize {
        (self.meta.shape[1] * self.meta.shape[2]) as usize * self.element_size
    }

    fn chunk_size_bytes(&self) -> usize {
        self.fill_chunk.len()
    }

    fn check_range(&self, frames: &Range<u64>) -> Result<()> {
        if frames.start > frames.end || frames.end > self.len() {
            return Err(Error::RangeOutOfBounds {
                start: frames.start,
                stop: frames.end,
                len: self.len(),
            });
        }
        Ok(())
    }

    /// Write `data`, a row-major `(len, rows, columns)` buffer, at the
    /// given axis-0 offset.
    pub fn write_range(&mut self, frames: Range<u64>, data: &[u8]) -> Result<()> {
        self.check_range(&frames)?;
        let expected = (frames.end - frames.start) as usize * self.plane_size();
        assert_eq!(
            data.len(),
            expected,
            "write_range buffer must match the range extent"
        );
        if frames.is_empty() {
            return Ok(());
        }

        let [_, rows, cols] = [self.meta.shape[0], self.meta.shape[1], self.meta.shape[2]];
        let [ct, cr, cc] = [
            self.meta.chunk_shape[0],
            self.meta.chunk_shape[1],
            self.meta.chunk_shape[2],
        ];
        let elem = self.element_size;

        for kt in chunks_spanning(frames.start, frames.end, ct) {
            let t0 = kt * ct;
            let f_lo = frames.start.max(t0);
            let f_hi = frames.end.min(t0 + ct);
            for kr in chunks_spanning(0, rows, cr) {
                let r0 = kr * cr;
                let r_hi = rows.min(r0 + cr);
                for kc in chunks_spanning(0, cols, cc) {
                    let c0 = kc * cc;
                    let c_hi = cols.min(c0 + cc);
                    let run_bytes = (c_hi - c0) as usize * elem;

                    // A chunk only skips the merge-read when this write
                    // covers every byte of it, overhang included.
                    let covered = f_lo == t0
                        && f_hi == t0 + ct
                        && r0 + cr <= rows
                        && c0 + cc <= cols;
                    let key = chunk_key(&[kt, kr, kc]);
                    let mut chunk = if covered {
                        vec![0u8; self.chunk_size_bytes()]
                    } else {
                        match self.store.get(&key)? {
                            Some(existing) => existing.to_vec(),
                            None => self.fill_chunk.clone(),
                        }
                    };

                    for f in f_lo..f_hi {
                        let frame_base = (f - frames.start) as usize * self.plane_size();
                        let lt = (f - t0) as usize;
                        for r in r0..r_hi {
                            let lr = (r - r0) as usize;
                            let src = frame_base + (r * cols + c0) as usize * elem;
                            let dst = (lt * cr as usize + lr) * cc as usize * elem;
                            chunk[dst..dst + run_bytes]
                                .copy_from_slice(&data[src..src + run_bytes]);
                        }
                    }

                    if self.skip_fill_chunks && chunk == self.fill_chunk {
                        debug!("chunk {key} is all fill, not persisted");
                        self.store.erase(&key)?;
                    } else {
                        self.store.set(&key, Bytes::from_owner(chunk))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Read frames back as a row-major `(len, rows, columns)` buffer.
    /// Positions never written come back as the fill value.
    pub fn read_range(&self, frames: Range<u64>) -> Result<Vec<u8>> {
        self.check_range(&frames)?;
        let plane_size = self.plane_size();
        let fill = &self.fill_chunk[..self.element_size];
        let mut out: Vec<u8> = fill
            .iter()
            .copied()
            .cycle()
            .take((frames.end - frames.start) as usize * plane_size)
            .collect();
        if frames.is_empty() {
            return Ok(out);
        }

        let [_, rows, cols] = [self.meta.shape[0], self.meta.shape[1], self.meta.shape[2]];
        let [ct, cr, cc] = [
            self.meta.chunk_shape[0],
            self.meta.chunk_shape[1],
            self.meta.chunk_shape[2],
        ];
        let elem = self.element_size;

        for kt in chunks_spanning(frames.start, frames.end, ct) {
            let t0 = kt * ct;
            let f_lo = frames.start.max(t0);
            let f_hi = frames.end.min(t0 + ct);
            for kr in chunks_spanning(0, rows, cr) {
                let r0 = kr * cr;
                let r_hi = rows.min(r0 + cr);
                for kc in chunks_spanning(0, cols, cc) {
                    let c0 = kc * cc;
                    let c_hi = cols.min(c0 + cc);
                    let run_bytes = (c_hi - c0) as usize * elem;

                    let Some(chunk) = self.store.get(&chunk_key(&[kt, kr, kc]))? else {
                        continue;
                    };
                    for f in f_lo..f_hi {
                        let frame_base = (f - frames.start) as usize * plane_size;
                        let lt = (f - t0) as usize;
                        for r in r0..r_hi {
                            let lr = (r - r0) as usize;
                            let dst = frame_base + (r * cols + c0) as usize * elem;
                            let src = (lt * cr as usize + lr) * cc as usize * elem;
                            out[dst..dst + run_bytes].copy_from_slice(&chunk[src..src + run_bytes]);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Extend axis 0. Newly exposed frames read as the fill value.
    pub fn grow(&mut self, new_axis0_len: u64) -> Result<()> {
        let current = self.len();
        if new_axis0_len < current {
            return Err(Error::InvalidResize {
                from: current,
                to: new_axis0_len,
            });
        }
        if new_axis0_len == current {
            return Ok(());
        }
        debug!("growing axis 0: {current} -> {new_axis0_len}");
        self.meta.shape[0] = new_axis0_len;
        self.store.set(&metadata_key(), self.meta.to_bytes()?)?;
        Ok(())
    }

    /// Flush metadata. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.store.set(&metadata_key(), self.meta.to_bytes()?)?;
        self.closed = true;
        Ok(())
    }
}

fn chunks_spanning(lo: u64, hi: u64, chunk_extent: u64) -> Range<u64> {
    lo / chunk_extent..hi.div_ceil(chunk_extent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoreKey};

    fn u16_frames(frames: Range<u64>, rows: u64, cols: u64, value_of: impl Fn(u64) -> u16) -> Vec<u8> {
        let mut out = Vec::new();
        for f in frames {
            let v = value_of(f);
            for _ in 0..rows * cols {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    fn new_sink(shape: [u64; 3], chunk_shape: [u64; 3]) -> ChunkedSink<MemoryStore> {
        ChunkedSink::create(
            MemoryStore::new(),
            shape.to_vec(),
            chunk_shape.to_vec(),
            ElementType::UInt16,
            ByteOrder::Little,
            0,
            SinkOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn create_rejects_bad_shapes() {
        for (shape, chunks) in [
            (vec![4, 4], vec![2, 2]),
            (vec![4, 4, 4], vec![2, 0, 2]),
            (vec![4, 0, 4], vec![2, 2, 2]),
        ] {
            let r = ChunkedSink::create(
                MemoryStore::new(),
                shape,
                chunks,
                ElementType::UInt16,
                ByteOrder::Little,
                0,
                SinkOptions::default(),
            );
            assert!(matches!(r, Err(Error::SinkCreate(_))));
        }
    }

    #[test]
    fn write_then_read_exact() {
        let mut sink = new_sink([10, 6, 7], [4, 4, 4]);
        let data = u16_frames(2..9, 6, 7, |f| f as u16 + 100);
        sink.write_range(2..9, &data).unwrap();
        assert_eq!(sink.read_range(2..9).unwrap(), data);
    }

    #[test]
    fn unwritten_positions_read_as_fill() {
        let store = MemoryStore::new();
        let mut sink = ChunkedSink::create(
            store,
            vec![8, 4, 4],
            vec![4, 4, 4],
            ElementType::UInt16,
            ByteOrder::Little,
            7,
            SinkOptions::default(),
        )
        .unwrap();
        sink.write_range(0..2, &u16_frames(0..2, 4, 4, |_| 42))
            .unwrap();
        let back = sink.read_range(0..8).unwrap();
        let expected: Vec<u8> = u16_frames(0..2, 4, 4, |_| 42)
            .into_iter()
            .chain(u16_frames(2..8, 4, 4, |_| 7))
            .collect();
        assert_eq!(back, expected);
    }

    #[test]
    fn unaligned_writes_merge_within_a_chunk() {
        // Two non-adjacent sub-chunk writes land in the same time-chunk.
        let mut sink = new_sink([8, 4, 4], [8, 4, 4]);
        sink.write_range(0..2, &u16_frames(0..2, 4, 4, |f| f as u16 + 1))
            .unwrap();
        sink.write_range(5..7, &u16_frames(5..7, 4, 4, |f| f as u16 + 1))
            .unwrap();
        let back = sink.read_range(0..8).unwrap();
        let expect = |f: u64| match f {
            0 | 1 | 5 | 6 => f as u16 + 1,
            _ => 0,
        };
        assert_eq!(back, u16_frames(0..8, 4, 4, expect));
    }

    #[test]
    fn spatial_chunking_smaller_than_plane() {
        // Chunk shape (2, 3, 3) against 5x7 planes: overhang on both axes.
        let mut sink = new_sink([4, 5, 7], [2, 3, 3]);
        let mut data = Vec::new();
        for f in 0..4u64 {
            for r in 0..5u64 {
                for c in 0..7u64 {
                    data.extend_from_slice(&((f * 100 + r * 10 + c) as u16).to_le_bytes());
                }
            }
        }
        sink.write_range(0..4, &data).unwrap();
        assert_eq!(sink.read_range(0..4).unwrap(), data);
        assert_eq!(sink.read_range(1..3).unwrap(), data[5 * 7 * 2..3 * 5 * 7 * 2]);
    }

    #[test]
    fn out_of_bounds_write_is_rejected() {
        let mut sink = new_sink([4, 4, 4], [2, 4, 4]);
        let data = u16_frames(2..6, 4, 4, |_| 1);
        assert!(matches!(
            sink.write_range(2..6, &data),
            Err(Error::RangeOutOfBounds { stop: 6, len: 4, .. })
        ));
    }

    #[test]
    fn grow_only_forward() {
        let mut sink = new_sink([4, 4, 4], [2, 4, 4]);
        assert!(matches!(
            sink.grow(3),
            Err(Error::InvalidResize { from: 4, to: 3 })
        ));
        sink.grow(4).unwrap();
        assert_eq!(sink.len(), 4);
        sink.grow(9).unwrap();
        assert_eq!(sink.len(), 9);

        // a write just below the new boundary succeeds
        sink.write_range(8..9, &u16_frames(8..9, 4, 4, |_| 5))
            .unwrap();
        let back = sink.read_range(3..9).unwrap();
        assert_eq!(
            back,
            u16_frames(3..9, 4, 4, |f| if f == 8 { 5 } else { 0 })
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut sink = new_sink([4, 4, 4], [2, 4, 4]);
        sink.close().unwrap();
        sink.close().unwrap();
    }

    #[test]
    fn fill_chunks_are_not_persisted() {
        let mut sink = new_sink([8, 4, 4], [2, 4, 4]);
        sink.write_range(0..4, &u16_frames(0..4, 4, 4, |f| if f < 2 { 3 } else { 0 }))
            .unwrap();
        assert!(sink.store.exists(&StoreKey::new("c/0/0/0").unwrap()).unwrap());
        assert!(!sink.store.exists(&StoreKey::new("c/1/0/0").unwrap()).unwrap());

        // overwriting with fill erases a previously materialized chunk
        sink.write_range(0..2, &u16_frames(0..2, 4, 4, |_| 0)).unwrap();
        assert!(!sink.store.exists(&StoreKey::new("c/0/0/0").unwrap()).unwrap());
    }

    #[test]
    fn fill_chunks_persisted_when_disabled() {
        let mut sink = ChunkedSink::create(
            MemoryStore::new(),
            vec![4, 4, 4],
            vec![2, 4, 4],
            ElementType::UInt16,
            ByteOrder::Little,
            0,
            SinkOptions {
                skip_fill_chunks: false,
            },
        )
        .unwrap();
        sink.write_range(0..2, &u16_frames(0..2, 4, 4, |_| 0)).unwrap();
        assert!(sink.store.exists(&StoreKey::new("c/0/0/0").unwrap()).unwrap());
    }

    #[test]
    fn create_truncates_previous_contents() {
        let store = MemoryStore::new();
        let stale = StoreKey::new("c/9/0/0").unwrap();
        store.set(&stale, Bytes::from_static(b"old")).unwrap();
        let sink = ChunkedSink::create(
            store,
            vec![4, 4, 4],
            vec![2, 4, 4],
            ElementType::UInt16,
            ByteOrder::Little,
            0,
            SinkOptions::default(),
        )
        .unwrap();
        assert!(!sink.store.exists(&stale).unwrap());
    }

    #[test]
    fn open_reads_back_metadata() {
        let store = MemoryStore::new();
        let mut sink = ChunkedSink::create(
            store,
            vec![4, 4, 4],
            vec![2, 4, 4],
            ElementType::UInt16,
            ByteOrder::Little,
            0,
            SinkOptions::default(),
        )
        .unwrap();
        sink.write_range(0..4, &u16_frames(0..4, 4, 4, |f| f as u16))
            .unwrap();
        sink.close().unwrap();

        let reopened = ChunkedSink::open(sink.store).unwrap();
        assert_eq!(reopened.shape(), &[4, 4, 4]);
        assert_eq!(
            reopened.read_range(0..4).unwrap(),
            u16_frames(0..4, 4, 4, |f| f as u16)
        );
    }
}
