//! Tile coordinates, per-tile buffers and the grid map

use std::collections::BTreeMap;

use crate::ifd::Ifd;
use crate::{TiffError, TiffResult, UsageError};

/// Position of one tile: plane index (0 for chunked images), then column and
/// row in the tile grid.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct TileIndex {
    pub plane: u16,
    pub x: u32,
    pub y: u32,
}

impl TileIndex {
    pub fn new(plane: u16, x: u32, y: u32) -> Self {
        TileIndex { plane, x, y }
    }

    /// Chunked-image shorthand for plane 0.
    pub fn flat(x: u32, y: u32) -> Self {
        TileIndex { plane: 0, x, y }
    }
}

/// Lifecycle of a tile slot. Empty tiles may go straight from `New` to
/// `Written` with a zero file range.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TileState {
    New,
    Filled,
    Encoded,
    Written,
    Disposed,
}

/// An axis-aligned pixel rectangle, exclusive maxima. Used to track which
/// part of a tile has not been written yet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Rect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Rect {
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Rect {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    fn intersection(&self, other: &Rect) -> Rect {
        Rect {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        }
    }

    /// Removes `cut` from `self`, appending the remaining cover (at most
    /// four rectangles) to `out`.
    fn subtract_into(&self, cut: &Rect, out: &mut Vec<Rect>) {
        let overlap = self.intersection(cut);
        if overlap.is_empty() {
            out.push(*self);
            return;
        }
        // Strip above and below the overlap, full width.
        if self.min_y < overlap.min_y {
            out.push(Rect::new(self.min_x, self.min_y, self.max_x, overlap.min_y));
        }
        if overlap.max_y < self.max_y {
            out.push(Rect::new(self.min_x, overlap.max_y, self.max_x, self.max_y));
        }
        // Left and right of the overlap, overlap height only.
        if self.min_x < overlap.min_x {
            out.push(Rect::new(
                self.min_x,
                overlap.min_y,
                overlap.min_x,
                overlap.max_y,
            ));
        }
        if overlap.max_x < self.max_x {
            out.push(Rect::new(
                overlap.max_x,
                overlap.min_y,
                self.max_x,
                overlap.max_y,
            ));
        }
    }
}

/// One tile of an image: geometry, buffers and write bookkeeping.
///
/// The encoded and decoded buffers are exclusively owned by the slot and may
/// be moved out while writing to release memory; afterwards they cannot be
/// read again.
#[derive(Debug)]
pub struct TileSlot {
    index: TileIndex,
    size_x: u32,
    size_y: u32,
    samples_per_pixel: u16,
    bytes_per_sample: u32,
    /// Single-channel 1-bit tiles keep their samples bit-packed.
    packed_bits: bool,
    interleaved: bool,
    encoded: Option<Vec<u8>>,
    decoded: Option<Vec<u8>>,
    file_range: Option<(u64, u64)>,
    unset: Vec<Rect>,
    state: TileState,
    /// Position in the positioning arrays of the owning map.
    pub(crate) linear_index: usize,
}

impl TileSlot {
    fn new(
        index: TileIndex,
        size_x: u32,
        size_y: u32,
        samples_per_pixel: u16,
        bytes_per_sample: u32,
        packed_bits: bool,
        linear_index: usize,
    ) -> Self {
        TileSlot {
            index,
            size_x,
            size_y,
            samples_per_pixel,
            bytes_per_sample,
            packed_bits,
            interleaved: false,
            encoded: None,
            decoded: None,
            file_range: None,
            unset: vec![Rect::new(0, 0, size_x, size_y)],
            state: TileState::New,
            linear_index,
        }
    }

    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn size_x(&self) -> u32 {
        self.size_x
    }

    pub fn size_y(&self) -> u32 {
        self.size_y
    }

    pub fn samples_per_pixel(&self) -> u16 {
        self.samples_per_pixel
    }

    pub fn bytes_per_sample(&self) -> u32 {
        self.bytes_per_sample
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    /// File position and stored length, known once the tile was read or its
    /// write returned.
    pub fn file_range(&self) -> Option<(u64, u64)> {
        self.file_range
    }

    /// Position of this tile in the positioning arrays of its map.
    pub fn linear_index(&self) -> usize {
        self.linear_index
    }

    /// Length of a complete decoded buffer for this tile's geometry.
    pub fn expected_buffer_len(&self) -> usize {
        if self.packed_bits {
            (self.size_x as usize).div_ceil(8) * self.size_y as usize
        } else {
            self.size_x as usize
                * self.size_y as usize
                * self.samples_per_pixel as usize
                * self.bytes_per_sample as usize
        }
    }

    fn check_not_disposed(&self) -> TiffResult<()> {
        if self.state == TileState::Disposed {
            return Err(TiffError::UsageError(UsageError::TileDisposed(self.index)));
        }
        Ok(())
    }

    pub(crate) fn set_decoded(&mut self, data: Vec<u8>, interleaved: bool) -> TiffResult<()> {
        self.check_not_disposed()?;
        self.decoded = Some(data);
        self.interleaved = interleaved;
        self.unset.clear();
        self.state = TileState::Filled;
        Ok(())
    }

    pub(crate) fn set_encoded(&mut self, data: Vec<u8>) -> TiffResult<()> {
        self.check_not_disposed()?;
        self.encoded = Some(data);
        self.state = TileState::Encoded;
        Ok(())
    }

    pub(crate) fn set_file_range(&mut self, offset: u64, byte_count: u64) {
        self.file_range = Some((offset, byte_count));
    }

    pub(crate) fn mark_written(&mut self, offset: u64, byte_count: u64) {
        self.file_range = Some((offset, byte_count));
        self.state = TileState::Written;
    }

    /// Allocates the decoded buffer prefilled with `filler` so partial
    /// region writes land on defined pixels.
    pub(crate) fn ensure_buffer(&mut self, filler: u8) -> TiffResult<()> {
        self.check_not_disposed()?;
        if self.decoded.is_none() {
            self.decoded = Some(vec![filler; self.expected_buffer_len()]);
            self.state = TileState::Filled;
        }
        Ok(())
    }

    pub fn decoded(&self) -> TiffResult<&[u8]> {
        self.check_not_disposed()?;
        self.decoded
            .as_deref()
            .ok_or(TiffError::UsageError(UsageError::TileDisposed(self.index)))
    }

    pub(crate) fn decoded_mut(&mut self) -> TiffResult<&mut Vec<u8>> {
        self.check_not_disposed()?;
        self.decoded
            .as_mut()
            .ok_or(TiffError::UsageError(UsageError::TileDisposed(self.index)))
    }

    pub fn encoded(&self) -> TiffResult<&[u8]> {
        self.check_not_disposed()?;
        self.encoded
            .as_deref()
            .ok_or(TiffError::UsageError(UsageError::TileDisposed(self.index)))
    }

    /// Moves the decoded buffer out of the slot.
    pub fn take_decoded(&mut self) -> TiffResult<Vec<u8>> {
        self.check_not_disposed()?;
        self.decoded
            .take()
            .ok_or(TiffError::UsageError(UsageError::TileDisposed(self.index)))
    }

    /// Moves the encoded buffer out of the slot.
    pub(crate) fn take_encoded(&mut self) -> TiffResult<Vec<u8>> {
        self.check_not_disposed()?;
        self.encoded
            .take()
            .ok_or(TiffError::UsageError(UsageError::TileDisposed(self.index)))
    }

    /// Marks the given pixel rectangle as written.
    pub(crate) fn cover(&mut self, rect: Rect) {
        let mut remaining = Vec::with_capacity(self.unset.len() + 3);
        for unset in &self.unset {
            unset.subtract_into(&rect, &mut remaining);
        }
        self.unset = remaining;
    }

    /// Whether every pixel of the tile has been written.
    pub fn is_fully_covered(&self) -> bool {
        self.unset.is_empty()
    }

    pub(crate) fn has_any_data(&self) -> bool {
        self.decoded.is_some() || self.encoded.is_some()
    }

    /// Releases both buffers. The slot keeps its file range but its data can
    /// no longer be read.
    pub fn dispose(&mut self) {
        self.encoded = None;
        self.decoded = None;
        self.state = TileState::Disposed;
    }
}

/// A slot standing alone, not registered in any map. The reader hands these
/// out so a decoded tile does not borrow the map it came from.
pub(crate) fn detached_slot(
    index: TileIndex,
    size_x: u32,
    size_y: u32,
    samples_per_pixel: u16,
    bytes_per_sample: u32,
    packed_bits: bool,
    linear_index: usize,
) -> TileSlot {
    TileSlot::new(
        index,
        size_x,
        size_y,
        samples_per_pixel,
        bytes_per_sample,
        packed_bits,
        linear_index,
    )
}

/// The grid of tile slots of one image.
///
/// Borrows nothing: it is built from an [`Ifd`] snapshot and addressed by
/// [`TileIndex`]; slots refer back to it by their linear index.
#[derive(Debug)]
pub struct TileMap {
    tile_width: u32,
    tile_length: u32,
    image_width: u32,
    image_height: u32,
    grid_x: u32,
    grid_y: u32,
    planes: u16,
    samples_per_tile: u16,
    bytes_per_sample: u32,
    packed_bits: bool,
    resizable: bool,
    /// Maximum pixel extent actually covered by writes, for resizable maps.
    data_extent: (u32, u32),
    slots: BTreeMap<TileIndex, TileSlot>,
}

impl TileMap {
    /// Builds the map for an existing image description.
    pub fn from_ifd(ifd: &Ifd, resizable: bool) -> TiffResult<TileMap> {
        let tile_width = ifd.tile_width()?;
        let tile_length = ifd.tile_length()?;
        let image_width = ifd.image_width()?;
        let image_height = ifd.image_height()?;
        let sample_type = ifd.sample_type()?;
        Ok(TileMap {
            tile_width,
            tile_length,
            image_width,
            image_height,
            grid_x: image_width.div_ceil(tile_width),
            grid_y: image_height.div_ceil(tile_length),
            planes: ifd.planes()?,
            samples_per_tile: ifd.samples_per_tile()?,
            bytes_per_sample: sample_type.bytes_per_sample(),
            packed_bits: sample_type.is_packed(),
            resizable,
            data_extent: (image_width, image_height),
            slots: BTreeMap::new(),
        })
    }

    /// Builds a resizable map with an initially empty grid; writes grow it.
    pub fn new_resizable(
        tile_width: u32,
        tile_length: u32,
        planes: u16,
        samples_per_tile: u16,
        bytes_per_sample: u32,
        packed_bits: bool,
    ) -> TileMap {
        TileMap {
            tile_width,
            tile_length,
            image_width: 0,
            image_height: 0,
            grid_x: 0,
            grid_y: 0,
            planes,
            samples_per_tile,
            bytes_per_sample,
            packed_bits,
            resizable: true,
            data_extent: (0, 0),
            slots: BTreeMap::new(),
        }
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_length(&self) -> u32 {
        self.tile_length
    }

    pub fn grid(&self) -> (u32, u32) {
        (self.grid_x, self.grid_y)
    }

    pub fn planes(&self) -> u16 {
        self.planes
    }

    pub fn is_resizable(&self) -> bool {
        self.resizable
    }

    /// Pixel bounds covered by the current grid.
    pub fn grid_bounds(&self) -> (u32, u32) {
        (self.grid_x * self.tile_width, self.grid_y * self.tile_length)
    }

    /// Maximum extent touched by writes; equals the image size for fixed
    /// maps.
    pub fn data_extent(&self) -> (u32, u32) {
        self.data_extent
    }

    /// Number of slots in the grid across all planes.
    pub fn tile_count(&self) -> usize {
        self.grid_x as usize * self.grid_y as usize * self.planes as usize
    }

    pub fn contains_index(&self, index: TileIndex) -> bool {
        index.plane < self.planes && index.x < self.grid_x && index.y < self.grid_y
    }

    /// Position of a tile in the positioning arrays:
    /// `plane * tiles_per_plane + y * grid_x + x`.
    pub fn linear_index(&self, index: TileIndex) -> TiffResult<usize> {
        if !self.contains_index(index) {
            return Err(TiffError::RangeError {
                request: format!(
                    "tile (plane {}, {}, {}) outside {}x{} grid of {} planes",
                    index.plane, index.x, index.y, self.grid_x, self.grid_y, self.planes
                ),
            });
        }
        let per_plane = self.grid_x as usize * self.grid_y as usize;
        Ok(index.plane as usize * per_plane
            + index.y as usize * self.grid_x as usize
            + index.x as usize)
    }

    /// Size of the tile at the given grid position, cropped to the image
    /// boundary when requested.
    pub fn tile_size(&self, index: TileIndex, crop: bool) -> (u32, u32) {
        if !crop {
            return (self.tile_width, self.tile_length);
        }
        let size_x = (self.image_width - index.x * self.tile_width).min(self.tile_width);
        let size_y = (self.image_height - index.y * self.tile_length).min(self.tile_length);
        (size_x, size_y)
    }

    /// Grows the grid of a resizable map until it contains the pixel
    /// rectangle `[0, width) x [0, height)`.
    pub fn expand_to_contain(&mut self, width: u32, height: u32) -> TiffResult<()> {
        if width <= self.grid_bounds().0 && height <= self.grid_bounds().1 {
            return Ok(());
        }
        if !self.resizable {
            return Err(TiffError::UsageError(UsageError::MapNotResizable));
        }
        self.grid_x = self.grid_x.max(width.div_ceil(self.tile_width));
        self.grid_y = self.grid_y.max(height.div_ceil(self.tile_length));
        Ok(())
    }

    /// Records that pixels up to (x, y) exclusive now hold data.
    pub(crate) fn note_data_extent(&mut self, x: u32, y: u32) {
        self.data_extent.0 = self.data_extent.0.max(x);
        self.data_extent.1 = self.data_extent.1.max(y);
        if self.resizable {
            self.image_width = self.data_extent.0;
            self.image_height = self.data_extent.1;
        }
    }

    /// The slot for a tile, created on first access.
    pub fn slot_mut(&mut self, index: TileIndex) -> TiffResult<&mut TileSlot> {
        let linear = self.linear_index(index)?;
        // Slots stay full-sized; cropping is a read-side concern and, for
        // resizable maps, the final dimensions arrive only at completion.
        let (size_x, size_y) = (self.tile_width, self.tile_length);
        let samples = self.samples_per_tile;
        let bytes = self.bytes_per_sample;
        let packed = self.packed_bits;
        Ok(self.slots.entry(index).or_insert_with(|| {
            TileSlot::new(index, size_x, size_y, samples, bytes, packed, linear)
        }))
    }

    pub fn slot(&self, index: TileIndex) -> Option<&TileSlot> {
        self.slots.get(&index)
    }

    /// All grid indices in linear order.
    pub fn indices(&self) -> impl Iterator<Item = TileIndex> + '_ {
        let (grid_x, grid_y, planes) = (self.grid_x, self.grid_y, self.planes);
        (0..planes).flat_map(move |plane| {
            (0..grid_y)
                .flat_map(move |y| (0..grid_x).map(move |x| TileIndex { plane, x, y }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_subtraction_covers_remainder() {
        let full = Rect::new(0, 0, 32, 32);
        let mut out = Vec::new();
        full.subtract_into(&Rect::new(8, 8, 16, 16), &mut out);
        assert_eq!(out.len(), 4);
        let area: u64 = out
            .iter()
            .map(|r| u64::from(r.max_x - r.min_x) * u64::from(r.max_y - r.min_y))
            .sum();
        assert_eq!(area, 32 * 32 - 8 * 8);
    }

    #[test]
    fn slot_coverage_tracks_partial_writes() {
        let mut slot = TileSlot::new(TileIndex::flat(0, 0), 32, 32, 1, 1, false, 0);
        assert!(!slot.is_fully_covered());
        slot.cover(Rect::new(0, 0, 32, 16));
        assert!(!slot.is_fully_covered());
        slot.cover(Rect::new(0, 16, 32, 32));
        assert!(slot.is_fully_covered());
    }

    #[test]
    fn disposed_slot_rejects_reads() {
        let mut slot = TileSlot::new(TileIndex::flat(1, 2), 16, 16, 3, 1, false, 5);
        slot.set_decoded(vec![0; 16 * 16 * 3], false).unwrap();
        slot.dispose();
        assert!(slot.decoded().is_err());
        assert!(matches!(slot.state(), TileState::Disposed));
    }

    #[test]
    fn resizable_map_expands_for_region() {
        let mut map = TileMap::new_resizable(32, 32, 1, 1, 1, false);
        assert_eq!(map.grid(), (0, 0));
        map.expand_to_contain(40, 40).unwrap();
        assert_eq!(map.grid(), (2, 2));
        assert_eq!(map.grid_bounds(), (64, 64));
        map.note_data_extent(40, 40);
        assert_eq!(map.data_extent(), (40, 40));
    }

    #[test]
    fn linear_index_is_plane_major() {
        let mut map = TileMap::new_resizable(16, 16, 3, 1, 1, false);
        map.expand_to_contain(32, 32).unwrap();
        assert_eq!(map.linear_index(TileIndex::new(0, 1, 0)).unwrap(), 1);
        assert_eq!(map.linear_index(TileIndex::new(0, 0, 1)).unwrap(), 2);
        assert_eq!(map.linear_index(TileIndex::new(2, 1, 1)).unwrap(), 2 * 4 + 3);
        assert!(map.linear_index(TileIndex::new(3, 0, 0)).is_err());
    }
}
