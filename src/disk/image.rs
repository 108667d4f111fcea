//! In-memory floppy disk image
//!
//! A flat track/side/sector layout the WD1770 model samples. The two
//! geometries the supported interfaces use are MGT (+D/Disciple: 80
//! tracks, 2 sides, 10 x 512-byte sectors) and TRD (Beta 128: 80 tracks,
//! 2 sides, 16 x 256-byte sectors, sectors numbered from 1).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("disk image size {0} does not match any supported geometry")]
    BadSize(usize),
    #[error("no sector {sector} on track {track} side {side}")]
    NoSuchSector { track: u8, side: u8, sector: u8 },
}

/// Disk geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub tracks: u8,
    pub sides: u8,
    pub sectors_per_track: u8,
    pub sector_size: usize,
    /// ID of the first sector (MGT counts from 1, as does TRD)
    pub first_sector: u8,
}

impl Geometry {
    /// WD sector length code (0=128, 1=256, 2=512, 3=1024)
    pub fn length_code(&self) -> u8 {
        match self.sector_size {
            128 => 0,
            256 => 1,
            512 => 2,
            _ => 3,
        }
    }
}

const MGT: Geometry = Geometry {
    tracks: 80,
    sides: 2,
    sectors_per_track: 10,
    sector_size: 512,
    first_sector: 1,
};

const TRD: Geometry = Geometry {
    tracks: 80,
    sides: 2,
    sectors_per_track: 16,
    sector_size: 256,
    first_sector: 1,
};

pub struct DiskImage {
    geometry: Geometry,
    data: Vec<u8>,
    pub write_protect: bool,
    /// Set when the image has been written since insertion
    pub dirty: bool,
}

impl DiskImage {
    /// Interpret a raw dump by its size
    pub fn from_bytes(data: &[u8]) -> Result<DiskImage, DiskError> {
        let geometry = [MGT, TRD]
            .into_iter()
            .find(|g| {
                data.len()
                    == g.tracks as usize
                        * g.sides as usize
                        * g.sectors_per_track as usize
                        * g.sector_size
            })
            .ok_or(DiskError::BadSize(data.len()))?;

        Ok(DiskImage {
            geometry,
            data: data.to_vec(),
            write_protect: false,
            dirty: false,
        })
    }

    /// A blank, formatted image in the given geometry
    pub fn blank(geometry: Geometry) -> DiskImage {
        let size = geometry.tracks as usize
            * geometry.sides as usize
            * geometry.sectors_per_track as usize
            * geometry.sector_size;
        DiskImage {
            geometry,
            data: vec![0; size],
            write_protect: false,
            dirty: false,
        }
    }

    pub fn blank_mgt() -> DiskImage {
        Self::blank(MGT)
    }

    pub fn blank_trd() -> DiskImage {
        Self::blank(TRD)
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn offset(&self, track: u8, side: u8, sector: u8) -> Result<usize, DiskError> {
        let g = self.geometry;
        if track >= g.tracks
            || side >= g.sides
            || sector < g.first_sector
            || sector >= g.first_sector + g.sectors_per_track
        {
            return Err(DiskError::NoSuchSector {
                track,
                side,
                sector,
            });
        }
        let index = (track as usize * g.sides as usize + side as usize)
            * g.sectors_per_track as usize
            + (sector - g.first_sector) as usize;
        Ok(index * g.sector_size)
    }

    pub fn sector(&self, track: u8, side: u8, sector: u8) -> Result<&[u8], DiskError> {
        let offset = self.offset(track, side, sector)?;
        Ok(&self.data[offset..offset + self.geometry.sector_size])
    }

    pub fn sector_mut(
        &mut self,
        track: u8,
        side: u8,
        sector: u8,
    ) -> Result<&mut [u8], DiskError> {
        let offset = self.offset(track, side, sector)?;
        self.dirty = true;
        Ok(&mut self.data[offset..offset + self.geometry.sector_size])
    }

    pub fn has_sector(&self, track: u8, side: u8, sector: u8) -> bool {
        self.offset(track, side, sector).is_ok()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
