//! Look-up table files written by the model generator
//!
//! Layout, little-endian: `u16` dimension count, one `u16` size per dimension (fastest-varying
//! first, channels excluded), then four `f32` per texel. The last dimension of altitude-dependent
//! tables is altitude, so one altitude slice is a contiguous run of texels.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::LoadError;

const TEXEL_BYTES: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub sizes: Vec<u32>,
    data_offset: u64,
}

fn io_error(path: &Path, source: io::Error) -> LoadError {
    if source.kind() == io::ErrorKind::NotFound {
        LoadError::MissingFile(path.to_owned())
    } else {
        LoadError::Io {
            path: path.to_owned(),
            source,
        }
    }
}

fn bad(path: &Path, reason: String) -> LoadError {
    LoadError::BadTable {
        path: path.to_owned(),
        reason,
    }
}

impl TableHeader {
    /// Read and sanity-check the header of `path` without touching the payload
    pub fn read(path: &Path) -> Result<Self, LoadError> {
        let mut file = File::open(path).map_err(|e| io_error(path, e))?;
        let header = Self::parse(path, &mut file)?;
        let len = file.metadata().map_err(|e| io_error(path, e))?.len();
        let expected = header.data_offset + header.texel_count() as u64 * TEXEL_BYTES;
        if len != expected {
            return Err(bad(
                path,
                format!("file is {} bytes, header implies {}", len, expected),
            ));
        }
        Ok(header)
    }

    fn parse(path: &Path, file: &mut File) -> Result<Self, LoadError> {
        let mut word = [0; 2];
        file.read_exact(&mut word).map_err(|e| io_error(path, e))?;
        let ndims = u16::from_le_bytes(word);
        if ndims == 0 {
            return Err(bad(path, "zero dimensions".into()));
        }
        let mut sizes = Vec::with_capacity(ndims as usize);
        for _ in 0..ndims {
            file.read_exact(&mut word).map_err(|e| io_error(path, e))?;
            sizes.push(u32::from(u16::from_le_bytes(word)));
        }
        Ok(Self {
            sizes,
            data_offset: 2 + 2 * u64::from(ndims),
        })
    }

    pub fn texel_count(&self) -> usize {
        self.sizes.iter().map(|&x| x as usize).product()
    }

    /// Texels in one slice along the last dimension
    pub fn slice_texel_count(&self) -> usize {
        self.sizes[..self.sizes.len() - 1]
            .iter()
            .map(|&x| x as usize)
            .product()
    }

    pub fn altitude_count(&self) -> u32 {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn expect_sizes(&self, path: &Path, expected: &[u32]) -> Result<(), LoadError> {
        if self.sizes != expected {
            return Err(bad(
                path,
                format!("dimensions {:?}, model expects {:?}", self.sizes, expected),
            ));
        }
        Ok(())
    }
}

fn read_texels(path: &Path, offset: u64, count: usize) -> Result<Vec<[f32; 4]>, LoadError> {
    let mut file = File::open(path).map_err(|e| io_error(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| io_error(path, e))?;
    let mut bytes = vec![0; count * TEXEL_BYTES as usize];
    file.read_exact(&mut bytes).map_err(|e| io_error(path, e))?;
    Ok(bytes
        .chunks_exact(TEXEL_BYTES as usize)
        .map(|texel| {
            let mut out = [0.0; 4];
            for (x, b) in out.iter_mut().zip(texel.chunks_exact(4)) {
                *x = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            }
            out
        })
        .collect())
}

pub fn read_whole(path: &Path, header: &TableHeader) -> Result<Vec<[f32; 4]>, LoadError> {
    read_texels(path, header.data_offset, header.texel_count())
}

/// Read the texels of altitude level `index`
pub fn read_altitude_slice(
    path: &Path,
    header: &TableHeader,
    index: u32,
) -> Result<Vec<[f32; 4]>, LoadError> {
    if index >= header.altitude_count() {
        return Err(bad(
            path,
            format!(
                "altitude slice {} out of {}",
                index,
                header.altitude_count()
            ),
        ));
    }
    let count = header.slice_texel_count();
    let offset = header.data_offset + u64::from(index) * count as u64 * TEXEL_BYTES;
    read_texels(path, offset, count)
}

/// Write a table in the layout `TableHeader::read` expects
pub fn write_table(path: &Path, sizes: &[u16], texels: &[[f32; 4]]) -> io::Result<()> {
    let expected: usize = sizes.iter().map(|&x| x as usize).product();
    if expected != texels.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} texels for dimensions {:?}", texels.len(), sizes),
        ));
    }
    let mut out = Vec::with_capacity(2 + 2 * sizes.len() + texels.len() * TEXEL_BYTES as usize);
    out.extend_from_slice(&(sizes.len() as u16).to_le_bytes());
    for &size in sizes {
        out.extend_from_slice(&size.to_le_bytes());
    }
    for texel in texels {
        for &x in texel {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    File::create(path)?.write_all(&out)
}

/// Paths of the tables of one model, relative to its texture directory
pub struct TablePaths<'a> {
    pub dir: &'a Path,
}

impl TablePaths<'_> {
    pub fn transmittance(&self, wlset: usize) -> PathBuf {
        self.dir.join(format!("transmittance-wlset{}.f32", wlset))
    }
    pub fn irradiance(&self, wlset: usize) -> PathBuf {
        self.dir.join(format!("irradiance-wlset{}.f32", wlset))
    }
    pub fn multiple_scattering(&self, wlset: usize) -> PathBuf {
        self.dir.join(format!("multiple-scattering-wlset{}.f32", wlset))
    }
    pub fn single_scattering(&self, scatterer: &str, wlset: usize) -> PathBuf {
        self.dir
            .join("single-scattering")
            .join(format!("{}-wlset{}.f32", scatterer, wlset))
    }
    pub fn interpolation_guides(&self, scatterer: &str, wlset: usize) -> PathBuf {
        self.dir
            .join("single-scattering")
            .join(format!("{}-wlset{}-guides.f32", scatterer, wlset))
    }
    pub fn light_pollution(&self, wlset: usize) -> PathBuf {
        self.dir.join(format!("light-pollution-wlset{}.f32", wlset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<[f32; 4]> {
        (0..n).map(|i| [i as f32, 0.5, -1.0, 1e-20]).collect()
    }

    #[test]
    fn header_and_slices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.f32");
        write_table(&path, &[2, 3, 4], &ramp(24)).unwrap();

        let header = TableHeader::read(&path).unwrap();
        assert_eq!(header.sizes, vec![2, 3, 4]);
        assert_eq!(header.slice_texel_count(), 6);
        assert_eq!(header.altitude_count(), 4);

        let slice = read_altitude_slice(&path, &header, 2).unwrap();
        assert_eq!(slice, ramp(24)[12..18].to_vec());
        assert_eq!(read_whole(&path, &header).unwrap(), ramp(24));
        assert!(read_altitude_slice(&path, &header, 4).is_err());
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.f32");
        assert!(matches!(
            TableHeader::read(&path),
            Err(LoadError::MissingFile(_))
        ));
    }

    #[test]
    fn truncated_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.f32");
        write_table(&path, &[4, 2], &ramp(8)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(
            TableHeader::read(&path),
            Err(LoadError::BadTable { .. })
        ));
    }

    #[test]
    fn dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.f32");
        write_table(&path, &[4, 2], &ramp(8)).unwrap();
        let header = TableHeader::read(&path).unwrap();
        assert!(header.expect_sizes(&path, &[4, 2]).is_ok());
        assert!(header.expect_sizes(&path, &[2, 4]).is_err());
    }
}
