//! Disk image back ends for block targets

use anyhow::{bail, Result};
#[cfg(not(feature = "mmap"))]
use anyhow::Context;
#[cfg(feature = "mmap")]
use memmap2::MmapMut;
use std::path::{Path, PathBuf};

pub trait DiskImage: Send {
    fn byte_len(&self) -> usize;
    fn read_bytes(&self, offset: usize, length: usize) -> Vec<u8>;
    fn write_bytes(&mut self, offset: usize, data: &[u8]);
    fn image_path(&self) -> Option<&Path> {
        None
    }
}

/// Volatile image living in host memory
pub struct MemoryDiskImage {
    disk: Vec<u8>,
}

impl MemoryDiskImage {
    pub fn new(disk: Vec<u8>) -> Self {
        Self { disk }
    }

    /// Zero-filled image of `blocks` blocks
    pub fn blank(blocks: usize, block_size: usize) -> Self {
        Self::new(vec![0; blocks * block_size])
    }
}

impl DiskImage for MemoryDiskImage {
    fn byte_len(&self) -> usize {
        self.disk.len()
    }

    fn read_bytes(&self, offset: usize, length: usize) -> Vec<u8> {
        self.disk[offset..(offset + length)].to_vec()
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        self.disk[offset..(offset + data.len())].copy_from_slice(data);
    }
}

pub struct FileDiskImage {
    /// Disk contents
    #[cfg(feature = "mmap")]
    disk: MmapMut,

    #[cfg(not(feature = "mmap"))]
    disk: Vec<u8>,

    /// Path where the original image resides
    path: PathBuf,
}

impl FileDiskImage {
    /// Opens an image whose size must be a whole number of blocks.
    ///
    /// With the `mmap` feature, the file is locked and memory mapped so writes
    /// land on disk at the discretion of the operating system. Without it the
    /// image is read into memory and writes are lost on exit.
    pub fn open_block_sized(filename: &Path, block_size: usize) -> Result<Self> {
        let image = Self::open_file(filename)?;
        if !image.byte_len().is_multiple_of(block_size) {
            bail!(
                "Cannot load disk image {}: not multiple of {}",
                filename.display(),
                block_size
            );
        }
        Ok(image)
    }

    fn open_file(filename: &Path) -> Result<Self> {
        if !filename.exists() {
            bail!("File not found: {}", filename.display());
        }

        #[cfg(feature = "mmap")]
        let disk = Self::mmap_file(filename)?;

        #[cfg(not(feature = "mmap"))]
        let disk = std::fs::read(filename)
            .with_context(|| format!("Failed to open file {}", filename.display()))?;

        Ok(Self {
            disk,
            path: filename.to_path_buf(),
        })
    }

    #[cfg(feature = "mmap")]
    fn mmap_file(filename: &Path) -> Result<MmapMut> {
        use anyhow::Context;
        use fs2::FileExt;
        use std::fs::OpenOptions;
        use std::io::{Seek, SeekFrom};

        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(filename)
            .with_context(|| format!("Failed to open {}", filename.display()))?;
        let file_size = f.seek(SeekFrom::End(0))? as usize;
        f.seek(SeekFrom::Start(0))?;
        f.try_lock_exclusive()
            .with_context(|| format!("Failed to lock {}", filename.display()))?;
        let mmapped = unsafe {
            use memmap2::MmapOptions;

            MmapOptions::new()
                .len(file_size)
                .map_mut(&f)
                .with_context(|| format!("Failed to mmap file {}", filename.display()))?
        };
        Ok(mmapped)
    }
}

impl DiskImage for FileDiskImage {
    fn byte_len(&self) -> usize {
        self.disk.len()
    }

    fn read_bytes(&self, offset: usize, length: usize) -> Vec<u8> {
        self.disk[offset..(offset + length)].to_vec()
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        self.disk[offset..(offset + data.len())].copy_from_slice(data);
    }

    fn image_path(&self) -> Option<&Path> {
        Some(self.path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_image() {
        let mut img = MemoryDiskImage::blank(2, 512);
        assert_eq!(img.byte_len(), 1024);
        img.write_bytes(510, &[1, 2, 3, 4]);
        assert_eq!(img.read_bytes(511, 2), vec![2, 3]);
        assert!(img.image_path().is_none());
    }

    #[test]
    fn file_image_rejects_partial_blocks() {
        let path = std::env::temp_dir().join(format!("x54x-partial-{}.img", std::process::id()));
        std::fs::write(&path, vec![0u8; 700]).unwrap();
        assert!(FileDiskImage::open_block_sized(&path, 512).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_image_missing() {
        assert!(FileDiskImage::open_block_sized(Path::new("/nonexistent/x54x.img"), 512).is_err());
    }
}
