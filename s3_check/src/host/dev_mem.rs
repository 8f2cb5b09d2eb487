use data_types::{Address, PhysicalAddress};
use hook_engine::{MemoryError, MemoryPort};
use log::trace;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Physical memory through `/dev/mem`.
///
/// Reads start at the page containing the address; some kernels refuse
/// unaligned accesses to `/dev/mem`.
#[derive(Debug)]
pub struct DevMem {
    path: PathBuf,
    file: File,
}

impl DevMem {
    pub fn open<A: AsRef<Path>>(path: A) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(DevMem { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MemoryPort for DevMem {
    fn read(&mut self, address: PhysicalAddress, length: usize) -> Result<Vec<u8>, MemoryError> {
        let aligned = address.page_base();
        let lead = address.page_offset();
        trace!("reading 0x{:x} bytes at {} from {}", length, address, self.path.display());

        let mut data = vec![0u8; lead + length];
        self.file
            .read_exact_at(&mut data, aligned.address())
            .map_err(|source| MemoryError::Io {
                address,
                length,
                source,
            })?;
        data.drain(..lead);
        Ok(data)
    }

    fn write(&mut self, address: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError> {
        trace!("writing 0x{:x} bytes at {} to {}", data.len(), address, self.path.display());
        self.file
            .write_all_at(data, address.address())
            .map_err(|source| MemoryError::Io {
                address,
                length: data.len(),
                source,
            })
    }
}
