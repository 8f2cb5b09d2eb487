use super::VariableStore;
use log::debug;
use std::io;
use std::path::{Path, PathBuf};

/// Size of the attribute word efivarfs puts in front of the variable data.
const ATTRIBUTES_LEN: usize = 4;

/// UEFI variables through efivarfs, one file per variable named
/// `<name>-<guid>`.
#[derive(Debug, Clone)]
pub struct EfiVarFs {
    dir: PathBuf,
}

impl EfiVarFs {
    pub fn new<A: AsRef<Path>>(dir: A) -> Self {
        EfiVarFs {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn variable_path(&self, name: &str, guid: &str) -> PathBuf {
        self.dir.join(format!("{}-{}", name, guid))
    }
}

impl VariableStore for EfiVarFs {
    fn read_variable(&mut self, name: &str, guid: &str) -> io::Result<Vec<u8>> {
        let path = self.variable_path(name, guid);
        let mut data = std::fs::read(&path)?;
        if data.len() < ATTRIBUTES_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is shorter than its attributes", path.display()),
            ));
        }

        data.drain(..ATTRIBUTES_LEN);
        debug!("read {} bytes of {}-{}", data.len(), name, guid);
        Ok(data)
    }
}
