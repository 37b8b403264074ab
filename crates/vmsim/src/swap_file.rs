//! A swap device backed by a file on the host.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};
use vmm::SwapDevice;

/// Swap space in a host file, created when the simulator starts and removed at shutdown.
#[derive(Debug)]
pub struct FileSwapDevice {
    path: PathBuf,
    file: Option<File>,
}

impl FileSwapDevice {
    /// Creates (or truncates) the swap file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!("swap file {} created", path.display());
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("swap file has been closed"))
    }
}

impl SwapDevice for FileSwapDevice {
    type Error = io::Error;

    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset as u64))?;

        let mut total = 0;
        while total < buffer.len() {
            match file.read(&mut buffer[total..])? {
                0 => break,
                read => total += read,
            }
        }
        Ok(total)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<usize, Self::Error> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn close(&mut self) {
        if self.file.take().is_none() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("swap file {} removed", self.path.display()),
            Err(err) => warn!("failed to remove swap file {}: {err}", self.path.display()),
        }
    }
}
