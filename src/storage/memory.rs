//! In-memory storage, used for tests and throwaway logs.

use super::Storage;
use crate::error::Result;
use parking_lot::RwLock;

/// Storage held entirely in a byte vector.
#[derive(Debug)]
pub struct MemStorage {
    data: RwLock<Vec<u8>>,
    name: String,
}

impl MemStorage {
    /// Creates an empty region.
    pub fn new(name: impl Into<String>) -> Self {
        Self { data: RwLock::new(Vec::new()), name: name.into() }
    }

    /// Copies the whole region out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl Storage for MemStorage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.read();
        let len = data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<usize> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.data.write().resize(len as usize, 0);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let mut data = self.data.write();
        data.clear();
        data.shrink_to_fit();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_grows() {
        let storage = MemStorage::new("mem");
        storage.write_at(4, b"data").unwrap();
        assert_eq!(storage.len().unwrap(), 8);
        assert_eq!(storage.to_vec(), b"\0\0\0\0data");
    }

    #[test]
    fn test_overwrite_in_place() {
        let storage = MemStorage::new("mem");
        storage.write_at(0, b"aaaaaa").unwrap();
        storage.write_at(2, b"bb").unwrap();
        assert_eq!(storage.to_vec(), b"aabbaa");
        assert_eq!(storage.len().unwrap(), 6);
    }

    #[test]
    fn test_delete_clears() {
        let storage = MemStorage::new("mem");
        storage.write_at(0, b"data").unwrap();
        storage.delete().unwrap();
        assert!(storage.is_empty().unwrap());
    }
}
