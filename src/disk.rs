//! Data disk synthesis.
//!
//! A new guest gets a data disk whose raw contents are a small tar archive:
//! a format marker followed by the host's SSH public key. The guest's first
//! boot script sees the marker, formats the disk and unpacks the key. The
//! archive is zero-padded to the exact disk size and streamed into
//! `VBoxManage convertfromraw`.
//!
//! # Archive layout
//!
//! ```text
//! boot2docker, please format-me   # marker, must be the first entry
//! .ssh/                           # 0700
//! .ssh/authorized_keys            # 0644, public key
//! .ssh/authorized_keys2           # 0644, same key
//! ```

use crate::drivers::virtualbox::vbm::VBoxManage;
use crate::error::{Error, Result};
use std::io::{Cursor, Read};
use std::path::Path;

/// Marker file name and content that asks the guest to format the disk.
pub const FORMAT_MARKER: &str = "boot2docker, please format-me";

/// Default data disk size (20 GB).
pub const DEFAULT_DISK_SIZE_MB: u64 = 20000;

/// Convert a size in MiB to bytes.
pub fn size_bytes(size_mb: u64) -> u64 {
    size_mb << 20
}

/// Build the tar payload for a data disk carrying `public_key`.
pub fn build_payload(public_key: &[u8]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    // The marker goes first so the guest's detector sees it at offset 0.
    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(FORMAT_MARKER.len() as u64);
    builder.append_data(&mut header, FORMAT_MARKER, FORMAT_MARKER.as_bytes())?;

    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o700);
    header.set_size(0);
    builder.append_data(&mut header, ".ssh", std::io::empty())?;

    for name in [".ssh/authorized_keys", ".ssh/authorized_keys2"] {
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(public_key.len() as u64);
        builder.append_data(&mut header, name, public_key)?;
    }

    Ok(builder.into_inner()?)
}

/// Reader yielding a payload followed by zeros up to a fixed total length.
#[derive(Debug)]
pub struct PaddedPayload {
    payload: Cursor<Vec<u8>>,
    zeros_left: u64,
}

impl PaddedPayload {
    /// Pad `payload` to exactly `total` bytes.
    ///
    /// Fails with [`Error::DiskTooSmall`] if the payload alone exceeds
    /// `total`.
    pub fn new(payload: Vec<u8>, total: u64) -> Result<Self> {
        let len = payload.len() as u64;
        if len > total {
            return Err(Error::DiskTooSmall {
                payload: len,
                capacity: total,
            });
        }
        Ok(Self {
            payload: Cursor::new(payload),
            zeros_left: total - len,
        })
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> u64 {
        let payload_left = self.payload.get_ref().len() as u64 - self.payload.position();
        payload_left + self.zeros_left
    }
}

impl Read for PaddedPayload {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.payload.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        let n = buf.len().min(usize::try_from(self.zeros_left).unwrap_or(usize::MAX));
        buf[..n].fill(0);
        self.zeros_left -= n as u64;
        Ok(n)
    }
}

/// Create a VMDK disk at `dest` of `size_mb`, whose raw contents start with
/// `payload`.
pub fn create_disk_image(
    vbm: &dyn VBoxManage,
    dest: &Path,
    size_mb: u64,
    payload: Vec<u8>,
) -> Result<()> {
    let total = size_bytes(size_mb);
    let mut input = PaddedPayload::new(payload, total)?;

    tracing::debug!(path = %dest.display(), size_mb, "creating disk image");

    let dest = dest.to_string_lossy();
    let total = total.to_string();
    vbm.pipe_stdin(
        &["convertfromraw", "stdin", &dest, &total, "--format", "VMDK"],
        &mut input,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQC7 hostkit@test\n";

    #[test]
    fn test_payload_layout() {
        let payload = build_payload(KEY).unwrap();
        let mut archive = tar::Archive::new(Cursor::new(payload));

        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mode = entry.header().mode().unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            seen.push((path, mode, content));
        }

        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].0, FORMAT_MARKER);
        assert_eq!(seen[0].2, FORMAT_MARKER.as_bytes());
        assert_eq!(seen[1].0.trim_end_matches('/'), ".ssh");
        assert_eq!(seen[1].1, 0o700);
        assert_eq!(seen[2].0, ".ssh/authorized_keys");
        assert_eq!(seen[2].2, KEY);
        assert_eq!(seen[3].0, ".ssh/authorized_keys2");
        assert_eq!(seen[3].2, KEY);
    }

    #[test]
    fn test_marker_is_at_start_of_disk() {
        let payload = build_payload(KEY).unwrap();
        // tar stores the first entry's name at offset 0 of its header.
        assert!(payload.starts_with(FORMAT_MARKER.as_bytes()));
    }

    #[test]
    fn test_padding_delivers_exact_size() {
        let payload = build_payload(KEY).unwrap();
        let payload_len = payload.len();
        let total = size_bytes(1);

        let mut reader = PaddedPayload::new(payload.clone(), total).unwrap();
        assert_eq!(reader.remaining(), total);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len() as u64, total);
        assert_eq!(&out[..payload_len], &payload[..]);
        assert!(out[payload_len..].iter().all(|&b| b == 0));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_payload_exactly_filling_disk_needs_no_padding() {
        let mut reader = PaddedPayload::new(vec![7u8; 4096], 4096).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![7u8; 4096]);
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let err = PaddedPayload::new(vec![0u8; 2048], 1024).unwrap_err();
        assert!(matches!(
            err,
            Error::DiskTooSmall {
                payload: 2048,
                capacity: 1024
            }
        ));
    }
}
