use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use crc32c::crc32c;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::TopologyError;
use crate::state::ClusterTopology;

const FILE_MAGIC: u64 = 0x5745_4654_544f_504f; // "WEFTTOPO"
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16; // magic + format version + checksum

/// File name used inside a node's data directory.
pub const TOPOLOGY_FILE_NAME: &str = "topology.meta";

/// Crash-safe, corruption-detecting persistence of the latest topology
/// snapshot, so a restarting node does not have to wait for the network
/// before knowing what it knew before.
///
/// On-disk layout: `[magic u64][format version u32][CRC32-C of payload
/// u32][bincode payload]`, all little-endian. Writes go to a temporary file
/// that is fsynced and atomically renamed over the target, so a crash
/// mid-write can never leave a file that passes the checksum with mixed
/// old/new bytes. One store instance exclusively owns the file of one data
/// directory.
pub struct TopologyStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TopologyStore {
    /// Creates a store persisting to the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store using the conventional file name inside a data
    /// directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(TOPOLOGY_FILE_NAME))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted snapshot.
    ///
    /// A missing or zero-length file is a fresh node, not an error, and
    /// yields [`ClusterTopology::uninitialized`].
    ///
    /// # Errors
    ///
    /// [`TopologyError::MissingHeader`] when the file is non-empty but
    /// shorter than the header, [`TopologyError::UnexpectedVersion`] when
    /// the format marker or version is not one this build understands, and
    /// [`TopologyError::ChecksumMismatch`] when the payload on disk
    /// (including any trailing bytes appended after a valid write) does not
    /// hash to the stored checksum.
    pub fn open(&self) -> Result<ClusterTopology, TopologyError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                return Ok(ClusterTopology::uninitialized());
            }
            Err(err) => return Err(TopologyError::Io(err)),
        };
        if bytes.is_empty() {
            return Ok(ClusterTopology::uninitialized());
        }
        if bytes.len() < HEADER_LEN {
            return Err(TopologyError::MissingHeader {
                len: bytes.len() as u64,
            });
        }

        let mut magic_bytes = [0u8; 8];
        magic_bytes.copy_from_slice(&bytes[0..8]);
        let magic = u64::from_le_bytes(magic_bytes);
        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(&bytes[8..12]);
        let version = u32::from_le_bytes(version_bytes);
        if magic != FILE_MAGIC || version != FORMAT_VERSION {
            return Err(TopologyError::UnexpectedVersion { magic, version });
        }

        let mut checksum_bytes = [0u8; 4];
        checksum_bytes.copy_from_slice(&bytes[12..16]);
        let expected = u32::from_le_bytes(checksum_bytes);
        let payload = &bytes[HEADER_LEN..];
        let actual = crc32c(payload);
        if actual != expected {
            return Err(TopologyError::ChecksumMismatch { expected, actual });
        }

        bincode::deserialize(payload)
            .map_err(|err| TopologyError::Serialization(err.to_string()))
    }

    /// Atomically replaces the persisted snapshot.
    pub fn update(&self, topology: &ClusterTopology) -> Result<(), TopologyError> {
        let payload = bincode::serialize(topology)
            .map_err(|err| TopologyError::Serialization(err.to_string()))?;
        let checksum = crc32c(&payload);

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&FILE_MAGIC.to_le_bytes());
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf.extend_from_slice(&payload);

        let _guard = self.write_lock.lock();
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        // The rename is the commit point.
        fs::rename(&tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            if let Ok(dir_handle) = File::open(dir) {
                let _ = dir_handle.sync_all();
            }
        }
        debug!(
            path = %self.path.display(),
            version = topology.version,
            "persisted cluster topology"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;
    use crate::error::TopologyErrorKind;
    use crate::state::{MemberId, MemberState, PartitionId, PartitionState};

    fn sample_topology() -> ClusterTopology {
        let mut partitions = BTreeMap::new();
        partitions.insert(PartitionId(1), PartitionState::active(2));
        ClusterTopology::init()
            .add_member(
                &MemberId::new("member-1"),
                MemberState::active_with_partitions(partitions),
            )
            .expect("add member")
    }

    #[test]
    fn roundtrips_a_snapshot() {
        let dir = TempDir::new().expect("temp dir");
        let store = TopologyStore::in_dir(dir.path());

        let topology = sample_topology();
        store.update(&topology).expect("persist");
        assert_eq!(store.open().expect("reopen"), topology);
    }

    #[test]
    fn missing_file_is_a_fresh_node() {
        let dir = TempDir::new().expect("temp dir");
        let store = TopologyStore::in_dir(dir.path());
        assert!(store.open().expect("open absent").is_uninitialized());
    }

    #[test]
    fn empty_file_is_a_fresh_node() {
        let dir = TempDir::new().expect("temp dir");
        let store = TopologyStore::in_dir(dir.path());
        fs::write(store.path(), b"").expect("truncate");
        assert!(store.open().expect("open empty").is_uninitialized());
    }

    #[test]
    fn truncated_header_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let store = TopologyStore::in_dir(dir.path());
        fs::write(store.path(), [0u8, 1]).expect("write stub");

        let err = store.open().expect_err("short file");
        assert_eq!(err.kind(), TopologyErrorKind::MissingHeader);
    }

    #[test]
    fn overwritten_header_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let store = TopologyStore::in_dir(dir.path());
        store.update(&sample_topology()).expect("persist");

        let mut bytes = fs::read(store.path()).expect("read back");
        bytes[0] ^= 0xFF;
        fs::write(store.path(), &bytes).expect("corrupt magic");
        let err = store.open().expect_err("bad magic");
        assert_eq!(err.kind(), TopologyErrorKind::UnexpectedVersion);

        store.update(&sample_topology()).expect("persist again");
        let mut bytes = fs::read(store.path()).expect("read back");
        bytes[8] = 0xAA; // format version
        fs::write(store.path(), &bytes).expect("corrupt version");
        let err = store.open().expect_err("bad version");
        assert_eq!(err.kind(), TopologyErrorKind::UnexpectedVersion);
    }

    #[test]
    fn trailing_garbage_is_a_checksum_mismatch() {
        let dir = TempDir::new().expect("temp dir");
        let store = TopologyStore::in_dir(dir.path());
        store.update(&sample_topology()).expect("persist");

        let mut bytes = fs::read(store.path()).expect("read back");
        bytes.extend_from_slice(b"junk");
        fs::write(store.path(), &bytes).expect("append garbage");

        let err = store.open().expect_err("trailing bytes");
        assert_eq!(err.kind(), TopologyErrorKind::ChecksumMismatch);
    }

    #[test]
    fn flipped_payload_byte_is_a_checksum_mismatch() {
        let dir = TempDir::new().expect("temp dir");
        let store = TopologyStore::in_dir(dir.path());
        store.update(&sample_topology()).expect("persist");

        let mut bytes = fs::read(store.path()).expect("read back");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        fs::write(store.path(), &bytes).expect("flip payload byte");

        let err = store.open().expect_err("payload corruption");
        assert_eq!(err.kind(), TopologyErrorKind::ChecksumMismatch);
    }

    #[test]
    fn latest_update_wins() {
        let dir = TempDir::new().expect("temp dir");
        let store = TopologyStore::in_dir(dir.path());

        let first = sample_topology();
        store.update(&first).expect("persist first");
        let second = first
            .update_member(&MemberId::new("member-1"), |state| Ok(state.to_leaving()))
            .expect("mutate");
        store.update(&second).expect("persist second");

        assert_eq!(store.open().expect("reopen"), second);
    }
}
