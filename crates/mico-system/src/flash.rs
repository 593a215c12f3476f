use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;

use tracing::debug;

use crate::config::{
    APPLICATION_PARTITION_START, CONFIG_PARTITION_SIZE, CONFIG_PARTITION_START,
    IMAGE_PARTITION_SIZE, OTA_PARTITION_START,
};
use crate::error::{Error, ErrorKind, Result};

// Value of an erased flash byte.
const ERASED: u8 = 0xFF;

fn flash_error(error: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Flash, error)
}

/// A logical flash partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Bootloader.
    Bootloader,
    /// Running application.
    Application,
    /// Temporary storage of a received OTA image.
    OtaTemp,
    /// Configuration record.
    Config,
}

impl Partition {
    const fn name(self) -> &'static str {
        match self {
            Self::Bootloader => "bootloader",
            Self::Application => "application",
            Self::OtaTemp => "ota",
            Self::Config => "config",
        }
    }
}

/// Location and size of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    /// Start address.
    pub start_address: u32,
    /// Size in bytes.
    pub size: usize,
}

/// Default flash layout.
pub const DEFAULT_LAYOUT: &[(Partition, PartitionInfo)] = &[
    (
        Partition::Config,
        PartitionInfo {
            start_address: CONFIG_PARTITION_START,
            size: CONFIG_PARTITION_SIZE,
        },
    ),
    (
        Partition::Application,
        PartitionInfo {
            start_address: APPLICATION_PARTITION_START,
            size: IMAGE_PARTITION_SIZE,
        },
    ),
    (
        Partition::OtaTemp,
        PartitionInfo {
            start_address: OTA_PARTITION_START,
            size: IMAGE_PARTITION_SIZE,
        },
    ),
];

/// Access to the device flash.
///
/// Writes follow NOR semantics: a partition must be erased before being
/// written again.
pub trait Flash: Send + Sync {
    /// Returns the location of a partition, `None` if the device has no
    /// such partition.
    fn partition(&self, partition: Partition) -> Option<PartitionInfo>;

    /// Erases a whole partition.
    ///
    /// # Errors
    ///
    /// Fails when the partition does not exist or cannot be erased.
    fn erase(&self, partition: Partition) -> Result<()>;

    /// Writes `data` at `offset` inside a partition.
    ///
    /// # Errors
    ///
    /// Fails when the range exceeds the partition or the write fails.
    fn write(&self, partition: Partition, offset: usize, data: &[u8]) -> Result<()>;

    /// Reads `buf.len()` bytes at `offset` inside a partition.
    ///
    /// # Errors
    ///
    /// Fails when the range exceeds the partition or the read fails.
    fn read(&self, partition: Partition, offset: usize, buf: &mut [u8]) -> Result<()>;
}

fn check_range(info: PartitionInfo, partition: Partition, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= info.size => Ok(()),
        _ => Err(flash_error(format!(
            "Range {offset}+{len} exceeds the {} partition of {} bytes",
            partition.name(),
            info.size
        ))),
    }
}

struct Region {
    info: PartitionInfo,
    data: Vec<u8>,
}

/// A flash kept in memory.
pub struct MemoryFlash {
    regions: Mutex<HashMap<Partition, Region>>,
    fail_writes: AtomicBool,
}

impl Default for MemoryFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFlash {
    /// Creates an erased [`MemoryFlash`] with the [`DEFAULT_LAYOUT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_layout(DEFAULT_LAYOUT)
    }

    /// Creates an erased [`MemoryFlash`] with the given layout.
    #[must_use]
    pub fn with_layout(layout: &[(Partition, PartitionInfo)]) -> Self {
        let regions = layout
            .iter()
            .map(|(partition, info)| {
                (
                    *partition,
                    Region {
                        info: *info,
                        data: vec![ERASED; info.size],
                    },
                )
            })
            .collect();

        Self {
            regions: Mutex::new(regions),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every following write and erase fail, or succeed again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of a partition content.
    #[must_use]
    pub fn contents(&self, partition: Partition) -> Option<Vec<u8>> {
        self.regions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&partition)
            .map(|region| region.data.clone())
    }

    fn with_region<T>(
        &self,
        partition: Partition,
        f: impl FnOnce(&mut Region) -> Result<T>,
    ) -> Result<T> {
        let mut regions = self
            .regions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let region = regions
            .get_mut(&partition)
            .ok_or_else(|| flash_error(format!("No {} partition", partition.name())))?;
        f(region)
    }

    fn check_writable(&self, partition: Partition) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(flash_error(format!(
                "Injected failure on the {} partition",
                partition.name()
            )));
        }
        Ok(())
    }
}

impl Flash for MemoryFlash {
    fn partition(&self, partition: Partition) -> Option<PartitionInfo> {
        self.with_region(partition, |region| Ok(region.info)).ok()
    }

    fn erase(&self, partition: Partition) -> Result<()> {
        self.check_writable(partition)?;
        self.with_region(partition, |region| {
            region.data.fill(ERASED);
            Ok(())
        })
    }

    fn write(&self, partition: Partition, offset: usize, data: &[u8]) -> Result<()> {
        self.check_writable(partition)?;
        self.with_region(partition, |region| {
            check_range(region.info, partition, offset, data.len())?;
            // Programming only clears bits.
            for (dst, src) in region.data[offset..offset + data.len()].iter_mut().zip(data) {
                *dst &= *src;
            }
            Ok(())
        })
    }

    fn read(&self, partition: Partition, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.with_region(partition, |region| {
            check_range(region.info, partition, offset, buf.len())?;
            buf.copy_from_slice(&region.data[offset..offset + buf.len()]);
            Ok(())
        })
    }
}

/// A flash backed by one file per partition.
///
/// Missing files read as erased partitions.
pub struct FileFlash {
    directory: PathBuf,
    layout: HashMap<Partition, PartitionInfo>,
}

impl FileFlash {
    /// Creates a [`FileFlash`] storing its partitions in `directory`.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created.
    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        Self::with_layout(directory, DEFAULT_LAYOUT)
    }

    /// Creates a [`FileFlash`] with the given layout.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created.
    pub fn with_layout(
        directory: impl AsRef<Path>,
        layout: &[(Partition, PartitionInfo)],
    ) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory).map_err(|e| {
            flash_error(format!(
                "Impossible to create `{}`: {e}",
                directory.display()
            ))
        })?;

        debug!("Flash partitions stored in `{}`", directory.display());

        Ok(Self {
            directory,
            layout: layout.iter().copied().collect(),
        })
    }

    fn path(&self, partition: Partition) -> PathBuf {
        self.directory.join(format!("{}.bin", partition.name()))
    }

    fn info(&self, partition: Partition) -> Result<PartitionInfo> {
        self.layout
            .get(&partition)
            .copied()
            .ok_or_else(|| flash_error(format!("No {} partition", partition.name())))
    }

    fn open(&self, partition: Partition) -> Result<File> {
        let info = self.info(partition)?;
        let path = self.path(partition);

        if !path.exists() {
            std::fs::write(&path, vec![ERASED; info.size])
                .map_err(|e| flash_error(format!("Impossible to create `{}`: {e}", path.display())))?;
        }

        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| flash_error(format!("Impossible to open `{}`: {e}", path.display())))
    }
}

impl Flash for FileFlash {
    fn partition(&self, partition: Partition) -> Option<PartitionInfo> {
        self.layout.get(&partition).copied()
    }

    fn erase(&self, partition: Partition) -> Result<()> {
        let info = self.info(partition)?;
        let path = self.path(partition);
        std::fs::write(&path, vec![ERASED; info.size])
            .map_err(|e| flash_error(format!("Impossible to erase `{}`: {e}", path.display())))
    }

    fn write(&self, partition: Partition, offset: usize, data: &[u8]) -> Result<()> {
        check_range(self.info(partition)?, partition, offset, data.len())?;
        let mut file = self.open(partition)?;
        file.seek(SeekFrom::Start(offset as u64))
            .and_then(|_| file.write_all(data))
            .and_then(|()| file.sync_data())
            .map_err(|e| flash_error(format!("Write on the {} partition: {e}", partition.name())))
    }

    fn read(&self, partition: Partition, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_range(self.info(partition)?, partition, offset, buf.len())?;
        let mut file = self.open(partition)?;
        file.seek(SeekFrom::Start(offset as u64))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| flash_error(format!("Read on the {} partition: {e}", partition.name())))
    }
}
