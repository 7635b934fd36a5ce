//! Flash driver over an ESP-IDF data partition.
//!
//! The whole partition is memory-mapped once at open; reads are slices of
//! that window. Erase and write go through the partition API, which blocks
//! until done, so the completion is ready on the next poll.

use core::ffi::{c_void, CStr};
use core::ptr;

use esp_idf_svc::sys::{self, esp, EspError};
use thiserror::Error;

use crate::flash::{FlashCompletion, FlashDriver, FlashError};

#[derive(Debug, Error)]
pub enum PartitionError {
    /// H01: No data partition with that label
    #[error("H01: partition not found")]
    NotFound,
    /// H02: Mapping failed
    #[error("H02: mmap failed: {0}")]
    Map(EspError),
}

/// Dataset partition, addressed from its first byte.
pub struct PartitionFlash {
    partition: *const sys::esp_partition_t,
    mapped: *const u8,
    map_handle: sys::esp_partition_mmap_handle_t,
    size: u32,
    page_size: u32,
    pending: Option<Result<FlashCompletion, FlashError>>,
}

impl PartitionFlash {
    /// Find the data partition `label` and map it for reading.
    pub fn open(label: &CStr) -> Result<Self, PartitionError> {
        let partition = unsafe {
            sys::esp_partition_find_first(
                sys::esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                sys::esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                label.as_ptr(),
            )
        };
        if partition.is_null() {
            return Err(PartitionError::NotFound);
        }

        let (size, page_size) = unsafe { ((*partition).size, (*partition).erase_size) };
        let mut mapped: *const c_void = ptr::null();
        let mut map_handle: sys::esp_partition_mmap_handle_t = 0;
        esp!(unsafe {
            sys::esp_partition_mmap(
                partition,
                0,
                size as usize,
                sys::esp_partition_mmap_memory_t_ESP_PARTITION_MMAP_DATA,
                &mut mapped,
                &mut map_handle,
            )
        })
        .map_err(PartitionError::Map)?;

        log::info!("Dataset partition: {} bytes, {} byte pages", size, page_size);
        Ok(Self {
            partition,
            mapped: mapped as *const u8,
            map_handle,
            size,
            page_size,
            pending: None,
        })
    }

    fn check_range(&self, address: u32, len: usize) -> Result<(), FlashError> {
        match (address as usize).checked_add(len) {
            Some(end) if end <= self.size as usize => Ok(()),
            _ => Err(FlashError::OutOfBounds {
                address,
                len: len as u32,
            }),
        }
    }
}

impl FlashDriver for PartitionFlash {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read(&self, address: u32, len: usize) -> &[u8] {
        assert!(self.check_range(address, len).is_ok(), "flash read out of bounds");
        unsafe { core::slice::from_raw_parts(self.mapped.add(address as usize), len) }
    }

    fn begin_erase(&mut self, address: u32, pages: u32) -> Result<(), FlashError> {
        if self.pending.is_some() {
            return Err(FlashError::Busy);
        }
        let len = pages * self.page_size;
        self.check_range(address, len as usize)?;

        let result = esp!(unsafe {
            sys::esp_partition_erase_range(self.partition, address as usize, len as usize)
        });
        self.pending = Some(match result {
            Ok(()) => Ok(FlashCompletion::Erased { address, pages }),
            Err(e) => {
                log::error!("esp_partition_erase_range: {}", e);
                Err(FlashError::EraseFailed { address })
            }
        });
        Ok(())
    }

    fn begin_write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.pending.is_some() {
            return Err(FlashError::Busy);
        }
        self.check_range(address, data.len())?;

        let result = esp!(unsafe {
            sys::esp_partition_write(
                self.partition,
                address as usize,
                data.as_ptr() as *const c_void,
                data.len(),
            )
        });
        self.pending = Some(match result {
            Ok(()) => Ok(FlashCompletion::Written {
                address,
                len: data.len() as u32,
            }),
            Err(e) => {
                log::error!("esp_partition_write: {}", e);
                Err(FlashError::WriteFailed { address })
            }
        });
        Ok(())
    }

    fn poll_completion(&mut self) -> Option<Result<FlashCompletion, FlashError>> {
        self.pending.take()
    }
}

impl Drop for PartitionFlash {
    fn drop(&mut self) {
        unsafe { sys::esp_partition_munmap(self.map_handle) };
    }
}
