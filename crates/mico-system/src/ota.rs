use std::fmt::Display;

use futures_util::{Stream, StreamExt};

use mico::checksum::Crc16;
use mico::config::{BootTable, ConfigState, EasyLinkBypass};

use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::flash::Partition;
use crate::power::PowerState;
use crate::system::Context;

/// Receives a firmware image into the OTA partition.
///
/// The partition is erased when the first chunk arrives and every chunk is
/// written as received. The boot table is written only once the whole
/// stream was received, so an interrupted upload never replaces the
/// pending image. On success the device resets into the bootloader.
///
/// Returns the image length.
pub(crate) async fn receive<S, D, E>(
    context: &Context,
    stream: S,
    content_length: Option<usize>,
) -> Result<usize>
where
    S: Stream<Item = std::result::Result<D, E>>,
    D: AsRef<[u8]>,
    E: Display,
{
    let info = context
        .flash
        .partition(Partition::OtaTemp)
        .ok_or_else(|| Error::new(ErrorKind::NotInitialized, "The device has no OTA partition"))?;

    if let Some(length) = content_length {
        if length > info.size {
            return Err(Error::new(
                ErrorKind::Param,
                format!("Image of {length} bytes exceeds the OTA partition of {} bytes", info.size),
            ));
        }
    }

    let mut stream = std::pin::pin!(stream);
    let mut crc = Crc16::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("OTA stream interrupted after {} bytes: {e}", crc.len());
            Error::new(ErrorKind::Connection, format!("OTA stream interrupted: {e}"))
        })?;
        let data = chunk.as_ref();
        if data.is_empty() {
            continue;
        }

        let offset = crc.len();
        if offset + data.len() > info.size {
            return Err(Error::new(
                ErrorKind::Param,
                format!("Image exceeds the OTA partition of {} bytes", info.size),
            ));
        }

        if offset == 0 {
            debug!("Erasing the OTA partition");
            context.flash.erase(Partition::OtaTemp)?;
        }
        context.flash.write(Partition::OtaTemp, offset, data)?;
        crc.update(data);
    }

    let length = crc.len();
    if length == 0 {
        return Err(Error::new(ErrorKind::Param, "Empty OTA image"));
    }
    if let Some(expected) = content_length {
        if length != expected {
            return Err(Error::new(
                ErrorKind::Connection,
                format!("OTA image truncated at {length} of {expected} bytes"),
            ));
        }
    }

    let image_length = u32::try_from(length)
        .map_err(|_| Error::new(ErrorKind::Param, "OTA image length out of range"))?;
    let crc = crc.finalize();

    {
        let mut guard = context.store.lock()?;
        guard.record_mut().boot_table = BootTable::upgrade(info.start_address, image_length, crc);
        if guard.system().configured != ConfigState::AllConfigured {
            guard.system_mut().easylink_bypass = EasyLinkBypass::SoftApBypass;
        }
        guard.commit()?;
    }

    info!("OTA image of {length} bytes received, CRC 0x{crc:04X}");
    context.power.request_transition(PowerState::SoftwareReset);

    Ok(length)
}
