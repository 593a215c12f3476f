use alloc::string::{String, ToString};

use core::net::Ipv4Addr;

/// Separates the authentication data from the trailing words.
pub const EXTRA_DATA_DELIMITER: u8 = b'#';

// Identifier only.
const DHCP_TAIL_LEN: usize = 4;
// Identifier, local IP, netmask, gateway and DNS server.
const STATIC_IP_TAIL_LEN: usize = 20;

/// Errors produced while parsing `EasyLink` extra data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraDataError {
    /// No delimiter found at a position leaving a valid tail.
    MissingDelimiter,
    /// The tail is word aligned but does not contain exactly one or five
    /// words.
    InvalidWordCount(usize),
}

impl core::fmt::Display for ExtraDataError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingDelimiter => f.write_str("extra data delimiter not found"),
            Self::InvalidWordCount(words) => {
                write!(f, "extra data carries {words} words instead of 1 or 5")
            }
        }
    }
}

impl core::error::Error for ExtraDataError {}

/// Static IP configuration delivered with the extra data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIp {
    /// Local IP address, dotted decimal.
    pub local_ip: String,
    /// Netmask, dotted decimal.
    pub netmask: String,
    /// Gateway, dotted decimal.
    pub gateway: String,
    /// DNS server, dotted decimal.
    pub dns_server: String,
}

/// Second stage of an `EasyLink` session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraData<'a> {
    /// Authentication blob, checked by the application.
    pub auth: &'a [u8],
    /// Session identifier chosen by the provisioning peer.
    pub identifier: u32,
    /// Static IP configuration, `None` selects DHCP.
    pub static_ip: Option<StaticIp>,
}

impl ExtraData<'_> {
    /// Whether the device must obtain its address through DHCP.
    #[must_use]
    pub const fn uses_dhcp(&self) -> bool {
        self.static_ip.is_none()
    }
}

fn word(bytes: &[u8]) -> [u8; 4] {
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[..4]);
    word
}

fn dotted(bytes: &[u8]) -> String {
    Ipv4Addr::from(word(bytes)).to_string()
}

/// Parses the extra data payload of an `EasyLink` session.
///
/// The payload is `<auth>#<identifier>` or
/// `<auth>#<identifier><local ip><netmask><gateway><dns>`, every trailing
/// field being a 4-byte word. The identifier is stored little-endian and
/// the addresses in network order. The delimiter is searched from the end
/// of the payload, so the authentication blob may contain it as well.
///
/// The addresses follow each other without separators. Peers that put a
/// `/` before each address send a 24-byte tail, which is rejected with
/// [`ExtraDataError::InvalidWordCount`] of six words.
///
/// # Errors
///
/// [`ExtraDataError::InvalidWordCount`] when the tail is made of words but
/// their count is neither one nor five, [`ExtraDataError::MissingDelimiter`]
/// for any other malformed payload.
pub fn parse_extra_data(data: &[u8]) -> Result<ExtraData<'_>, ExtraDataError> {
    let delimiters = || {
        data.iter()
            .enumerate()
            .rev()
            .filter(|(_, byte)| **byte == EXTRA_DATA_DELIMITER)
            .map(|(index, _)| (index, data.len() - index - 1))
    };

    let Some((index, tail_len)) = delimiters()
        .find(|(_, tail_len)| *tail_len == DHCP_TAIL_LEN || *tail_len == STATIC_IP_TAIL_LEN)
    else {
        return Err(delimiters()
            .find(|(_, tail_len)| *tail_len > 0 && tail_len % 4 == 0)
            .map_or(ExtraDataError::MissingDelimiter, |(_, tail_len)| {
                ExtraDataError::InvalidWordCount(tail_len / 4)
            }));
    };

    let auth = &data[..index];
    let tail = &data[index + 1..];
    let identifier = u32::from_le_bytes(word(tail));

    let static_ip = (tail_len == STATIC_IP_TAIL_LEN).then(|| StaticIp {
        local_ip: dotted(&tail[4..]),
        netmask: dotted(&tail[8..]),
        gateway: dotted(&tail[12..]),
        dns_server: dotted(&tail[16..]),
    });

    Ok(ExtraData {
        auth,
        identifier,
        static_ip,
    })
}
