// Protocol and timing constants for the MAX!/Moritz CUL bridge

use std::time::Duration;

/// Well-known cube identity recommended by the FHEM CUL_MAX module.
pub const CUBE_ID: u32 = 0x123456;

/// Identity to use when pairing as a wall thermostat.
pub const WALL_THERMOSTAT_ID: u32 = 0x123457;

/// Identity to use when pairing as a shutter contact.
pub const SHUTTER_CONTACT_ID: u32 = 0x123458;

/// Hex digits of the frame header after the length field
/// (counter 2 + flag 2 + type 2 + sender 6 + receiver 6 + group 2).
pub const HEADER_HEX_DIGITS: usize = 20;

/// Airtime required to answer a pair request in time (milliseconds).
pub const PAIR_BUDGET_MS: u32 = 2000;

/// Airtime cost per transmitted character (milliseconds).
pub const BUDGET_COST_PER_CHAR_MS: u32 = 10;

/// Default CUL device node.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyACM0";

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 38_400;

/// Poll period of the serial transport worker.
pub const TRANSPORT_POLL_PERIOD: Duration = Duration::from_millis(200);

/// Poll period of the protocol engine worker.
pub const ENGINE_POLL_PERIOD: Duration = Duration::from_millis(300);

/// Bounded wait for queue pops and budget polls.
pub const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Wait for a reply after probing the transceiver with a command.
pub const PROBE_REPLY_WAIT: Duration = Duration::from_millis(300);

/// Version probe attempts before the port is reopened (and after).
pub const VERSION_PROBE_ATTEMPTS: usize = 10;
