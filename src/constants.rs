//! Driver-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// CEC addressing (HDMI 1.4, CEC 10.2)
// =============================================================================

/// Destination nibble addressing every device on the bus
pub const BROADCAST_ADDRESS: u8 = 0x0F;

/// Source nibble of a device that holds no logical address
pub const UNREGISTERED_ADDRESS: u8 = 0x0F;

/// The only address a sink host may claim through `add_logical_address`
pub const SINK_CLAIMABLE_ADDRESS: u8 = 0x00;

/// Highest nibble value of a physical address component (4.4.4.4)
pub const MAX_PHYSICAL_NIBBLE: u8 = 0x04;

// =============================================================================
// Framing (HDMI 1.4, CEC 6.1)
// =============================================================================

/// Maximum blocks in one frame: header + opcode + 14 operands
pub const MAX_FRAME_BLOCKS: usize = 16;

/// Maximum operand bytes following the opcode
pub const MAX_OPERANDS: usize = MAX_FRAME_BLOCKS - 2;

// =============================================================================
// Buffers
// =============================================================================

/// Channel capacity between adapter threads and the session
pub const CHANNEL_CAPACITY: usize = 64;

/// Serial read buffer size
pub const SERIAL_BUFFER_SIZE: usize = 1024;

/// Largest COBS frame exchanged with a serial transceiver
pub const ADAPTER_MAX_MESSAGE: usize = 256;

// =============================================================================
// Serial
// =============================================================================

/// Default baud rate for serial transceivers (ignored by USB CDC devices)
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Read timeout of the serial reader thread (milliseconds)
pub const SERIAL_READ_TIMEOUT_MS: u64 = 10;

/// Consecutive zero-byte reads before assuming port disconnected
pub const SERIAL_DISCONNECT_THRESHOLD: u32 = 10;

/// Default wait for a transceiver reply (milliseconds)
///
/// Covers a 16 block frame with the 5 retransmissions a transceiver may
/// perform on its own (CEC 7.1).
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 2000;
