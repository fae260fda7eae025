use crate::Error;

/// Host access to the shared SPI bus and the handful of discrete lines
/// around it. Implementations wrap a real SPI peripheral on hardware;
/// `sim` models the downstream chips for host-side use and tests.
pub trait Driver {
    /// Full-duplex exchange: mode 0 (clock idle low, sample on the rising
    /// edge), MSB first. `rx`, when given, must be as long as `tx`.
    fn transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<(), Error>;

    /// Drive the expander chip-select line (active-low; `true` = asserted).
    /// The DACs are never selected this way; they sit behind the decoder
    /// tree and get their select from expander output pins.
    fn set_expander_cs(&mut self, asserted: bool);

    /// Sample the shared FAULT line. Returns `true` while the line is held
    /// low (fault asserted) by any downstream chip.
    fn fault_line_low(&mut self) -> bool;

    /// Busy-wait for at least `us` microseconds.
    fn delay_us(&mut self, us: u32);
}

pub mod sim;
