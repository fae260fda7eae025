pub mod config;
mod regs;
pub mod sys;
mod bus;
mod dac;
mod scpi;
mod cal;
mod manager;

#[derive(Debug)]
pub enum Error {
    Driver(std::io::Error),
    Other(Box<dyn std::error::Error + Sync + Send + 'static>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Driver(io_error) =>
                write!(f, "SPI driver I/O error: {}", io_error),
            Self::Other(error) =>
                write!(f, "{}", error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            &Self::Driver(ref io_error) => Some(io_error),
            _ => None
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Driver(io_error) =>
                io_error,
            Error::Other(error) => {
                match error.downcast::<std::io::Error>() {
                    Ok(error) => *error,
                    Err(error) => std::io::Error::new(io::ErrorKind::Other, error)
                }
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        match error.downcast::<Self>() {
            Ok(error) => error,
            Err(error) => Error::Other(error.into()),
        }
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

use std::io;

pub use config::{
    CsBitOrder,
    BusOptions,
};

pub use scpi::{
    Command,
    CommandKind,
    ParseError,
    parse,
};

pub use bus::DacBus;

pub use dac::{
    Dac,
    Ltc2662,
    Ltc2664,
    Opcode,
};

pub use cal::{
    ChannelCalibration,
    Store,
    RamStore,
};

pub use manager::BoardManager;
