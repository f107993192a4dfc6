//! Pipe queries and raw pipe I/O on the open interface
//!
//! Pipe 0 is the default control pipe. The host's endpoint count excludes
//! it, so an interface reporting `n` endpoints has pipes `0..=n`.

use crate::connection::Connection;
use crate::error::{PipeEnumerationError, TransferError};
use crate::host::UsbHost;
use protocol::PipeProperties;
use tracing::debug;

impl<H: UsbHost> Connection<H> {
    fn claimed_interface(&self) -> Option<&H::Interface> {
        self.interface.as_ref().filter(|_| self.is_open())
    }

    /// Number of endpoints on the open interface, control pipe excluded
    pub fn endpoint_count(&self) -> Result<u8, PipeEnumerationError> {
        let interface = self.claimed_interface().ok_or(PipeEnumerationError::NotOpen)?;
        self.host
            .endpoint_count(interface)
            .map_err(PipeEnumerationError::EndpointCount)
    }

    pub fn get_pipe(&self, index: u8) -> Result<PipeProperties, PipeEnumerationError> {
        let interface = self.claimed_interface().ok_or(PipeEnumerationError::NotOpen)?;
        self.host
            .pipe_properties(interface, index)
            .map_err(|source| PipeEnumerationError::Pipe { index, source })
    }

    /// Properties of every pipe, control pipe first
    ///
    /// Stops at the first pipe that cannot be queried; nothing is returned
    /// for the pipes queried before it.
    pub fn all_pipes(&self) -> Result<Vec<PipeProperties>, PipeEnumerationError> {
        let count = self.endpoint_count()?;
        let pipes = (0..=count)
            .map(|index| self.get_pipe(index))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Enumerated {} pipe(s)", pipes.len());
        Ok(pipes)
    }

    /// Read from `pipe` into `buf`, returning the bytes actually read
    pub fn read_pipe(&mut self, pipe: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        let interface = self.claimed_interface().ok_or(TransferError::NotOpen)?;
        let n = self.host.read_pipe(interface, pipe, buf)?;
        debug!("Read {} byte(s) from pipe {}", n, pipe);
        Ok(n)
    }

    pub fn write_pipe(&mut self, pipe: u8, data: &[u8]) -> Result<(), TransferError> {
        let interface = self.claimed_interface().ok_or(TransferError::NotOpen)?;
        self.host.write_pipe(interface, pipe, data)?;
        debug!("Wrote {} byte(s) to pipe {}", data.len(), pipe);
        Ok(())
    }

    /// Abort pending I/O on `pipe`
    pub fn abort_pipe(&mut self, pipe: u8) -> Result<(), TransferError> {
        let interface = self.claimed_interface().ok_or(TransferError::NotOpen)?;
        Ok(self.host.abort_pipe(interface, pipe)?)
    }
}
