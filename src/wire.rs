//! Protocol-line helpers for networked backends.
//!
//! Wire drivers read their control channels line by line; these helpers
//! centralize the byte loop, echo traffic into the class protocol log
//! when one is installed, and keep over-long lines from desynchronizing
//! the stream.

use std::io::{self, Read, Write};

use crate::backend::Backend;
use crate::dcache::Dcache;
use crate::error::{VfsError, VfsResult};

impl<B: Backend> Dcache<B> {
    /// Read one `term`-terminated line from `sock` into `buf`, echoing
    /// every byte (terminator included) to the protocol log. Returns the
    /// line length, or `None` on end of stream. A line longer than `buf`
    /// is truncated and the remainder discarded up to the next newline.
    pub fn get_line(
        &mut self,
        sock: &mut dyn Read,
        buf: &mut [u8],
        term: u8,
    ) -> io::Result<Option<usize>> {
        let mut n = 0;
        let mut c = [0u8; 1];
        while n < buf.len() {
            if sock.read(&mut c)? == 0 {
                return Ok(None);
            }
            self.log_byte(c[0]);
            if c[0] == term {
                return Ok(Some(n));
            }
            buf[n] = c[0];
            n += 1;
        }
        // Too long: discard the rest of the line.
        while sock.read(&mut c)? != 0 {
            self.log_byte(c[0]);
            if c[0] == b'\n' {
                return Ok(Some(n));
            }
        }
        Ok(None)
    }

    /// Like [`get_line`](Self::get_line) with a fixed `\n` terminator,
    /// but polling the interrupt flag before every byte. Interruption
    /// surfaces as [`VfsError::Interrupted`]; no protocol logging.
    pub fn get_line_interruptible(
        &mut self,
        sock: &mut dyn Read,
        buf: &mut [u8],
    ) -> VfsResult<Option<usize>> {
        let mut n = 0;
        let mut c = [0u8; 1];
        while n < buf.len() {
            if self.interrupt.take() {
                return Err(VfsError::Interrupted);
            }
            match sock.read(&mut c) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    if c[0] == b'\n' {
                        return Ok(Some(n));
                    }
                    buf[n] = c[0];
                    n += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    return Err(VfsError::Interrupted);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    fn log_byte(&mut self, b: u8) {
        if let Some(f) = &mut self.logfile {
            let _ = f.write_all(&[b]);
            let _ = f.flush();
        }
    }
}
