use std::time::Duration;

use crate::packet::Function;


/**
    half-duplex bus access: send one request and wait for at most one answer

    implementations never retry, retries are expressed by the scheduler repeating its passes. The returned frame starts at the responder address, without head byte, and is not checked yet.
*/
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// `None` on timeout or any transport failure, the caller handles it as a dropped answer
    async fn send(&mut self, address: u8, function: Function, payload: &[u8], timeout: Duration) -> Option<Vec<u8>>;
}
impl<T: Transport + ?Sized> Transport for &mut T {
    async fn send(&mut self, address: u8, function: Function, payload: &[u8], timeout: Duration) -> Option<Vec<u8>> {
        (**self).send(address, function, payload, timeout).await
    }
}


#[cfg(feature = "serial")]
pub use serial::{SerialTransport, Port};

#[cfg(feature = "serial")]
mod serial {
    use std::{
        io,
        path::Path,
        sync::{Arc, Mutex, PoisonError},
        time::{Duration, Instant},
        };
    use log::*;
    use serial2::{SerialPort, CharSize, StopBits, Parity, FlowControl};

    use crate::{
        packet::{self, Function, HEAD, STATUS_OK},
        utils::Hex,
        master::Error,
        };
    use super::Transport;


    /// blocking byte link under [SerialTransport]
    pub trait Port: Send + 'static {
        /// drop whatever was received so far
        fn discard(&mut self) -> io::Result<()>;
        fn send(&mut self, data: &[u8]) -> io::Result<()>;
        /// read some bytes, failing with [io::ErrorKind::TimedOut] if none came in time
        fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize>;
    }
    impl Port for SerialPort {
        fn discard(&mut self) -> io::Result<()> {
            self.discard_input_buffer()
        }
        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            SerialPort::write_all(self, data)
        }
        fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
            self.set_read_timeout(timeout)?;
            SerialPort::read(self, buffer)
        }
    }


    /**
        [Transport] over an rs485 serial port

        the port is blocking, each exchange runs on tokio's blocking pool so the polling task stays cooperative. The port is shared with the exchange in flight, so a cancelled request leaves it in place for the next one, which waits until the former releases it.
    */
    pub struct SerialTransport<P = SerialPort> {
        port: Arc<Mutex<P>>,
    }
    impl SerialTransport {
        /// open the given serial port file with the given baud rate, 8N1 raw
        pub fn open(path: impl AsRef<Path>, rate: u32) -> Result<Self, io::Error> {
            let port = SerialPort::open(path, |mut settings: serial2::Settings| {
                    settings.set_raw();
                    settings.set_baud_rate(rate)?;
                    settings.set_char_size(CharSize::Bits8);
                    settings.set_stop_bits(StopBits::One);
                    settings.set_parity(Parity::None);
                    settings.set_flow_control(FlowControl::None);
                    Ok(settings)
                    })?;
            Ok(Self::new(port))
        }
    }
    impl<P: Port> SerialTransport<P> {
        pub fn new(port: P) -> Self {
            Self {port: Arc::new(Mutex::new(port))}
        }
    }
    impl<P: Port> Transport for SerialTransport<P> {
        async fn send(&mut self, address: u8, function: Function, payload: &[u8], timeout: Duration) -> Option<Vec<u8>> {
            let frame = match packet::encode(address, STATUS_OK, function.into(), payload) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("cannot frame {:?} to {:#04X}: {}", function, address, err);
                    return None;
                },
            };
            let port = self.port.clone();
            let exchange = tokio::task::spawn_blocking(move || {
                // a panicking exchange leaves the port usable, the next one discards its input anyway
                let mut port = port.lock().unwrap_or_else(PoisonError::into_inner);
                exchange(&mut *port, &frame, timeout)
            });
            match exchange.await {
                Ok(Ok(response)) => Some(response),
                Ok(Err(Error::Timeout)) => {
                    debug!("no answer to {:?} on {:#04X}", function, address);
                    None
                },
                Ok(Err(err)) => {
                    warn!("exchange of {:?} on {:#04X} failed: {}", function, address, err);
                    None
                },
                Err(err) => {
                    error!("serial exchange task failed: {}", err);
                    None
                },
            }
        }
    }

    /// write a request and read its answer, blocking until it arrived or the timeout elapsed
    fn exchange(port: &mut impl Port, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + timeout;
        // answers to previous timed out requests may still be around
        port.discard()?;
        let mut send = Vec::with_capacity(frame.len() + 1);
        send.push(HEAD);
        send.extend_from_slice(frame);
        debug!("send {}", Hex(&send));
        port.send(&send)?;

        // loop until head is found to catch up an answer
        let mut byte = [0u8];
        loop {
            read_exact(port, &mut byte, deadline)?;
            if byte[0] == HEAD
                {break}
            debug!("skip {:#04X} while catching up head", byte[0]);
        }
        // slave and length
        let mut header = [0u8; 2];
        read_exact(port, &mut header, deadline)?;
        let mut receive = vec![0u8; 2 + usize::from(header[1])];
        receive[.. 2].copy_from_slice(&header);
        read_exact(port, &mut receive[2 ..], deadline)?;
        debug!("receive {}", Hex(&receive));
        Ok(receive)
    }

    fn read_exact(port: &mut impl Port, mut buffer: &mut [u8], deadline: Instant) -> Result<(), Error> {
        while !buffer.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            match port.receive(buffer, remaining) {
                Ok(0) => return Err(Error::Timeout),
                Ok(size) => buffer = &mut std::mem::take(&mut buffer)[size ..],
                Err(err) if err.kind() == io::ErrorKind::TimedOut => return Err(Error::Timeout),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }


}
